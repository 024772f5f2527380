//! The hypervisor session façade.
//!
//! One [`Session`] owns one logical daemon connection. Every operation is a
//! synchronous round trip (or a short resolve-then-act sequence); nothing is
//! cached, queued, or retried. A session is not internally synchronized:
//! concurrent callers must serialize access or use one session each.

use crate::descriptor::VmDescriptor;
use crate::error::{ActionError, ConnectionError, DefineError};
use crate::hypervisor::{DomainHandle, HvError, Hypervisor};
use crate::libvirt::Libvirt;
use crate::types::{VmAction, VmDetail, VmFilter, VmSummary};
use tracing::{error, info, warn};

/// Session façade over a hypervisor daemon, generic so tests can plug in
/// [`crate::mock::MockHypervisor`]. Defaults to libvirt.
#[derive(Debug)]
pub struct Session<H: Hypervisor = Libvirt> {
    uri: String,
    handle: Option<H>,
}

impl<H: Hypervisor> Session<H> {
    /// A disconnected session pointed at `uri`. No daemon traffic happens
    /// until [`Session::connect`].
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            handle: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Open the connection. Idempotent: when already connected this returns
    /// success without touching the daemon.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.handle.is_some() {
            return Ok(());
        }

        match H::open(&self.uri) {
            Ok(handle) => {
                info!(uri = %self.uri, "connected to hypervisor");
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!(uri = %self.uri, "hypervisor connection failed: {e}");
                Err(ConnectionError {
                    uri: self.uri.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Live connectivity check. A held handle is not trusted: the daemon is
    /// probed on every call, and a failed probe drops the handle so the next
    /// [`Session::connect`] can reopen.
    pub fn is_connected(&mut self) -> bool {
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };

        match handle.version() {
            Ok(_) => true,
            Err(e) => {
                warn!(uri = %self.uri, "liveness probe failed, dropping handle: {e}");
                self.handle = None;
                false
            }
        }
    }

    /// Close the connection. The handle is cleared unconditionally, even
    /// when the close call itself faults; a handle the daemon may no longer
    /// honor must not survive locally.
    pub fn disconnect(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        match handle.close() {
            Ok(()) => info!(uri = %self.uri, "disconnected from hypervisor"),
            Err(e) => warn!(uri = %self.uri, "error closing hypervisor connection: {e}"),
        }
    }

    /// Enumerate domains, sorted by name.
    ///
    /// Returns an empty list both when not connected and when enumeration
    /// faults (the fault is logged). Callers cannot distinguish the two from
    /// the return value; reconnecting on the next call is the recovery path.
    pub fn list(&mut self, filter: VmFilter) -> Vec<VmSummary> {
        let result = match self.handle.as_ref() {
            Some(handle) => handle.list_domains(filter),
            None => return Vec::new(),
        };

        let domains = match result {
            Ok(domains) => domains,
            Err(e) => {
                error!("failed to enumerate domains: {e}");
                self.invalidate_on_disconnect(&e);
                return Vec::new();
            }
        };

        let mut rows = Vec::new();
        for domain in domains {
            match (domain.name(), domain.state()) {
                (Ok(name), Ok(state)) => rows.push(VmSummary { name, state }),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("skipping unreadable domain: {e}");
                    self.invalidate_on_disconnect(&e);
                }
            }
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Resolve a domain by name.
    ///
    /// `None` covers three cases: not connected, no such domain (logged at
    /// info; an expected outcome), and any other daemon fault (logged at
    /// error). Callers needing the distinction must consult the log.
    pub fn resolve(&mut self, name: &str) -> Option<H::Domain> {
        let result = self.handle.as_ref()?.lookup_by_name(name);

        match result {
            Ok(domain) => Some(domain),
            Err(HvError::NoSuchDomain) => {
                info!("domain '{name}' not found");
                None
            }
            Err(e) => {
                error!("failed to look up domain '{name}': {e}");
                self.invalidate_on_disconnect(&e);
                None
            }
        }
    }

    /// Apply a lifecycle action to a named domain: resolve, then act.
    ///
    /// `stop` only requests a guest shutdown; poll state to observe the
    /// domain actually going down. `destroy` is an immediate power-off and
    /// is issued without confirmation here. `delete` refuses active domains
    /// before the daemon is ever asked.
    pub fn perform(&mut self, name: &str, action: VmAction) -> Result<(), ActionError> {
        let Some(domain) = self.resolve(name) else {
            warn!("{action} '{name}': domain not found");
            return Err(ActionError::NotFound(name.to_string()));
        };

        let result = match action {
            VmAction::Start => domain.start(),
            VmAction::Stop => domain.shutdown(),
            VmAction::Destroy => domain.destroy(),
            VmAction::Suspend => domain.suspend(),
            VmAction::Resume => domain.resume(),
            VmAction::Delete => match domain.state() {
                Ok(state) if state.is_active() => {
                    warn!("delete '{name}': domain is {state}, refusing to undefine");
                    return Err(ActionError::InvalidState {
                        name: name.to_string(),
                        state,
                        action: "delete",
                    });
                }
                Ok(_) => domain.undefine(),
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(()) => {
                info!("{action} '{name}': ok");
                Ok(())
            }
            Err(e) => {
                error!("{action} '{name}': {e}");
                self.invalidate_on_disconnect(&e);
                match e {
                    HvError::NoSuchDomain => Err(ActionError::NotFound(name.to_string())),
                    other => Err(ActionError::DaemonFault(other.to_string())),
                }
            }
        }
    }

    /// Register a new domain definition without starting it.
    ///
    /// Backing disk images are the caller's responsibility; a descriptor
    /// pointing at a missing image defines fine and fails at boot.
    pub fn define(&mut self, descriptor: &VmDescriptor) -> Result<VmSummary, DefineError> {
        let Some(handle) = self.handle.as_ref() else {
            warn!("define '{}': not connected", descriptor.name);
            return Err(DefineError::NotConnected);
        };

        let xml = descriptor
            .to_xml()
            .map_err(|e| DefineError::DaemonFault(format!("descriptor serialization: {e}")))?;

        let result = handle.define_domain(&xml);
        match result {
            Ok(domain) => {
                let summary = domain
                    .name()
                    .and_then(|name| domain.state().map(|state| VmSummary { name, state }));
                match summary {
                    Ok(summary) => {
                        info!("defined domain '{}'", summary.name);
                        Ok(summary)
                    }
                    Err(e) => {
                        error!("defined domain '{}' but can't read it back: {e}", descriptor.name);
                        self.invalidate_on_disconnect(&e);
                        Err(DefineError::DaemonFault(e.to_string()))
                    }
                }
            }
            Err(e) => {
                error!("define '{}': {e}", descriptor.name);
                self.invalidate_on_disconnect(&e);
                Err(DefineError::DaemonFault(e.to_string()))
            }
        }
    }

    /// Read-model snapshot for one domain, absent under the same collapsed
    /// conditions as [`Session::resolve`].
    pub fn describe(&mut self, name: &str) -> Option<VmDetail> {
        let domain = self.resolve(name)?;
        match snapshot(&domain) {
            Ok(detail) => Some(detail),
            Err(e) => {
                error!("failed to read details of domain '{name}': {e}");
                self.invalidate_on_disconnect(&e);
                None
            }
        }
    }

    /// Connection-level faults are the one class that invalidates the
    /// handle; the next operation goes back through `connect`.
    fn invalidate_on_disconnect(&mut self, e: &HvError) {
        if e.is_disconnect() {
            warn!(uri = %self.uri, "connection-level fault, dropping handle");
            self.handle = None;
        }
    }
}

fn snapshot<D: DomainHandle>(domain: &D) -> Result<VmDetail, HvError> {
    Ok(VmDetail {
        name: domain.name()?,
        uuid: domain.uuid()?,
        id: domain.id(),
        state: domain.state()?,
        vcpus: domain.vcpus()?,
        memory_kib: domain.memory_kib()?,
        max_memory_kib: domain.max_memory_kib()?,
        os_type: domain.os_type()?,
        autostart: domain.autostart()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DiskFormat, DiskSpec, VmDescriptor};
    use crate::mock::{MockDaemon, MockHypervisor};
    use crate::types::VmState;
    use std::collections::BTreeSet;

    fn mock_session(uri: &str) -> Session<MockHypervisor> {
        Session::new(uri)
    }

    #[test]
    fn connect_is_idempotent() {
        let daemon = MockDaemon::register("mock:///connect-idempotent");
        let mut session = mock_session("mock:///connect-idempotent");

        assert!(session.connect().is_ok());
        assert!(session.connect().is_ok());
        assert_eq!(daemon.open_calls(), 1);
    }

    #[test]
    fn failed_probe_clears_handle_and_allows_reconnect() {
        let daemon = MockDaemon::register("mock:///probe");
        let mut session = mock_session("mock:///probe");
        session.connect().unwrap();
        assert!(session.is_connected());

        daemon.set_fail_version(true);
        assert!(!session.is_connected());
        // Handle is gone; no further probe traffic without a reconnect.
        assert!(!session.is_connected());
        assert_eq!(daemon.version_calls(), 2);

        daemon.set_fail_version(false);
        assert!(session.connect().is_ok());
        assert!(session.is_connected());
        assert_eq!(daemon.open_calls(), 2);
    }

    #[test]
    fn disconnect_clears_handle_even_when_close_faults() {
        let daemon = MockDaemon::register("mock:///close-fault");
        let mut session = mock_session("mock:///close-fault");
        session.connect().unwrap();

        daemon.set_fail_close(true);
        session.disconnect();
        assert!(!session.is_connected());

        assert!(session.connect().is_ok());
        assert_eq!(daemon.open_calls(), 2);
    }

    #[test]
    fn connect_failure_leaves_session_usable() {
        let daemon = MockDaemon::register("mock:///refused");
        daemon.set_fail_open(true);
        let mut session = mock_session("mock:///refused");

        let err = session.connect().unwrap_err();
        assert!(err.to_string().contains("mock:///refused"));

        // "Can't list" and "nothing to list" are the same observable outcome.
        assert!(session.list(VmFilter::All).is_empty());
        assert!(!session.is_connected());
    }

    #[test]
    fn list_partitions_by_activity() {
        let daemon = MockDaemon::register("mock:///partition");
        daemon.add_domain("web01", VmState::Running);
        daemon.add_domain("cache01", VmState::Paused);
        daemon.add_domain("db01", VmState::Stopped);
        daemon.add_domain("old01", VmState::Crashed);

        let mut session = mock_session("mock:///partition");
        session.connect().unwrap();

        let names = |rows: Vec<VmSummary>| -> BTreeSet<String> {
            rows.into_iter().map(|r| r.name).collect()
        };
        let active = names(session.list(VmFilter::Active));
        let inactive = names(session.list(VmFilter::Inactive));
        let all = names(session.list(VmFilter::All));

        assert!(active.is_disjoint(&inactive));
        let union: BTreeSet<_> = active.union(&inactive).cloned().collect();
        assert_eq!(union, all);
        assert_eq!(
            active,
            BTreeSet::from(["cache01".to_string(), "web01".to_string()])
        );
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn list_is_sorted_by_name() {
        let daemon = MockDaemon::register("mock:///sorted");
        daemon.add_domain("zeta", VmState::Running);
        daemon.add_domain("alpha", VmState::Stopped);

        let mut session = mock_session("mock:///sorted");
        session.connect().unwrap();
        let rows = session.list(VmFilter::All);
        assert_eq!(rows[0].name, "alpha");
        assert_eq!(rows[1].name, "zeta");
        assert_eq!(rows[1].state, VmState::Running);
    }

    #[test]
    fn start_unknown_domain_is_not_found() {
        let _daemon = MockDaemon::register("mock:///unknown");
        let mut session = mock_session("mock:///unknown");
        session.connect().unwrap();

        assert_eq!(
            session.perform("ghost", VmAction::Start),
            Err(ActionError::NotFound("ghost".to_string()))
        );

        // Same answer when never connected.
        let mut cold = mock_session("mock:///unknown");
        assert_eq!(
            cold.perform("ghost", VmAction::Start),
            Err(ActionError::NotFound("ghost".to_string()))
        );
    }

    #[test]
    fn start_stopped_domain_then_describe_shows_running() {
        let daemon = MockDaemon::register("mock:///start");
        daemon.add_domain("web01", VmState::Stopped);

        let mut session = mock_session("mock:///start");
        session.connect().unwrap();

        assert!(session.perform("web01", VmAction::Start).is_ok());

        let detail = session.describe("web01").unwrap();
        assert_eq!(detail.state, VmState::Running);
        assert!(detail.id.is_some());
    }

    #[test]
    fn stop_is_request_only_and_needs_a_running_guest() {
        let daemon = MockDaemon::register("mock:///stop");
        daemon.add_domain("web01", VmState::Running);
        daemon.add_domain("db01", VmState::Stopped);

        let mut session = mock_session("mock:///stop");
        session.connect().unwrap();

        assert!(session.perform("web01", VmAction::Stop).is_ok());
        assert!(matches!(
            session.perform("db01", VmAction::Stop),
            Err(ActionError::DaemonFault(_))
        ));
    }

    #[test]
    fn suspend_resume_cycle() {
        let daemon = MockDaemon::register("mock:///pause");
        daemon.add_domain("web01", VmState::Running);

        let mut session = mock_session("mock:///pause");
        session.connect().unwrap();

        assert!(session.perform("web01", VmAction::Suspend).is_ok());
        assert_eq!(daemon.domain_state("web01"), Some(VmState::Paused));
        assert!(session.perform("web01", VmAction::Resume).is_ok());
        assert_eq!(daemon.domain_state("web01"), Some(VmState::Running));

        // Suspending a non-running domain is a daemon fault, not a crash.
        session.perform("web01", VmAction::Suspend).unwrap();
        assert!(matches!(
            session.perform("web01", VmAction::Suspend),
            Err(ActionError::DaemonFault(_))
        ));
    }

    #[test]
    fn delete_running_domain_is_refused_before_the_daemon_sees_it() {
        let daemon = MockDaemon::register("mock:///delete-guard");
        daemon.add_domain("db01", VmState::Running);

        let mut session = mock_session("mock:///delete-guard");
        session.connect().unwrap();

        assert_eq!(
            session.perform("db01", VmAction::Delete),
            Err(ActionError::InvalidState {
                name: "db01".to_string(),
                state: VmState::Running,
                action: "delete",
            })
        );
        assert_eq!(daemon.undefine_calls(), 0);

        // Still there, still running.
        let detail = session.describe("db01").unwrap();
        assert_eq!(detail.state, VmState::Running);
    }

    #[test]
    fn delete_stopped_domain_removes_the_definition() {
        let daemon = MockDaemon::register("mock:///delete");
        daemon.add_domain("db01", VmState::Stopped);

        let mut session = mock_session("mock:///delete");
        session.connect().unwrap();

        assert!(session.perform("db01", VmAction::Delete).is_ok());
        assert_eq!(daemon.undefine_calls(), 1);
        assert!(session.resolve("db01").is_none());
        assert_eq!(
            session.perform("db01", VmAction::Start),
            Err(ActionError::NotFound("db01".to_string()))
        );
    }

    #[test]
    fn define_round_trips_through_describe() {
        let _daemon = MockDaemon::register("mock:///define");
        let mut session = mock_session("mock:///define");
        session.connect().unwrap();

        let descriptor = VmDescriptor::new(
            "app01",
            4,
            4 * 1024 * 1024,
            DiskSpec::new("/var/lib/libvirt/images/app01.qcow2", DiskFormat::Qcow2),
        );
        let summary = session.define(&descriptor).unwrap();
        assert_eq!(summary.name, "app01");
        assert_eq!(summary.state, VmState::Stopped);

        let detail = session.describe("app01").unwrap();
        assert_eq!(detail.name, "app01");
        assert_eq!(detail.vcpus, 4);
        assert_eq!(detail.memory_kib, 4 * 1024 * 1024);
        assert_eq!(detail.state, VmState::Stopped);
        assert_eq!(detail.uuid, descriptor.uuid.to_string());
    }

    #[test]
    fn define_requires_a_connection() {
        let _daemon = MockDaemon::register("mock:///define-cold");
        let mut session = mock_session("mock:///define-cold");

        let descriptor = VmDescriptor::new(
            "app01",
            1,
            1024 * 1024,
            DiskSpec::new("/tmp/app01.qcow2", DiskFormat::Qcow2),
        );
        assert_eq!(
            session.define(&descriptor).unwrap_err(),
            DefineError::NotConnected
        );
    }

    #[test]
    fn resolve_collapses_not_found_and_disconnected() {
        let daemon = MockDaemon::register("mock:///resolve");
        daemon.add_domain("web01", VmState::Running);

        let mut session = mock_session("mock:///resolve");
        assert!(session.resolve("web01").is_none());

        session.connect().unwrap();
        assert!(session.resolve("web01").is_some());
        assert!(session.resolve("ghost").is_none());
    }
}
