//! Production [`Hypervisor`] implementation on top of the libvirt bindings.

use crate::hypervisor::{DomainHandle, HvError, Hypervisor};
use crate::types::{VmFilter, VmState};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::ErrorNumber;
use virt::sys;

/// Map a libvirt error into the façade's classification. `NoDomain` is the
/// daemon's "not found", everything connection-shaped forces the session to
/// drop its handle.
fn map_err(e: virt::error::Error) -> HvError {
    match e.code() {
        ErrorNumber::NoDomain => HvError::NoSuchDomain,
        ErrorNumber::NoConnect | ErrorNumber::InvalidConn => HvError::Disconnected(e.to_string()),
        _ => HvError::Fault(e.to_string()),
    }
}

fn state_from_code(code: sys::virDomainState) -> VmState {
    match code {
        sys::VIR_DOMAIN_RUNNING => VmState::Running,
        sys::VIR_DOMAIN_BLOCKED => VmState::Blocked,
        sys::VIR_DOMAIN_PAUSED => VmState::Paused,
        sys::VIR_DOMAIN_SHUTDOWN => VmState::ShuttingDown,
        sys::VIR_DOMAIN_SHUTOFF => VmState::Stopped,
        sys::VIR_DOMAIN_CRASHED => VmState::Crashed,
        sys::VIR_DOMAIN_PMSUSPENDED => VmState::Suspended,
        _ => VmState::NoState,
    }
}

/// One libvirt connection.
#[derive(Debug)]
pub struct Libvirt {
    conn: Connect,
}

impl Hypervisor for Libvirt {
    type Domain = LibvirtDomain;

    fn open(uri: &str) -> Result<Self, HvError> {
        let conn = Connect::open(Some(uri)).map_err(map_err)?;
        Ok(Self { conn })
    }

    fn version(&self) -> Result<u64, HvError> {
        self.conn
            .get_lib_version()
            .map(u64::from)
            .map_err(|e| HvError::Disconnected(e.to_string()))
    }

    fn close(&mut self) -> Result<(), HvError> {
        self.conn.close().map(|_| ()).map_err(map_err)
    }

    fn list_domains(&self, filter: VmFilter) -> Result<Vec<LibvirtDomain>, HvError> {
        let flags = match filter {
            VmFilter::Active => sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE,
            VmFilter::Inactive => sys::VIR_CONNECT_LIST_DOMAINS_INACTIVE,
            VmFilter::All => {
                sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE | sys::VIR_CONNECT_LIST_DOMAINS_INACTIVE
            }
        };
        let domains = self.conn.list_all_domains(flags).map_err(map_err)?;
        Ok(domains.into_iter().map(LibvirtDomain).collect())
    }

    fn lookup_by_name(&self, name: &str) -> Result<LibvirtDomain, HvError> {
        Domain::lookup_by_name(&self.conn, name)
            .map(LibvirtDomain)
            .map_err(map_err)
    }

    fn define_domain(&self, xml: &str) -> Result<LibvirtDomain, HvError> {
        Domain::define_xml(&self.conn, xml)
            .map(LibvirtDomain)
            .map_err(map_err)
    }
}

/// A resolved libvirt domain.
#[derive(Debug)]
pub struct LibvirtDomain(Domain);

impl DomainHandle for LibvirtDomain {
    fn name(&self) -> Result<String, HvError> {
        self.0.get_name().map_err(map_err)
    }

    fn id(&self) -> Option<u32> {
        self.0.get_id()
    }

    fn uuid(&self) -> Result<String, HvError> {
        self.0.get_uuid_string().map_err(map_err)
    }

    fn state(&self) -> Result<VmState, HvError> {
        let (code, _reason) = self.0.get_state().map_err(map_err)?;
        Ok(state_from_code(code))
    }

    fn vcpus(&self) -> Result<u32, HvError> {
        Ok(self.0.get_info().map_err(map_err)?.nr_virt_cpu)
    }

    fn memory_kib(&self) -> Result<u64, HvError> {
        Ok(self.0.get_info().map_err(map_err)?.memory)
    }

    fn max_memory_kib(&self) -> Result<u64, HvError> {
        Ok(self.0.get_info().map_err(map_err)?.max_mem)
    }

    fn os_type(&self) -> Result<String, HvError> {
        self.0.get_os_type().map_err(map_err)
    }

    fn autostart(&self) -> Result<bool, HvError> {
        self.0.get_autostart().map_err(map_err)
    }

    fn start(&self) -> Result<(), HvError> {
        self.0.create().map(|_| ()).map_err(map_err)
    }

    fn shutdown(&self) -> Result<(), HvError> {
        self.0.shutdown().map(|_| ()).map_err(map_err)
    }

    fn destroy(&self) -> Result<(), HvError> {
        self.0.destroy().map(|_| ()).map_err(map_err)
    }

    fn suspend(&self) -> Result<(), HvError> {
        self.0.suspend().map(|_| ()).map_err(map_err)
    }

    fn resume(&self) -> Result<(), HvError> {
        self.0.resume().map(|_| ()).map_err(map_err)
    }

    fn undefine(&self) -> Result<(), HvError> {
        self.0.undefine().map(|_| ()).map_err(map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_map_to_daemon_states() {
        assert_eq!(state_from_code(sys::VIR_DOMAIN_RUNNING), VmState::Running);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_PAUSED), VmState::Paused);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_SHUTOFF), VmState::Stopped);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_CRASHED), VmState::Crashed);
        assert_eq!(
            state_from_code(sys::VIR_DOMAIN_PMSUSPENDED),
            VmState::Suspended
        );
        assert_eq!(state_from_code(sys::VIR_DOMAIN_NOSTATE), VmState::NoState);
    }
}
