//! In-memory hypervisor used by the session tests and by embedders that
//! want to exercise presentation code without a libvirt daemon.
//!
//! Mock daemons are registered under a URI, the same way real daemons are
//! addressed, so [`Hypervisor::open`] can find them. Each test should use
//! its own URI.

use crate::hypervisor::{DomainHandle, HvError, Hypervisor};
use crate::types::{VmFilter, VmState};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Mutex<MockState>>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<Mutex<MockState>>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone)]
struct MockDomainState {
    uuid: String,
    state: VmState,
    id: Option<u32>,
    vcpus: u32,
    memory_kib: u64,
    max_memory_kib: u64,
    os_type: String,
    autostart: bool,
}

#[derive(Debug, Default)]
struct MockState {
    domains: BTreeMap<String, MockDomainState>,
    next_id: u32,
    fail_open: bool,
    fail_version: bool,
    fail_close: bool,
    open_calls: usize,
    version_calls: usize,
    list_calls: usize,
    lookup_calls: usize,
    define_calls: usize,
    undefine_calls: usize,
}

/// Test-side view of a registered mock daemon. Keeps the shared state alive
/// and readable after a session has taken its own handle.
#[derive(Debug)]
pub struct MockDaemon {
    uri: String,
    state: Arc<Mutex<MockState>>,
}

impl MockDaemon {
    /// Register an empty daemon under `uri`, replacing any previous one.
    pub fn register(uri: &str) -> Self {
        let state = Arc::new(Mutex::new(MockState {
            next_id: 1,
            ..MockState::default()
        }));
        registry()
            .lock()
            .unwrap()
            .insert(uri.to_string(), state.clone());
        Self {
            uri: uri.to_string(),
            state,
        }
    }

    pub fn add_domain(&self, name: &str, state: VmState) {
        let mut inner = self.state.lock().unwrap();
        let id = if state.is_active() {
            let id = inner.next_id;
            inner.next_id += 1;
            Some(id)
        } else {
            None
        };
        inner.domains.insert(
            name.to_string(),
            MockDomainState {
                uuid: uuid::Uuid::new_v4().to_string(),
                state,
                id,
                vcpus: 1,
                memory_kib: 1024 * 1024,
                max_memory_kib: 1024 * 1024,
                os_type: "hvm".to_string(),
                autostart: false,
            },
        );
    }

    /// Make every subsequent `open` fail, simulating an unreachable daemon.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    /// Make the liveness probe fail, simulating a daemon restart or socket
    /// drop underneath a connected session.
    pub fn set_fail_version(&self, fail: bool) {
        self.state.lock().unwrap().fail_version = fail;
    }

    /// Make `close` report a fault. The façade must still drop its handle.
    pub fn set_fail_close(&self, fail: bool) {
        self.state.lock().unwrap().fail_close = fail;
    }

    pub fn domain_state(&self, name: &str) -> Option<VmState> {
        self.state.lock().unwrap().domains.get(name).map(|d| d.state)
    }

    pub fn open_calls(&self) -> usize {
        self.state.lock().unwrap().open_calls
    }

    pub fn version_calls(&self) -> usize {
        self.state.lock().unwrap().version_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn lookup_calls(&self) -> usize {
        self.state.lock().unwrap().lookup_calls
    }

    pub fn define_calls(&self) -> usize {
        self.state.lock().unwrap().define_calls
    }

    pub fn undefine_calls(&self) -> usize {
        self.state.lock().unwrap().undefine_calls
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        registry().lock().unwrap().remove(&self.uri);
    }
}

/// Connection handle to a registered [`MockDaemon`].
#[derive(Debug)]
pub struct MockHypervisor {
    state: Arc<Mutex<MockState>>,
}

impl Hypervisor for MockHypervisor {
    type Domain = MockDomain;

    fn open(uri: &str) -> Result<Self, HvError> {
        let state = registry()
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| HvError::Disconnected(format!("no daemon at '{uri}'")))?;

        let mut inner = state.lock().unwrap();
        inner.open_calls += 1;
        if inner.fail_open {
            return Err(HvError::Disconnected("connection refused".to_string()));
        }
        drop(inner);

        Ok(Self { state })
    }

    fn version(&self) -> Result<u64, HvError> {
        let mut inner = self.state.lock().unwrap();
        inner.version_calls += 1;
        if inner.fail_version {
            Err(HvError::Disconnected("daemon went away".to_string()))
        } else {
            Ok(10_002_000)
        }
    }

    fn close(&mut self) -> Result<(), HvError> {
        if self.state.lock().unwrap().fail_close {
            Err(HvError::Fault("close failed".to_string()))
        } else {
            Ok(())
        }
    }

    fn list_domains(&self, filter: VmFilter) -> Result<Vec<MockDomain>, HvError> {
        let mut inner = self.state.lock().unwrap();
        inner.list_calls += 1;
        let names: Vec<String> = inner
            .domains
            .iter()
            .filter(|(_, d)| match filter {
                VmFilter::Active => d.state.is_active(),
                VmFilter::Inactive => !d.state.is_active(),
                VmFilter::All => true,
            })
            .map(|(name, _)| name.clone())
            .collect();
        drop(inner);

        Ok(names
            .into_iter()
            .map(|name| MockDomain {
                name,
                state: self.state.clone(),
            })
            .collect())
    }

    fn lookup_by_name(&self, name: &str) -> Result<MockDomain, HvError> {
        let mut inner = self.state.lock().unwrap();
        inner.lookup_calls += 1;
        if !inner.domains.contains_key(name) {
            return Err(HvError::NoSuchDomain);
        }
        drop(inner);

        Ok(MockDomain {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }

    fn define_domain(&self, xml: &str) -> Result<MockDomain, HvError> {
        let def = parse_definition(xml)?;
        let mut inner = self.state.lock().unwrap();
        inner.define_calls += 1;
        inner.domains.insert(
            def.name.clone(),
            MockDomainState {
                uuid: def.uuid,
                state: VmState::Stopped,
                id: None,
                vcpus: def.vcpus,
                memory_kib: def.memory_kib,
                max_memory_kib: def.memory_kib,
                os_type: "hvm".to_string(),
                autostart: false,
            },
        );
        drop(inner);

        Ok(MockDomain {
            name: def.name,
            state: self.state.clone(),
        })
    }
}

/// A resolved mock domain. Reads go back to the daemon table every time, so
/// a handle held across an undefine reports `NoSuchDomain` like the real
/// thing.
#[derive(Debug)]
pub struct MockDomain {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockDomain {
    fn read<T>(&self, f: impl FnOnce(&MockDomainState) -> T) -> Result<T, HvError> {
        let inner = self.state.lock().unwrap();
        inner
            .domains
            .get(&self.name)
            .map(f)
            .ok_or(HvError::NoSuchDomain)
    }

    fn transition(
        &self,
        f: impl FnOnce(&mut MockState, &mut MockDomainState) -> Result<(), HvError>,
    ) -> Result<(), HvError> {
        let mut inner = self.state.lock().unwrap();
        let mut domain = inner
            .domains
            .get(&self.name)
            .cloned()
            .ok_or(HvError::NoSuchDomain)?;
        f(&mut inner, &mut domain)?;
        inner.domains.insert(self.name.clone(), domain);
        Ok(())
    }
}

impl DomainHandle for MockDomain {
    fn name(&self) -> Result<String, HvError> {
        Ok(self.name.clone())
    }

    fn id(&self) -> Option<u32> {
        self.read(|d| d.id).ok().flatten()
    }

    fn uuid(&self) -> Result<String, HvError> {
        self.read(|d| d.uuid.clone())
    }

    fn state(&self) -> Result<VmState, HvError> {
        self.read(|d| d.state)
    }

    fn vcpus(&self) -> Result<u32, HvError> {
        self.read(|d| d.vcpus)
    }

    fn memory_kib(&self) -> Result<u64, HvError> {
        self.read(|d| d.memory_kib)
    }

    fn max_memory_kib(&self) -> Result<u64, HvError> {
        self.read(|d| d.max_memory_kib)
    }

    fn os_type(&self) -> Result<String, HvError> {
        self.read(|d| d.os_type.clone())
    }

    fn autostart(&self) -> Result<bool, HvError> {
        self.read(|d| d.autostart)
    }

    fn start(&self) -> Result<(), HvError> {
        self.transition(|state, d| match d.state {
            VmState::Stopped | VmState::Crashed | VmState::NoState => {
                d.state = VmState::Running;
                d.id = Some(state.next_id);
                state.next_id += 1;
                Ok(())
            }
            _ => Err(HvError::Fault("domain is already active".to_string())),
        })
    }

    fn shutdown(&self) -> Result<(), HvError> {
        self.transition(|_, d| {
            if d.state == VmState::Running {
                // The real daemon only signals the guest; the mock collapses
                // the asynchronous shutdown into an immediate one.
                d.state = VmState::Stopped;
                d.id = None;
                Ok(())
            } else {
                Err(HvError::Fault("domain is not running".to_string()))
            }
        })
    }

    fn destroy(&self) -> Result<(), HvError> {
        self.transition(|_, d| {
            if d.state.is_active() {
                d.state = VmState::Stopped;
                d.id = None;
                Ok(())
            } else {
                Err(HvError::Fault("domain is not running".to_string()))
            }
        })
    }

    fn suspend(&self) -> Result<(), HvError> {
        self.transition(|_, d| {
            if d.state == VmState::Running {
                d.state = VmState::Paused;
                Ok(())
            } else {
                Err(HvError::Fault("domain is not running".to_string()))
            }
        })
    }

    fn resume(&self) -> Result<(), HvError> {
        self.transition(|_, d| {
            if d.state == VmState::Paused {
                d.state = VmState::Running;
                Ok(())
            } else {
                Err(HvError::Fault("domain is not paused".to_string()))
            }
        })
    }

    fn undefine(&self) -> Result<(), HvError> {
        let mut inner = self.state.lock().unwrap();
        inner.undefine_calls += 1;
        let domain = inner
            .domains
            .get(&self.name)
            .ok_or(HvError::NoSuchDomain)?;
        if domain.state.is_active() {
            return Err(HvError::Fault(
                "cannot undefine an active domain".to_string(),
            ));
        }
        inner.domains.remove(&self.name);
        Ok(())
    }
}

struct ParsedDefinition {
    name: String,
    uuid: String,
    vcpus: u32,
    memory_kib: u64,
}

/// Pull the identity fields back out of domain XML, so defining through the
/// mock exercises the real descriptor serialization.
fn parse_definition(xml: &str) -> Result<ParsedDefinition, HvError> {
    let mut reader = Reader::from_str(xml);
    let mut current = Vec::new();
    let mut depth = 0usize;

    let mut name = None;
    let mut uuid = None;
    let mut vcpus = None;
    let mut memory_kib = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                current = e.name().as_ref().to_vec();
            }
            Ok(Event::End(_)) => {
                depth -= 1;
                current.clear();
            }
            // Only top-level <name>/<uuid>/<vcpu>/<memory> identify the
            // domain; devices may nest elements with the same tags.
            Ok(Event::Text(t)) if depth == 2 => {
                let text = t
                    .unescape()
                    .map_err(|e| HvError::Fault(format!("bad domain XML: {e}")))?;
                match current.as_slice() {
                    b"name" => name = Some(text.into_owned()),
                    b"uuid" => uuid = Some(text.into_owned()),
                    b"vcpu" => vcpus = text.parse().ok(),
                    b"memory" => memory_kib = text.parse().ok(),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(HvError::Fault(format!("bad domain XML: {e}"))),
        }
    }

    Ok(ParsedDefinition {
        name: name.ok_or_else(|| HvError::Fault("domain XML has no name".to_string()))?,
        uuid: uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        vcpus: vcpus.ok_or_else(|| HvError::Fault("domain XML has no vcpu count".to_string()))?,
        memory_kib: memory_kib
            .ok_or_else(|| HvError::Fault("domain XML has no memory size".to_string()))?,
    })
}
