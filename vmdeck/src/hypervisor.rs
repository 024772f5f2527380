//! The seam between the session façade and a concrete hypervisor daemon.
//!
//! [`crate::libvirt::Libvirt`] is the production implementation;
//! [`crate::mock::MockHypervisor`] backs the tests.

use crate::types::{VmFilter, VmState};
use thiserror::Error;

/// Low-level daemon error, classified just enough for the façade to decide
/// what to do with its handle and how to log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HvError {
    /// No domain with the requested name. Expected, not exceptional.
    #[error("no such domain")]
    NoSuchDomain,

    /// The connection itself is broken; the caller must drop its handle.
    #[error("hypervisor connection broken: {0}")]
    Disconnected(String),

    /// Anything else the daemon reports.
    #[error("{0}")]
    Fault(String),
}

impl HvError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, HvError::Disconnected(_))
    }
}

/// One open connection to a hypervisor management daemon.
pub trait Hypervisor: Sized {
    type Domain: DomainHandle;

    /// Open a connection to the daemon at `uri`.
    fn open(uri: &str) -> Result<Self, HvError>;

    /// Lightweight liveness probe; the daemon version fetch. A failure here
    /// means the handle is dead.
    fn version(&self) -> Result<u64, HvError>;

    /// Close the connection. The handle must not be used afterwards even if
    /// this fails.
    fn close(&mut self) -> Result<(), HvError>;

    /// Enumerate domains matching `filter`.
    fn list_domains(&self, filter: VmFilter) -> Result<Vec<Self::Domain>, HvError>;

    /// Resolve one domain by its unique name.
    fn lookup_by_name(&self, name: &str) -> Result<Self::Domain, HvError>;

    /// Register a persistent domain definition without starting it.
    fn define_domain(&self, xml: &str) -> Result<Self::Domain, HvError>;
}

/// A handle to one domain, valid only as long as the connection that
/// produced it. Every read goes to the daemon; nothing is cached here.
pub trait DomainHandle {
    fn name(&self) -> Result<String, HvError>;
    /// Daemon-assigned id, present only while active.
    fn id(&self) -> Option<u32>;
    fn uuid(&self) -> Result<String, HvError>;
    fn state(&self) -> Result<VmState, HvError>;
    fn vcpus(&self) -> Result<u32, HvError>;
    fn memory_kib(&self) -> Result<u64, HvError>;
    fn max_memory_kib(&self) -> Result<u64, HvError>;
    fn os_type(&self) -> Result<String, HvError>;
    fn autostart(&self) -> Result<bool, HvError>;

    /// Boot a defined, inactive domain.
    fn start(&self) -> Result<(), HvError>;
    /// Ask the guest OS to shut down; returns once the request is accepted,
    /// not once the domain is off.
    fn shutdown(&self) -> Result<(), HvError>;
    /// Immediate forced power-off.
    fn destroy(&self) -> Result<(), HvError>;
    fn suspend(&self) -> Result<(), HvError>;
    fn resume(&self) -> Result<(), HvError>;
    /// Remove the persistent definition from the daemon.
    fn undefine(&self) -> Result<(), HvError>;
}
