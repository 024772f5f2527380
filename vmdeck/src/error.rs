use crate::types::VmState;
use thiserror::Error;

/// Failure to open a connection to the hypervisor daemon.
#[derive(Debug, Error)]
#[error("couldn't connect to the hypervisor at '{uri}': {reason}")]
pub struct ConnectionError {
    pub uri: String,
    pub reason: String,
}

/// Outcome of a lifecycle action on a named domain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The daemon has no domain with this name. Also returned when the
    /// session is not connected; see [`crate::Session::resolve`].
    #[error("domain '{0}' not found")]
    NotFound(String),

    /// The action's precondition is violated on our side; the daemon was
    /// never asked.
    #[error("domain '{name}' is {state}; {action} requires an inactive domain")]
    InvalidState {
        name: String,
        state: VmState,
        action: &'static str,
    },

    /// Any other daemon-reported failure.
    #[error("hypervisor fault: {0}")]
    DaemonFault(String),
}

/// Outcome of registering a new domain definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefineError {
    #[error("not connected to a hypervisor")]
    NotConnected,

    #[error("hypervisor fault: {0}")]
    DaemonFault(String),
}
