use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain state as reported by the daemon. Never cached; every read goes
/// back to the hypervisor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VmState {
    NoState,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    Stopped,
    Crashed,
    Suspended,
}

impl VmState {
    /// An active domain is one the daemon has a live process for.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            VmState::Running | VmState::Blocked | VmState::Paused | VmState::ShuttingDown
        )
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::NoState => "no state",
            VmState::Running => "running",
            VmState::Blocked => "blocked",
            VmState::Paused => "paused",
            VmState::ShuttingDown => "shutting down",
            VmState::Stopped => "stopped",
            VmState::Crashed => "crashed",
            VmState::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// Enumeration filter for [`crate::Session::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmFilter {
    Active,
    Inactive,
    All,
}

/// Lifecycle action applied to a named domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAction {
    Start,
    Stop,
    Destroy,
    Suspend,
    Resume,
    Delete,
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmAction::Start => "start",
            VmAction::Stop => "stop",
            VmAction::Destroy => "destroy",
            VmAction::Suspend => "suspend",
            VmAction::Resume => "resume",
            VmAction::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for VmAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(VmAction::Start),
            "stop" => Ok(VmAction::Stop),
            "destroy" => Ok(VmAction::Destroy),
            "suspend" => Ok(VmAction::Suspend),
            "resume" => Ok(VmAction::Resume),
            "delete" => Ok(VmAction::Delete),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// List read-model: one row per domain, structured so callers never have to
/// re-parse a rendered display string to recover the name.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VmSummary {
    pub name: String,
    pub state: VmState,
}

/// Full read-model snapshot for one domain.
///
/// Secondary device inventory (disks and NICs of an already-defined domain)
/// is not included; that would require walking the domain XML.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VmDetail {
    pub name: String,
    pub uuid: String,
    /// Daemon-assigned numeric id, present only while the domain is active.
    pub id: Option<u32>,
    pub state: VmState,
    pub vcpus: u32,
    pub memory_kib: u64,
    pub max_memory_kib: u64,
    pub os_type: String,
    pub autostart: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_through_str() {
        for action in [
            VmAction::Start,
            VmAction::Stop,
            VmAction::Destroy,
            VmAction::Suspend,
            VmAction::Resume,
            VmAction::Delete,
        ] {
            assert_eq!(action.to_string().parse::<VmAction>(), Ok(action));
        }
        assert!("reboot".parse::<VmAction>().is_err());
    }

    #[test]
    fn active_states() {
        assert!(VmState::Running.is_active());
        assert!(VmState::Paused.is_active());
        assert!(!VmState::Stopped.is_active());
        assert!(!VmState::Crashed.is_active());
    }
}
