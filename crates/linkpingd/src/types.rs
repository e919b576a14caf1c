//! Shared event and outcome types
//!
//! Components communicate through these typed values over channels; there is
//! no callback indirection anywhere in the daemon.

use std::net::IpAddr;
use std::time::Duration;

/// Terminal result of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Matching echo reply received after the given round-trip time
    Reply(Duration),
    /// No reply arrived before the per-probe deadline
    TimedOut,
    /// The echo request could not be sent
    SendFailed,
    /// A receive system error occurred on the probe socket
    RecvFailed,
}

impl ProbeResult {
    /// Whether this outcome counts as a lost probe
    #[inline]
    pub fn is_failure(&self) -> bool {
        !matches!(self, ProbeResult::Reply(_))
    }

    /// Round-trip time for successful probes
    #[inline]
    pub fn rtt(&self) -> Option<Duration> {
        match self {
            ProbeResult::Reply(rtt) => Some(*rtt),
            _ => None,
        }
    }
}

/// One resolved probe, delivered to the statistics consumer
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Configured target name (config section)
    pub target: String,
    /// Device the probe session is bound to
    pub device: String,
    /// Resolved destination address
    pub address: IpAddr,
    /// Echo sequence number; 0 for send/receive failures that never
    /// matched a sequence
    pub sequence: u16,
    /// How the probe ended
    pub result: ProbeResult,
}

/// A named interface became up or down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTransition {
    /// Interface name
    pub name: String,
    /// New state
    pub up: bool,
}

impl LinkTransition {
    pub fn up(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: true,
        }
    }

    pub fn down(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: false,
        }
    }
}

/// Control commands delivered to a probe session task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin probing: recreate the socket and arm the periodic timer
    Start,
    /// Suspend probing: disarm timers, abandon outstanding requests
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_is_not_failure() {
        let result = ProbeResult::Reply(Duration::from_millis(12));
        assert!(!result.is_failure());
        assert_eq!(result.rtt(), Some(Duration::from_millis(12)));
    }

    #[test]
    fn test_failures_have_no_rtt() {
        for result in [
            ProbeResult::TimedOut,
            ProbeResult::SendFailed,
            ProbeResult::RecvFailed,
        ] {
            assert!(result.is_failure());
            assert_eq!(result.rtt(), None);
        }
    }

    #[test]
    fn test_transition_constructors() {
        assert_eq!(
            LinkTransition::up("eth0"),
            LinkTransition {
                name: "eth0".to_string(),
                up: true
            }
        );
        assert_eq!(
            LinkTransition::down("eth0"),
            LinkTransition {
                name: "eth0".to_string(),
                up: false
            }
        );
    }
}
