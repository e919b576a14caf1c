//! Per-link liveness daemon
//!
//! linkpingd watches the up/down state of a configured set of network
//! interfaces over the kernel's rtnetlink channel and, while an interface is
//! up, probes a configured address with ICMP echo requests, tracking round
//! trip time and packet loss per target.
//!
//! # Architecture
//!
//! ```text
//! +-----------------+      +----------------------+      +---------------+
//! |  Linux Kernel   |      |      linkpingd       |      |   Operator    |
//! |                 |      |                      |      |               |
//! |  RTM_NEWLINK    |----->|  LinkSocket          |      |  SIGUSR1      |
//! |  RTM_DELLINK    |      |     | link codec     |      |  stats table  |
//! |                 |      |     v                |      |               |
//! |                 |      |  LinkMonitor --------+----->|  SIGHUP       |
//! |                 |      |     | transitions    |      |  clean exit   |
//! |  ICMP echo      |      |     v                |      |  for reload   |
//! |  sockets        |<---->|  ProbeSession(s)     |      |               |
//! |                 |      |     | outcomes       |      |               |
//! |                 |      |     v                |      |               |
//! |                 |      |  StatsRegistry       |      |               |
//! +-----------------+      +----------------------+      +---------------+
//! ```
//!
//! Everything runs on one reactor thread: the link socket, every probe
//! session task and the dispatch loop are multiplexed by a current-thread
//! tokio runtime, so no component state needs locking.

pub mod config;
pub mod echo;
pub mod error;
pub mod ledger;
pub mod link;
pub mod monitor;
pub mod netlink;
pub mod probe;
pub mod reactor;
pub mod stats;
pub mod types;

pub use config::{Config, TargetConfig};
pub use error::{LinkpingError, Result};
pub use ledger::PendingLedger;
pub use link::LinkEvent;
pub use monitor::{DeviceRecord, LinkMonitor};
pub use netlink::LinkSocket;
pub use probe::{ProbeSession, SessionState};
pub use reactor::Reactor;
pub use stats::{StatsRegistry, TargetStats};
pub use types::{LinkTransition, ProbeOutcome, ProbeResult, SessionCommand};
