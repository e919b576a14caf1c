//! Link state monitoring
//!
//! Maintains the registry of interfaces the kernel currently reports as up
//! and turns decoded link notifications into up/down transition events. The
//! registry is owned by the monitor instance - nothing in the daemon keeps
//! process-global interface state.

use crate::link::LinkEvent;
use crate::types::LinkTransition;
use std::collections::HashMap;
use tracing::{debug, trace};

/// One interface known to the kernel
///
/// The interface index is the durable key; the name is metadata the kernel
/// may change without touching the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub index: u32,
    pub name: String,
    pub up: bool,
}

/// Registry of up interfaces with transition diffing
#[derive(Debug, Default)]
pub struct LinkMonitor {
    devices: HashMap<u32, DeviceRecord>,
}

impl LinkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded notification and return the transitions it caused
    ///
    /// Down interfaces are not retained: a notification with the up flag
    /// cleared removes the record just like an explicit delete. A rename of
    /// an up interface reports the old name down and the new name up, since
    /// sessions are bound by name.
    pub fn apply(&mut self, event: &LinkEvent) -> Vec<LinkTransition> {
        match event {
            LinkEvent::Changed { index, name, up: true } => {
                match self.devices.get_mut(index) {
                    Some(record) if record.name == *name => {
                        // already known up, nothing flipped
                        trace!(index, name = %name, "link update without state change");
                        Vec::new()
                    }
                    Some(record) => {
                        let old = std::mem::replace(&mut record.name, name.clone());
                        debug!(index, old = %old, new = %name, "interface renamed");
                        vec![LinkTransition::down(old), LinkTransition::up(name.clone())]
                    }
                    None => {
                        self.devices.insert(
                            *index,
                            DeviceRecord {
                                index: *index,
                                name: name.clone(),
                                up: true,
                            },
                        );
                        debug!(index, name = %name, "interface up");
                        vec![LinkTransition::up(name.clone())]
                    }
                }
            }
            LinkEvent::Changed { index, name, up: false } => {
                match self.devices.remove(index) {
                    Some(record) => {
                        debug!(index, name = %record.name, "interface down");
                        vec![LinkTransition::down(record.name)]
                    }
                    None => {
                        trace!(index, name = %name, "down notification for unknown interface");
                        Vec::new()
                    }
                }
            }
            LinkEvent::Removed { index } => match self.devices.remove(index) {
                Some(record) => {
                    debug!(index, name = %record.name, "interface deleted");
                    vec![LinkTransition::down(record.name)]
                }
                None => Vec::new(),
            },
        }
    }

    /// Whether a named interface is currently up
    pub fn is_up(&self, name: &str) -> bool {
        self.devices.values().any(|d| d.name == name && d.up)
    }

    /// Number of interfaces currently tracked as up
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(index: u32, name: &str, up: bool) -> LinkEvent {
        LinkEvent::Changed {
            index,
            name: name.to_string(),
            up,
        }
    }

    #[test]
    fn test_new_up_interface_raises_up() {
        let mut monitor = LinkMonitor::new();
        let transitions = monitor.apply(&changed(3, "eth0", true));
        assert_eq!(transitions, vec![LinkTransition::up("eth0")]);
        assert!(monitor.is_up("eth0"));
    }

    #[test]
    fn test_up_then_flag_cleared() {
        // eth0 up at index 3, later index 3 reports the up flag cleared
        let mut monitor = LinkMonitor::new();
        assert_eq!(
            monitor.apply(&changed(3, "eth0", true)),
            vec![LinkTransition::up("eth0")]
        );
        assert_eq!(
            monitor.apply(&changed(3, "eth0", false)),
            vec![LinkTransition::down("eth0")]
        );
        assert!(!monitor.is_up("eth0"));
        assert_eq!(monitor.device_count(), 0);
    }

    #[test]
    fn test_repeated_up_is_silent() {
        let mut monitor = LinkMonitor::new();
        monitor.apply(&changed(3, "eth0", true));
        assert!(monitor.apply(&changed(3, "eth0", true)).is_empty());
        assert_eq!(monitor.device_count(), 1);
    }

    #[test]
    fn test_down_interface_not_retained() {
        let mut monitor = LinkMonitor::new();
        assert!(monitor.apply(&changed(4, "eth1", false)).is_empty());
        assert!(!monitor.is_up("eth1"));
        assert_eq!(monitor.device_count(), 0);
    }

    #[test]
    fn test_delete_raises_down() {
        let mut monitor = LinkMonitor::new();
        monitor.apply(&changed(5, "wan0", true));
        assert_eq!(
            monitor.apply(&LinkEvent::Removed { index: 5 }),
            vec![LinkTransition::down("wan0")]
        );
    }

    #[test]
    fn test_delete_unknown_is_silent() {
        let mut monitor = LinkMonitor::new();
        assert!(monitor.apply(&LinkEvent::Removed { index: 99 }).is_empty());
    }

    #[test]
    fn test_rename_reports_both_names() {
        let mut monitor = LinkMonitor::new();
        monitor.apply(&changed(7, "eth0", true));
        let transitions = monitor.apply(&changed(7, "lan0", true));
        assert_eq!(
            transitions,
            vec![LinkTransition::down("eth0"), LinkTransition::up("lan0")]
        );
        assert!(!monitor.is_up("eth0"));
        assert!(monitor.is_up("lan0"));
        assert_eq!(monitor.device_count(), 1);
    }

    #[test]
    fn test_dump_retains_only_up_interfaces() {
        // eth0(up), eth1(down), lo(up) as a dump would deliver them
        let mut monitor = LinkMonitor::new();
        monitor.apply(&changed(2, "eth0", true));
        monitor.apply(&changed(3, "eth1", false));
        monitor.apply(&changed(1, "lo", true));

        assert!(monitor.is_up("eth0"));
        assert!(monitor.is_up("lo"));
        assert!(!monitor.is_up("eth1"));
        assert_eq!(monitor.device_count(), 2);
    }
}
