//! Role scheduler: time-shares the radio between central and peripheral.
//!
//! A single commodity radio cannot always scan and advertise at once, so every node
//! alternates on a fixed period and any two nodes eventually overlap in compatible
//! roles long enough to link up.

use std::fmt;
use std::time::Duration;

/// Active radio role. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Scanning and connecting.
    Central,
    /// Advertising and accepting connections.
    Peripheral,
}

impl Role {
    pub fn opposite(self) -> Self {
        match self {
            Role::Central => Role::Peripheral,
            Role::Peripheral => Role::Central,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Central => f.write_str("central"),
            Role::Peripheral => f.write_str("peripheral"),
        }
    }
}

/// One role change: stop `from`'s radio function, start `to`'s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSwitch {
    pub from: Role,
    pub to: Role,
}

/// Tracks the intended role. The flag flips on every tick whether or not the radio
/// accepted the switch.
#[derive(Debug, Clone)]
pub struct RoleScheduler {
    role: Role,
    interval: Duration,
    ticks: u64,
}

impl RoleScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            role: Role::Central,
            interval,
            ticks: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick(&mut self) -> RoleSwitch {
        let from = self.role;
        self.role = from.opposite();
        self.ticks = self.ticks.saturating_add(1);
        RoleSwitch { from, to: self.role }
    }

    /// Back to the initial state (used when a node is restarted).
    pub fn reset(&mut self) {
        self.role = Role::Central;
        self.ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_central() {
        let s = RoleScheduler::new(Duration::from_millis(5000));
        assert_eq!(s.role(), Role::Central);
        assert_eq!(s.interval(), Duration::from_millis(5000));
    }

    #[test]
    fn tick_reports_switch() {
        let mut s = RoleScheduler::new(Duration::from_secs(5));
        assert_eq!(
            s.tick(),
            RoleSwitch {
                from: Role::Central,
                to: Role::Peripheral
            }
        );
        assert_eq!(
            s.tick(),
            RoleSwitch {
                from: Role::Peripheral,
                to: Role::Central
            }
        );
    }

    #[test]
    fn alternates_by_parity() {
        for k in 0..9u64 {
            let mut s = RoleScheduler::new(Duration::from_secs(5));
            for _ in 0..k {
                s.tick();
            }
            let expected = if k % 2 == 0 {
                Role::Central
            } else {
                Role::Peripheral
            };
            assert_eq!(s.role(), expected, "after {} ticks", k);
            assert_eq!(s.ticks(), k);
        }
    }

    #[test]
    fn reset_returns_to_central() {
        let mut s = RoleScheduler::new(Duration::from_secs(5));
        s.tick();
        s.reset();
        assert_eq!(s.role(), Role::Central);
        assert_eq!(s.ticks(), 0);
    }
}
