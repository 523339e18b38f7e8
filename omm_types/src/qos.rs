use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// How current the data is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeliness {
    Realtime,
    /// Delayed by the given number of seconds
    Delayed(u32),
    DelayedUnknown,
}

impl Timeliness {
    /// Lower is better
    fn rank(self) -> u64 {
        match self {
            Timeliness::Realtime => 0,
            Timeliness::Delayed(secs) => 1 + secs as u64,
            Timeliness::DelayedUnknown => u64::MAX,
        }
    }
}

/// How often updates are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    TickByTick,
    /// Conflated into fixed windows of the given number of milliseconds
    TimeConflated(u32),
    JitConflated,
}

impl Rate {
    /// Lower is better
    fn rank(self) -> u64 {
        match self {
            Rate::TickByTick => 0,
            Rate::TimeConflated(ms) => 1 + ms as u64,
            Rate::JitConflated => u64::MAX,
        }
    }
}

/// Quality of service pair offered by a service or constrained by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qos {
    pub timeliness: Timeliness,
    pub rate: Rate,
}

impl Qos {
    pub const REALTIME_TICK_BY_TICK: Self = Qos { timeliness: Timeliness::Realtime, rate: Rate::TickByTick };

    pub const fn new(timeliness: Timeliness, rate: Rate) -> Self {
        Self { timeliness, rate }
    }

    /// Checks whether a service offering satisfies this requested QoS
    ///
    /// An empty offering means the service only provides realtime tick-by-tick data.
    /// With range support the request only has to fall between the best and worst offered QoS.
    pub fn is_satisfied_by(&self, offered: &[Qos], supports_range: bool) -> bool {
        if offered.is_empty() {
            return *self == Qos::default();
        }

        if !supports_range {
            return offered.contains(self);
        }

        let best_timeliness = offered.iter().map(|q| q.timeliness.rank()).min().unwrap_or(0);
        let worst_timeliness = offered.iter().map(|q| q.timeliness.rank()).max().unwrap_or(0);
        let best_rate = offered.iter().map(|q| q.rate.rank()).min().unwrap_or(0);
        let worst_rate = offered.iter().map(|q| q.rate.rank()).max().unwrap_or(0);

        let timeliness = self.timeliness.rank();
        let rate = self.rate.rank();
        (best_timeliness..=worst_timeliness).contains(&timeliness) && (best_rate..=worst_rate).contains(&rate)
    }
}

impl Default for Qos {
    fn default() -> Self {
        Self::REALTIME_TICK_BY_TICK
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timeliness = match self.timeliness {
            Timeliness::Realtime => "RealTime".to_string(),
            Timeliness::Delayed(secs) => format!("Timeliness: {secs}"),
            Timeliness::DelayedUnknown => "InexactDelayed".to_string(),
        };
        let rate = match self.rate {
            Rate::TickByTick => "TickByTick".to_string(),
            Rate::TimeConflated(ms) => format!("Rate: {ms}"),
            Rate::JitConflated => "JustInTimeConflated".to_string(),
        };
        write!(f, "{timeliness}/{rate}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAYED: Qos = Qos::new(Timeliness::Delayed(900), Rate::TickByTick);
    const CONFLATED: Qos = Qos::new(Timeliness::Realtime, Rate::TimeConflated(1000));

    #[test]
    fn test_default_is_realtime_tick_by_tick() {
        assert_eq!(Qos::default(), Qos::REALTIME_TICK_BY_TICK);
        assert_eq!(Qos::default().to_string(), "RealTime/TickByTick");
    }

    #[test]
    fn test_empty_offering_means_default() {
        assert!(Qos::default().is_satisfied_by(&[], false));
        assert!(!DELAYED.is_satisfied_by(&[], true));
    }

    #[test]
    fn test_exact_match_without_range() {
        let offered = [Qos::default(), DELAYED];
        assert!(DELAYED.is_satisfied_by(&offered, false));
        assert!(!CONFLATED.is_satisfied_by(&offered, false));
    }

    #[test]
    fn test_range_support() {
        let offered = [Qos::default(), Qos::new(Timeliness::Delayed(1800), Rate::TimeConflated(5000))];
        assert!(CONFLATED.is_satisfied_by(&offered, true));
        assert!(DELAYED.is_satisfied_by(&offered, true));
        assert!(!Qos::new(Timeliness::DelayedUnknown, Rate::TickByTick).is_satisfied_by(&offered, true));
    }
}
