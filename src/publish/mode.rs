//! Publish modes
//!
//! Decide when intermediate results leave the aggregator.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How often intermediate results are published
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishMode {
    /// Every aggregation cycle
    #[default]
    Simple,
    /// At most once per interval
    Interval { interval_secs: u64 },
}

impl PublishMode {
    pub fn gate(&self) -> PublishGate {
        PublishGate {
            mode: self.clone(),
            last: None,
        }
    }
}

/// Stateful check used by the aggregator each cycle
#[derive(Debug)]
pub struct PublishGate {
    mode: PublishMode,
    last: Option<Instant>,
}

impl PublishGate {
    pub fn should_publish(&mut self, now: Instant) -> bool {
        match &self.mode {
            PublishMode::Simple => true,
            PublishMode::Interval { interval_secs } => {
                let interval = Duration::from_secs(*interval_secs);
                match self.last {
                    Some(last) if now.duration_since(last) < interval => false,
                    _ => {
                        self.last = Some(now);
                        true
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_always_publishes() {
        let mut gate = PublishMode::Simple.gate();
        let now = Instant::now();
        assert!(gate.should_publish(now));
        assert!(gate.should_publish(now));
    }

    #[test]
    fn test_interval_throttles() {
        let mut gate = PublishMode::Interval { interval_secs: 10 }.gate();
        let start = Instant::now();

        assert!(gate.should_publish(start));
        assert!(!gate.should_publish(start + Duration::from_secs(3)));
        assert!(gate.should_publish(start + Duration::from_secs(10)));
        assert!(!gate.should_publish(start + Duration::from_secs(15)));
    }

    #[test]
    fn test_mode_from_yaml() {
        let mode: PublishMode = serde_yaml::from_str("type: interval\ninterval_secs: 5\n").unwrap();
        assert_eq!(mode, PublishMode::Interval { interval_secs: 5 });
    }
}
