//! Aggregated timings for relay listeners and lifecycle hooks.
//!
//! Keys used by the framework:
//!
//! | Key | Measured |
//! |-----|----------|
//! | `event:<name>` | one relay listener invocation |
//! | `load-plugin:<hook>:<plugin>` | one lifecycle hook run |

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Aggregate for one profiler key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilerDataPoint {
    pub total: Duration,
    pub count: u64,
    pub max: Duration,
}

impl ProfilerDataPoint {
    pub fn average(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }
}

#[derive(Debug, Default)]
pub struct Profiler {
    data: Mutex<HashMap<String, ProfilerDataPoint>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data_point(&self, key: impl Into<String>, elapsed: Duration) {
        let mut data = self.data.lock();
        let point = data.entry(key.into()).or_default();
        point.total += elapsed;
        point.count += 1;
        point.max = point.max.max(elapsed);
    }

    pub fn get(&self, key: &str) -> Option<ProfilerDataPoint> {
        self.data.lock().get(key).copied()
    }

    /// Snapshot of every key.
    pub fn data_points(&self) -> HashMap<String, ProfilerDataPoint> {
        self.data.lock().clone()
    }

    pub fn reset(&self) {
        self.data.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregates_per_key() {
        let profiler = Profiler::new();
        profiler.add_data_point("event:messageCreate", Duration::from_millis(10));
        profiler.add_data_point("event:messageCreate", Duration::from_millis(30));
        profiler.add_data_point("event:ready", Duration::from_millis(1));

        let point = profiler.get("event:messageCreate").unwrap();
        assert_eq!(point.count, 2);
        assert_eq!(point.total, Duration::from_millis(40));
        assert_eq!(point.max, Duration::from_millis(30));
        assert_eq!(point.average(), Duration::from_millis(20));
        assert_eq!(profiler.data_points().len(), 2);

        profiler.reset();
        assert!(profiler.get("event:ready").is_none());
    }
}
