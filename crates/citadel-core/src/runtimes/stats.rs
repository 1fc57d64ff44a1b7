use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Cumulative counters for one runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub execution_count: u64,
    pub error_count: u64,
    pub total_duration: Duration,
    pub average_duration: Duration,
}

/// Stats shared across concurrent calls of a runtime.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<RuntimeStats>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, elapsed: Duration, succeeded: bool) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        stats.execution_count += 1;
        if !succeeded {
            stats.error_count += 1;
        }
        stats.total_duration += elapsed;
        let average = stats.total_duration.as_nanos() / u128::from(stats.execution_count);
        stats.average_duration = Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX));
    }

    pub fn snapshot(&self) -> RuntimeStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_updates_average() {
        let recorder = StatsRecorder::new();
        recorder.record(Duration::from_millis(100), true);
        recorder.record(Duration::from_millis(300), false);

        let stats = recorder.snapshot();
        assert_eq!(stats.execution_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.total_duration, Duration::from_millis(400));
        assert_eq!(stats.average_duration, Duration::from_millis(200));
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let recorder = Arc::new(StatsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        recorder.record(Duration::from_millis(1), i % 2 == 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = recorder.snapshot();
        assert_eq!(stats.execution_count, 2000);
        assert_eq!(stats.error_count, 1000);
        assert_eq!(stats.total_duration, Duration::from_secs(2));
    }
}
