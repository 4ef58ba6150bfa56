//! Per-register failure tracking with log suppression.
//!
//! A register that keeps failing must not flood the log: the first failure
//! is reported at full severity, repeats inside the suppression window are
//! only counted, and once the window lapses the next failure is reported
//! again together with the suppressed count. A successful read clears the
//! record.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use domain::DomainError;
use tracing::{debug, warn};

/// State kept per failing (device, register) pair.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: String,
    pub first_seen: DateTime<Utc>,
    pub last_logged: DateTime<Utc>,
    pub occurrences_since_log: u64,
}

/// What the tracker decided to do with one failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    /// New failure: logged at full severity (debug for optional registers).
    First,
    /// Inside the window: counted, per-occurrence detail at debug only.
    Suppressed,
    /// Window lapsed: logged again, carrying the suppressed count.
    Reported { suppressed: u64 },
}

#[derive(Debug)]
pub struct ErrorTracker {
    records: DashMap<(String, String), ErrorRecord>,
    window: Duration,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::with_window(Duration::hours(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            records: DashMap::new(),
            window,
        }
    }

    /// Record a failed read and emit the appropriate log line.
    pub fn record_failure(
        &self,
        device: &str,
        unique_id: &str,
        error: &DomainError,
        optional: bool,
    ) -> LogDecision {
        self.record_failure_at(device, unique_id, error, optional, Utc::now())
    }

    /// Clock-injected variant so the window logic is testable.
    pub fn record_failure_at(
        &self,
        device: &str,
        unique_id: &str,
        error: &DomainError,
        optional: bool,
        now: DateTime<Utc>,
    ) -> LogDecision {
        let key = (device.to_string(), unique_id.to_string());
        let decision = match self.records.get_mut(&key) {
            None => {
                self.records.insert(
                    key,
                    ErrorRecord {
                        kind: error.to_string(),
                        first_seen: now,
                        last_logged: now,
                        occurrences_since_log: 0,
                    },
                );
                LogDecision::First
            }
            Some(mut record) => {
                if now - record.last_logged >= self.window {
                    let suppressed = record.occurrences_since_log;
                    record.kind = error.to_string();
                    record.last_logged = now;
                    record.occurrences_since_log = 0;
                    LogDecision::Reported { suppressed }
                } else {
                    record.occurrences_since_log += 1;
                    LogDecision::Suppressed
                }
            }
        };

        match decision {
            LogDecision::First => {
                if optional {
                    debug!(device_id = %device, register = %unique_id, "Optional register read failed: {error}");
                } else {
                    warn!(device_id = %device, register = %unique_id, "Register read failed: {error}");
                }
            }
            LogDecision::Suppressed => {
                debug!(device_id = %device, register = %unique_id, "Register still failing: {error}");
            }
            LogDecision::Reported { suppressed } => {
                if optional {
                    debug!(device_id = %device, register = %unique_id, suppressed, "Optional register still failing: {error}");
                } else {
                    warn!(device_id = %device, register = %unique_id, suppressed, "Register still failing ({suppressed} occurrences since last report): {error}");
                }
            }
        }
        decision
    }

    /// A successful read resets the register's record.
    pub fn record_success(&self, device: &str, unique_id: &str) {
        self.records
            .remove(&(device.to_string(), unique_id.to_string()));
    }

    pub fn get(&self, device: &str, unique_id: &str) -> Option<ErrorRecord> {
        self.records
            .get(&(device.to_string(), unique_id.to_string()))
            .map(|r| r.clone())
    }

    /// Number of registers currently failing on a device.
    pub fn failing_count(&self, device: &str) -> usize {
        self.records.iter().filter(|e| e.key().0 == device).count()
    }

    pub fn clear_device(&self, device: &str) {
        self.records.retain(|key, _| key.0 != device);
    }
}
