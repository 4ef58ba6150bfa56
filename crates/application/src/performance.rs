//! Rolling acquisition performance metrics.
//!
//! Every executed group operation is recorded per device; summaries expose
//! totals, success rate, timing, throughput and how much the batching
//! planner saved compared to one read per register.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Bounded per-device history length.
const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSample {
    pub group: String,
    pub duration_s: f64,
    pub word_count: u16,
    pub register_count: usize,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DeviceStats {
    history: VecDeque<PerformanceSample>,
    total_operations: u64,
    successful_operations: u64,
    total_duration_s: f64,
    total_words: u64,
    /// Registers that would each have needed one read without batching.
    registers_polled: u64,
    groups_issued: u64,
    last_operation: Option<DateTime<Utc>>,
}

impl DeviceStats {
    fn record(&mut self, sample: PerformanceSample) {
        self.total_operations += 1;
        if sample.success {
            self.successful_operations += 1;
        }
        self.total_duration_s += sample.duration_s;
        self.total_words += sample.word_count as u64;
        self.registers_polled += sample.register_count as u64;
        self.groups_issued += 1;
        self.last_operation = Some(sample.timestamp);
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    fn merge_into(&self, out: &mut DeviceStats) {
        out.total_operations += self.total_operations;
        out.successful_operations += self.successful_operations;
        out.total_duration_s += self.total_duration_s;
        out.total_words += self.total_words;
        out.registers_polled += self.registers_polled;
        out.groups_issued += self.groups_issued;
        out.last_operation = match (out.last_operation, self.last_operation) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    fn summary(&self) -> PerformanceSummary {
        let ops = self.total_operations;
        PerformanceSummary {
            total_operations: ops,
            success_rate: if ops == 0 {
                0.0
            } else {
                self.successful_operations as f64 / ops as f64 * 100.0
            },
            average_duration_s: if ops == 0 {
                0.0
            } else {
                self.total_duration_s / ops as f64
            },
            average_throughput_wps: if self.total_duration_s > 0.0 {
                self.total_words as f64 / self.total_duration_s
            } else {
                0.0
            },
            last_operation: self.last_operation,
            optimization_efficiency: if self.registers_polled == 0 {
                0.0
            } else {
                1.0 - self.groups_issued as f64 / self.registers_polled as f64
            },
        }
    }
}

/// Aggregated view for one device, or globally across all of them.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_operations: u64,
    /// Percentage of operations that succeeded.
    pub success_rate: f64,
    pub average_duration_s: f64,
    /// Words per second across all reads.
    pub average_throughput_wps: f64,
    pub last_operation: Option<DateTime<Utc>>,
    /// 1 - (groups issued / registers that would need one read each).
    pub optimization_efficiency: f64,
}

#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    devices: Mutex<HashMap<String, DeviceStats>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        device: &str,
        group: &str,
        duration: Duration,
        word_count: u16,
        register_count: usize,
        success: bool,
    ) {
        let sample = PerformanceSample {
            group: group.to_string(),
            duration_s: duration.as_secs_f64(),
            word_count,
            register_count,
            success,
            timestamp: Utc::now(),
        };
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.entry(device.to_string()).or_default().record(sample);
    }

    /// Summary for one device, or across all devices when None.
    pub fn summary(&self, device: Option<&str>) -> PerformanceSummary {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        match device {
            Some(id) => devices
                .get(id)
                .map(DeviceStats::summary)
                .unwrap_or_else(|| DeviceStats::default().summary()),
            None => {
                let mut combined = DeviceStats::default();
                for stats in devices.values() {
                    stats.merge_into(&mut combined);
                }
                combined.summary()
            }
        }
    }

    /// Most recent operations for diagnostics, newest last.
    pub fn recent_operations(&self, device: &str, limit: usize) -> Vec<PerformanceSample> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices
            .get(device)
            .map(|s| {
                s.history
                    .iter()
                    .rev()
                    .take(limit)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn reset(&self, device: Option<&str>) {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        match device {
            Some(id) => {
                devices.remove(id);
            }
            None => devices.clear(),
        }
    }
}
