//! Throughput, ETA and batch percentage derived from byte counters.

use serde::Serialize;
use std::time::Duration;

/// Below this, speed is too noisy to report.
pub const MIN_ELAPSED_FOR_RATE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetrics {
    pub bytes_per_sec: f64,
    pub eta: Option<Duration>,
    /// 0..=100, rounded
    pub percent: u8,
}

impl TransferMetrics {
    /// `completed` covers finished files, `in_flight` the current file's bytes.
    pub fn compute(completed: u64, in_flight: u64, total: u64, elapsed: Duration) -> Self {
        let processed = completed.saturating_add(in_flight);
        let percent = if total > 0 {
            ((processed as f64 / total as f64) * 100.0).round().min(100.0) as u8
        } else {
            0
        };

        if elapsed < MIN_ELAPSED_FOR_RATE {
            return Self {
                bytes_per_sec: 0.0,
                eta: None,
                percent,
            };
        }

        let secs = elapsed.as_secs_f64();
        let bytes_per_sec = processed as f64 / secs;
        let eta = if bytes_per_sec > 0.0 {
            let remaining = total as f64 / bytes_per_sec - secs;
            Some(Duration::from_secs_f64(remaining.max(0.0)))
        } else {
            None
        };

        Self {
            bytes_per_sec,
            eta,
            percent,
        }
    }
}

pub fn format_size(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes <= 0.0 {
        return "0 B".to_string();
    }
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// `mm:ss`, or `h:mm:ss` past an hour.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}
