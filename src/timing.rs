//! Named wall-clock intervals for profiling a run.
//!
//! Channels are flat, not nested: starting a channel that is already open
//! moves its start marker. A channel can be started and stopped any number of
//! times; each stop appends one [`TimingRecord`].

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WorkflowError};

/// One completed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub channel: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Duration in seconds.
    pub delta: f64,
}

#[derive(Debug, Default)]
pub struct TimeLogger {
    open: HashMap<String, DateTime<Utc>>,
    log: Vec<TimingRecord>,
}

impl TimeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, channel: impl Into<String>) {
        let channel = channel.into();
        debug!(channel = %channel, "timer start");
        self.open.insert(channel, Utc::now());
    }

    /// Close `channel` and append its interval to the log.
    pub fn stop(&mut self, channel: &str) -> Result<&TimingRecord> {
        let start_time = self
            .open
            .remove(channel)
            .ok_or_else(|| WorkflowError::ChannelNotStarted(channel.to_string()))?;
        Ok(self.close(channel.to_string(), start_time))
    }

    /// Close every open channel. Order is unspecified.
    pub fn stop_all(&mut self) {
        let open: Vec<_> = self.open.drain().collect();
        for (channel, start_time) in open {
            self.close(channel, start_time);
        }
    }

    fn close(&mut self, channel: String, start_time: DateTime<Utc>) -> &TimingRecord {
        let end_time = Utc::now();
        let delta = (end_time - start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        debug!(channel = %channel, delta, "timer stop");
        self.log.push(TimingRecord {
            channel,
            start_time,
            end_time,
            delta,
        });
        &self.log[self.log.len() - 1]
    }

    /// Start marker of a channel that is currently open.
    pub fn started_at(&self, channel: &str) -> Option<DateTime<Utc>> {
        self.open.get(channel).copied()
    }

    pub fn is_open(&self, channel: &str) -> bool {
        self.open.contains_key(channel)
    }

    /// Every completed interval in the order it was stopped.
    pub fn report(&self) -> &[TimingRecord] {
        &self.log
    }

    /// Durations of the completed intervals for one channel, in log order.
    pub fn delta(&self, channel: &str) -> Vec<f64> {
        self.log
            .iter()
            .filter(|record| record.channel == channel)
            .map(|record| record.delta)
            .collect()
    }

    /// Write the interval log as pretty JSON, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.log)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), records = self.log.len(), "saved timing profile");
        Ok(())
    }
}
