//! Deferred pause after a fixed duration.

use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Durations offered by the sleep timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPreset {
    Minutes15,
    Minutes30,
    Minutes45,
    Hour,
}

impl SleepPreset {
    pub const ALL: [SleepPreset; 4] = [
        SleepPreset::Minutes15,
        SleepPreset::Minutes30,
        SleepPreset::Minutes45,
        SleepPreset::Hour,
    ];

    pub fn minutes(&self) -> u64 {
        match self {
            SleepPreset::Minutes15 => 15,
            SleepPreset::Minutes30 => 30,
            SleepPreset::Minutes45 => 45,
            SleepPreset::Hour => 60,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.minutes() * 60)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SleepPreset::Minutes15 => "15m",
            SleepPreset::Minutes30 => "30m",
            SleepPreset::Minutes45 => "45m",
            SleepPreset::Hour => "1h",
        }
    }

    pub fn from_minutes(minutes: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.minutes() == minutes)
    }
}

/// Single countdown that fires once at zero. Starting a new countdown
/// cancels the previous one; dropping the timer cancels it too.
///
/// Every start and cancel moves the ticket on. `on_expire` receives the
/// ticket of its countdown so a late delivery can be checked with
/// [`SleepTimer::is_current`].
#[derive(Default)]
pub struct SleepTimer {
    task: Option<JoinHandle<()>>,
    remaining: Arc<AtomicU64>,
    ticket: u64,
}

impl SleepTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_preset<F>(&mut self, preset: SleepPreset, on_expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.start(preset.duration(), on_expire);
    }

    /// Count down in whole seconds, then call `on_expire`. Must be called
    /// from within a tokio runtime.
    pub fn start<F>(&mut self, duration: Duration, on_expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.ticket += 1;
        let ticket = self.ticket;

        let seconds = duration.as_secs().max(1);
        let remaining = Arc::new(AtomicU64::new(seconds));
        self.remaining = remaining.clone();
        info!("Sleep timer set for {}", format_clock(seconds));

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                let left = remaining.load(Ordering::SeqCst).saturating_sub(1);
                remaining.store(left, Ordering::SeqCst);
                if left == 0 {
                    break;
                }
            }

            info!("Sleep timer expired");
            on_expire(ticket);
        }));
    }

    /// Clear the countdown. Nothing fires afterwards.
    pub fn cancel(&mut self) {
        self.ticket += 1;
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Sleep timer cancelled");
        }
        self.remaining.store(0, Ordering::SeqCst);
    }

    /// Whether an expiry carrying `ticket` belongs to the latest countdown
    pub fn is_current(&self, ticket: u64) -> bool {
        self.task.is_some() && self.ticket == ticket
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn remaining(&self) -> Option<Duration> {
        if !self.is_active() {
            return None;
        }
        Some(Duration::from_secs(self.remaining.load(Ordering::SeqCst)))
    }

    /// Countdown as `m:ss`
    pub fn format_remaining(&self) -> Option<String> {
        self.remaining().map(|d| format_clock(d.as_secs()))
    }
}

impl Drop for SleepTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
