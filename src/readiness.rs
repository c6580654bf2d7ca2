// src/readiness.rs

use std::path::Path;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Outcome of waiting for a file to finish being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Two consecutive size reads matched.
    Ready { size: u64, checks: u32 },
    /// The file disappeared (or became unreadable) while polling.
    Vanished,
    /// The size kept changing until the timeout elapsed.
    TimedOut { checks: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Polls a file's size until it stops changing.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProber {
    interval: Duration,
    timeout: Duration,
}

impl ReadinessProber {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub async fn wait_until_ready(&self, path: &Path) -> Readiness {
        let readiness = self
            .probe(|| std::fs::metadata(path).map(|m| m.len()))
            .await;
        match &readiness {
            Readiness::Ready { size, checks } => {
                debug!(file = %path.display(), size, checks, "File is stable");
            }
            Readiness::Vanished => {
                debug!(file = %path.display(), "File vanished while waiting for it to settle");
            }
            Readiness::TimedOut { checks } => {
                warn!(
                    file = %path.display(),
                    checks,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Timeout waiting for file to be ready"
                );
            }
        }
        readiness
    }

    /// Core polling loop over any size source. A read error counts as the
    /// file having vanished.
    pub async fn probe<F>(&self, mut size_of: F) -> Readiness
    where
        F: FnMut() -> std::io::Result<u64>,
    {
        let start = Instant::now();
        let mut last_size: Option<u64> = None;
        let mut checks = 0u32;

        while start.elapsed() < self.timeout {
            let Ok(current) = size_of() else {
                return Readiness::Vanished;
            };
            checks += 1;
            if last_size == Some(current) {
                return Readiness::Ready {
                    size: current,
                    checks,
                };
            }
            last_size = Some(current);
            sleep(self.interval).await;
        }

        Readiness::TimedOut { checks }
    }
}
