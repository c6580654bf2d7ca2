// src/day_folder.rs

use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Source of "today" for folder rotation and ledger dating.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

pub fn day_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `base_path/<YYYY-MM-DD>` for the given date.
pub fn resolve(base_path: &Path, date: NaiveDate) -> PathBuf {
    base_path.join(day_label(date))
}

/// What a recheck decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayCheck {
    /// Recheck interval has not elapsed yet.
    NotDue,
    /// Rechecked; nothing to do.
    Unchanged,
    /// The resolved folder differs but does not exist on disk yet.
    Waiting(PathBuf),
    /// Switch the watch to this folder.
    Rollover(PathBuf),
}

/// The folder currently being watched, plus when it was last recomputed.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    base_path: PathBuf,
    current_day_path: PathBuf,
    day_computed_at: Instant,
    recheck_interval: Duration,
}

impl WatchTarget {
    pub fn new(base_path: PathBuf, today: NaiveDate, now: Instant, recheck_interval: Duration) -> Self {
        let current_day_path = resolve(&base_path, today);
        Self {
            base_path,
            current_day_path,
            day_computed_at: now,
            recheck_interval,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn current_day_path(&self) -> &Path {
        &self.current_day_path
    }

    /// Decide whether the watch should move. `active` is false while the
    /// watcher is pending (no live subscription), in which case the current
    /// folder is activated as soon as it exists.
    pub fn check(&mut self, now: Instant, today: NaiveDate, active: bool) -> DayCheck {
        if now.saturating_duration_since(self.day_computed_at) < self.recheck_interval {
            return DayCheck::NotDue;
        }
        self.day_computed_at = now;

        let resolved = resolve(&self.base_path, today);
        if resolved == self.current_day_path && active {
            return DayCheck::Unchanged;
        }
        if !resolved.is_dir() {
            return DayCheck::Waiting(resolved);
        }
        DayCheck::Rollover(resolved)
    }

    pub fn apply_rollover(&mut self, new_path: PathBuf) {
        self.current_day_path = new_path;
    }
}
