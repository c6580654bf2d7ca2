// src/watcher.rs

use crate::day_folder::{Clock, DayCheck, WatchTarget, day_label};
use crate::pipeline::Pipeline;
use crate::processed::ProcessedSet;
use crate::readiness::ReadinessProber;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, info, warn};

/// Event from a subscription, tagged with the subscription's generation.
type Tagged = (u64, notify::Result<Event>);

/// Tunables for the watch loop.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub ready_poll: Duration,
    pub ready_timeout: Duration,
    pub day_recheck: Duration,
    pub tick: Duration,
    pub scan_existing: bool,
}

impl From<&crate::config::WatchConfig> for WatchSettings {
    fn from(cfg: &crate::config::WatchConfig) -> Self {
        Self {
            ready_poll: cfg.ready_poll(),
            ready_timeout: cfg.ready_timeout(),
            day_recheck: cfg.day_recheck(),
            tick: cfg.tick(),
            scan_existing: cfg.scan_existing,
        }
    }
}

/// A live non-recursive subscription on one day folder.
struct Subscription {
    watcher: RecommendedWatcher,
    path: PathBuf,
}

/// Case-insensitive `.pdf` name check.
pub fn is_pdf(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(".pdf"))
        .unwrap_or(false)
}

/// The path a file arrived at, for creation and move-into-folder events.
pub fn arrival_path(event: &Event) -> Option<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => None,
        EventKind::Create(_) => event.paths.first().cloned(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.first().cloned(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.get(1).cloned(),
        // platforms that can't tell source from destination
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.last().filter(|p| p.exists()).cloned()
        }
        _ => None,
    }
}

/// Watches the current day folder and runs the pipeline for each new PDF,
/// one file at a time.
pub struct ArrivalWatcher {
    target: WatchTarget,
    processed: ProcessedSet,
    prober: ReadinessProber,
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
    settings: WatchSettings,
    subscription: Option<Subscription>,
    generation: u64,
    events_tx: UnboundedSender<Tagged>,
    events_rx: UnboundedReceiver<Tagged>,
}

impl ArrivalWatcher {
    pub fn new(
        base_path: PathBuf,
        settings: WatchSettings,
        pipeline: Pipeline,
        processed: ProcessedSet,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let target = WatchTarget::new(base_path, clock.today(), Instant::now(), settings.day_recheck);
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            target,
            processed,
            prober: ReadinessProber::new(settings.ready_poll, settings.ready_timeout),
            pipeline,
            clock,
            settings,
            subscription: None,
            generation: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn current_day_path(&self) -> &Path {
        self.target.current_day_path()
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    #[cfg(test)]
    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// Subscribe to the current day folder. Returns false (and stays pending)
    /// if the folder is missing or the subscription can't be created.
    pub async fn start_monitoring(&mut self) -> bool {
        let path = self.target.current_day_path().to_path_buf();
        if !path.is_dir() {
            warn!(
                folder = %path.display(),
                "Current day folder does not exist. Waiting for it to be created..."
            );
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        let tx = self.events_tx.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send((generation, res));
        });
        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                error!(folder = %path.display(), error = %e, "Could not create filesystem watcher");
                return false;
            }
        };
        if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            error!(folder = %path.display(), error = %e, "Could not watch day folder");
            return false;
        }

        info!(folder = %path.display(), generation, "Started monitoring");
        self.subscription = Some(Subscription {
            watcher,
            path: path.clone(),
        });

        if self.settings.scan_existing {
            self.scan_existing(&path).await;
        }
        true
    }

    pub fn stop_monitoring(&mut self) {
        if let Some(mut sub) = self.subscription.take() {
            if let Err(e) = sub.watcher.unwatch(&sub.path) {
                debug!(folder = %sub.path.display(), error = %e, "Unwatch failed");
            }
            info!(folder = %sub.path.display(), "Stopped monitoring");
        }
    }

    /// PDFs already sitting in a freshly activated folder.
    async fn scan_existing(&mut self, folder: &Path) {
        let entries = match std::fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(folder = %folder.display(), error = %e, "Could not list day folder");
                return;
            }
        };
        let mut existing: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && is_pdf(p))
            .collect();
        existing.sort();

        if !existing.is_empty() {
            info!(folder = %folder.display(), count = existing.len(), "Found existing PDFs");
        }
        for path in existing {
            self.handle_arrival(path).await;
        }
    }

    /// Recheck the day folder and roll over if a new one is available.
    pub async fn check_for_new_day(&mut self, now: Instant) {
        let today = self.clock.today();
        match self.target.check(now, today, self.is_active()) {
            DayCheck::NotDue | DayCheck::Unchanged => {}
            DayCheck::Waiting(path) => {
                debug!(folder = %path.display(), "Day folder not present yet");
            }
            DayCheck::Rollover(new_path) => {
                info!(
                    base = %self.target.base_path().display(),
                    folder = %new_path.display(),
                    "New day folder detected"
                );
                if !self.processed.is_empty() {
                    info!(cleared = self.processed.len(), "Clearing processed files for new day");
                }
                self.stop_monitoring();
                self.processed.clear();
                self.target.apply_rollover(new_path);
                self.start_monitoring().await;
            }
        }
    }

    async fn handle_event(&mut self, generation: u64, res: notify::Result<Event>) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Dropping event from old subscription");
            return;
        }
        match res {
            Ok(event) => {
                if let Some(path) = arrival_path(&event) {
                    self.handle_arrival(path).await;
                }
            }
            Err(e) => warn!(error = %e, "Filesystem watch error"),
        }
    }

    /// Readiness -> dedupe -> pipeline for one arrived path.
    pub async fn handle_arrival(&mut self, path: PathBuf) {
        if !is_pdf(&path) || path.is_dir() {
            return;
        }

        if !self.prober.wait_until_ready(&path).await.is_ready() {
            return;
        }

        let day = day_label(self.clock.today());
        if !self.processed.claim(&path, &day) {
            debug!(file = %path.display(), "Already processed; ignoring event");
            return;
        }
        info!(file = %path.display(), processed = self.processed.len(), "New PDF detected");

        match self.pipeline.process(&path).await {
            Ok(report) => info!(
                file = %path.display(),
                document_id = %report.document_id,
                card_code = %report.invoice.card_code,
                forwarded = report.forwarded.is_ok(),
                persisted = report.ledger.is_ok(),
                "Finished processing"
            ),
            Err(e) => error!(file = %path.display(), error = %e, "Skipping file"),
        }
    }

    /// Drive the watch loop until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if !self.start_monitoring().await {
            info!(
                folder = %self.current_day_path().display(),
                "Waiting for today's folder; monitoring starts automatically when it appears"
            );
        }

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                // ahead of events so a busy folder can't starve the day check
                _ = ticker.tick() => {
                    self.check_for_new_day(Instant::now()).await;
                }
                Some((generation, res)) = self.events_rx.recv() => {
                    self.handle_event(generation, res).await;
                }
            }
        }

        self.stop_monitoring();
    }
}
