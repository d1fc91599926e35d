use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::Instrument;

use crate::core::{
    ledger::{LedgerEntry, NotificationLedger},
    proximity::{validate_radius, CrossProductIndex, ProximityIndex},
    MatchError,
};
use crate::models::{HelpRequest, NotificationEvent, PairKey, Volunteer};
use crate::services::{
    DispatchError, DispatchSink, FeedError, HelpRequestFeed, LedgerStore, LedgerStoreError, VolunteerFeed,
};

/// 50 miles
pub const DEFAULT_RADIUS_METERS: f64 = 80_467.0;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(2);

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Idle,
    Evaluating,
}

/// Tunables that do not change between `start` calls
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Radius used by `run_cycle` before the first `start`
    pub radius_meters: f64,
    pub feed_timeout: Duration,
    pub dispatch_timeout: Duration,
    /// Bound on each ledger store load or save
    pub ledger_timeout: Duration,
    /// Forget ledger entries for ids absent from the latest snapshot
    pub prune_retired: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            radius_meters: DEFAULT_RADIUS_METERS,
            feed_timeout: DEFAULT_FEED_TIMEOUT,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            ledger_timeout: DEFAULT_LEDGER_TIMEOUT,
            prune_retired: false,
        }
    }
}

/// Counts for one completed evaluation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub help_requests: usize,
    pub volunteers: usize,
    pub skipped_records: usize,
    pub matches: usize,
    pub dispatched: usize,
    pub already_notified: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// What happened when a cycle was requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was still in flight
    Skipped,
    /// A feed failed or timed out; nothing was evaluated
    FeedUnavailable(String),
    /// Matching refused its input
    Rejected(String),
}

/// Running totals since the engine was built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub feed_failures: u64,
    pub records_skipped: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    cycles_run: AtomicU64,
    cycles_skipped: AtomicU64,
    feed_failures: AtomicU64,
    records_skipped: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    /// Unix millis; 0 means never
    last_cycle_ms: AtomicI64,
}

struct PollTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct EngineInner {
    help_feed: Arc<dyn HelpRequestFeed>,
    volunteer_feed: Arc<dyn VolunteerFeed>,
    sink: Arc<dyn DispatchSink>,
    index: Box<dyn ProximityIndex>,
    ledger_store: Option<Arc<dyn LedgerStore>>,
    config: EngineConfig,
    ledger: Mutex<NotificationLedger>,
    /// Held for the whole of a cycle; `try_lock` failure means overlap
    cycle_gate: Mutex<()>,
    task: Mutex<Option<PollTask>>,
    state: watch::Sender<EngineState>,
    radius_bits: AtomicU64,
    interval_ms: AtomicU64,
    counters: Counters,
}

/// Builder for [`MatchingEngine`]
pub struct EngineBuilder {
    help_feed: Arc<dyn HelpRequestFeed>,
    volunteer_feed: Arc<dyn VolunteerFeed>,
    sink: Arc<dyn DispatchSink>,
    index: Box<dyn ProximityIndex>,
    ledger_store: Option<Arc<dyn LedgerStore>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn index(mut self, index: Box<dyn ProximityIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger_store = Some(store);
        self
    }

    pub fn build(self) -> Result<MatchingEngine, MatchError> {
        validate_radius(self.config.radius_meters)?;

        let (state, _) = watch::channel(EngineState::Stopped);

        Ok(MatchingEngine {
            inner: Arc::new(EngineInner {
                help_feed: self.help_feed,
                volunteer_feed: self.volunteer_feed,
                sink: self.sink,
                index: self.index,
                ledger_store: self.ledger_store,
                config: self.config,
                ledger: Mutex::new(NotificationLedger::new()),
                cycle_gate: Mutex::new(()),
                task: Mutex::new(None),
                state,
                radius_bits: AtomicU64::new(self.config.radius_meters.to_bits()),
                interval_ms: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        })
    }
}

/// Periodic proximity matcher with notify-once dispatch
///
/// Cheap to clone; clones share the same ledger and poll task.
///
/// # Cycle
/// 1. Fetch both feeds in parallel, each bounded by `feed_timeout`
/// 2. Parse records, skipping any with a malformed location
/// 3. Run the proximity index
/// 4. For each pair not in the ledger, dispatch and mark on success
#[derive(Clone)]
pub struct MatchingEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("state", &self.state())
            .field("index", &self.inner.index)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl MatchingEngine {
    pub fn builder(
        help_feed: Arc<dyn HelpRequestFeed>,
        volunteer_feed: Arc<dyn VolunteerFeed>,
        sink: Arc<dyn DispatchSink>,
    ) -> EngineBuilder {
        EngineBuilder {
            help_feed,
            volunteer_feed,
            sink,
            index: Box::new(CrossProductIndex),
            ledger_store: None,
            config: EngineConfig::default(),
        }
    }

    /// Begin polling every `poll_interval` with the given radius
    ///
    /// The first cycle runs immediately. Restores the ledger from the attached
    /// store, if any, before the first cycle.
    pub async fn start(&self, poll_interval: Duration, radius_meters: f64) -> Result<(), MatchError> {
        validate_radius(radius_meters)?;
        if poll_interval.is_zero() {
            return Err(MatchError::InvalidInterval);
        }

        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return Err(MatchError::AlreadyRunning);
        }

        self.inner.radius_bits.store(radius_meters.to_bits(), Ordering::Relaxed);
        self.inner
            .interval_ms
            .store(poll_interval.as_millis() as u64, Ordering::Relaxed);

        self.inner.restore_ledger().await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.inner.state.send_replace(EngineState::Idle);
        let handle = tokio::spawn(poll_loop(Arc::downgrade(&self.inner), poll_interval, shutdown_rx));
        *task = Some(PollTask { shutdown, handle });

        tracing::info!(
            radius_meters,
            poll_interval_secs = poll_interval.as_secs_f64(),
            "Matching engine started"
        );
        Ok(())
    }

    /// Stop polling; an in-flight cycle is allowed to finish
    ///
    /// Returns once the poll task has exited. No-op if not running.
    pub async fn stop(&self) {
        let running = self.inner.task.lock().await.take();
        let Some(task) = running else {
            return;
        };

        let _ = task.shutdown.send(true);
        self.inner.state.send_replace(EngineState::Stopped);

        if let Err(e) = task.handle.await {
            tracing::warn!("Poll task ended abnormally: {}", e);
        }
        tracing::info!("Matching engine stopped");
    }

    /// Run one evaluation cycle now
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.inner.run_cycle().await
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    pub fn radius_meters(&self) -> f64 {
        f64::from_bits(self.inner.radius_bits.load(Ordering::Relaxed))
    }

    /// Interval of the current or most recent run, if ever started
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.inner.interval_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.inner.counters;
        let last_ms = c.last_cycle_ms.load(Ordering::Relaxed);

        EngineStats {
            cycles_run: c.cycles_run.load(Ordering::Relaxed),
            cycles_skipped: c.cycles_skipped.load(Ordering::Relaxed),
            feed_failures: c.feed_failures.load(Ordering::Relaxed),
            records_skipped: c.records_skipped.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            dispatch_failures: c.dispatch_failures.load(Ordering::Relaxed),
            last_cycle_at: (last_ms != 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }

    pub async fn has_notified(&self, pair: &PairKey) -> bool {
        self.inner.ledger.lock().await.has_notified(pair)
    }

    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.inner.ledger.lock().await.entries()
    }

    /// Clear the ledger so every in-range pair is dispatched again
    pub async fn reset_ledger(&self) -> usize {
        let removed = self.inner.modify_ledger(|ledger| ledger.reset()).await;
        tracing::info!(removed, "Ledger reset");
        removed
    }

    pub async fn forget_help_request(&self, help_request_id: &str) -> usize {
        let removed = self
            .inner
            .modify_ledger(|ledger| ledger.forget_help_request(help_request_id))
            .await;
        tracing::info!(help_request_id, removed, "Forgot help request");
        removed
    }

    pub async fn forget_volunteer(&self, volunteer_id: &str) -> usize {
        let removed = self
            .inner
            .modify_ledger(|ledger| ledger.forget_volunteer(volunteer_id))
            .await;
        tracing::info!(volunteer_id, removed, "Forgot volunteer");
        removed
    }
}

async fn poll_loop(engine: Weak<EngineInner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    // Ticks missed while a cycle runs are dropped, not queued
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                inner.run_cycle().await;
            }
        }
    }

    tracing::debug!("Poll loop exited");
}

/// Keep only the last record seen for each id, preserving order
///
/// Returns the survivors and how many earlier duplicates were dropped.
fn last_by_id<T>(records: Vec<T>, id: impl Fn(&T) -> &str) -> (Vec<T>, usize) {
    let last: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, record)| (id(record).to_string(), i))
        .collect();
    let total = records.len();

    let kept: Vec<T> = records
        .into_iter()
        .enumerate()
        .filter(|(i, record)| last.get(id(record)) == Some(i))
        .map(|(_, record)| record)
        .collect();

    let dropped = total - kept.len();
    (kept, dropped)
}

/// Await a feed fetch, folding a timeout into `FeedError`
async fn fetch_with_timeout<T, F>(limit: Duration, fetch: F) -> Result<T, FeedError>
where
    F: Future<Output = Result<T, FeedError>>,
{
    match timeout(limit, fetch).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout(limit)),
    }
}

impl EngineInner {
    async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_gate) = self.cycle_gate.try_lock() else {
            self.counters.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cycle still in flight, skipping");
            return CycleOutcome::Skipped;
        };

        let cycle = self.counters.cycles_run.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.send_if_modified(|state| {
            if *state == EngineState::Idle {
                *state = EngineState::Evaluating;
                true
            } else {
                false
            }
        });

        let outcome = self
            .evaluate(cycle)
            .instrument(tracing::info_span!("cycle", n = cycle))
            .await;

        self.counters
            .last_cycle_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.state.send_if_modified(|state| {
            if *state == EngineState::Evaluating {
                *state = EngineState::Idle;
                true
            } else {
                false
            }
        });

        outcome
    }

    async fn evaluate(&self, cycle: u64) -> CycleOutcome {
        let radius_meters = f64::from_bits(self.radius_bits.load(Ordering::Relaxed));
        let limit = self.config.feed_timeout;

        // Both snapshots or neither
        let (help_result, volunteer_result) = tokio::join!(
            fetch_with_timeout(limit, self.help_feed.fetch_help_requests()),
            fetch_with_timeout(limit, self.volunteer_feed.fetch_volunteers()),
        );

        let (help_records, volunteer_records) = match (help_result, volunteer_result) {
            (Ok(h), Ok(v)) => (h, v),
            (Err(e), _) | (_, Err(e)) => {
                self.counters.feed_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Feed unavailable, skipping cycle");
                return CycleOutcome::FeedUnavailable(e.to_string());
            }
        };

        let fetched_at = Utc::now();
        let mut skipped_records = 0usize;

        let present_requests: HashSet<String> = help_records.iter().map(|r| r.id.clone()).collect();
        let present_volunteers: HashSet<String> = volunteer_records.iter().map(|r| r.id.clone()).collect();

        let help_requests: Vec<HelpRequest> = help_records
            .into_iter()
            .filter_map(|record| {
                let id = record.id.clone();
                match record.into_help_request(fetched_at) {
                    Ok(request) => Some(request),
                    Err(e) => {
                        tracing::warn!(help_request_id = %id, error = %e, "Skipping help request record");
                        skipped_records += 1;
                        None
                    }
                }
            })
            .collect();

        let volunteers: Vec<Volunteer> = volunteer_records
            .into_iter()
            .filter_map(|record| {
                let id = record.id.clone();
                match record.into_volunteer(fetched_at) {
                    Ok(volunteer) => Some(volunteer),
                    Err(e) => {
                        tracing::warn!(volunteer_id = %id, error = %e, "Skipping volunteer record");
                        skipped_records += 1;
                        None
                    }
                }
            })
            .collect();

        self.counters
            .records_skipped
            .fetch_add(skipped_records as u64, Ordering::Relaxed);

        // One record per id, so every match resolves to the record it came from
        let (help_requests, duplicate_requests) = last_by_id(help_requests, |r| r.id.as_str());
        let (volunteers, duplicate_volunteers) = last_by_id(volunteers, |v| v.id.as_str());
        if duplicate_requests + duplicate_volunteers > 0 {
            tracing::warn!(
                duplicate_requests,
                duplicate_volunteers,
                "Snapshot repeats ids, keeping the last record of each"
            );
        }

        let matches = match self.index.find_matches(&help_requests, &volunteers, radius_meters) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!(error = %e, "Proximity index rejected input");
                return CycleOutcome::Rejected(e.to_string());
            }
        };

        let requests_by_id: HashMap<&str, &HelpRequest> =
            help_requests.iter().map(|r| (r.id.as_str(), r)).collect();
        let volunteers_by_id: HashMap<&str, &Volunteer> =
            volunteers.iter().map(|v| (v.id.as_str(), v)).collect();

        let mut report = CycleReport {
            cycle,
            help_requests: help_requests.len(),
            volunteers: volunteers.len(),
            skipped_records,
            matches: matches.len(),
            ..CycleReport::default()
        };

        // Check, dispatch and mark under one lock so operator resets and
        // forgets cannot interleave with a pair's check-and-mark
        let mut ledger = self.ledger.lock().await;

        if self.config.prune_retired {
            report.pruned = ledger.retain_present(
                |id| present_requests.contains(id),
                |id| present_volunteers.contains(id),
            );
        }

        for proximity_match in matches {
            let pair = proximity_match.pair();
            if ledger.has_notified(&pair) {
                report.already_notified += 1;
                continue;
            }

            let (Some(request), Some(volunteer)) = (
                requests_by_id.get(pair.help_request_id.as_str()),
                volunteers_by_id.get(pair.volunteer_id.as_str()),
            ) else {
                continue;
            };

            let event = NotificationEvent::new(proximity_match, request, volunteer);
            let delivery = match timeout(self.config.dispatch_timeout, self.sink.notify(&event)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(self.config.dispatch_timeout)),
            };

            match delivery {
                Ok(()) => {
                    ledger.mark_notified(pair);
                    report.dispatched += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        volunteer_id = %pair.volunteer_id,
                        help_request_id = %pair.help_request_id,
                        error = %e,
                        "Dispatch failed, will retry next cycle"
                    );
                }
            }
        }

        // Saved under the ledger lock so saves land in the order of changes
        if report.dispatched > 0 || report.pruned > 0 {
            self.persist(&ledger.pairs()).await;
        }
        drop(ledger);

        self.counters
            .dispatched
            .fetch_add(report.dispatched as u64, Ordering::Relaxed);
        self.counters
            .dispatch_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        tracing::debug!(
            help_requests = report.help_requests,
            volunteers = report.volunteers,
            matches = report.matches,
            dispatched = report.dispatched,
            already_notified = report.already_notified,
            failed = report.failed,
            "Cycle complete"
        );

        CycleOutcome::Completed(report)
    }

    async fn modify_ledger<F>(&self, change: F) -> usize
    where
        F: FnOnce(&mut NotificationLedger) -> usize,
    {
        let mut ledger = self.ledger.lock().await;
        let removed = change(&mut ledger);
        if removed > 0 {
            self.persist(&ledger.pairs()).await;
        }
        removed
    }

    async fn restore_ledger(&self) {
        let Some(store) = &self.ledger_store else {
            return;
        };

        let limit = self.config.ledger_timeout;
        let loaded = match timeout(limit, store.load()).await {
            Ok(result) => result,
            Err(_) => Err(LedgerStoreError::Timeout(limit)),
        };

        match loaded {
            Ok(pairs) => {
                let count = pairs.len();
                self.ledger.lock().await.extend(pairs);
                tracing::info!("Restored {} ledger entries", count);
            }
            Err(e) => tracing::warn!("Failed to restore ledger, starting empty: {}", e),
        }
    }

    async fn persist(&self, pairs: &[PairKey]) {
        let Some(store) = &self.ledger_store else {
            return;
        };

        let limit = self.config.ledger_timeout;
        let saved = match timeout(limit, store.save(pairs)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerStoreError::Timeout(limit)),
        };
        if let Err(e) = saved {
            tracing::warn!("Failed to persist ledger: {}", e);
        }
    }
}
