//! Refresh orchestrator: decides whether a refresh is due and drives it.

use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use super::hooks::{NoopHooks, RefreshHooks};
use super::progress::{percent, ProgressChannel, ProgressEvent};
use crate::cache::{
  get_last_refresh_date, set_last_refresh_date, FetchOutcome, PersistentStore, VersionedFetcher,
};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::origin::Origin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
  Idle,
  Checking,
  Refreshing,
}

/// Per-file results of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
  pub updated: Vec<String>,
  pub unchanged: Vec<String>,
  pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
  /// A full manifest cycle ran.
  Refreshed(RefreshReport),
  /// Already refreshed today; nothing fetched.
  AlreadyCurrent,
  /// Another cycle is in flight; this call did nothing.
  AlreadyRunning,
}

/// Runs the once-per-day manifest refresh.
///
/// Files are processed strictly in manifest order so progress percentages
/// are monotonic. Only one cycle runs at a time.
pub struct RefreshOrchestrator {
  store: Arc<dyn PersistentStore>,
  fetcher: VersionedFetcher,
  manifest: Vec<String>,
  bonus_file: Option<String>,
  progress: ProgressChannel,
  hooks: Arc<dyn RefreshHooks>,
  clock: Arc<dyn Clock>,
  state: Mutex<RefreshState>,
  in_flight: AtomicBool,
}

impl RefreshOrchestrator {
  pub fn new(
    store: Arc<dyn PersistentStore>,
    origin: Arc<dyn Origin>,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      fetcher: VersionedFetcher::new(store.clone(), origin),
      store,
      manifest,
      bonus_file: None,
      progress: ProgressChannel::new(),
      hooks: Arc::new(NoopHooks),
      clock: Arc::new(SystemClock),
      state: Mutex::new(RefreshState::Idle),
      in_flight: AtomicBool::new(false),
    }
  }

  pub fn with_hooks(mut self, hooks: Arc<dyn RefreshHooks>) -> Self {
    self.hooks = hooks;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
    self.progress = progress;
    self
  }

  /// File whose update triggers the bonus-entry hook.
  pub fn with_bonus_file(mut self, file: impl Into<String>) -> Self {
    self.bonus_file = Some(file.into());
    self
  }

  pub fn progress(&self) -> &ProgressChannel {
    &self.progress
  }

  pub fn state(&self) -> RefreshState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  fn set_state(&self, next: RefreshState) {
    if let Ok(mut state) = self.state.lock() {
      *state = next;
    }
  }

  fn try_begin(&self) -> Option<InFlight<'_>> {
    self
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| InFlight(self))
  }

  /// Refresh the whole manifest if the last refresh was before today.
  ///
  /// A missing refresh date is the bootstrap case and always refreshes.
  /// Errors reading or writing the date abort the cycle; the next call
  /// retries through the same staleness check.
  pub async fn check_and_refresh(&self) -> Result<RefreshOutcome> {
    let Some(_guard) = self.try_begin() else {
      info!("Refresh already in progress");
      return Ok(RefreshOutcome::AlreadyRunning);
    };

    self.set_state(RefreshState::Checking);

    let last = get_last_refresh_date(self.store.as_ref()).map_err(|e| {
      error!("Error in check_and_refresh: {}", e);
      e
    })?;
    let today = self.clock.now().date_naive();

    let due = match last {
      None => {
        info!("No previous cache date found. Performing initial cache.");
        true
      }
      Some(last) if last.date_naive() < today => {
        info!(last = %last.date_naive(), %today, "New day detected. Refreshing cache.");
        true
      }
      Some(_) => false,
    };

    if !due {
      info!("Cache is up to date for today");
      return Ok(RefreshOutcome::AlreadyCurrent);
    }

    let report = self.run_cycle().await?;
    Ok(RefreshOutcome::Refreshed(report))
  }

  /// Refresh the whole manifest regardless of the last refresh date.
  pub async fn update_cache(&self) -> Result<RefreshOutcome> {
    let Some(_guard) = self.try_begin() else {
      info!("Refresh already in progress");
      return Ok(RefreshOutcome::AlreadyRunning);
    };
    let report = self.run_cycle().await?;
    Ok(RefreshOutcome::Refreshed(report))
  }

  async fn run_cycle(&self) -> Result<RefreshReport> {
    self.set_state(RefreshState::Refreshing);
    let _updating = UpdatingFlag::raise(self.hooks.as_ref());
    info!(files = self.manifest.len(), "Starting cache update");

    let total = self.manifest.len();
    let mut report = RefreshReport::default();

    for (index, file_key) in self.manifest.iter().enumerate() {
      match self.fetcher.fetch_and_store(file_key).await {
        Ok(FetchOutcome::Updated { .. }) => {
          if self.bonus_file.as_deref() == Some(file_key.as_str())
            && !self.hooks.is_bonus_entry_inserted()
          {
            self.hooks.insert_bonus_entry();
          }
          report.updated.push(file_key.clone());
        }
        Ok(FetchOutcome::NotModified) => report.unchanged.push(file_key.clone()),
        Err(e) => {
          warn!(file_key = %file_key, "Skipping file: {}", e);
          report.failed.push(file_key.clone());
        }
      }

      self.progress.emit(ProgressEvent::Progress {
        percent: percent(index + 1, total),
      });
    }

    set_last_refresh_date(self.store.as_ref(), self.clock.now()).map_err(|e| {
      error!("Failed to record refresh date: {}", e);
      e
    })?;

    let summary = json!({
      "event": "refresh",
      "at": self.clock.now().to_rfc3339(),
      "updated": report.updated,
      "unchanged": report.unchanged,
      "failed": report.failed,
    });
    if let Err(e) = self.store.append_log(&summary) {
      warn!("Failed to store log entry: {}", e);
    }

    self.progress.emit(ProgressEvent::Complete);
    info!(
      updated = report.updated.len(),
      unchanged = report.unchanged.len(),
      failed = report.failed.len(),
      "Cache update completed"
    );

    Ok(report)
  }
}

/// Holds the in-flight slot; releases it and returns to `Idle` on drop.
struct InFlight<'a>(&'a RefreshOrchestrator);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.set_state(RefreshState::Idle);
    self.0.in_flight.store(false, Ordering::Release);
  }
}

/// Keeps the "updating" flag raised for the length of a cycle, however it ends.
struct UpdatingFlag<'a>(&'a dyn RefreshHooks);

impl<'a> UpdatingFlag<'a> {
  fn raise(hooks: &'a dyn RefreshHooks) -> Self {
    hooks.set_updating(true);
    hooks.update_status_icon();
    Self(hooks)
  }
}

impl Drop for UpdatingFlag<'_> {
  fn drop(&mut self) {
    self.0.set_updating(false);
    self.0.update_status_icon();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::RecordingStore;
  use crate::cache::{LogEntry, SqliteStore, StoreWrite, Table};
  use crate::clock::FixedClock;
  use crate::error::CacheError;
  use crate::origin::testing::FakeOrigin;
  use crate::origin::{FetchRequest, FetchResponse};
  use async_trait::async_trait;
  use chrono::{Duration, Local, TimeZone};
  use serde_json::Value;
  use tokio::sync::Notify;
  use url::Url;

  fn noon() -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
  }

  fn manifest() -> Vec<String> {
    vec!["a.json".into(), "b.json".into(), "c.json".into()]
  }

  fn serve_all(origin: &FakeOrigin) {
    origin.serve("json/a.json", "[1]", Some("\"a1\""));
    origin.serve("json/b.json", "[2]", Some("\"b1\""));
    origin.serve("json/c.json", "[3]", Some("\"c1\""));
  }

  #[derive(Default)]
  struct RecordingHooks {
    updating: Mutex<Vec<bool>>,
    bonus: Mutex<usize>,
  }

  impl RefreshHooks for RecordingHooks {
    fn set_updating(&self, updating: bool) {
      self.updating.lock().unwrap().push(updating);
    }

    fn is_bonus_entry_inserted(&self) -> bool {
      *self.bonus.lock().unwrap() > 0
    }

    fn insert_bonus_entry(&self) {
      *self.bonus.lock().unwrap() += 1;
    }
  }

  #[tokio::test]
  async fn test_bootstrap_refreshes_whole_manifest() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let origin = Arc::new(FakeOrigin::new());
    serve_all(&origin);
    let orchestrator = RefreshOrchestrator::new(store.clone(), origin.clone(), manifest())
      .with_clock(Arc::new(FixedClock::new(noon())));

    let outcome = orchestrator.check_and_refresh().await.unwrap();

    match outcome {
      RefreshOutcome::Refreshed(report) => assert_eq!(report.updated, manifest()),
      other => panic!("expected refresh, got {:?}", other),
    }
    assert_eq!(get_last_refresh_date(store.as_ref()).unwrap(), Some(noon()));
    assert_eq!(orchestrator.state(), RefreshState::Idle);
  }

  #[tokio::test]
  async fn test_same_day_second_check_fetches_nothing() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let origin = Arc::new(FakeOrigin::new());
    serve_all(&origin);
    let clock = Arc::new(FixedClock::new(noon()));
    let orchestrator =
      RefreshOrchestrator::new(store, origin.clone(), manifest()).with_clock(clock.clone());

    orchestrator.check_and_refresh().await.unwrap();
    assert_eq!(origin.requests().len(), 3);

    clock.advance(Duration::hours(11));
    let outcome = orchestrator.check_and_refresh().await.unwrap();

    assert_eq!(outcome, RefreshOutcome::AlreadyCurrent);
    assert_eq!(origin.requests().len(), 3);
  }

  #[tokio::test]
  async fn test_next_day_refreshes_with_conditional_requests() {
    let store = Arc::new(RecordingStore::new());
    let origin = Arc::new(FakeOrigin::new());
    serve_all(&origin);
    let clock = Arc::new(FixedClock::new(noon()));
    let orchestrator =
      RefreshOrchestrator::new(store.clone(), origin.clone(), manifest()).with_clock(clock.clone());

    orchestrator.check_and_refresh().await.unwrap();
    store.reset();
    clock.advance(Duration::hours(13));

    let outcome = orchestrator.check_and_refresh().await.unwrap();

    match outcome {
      RefreshOutcome::Refreshed(report) => assert_eq!(report.unchanged, manifest()),
      other => panic!("expected refresh, got {:?}", other),
    }
    // Only the refresh date moved
    assert_eq!(
      store.writes(),
      vec![(Table::Meta, crate::cache::LAST_REFRESH_KEY.to_string())]
    );
  }

  #[tokio::test]
  async fn test_progress_events_survive_failed_file() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let origin = Arc::new(FakeOrigin::new());
    serve_all(&origin);
    origin.offline("json/b.json");
    let orchestrator = RefreshOrchestrator::new(store.clone(), origin, manifest())
      .with_clock(Arc::new(FixedClock::new(noon())));
    let mut events = orchestrator.progress().subscribe();

    let outcome = orchestrator.check_and_refresh().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
      received.push(event);
    }
    assert_eq!(
      received,
      vec![
        ProgressEvent::Progress { percent: 33 },
        ProgressEvent::Progress { percent: 67 },
        ProgressEvent::Progress { percent: 100 },
        ProgressEvent::Complete,
      ]
    );
    match outcome {
      RefreshOutcome::Refreshed(report) => {
        assert_eq!(report.failed, vec!["b.json".to_string()]);
        assert_eq!(report.updated, vec!["a.json".to_string(), "c.json".to_string()]);
      }
      other => panic!("expected refresh, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_updating_flag_and_bonus_hook() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let origin = Arc::new(FakeOrigin::new());
    origin.serve("json/experiments.json", "[]", Some("\"e1\""));
    let hooks = Arc::new(RecordingHooks::default());
    let clock = Arc::new(FixedClock::new(noon()));
    let orchestrator =
      RefreshOrchestrator::new(store, origin.clone(), vec!["experiments.json".into()])
        .with_hooks(hooks.clone())
        .with_clock(clock.clone())
        .with_bonus_file("experiments.json");

    orchestrator.check_and_refresh().await.unwrap();
    origin.serve("json/experiments.json", "[1]", Some("\"e2\""));
    clock.advance(Duration::days(1));
    orchestrator.check_and_refresh().await.unwrap();

    assert_eq!(*hooks.updating.lock().unwrap(), vec![true, false, true, false]);
    assert_eq!(*hooks.bonus.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_cycle_appends_summary_log() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let origin = Arc::new(FakeOrigin::new());
    serve_all(&origin);
    let orchestrator = RefreshOrchestrator::new(store.clone(), origin, manifest())
      .with_clock(Arc::new(FixedClock::new(noon())));

    orchestrator.update_cache().await.unwrap();

    let logs: Vec<LogEntry> = store.logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].entry["event"], "refresh");
    assert_eq!(logs[0].entry["updated"].as_array().unwrap().len(), 3);
  }

  /// Store whose metadata table can be switched off, to fail the date write.
  struct DateWriteFails(SqliteStore);

  impl PersistentStore for DateWriteFails {
    fn get(&self, table: Table, key: &str) -> Result<Option<Value>> {
      self.0.get(table, key)
    }
    fn put(&self, table: Table, key: &str, value: &Value) -> Result<()> {
      if key == crate::cache::LAST_REFRESH_KEY {
        return Err(CacheError::Storage("disk full".into()));
      }
      self.0.put(table, key, value)
    }
    fn put_batch(&self, writes: &[StoreWrite]) -> Result<()> {
      self.0.put_batch(writes)
    }
    fn clear(&self, tables: &[Table]) -> Result<()> {
      self.0.clear(tables)
    }
    fn append_log(&self, entry: &Value) -> Result<i64> {
      self.0.append_log(entry)
    }
    fn logs(&self) -> Result<Vec<LogEntry>> {
      self.0.logs()
    }
    fn delete_logs(&self, ids: &[i64]) -> Result<()> {
      self.0.delete_logs(ids)
    }
  }

  #[tokio::test]
  async fn test_date_write_failure_aborts_but_clears_flag() {
    let store = Arc::new(DateWriteFails(SqliteStore::open_in_memory().unwrap()));
    let origin = Arc::new(FakeOrigin::new());
    serve_all(&origin);
    let hooks = Arc::new(RecordingHooks::default());
    let orchestrator = RefreshOrchestrator::new(store, origin, manifest())
      .with_hooks(hooks.clone())
      .with_clock(Arc::new(FixedClock::new(noon())));
    let mut events = orchestrator.progress().subscribe();

    assert!(orchestrator.check_and_refresh().await.is_err());

    assert_eq!(*hooks.updating.lock().unwrap(), vec![true, false]);
    assert_eq!(orchestrator.state(), RefreshState::Idle);
    let mut saw_complete = false;
    while let Ok(event) = events.try_recv() {
      saw_complete |= event == ProgressEvent::Complete;
    }
    assert!(!saw_complete);
  }

  /// Origin that parks every request until released.
  struct GatedOrigin {
    inner: FakeOrigin,
    entered: Notify,
    release: Notify,
  }

  #[async_trait]
  impl Origin for GatedOrigin {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
      self.entered.notify_one();
      self.release.notified().await;
      self.inner.fetch(request).await
    }

    fn resolve(&self, path: &str) -> Result<Url> {
      self.inner.resolve(path)
    }
  }

  #[tokio::test]
  async fn test_concurrent_refresh_is_rejected() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let inner = FakeOrigin::new();
    inner.serve("json/a.json", "[]", None);
    let origin = Arc::new(GatedOrigin {
      inner,
      entered: Notify::new(),
      release: Notify::new(),
    });
    let orchestrator = Arc::new(
      RefreshOrchestrator::new(store, origin.clone(), vec!["a.json".into()])
        .with_clock(Arc::new(FixedClock::new(noon()))),
    );

    let first = {
      let orchestrator = orchestrator.clone();
      tokio::spawn(async move { orchestrator.check_and_refresh().await })
    };
    origin.entered.notified().await;

    assert_eq!(orchestrator.state(), RefreshState::Refreshing);
    assert_eq!(
      orchestrator.check_and_refresh().await.unwrap(),
      RefreshOutcome::AlreadyRunning
    );

    origin.release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
    assert_eq!(orchestrator.state(), RefreshState::Idle);
  }
}
