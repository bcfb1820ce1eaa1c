//! Concurrent per-cell polling and batch publication

use crate::client::WatchClient;
use crate::cursor::Cursor;
use crate::event::{ChangeBatch, ChangeKind, FileType, PathEvent, WatchEvent};
use crate::query::{CellQuery, IgnorePattern, WatchResponse};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const FRESH_INSTANCE_REASON: &str = "Watch service has been initialized recently.";
const TOO_MANY_FILES_REASON: &str = "Too many files changed.";
const MISSING_NAME_REASON: &str = "Filename missing from watch response.";

/// What to publish when the service reports a fresh instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreshInstanceAction {
    /// Only flag the cycle as changed
    None,
    /// Publish an overflow for the cell
    #[default]
    PostOverflowEvent,
}

/// Change feed tuning
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Per-cell query timeout
    pub timeout: Duration,
    /// File lists longer than this become an overflow
    pub overflow_threshold: usize,
    /// Reaction to a fresh service instance
    pub fresh_instance_action: FreshInstanceAction,
    /// Concurrent polls (defaults to the number of cells)
    pub max_workers: Option<usize>,
    /// Capacity of the broadcast channel
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            overflow_threshold: 10_000,
            fresh_instance_action: FreshInstanceAction::default(),
            max_workers: None,
            channel_capacity: 64,
        }
    }
}

/// Receives every non-empty batch, in publication order
pub trait ChangeSubscriber: Send + Sync {
    /// Handle a finished batch
    fn on_change_batch(&self, batch: Arc<ChangeBatch>);
}

/// Where a cell is in its poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellPhase {
    /// Waiting for the next cycle
    Idle,
    /// Query in flight
    Polling,
    /// Reply being converted into path events
    Applying,
    /// Reply turned into an overflow
    Overflowed,
}

/// A watched cell
#[derive(Debug, Clone)]
pub struct CellWatch {
    /// Cell root
    pub root: PathBuf,
    /// Sub-directory the query is scoped to
    pub relative_root: Option<PathBuf>,
    /// Paths and globs never reported
    pub ignore: Vec<IgnorePattern>,
    /// Starting cursor
    pub cursor: Cursor,
}

impl CellWatch {
    /// Cell at `root` starting from the null clock
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            relative_root: None,
            ignore: Vec::new(),
            cursor: Cursor::null(),
        }
    }

    /// Add ignore patterns
    #[must_use]
    pub fn with_ignore(mut self, ignore: impl IntoIterator<Item = IgnorePattern>) -> Self {
        self.ignore.extend(ignore);
        self
    }

    /// Start from a specific cursor
    #[must_use]
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone)]
pub struct PollReport {
    /// Everything published in this cycle
    pub batch: Arc<ChangeBatch>,
    /// Whether anything may have changed
    pub files_changed: bool,
    /// Cells whose query failed, with the error that became an overflow
    pub errors: Vec<(PathBuf, String)>,
    /// Cells that reported a fresh watch instance; everything under them
    /// must be assumed changed even when no overflow was published
    pub fresh_instances: Vec<PathBuf>,
}

impl PollReport {
    fn skipped() -> Self {
        Self {
            batch: Arc::new(ChangeBatch::default()),
            files_changed: false,
            errors: Vec::new(),
            fresh_instances: Vec::new(),
        }
    }
}

struct CellState {
    query: CellQuery,
    cursor: Cursor,
    phase: Mutex<CellPhase>,
}

impl CellState {
    fn set_phase(&self, phase: CellPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn phase(&self) -> CellPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CellOutcome {
    cell: PathBuf,
    batch: ChangeBatch,
    files_changed: bool,
    fresh_instance: bool,
    error: Option<String>,
}

impl CellOutcome {
    fn overflow(cell: &Path, reason: String, error: Option<String>) -> Self {
        Self {
            cell: cell.to_path_buf(),
            batch: ChangeBatch::overflow(cell, reason),
            files_changed: true,
            fresh_instance: false,
            error,
        }
    }
}

/// Polls every cell and publishes merged change batches
pub struct ChangeFeed {
    client: Arc<dyn WatchClient>,
    cells: BTreeMap<PathBuf, Arc<CellState>>,
    config: FeedConfig,
    subscribers: RwLock<Vec<Arc<dyn ChangeSubscriber>>>,
    sender: broadcast::Sender<Arc<ChangeBatch>>,
    shutdown: AtomicBool,
}

impl ChangeFeed {
    /// Feed over `cells` using `client`
    pub fn new(
        client: Arc<dyn WatchClient>,
        cells: impl IntoIterator<Item = CellWatch>,
        config: FeedConfig,
    ) -> Self {
        let cells = cells
            .into_iter()
            .map(|cell| {
                let query = CellQuery::new(&cell.root, cell.relative_root.as_deref(), &cell.ignore);
                let state = CellState {
                    query,
                    cursor: cell.cursor,
                    phase: Mutex::new(CellPhase::Idle),
                };
                (cell.root, Arc::new(state))
            })
            .collect();
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            client,
            cells,
            config,
            subscribers: RwLock::new(Vec::new()),
            sender,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Register a subscriber called synchronously on publication
    pub fn subscribe(&self, subscriber: Arc<dyn ChangeSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Receive batches over a broadcast channel
    #[must_use]
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Arc<ChangeBatch>> {
        self.sender.subscribe()
    }

    /// Stop dispatching new polls
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether [`ChangeFeed::shutdown`] was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Current cursor of a cell
    #[must_use]
    pub fn cursor(&self, cell: &Path) -> Option<String> {
        self.cells.get(cell).map(|state| state.cursor.get())
    }

    /// Current phase of a cell
    #[must_use]
    pub fn phase(&self, cell: &Path) -> Option<CellPhase> {
        self.cells.get(cell).map(|state| state.phase())
    }

    /// Watched cell roots
    pub fn cells(&self) -> impl Iterator<Item = &Path> {
        self.cells.keys().map(PathBuf::as_path)
    }

    /// Poll every cell once, merge the results and publish them
    pub async fn poll_once(&self) -> PollReport {
        if self.is_shut_down() {
            debug!("change feed shut down, skipping poll");
            return PollReport::skipped();
        }

        let workers = self.config.max_workers.unwrap_or(self.cells.len()).max(1);
        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut task_cells = HashMap::new();

        for (cell, state) in &self.cells {
            let client = Arc::clone(&self.client);
            let state = Arc::clone(state);
            let permits = Arc::clone(&permits);
            let config = self.config.clone();
            let root = cell.clone();

            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                poll_cell(client.as_ref(), &root, &state, &config).await
            });
            let _ = task_cells.insert(handle.id(), cell.clone());
        }

        let mut outcomes = Vec::with_capacity(self.cells.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(e) => {
                    let cell = task_cells.get(&e.id()).cloned().unwrap_or_default();
                    error!("poll task for {} failed: {}", cell.display(), e);
                    let reason = format!("Poll task failed: {e}");
                    outcomes.push(CellOutcome::overflow(&cell, reason.clone(), Some(reason)));
                }
            }
        }
        outcomes.sort_by(|a, b| a.cell.cmp(&b.cell));

        let files_changed = outcomes.iter().any(|outcome| outcome.files_changed);
        let errors: Vec<(PathBuf, String)> = outcomes
            .iter()
            .filter_map(|outcome| outcome.error.clone().map(|e| (outcome.cell.clone(), e)))
            .collect();
        let fresh_instances: Vec<PathBuf> = outcomes
            .iter()
            .filter(|outcome| outcome.fresh_instance)
            .map(|outcome| outcome.cell.clone())
            .collect();
        let batch = Arc::new(ChangeBatch::merge(
            outcomes.into_iter().map(|outcome| outcome.batch),
        ));

        if batch.is_empty() {
            if !files_changed {
                debug!("zero file changes across {} cells", self.cells.len());
            }
        } else {
            info!(
                "publishing {} change events ({} overflows)",
                batch.len(),
                batch.overflows().count()
            );
            self.publish(&batch);
        }

        for state in self.cells.values() {
            state.set_phase(CellPhase::Idle);
        }

        PollReport {
            batch,
            files_changed,
            errors,
            fresh_instances,
        }
    }

    fn publish(&self, batch: &Arc<ChangeBatch>) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscriber in subscribers {
            subscriber.on_change_batch(Arc::clone(batch));
        }
        // No receivers is fine
        let _ = self.sender.send(Arc::clone(batch));
    }
}

async fn poll_cell(
    client: &dyn WatchClient,
    cell: &Path,
    state: &CellState,
    config: &FeedConfig,
) -> CellOutcome {
    state.set_phase(CellPhase::Polling);
    let query = state.query.at(&state.cursor.get());

    let response = match tokio::time::timeout(config.timeout, client.query(&query)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!("watch query for {} failed: {}", cell.display(), e);
            state.set_phase(CellPhase::Overflowed);
            let reason = format!("Watch service error occurred: {e}");
            return CellOutcome::overflow(cell, reason, Some(e.to_string()));
        }
        Err(_) => {
            let reason = format!(
                "Timed out after {}s waiting for watch query",
                config.timeout.as_secs_f64()
            );
            warn!("{} ({})", reason, cell.display());
            state.set_phase(CellPhase::Overflowed);
            return CellOutcome::overflow(cell, reason.clone(), Some(reason));
        }
    };

    apply_response(cell, state, config, response)
}

fn apply_response(
    cell: &Path,
    state: &CellState,
    config: &FeedConfig,
    response: WatchResponse,
) -> CellOutcome {
    if let Some(clock) = response.clock.as_deref() {
        let _ = state.cursor.advance(clock);
    }

    if response.is_fresh_instance {
        info!("fresh watch instance for {}", cell.display());
        state.set_phase(CellPhase::Overflowed);
        let batch = match config.fresh_instance_action {
            FreshInstanceAction::PostOverflowEvent => {
                ChangeBatch::overflow(cell, FRESH_INSTANCE_REASON)
            }
            FreshInstanceAction::None => ChangeBatch::default(),
        };
        return CellOutcome {
            cell: cell.to_path_buf(),
            batch,
            files_changed: true,
            fresh_instance: true,
            error: None,
        };
    }

    let files = response.files.unwrap_or_default();
    if files.len() > config.overflow_threshold {
        warn!(
            "{} files changed in {}, above threshold {}",
            files.len(),
            cell.display(),
            config.overflow_threshold
        );
        state.set_phase(CellPhase::Overflowed);
        return CellOutcome::overflow(cell, TOO_MANY_FILES_REASON.to_string(), None);
    }

    state.set_phase(CellPhase::Applying);
    let mut events = Vec::with_capacity(files.len());
    for file in &files {
        let Some(event) = path_event(cell, file) else {
            warn!("watch response for {} has an entry without a name", cell.display());
            state.set_phase(CellPhase::Overflowed);
            return CellOutcome::overflow(cell, MISSING_NAME_REASON.to_string(), None);
        };
        if event.file_type != FileType::Directory {
            events.push(WatchEvent::Path(event));
        }
    }

    CellOutcome {
        cell: cell.to_path_buf(),
        batch: ChangeBatch::new(events),
        files_changed: !files.is_empty(),
        fresh_instance: false,
        error: None,
    }
}

fn path_event(cell: &Path, file: &Value) -> Option<PathEvent> {
    let name = file.get("name")?.as_str()?;
    let exists = file.get("exists").and_then(Value::as_bool).unwrap_or(true);
    let is_new = file.get("new").and_then(Value::as_bool).unwrap_or(false);
    let kind = if !exists {
        ChangeKind::Delete
    } else if is_new {
        ChangeKind::Create
    } else {
        ChangeKind::Modify
    };
    let file_type = file
        .get("type")
        .and_then(Value::as_str)
        .map_or(FileType::File, FileType::from_code);

    Some(PathEvent {
        cell: cell.to_path_buf(),
        kind,
        path: PathBuf::from(name),
        file_type,
    })
}
