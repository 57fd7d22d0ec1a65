//! Dashboard synchronization core.
//!
//! Reconciles three sources into one view of the selected asset:
//! - the portfolio pull (full asset list, refreshed wholesale)
//! - the live channel (push samples into a bounded buffer)
//! - the audit history pull (replaced wholesale, sorted by date)
//!
//! Writes (create, batch simulation, manual reading) never touch local state
//! directly. They finish by re-pulling the portfolio and the audit log.

pub mod audit_log;
pub mod live_buffer;
pub mod manual;
pub mod portfolio;
pub mod session;
pub mod simulation;

use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::models::{Asset, AssetDraft, AuditEntry, DayComputation, LiveSample, PublishReceipt};
use crate::oracle::{LiveFeed, OracleBackend, OracleRestClient, WsLiveFeed};

pub use audit_log::{AuditLogRepository, AuditSummary};
pub use live_buffer::{LiveSampleBuffer, LIVE_BUFFER_CAPACITY};
pub use manual::{ManualOutcome, ManualReadingWorkflow};
pub use portfolio::PortfolioCache;
pub use session::{ActiveSession, ConnectionManager, SessionHandle};
pub use simulation::{simulation_dates, BatchSimulation, ReplayOutcome, SimulationState, SIMULATION_DAYS};

/// Source of "today" for dated workflows.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

// ===== Error Handling =====

#[derive(Debug)]
pub enum DashboardError {
    NoAssetSelected,
    UnknownAsset(String),
    SimulationInProgress,
    InvalidInput(String),
    InvalidDraft(String),
    Backend(anyhow::Error),
    SimulationAborted {
        completed: u32,
        failed_on: NaiveDate,
        source: anyhow::Error,
    },
}

impl std::fmt::Display for DashboardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAssetSelected => write!(f, "no asset selected"),
            Self::UnknownAsset(id) => write!(f, "unknown asset: {}", id),
            Self::SimulationInProgress => write!(f, "a batch simulation is already running"),
            Self::InvalidInput(msg) => write!(f, "invalid reading: {}", msg),
            Self::InvalidDraft(msg) => write!(f, "invalid asset: {}", msg),
            Self::Backend(err) => write!(f, "oracle request failed: {:#}", err),
            Self::SimulationAborted {
                completed,
                failed_on,
                source,
            } => write!(
                f,
                "batch simulation stopped on {} after {} days: {:#}",
                failed_on, completed, source
            ),
        }
    }
}

impl std::error::Error for DashboardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(err) | Self::SimulationAborted { source: err, .. } => Some(&**err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for DashboardError {
    fn from(err: anyhow::Error) -> Self {
        DashboardError::Backend(err)
    }
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Applied { entries: usize },
    /// The store was reset to empty
    Failed { reason: String },
    /// The session changed while the pull was in flight; nothing applied
    Stale,
    /// No session to pull for
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub days: u32,
    pub state: SimulationState,
}

#[derive(Debug)]
pub struct ManualReport {
    pub date: NaiveDate,
    pub computation: DayComputation,
    pub receipt: PublishReceipt,
}

/// Read-only projection for the view layer.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub assets: Vec<Arc<Asset>>,
    pub selected: Option<Arc<Asset>>,
    pub live_samples: Vec<LiveSample>,
    pub audit_log: Vec<AuditEntry>,
    pub recent_entries: Vec<AuditEntry>,
    pub summary: AuditSummary,
    pub pending_reading: Option<f64>,
    pub is_loading: bool,
    pub is_simulating: bool,
    pub simulation: SimulationState,
}

/// Decrements the portfolio loading counter even if the pull is cancelled.
struct LoadingGuard<'a> {
    cache: &'a RwLock<PortfolioCache>,
    seq: u64,
}

impl<'a> LoadingGuard<'a> {
    fn new(cache: &'a RwLock<PortfolioCache>) -> Self {
        let seq = cache.write().begin_refresh();
        Self { cache, seq }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.cache.write().end_refresh();
    }
}

pub struct Dashboard {
    backend: Arc<dyn OracleBackend>,
    connections: tokio::sync::Mutex<ConnectionManager>,
    session: RwLock<Option<SessionHandle>>,
    portfolio: RwLock<PortfolioCache>,
    simulation: BatchSimulation,
    manual: Mutex<ManualReadingWorkflow>,
    clock: Clock,
    recent_entries: usize,
}

impl Dashboard {
    pub fn new(backend: Arc<dyn OracleBackend>, feed: Arc<dyn LiveFeed>, config: &DashboardConfig) -> Self {
        Self {
            backend,
            connections: tokio::sync::Mutex::new(ConnectionManager::new(feed)),
            session: RwLock::new(None),
            portfolio: RwLock::new(PortfolioCache::new()),
            simulation: BatchSimulation::new(),
            manual: Mutex::new(ManualReadingWorkflow::new()),
            clock: Arc::new(|| Utc::now().date_naive()),
            recent_entries: config.recent_entries,
        }
    }

    /// REST backend plus WebSocket live feed.
    pub fn connect(config: &DashboardConfig) -> Result<Self> {
        let backend = Arc::new(OracleRestClient::new(config)?);
        let feed = Arc::new(WsLiveFeed::new(config));
        Ok(Self::new(backend, feed, config))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend(&self) -> &Arc<dyn OracleBackend> {
        &self.backend
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    // ===== Portfolio =====

    /// Replace the asset collection and re-point the selection. A result that
    /// lands after a later refresh has been applied is dropped.
    pub async fn refresh_portfolio(&self) -> PullOutcome {
        let loading = LoadingGuard::new(&self.portfolio);

        let pulled = self.backend.list_assets().await;

        let mut portfolio = self.portfolio.write();
        if !portfolio.accept(loading.seq) {
            debug!(seq = loading.seq, "discarding superseded portfolio pull");
            return PullOutcome::Stale;
        }

        match pulled {
            Ok(assets) => {
                let count = assets.len();
                if !portfolio.apply_refresh(assets) {
                    warn!(
                        selected = ?portfolio.selected_id(),
                        "Selected asset missing from refreshed portfolio; keeping previous record"
                    );
                }
                debug!(count, "portfolio refreshed");
                PullOutcome::Applied { entries: count }
            }
            Err(e) => {
                warn!(error = %e, "Portfolio refresh failed");
                portfolio.apply_refresh(Vec::new());
                PullOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    /// Create on the server, then re-pull. Nothing is inserted locally.
    pub async fn create_asset(&self, draft: &AssetDraft) -> Result<Asset, DashboardError> {
        draft.validate().map_err(DashboardError::InvalidDraft)?;

        let created = self.backend.create_asset(draft).await;
        self.refresh_portfolio().await;

        match created {
            Ok(asset) => {
                info!(bond_id = %asset.bond_id, name = %asset.name, "🌱 Asset created");
                Ok(asset)
            }
            Err(e) => {
                warn!(error = %e, "Asset creation rejected");
                Err(DashboardError::Backend(e))
            }
        }
    }

    // ===== Selection =====

    /// Switch the active session to `bond_id` and pull its history.
    pub async fn select_asset(&self, bond_id: &str) -> Result<Arc<Asset>, DashboardError> {
        let bond_id = bond_id.trim();
        if bond_id.is_empty() {
            self.deselect().await;
            return Err(DashboardError::NoAssetSelected);
        }

        let asset = self
            .portfolio
            .read()
            .find(bond_id)
            .ok_or_else(|| DashboardError::UnknownAsset(bond_id.to_string()))?;

        // A refresh may have landed (or emptied the collection) while the
        // switch was awaited. Prefer the fresher record, else keep ours.
        let selected = {
            let mut connections = self.connections.lock().await;
            let handle = connections.switch_to(Some(bond_id)).await;

            let mut session = self.session.write();
            let mut portfolio = self.portfolio.write();
            let record = portfolio.find(bond_id).unwrap_or(asset);
            *session = handle;
            portfolio.set_selected(record.clone());
            record
        };

        self.refresh_audit_log().await;
        Ok(selected)
    }

    pub async fn deselect(&self) {
        let mut connections = self.connections.lock().await;
        connections.switch_to(None).await;

        let mut session = self.session.write();
        let mut portfolio = self.portfolio.write();
        *session = None;
        portfolio.clear_selection();
    }

    pub fn selected_asset(&self) -> Option<Arc<Asset>> {
        self.portfolio.read().selected()
    }

    pub fn active_session(&self) -> Option<SessionHandle> {
        self.session.read().clone()
    }

    /// Asset id of the open live channel, if any.
    pub async fn open_channel(&self) -> Option<String> {
        let connections = self.connections.lock().await;
        connections
            .current()
            .filter(|s| s.channel_open())
            .map(|s| s.handle().asset_id().to_string())
    }

    // ===== Audit log =====

    /// Pull the active asset's history and replace the log, unless the
    /// selection moved on or a later pull for the same session was applied
    /// while the request was in flight.
    pub async fn refresh_audit_log(&self) -> PullOutcome {
        let Some(handle) = self.active_session() else {
            return PullOutcome::Skipped;
        };

        let seq = handle.audit_log().write().begin_pull();
        let pulled = self.backend.fetch_audit_log(handle.asset_id()).await;

        let current = self.session.read().as_ref().map(|s| s.generation());
        if current != Some(handle.generation()) {
            debug!(
                asset_id = handle.asset_id(),
                generation = handle.generation(),
                "discarding audit pull for a closed session"
            );
            return PullOutcome::Stale;
        }

        let outcome = match &pulled {
            Ok(report) => PullOutcome::Applied {
                entries: report.audit_log.len(),
            },
            Err(e) => {
                warn!(asset_id = handle.asset_id(), error = %e, "Audit history pull failed; clearing log");
                PullOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        };

        let mut log = handle.audit_log().write();
        if !log.apply_pull_seq(seq, pulled) {
            debug!(asset_id = handle.asset_id(), seq, "discarding superseded audit pull");
            return PullOutcome::Stale;
        }
        match outcome {
            PullOutcome::Applied { .. } => PullOutcome::Applied { entries: log.len() },
            other => other,
        }
    }

    async fn refresh_all(&self) {
        let (portfolio, audit) = tokio::join!(self.refresh_portfolio(), self.refresh_audit_log());
        debug!(?portfolio, ?audit, "post-write refresh");
    }

    // ===== Batch simulation =====

    pub fn is_simulating(&self) -> bool {
        self.simulation.is_busy()
    }

    pub fn simulation_state(&self) -> SimulationState {
        self.simulation.state()
    }

    /// Replay the last 30 days for the selected asset, then re-pull.
    ///
    /// Stays busy until both refreshes have landed. A step failure stops the
    /// replay but the refreshes still run before the failure is returned.
    pub async fn run_batch_simulation(&self) -> Result<SimulationReport, DashboardError> {
        let handle = self.active_session().ok_or(DashboardError::NoAssetSelected)?;
        let today = self.today();

        let Some(mut run) = self.simulation.begin(handle.asset_id(), today) else {
            debug!("batch simulation already running; ignoring trigger");
            return Err(DashboardError::SimulationInProgress);
        };

        let outcome = run.replay(self.backend.as_ref()).await;
        self.refresh_all().await;
        let state = run.finish(&outcome);

        match outcome {
            ReplayOutcome::Completed { days } => Ok(SimulationReport { days, state }),
            ReplayOutcome::Aborted {
                completed,
                failed_on,
                error,
            } => Err(DashboardError::SimulationAborted {
                completed,
                failed_on,
                source: error,
            }),
        }
    }

    // ===== Manual reading =====

    pub fn set_manual_input(&self, input: &str) -> Result<(), DashboardError> {
        self.manual
            .lock()
            .set_input(input)
            .map_err(DashboardError::InvalidInput)
    }

    pub fn pending_reading(&self) -> Option<f64> {
        self.manual.lock().pending()
    }

    /// Compute then publish today's pending reading. The input is cleared and
    /// both stores re-pulled whatever the outcome.
    pub async fn submit_manual_reading(&self) -> Result<ManualReport, DashboardError> {
        let handle = self.active_session().ok_or(DashboardError::NoAssetSelected)?;
        let value = self
            .pending_reading()
            .ok_or_else(|| DashboardError::InvalidInput("no reading entered".to_string()))?;
        let today = self.today();

        let outcome = ManualReadingWorkflow::execute(self.backend.as_ref(), handle.asset_id(), today, value).await;

        self.manual.lock().clear();
        self.refresh_all().await;

        let ManualOutcome {
            date,
            computed,
            published,
        } = outcome;
        let computation = computed?;
        let receipt = match published {
            Some(receipt) => receipt?,
            None => return Err(DashboardError::Backend(anyhow::anyhow!("publish was not attempted"))),
        };

        Ok(ManualReport {
            date,
            computation,
            receipt,
        })
    }

    // ===== View =====

    pub fn view(&self) -> DashboardView {
        self.view_with_recent(self.recent_entries)
    }

    pub fn view_with_recent(&self, recent_n: usize) -> DashboardView {
        let (assets, selected, is_loading) = {
            let portfolio = self.portfolio.read();
            (portfolio.assets().to_vec(), portfolio.selected(), portfolio.is_loading())
        };

        let (live_samples, audit_log, recent_entries, summary) = match self.active_session() {
            Some(handle) => {
                let samples = handle.samples().lock().snapshot();
                let log = handle.audit_log().read();
                (samples, log.entries().to_vec(), log.recent(recent_n), log.summary())
            }
            None => (Vec::new(), Vec::new(), Vec::new(), AuditSummary::default()),
        };

        let simulation = self.simulation.state();
        DashboardView {
            assets,
            selected,
            live_samples,
            audit_log,
            recent_entries,
            summary,
            pending_reading: self.pending_reading(),
            is_loading,
            is_simulating: simulation.is_running(),
            simulation,
        }
    }

    /// Close any open live channel. Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.lock().await;
        connections.shutdown().await;
        *self.session.write() = None;
        info!("Dashboard shut down");
    }
}
