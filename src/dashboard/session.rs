//! Active session and live channel lifecycle.
//!
//! An `ActiveSession` bundles everything scoped to one selected asset: its id,
//! a generation number, the live channel, the sample buffer and the audit log.
//! It is built on selection and torn down as a unit on switch or deselection.
//! The `ConnectionManager` owns the single live channel and guarantees the old
//! one has exited before a new one is opened.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::audit_log::AuditLogRepository;
use super::live_buffer::LiveSampleBuffer;
use crate::models::{AuditEntry, LiveSample};
use crate::oracle::{LiveChannelHandle, LiveFeed, SampleSink};

/// Cheap, cloneable view of a session's state.
///
/// Outside the crate only snapshots are handed out. Inside, a stale handle can
/// still write, but those writes land in the detached buffer and log of a
/// session nobody renders anymore.
#[derive(Clone)]
pub struct SessionHandle {
    asset_id: Arc<str>,
    generation: u64,
    samples: Arc<Mutex<LiveSampleBuffer>>,
    audit_log: Arc<RwLock<AuditLogRepository>>,
}

impl SessionHandle {
    fn new(asset_id: &str, generation: u64) -> Self {
        Self {
            asset_id: Arc::from(asset_id),
            generation,
            samples: Arc::new(Mutex::new(LiveSampleBuffer::new())),
            audit_log: Arc::new(RwLock::new(AuditLogRepository::new())),
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Buffered live samples, oldest first.
    pub fn live_samples(&self) -> Vec<LiveSample> {
        self.samples.lock().snapshot()
    }

    /// Audit history, ascending by date.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit_log.read().entries().to_vec()
    }

    pub(crate) fn samples(&self) -> &Arc<Mutex<LiveSampleBuffer>> {
        &self.samples
    }

    pub(crate) fn audit_log(&self) -> &Arc<RwLock<AuditLogRepository>> {
        &self.audit_log
    }

    /// Sink appending into this session's buffer only.
    pub(crate) fn sample_sink(&self) -> SampleSink {
        let samples = self.samples.clone();
        Arc::new(move |sample| samples.lock().append(sample))
    }
}

pub struct ActiveSession {
    handle: SessionHandle,
    channel: Option<LiveChannelHandle>,
}

impl ActiveSession {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn channel_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    async fn teardown(mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.handle.samples.lock().reset();
        info!(asset_id = %self.handle.asset_id, generation = self.handle.generation, "Session closed");
    }
}

/// Owner of the one live channel.
///
/// Callers serialize switches (the dashboard holds an async lock around
/// `switch_to`), so close-then-open is never interleaved.
pub struct ConnectionManager {
    feed: Arc<dyn LiveFeed>,
    session: Option<ActiveSession>,
    generations: u64,
}

impl ConnectionManager {
    pub fn new(feed: Arc<dyn LiveFeed>) -> Self {
        Self {
            feed,
            session: None,
            generations: 0,
        }
    }

    pub fn current(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    /// Tear down the current session, then open one for `asset_id`.
    ///
    /// `None` or a blank id leaves nothing open. A failed open still yields a
    /// session (empty buffer, no channel) so history can load.
    pub async fn switch_to(&mut self, asset_id: Option<&str>) -> Option<SessionHandle> {
        if let Some(previous) = self.session.take() {
            previous.teardown().await;
        }

        let asset_id = asset_id.map(str::trim).filter(|id| !id.is_empty())?;

        self.generations += 1;
        let generation = self.generations;
        let handle = SessionHandle::new(asset_id, generation);

        let channel = match self.feed.open(asset_id, handle.sample_sink()).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!(asset_id, error = %e, "Failed to open live channel");
                None
            }
        };

        info!(asset_id, generation, "📡 Session opened");
        self.session = Some(ActiveSession {
            handle: handle.clone(),
            channel,
        });
        Some(handle)
    }

    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }
    }
}
