//! Oracle WebSocket live channel
//!
//! One connection per selected asset: `<ws_base>/ws/oracle/<bond_id>`.
//! Frames are `{"type": "ORACLE_UPDATE", "data": {"performance_ratio": ..}}`;
//! any other kind, non-JSON text or unparseable payload is dropped without
//! touching the channel. A read error or server close ends the channel; there
//! is no reconnect, the next selection opens a fresh one.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::DashboardConfig;
use crate::models::LiveSample;
use crate::oracle::LiveFeed;

pub const ORACLE_UPDATE_KIND: &str = "ORACLE_UPDATE";

/// Receiver of accepted samples.
pub type SampleSink = Arc<dyn Fn(LiveSample) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Extract a sample from a text frame, or `None` if the frame is not one.
pub fn parse_live_message(text: &str) -> Option<LiveSample> {
    let envelope: WsEnvelope = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return None,
    };

    if envelope.kind != ORACLE_UPDATE_KIND {
        return None;
    }

    let sample: LiveSample = match serde_json::from_value(envelope.data?) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "failed to parse oracle update payload");
            return None;
        }
    };

    sample.performance_ratio.is_finite().then_some(sample)
}

/// Owner of one live channel's reader task.
///
/// `close()` is the orderly path. Dropping the handle aborts the task, so a
/// forgotten handle cannot keep a subscription alive.
pub struct LiveChannelHandle {
    asset_id: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl LiveChannelHandle {
    /// Spawn `run` as the channel task. It receives the shutdown signal and
    /// must return promptly once that fires.
    pub fn spawn<F, Fut>(asset_id: impl Into<String>, close_timeout: Duration, run: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(shutdown_rx));

        Self {
            asset_id: asset_id.into(),
            shutdown: Some(shutdown_tx),
            task: Some(task),
            close_timeout,
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// False once the task has exited (closed, errored or never connected).
    pub fn is_open(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal shutdown and wait for the task to exit.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(self.close_timeout, &mut task).await {
            Ok(_) => {
                debug!(asset_id = %self.asset_id, "live channel closed");
            }
            Err(_) => {
                warn!(asset_id = %self.asset_id, "live channel did not stop in time; aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Drop for LiveChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// WebSocket implementation of [`LiveFeed`].
#[derive(Debug, Clone)]
pub struct WsLiveFeed {
    ws_base_url: String,
    close_timeout: Duration,
}

impl WsLiveFeed {
    pub fn new(config: &DashboardConfig) -> Self {
        Self {
            ws_base_url: config.ws_base_url.trim_end_matches('/').to_string(),
            close_timeout: config.channel_close_timeout,
        }
    }

    pub fn channel_url(&self, asset_id: &str) -> String {
        format!("{}/ws/oracle/{}", self.ws_base_url, asset_id)
    }
}

#[async_trait]
impl LiveFeed for WsLiveFeed {
    async fn open(&self, asset_id: &str, sink: SampleSink) -> Result<LiveChannelHandle> {
        let url = self.channel_url(asset_id);
        let task_asset = asset_id.to_string();

        Ok(LiveChannelHandle::spawn(
            asset_id,
            self.close_timeout,
            move |shutdown| run_channel(url, task_asset, sink, shutdown),
        ))
    }
}

async fn run_channel(
    url: String,
    asset_id: String,
    sink: SampleSink,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!(asset_id = %asset_id, "🔌 Opening live channel");

    let connected = tokio::select! {
        res = connect_async(url.as_str()) => res,
        _ = &mut shutdown => {
            debug!(asset_id = %asset_id, "live channel closed before connect");
            return;
        }
    };

    let (ws_stream, resp) = match connected {
        Ok(v) => v,
        Err(e) => {
            error!(asset_id = %asset_id, error = %e, "Live channel connect failed");
            return;
        }
    };

    info!(asset_id = %asset_id, status = %resp.status(), "✅ Live channel connected");

    let (mut write, mut read) = ws_stream.split();
    let mut delivered: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                break;
            }
            ws_msg = read.next() => {
                let Some(ws_msg) = ws_msg else {
                    warn!(asset_id = %asset_id, "live channel stream ended");
                    break;
                };

                match ws_msg {
                    Ok(Message::Text(text)) => match parse_live_message(&text) {
                        Some(sample) => {
                            delivered += 1;
                            sink(sample);
                        }
                        None => {
                            if tracing::enabled!(tracing::Level::DEBUG) {
                                let preview: String = text.chars().take(200).collect();
                                debug!(asset_id = %asset_id, "ignored frame: {}", preview);
                            }
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        info!(asset_id = %asset_id, ?frame, "Live channel closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(asset_id = %asset_id, error = %e, "Live channel read error");
                        break;
                    }
                }
            }
        }
    }

    info!(asset_id = %asset_id, delivered, "Live channel finished");
}
