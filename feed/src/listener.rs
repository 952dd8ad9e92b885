use crate::frame::GameFrame;
use crate::ingress::Ingress;
use futures_util::StreamExt;
use motion::state::{ControlState, LinkStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Delay between reconnect attempts to the game.
pub const RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("could not connect to game feed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("game feed dropped: {0}")]
    Read(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("game feed closed")]
    Closed,
    #[error("undecodable game frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Keeps a websocket connection to the game mod open and feeds every frame
/// to the [`Ingress`]. Reconnects after [`RETRY`] until shutdown.
pub struct FeedListener {
    url: String,
    ingress: Ingress,
    state: Arc<ControlState>,
    status: watch::Sender<LinkStatus>,
    retry: Duration,
}

impl FeedListener {
    pub fn new(url: impl Into<String>, ingress: Ingress, state: Arc<ControlState>) -> Self {
        let (status, _) = watch::channel(LinkStatus::Waiting);
        Self {
            url: url.into(),
            ingress,
            state,
            status,
            retry: RETRY,
        }
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Publish connection state on `status` instead of a private channel.
    pub fn with_status(mut self, status: watch::Sender<LinkStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub async fn run(self) {
        while !self.state.is_shutting_down() {
            self.status.send_replace(LinkStatus::Connecting);
            let outcome = tokio::select! {
                r = self.session() => r,
                _ = self.state.shutdown_requested() => break,
            };
            self.ingress.disconnected();
            self.status.send_replace(LinkStatus::Retrying);
            match outcome {
                Err(FeedError::Closed) => info!(url = %self.url, "game feed closed"),
                Err(e) => warn!(url = %self.url, error = %e, "game feed unavailable"),
                Ok(()) => {}
            }
            tokio::select! {
                _ = tokio::time::sleep(self.retry) => {}
                _ = self.state.shutdown_requested() => break,
            }
        }
        self.ingress.disconnected();
        self.status.send_replace(LinkStatus::Stopped);
    }

    /// One connection: read frames until the socket closes.
    async fn session(&self) -> Result<(), FeedError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(FeedError::Connect)?;
        info!(url = %self.url, "connected to game feed");
        self.status.send_replace(LinkStatus::Connected { devices: 0 });

        let (_, mut read) = socket.split();
        while let Some(msg) = read.next().await {
            let msg = msg.map_err(FeedError::Read)?;
            match msg {
                Message::Text(text) => match GameFrame::parse(text.as_str()) {
                    Ok(frame) => self.ingress.apply(&frame),
                    Err(e) => debug!(error = %FeedError::Decode(e), "frame skipped"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(FeedError::Closed)
    }
}
