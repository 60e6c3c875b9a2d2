use super::connector::{Connector, FrameSink, FrameStream};
use super::messages::{InboundFrame, OutboundFrame};
use super::reconnect::ReconnectPolicy;
use crate::error::ChatError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection status observed by the UI and the session orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,

    /// Consecutive failed or dropped connections since the last success
    pub retry_count: u32,

    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(InboundFrame),
    Close,
    Error(String),
}

/// Anything the orchestrator can send user messages through
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, frame: OutboundFrame) -> Result<(), ChatError>;

    fn is_connected(&self) -> bool;
}

/// Why a link's pump loop returned
enum LinkExit {
    Dropped(Option<String>),
    Disposed,
}

/// Persistent connection to the chat backend with automatic reconnects
pub struct TransportClient {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    capacity: usize,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    events: broadcast::Sender<TransportEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl TransportClient {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());

        Self {
            url: url.into(),
            connector,
            policy,
            capacity,
            outbound: Mutex::new(None),
            events,
            state_tx: Arc::new(state_tx),
            state_rx,
            supervisor: Mutex::new(None),
        }
    }

    /// Start the connection supervisor. Calling this while it runs is a no-op.
    pub async fn connect(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if let Some(handle) = supervisor.as_ref() {
            if !handle.is_finished() {
                debug!("Transport supervisor already running");
                return;
            }
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        *self.outbound.lock().await = Some(tx);

        let handle = tokio::spawn(Self::supervise(
            self.url.clone(),
            Arc::clone(&self.connector),
            self.policy.clone(),
            rx,
            self.events.clone(),
            Arc::clone(&self.state_tx),
        ));

        *supervisor = Some(handle);
    }

    /// Stop the supervisor and drop the link
    pub async fn disconnect(&self) {
        self.outbound.lock().await.take();

        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let was_connected = self.state_rx.borrow().connected;
        self.state_tx.send_modify(|state| state.connected = false);
        if was_connected {
            let _ = self.events.send(TransportEvent::Close);
        }

        info!("Transport disconnected");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn supervise(
        url: String,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        mut outbound: mpsc::Receiver<String>,
        events: broadcast::Sender<TransportEvent>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) {
        let mut failures: u32 = 0;

        loop {
            match connector.connect(&url).await {
                Ok((mut sink, mut stream)) => {
                    failures = 0;
                    state.send_modify(|s| {
                        s.connected = true;
                        s.retry_count = 0;
                        s.last_error = None;
                    });
                    let _ = events.send(TransportEvent::Open);
                    info!("Connected to chat backend");

                    let exit = Self::pump(&mut sink, &mut stream, &mut outbound, &events).await;

                    state.send_modify(|s| s.connected = false);
                    let _ = events.send(TransportEvent::Close);

                    match exit {
                        LinkExit::Disposed => {
                            let _ = sink.close().await;
                            info!("Transport supervisor stopped");
                            return;
                        }
                        LinkExit::Dropped(reason) => {
                            warn!(
                                "Connection to chat backend lost: {}",
                                reason.as_deref().unwrap_or("closed by peer")
                            );
                            state.send_modify(|s| s.last_error = reason);
                        }
                    }
                }
                Err(e) => {
                    warn!("Connection attempt failed: {}", e);
                    state.send_modify(|s| s.last_error = Some(e.to_string()));
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                }
            }

            failures = failures.saturating_add(1);
            state.send_modify(|s| s.retry_count = failures);

            match policy.next_delay(failures) {
                Some(delay) => {
                    info!("Reconnecting in {:?} (attempt {})", delay, failures + 1);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!("Giving up on chat backend after {} failures", failures);
                    return;
                }
            }
        }
    }

    async fn pump(
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        outbound: &mut mpsc::Receiver<String>,
        events: &broadcast::Sender<TransportEvent>,
    ) -> LinkExit {
        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(text).await {
                            error!("Failed to send frame: {}", e);
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            return LinkExit::Dropped(Some(e.to_string()));
                        }
                    }
                    None => return LinkExit::Disposed,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(text)) => match InboundFrame::decode(&text) {
                        Ok(frame) => {
                            debug!("Received frame: {:?}", frame);
                            let _ = events.send(TransportEvent::Message(frame));
                        }
                        Err(e) => warn!("Dropping undecodable frame: {} ({})", e, text),
                    },
                    Some(Err(e)) => {
                        error!("Failed to read frame: {}", e);
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return LinkExit::Dropped(Some(e.to_string()));
                    }
                    None => return LinkExit::Dropped(None),
                },
            }
        }
    }
}

#[async_trait]
impl ChatTransport for TransportClient {
    async fn send(&self, frame: OutboundFrame) -> Result<(), ChatError> {
        if !self.is_connected() {
            return Err(ChatError::Connection("not connected".to_string()));
        }

        let text = frame.encode()?;
        let tx = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or_else(|| ChatError::Connection("transport not started".to_string()))?;

        tx.send(text)
            .await
            .map_err(|_| ChatError::Connection("transport stopped".to_string()))?;

        debug!("Queued frame for chat backend");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state_rx.borrow().connected
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }
    }
}
