//! WebSocket connection management.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::config::WsConfig;
use crate::{
    error::{KuzzleError, KuzzleResult},
    protocol::{Protocol, ProtocolListener},
    types::TransportState,
};

/// Control commands, checked before any data command.
#[derive(Debug)]
pub(crate) enum ControlCommand {
    Close,
}

/// Data commands.
#[derive(Debug)]
pub(crate) enum DataCommand {
    Send { payload: String },
}

/// State and listeners shared between the protocol handle and its task.
pub(crate) struct Shared {
    state: RwLock<TransportState>,
    listeners: Mutex<Vec<Weak<dyn ProtocolListener>>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(TransportState::Closed),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        *self.state.read()
    }

    pub(crate) fn add_listener(&self, listener: Weak<dyn ProtocolListener>) {
        self.listeners.lock().push(listener);
    }

    /// Publish a new state, then notify listeners.
    pub(crate) fn set_state(&self, state: TransportState) {
        *self.state.write() = state;
        self.notify_state(state);
    }

    /// Move from `from` to `to` if the current state is `from`.
    fn transition(&self, from: TransportState, to: TransportState) -> bool {
        {
            let mut current = self.state.write();
            if *current != from {
                return false;
            }
            *current = to;
        }
        self.notify_state(to);
        true
    }

    fn notify_state(&self, state: TransportState) {
        for listener in self.live_listeners() {
            listener.on_state_changed(state);
        }
    }

    fn dispatch(&self, payload: &str) {
        for listener in self.live_listeners() {
            listener.on_message(payload);
        }
    }

    fn live_listeners(&self) -> Vec<Arc<dyn ProtocolListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| listener.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

struct Channels {
    ctrl_tx: mpsc::Sender<ControlCommand>,
    cmd_tx: mpsc::Sender<DataCommand>,
}

/// [`Protocol`] implementation over a single WebSocket connection.
pub struct WebSocketProtocol {
    config: Arc<WsConfig>,
    shared: Arc<Shared>,
    channels: Mutex<Option<Channels>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketProtocol {
    /// Create a disconnected protocol. Fails if `config` is invalid.
    pub fn new(config: WsConfig) -> KuzzleResult<Self> {
        config.validate().map_err(KuzzleError::config)?;
        Ok(Self {
            config: Arc::new(config),
            shared: Arc::new(Shared::new()),
            channels: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

#[async_trait]
impl Protocol for WebSocketProtocol {
    fn state(&self) -> TransportState {
        self.shared.state()
    }

    fn send(&self, payload: String) -> KuzzleResult<()> {
        let channels = self.channels.lock();
        let Some(channels) = channels.as_ref() else {
            return Err(KuzzleError::NotConnected);
        };
        channels
            .cmd_tx
            .try_send(DataCommand::Send { payload })
            .map_err(|err| match err {
                TrySendError::Full(_) => KuzzleError::websocket("Send queue is full"),
                TrySendError::Closed(_) => KuzzleError::websocket("Connection closed"),
            })
    }

    async fn connect(&self) -> KuzzleResult<()> {
        if !self
            .shared
            .transition(TransportState::Closed, TransportState::Connecting)
        {
            return match self.shared.state() {
                TransportState::Open => {
                    debug!("Connection already open");
                    Ok(())
                }
                _ => Err(KuzzleError::websocket("Connection attempt already in progress")),
            };
        }

        info!(url = %self.config.url, "Connecting");
        let stream = match timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.as_str()),
        )
        .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                warn!(url = %self.config.url, error = %err, "Connection failed");
                self.shared.set_state(TransportState::Closed);
                return Err(err.into());
            }
            Err(_) => {
                warn!(url = %self.config.url, "Connection timed out");
                self.shared.set_state(TransportState::Closed);
                return Err(KuzzleError::timeout(self.config.connect_timeout));
            }
        };

        let (write, read) = stream.split();
        let (ctrl_tx, mut ctrl_rx) = mpsc::channel(1);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(self.config.command_channel_capacity);
        *self.channels.lock() = Some(Channels { ctrl_tx, cmd_tx });
        self.shared.set_state(TransportState::Open);
        info!(url = %self.config.url, "Connected");

        let config = Arc::clone(&self.config);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let ws_read = read.map(|msg| msg.map_err(KuzzleError::from));
            let ws_write = write.sink_map_err(KuzzleError::from);
            match connection_task(&config, &shared, &mut ctrl_rx, &mut cmd_rx, ws_read, ws_write)
                .await
            {
                Ok(()) => info!("Connection closed"),
                Err(err) => warn!(error = %err, "Connection lost"),
            }
            shared.set_state(TransportState::Closed);
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) -> KuzzleResult<()> {
        let Some(channels) = self.channels.lock().take() else {
            return Ok(());
        };
        let _ = channels.ctrl_tx.try_send(ControlCommand::Close);
        drop(channels);

        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "Connection task failed");
        }
        Ok(())
    }

    fn add_listener(&self, listener: Weak<dyn ProtocolListener>) {
        self.shared.add_listener(listener);
    }
}

impl Drop for WebSocketProtocol {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Drive one connection until it closes.
///
/// Returns `Ok` after a local close request and an error when the peer or
/// the network ended the connection.
pub(crate) async fn connection_task<R, W>(
    config: &WsConfig,
    shared: &Shared,
    ctrl_rx: &mut mpsc::Receiver<ControlCommand>,
    cmd_rx: &mut mpsc::Receiver<DataCommand>,
    mut ws_read: R,
    mut ws_write: W,
) -> KuzzleResult<()>
where
    R: Stream<Item = KuzzleResult<Message>> + Unpin,
    W: Sink<Message, Error = KuzzleError> + Unpin,
{
    let mut ping_interval = tokio::time::interval(config.ping_interval);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            biased;
            ctrl = ctrl_rx.recv() => {
                match ctrl {
                    Some(ControlCommand::Close) | None => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(DataCommand::Send { payload }) => {
                        if let Err(err) = ws_write.send(Message::Text(payload)).await {
                            return Err(KuzzleError::websocket(format!(
                                "Failed to send message: {err}"
                            )));
                        }
                    }
                    None => return Ok(()),
                }
            }
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        let msg_size = match &msg {
                            Message::Text(t) => t.len(),
                            Message::Binary(b) => b.len(),
                            _ => 0,
                        };
                        if config.max_message_size > 0 && msg_size > config.max_message_size {
                            warn!(
                                size = msg_size,
                                max = config.max_message_size,
                                "Dropping oversized WebSocket message"
                            );
                            continue;
                        }

                        match msg {
                            Message::Text(text) => shared.dispatch(&text),
                            Message::Binary(data) => match String::from_utf8(data) {
                                Ok(text) => shared.dispatch(&text),
                                Err(err) => warn!(error = %err, "Dropping non UTF-8 binary message"),
                            },
                            Message::Pong(_) => last_pong = Instant::now(),
                            Message::Close(frame) => {
                                let reason = frame
                                    .map(|frame| frame.reason.to_string())
                                    .filter(|reason| !reason.is_empty());
                                debug!(?reason, "Server closed the connection");
                                return Err(KuzzleError::connection_lost(reason));
                            }
                            // tungstenite queues the pong reply itself.
                            Message::Ping(_) | Message::Frame(_) => {}
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "WebSocket read error");
                        return Err(err);
                    }
                    None => {
                        return Err(KuzzleError::connection_lost(None));
                    }
                }
            }
            _ = ping_interval.tick() => {
                if last_pong.elapsed() > config.ping_interval + config.pong_timeout {
                    return Err(KuzzleError::connection_lost(Some("Pong timeout".to_string())));
                }
                if let Err(err) = ws_write.send(Message::Ping(Vec::new())).await {
                    debug!(error = %err, "Failed to send ping");
                }
            }
        }
    }
}
