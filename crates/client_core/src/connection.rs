//! Connection lifecycle: connect, detect loss, reconnect with linear
//! backoff, and (re-)announce the subscription intent on every open.
//!
//! All socket work happens on one driver task. The public
//! [`ConnectionManager`] only records intent and posts commands, so frames,
//! announcements and observer callbacks are strictly sequential.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use shared::{domain::ClientId, protocol::ClientMessage};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::SyncConfig,
    dispatcher::NotificationDispatcher,
    error::SyncError,
    transport::{Connector, FrameSink, TransportConnection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Retries exhausted; only an explicit `open` leaves this state.
    Failed,
}

#[derive(Debug)]
enum Command {
    Open(ClientId),
    Announce,
    Close,
}

pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    intent: watch::Sender<Option<String>>,
    state: watch::Receiver<ConnectionState>,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Starts the driver task. Must be called from within a tokio runtime.
    pub fn spawn(
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let driver = Driver {
            config: config.clone(),
            base_delay: config.reconnect_base_delay(),
            max_attempts: config.max_reconnect_attempts.max(1),
            connector,
            dispatcher,
            commands: commands_rx,
            intent: intent_rx,
            state: state_tx,
            client_id: None,
            attempts: 0,
            after_loss: false,
        };

        Self {
            commands: commands_tx,
            intent: intent_tx,
            state: state_rx,
            driver: tokio::spawn(driver.run()),
        }
    }

    /// Ensures a live or in-progress connection for `client_id`. A no-op
    /// while already open or connecting for the same id; leaves `Failed`
    /// with a fresh attempt counter.
    pub fn open(&self, client_id: ClientId) -> Result<(), SyncError> {
        self.post(Command::Open(client_id))
    }

    /// Records `path` as the one path of interest. Announced right away when
    /// open, otherwise on the next successful open.
    pub fn set_subscription(&self, path: impl Into<String>) -> Result<(), SyncError> {
        self.intent.send_replace(Some(path.into()));
        self.post(Command::Announce)
    }

    /// Drops the connection and suppresses automatic reconnection.
    pub fn close(&self) -> Result<(), SyncError> {
        self.post(Command::Close)
    }

    pub fn subscription(&self) -> Option<String> {
        self.intent.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn post(&self, command: Command) -> Result<(), SyncError> {
        self.commands.send(command).map_err(|_| SyncError::Shutdown)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

enum Next {
    Idle,
    Connect,
    Backoff(Duration),
    Serve(TransportConnection),
    Exit,
}

struct Driver {
    config: SyncConfig,
    base_delay: Duration,
    max_attempts: u32,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<NotificationDispatcher>,
    commands: mpsc::UnboundedReceiver<Command>,
    intent: watch::Receiver<Option<String>>,
    state: watch::Sender<ConnectionState>,
    client_id: Option<ClientId>,
    /// Consecutive failed connects since the last successful open.
    attempts: u32,
    /// The current retry series began with the loss of an open connection,
    /// so every connect in it is a reconnect and waits before it runs.
    after_loss: bool,
}

impl Driver {
    async fn run(mut self) {
        let mut next = Next::Idle;
        loop {
            next = match next {
                Next::Idle => self.idle().await,
                Next::Connect => self.connect().await,
                Next::Backoff(delay) => self.backoff(delay).await,
                Next::Serve(connection) => self.serve(connection).await,
                Next::Exit => break,
            };
        }
        debug!("sync: connection driver stopped");
    }

    async fn idle(&mut self) -> Next {
        loop {
            match self.commands.recv().await {
                None => return Next::Exit,
                Some(Command::Open(client_id)) => return self.start(client_id),
                Some(Command::Announce) => {
                    debug!("sync: not connected, subscription will be announced on open");
                }
                Some(Command::Close) => self.set_state(ConnectionState::Disconnected),
            }
        }
    }

    async fn connect(&mut self) -> Next {
        let Some(client_id) = self.client_id.clone() else {
            return Next::Idle;
        };
        let url = match self.config.ws_url(&client_id) {
            Ok(url) => url,
            Err(err) => {
                error!(%err, "sync: cannot build socket url");
                self.set_state(ConnectionState::Failed);
                return Next::Idle;
            }
        };

        self.set_state(ConnectionState::Connecting);
        let attempt = self.attempts + 1;
        info!(%client_id, %url, attempt, "sync: connecting");

        let connector = Arc::clone(&self.connector);
        let connecting = connector.connect(&url);
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(connection) => Next::Serve(connection),
                        Err(err) => {
                            warn!(%client_id, attempt, err = %format!("{err:#}"), "sync: connect failed");
                            self.schedule_retry()
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    None => return Next::Exit,
                    Some(Command::Open(requested)) if requested != client_id => {
                        return self.start(requested);
                    }
                    Some(Command::Open(_)) => debug!("sync: open already in progress"),
                    Some(Command::Announce) => {}
                    Some(Command::Close) => {
                        info!(%client_id, "sync: connect abandoned by close");
                        self.set_state(ConnectionState::Disconnected);
                        return Next::Idle;
                    }
                },
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Next {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Next::Connect,
                command = self.commands.recv() => match command {
                    None => return Next::Exit,
                    Some(Command::Open(requested)) if Some(&requested) != self.client_id.as_ref() => {
                        return self.start(requested);
                    }
                    Some(Command::Open(_)) => debug!("sync: reconnect already scheduled"),
                    Some(Command::Announce) => {}
                    Some(Command::Close) => {
                        info!("sync: pending reconnect cancelled by close");
                        self.set_state(ConnectionState::Disconnected);
                        return Next::Idle;
                    }
                },
            }
        }
    }

    async fn serve(&mut self, connection: TransportConnection) -> Next {
        let TransportConnection {
            mut sink,
            mut stream,
        } = connection;
        self.attempts = 0;
        self.set_state(ConnectionState::Open);
        info!(client_id = ?self.client_id, "sync: connection open");

        // Path already announced on this connection.
        let mut announced: Option<String> = None;
        self.announce(&mut sink, &mut announced).await;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        self.dispatcher.dispatch_frame(&text);
                    }
                    Some(Err(err)) => {
                        warn!(err = %format!("{err:#}"), "sync: connection lost");
                        return self.schedule_reconnect();
                    }
                    None => {
                        warn!("sync: connection closed by server");
                        return self.schedule_reconnect();
                    }
                },
                command = self.commands.recv() => match command {
                    None => {
                        let _ = sink.close().await;
                        return Next::Exit;
                    }
                    Some(Command::Open(requested)) if Some(&requested) != self.client_id.as_ref() => {
                        if let Err(err) = sink.close().await {
                            debug!(%err, "sync: error while closing superseded connection");
                        }
                        return self.start(requested);
                    }
                    Some(Command::Open(_)) => debug!("sync: already open"),
                    Some(Command::Announce) => self.announce(&mut sink, &mut announced).await,
                    Some(Command::Close) => {
                        if let Err(err) = sink.close().await {
                            debug!(%err, "sync: error while closing connection");
                        }
                        self.set_state(ConnectionState::Disconnected);
                        info!(client_id = ?self.client_id, "sync: connection closed by client");
                        return Next::Idle;
                    }
                },
            }
        }
    }

    /// Sends the current intent unless this connection already carries it.
    /// Send failures are swallowed: the intent stays recorded and goes out
    /// again on the next open.
    async fn announce(&self, sink: &mut FrameSink, announced: &mut Option<String>) {
        let Some(path) = self.intent.borrow().clone() else {
            return;
        };
        if announced.as_deref() == Some(path.as_str()) {
            return;
        }
        let frame = match serde_json::to_string(&ClientMessage::subscribe(path.clone())) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "sync: failed to encode subscribe message");
                return;
            }
        };
        match sink.send(frame).await {
            Ok(()) => {
                info!(%path, "sync: subscription announced");
                *announced = Some(path);
            }
            Err(err) => {
                warn!(%path, err = %format!("{err:#}"), "sync: subscription announce failed, retrying on next open");
            }
        }
    }

    fn start(&mut self, client_id: ClientId) -> Next {
        self.client_id = Some(client_id);
        self.attempts = 0;
        self.after_loss = false;
        Next::Connect
    }

    /// An open connection went away. The loss itself is not a failed
    /// attempt; reconnect #1 runs after one base delay.
    fn schedule_reconnect(&mut self) -> Next {
        self.attempts = 0;
        self.after_loss = true;
        self.set_state(ConnectionState::Disconnected);
        info!(
            attempt = 1,
            delay_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX),
            "sync: reconnect scheduled"
        );
        Next::Backoff(self.base_delay)
    }

    /// A connect failed. Gives up once `max_attempts` connects in a row have
    /// failed, otherwise waits `base × n` before retry `n` of the series.
    fn schedule_retry(&mut self) -> Next {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            error!(
                attempts = self.attempts,
                "sync: giving up after repeated connection failures"
            );
            self.set_state(ConnectionState::Failed);
            return Next::Idle;
        }

        let step = self.attempts + u32::from(self.after_loss);
        let delay = self.base_delay * step;
        self.set_state(ConnectionState::Disconnected);
        info!(
            attempt = self.attempts + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "sync: reconnect scheduled"
        );
        Next::Backoff(delay)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, current = ?state, "sync: connection state changed");
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
