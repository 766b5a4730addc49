//! Scoped ownership of the rosbridge socket.
//!
//! [`ConnectionManager::acquire`] returns a [`Scope`] that holds the
//! manager's socket lock for its whole life, so concurrent callers serialize
//! and at most one operation touches the socket at a time. Dropping the
//! scope always releases the socket, including on error paths.

use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::config::{ClientConfig, ConnectionConfig};
use crate::error::{ClientError, ClientResult};
use crate::frame::{Frame, Operation};
use crate::state::{ConnectionState, SharedState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open socket and the target it was opened against.
struct OpenSocket {
    ws: WsStream,
    target: ConnectionConfig,
}

/// Owner of the single rosbridge connection.
pub struct ConnectionManager {
    config: ClientConfig,
    target: parking_lot::Mutex<ConnectionConfig>,
    slot: Mutex<Option<OpenSocket>>,
    state: SharedState,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &*self.target.lock())
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until [`acquire`](Self::acquire).
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let target = config.target.clone();
        Self {
            config,
            target: parking_lot::Mutex::new(target),
            slot: Mutex::new(None),
            state: SharedState::new(ConnectionState::Closed),
        }
    }

    /// Client-wide settings.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the current target.
    #[must_use]
    pub fn target(&self) -> ConnectionConfig {
        self.target.lock().clone()
    }

    /// Change the target. Takes effect on the next [`acquire`](Self::acquire);
    /// an open connection is left untouched.
    pub fn set_target(&self, ip: impl Into<String>, port: u16) {
        let mut target = self.target.lock();
        target.ip = ip.into();
        target.port = port;
        info!(url = %target.url(), "rosbridge target updated");
    }

    /// Change the default timeout used by subsequent scopes.
    pub fn set_default_timeout(&self, default_timeout: Duration) {
        self.target.lock().default_timeout = default_timeout;
    }

    /// Current socket state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Open a scope on the connection.
    ///
    /// Waits for any other scope to finish, then reuses a parked socket for
    /// the current target or connects a new one.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the connection cannot be
    /// established within the connect timeout.
    pub async fn acquire(&self) -> ClientResult<Scope<'_>> {
        let mut slot = self.slot.lock().await;
        let target = self.target();

        if slot
            .as_ref()
            .is_some_and(|open| !open.target.same_endpoint(&target))
        {
            debug!("dropping parked socket for previous target");
            *slot = None;
        }

        if let Some(open) = slot.as_mut() {
            if !drain_pending(&mut open.ws) {
                debug!("parked socket closed by bridge");
                *slot = None;
            }
        }

        if slot.is_none() {
            let ws = self.connect(&target).await?;
            *slot = Some(OpenSocket {
                ws,
                target: target.clone(),
            });
        } else {
            debug!(url = %target.url(), "reusing parked rosbridge socket");
        }
        self.state.store(ConnectionState::Open);

        Ok(Scope {
            manager: self,
            slot,
            default_timeout: target.default_timeout,
            released: false,
        })
    }

    async fn connect(&self, target: &ConnectionConfig) -> ClientResult<WsStream> {
        let url = target.url();
        debug!(url = %url, "connecting to rosbridge");
        self.state.store(ConnectionState::Connecting);

        let connected = timeout(self.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ClientError::Connection(format!("timed out connecting to {url}")))
            .and_then(|result| {
                result.map_err(|e| ClientError::Connection(format!("failed to connect to {url}: {e}")))
            });

        match connected {
            Ok((ws, _response)) => {
                info!(url = %url, "connected to rosbridge");
                Ok(ws)
            }
            Err(e) => {
                self.state.store(ConnectionState::Failed);
                Err(e)
            }
        }
    }
}

/// Exclusive use of the open connection.
///
/// Obtained from [`ConnectionManager::acquire`]. Call [`release`](Self::release)
/// for a graceful close; dropping the scope closes the socket without the
/// WebSocket close handshake.
pub struct Scope<'a> {
    manager: &'a ConnectionManager,
    slot: MutexGuard<'a, Option<OpenSocket>>,
    default_timeout: Duration,
    released: bool,
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("open", &self.is_open())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Scope<'_> {
    /// Timeout of the target this scope was opened against.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Client-wide settings.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.manager.config
    }

    /// Whether the socket is still usable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.slot.is_some()
    }

    fn socket(&mut self) -> ClientResult<&mut WsStream> {
        self.slot
            .as_mut()
            .map(|open| &mut open.ws)
            .ok_or_else(|| ClientError::Connection("connection closed".into()))
    }

    fn drop_socket(&mut self) {
        if self.slot.take().is_some() {
            self.manager.state.store(ConnectionState::Closed);
        }
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the socket is closed or the
    /// write fails; the socket is discarded in that case.
    pub async fn send(&mut self, op: &Operation) -> ClientResult<()> {
        let json = op.to_json()?;
        let ws = self.socket()?;
        let sent = ws.send(Message::Text(json.into())).await;
        if let Err(e) = sent {
            self.drop_socket();
            return Err(ClientError::Connection(format!("failed to send {}: {e}", op.name())));
        }
        debug!(op = op.name(), id = op.id(), "sent frame");
        Ok(())
    }

    /// Wait up to `wait` for the next frame.
    ///
    /// `Ok(None)` means nothing usable arrived: either the wait elapsed or
    /// the frame could not be decoded.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the bridge closed the socket or
    /// the read failed.
    pub async fn receive(&mut self, wait: Duration) -> ClientResult<Option<Frame>> {
        self.receive_for(wait, None).await
    }

    /// Like [`receive`](Self::receive), decoding `publish` events for
    /// `expected_type` along the image path when it names an image type.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the bridge closed the socket or
    /// the read failed.
    pub async fn receive_for(
        &mut self,
        wait: Duration,
        expected_type: Option<&str>,
    ) -> ClientResult<Option<Frame>> {
        let ws = self.socket()?;
        let next = match timeout(wait, ws.next()).await {
            Err(_) => return Ok(None),
            Ok(next) => next,
        };

        match next {
            Some(Ok(Message::Close(frame))) => {
                self.drop_socket();
                let reason = frame.map_or_else(String::new, |f| format!(": {}", f.reason));
                Err(ClientError::Connection(format!("connection closed by bridge{reason}")))
            }
            Some(Ok(message)) => {
                let frame = codec::decode(&message, expected_type);
                trace!(kind = ?frame.as_ref().map(Frame::kind), "received frame");
                Ok(frame)
            }
            Some(Err(e)) => {
                self.drop_socket();
                Err(e.into())
            }
            None => {
                self.drop_socket();
                Err(ClientError::Connection("connection closed by bridge".into()))
            }
        }
    }

    /// Release the scope, closing the socket gracefully unless keep-alive
    /// is enabled, in which case the socket is parked for the next scope.
    pub async fn release(mut self) {
        self.released = true;
        if self.manager.config.keep_alive && self.slot.is_some() {
            self.manager.state.store(ConnectionState::Parked);
            trace!("parked rosbridge socket");
            return;
        }
        if let Some(mut open) = self.slot.take() {
            if let Err(e) = open.ws.close(None).await {
                warn!(error = %e, "error closing rosbridge socket");
            }
            debug!(url = %open.target.url(), "closed rosbridge socket");
        }
        self.manager.state.store(ConnectionState::Closed);
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.drop_socket();
            self.manager.state.store(ConnectionState::Closed);
        }
    }
}

/// Discard frames already received on a parked socket, such as `publish`
/// events that were in flight when the previous scope unsubscribed. Frames
/// still on the wire are not seen.
///
/// Returns `false` if the bridge closed the socket while it was parked.
fn drain_pending(ws: &mut WsStream) -> bool {
    let mut discarded = 0usize;
    loop {
        match ws.next().now_or_never() {
            None => break,
            Some(Some(Ok(Message::Close(_)) | Err(_)) | None) => return false,
            Some(Some(Ok(_))) => discarded += 1,
        }
    }
    if discarded > 0 {
        debug!(discarded, "discarded stale frames from parked socket");
    }
    true
}

/// Fallback horizon when `now + wait` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `wait` from now, capped at [`FAR_FUTURE`] for waits too large to
/// represent.
pub(crate) fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Time left until `deadline`, or `None` once it has passed.
pub(crate) fn time_left(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}
