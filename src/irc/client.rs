/// Chat connection manager — owns the WebSocket to Twitch's IRC gateway.
///
/// One spawned task per connection owns the socket, the state machine,
/// and the reconnect policy; nothing else ever touches the stream. The
/// task is driven by a `tokio::select!` over the inbound frame stream
/// and a command channel, and publishes typed [`ClientEvent`]s plus a
/// `watch`-broadcast [`ConnectionState`].
///
/// Reconnection: exponential backoff starting at 1 s, capped at 30 s,
/// giving up after 5 consecutive failures without an intervening
/// successful connection. The backoff sleep drains the command channel
/// so an explicit disconnect cancels a pending retry immediately.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use super::event::{
    cap_req_line, classify_line, join_line, nick_line, normalize_channel, pass_line, pong_line,
    privmsg_line, ChatMessage, ServerEvent,
};

/// Twitch's IRC-over-WebSocket gateway.
pub const TWITCH_CHAT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// First retry delay.
const BASE_DELAY_MS: u64 = 1_000;
/// Backoff ceiling.
const CAP_MS: u64 = 30_000;
/// Consecutive failures tolerated before giving up.
const MAX_ATTEMPTS: u32 = 5;
/// Pause between the handshake burst and JOIN, giving the gateway time
/// to process authentication.
const JOIN_DELAY: Duration = Duration::from_millis(1_000);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection lifecycle state. Owned by the connection task; published
/// read-only through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Joining,
    Connected,
    Reconnecting,
    Failed,
}

/// Errors surfaced by [`ChatClient::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("channel must not be empty")]
    EmptyChannel,
    #[error("access token must not be empty")]
    EmptyToken,
    #[error("username must not be empty")]
    EmptyUsername,
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Channel to join (any case, `#` optional — normalized internally).
    pub channel: String,
    /// OAuth access token, without the `oauth:` prefix.
    pub access_token: String,
    /// Bot login name.
    pub username: String,
}

impl ConnectParams {
    fn validate(&self) -> Result<(), ClientError> {
        if self.channel.trim().is_empty() {
            return Err(ClientError::EmptyChannel);
        }
        if self.access_token.trim().is_empty() {
            return Err(ClientError::EmptyToken);
        }
        if self.username.trim().is_empty() {
            return Err(ClientError::EmptyUsername);
        }
        Ok(())
    }
}

/// Events emitted by the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// Our JOIN was echoed back — join confirmed by the server.
    Joined,
    /// A chat message arrived for the active channel.
    Chat(ChatMessage),
    /// The socket dropped; a reconnect attempt will follow if attempts
    /// remain.
    Disconnected { reason: String },
    /// Terminal: reconnection attempts are exhausted. Distinct from
    /// transient [`ClientEvent::Disconnected`] — the caller must start a
    /// fresh connection to recover.
    ReconnectExhausted,
}

enum ClientCommand {
    Send(String),
    Shutdown,
}

/// Handle to a running connection task. Cloning shares the same
/// underlying connection.
#[derive(Clone)]
pub struct ChatClient {
    params: ConnectParams,
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ChatClient {
    /// Connect to Twitch chat. Validates parameters, then spawns the
    /// connection task; returns the handle and the event stream.
    pub fn connect(
        params: ConnectParams,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        Self::connect_to(TWITCH_CHAT_URL, params)
    }

    /// Connect to an explicit gateway URL. Used by tests to point the
    /// client at an in-process server.
    pub fn connect_to(
        url: &str,
        params: ConnectParams,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        params.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // The task sets Connecting on its first poll; seed the watch
        // with it so a handle never observes a stale Disconnected.
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(run(
            url.to_owned(),
            params.clone(),
            cmd_rx,
            event_tx,
            state_tx,
        ));

        Ok((
            ChatClient {
                params,
                cmd_tx,
                state_rx,
            },
            event_rx,
        ))
    }

    /// The parameters this client was started with.
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Send one raw protocol line. Returns `false` without queueing when
    /// not currently connected.
    pub fn send_raw(&self, line: &str) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        self.cmd_tx
            .send(ClientCommand::Send(line.to_owned()))
            .is_ok()
    }

    /// Send a chat message to the joined channel. Same delivery
    /// semantics as [`ChatClient::send_raw`].
    pub fn send_chat(&self, text: &str) -> bool {
        self.send_raw(&privmsg_line(&self.params.channel, text))
    }

    /// Tear the connection down. Cancels any pending reconnect timer,
    /// closes the socket, and ends the task. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Shutdown);
    }
}

/// Owns at most one live connection and applies the replacement rules:
/// connecting with the parameters of an already live connection is a
/// no-op; anything else tears the old connection down first (which also
/// cancels a pending reconnect timer) and starts fresh — including a
/// fresh attempt counter after a terminal [`ConnectionState::Failed`].
#[derive(Default)]
pub struct ChatSession {
    current: Option<ChatClient>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect, replacing any prior connection per the rules above.
    /// Returns `None` when the call was a no-op, otherwise the new
    /// connection's event stream.
    pub fn connect(
        &mut self,
        params: ConnectParams,
    ) -> Result<Option<mpsc::UnboundedReceiver<ClientEvent>>, ClientError> {
        self.connect_to(TWITCH_CHAT_URL, params)
    }

    pub fn connect_to(
        &mut self,
        url: &str,
        params: ConnectParams,
    ) -> Result<Option<mpsc::UnboundedReceiver<ClientEvent>>, ClientError> {
        if let Some(client) = &self.current {
            let live = !matches!(
                client.state(),
                ConnectionState::Disconnected | ConnectionState::Failed
            );
            if live && *client.params() == params {
                return Ok(None);
            }
            client.disconnect();
        }
        let (client, events) = ChatClient::connect_to(url, params)?;
        self.current = Some(client);
        Ok(Some(events))
    }

    pub fn client(&self) -> Option<&ChatClient> {
        self.current.as_ref()
    }

    /// Disconnect and forget the current connection. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(client) = self.current.take() {
            client.disconnect();
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Backoff delay before reconnect attempt `attempt` (1-based):
/// `min(1000 * 2^(attempt-1), 30_000)` milliseconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    let ms = BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(CAP_MS);
    Duration::from_millis(ms)
}

/// Why the connection task stopped.
enum Exit {
    /// Explicit shutdown or all command senders dropped.
    Shutdown,
    /// Reconnect attempts exhausted.
    Exhausted,
}

/// Wait out a backoff delay while draining the command channel.
///
/// Returns `false` to stop reconnecting (Shutdown received or every
/// handle dropped). `Send` commands arriving during backoff are dropped —
/// the send contract is "only while connected, never queued".
async fn backoff_drain(cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>, attempt: u32) -> bool {
    let backoff = tokio::time::sleep(backoff_delay(attempt));
    tokio::pin!(backoff);
    loop {
        tokio::select! {
            _ = &mut backoff => return true,
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Shutdown) | None => return false,
                    Some(ClientCommand::Send(_)) => {} // Not connected — dropped.
                }
            }
        }
    }
}

/// The connection task. Owns the socket and the state machine for the
/// lifetime of this logical connection, reconnecting as needed.
async fn run(
    url: String,
    params: ConnectParams,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let channel = normalize_channel(&params.channel);
    let nick = params.username.to_lowercase();

    let set_state = |state: ConnectionState| {
        state_tx.send_replace(state);
        let _ = event_tx.send(ClientEvent::StateChanged(state));
    };

    let mut attempts: u32 = 0;

    let exit = 'reconnect: loop {
        set_state(ConnectionState::Connecting);

        let mut ws = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(channel, attempt = attempts + 1, "connect failed: {e}");
                // All connect failures retry uniformly — an auth rejection
                // is not distinguished from a network drop here.
                match next_attempt(&mut attempts, &mut cmd_rx, &set_state).await {
                    Retry::Go => continue 'reconnect,
                    Retry::Stop(exit) => break 'reconnect exit,
                }
            }
        };

        info!(channel, "connected to {url}");

        // Handshake burst: authenticate, pick a nick, request tag
        // metadata. Twitch answers PASS/NICK asynchronously; failures
        // show up as a socket close.
        set_state(ConnectionState::Authenticating);
        let handshake = [
            pass_line(&params.access_token),
            nick_line(&params.username),
            cap_req_line(),
        ];
        let mut handshake_ok = true;
        for line in handshake {
            if send_line(&mut ws, &line).await.is_err() {
                handshake_ok = false;
                break;
            }
        }
        if !handshake_ok {
            warn!(channel, "handshake send failed");
            let _ = event_tx.send(ClientEvent::Disconnected {
                reason: "handshake send failed".into(),
            });
            match next_attempt(&mut attempts, &mut cmd_rx, &set_state).await {
                Retry::Go => continue 'reconnect,
                Retry::Stop(exit) => break 'reconnect exit,
            }
        }

        // Give the gateway a beat to process the handshake, then JOIN.
        // The JOIN echo, when it arrives, is a confirmation — not a
        // precondition for Connected.
        set_state(ConnectionState::Joining);
        if !join_delay(&mut cmd_rx).await {
            break 'reconnect Exit::Shutdown;
        }
        if send_line(&mut ws, &join_line(&params.channel)).await.is_err() {
            warn!(channel, "join send failed");
            let _ = event_tx.send(ClientEvent::Disconnected {
                reason: "join send failed".into(),
            });
            match next_attempt(&mut attempts, &mut cmd_rx, &set_state).await {
                Retry::Go => continue 'reconnect,
                Retry::Stop(exit) => break 'reconnect exit,
            }
        }

        set_state(ConnectionState::Connected);
        attempts = 0;

        // Connected loop: relay frames and commands until the socket
        // drops or a shutdown arrives.
        let reason = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ClientCommand::Send(line)) => {
                            if send_line(&mut ws, &line).await.is_err() {
                                break "send failed".to_owned();
                            }
                        }
                        Some(ClientCommand::Shutdown) | None => {
                            let _ = ws.close(None).await;
                            break 'reconnect Exit::Shutdown;
                        }
                    }
                }
                frame = ws.next() => {
                    match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            if let Err(e) =
                                handle_frame(&mut ws, &text, &channel, &nick, &event_tx).await
                            {
                                break format!("send failed: {e}");
                            }
                        }
                        Some(Ok(tungstenite::Message::Ping(payload))) => {
                            if ws.send(tungstenite::Message::Pong(payload)).await.is_err() {
                                break "send failed".to_owned();
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(_))) | None => {
                            break "server closed connection".to_owned();
                        }
                        Some(Ok(_)) => {} // Binary/pong frames — ignored.
                        Some(Err(e)) => break format!("socket error: {e}"),
                    }
                }
            }
        };

        info!(channel, "connection lost: {reason}");
        let _ = event_tx.send(ClientEvent::Disconnected { reason });
        match next_attempt(&mut attempts, &mut cmd_rx, &set_state).await {
            Retry::Go => continue 'reconnect,
            Retry::Stop(exit) => break 'reconnect exit,
        }
    };

    match exit {
        Exit::Shutdown => {
            set_state(ConnectionState::Disconnected);
            debug!(channel, "connection task stopped");
        }
        Exit::Exhausted => {
            let _ = event_tx.send(ClientEvent::ReconnectExhausted);
            set_state(ConnectionState::Failed);
            warn!(channel, "giving up after {MAX_ATTEMPTS} failed attempts");
        }
    }
}

enum Retry {
    Go,
    Stop(Exit),
}

/// Record one failed connect cycle and wait out the backoff.
async fn next_attempt(
    attempts: &mut u32,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    set_state: &impl Fn(ConnectionState),
) -> Retry {
    *attempts += 1;
    if *attempts >= MAX_ATTEMPTS {
        return Retry::Stop(Exit::Exhausted);
    }
    set_state(ConnectionState::Reconnecting);
    if backoff_drain(cmd_rx, *attempts).await {
        Retry::Go
    } else {
        Retry::Stop(Exit::Shutdown)
    }
}

/// Wait out the post-handshake join delay, still honoring shutdown.
/// Returns `false` if a shutdown arrived.
async fn join_delay(cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>) -> bool {
    let delay = tokio::time::sleep(JOIN_DELAY);
    tokio::pin!(delay);
    loop {
        tokio::select! {
            _ = &mut delay => return true,
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Shutdown) | None => return false,
                    Some(ClientCommand::Send(_)) => {} // Not connected yet — dropped.
                }
            }
        }
    }
}

async fn send_line(ws: &mut WsStream, line: &str) -> Result<(), tungstenite::Error> {
    debug!("→ {line}");
    ws.send(tungstenite::Message::Text(format!("{line}\r\n").into()))
        .await
}

/// Process one text frame. A frame may carry several `\r\n`-terminated
/// lines; each is classified independently and unrecognized lines are
/// dropped. Only outbound send failures are errors.
async fn handle_frame(
    ws: &mut WsStream,
    frame: &str,
    channel: &str,
    nick: &str,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
) -> Result<(), tungstenite::Error> {
    for line in frame.split("\r\n").filter(|l| !l.is_empty()) {
        match classify_line(line, channel, nick, unix_ms_now()) {
            Some(ServerEvent::Ping { token }) => {
                send_line(ws, &pong_line(&token)).await?;
            }
            Some(ServerEvent::Joined) => {
                debug!(channel, "join confirmed");
                let _ = event_tx.send(ClientEvent::Joined);
            }
            Some(ServerEvent::Chat(msg)) => {
                let _ = event_tx.send(ClientEvent::Chat(msg));
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_doubles_then_caps() {
        let delays: Vec<u64> = (1..=6).map(|a| backoff_delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    }

    #[test]
    fn backoff_stays_capped() {
        assert_eq!(backoff_delay(20), Duration::from_millis(30_000));
        // Large attempt counts must not overflow.
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn params_validation() {
        let ok = ConnectParams {
            channel: "TestChannel".into(),
            access_token: "token".into(),
            username: "somebot".into(),
        };
        assert!(ok.validate().is_ok());

        let mut p = ok.clone();
        p.channel = "  ".into();
        assert!(matches!(p.validate(), Err(ClientError::EmptyChannel)));

        let mut p = ok.clone();
        p.access_token = String::new();
        assert!(matches!(p.validate(), Err(ClientError::EmptyToken)));

        let mut p = ok;
        p.username = String::new();
        assert!(matches!(p.validate(), Err(ClientError::EmptyUsername)));
    }

    #[tokio::test]
    async fn connect_rejects_empty_params() {
        let result = ChatClient::connect(ConnectParams {
            channel: String::new(),
            access_token: "t".into(),
            username: "u".into(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn session_noop_for_same_live_params_replaces_otherwise() {
        let params = ConnectParams {
            channel: "c".into(),
            access_token: "t".into(),
            username: "u".into(),
        };
        let mut session = ChatSession::new();

        // Nothing listens on the URL; the connection stays in its
        // Connecting/Reconnecting cycle, which counts as live.
        let events = session.connect_to("ws://127.0.0.1:1", params.clone()).unwrap();
        assert!(events.is_some());

        // Same parameters while live: no-op.
        assert!(session
            .connect_to("ws://127.0.0.1:1", params.clone())
            .unwrap()
            .is_none());

        // Different parameters: old connection replaced.
        let mut other = params.clone();
        other.channel = "other".into();
        assert!(session
            .connect_to("ws://127.0.0.1:1", other)
            .unwrap()
            .is_some());
        assert_eq!(session.client().unwrap().params().channel, "other");

        session.disconnect();
        assert!(session.client().is_none());
        session.disconnect(); // Idempotent.
    }

    #[tokio::test]
    async fn send_raw_refused_while_not_connected() {
        let (client, _events) = ChatClient::connect_to(
            "ws://127.0.0.1:1", // Nothing listens here.
            ConnectParams {
                channel: "c".into(),
                access_token: "t".into(),
                username: "u".into(),
            },
        )
        .unwrap();
        assert!(!client.send_raw("PRIVMSG #c :hi"));
        client.disconnect();
    }
}
