//! Lifecycle of one client connection:
//! `Connecting -> LoggingIn -> Active -> Closed`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::config::RelayConfig;
use crate::conn::{Connection, LineReader};
use crate::error::RelayError;
use crate::protocol::{self, Inbound};
use crate::registry::Session;
use crate::state::RelayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    LoggingIn,
    Active,
    Closed,
}

impl Phase {
    /// `Closed` is reachable from anywhere and never left.
    pub fn can_enter(self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Closed, _) => false,
            (_, Phase::Closed) => true,
            (Phase::Connecting, Phase::LoggingIn) | (Phase::LoggingIn, Phase::Active) => true,
            _ => false,
        }
    }
}

fn advance(peer: SocketAddr, phase: &mut Phase, next: Phase) {
    debug_assert!(phase.can_enter(next), "{phase:?} -> {next:?}");
    trace!(%peer, from = ?*phase, to = ?next, "phase change");
    *phase = next;
}

pub async fn handle(state: RelayState, socket: TcpStream, peer: SocketAddr) -> Result<(), RelayError> {
    let _ = socket.set_nodelay(true);
    let (reader, writer) = socket.into_split();

    serve(state, reader, writer, peer).await
}

/// Drive one connection from handshake to close over any transport.
pub async fn serve<R, W>(
    state: RelayState,
    reader: R,
    writer: W,
    peer: SocketAddr,
) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut phase = Phase::Connecting;

    let conn = Connection::spawn(
        peer,
        writer,
        state.config.max_outbound_queue_depth,
        state.shutdown.connection_token(),
    );
    let mut lines = LineReader::new(reader, state.config.max_line_bytes);

    advance(peer, &mut phase, Phase::LoggingIn);

    let login = tokio::select! {
        _ = conn.closed() => Err(RelayError::ConnectionClosed),
        res = handshake(&mut lines, &state.config) => res,
    };

    let session = match login.and_then(|name| state.registry.register(&name, conn.clone())) {
        Ok(session) => session,
        Err(err) => {
            debug!(%peer, ?phase, error = %err, "closing before login");
            advance(peer, &mut phase, Phase::Closed);
            conn.close();
            return Err(err);
        }
    };

    advance(peer, &mut phase, Phase::Active);
    info!(%peer, session = %session.id, username = %session.username, "logged in");

    if state.config.presence_notices {
        let welcome = protocol::encode_notice(&format!("welcome {}!", session.username));
        let _ = session.connection.send_line(welcome.into());
        state
            .dispatcher
            .announce(&format!("{} joined", session.username), Some(&session.id));
    }

    let outcome = read_loop(&state, &session, &mut lines).await;

    advance(peer, &mut phase, Phase::Closed);
    // The dispatcher may already have unregistered a slow recipient; the
    // departure is announced either way.
    state.registry.unregister(&session.id);
    session.connection.close();

    if state.config.presence_notices {
        state
            .dispatcher
            .announce(&format!("{} left", session.username), None);
    }

    info!(
        %peer,
        session = %session.id,
        username = %session.username,
        connected_for = ?session.connected_at.elapsed(),
        "session closed"
    );

    outcome
}

/// Wait for a valid `LOGIN:` line and return the username. Blank lines are
/// skipped; anything else before the login is malformed.
pub async fn handshake<R: AsyncRead + Unpin>(
    lines: &mut LineReader<R>,
    config: &RelayConfig,
) -> Result<String, RelayError> {
    let deadline = config.login_timeout();

    let login = async {
        loop {
            match lines.read_line().await? {
                None => return Err(RelayError::ConnectionClosed),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return protocol::decode_login(&line, config.max_username_chars),
            }
        }
    };

    timeout(deadline, login)
        .await
        .unwrap_or_else(|_| Err(RelayError::LoginTimeout(deadline)))
}

async fn read_loop<R: AsyncRead + Unpin>(
    state: &RelayState,
    session: &Session,
    lines: &mut LineReader<R>,
) -> Result<(), RelayError> {
    let idle = state.config.idle_timeout();

    loop {
        let next = tokio::select! {
            _ = session.connection.closed() => return Ok(()),
            next = next_line(lines, idle) => next?,
        };

        let Some(line) = next else {
            return Ok(());
        };

        if line.trim().is_empty() {
            continue;
        }

        match protocol::parse_inbound(&line) {
            Inbound::Quit => {
                debug!(session = %session.id, "client quit");
                return Ok(());
            }

            Inbound::Users => {
                let users = state.registry.usernames();
                reply(session, protocol::encode_user_list(&users))?;
            }

            Inbound::Private { to, text } => match state.dispatcher.whisper(session, to, text) {
                Some(delivery) => trace!(
                    session = %session.id,
                    to,
                    delivered = delivery.delivered,
                    "private line relayed"
                ),
                None => reply(session, protocol::encode_notice(&format!("{to} is not online")))?,
            },

            Inbound::Usage(usage) => reply(session, protocol::encode_notice(usage))?,

            Inbound::Chat(text) => {
                let delivery = state.dispatcher.broadcast(session, text);
                trace!(
                    session = %session.id,
                    delivered = delivery.delivered,
                    dropped = delivery.dropped,
                    "chat line relayed"
                );
            }
        }
    }
}

/// Answer on the requester's own connection only.
fn reply(session: &Session, line: String) -> Result<(), RelayError> {
    session.connection.send_line(line.into())
}

async fn next_line<R: AsyncRead + Unpin>(
    lines: &mut LineReader<R>,
    idle: Option<Duration>,
) -> Result<Option<String>, RelayError> {
    match idle {
        Some(limit) => timeout(limit, lines.read_line())
            .await
            .unwrap_or_else(|_| Err(RelayError::IdleTimeout(limit))),
        None => lines.read_line().await,
    }
}
