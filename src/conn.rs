//! Per-connection transport.
//!
//! Reading belongs to the session's own task through [`LineReader`]. Writing
//! goes through [`Connection`], which any task may share: lines are queued on
//! a bounded channel and a single writer task puts them on the socket, so
//! concurrent broadcasts never interleave partial lines.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RelayError;

/// Newline-framed reader with a per-line size cap.
pub struct LineReader<R> {
    lines: FramedRead<R, LinesCodec>,
    limit: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        // One spare byte lets a `\r` before the newline through the codec; the
        // cap is enforced on the stripped line below.
        let codec = LinesCodec::new_with_max_length(max_line_bytes.saturating_add(1));

        Self {
            lines: FramedRead::new(reader, codec),
            limit: max_line_bytes,
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>, RelayError> {
        match self.lines.next().await {
            None => Ok(None),
            Some(Ok(line)) if line.len() > self.limit => {
                Err(RelayError::LineTooLong { limit: self.limit })
            }
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                Err(RelayError::LineTooLong { limit: self.limit })
            }
            Some(Err(LinesCodecError::Io(err))) => Err(err.into()),
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Line(Arc<str>),
    Finish,
}

/// Write side of one client connection.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    depth: usize,
    closed: CancellationToken,
}

impl Connection {
    /// Start the writer task for `writer`. Cancelling `closed` (directly, via a
    /// parent token, or through [`Connection::close`]) shuts the transport.
    pub fn spawn<W>(
        peer: SocketAddr,
        writer: W,
        depth: usize,
        closed: CancellationToken,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(depth.max(1));

        tokio::spawn(write_loop(writer, rx, closed.clone(), peer));

        Arc::new(Self {
            peer,
            outbound: tx,
            depth,
            closed,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue one line. Never waits: a full queue is reported as backpressure
    /// and the caller decides what to do with this connection.
    pub fn send_line(&self, line: Arc<str>) -> Result<(), RelayError> {
        if self.closed.is_cancelled() {
            return Err(RelayError::ConnectionClosed);
        }

        match self.outbound.try_send(Outbound::Line(line)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(RelayError::WriteBackpressureExceeded { depth: self.depth })
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::ConnectionClosed),
        }
    }

    /// Close once every line queued so far has been written.
    pub fn finish(&self) {
        if self.outbound.try_send(Outbound::Finish).is_err() {
            self.close();
        }
    }

    /// Close now, dropping anything still queued.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the transport is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
    peer: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = rx.recv() => next,
        };

        let line = match next {
            Some(Outbound::Line(line)) => line,
            Some(Outbound::Finish) | None => break,
        };

        let written = tokio::select! {
            _ = closed.cancelled() => break,
            res = write_line(&mut writer, &line) => res,
        };

        if let Err(err) = written {
            debug!(%peer, error = %err, "write failed");
            break;
        }
    }

    closed.cancel();
    let _ = writer.shutdown().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
