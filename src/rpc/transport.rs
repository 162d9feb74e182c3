//! Async byte-stream driver for a [`Session`].
//!
//! The transport moves bytes between the wire and a session:
//!
//! - reads chunks of arbitrary size from the byte source and feeds them in
//! - writes every queued frame to the byte sink, in order, then flushes
//! - sweeps expired pending calls when a timeout is configured
//! - closes the session between reads when asked to shut down
//!
//! Over stdio, stdin is the byte source and stdout the sink; stderr is left
//! for logging.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdin, Stdout};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::config::SessionConfig;
use crate::rpc::error::SessionResult;
use crate::rpc::session::Session;

/// Connects a session to an async byte source and sink.
pub struct Transport<R, W> {
    /// The byte source.
    reader: R,
    /// The byte sink.
    writer: W,
    /// Read buffer, sized from the configuration.
    buffer: Vec<u8>,
    /// Time between expiry sweeps.
    sweep_interval: Duration,
}

impl Transport<Stdin, Stdout> {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn stdio(config: &SessionConfig) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), config)
    }
}

impl<R, W> Transport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a transport over the given source and sink.
    #[must_use]
    pub fn new(reader: R, writer: W, config: &SessionConfig) -> Self {
        Self {
            reader,
            writer,
            buffer: vec![0; config.read_buffer_bytes.max(1)],
            sweep_interval: config.sweep_interval(),
        }
    }

    /// Returns the source and sink.
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Writes every frame the session has queued, then flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn flush(&mut self, session: &mut Session) -> SessionResult<()> {
        let frames = session.take_outgoing();
        if frames.is_empty() {
            return Ok(());
        }
        for frame in &frames {
            self.writer.write_all(frame).await?;
        }
        self.writer.flush().await?;
        trace!(frames = frames.len(), "frames written");
        Ok(())
    }

    /// Runs until the input ends or the session is closed.
    ///
    /// Frames queued before the call (for example an opening request) are
    /// written first.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, on a fatal framing error, or if the
    /// input ends mid-frame. Replies produced before the error are written.
    pub async fn run(&mut self, session: &mut Session) -> SessionResult<()> {
        self.run_until(session, std::future::pending()).await
    }

    /// Runs like [`run`](Self::run), shutting the session down gracefully
    /// once `shutdown` completes.
    ///
    /// `shutdown` only competes with reading and the expiry sweep. Frames
    /// being written when it completes are finished first, and everything
    /// still queued is written before returning.
    ///
    /// # Errors
    ///
    /// Returns any error from [`run`](Self::run), or a write error while
    /// flushing on shutdown.
    pub async fn run_until<F>(&mut self, session: &mut Session, shutdown: F) -> SessionResult<()>
    where
        F: Future<Output = ()>,
    {
        self.flush(session).await?;

        let mut sweep = session.pending_timeout().map(|_| {
            let mut interval = time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                read = self.reader.read(&mut self.buffer) => {
                    if !self.on_read(session, read?).await? {
                        return Ok(());
                    }
                }

                () = tick(&mut sweep) => {
                    session.expire_pending(Instant::now());
                }

                () = &mut shutdown => {
                    info!("closing session on shutdown request");
                    session.shutdown();
                    return self.flush(session).await;
                }
            }
        }
    }

    /// Runs like [`run`](Self::run), shutting the session down gracefully on
    /// SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed, or any error
    /// from [`run_until`](Self::run_until).
    #[cfg(unix)]
    pub async fn run_until_signal(&mut self, session: &mut Session) -> SessionResult<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let signalled = async move {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }

                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        };

        self.run_until(session, signalled).await
    }

    /// Runs like [`run`](Self::run), shutting the session down gracefully on
    /// Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns any error from [`run_until`](Self::run_until).
    #[cfg(windows)]
    pub async fn run_until_signal(&mut self, session: &mut Session) -> SessionResult<()> {
        let signalled = async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!(%error, "Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, initiating graceful shutdown");
        };

        self.run_until(session, signalled).await
    }

    /// Handles one completed read. Returns `false` when the loop should stop.
    async fn on_read(&mut self, session: &mut Session, n: usize) -> SessionResult<bool> {
        if n == 0 {
            debug!("input closed");
            let finished = session.finish();
            self.flush(session).await?;
            finished?;
            return Ok(false);
        }

        let fed = session.feed(&self.buffer[..n]);
        self.flush(session).await?;
        let outcomes = fed?;
        trace!(bytes = n, messages = outcomes.len(), "chunk processed");

        Ok(!session.is_closed())
    }
}

/// Waits for the next sweep, or forever when expiry is disabled.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error::{FrameError, SessionError};
    use crate::rpc::FrameDecoder;
    use serde_json::{json, Value};

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    fn decode(bytes: &[u8]) -> Vec<Value> {
        FrameDecoder::new().feed(bytes).map(Result::unwrap).collect()
    }

    fn small_reads() -> SessionConfig {
        SessionConfig {
            read_buffer_bytes: 7,
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn answers_requests_until_eof() {
        let mut input = frame(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        input.extend(frame(r#"{"jsonrpc":"2.0","id":2,"method":"missing"}"#));

        let config = small_reads();
        let mut session = Session::new(&config);
        session.on_request("ping", |_, _| Ok(json!("pong")));

        let mut transport = Transport::new(input.as_slice(), Vec::new(), &config);
        transport.run(&mut session).await.unwrap();

        let (_, written) = transport.into_parts();
        let replies = decode(&written);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["result"], "pong");
        assert_eq!(replies[1]["error"]["code"], -32601);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn writes_queued_request_first() {
        let config = SessionConfig::default();
        let mut session = Session::new(&config);
        let id = session.request("initialize", None).unwrap();

        let mut transport = Transport::new(&b""[..], Vec::new(), &config);
        transport.run(&mut session).await.unwrap();

        let (_, written) = transport.into_parts();
        let sent = decode(&written);
        assert_eq!(sent[0]["method"], "initialize");
        assert_eq!(sent[0]["id"], serde_json::to_value(&id).unwrap());
    }

    #[tokio::test]
    async fn scripted_chunks_are_reassembled() {
        let input = frame(r#"{"id":"a","method":"echo","params":[1,2]}"#);
        let (head, tail) = input.split_at(20);
        let reader = tokio_test::io::Builder::new()
            .read(&head[..5])
            .read(&head[5..])
            .read(tail)
            .build();

        let config = SessionConfig::default();
        let mut session = Session::new(&config);
        session.on_request("echo", |_, params| Ok(params.unwrap_or(Value::Null)));

        let mut transport = Transport::new(reader, Vec::new(), &config);
        transport.run(&mut session).await.unwrap();

        let (_, written) = transport.into_parts();
        assert_eq!(decode(&written)[0]["result"], json!([1, 2]));
    }

    #[tokio::test]
    async fn truncated_input_still_flushes_replies() {
        let mut input = frame(r#"{"id":1,"method":"missing"}"#);
        input.extend_from_slice(b"Content-Length: 40\r\n\r\n{\"id\"");

        let config = small_reads();
        let mut session = Session::new(&config);
        let mut transport = Transport::new(input.as_slice(), Vec::new(), &config);

        let err = transport.run(&mut session).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Framing(FrameError::Truncated { .. })
        ));

        let (_, written) = transport.into_parts();
        assert_eq!(decode(&written).len(), 1);
    }

    #[tokio::test]
    async fn shutdown_between_reads_writes_whole_frames() {
        let (mut peer, local) = tokio::io::duplex(4096);
        let mut input = frame(r#"{"id":1,"method":"ping"}"#);
        input.extend(frame(r#"{"id":2,"method":"ping"}"#));
        peer.write_all(&input).await.unwrap();

        let config = small_reads();
        let mut session = Session::new(&config);
        session.on_request("ping", |cx, _| {
            cx.notify("progress", Some(json!({"done": true})))
                .map_err(|e| crate::rpc::ResponseError::internal_error(e.to_string()))?;
            Ok(json!({}))
        });
        session.request("initialize", None).unwrap();

        // the peer stays connected; only the shutdown future ends the run
        let mut transport = Transport::new(local, Vec::new(), &config);
        transport
            .run_until(&mut session, tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(session.is_closed());
        assert!(session.pending().is_empty());

        let (_, written) = transport.into_parts();
        let mut decoder = FrameDecoder::new();
        let sent: Vec<Value> = decoder.feed(&written).map(Result::unwrap).collect();
        assert!(decoder.finish().is_ok());
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0]["method"], "initialize");
        assert_eq!(sent[1]["method"], "progress");
        assert_eq!(sent[2]["id"], 1);
        assert_eq!(sent[3]["method"], "progress");
        assert_eq!(sent[4]["id"], 2);
        drop(peer);
    }

    #[tokio::test]
    async fn immediate_shutdown_still_writes_queued_frames() {
        let (_peer, local) = tokio::io::duplex(64);

        let config = SessionConfig::default();
        let mut session = Session::new(&config);
        session.notify("first", None).unwrap();
        session.notify("second", None).unwrap();

        let mut transport = Transport::new(local, Vec::new(), &config);
        transport
            .run_until(&mut session, std::future::ready(()))
            .await
            .unwrap();

        let (_, written) = transport.into_parts();
        let sent = decode(&written);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["method"], "first");
        assert_eq!(sent[1]["method"], "second");
        assert!(matches!(session.notify("third", None), Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn exit_notification_stops_the_loop() {
        let mut input = frame(r#"{"method":"exit"}"#);
        // not dispatched: the session closes first
        input.extend(frame(r#"{"id":9,"method":"ping"}"#));

        let config = SessionConfig::default();
        let mut session = Session::new(&config);
        session.on_request("ping", |_, _| Ok(Value::Null));
        session.on_notification("exit", |cx, _| {
            cx.request_shutdown();
            Ok(())
        });

        let mut transport = Transport::new(input.as_slice(), Vec::new(), &config);
        transport.run(&mut session).await.unwrap();

        let (_, written) = transport.into_parts();
        assert!(written.is_empty());
    }
}
