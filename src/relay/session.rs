//! Relay session state machine.
//!
//! One session pairs one upstream stream with one client channel:
//!
//! ```text
//! Connecting ──start()──▶ Streaming ──terminate(reason)──▶ Closed
//!      └────────────────terminate(reason)────────────────────┘
//! ```
//!
//! While streaming, a single task selects over upstream chunks, heartbeat
//! ticks, client disconnect and process shutdown, so every write to the
//! client channel happens from one place and in order. `terminate` is the
//! only way out of `Streaming` and runs its teardown at most once.

use std::error::Error as StdError;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::observability::metrics;
use crate::relay::error::error_chain;
use crate::relay::events;

/// Bytes of each chunk echoed to trace logs.
const PREVIEW_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; upstream not attached yet.
    Connecting,
    /// Upstream attached, client response committed.
    Streaming,
    /// All resources released. Terminal.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Upstream finished the stream cleanly.
    UpstreamEnded,
    /// Upstream stream failed after it was established.
    UpstreamFailed(String),
    /// Client went away; nothing more is written.
    ClientDisconnected,
    /// Process is shutting down.
    Shutdown,
}

impl Termination {
    /// In-band frame announcing this termination, if the client gets one.
    fn terminal_frame(&self) -> Option<Bytes> {
        match self {
            Termination::UpstreamEnded => Some(events::closed_by_server()),
            Termination::UpstreamFailed(message) => Some(events::error(message)),
            Termination::ClientDisconnected | Termination::Shutdown => None,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Termination::UpstreamEnded => "upstream_ended",
            Termination::UpstreamFailed(_) => "upstream_failed",
            Termination::ClientDisconnected => "client_disconnected",
            Termination::Shutdown => "shutdown",
        }
    }
}

/// The client channel's receiving side is gone.
#[derive(Debug)]
struct ClientGone;

enum Step {
    Chunk(Bytes),
    Heartbeat,
    Finish(Termination),
}

/// One client ↔ upstream relay.
pub struct RelaySession<S> {
    id: Uuid,
    conversation_id: String,
    state: SessionState,
    upstream: Option<S>,
    client: Option<mpsc::Sender<Bytes>>,
    heartbeat: Option<Interval>,
    termination: Option<Termination>,
}

impl<S, E> RelaySession<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: StdError + 'static,
{
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            state: SessionState::Connecting,
            upstream: None,
            client: None,
            heartbeat: None,
            termination: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why the session ended, once it has.
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Attach the upstream stream and client channel, write the `connected`
    /// event and arm the heartbeat.
    ///
    /// Returns `false` if the session was not `Connecting` or the client was
    /// already gone (the session is then `Closed`).
    pub async fn start(&mut self, upstream: S, client: mpsc::Sender<Bytes>, keepalive: Duration) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }

        self.upstream = Some(upstream);
        self.client = Some(client);
        self.state = SessionState::Streaming;
        metrics::record_session_started();

        tracing::info!(
            session_id = %self.id,
            conversation_id = %self.conversation_id,
            "SSE stream established"
        );

        if self.write(events::connected()).await.is_err() {
            self.terminate(Termination::ClientDisconnected).await;
            return false;
        }

        let mut heartbeat = time::interval_at(Instant::now() + keepalive, keepalive);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
        true
    }

    /// Relay until a termination trigger fires.
    ///
    /// Returns `None` only if the session was never started.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Option<Termination> {
        while self.state == SessionState::Streaming {
            let step = tokio::select! {
                chunk = next_chunk(&mut self.upstream) => match chunk {
                    Some(Ok(bytes)) => Step::Chunk(bytes),
                    Some(Err(e)) => Step::Finish(Termination::UpstreamFailed(error_chain(&e))),
                    None => Step::Finish(Termination::UpstreamEnded),
                },
                _ = next_tick(&mut self.heartbeat) => Step::Heartbeat,
                _ = client_closed(&self.client) => Step::Finish(Termination::ClientDisconnected),
                _ = shutdown.recv() => Step::Finish(Termination::Shutdown),
            };

            match step {
                Step::Chunk(bytes) => self.forward(bytes).await,
                Step::Heartbeat => self.emit_heartbeat().await,
                Step::Finish(reason) => {
                    self.terminate(reason).await;
                }
            }
        }

        self.termination
    }

    /// Single terminal transition.
    ///
    /// Cancels the heartbeat, drops the upstream stream (closing its
    /// connection), writes the terminal frame for `reason` if it has one and
    /// ends the client channel. Returns `false` if the session was already
    /// closed, in which case nothing happens.
    pub async fn terminate(&mut self, reason: Termination) -> bool {
        if self.state == SessionState::Closed {
            tracing::debug!(
                session_id = %self.id,
                ?reason,
                "Session already closed, ignoring termination"
            );
            return false;
        }

        let was_streaming = self.state == SessionState::Streaming;
        self.state = SessionState::Closed;

        self.heartbeat = None;

        // Dropping the body stream aborts the upstream connection. Nothing
        // here can fail; a dead socket is simply released.
        if self.upstream.take().is_some() {
            tracing::debug!(session_id = %self.id, "Upstream stream released");
        }

        if let Some(client) = self.client.take() {
            if let Some(frame) = reason.terminal_frame() {
                if client.send(frame).await.is_err() {
                    tracing::debug!(session_id = %self.id, "Client gone before terminal event");
                }
            }
        }

        match &reason {
            Termination::UpstreamEnded => tracing::info!(
                session_id = %self.id,
                conversation_id = %self.conversation_id,
                "SSE stream closed by upstream"
            ),
            Termination::UpstreamFailed(message) => tracing::error!(
                session_id = %self.id,
                conversation_id = %self.conversation_id,
                error = %message,
                "SSE stream error"
            ),
            Termination::ClientDisconnected => tracing::info!(
                session_id = %self.id,
                conversation_id = %self.conversation_id,
                "Client closed the SSE connection"
            ),
            Termination::Shutdown => tracing::info!(
                session_id = %self.id,
                conversation_id = %self.conversation_id,
                "SSE stream closed for shutdown"
            ),
        }

        if was_streaming {
            metrics::record_session_finished(reason.outcome());
        }
        self.termination = Some(reason);
        true
    }

    async fn forward(&mut self, chunk: Bytes) {
        tracing::trace!(
            session_id = %self.id,
            len = chunk.len(),
            preview = %String::from_utf8_lossy(&chunk[..chunk.len().min(PREVIEW_LEN)]),
            "Received upstream chunk"
        );

        let len = chunk.len();
        match self.write(chunk).await {
            Ok(()) => metrics::record_bytes_forwarded(len),
            Err(ClientGone) => {
                self.terminate(Termination::ClientDisconnected).await;
            }
        }
    }

    async fn emit_heartbeat(&mut self) {
        if self.state != SessionState::Streaming {
            self.heartbeat = None;
            return;
        }

        tracing::debug!(session_id = %self.id, "Sending keep-alive ping");
        match self.write(events::ping(Utc::now())).await {
            Ok(()) => metrics::record_heartbeat(),
            Err(ClientGone) => {
                self.terminate(Termination::ClientDisconnected).await;
            }
        }
    }

    /// Write one frame to the client. Suppressed once the session is closed.
    async fn write(&mut self, frame: Bytes) -> Result<(), ClientGone> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }
        let client = self.client.as_ref().ok_or(ClientGone)?;
        client.send(frame).await.map_err(|_| ClientGone)
    }
}

async fn next_chunk<S: Stream + Unpin>(upstream: &mut Option<S>) -> Option<S::Item> {
    match upstream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn client_closed(client: &Option<mpsc::Sender<Bytes>>) {
    match client {
        Some(tx) => tx.closed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use futures_util::stream::{self, BoxStream};
    use std::io;

    type Upstream = BoxStream<'static, Result<Bytes, io::Error>>;

    #[derive(Debug, thiserror::Error)]
    #[error("error decoding response body")]
    struct Decode(#[source] io::Error);

    const KEEPALIVE: Duration = Duration::from_secs(30);

    fn upstream_channel() -> (mpsc::Sender<Result<Bytes, io::Error>>, Upstream) {
        let (tx, rx) = mpsc::channel(8);
        let upstream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        (tx, upstream)
    }

    async fn started(upstream: Upstream) -> (RelaySession<Upstream>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(16);
        let mut session = RelaySession::new("conv-1");
        assert!(session.start(upstream, tx, KEEPALIVE).await);
        (session, rx)
    }

    #[tokio::test]
    async fn test_chunks_pass_through_untouched() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"id: 1\nevent: msg\nda")),
            Ok(Bytes::from_static(b"ta: {\"a\":1}\n\n")),
            Ok(Bytes::from_static(&[0xff, 0xfe, b'\n'])),
        ];
        let (session, mut rx) = started(stream::iter(chunks).boxed()).await;
        let shutdown = Shutdown::new();

        let termination = session.run(shutdown.subscribe()).await;
        assert_eq!(termination, Some(Termination::UpstreamEnded));

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![
                events::connected(),
                Bytes::from_static(b"id: 1\nevent: msg\nda"),
                Bytes::from_static(b"ta: {\"a\":1}\n\n"),
                Bytes::from_static(&[0xff, 0xfe, b'\n']),
                events::closed_by_server(),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_error_emits_single_error_event() {
        let (up_tx, upstream) = upstream_channel();
        let (session, mut rx) = started(upstream).await;
        let shutdown = Shutdown::new();

        up_tx.send(Ok(Bytes::from_static(b"data: x\n\n"))).await.unwrap();
        up_tx.send(Err(io::Error::other("connection reset"))).await.unwrap();

        let termination = session.run(shutdown.subscribe()).await;
        assert_eq!(
            termination,
            Some(Termination::UpstreamFailed("connection reset".into()))
        );

        assert_eq!(rx.recv().await.unwrap(), events::connected());
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"data: x\n\n"));
        assert_eq!(rx.recv().await.unwrap(), events::error("connection reset"));
        assert!(rx.recv().await.is_none());
        assert!(up_tx.is_closed(), "upstream must be released");
    }

    #[tokio::test]
    async fn test_error_event_carries_underlying_cause() {
        let (up_tx, upstream) = upstream_channel();
        let (session, mut rx) = started(upstream).await;
        let shutdown = Shutdown::new();

        let cause = io::Error::new(io::ErrorKind::UnexpectedEof, "premature close");
        up_tx.send(Err(io::Error::other(Decode(cause)))).await.unwrap();

        let termination = session.run(shutdown.subscribe()).await;
        let expected = "error decoding response body: premature close";
        assert_eq!(termination, Some(Termination::UpstreamFailed(expected.into())));

        assert_eq!(rx.recv().await.unwrap(), events::connected());
        assert_eq!(rx.recv().await.unwrap(), events::error(expected));
    }

    #[tokio::test]
    async fn test_client_disconnect_destroys_upstream_silently() {
        let (up_tx, upstream) = upstream_channel();
        let (session, mut rx) = started(upstream).await;
        let shutdown = Shutdown::new();

        assert_eq!(rx.recv().await.unwrap(), events::connected());
        drop(rx);

        let termination = session.run(shutdown.subscribe()).await;
        assert_eq!(termination, Some(Termination::ClientDisconnected));
        assert!(up_tx.is_closed(), "upstream must be destroyed on client disconnect");
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (up_tx, upstream) = upstream_channel();
        let (mut session, mut rx) = started(upstream).await;

        assert!(session.terminate(Termination::UpstreamEnded).await);
        assert!(!session.terminate(Termination::ClientDisconnected).await);
        assert!(!session.terminate(Termination::UpstreamFailed("late".into())).await);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.termination(), Some(&Termination::UpstreamEnded));
        assert!(up_tx.is_closed());

        assert_eq!(rx.recv().await.unwrap(), events::connected());
        assert_eq!(rx.recv().await.unwrap(), events::closed_by_server());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream_without_terminal_event() {
        let (up_tx, upstream) = upstream_channel();
        let (session, mut rx) = started(upstream).await;
        let shutdown = Shutdown::new();
        let receiver = shutdown.subscribe();

        shutdown.trigger();
        let termination = session.run(receiver).await;

        assert_eq!(termination, Some(Termination::Shutdown));
        assert_eq!(rx.recv().await.unwrap(), events::connected());
        assert!(rx.recv().await.is_none());
        assert!(up_tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence() {
        let (up_tx, upstream) = upstream_channel();
        let (session, mut rx) = started(upstream).await;
        let shutdown = Shutdown::new();
        let task = tokio::spawn(session.run(shutdown.subscribe()));

        let began = Instant::now();
        assert_eq!(rx.recv().await.unwrap(), events::connected());

        // Idle upstream: the first frame after `connected` is a ping, 30s in.
        let ping = rx.recv().await.unwrap();
        assert!(ping.starts_with(b"event: ping\ndata: {\"time\":\""));
        assert!(ping.ends_with(b"\"}\n\n"));
        assert!(began.elapsed() >= KEEPALIVE);

        up_tx.send(Ok(Bytes::from_static(b"data: late\n\n"))).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"data: late\n\n"));

        drop(up_tx);
        assert_eq!(rx.recv().await.unwrap(), events::closed_by_server());
        assert_eq!(task.await.unwrap(), Some(Termination::UpstreamEnded));

        // No ping after termination, however long we wait.
        time::sleep(KEEPALIVE * 3).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_start_with_departed_client_closes() {
        let (up_tx, upstream) = upstream_channel();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let mut session = RelaySession::new("conv-2");
        assert!(!session.start(upstream, tx, KEEPALIVE).await);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.termination(), Some(&Termination::ClientDisconnected));
        assert!(up_tx.is_closed());
    }

    #[tokio::test]
    async fn test_unstarted_session_run_returns_none() {
        let session: RelaySession<Upstream> = RelaySession::new("conv-3");
        assert_eq!(session.state(), SessionState::Connecting);
        let shutdown = Shutdown::new();
        assert_eq!(session.run(shutdown.subscribe()).await, None);
    }
}
