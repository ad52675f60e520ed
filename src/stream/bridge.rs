//! PCM queue → transcoder → HTTP body
//!
//! ```text
//!  PcmRingBuffer ──feeder──► transcoder stdin
//!                            transcoder stdout ──pump──► duplex pipe ──► AudioStream
//! ```
//!
//! The session's stream slot is held from [`open_stream`] until the one
//! cleanup runs: on body drop, on feeder exit (playback ended or the
//! transcoder stopped reading), on pump exit (transcoder output ended or the
//! pipe broke), or when the session cancels the stream.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::constants::STREAM_PIPE_CAPACITY;
use crate::error::{PlaybackError, TranscodeError};
use crate::session::BoardSession;
use crate::stream::transcoder::Transcoder;

/// Byte and frame counters of one stream
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_fed: AtomicU64,
    bytes_fed: AtomicU64,
    bytes_out: AtomicU64,
}

impl StreamStats {
    pub fn frames_fed(&self) -> u64 {
        self.frames_fed.load(Ordering::Relaxed)
    }

    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }
}

/// Runs exactly once per stream, whichever exit path gets there first
struct StreamCleanup {
    session: Arc<BoardSession>,
    stream_id: u64,
    cancel: CancellationToken,
    stats: Arc<StreamStats>,
    done: AtomicBool,
}

impl StreamCleanup {
    fn run(&self, cause: &'static str) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let released = self.session.release_stream(self.stream_id);
        info!(
            board_id = self.session.board_id(),
            stream_id = self.stream_id,
            cause,
            released,
            frames_fed = self.stats.frames_fed(),
            bytes_fed = self.stats.bytes_fed(),
            bytes_out = self.stats.bytes_out(),
            "Stream closed"
        );
    }
}

/// Compressed audio body of one stream.
///
/// Dropping it closes the stream.
pub struct AudioStream {
    inner: ReaderStream<DuplexStream>,
    content_type: String,
    cleanup: Arc<StreamCleanup>,
}

impl AudioStream {
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn stream_id(&self) -> u64 {
        self.cleanup.stream_id
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.cleanup.stats.clone()
    }
}

impl Stream for AudioStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.cleanup.run("body closed");
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("board_id", &self.cleanup.session.board_id())
            .field("stream_id", &self.cleanup.stream_id)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Attach a transcoded stream to `session`
pub async fn open_stream(
    session: Arc<BoardSession>,
    transcoder: &dyn Transcoder,
) -> Result<AudioStream, PlaybackError> {
    let board_id = session.board_id();
    if !session.status().is_streamable() {
        return Err(PlaybackError::Conflict("Board is not playing".into()));
    }
    let (stream_id, cancel) = session.claim_stream()?;

    let (child, stdin, stdout) = match spawn_piped(transcoder, &session) {
        Ok(parts) => parts,
        Err(e) => {
            error!(board_id, stream_id, "Transcoder failed to start: {}", e);
            session.release_stream(stream_id);
            return Err(PlaybackError::Internal("Streaming failed".into()));
        }
    };

    let cleanup = Arc::new(StreamCleanup {
        session: session.clone(),
        stream_id,
        cancel: cancel.clone(),
        stats: Arc::new(StreamStats::default()),
        done: AtomicBool::new(false),
    });

    let (reader, writer) = tokio::io::duplex(STREAM_PIPE_CAPACITY);
    let tasks = session.tasks().clone();
    tasks.spawn(feed(stdin, cancel.clone(), cleanup.clone()));
    tasks.spawn(pump(child, stdout, writer, cancel, cleanup.clone()));

    info!(board_id, stream_id, "Stream opened");
    Ok(AudioStream {
        inner: ReaderStream::new(reader),
        content_type: transcoder.content_type().to_string(),
        cleanup,
    })
}

fn spawn_piped(
    transcoder: &dyn Transcoder,
    session: &BoardSession,
) -> Result<(Child, ChildStdin, ChildStdout), TranscodeError> {
    let mut child = transcoder.spawn(session.producer().format())?;
    let stdin = child.stdin.take().ok_or(TranscodeError::MissingPipe("stdin"))?;
    let stdout = child.stdout.take().ok_or(TranscodeError::MissingPipe("stdout"))?;
    Ok((child, stdin, stdout))
}

/// Move PCM frames from the session queue into the transcoder
async fn feed(mut stdin: ChildStdin, cancel: CancellationToken, cleanup: Arc<StreamCleanup>) {
    let session = &cleanup.session;
    let stats = &cleanup.stats;
    let board_id = session.board_id();
    let wait = session.config().feeder_poll();

    let cause = loop {
        let status = session.status();
        if status.is_terminal() {
            debug!(board_id, %status, "Feeder stopping");
            break Some("playback ended");
        }

        let frame = tokio::select! {
            _ = cancel.cancelled() => break None,
            frame = session.frames().pop_timeout(wait) => frame,
        };
        let Some(frame) = frame else {
            continue;
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => break None,
            r = stdin.write_all(&frame.data) => r,
        };
        if let Err(e) = written {
            debug!(board_id, "Transcoder input closed: {}", e);
            break Some("transcoder input closed");
        }
        stats.frames_fed.fetch_add(1, Ordering::Relaxed);
        stats.bytes_fed.fetch_add(frame.len() as u64, Ordering::Relaxed);
        trace!(board_id, timecode_ms = frame.timecode_ms, "Fed frame");
    };

    let _ = stdin.shutdown().await;
    if let Some(cause) = cause {
        cleanup.run(cause);
    }
}

/// Copy transcoder output into the body pipe, then tear the process down
async fn pump(
    mut child: Child,
    mut stdout: ChildStdout,
    mut writer: DuplexStream,
    cancel: CancellationToken,
    cleanup: Arc<StreamCleanup>,
) {
    let board_id = cleanup.session.board_id();
    let mut counted = CountingWriter {
        inner: &mut writer,
        stats: &cleanup.stats,
    };

    let cause = tokio::select! {
        _ = cancel.cancelled() => "cancelled",
        copied = tokio::io::copy(&mut stdout, &mut counted) => match copied {
            Ok(bytes) => {
                debug!(board_id, bytes, "Transcoder output ended");
                "transcoder exited"
            }
            Err(e) => {
                debug!(board_id, "Stream pipe closed: {}", e);
                "pipe closed"
            }
        },
    };

    drop(writer);
    let _ = child.start_kill();
    match child.wait().await {
        Ok(status) => trace!(board_id, %status, "Transcoder reaped"),
        Err(e) => debug!(board_id, "Failed to reap transcoder: {}", e),
    }
    cleanup.run(cause);
}

/// Counts bytes on their way into the body pipe
struct CountingWriter<'a> {
    inner: &'a mut DuplexStream,
    stats: &'a StreamStats,
}

impl tokio::io::AsyncWrite for CountingWriter<'_> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut *self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.stats.bytes_out.fetch_add(*n as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::{PcmFormat, ProducerEvent};
    use crate::catalog::Track;
    use crate::config::SessionConfig;
    use crate::session::{PlaybackStatus, PlaybackWindow};
    use crate::source::SourceRouter;
    use futures_util::StreamExt;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::process::Command;
    use tokio_util::task::TaskTracker;

    /// Hands PCM straight back out
    struct Cat;

    impl Transcoder for Cat {
        fn content_type(&self) -> &str {
            "application/octet-stream"
        }

        fn spawn(&self, _format: PcmFormat) -> Result<Child, TranscodeError> {
            Command::new("cat")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| TranscodeError::Spawn {
                    program: "cat".into(),
                    source,
                })
        }
    }

    struct Broken;

    impl Transcoder for Broken {
        fn content_type(&self) -> &str {
            "audio/mpeg"
        }

        fn spawn(&self, _format: PcmFormat) -> Result<Child, TranscodeError> {
            Err(TranscodeError::MissingPipe("stdin"))
        }
    }

    async fn playing_session() -> Arc<BoardSession> {
        let session = Arc::new(BoardSession::new(
            1,
            PcmFormat::default(),
            SessionConfig {
                feeder_poll_ms: 20,
                ..SessionConfig::default()
            },
            &CancellationToken::new(),
            TaskTracker::new(),
        ));
        let track = Track {
            id: 7,
            name: "tone".into(),
            uri: "tone:440".into(),
            duration_secs: 3600,
            owner_id: 1,
            shared_with: Vec::new(),
        };
        let router = SourceRouter::with_defaults(PcmFormat::default());
        session
            .load_and_play(&track, PlaybackWindow::default(), &router)
            .await
            .unwrap();
        session
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_pcm_flows_through_transcoder() {
        let session = playing_session().await;
        let mut stream = open_stream(session.clone(), &Cat).await.unwrap();
        assert_eq!(stream.content_type(), "application/octet-stream");

        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!chunk.is_empty());
        assert!(stream.stats().frames_fed() > 0);
    }

    #[tokio::test]
    async fn test_second_stream_conflicts_until_first_closes() {
        let session = playing_session().await;
        let first = open_stream(session.clone(), &Cat).await.unwrap();

        let err = open_stream(session.clone(), &Cat).await.unwrap_err();
        assert_eq!(
            err,
            PlaybackError::Conflict("Stream already active for this board".into())
        );

        drop(first);
        assert!(!session.is_streaming());
        let second = open_stream(session.clone(), &Cat).await.unwrap();
        assert!(session.is_streaming());
        drop(second);
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_slot() {
        let session = playing_session().await;
        let err = open_stream(session.clone(), &Broken).await.unwrap_err();
        assert_eq!(err, PlaybackError::Internal("Streaming failed".into()));
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_requires_active_playback() {
        let session = playing_session().await;
        session.stop().await.unwrap();

        let err = open_stream(session.clone(), &Cat).await.unwrap_err();
        assert_eq!(err, PlaybackError::Conflict("Board is not playing".into()));
    }

    #[tokio::test]
    async fn test_stop_ends_the_stream() {
        let session = playing_session().await;
        let mut stream = open_stream(session.clone(), &Cat).await.unwrap();

        session.stop().await.unwrap();
        assert_eq!(session.status(), PlaybackStatus::Stopped);
        assert!(!session.is_streaming());

        // body drains to EOF once the pump lets go of the pipe
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(chunk) = stream.next().await {
                if chunk.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(drained.is_ok());
    }

    async fn drain(stream: &mut AudioStream) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(chunk) = stream.next().await {
                if chunk.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_stuck_track_ends_the_stream() {
        let session = playing_session().await;
        let mut stream = open_stream(session.clone(), &Cat).await.unwrap();
        assert!(session.is_streaming());

        session.handle_event(ProducerEvent::TrackStuck { threshold_ms: 10 });
        assert_eq!(session.status(), PlaybackStatus::Error);

        assert!(drain(&mut stream).await);
        wait_until(|| !session.is_streaming()).await;
        assert!(matches!(
            open_stream(session.clone(), &Cat).await,
            Err(PlaybackError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_track_exception_ends_the_stream() {
        let session = playing_session().await;
        let mut stream = open_stream(session.clone(), &Cat).await.unwrap();

        session.handle_event(ProducerEvent::TrackException {
            message: "decoder lost sync".into(),
        });
        assert_eq!(session.status(), PlaybackStatus::Error);

        assert!(drain(&mut stream).await);
        wait_until(|| !session.is_streaming()).await;
    }

    /// Exits after passing a few bytes through
    struct ShortLived;

    impl Transcoder for ShortLived {
        fn content_type(&self) -> &str {
            "application/octet-stream"
        }

        fn spawn(&self, _format: PcmFormat) -> Result<Child, TranscodeError> {
            Command::new("head")
                .args(["-c", "16"])
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| TranscodeError::Spawn {
                    program: "head".into(),
                    source,
                })
        }
    }

    #[tokio::test]
    async fn test_transcoder_exit_releases_slot() {
        let session = playing_session().await;
        let mut stream = open_stream(session.clone(), &ShortLived).await.unwrap();

        let mut received = 0;
        while let Some(chunk) = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
        {
            received += chunk.unwrap().len();
        }
        assert!(received <= 16);

        // Playback is unaffected; only the stream went away
        wait_until(|| !session.is_streaming()).await;
        assert_eq!(session.status(), PlaybackStatus::Playing);
        assert!(stream.stats().bytes_out() <= 16);
    }
}
