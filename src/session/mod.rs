//! Session lifecycle controller
//!
//! A [`LiveSession`] owns every resource of one live conversation: the
//! microphone, the capture pipeline, the playback scheduler and the
//! connection. It is driven as an actor: the owner calls [`LiveSession::start`]
//! and [`LiveSession::stop`] and keeps awaiting [`LiveSession::next_update`],
//! which serializes microphone acquisition, connection events and playback
//! completions onto the caller's task.
//!
//! ```text
//!   idle ──start──▶ connecting ──open──▶ active ──error──▶ error ──stop──▶ idle
//!                       │                  │
//!                       └─────close────────┴──▶ closed ──▶ idle
//! ```

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audio::{
    AudioFrame, CapturePipeline, FrameSink, InputBackend, Microphone, OutputBackend,
    PlaybackScheduler, ScheduledSource, SourceId,
};
use crate::codec::EncodedAudioChunk;
use crate::config::AppConfig;
use crate::connection::{ConnectionEvent, ConnectionHandle, Connector, OutboundMessage};
use crate::error::{AudioError, CodecError, SessionError};
use crate::protocol::ServerMessage;
use crate::transcript::{Transcript, TranscriptEntry, TranscriptTurn};

mod state;

use state::SessionCounters;
pub use state::{SessionState, SessionStats, SessionStatus};

pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_ACTIVE: &str = "Connection active. Start speaking.";
pub const STATUS_CONNECTION_ERROR: &str = "A connection error occurred.";
pub const STATUS_MICROPHONE_DENIED: &str =
    "Could not access microphone. Please grant permission and try again.";
pub const STATUS_CLOSED: &str = "Session closed.";

/// Something the owner of a session may want to show
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged(SessionStatus),
    /// Interim text of the current turn changed
    InterimTranscript(TranscriptTurn),
    TurnCompleted(TranscriptEntry),
    AudioScheduled(ScheduledSource),
    Interrupted { stopped: usize },
    PlaybackFinished(SourceId),
    /// A malformed inbound chunk was skipped
    ChunkSkipped(CodecError),
}

/// Hardware and network backends used by a session
#[derive(Clone)]
pub struct SessionBackends {
    pub input: Arc<dyn InputBackend>,
    pub output: Arc<dyn OutputBackend>,
    pub connector: Arc<dyn Connector>,
}

impl SessionBackends {
    pub fn new(
        input: Arc<dyn InputBackend>,
        output: Arc<dyn OutputBackend>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            input,
            output,
            connector,
        }
    }
}

type MicrophoneResult = Result<Box<dyn Microphone>, AudioError>;

enum Event {
    /// `None` if the acquiring task went away without an answer
    Microphone(Option<MicrophoneResult>),
    Connection(Option<ConnectionEvent>),
    Completion(Option<SourceId>),
}

pub struct LiveSession {
    config: Arc<AppConfig>,
    backends: SessionBackends,
    status: SessionStatus,
    /// Set on `start`, kept after the session ends
    session_id: Option<Uuid>,
    /// Span every log line of the current session is recorded in
    span: tracing::Span,
    /// Survives across sessions
    transcript: Transcript,
    /// Shared with the capture callback
    counters: Arc<SessionCounters>,
    /// Updates produced but not yet returned by `next_update`
    pending: VecDeque<SessionUpdate>,

    // Resources of the current session. Teardown takes each of them.
    /// Result of the in-flight microphone request
    microphone_rx: Option<oneshot::Receiver<MicrophoneResult>>,
    microphone: Option<Box<dyn Microphone>>,
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackScheduler>,
    /// Sources the output finished playing
    completions_rx: Option<mpsc::UnboundedReceiver<SourceId>>,
    connection: Option<ConnectionHandle>,
    events_rx: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
}

impl LiveSession {
    pub fn new(config: Arc<AppConfig>, backends: SessionBackends) -> Self {
        Self {
            config,
            backends,
            status: SessionStatus::default(),
            session_id: None,
            span: tracing::Span::none(),
            transcript: Transcript::new(),
            counters: Arc::new(SessionCounters::default()),
            pending: VecDeque::new(),
            microphone_rx: None,
            microphone: None,
            capture: None,
            playback: None,
            completions_rx: None,
            connection: None,
            events_rx: None,
        }
    }

    /// Begin a new session. Only valid from `idle`; failures after this
    /// point are reported as a transition to `error`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.status.state != SessionState::Idle {
            return Err(SessionError::NotIdle(self.status.state));
        }

        let id = Uuid::new_v4();
        self.session_id = Some(id);
        self.span = tracing::info_span!("session", id = %id);
        let span = self.span.clone();
        let _enter = span.enter();

        self.counters.reset();
        self.transcript.discard_interim();
        self.set_status(SessionState::Connecting, STATUS_CONNECTING);

        let (tx, rx) = oneshot::channel();
        let input = self.backends.input.clone();
        let acquire_span = self.span.clone();
        tokio::task::spawn_blocking(move || {
            let _enter = acquire_span.enter();
            let result = input.acquire();
            if let Err(Ok(mut microphone)) = tx.send(result) {
                tracing::debug!("Session stopped while acquiring microphone, releasing it");
                let _ = microphone.release();
            }
        });
        self.microphone_rx = Some(rx);
        Ok(())
    }

    /// End the session from any state and release everything it holds.
    /// Idempotent; always ends in `idle`.
    pub fn stop(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();

        let previous = self.status.state;
        self.teardown();
        self.pending.clear();
        if previous != SessionState::Idle {
            tracing::info!("Session stopped (was {})", previous);
        }
        self.set_status(SessionState::Idle, "");
    }

    /// Wait for the next update. Pending forever while idle.
    ///
    /// Cancel safe: an update is never lost when the future is dropped.
    pub async fn next_update(&mut self) -> SessionUpdate {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return update;
            }

            let event = tokio::select! {
                result = recv_oneshot(&mut self.microphone_rx) => Event::Microphone(result),
                event = recv_opt(&mut self.events_rx) => Event::Connection(event),
                id = recv_opt(&mut self.completions_rx) => Event::Completion(id),
            };
            self.handle(event);
        }
    }

    fn handle(&mut self, event: Event) {
        let span = self.span.clone();
        let _enter = span.enter();

        match event {
            Event::Microphone(result) => {
                self.microphone_rx = None;
                let result = result.unwrap_or_else(|| {
                    Err(AudioError::StreamError("microphone request abandoned".to_string()))
                });
                self.on_microphone(result);
            }
            Event::Connection(Some(event)) => self.on_connection_event(event),
            Event::Connection(None) => {
                self.events_rx = None;
                self.on_connection_event(ConnectionEvent::Closed { reason: None });
            }
            Event::Completion(Some(id)) => {
                if let Some(playback) = self.playback.as_mut() {
                    if playback.on_source_ended(id) {
                        self.pending.push_back(SessionUpdate::PlaybackFinished(id));
                    }
                }
            }
            Event::Completion(None) => self.completions_rx = None,
        }
    }

    fn on_microphone(&mut self, result: MicrophoneResult) {
        if self.status.state != SessionState::Connecting {
            if let Ok(mut microphone) = result {
                let _ = microphone.release();
            }
            return;
        }

        let microphone = match result {
            Ok(microphone) => microphone,
            Err(e) => {
                tracing::error!("Microphone unavailable: {}", e);
                self.fail(microphone_message(&e));
                return;
            }
        };
        tracing::info!("Microphone acquired: {}", microphone.name());
        self.microphone = Some(microphone);

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let rate = self.config.audio.playback_sample_rate;
        match self.backends.output.open(rate, completions_tx) {
            Ok(output) => {
                self.playback = Some(PlaybackScheduler::new(output, rate));
                self.completions_rx = Some(completions_rx);
            }
            Err(e) => {
                tracing::error!("Audio output unavailable: {}", e);
                self.fail(format!("Could not open audio output: {}", e));
                return;
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        match self.backends.connector.open(events_tx) {
            Ok(connection) => {
                self.connection = Some(connection);
                self.events_rx = Some(events_rx);
            }
            Err(e) => {
                tracing::error!("Could not open connection: {}", e);
                self.fail(STATUS_CONNECTION_ERROR);
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open => self.on_open(),
            ConnectionEvent::Message(message) => {
                if self.status.state == SessionState::Active {
                    self.on_message(&message);
                }
            }
            ConnectionEvent::Error(e) => {
                if self.status.state.is_live() {
                    tracing::error!("Connection error: {}", e);
                    self.fail(STATUS_CONNECTION_ERROR);
                }
            }
            ConnectionEvent::Closed { reason } => {
                if self.status.state.is_live() {
                    tracing::info!(
                        "Connection closed{}",
                        reason.map(|r| format!(": {}", r)).unwrap_or_default()
                    );
                    self.teardown();
                    self.set_status(SessionState::Closed, STATUS_CLOSED);
                    self.set_status(SessionState::Idle, "");
                }
            }
        }
    }

    fn on_open(&mut self) {
        if self.status.state != SessionState::Connecting {
            return;
        }
        let (Some(microphone), Some(connection)) =
            (self.microphone.as_mut(), self.connection.as_ref())
        else {
            return;
        };

        let sink = outbound_sink(
            connection.sender(),
            self.counters.clone(),
            self.config.capture_mime_type(),
        );
        let capture = CapturePipeline::start(
            microphone.as_mut(),
            self.config.audio.capture_sample_rate,
            self.config.audio.frame_samples,
            sink,
        );
        match capture {
            Ok(capture) => {
                self.capture = Some(capture);
                self.set_status(SessionState::Active, STATUS_ACTIVE);
            }
            Err(e) => {
                tracing::error!("Could not start capture: {}", e);
                self.fail(microphone_message(&e));
            }
        }
    }

    fn on_message(&mut self, message: &ServerMessage) {
        let mut interim_changed = false;
        if let Some(text) = message.output_text() {
            self.transcript.append_model(text);
            interim_changed = true;
        }
        if let Some(text) = message.input_text() {
            self.transcript.append_user(text);
            interim_changed = true;
        }
        if interim_changed {
            self.pending.push_back(SessionUpdate::InterimTranscript(
                self.transcript.interim().clone(),
            ));
        }

        if message.turn_complete() {
            if let Some(entry) = self.transcript.complete_turn() {
                tracing::debug!("Turn {} complete", entry.index);
                self.pending
                    .push_back(SessionUpdate::TurnCompleted(entry.clone()));
            }
        }

        if let Some(playback) = self.playback.as_mut() {
            for blob in message.audio_blobs() {
                match blob.to_chunk().and_then(|chunk| playback.schedule(&chunk)) {
                    Ok(Some(source)) => {
                        self.counters.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
                        self.pending.push_back(SessionUpdate::AudioScheduled(source));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Skipping malformed audio chunk: {}", e);
                        self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                        self.pending.push_back(SessionUpdate::ChunkSkipped(e));
                    }
                }
            }

            if message.interrupted() {
                let stopped = playback.interrupt();
                self.counters.interruptions.fetch_add(1, Ordering::Relaxed);
                self.pending
                    .push_back(SessionUpdate::Interrupted { stopped });
            }
        }
    }

    /// Tear down and park in `error` with `message`
    fn fail(&mut self, message: impl Into<String>) {
        self.teardown();
        self.set_status(SessionState::Error, message);
    }

    /// Release every resource. Each step runs even if an earlier one failed.
    fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.events_rx = None;

        if let Some(mut capture) = self.capture.take() {
            capture.detach();
            if let Err(e) = capture.stop() {
                tracing::warn!("Failed to stop capture: {}", e);
            }
        }

        self.microphone_rx = None;
        if let Some(mut microphone) = self.microphone.take() {
            if let Err(e) = microphone.release() {
                tracing::warn!("Failed to release microphone: {}", e);
            }
        }

        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.close() {
                tracing::warn!("Failed to close audio output: {}", e);
            }
        }
        self.completions_rx = None;

        let stats = self.counters.snapshot();
        if stats != SessionStats::default() {
            tracing::info!(
                "Session stats: {} frames sent, {} dropped, {} chunks played, {} skipped, {} interruptions",
                stats.frames_sent,
                stats.frames_dropped,
                stats.chunks_scheduled,
                stats.decode_errors,
                stats.interruptions
            );
        }
    }

    fn set_status(&mut self, state: SessionState, message: impl Into<String>) {
        let status = SessionStatus::new(state, message);
        if status == self.status {
            return;
        }
        if status.state != self.status.state {
            tracing::info!("Session {} -> {}", self.status.state, status.state);
        }
        self.status = status.clone();
        self.pending.push_back(SessionUpdate::StateChanged(status));
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn state(&self) -> SessionState {
        self.status.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Id of the most recent session, if one was started
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn playback(&self) -> Option<&PlaybackScheduler> {
        self.playback.as_ref()
    }

    /// Number of resources currently held, including a pending microphone
    /// request
    pub fn held_resources(&self) -> usize {
        [
            self.microphone_rx.is_some(),
            self.microphone.is_some(),
            self.capture.is_some(),
            self.playback.is_some(),
            self.connection.is_some(),
        ]
        .iter()
        .filter(|held| **held)
        .count()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Capture sink that encodes frames and queues them without blocking.
/// When the queue is full the newest frame is dropped.
fn outbound_sink(
    sender: mpsc::Sender<OutboundMessage>,
    counters: Arc<SessionCounters>,
    mime_type: String,
) -> FrameSink {
    Box::new(move |frame: AudioFrame| {
        let chunk = EncodedAudioChunk::from_frame(&frame, mime_type.as_str());
        match sender.try_send(OutboundMessage::Audio(chunk)) {
            Ok(()) => {
                counters.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                let dropped = counters.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    tracing::warn!(
                        "Outbound queue full, dropped frame {} ({} so far)",
                        frame.sequence,
                        dropped
                    );
                }
            }
            // Connection is gone; teardown follows
            Err(TrySendError::Closed(_)) => {}
        }
    })
}

fn microphone_message(error: &AudioError) -> String {
    if error.is_permission() {
        STATUS_MICROPHONE_DENIED.to_string()
    } else {
        format!("Could not access microphone: {}", error)
    }
}

async fn recv_oneshot<T>(rx: &mut Option<oneshot::Receiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.await.ok(),
        None => std::future::pending().await,
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
