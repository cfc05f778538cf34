//! In-memory audio and connection backends for unit tests

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::audio::{
    InputBackend, InputCallback, InputFormat, InputStream, Microphone, OutputBackend,
    OutputStream, SharedPlaybackBuffer, SourceId,
};
use crate::codec::EncodedAudioChunk;
use crate::connection::{ConnectionEvent, ConnectionHandle, Connector, OutboundMessage};
use crate::error::{AudioError, ConnectionError};
use crate::protocol::ServerMessage;

// ---------------------------------------------------------------------------
// Input

struct StreamSlot {
    running: bool,
    callback: Option<InputCallback>,
}

#[derive(Default)]
struct InputState {
    acquisitions: usize,
    held: usize,
    streams: Vec<Arc<Mutex<StreamSlot>>>,
    failure: Option<AudioError>,
    gate: Option<crossbeam_channel::Receiver<()>>,
    gate_tx: Option<crossbeam_channel::Sender<()>>,
}

/// Microphone that produces whatever the test feeds it
#[derive(Clone)]
pub struct FakeInput {
    format: InputFormat,
    state: Arc<Mutex<InputState>>,
}

impl FakeInput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: InputFormat {
                sample_rate,
                channels,
            },
            state: Arc::new(Mutex::new(InputState::default())),
        }
    }

    /// Every acquire fails with `error`
    pub fn failing(error: AudioError) -> Self {
        let input = Self::new(16_000, 1);
        input.state.lock().failure = Some(error);
        input
    }

    /// Acquire blocks until [`FakeInput::open_gate`] is called
    pub fn gated() -> Self {
        let input = Self::new(16_000, 1);
        let (tx, rx) = crossbeam_channel::bounded(0);
        {
            let mut state = input.state.lock();
            state.gate = Some(rx);
            state.gate_tx = Some(tx);
        }
        input
    }

    pub fn open_gate(&self) {
        // Dropping the sender wakes every waiting acquire
        self.state.lock().gate_tx.take();
    }

    /// Deliver one callback worth of samples to every running stream
    pub fn feed(&self, samples: &[f32]) {
        let streams: Vec<_> = self.state.lock().streams.clone();
        for slot in streams {
            let mut slot = slot.lock();
            if !slot.running {
                continue;
            }
            if let Some(callback) = slot.callback.as_mut() {
                callback(samples);
            }
        }
    }

    pub fn open_streams(&self) -> usize {
        self.state
            .lock()
            .streams
            .iter()
            .filter(|s| s.lock().running)
            .count()
    }

    pub fn held_microphones(&self) -> usize {
        self.state.lock().held
    }

    /// Successful acquisitions so far
    pub fn acquisitions(&self) -> usize {
        self.state.lock().acquisitions
    }
}

impl InputBackend for FakeInput {
    fn acquire(&self) -> Result<Box<dyn Microphone>, AudioError> {
        let gate = self.state.lock().gate.clone();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        let mut state = self.state.lock();
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        state.acquisitions += 1;
        state.held += 1;
        Ok(Box::new(FakeMicrophone {
            format: self.format,
            state: self.state.clone(),
            acquired: true,
        }))
    }
}

struct FakeMicrophone {
    format: InputFormat,
    state: Arc<Mutex<InputState>>,
    acquired: bool,
}

impl Microphone for FakeMicrophone {
    fn name(&self) -> &str {
        "fake microphone"
    }

    fn format(&self) -> InputFormat {
        self.format
    }

    fn open_stream(&mut self, callback: InputCallback) -> Result<Box<dyn InputStream>, AudioError> {
        if !self.acquired {
            return Err(AudioError::DeviceNotFound("released".to_string()));
        }
        let slot = Arc::new(Mutex::new(StreamSlot {
            running: true,
            callback: Some(callback),
        }));
        self.state.lock().streams.push(slot.clone());
        Ok(Box::new(FakeInputStream { slot }))
    }

    fn release(&mut self) -> Result<(), AudioError> {
        if self.acquired {
            self.acquired = false;
            self.state.lock().held -= 1;
        }
        Ok(())
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for FakeMicrophone {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

struct FakeInputStream {
    slot: Arc<Mutex<StreamSlot>>,
}

impl InputStream for FakeInputStream {
    fn stop(&mut self) -> Result<(), AudioError> {
        let mut slot = self.slot.lock();
        slot.running = false;
        slot.callback = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.slot.lock().running
    }
}

// ---------------------------------------------------------------------------
// Output

#[derive(Default)]
struct OutputState {
    now: f64,
    open_streams: usize,
    sources: BTreeMap<SourceId, f64>,
    completions: Option<mpsc::UnboundedSender<SourceId>>,
    failure: Option<AudioError>,
    close_failure: Option<AudioError>,
}

/// Output with a manually driven clock
#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: AudioError) -> Self {
        let output = Self::new();
        output.state.lock().failure = Some(error);
        output
    }

    /// Closing streams reports `error` (the stream still ends up closed)
    pub fn fail_close(&self, error: AudioError) {
        self.state.lock().close_failure = Some(error);
    }

    pub fn set_now(&self, now: f64) {
        self.state.lock().now = now;
    }

    pub fn now(&self) -> f64 {
        self.state.lock().now
    }

    /// Sources started and not yet stopped or finished
    pub fn playing(&self) -> usize {
        self.state.lock().sources.len()
    }

    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams
    }

    /// Play `id` to the end and report the completion
    pub fn finish(&self, id: SourceId) -> bool {
        let mut state = self.state.lock();
        if state.sources.remove(&id).is_none() {
            return false;
        }
        if let Some(tx) = &state.completions {
            let _ = tx.send(id);
        }
        true
    }
}

impl OutputBackend for FakeOutput {
    fn open(
        &self,
        _sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputStream>, AudioError> {
        let mut state = self.state.lock();
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        state.open_streams += 1;
        state.completions = Some(completions);
        Ok(Box::new(FakeOutputStream {
            state: self.state.clone(),
            open: true,
        }))
    }
}

struct FakeOutputStream {
    state: Arc<Mutex<OutputState>>,
    open: bool,
}

impl OutputStream for FakeOutputStream {
    fn now(&self) -> f64 {
        self.state.lock().now
    }

    fn start_source(&mut self, id: SourceId, at: f64, _buffer: SharedPlaybackBuffer) {
        self.state.lock().sources.insert(id, at);
    }

    fn stop_source(&mut self, id: SourceId) -> bool {
        self.state.lock().sources.remove(&id).is_some()
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut state = self.state.lock();
        state.open_streams -= 1;
        state.completions = None;
        match state.close_failure.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// ---------------------------------------------------------------------------
// Connection

#[derive(Default)]
struct ConnectorState {
    manual: bool,
    opened: usize,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    outbound: Option<mpsc::Receiver<OutboundMessage>>,
    shutdown: Option<oneshot::Receiver<()>>,
    closed: bool,
    failure: Option<ConnectionError>,
}

/// Connector whose server side is driven by the test. Connections report
/// `Open` as soon as they are opened unless built with [`FakeConnector::manual`].
#[derive(Clone)]
pub struct FakeConnector {
    capacity: usize,
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_capacity(crate::constants::DEFAULT_OUTBOUND_QUEUE_FRAMES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            state: Arc::new(Mutex::new(ConnectorState::default())),
        }
    }

    /// The test finishes the handshake with [`FakeConnector::accept`]
    pub fn manual() -> Self {
        let connector = Self::new();
        connector.state.lock().manual = true;
        connector
    }

    pub fn failing(error: ConnectionError) -> Self {
        let connector = Self::new();
        connector.state.lock().failure = Some(error);
        connector
    }

    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Send an event as the connection task would. False if nobody listens.
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        match &self.state.lock().events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Finish the handshake
    pub fn accept(&self) -> bool {
        self.emit(ConnectionEvent::Open)
    }

    /// Deliver a server message given as JSON
    pub fn message(&self, json: &str) -> bool {
        match ServerMessage::parse(json) {
            Ok(msg) => self.emit(ConnectionEvent::Message(msg)),
            Err(_) => false,
        }
    }

    /// Drain the frames queued by the client so far
    pub fn sent_frames(&self) -> Vec<EncodedAudioChunk> {
        let mut state = self.state.lock();
        let mut frames = Vec::new();
        if let Some(rx) = state.outbound.as_mut() {
            while let Ok(OutboundMessage::Audio(chunk)) = rx.try_recv() {
                frames.push(chunk);
            }
        }
        frames
    }

    /// Whether the client closed (or dropped) its handle
    pub fn is_closed(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return true;
        }
        let closed = match state.shutdown.as_mut() {
            Some(rx) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
            None => false,
        };
        state.closed = closed;
        closed
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<ConnectionHandle, ConnectionError> {
        let mut state = self.state.lock();
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        let (outbound_tx, outbound_rx) = mpsc::channel(self.capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        state.opened += 1;
        if !state.manual {
            let _ = events.send(ConnectionEvent::Open);
        }
        state.events = Some(events);
        state.outbound = Some(outbound_rx);
        state.shutdown = Some(shutdown_rx);
        state.closed = false;
        Ok(ConnectionHandle::new(outbound_tx, shutdown_tx, None))
    }
}
