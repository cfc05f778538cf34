//! Audio output through cpal
//!
//! The [`Mixer`] keeps its timeline at the requested playback rate. When
//! the device cannot open at that rate, a [`DeviceRenderer`] pulls the
//! timeline through a band-limited resampler to the device rate.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::buffer::SharedPlaybackBuffer;
use crate::audio::device::get_output_device;
use crate::audio::mixer::Mixer;
use crate::audio::playback::SourceId;
use crate::audio::{OutputBackend, OutputStream};
use crate::codec::{StreamResampler, RESAMPLER_CHUNK_FRAMES};
use crate::constants::STREAM_ERROR_CHANNEL_CAPACITY;
use crate::error::{AudioError, CodecError};

/// Output streams on the default cpal host
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl OutputBackend for CpalOutput {
    fn open(
        &self,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputStream>, AudioError> {
        let stream = CpalOutputStream::start(self.device_name.clone(), sample_rate, completions)?;
        Ok(Box::new(stream))
    }
}

/// Pick the device config: the requested rate when supported, else the
/// device default
fn choose_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let requested = cpal::SampleRate(sample_rate);
    if let Ok(configs) = device.supported_output_configs() {
        for range in configs {
            if range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= requested
                && requested <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(requested));
            }
        }
    }
    device
        .default_output_config()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
}

/// Fills device-sized interleaved blocks from the mixer timeline
pub struct DeviceRenderer {
    /// Timeline shared with the stream handle
    mixer: Arc<Mutex<Mixer>>,
    /// Timeline rate to device rate
    resampler: StreamResampler,
    /// Device-rate mono samples not yet handed to the device
    ready: VecDeque<f32>,
    /// Timeline block rendered for the next resampler pass
    block: Vec<f32>,
    converted: Vec<f32>,
}

impl DeviceRenderer {
    pub fn new(mixer: Arc<Mutex<Mixer>>, device_rate: u32) -> Result<Self, CodecError> {
        let timeline_rate = mixer.lock().sample_rate();
        let resampler = StreamResampler::new(timeline_rate, device_rate, RESAMPLER_CHUNK_FRAMES)?;
        Ok(Self {
            mixer,
            resampler,
            ready: VecDeque::new(),
            block: Vec::new(),
            converted: Vec::new(),
        })
    }

    /// Fill interleaved `out`, copying the mono signal to every channel.
    /// Sources whose end the timeline passed are pushed onto `finished`.
    pub fn fill(
        &mut self,
        out: &mut [f32],
        channels: usize,
        finished: &mut Vec<SourceId>,
    ) -> Result<(), CodecError> {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        while self.ready.len() < frames {
            let wanted = self
                .resampler
                .input_frames_next()
                .unwrap_or(frames - self.ready.len());
            self.block.resize(wanted, 0.0);
            self.mixer.lock().render(&mut self.block, finished);

            self.converted.clear();
            self.resampler.process(&self.block, &mut self.converted)?;
            if self.converted.is_empty() {
                break;
            }
            self.ready.extend(self.converted.iter().copied());
        }

        for frame in out.chunks_exact_mut(channels) {
            let value = self.ready.pop_front().unwrap_or(0.0);
            frame.fill(value.clamp(-1.0, 1.0));
        }
        // Trailing partial frame, if any
        out[frames * channels..].fill(0.0);
        Ok(())
    }
}

/// cpal output stream owned by a dedicated thread
pub struct CpalOutputStream {
    /// Timeline the scheduler places sources on
    mixer: Arc<Mutex<Mixer>>,
    /// Rate of the timeline, which may differ from the device rate
    timeline_rate: u32,
    /// Reports sources that will never play
    completions: mpsc::UnboundedSender<SourceId>,
    /// Cleared to let the output thread drop the stream
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl CpalOutputStream {
    pub fn start(
        device_name: Option<String>,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self, AudioError> {
        let device = get_output_device(device_name.as_deref())?;
        let config = choose_config(&device, sample_rate)?;
        let output_rate = config.sample_rate().0;

        tracing::info!(
            "Opening output {} ({} Hz, {} ch, {:?}), timeline at {} Hz",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            output_rate,
            config.channels(),
            config.sample_format(),
            sample_rate
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let renderer = DeviceRenderer::new(mixer.clone(), output_rate)
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        let running = Arc::new(AtomicBool::new(true));
        let (error_tx, error_rx) = bounded::<AudioError>(STREAM_ERROR_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let completions_for_thread = completions.clone();
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let sample_format = config.sample_format();
                let stream_config: cpal::StreamConfig = config.into();
                let render = RenderContext {
                    renderer,
                    completions: completions_for_thread,
                    channels: stream_config.channels as usize,
                };

                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_output::<f32>(&device, &stream_config, render, error_tx)
                    }
                    cpal::SampleFormat::I16 => {
                        build_output::<i16>(&device, &stream_config, render, error_tx)
                    }
                    cpal::SampleFormat::U16 => {
                        build_output::<u16>(&device, &stream_config, render, error_tx)
                    }
                    cpal::SampleFormat::I32 => {
                        build_output::<i32>(&device, &stream_config, render, error_tx)
                    }
                    other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
                tracing::debug!("Playback thread exiting");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("playback thread exited".to_string())));

        let mut stream = Self {
            mixer,
            timeline_rate: sample_rate.max(1),
            completions,
            running,
            thread_handle: Some(handle),
            error_rx,
        };
        if let Err(e) = ready {
            stream.running.store(false, Ordering::SeqCst);
            let _ = stream.join();
            return Err(e);
        }
        Ok(stream)
    }

    fn join(&mut self) -> Result<(), AudioError> {
        match self.thread_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AudioError::StreamError("playback thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

struct RenderContext {
    renderer: DeviceRenderer,
    completions: mpsc::UnboundedSender<SourceId>,
    channels: usize,
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut render: RenderContext,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let mut finished: Vec<SourceId> = Vec::new();
    let render_errors = error_tx.clone();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            if let Err(e) = render.renderer.fill(&mut scratch, render.channels, &mut finished) {
                scratch.fill(0.0);
                let _ = render_errors.try_send(AudioError::StreamError(e.to_string()));
            }
            for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                *out = s.to_sample::<T>();
            }
            for id in finished.drain(..) {
                let _ = render.completions.send(id);
            }
        },
        move |err| {
            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

impl OutputStream for CpalOutputStream {
    fn now(&self) -> f64 {
        self.mixer.lock().now()
    }

    fn start_source(&mut self, id: SourceId, at: f64, buffer: SharedPlaybackBuffer) {
        let buffer = if buffer.sample_rate() == self.timeline_rate {
            buffer
        } else {
            match buffer.resampled(self.timeline_rate) {
                Ok(converted) => converted.into_shared(),
                Err(e) => {
                    tracing::warn!("Dropping {}: {}", id, e);
                    let _ = self.completions.send(id);
                    return;
                }
            }
        };
        self.mixer.lock().add(id, at, buffer);
    }

    fn stop_source(&mut self, id: SourceId) -> bool {
        self.mixer.lock().remove(id)
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(err) = self.error_rx.try_recv() {
            tracing::warn!("Playback stream reported: {}", err);
        }
        let result = self.join();
        self.mixer.lock().clear();
        result
    }

    fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread_handle.is_some()
    }
}

impl Drop for CpalOutputStream {
    fn drop(&mut self) {
        let _ = OutputStream::close(self);
    }
}
