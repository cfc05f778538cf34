//! Audio capture from the microphone
//!
//! The cpal stream lives on its own thread. Each device callback is
//! down-mixed, resampled to the capture rate and cut into fixed-size frames
//! which go straight to the frame sink; only the partial frame left over
//! from a callback is kept.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::audio::{InputCallback, InputStream, Microphone};
use crate::codec::{downmix_to_mono, float_to_pcm16, StreamResampler, RESAMPLER_CHUNK_FRAMES};
use crate::constants::STREAM_ERROR_CHANNEL_CAPACITY;
use crate::error::{AudioError, CodecError};

/// Receives complete frames, in capture order
pub type FrameSink = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// Turns device callbacks into fixed-size mono frames at the target rate
pub struct FrameChunker {
    /// Channels of the device callbacks
    channels: u16,
    target_rate: u32,
    /// Samples per emitted frame
    frame_samples: usize,
    /// Device rate to the capture rate
    resampler: StreamResampler,
    /// Resampled samples not yet making up a whole frame
    pending: Vec<f32>,
    scratch: Vec<f32>,
    /// Sequence number of the next frame
    sequence: u32,
    samples_emitted: u64,
}

impl FrameChunker {
    pub fn new(
        source_rate: u32,
        channels: u16,
        target_rate: u32,
        frame_samples: usize,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            channels,
            target_rate,
            frame_samples: frame_samples.max(1),
            resampler: StreamResampler::new(source_rate, target_rate, RESAMPLER_CHUNK_FRAMES)?,
            pending: Vec::with_capacity(frame_samples * 2),
            scratch: Vec::new(),
            sequence: 0,
            samples_emitted: 0,
        })
    }

    /// Feed one device callback worth of interleaved samples
    pub fn push<F>(&mut self, interleaved: &[f32], mut emit: F) -> Result<(), CodecError>
    where
        F: FnMut(AudioFrame),
    {
        let mono = downmix_to_mono(interleaved, self.channels);
        self.scratch.clear();
        self.resampler.process(&mono, &mut self.scratch)?;
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.frame_samples {
            let samples = float_to_pcm16(&self.pending[..self.frame_samples]);
            self.pending.drain(..self.frame_samples);

            let timestamp_us = self.samples_emitted * 1_000_000 / self.target_rate.max(1) as u64;
            let frame = AudioFrame::new(samples, self.sequence).with_timestamp(timestamp_us);
            self.sequence = self.sequence.wrapping_add(1);
            self.samples_emitted += self.frame_samples as u64;
            emit(frame);
        }
        Ok(())
    }

    /// Samples waiting for the next frame
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_emitted(&self) -> u32 {
        self.sequence
    }
}

/// Running capture: microphone stream feeding a frame sink
pub struct CapturePipeline {
    /// `None` once stopped
    stream: Option<Box<dyn InputStream>>,
    /// Cleared to stop forwarding before the stream itself is torn down
    attached: Arc<AtomicBool>,
    frames_delivered: Arc<AtomicU64>,
}

impl CapturePipeline {
    /// Open a stream on `microphone` and start delivering frames to `sink`
    pub fn start(
        microphone: &mut dyn Microphone,
        target_rate: u32,
        frame_samples: usize,
        mut sink: FrameSink,
    ) -> Result<Self, AudioError> {
        let format = microphone.format();
        let attached = Arc::new(AtomicBool::new(true));
        let frames_delivered = Arc::new(AtomicU64::new(0));

        let mut chunker =
            FrameChunker::new(format.sample_rate, format.channels, target_rate, frame_samples)
                .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        let attached_cb = attached.clone();
        let delivered_cb = frames_delivered.clone();

        let callback: InputCallback = Box::new(move |data: &[f32]| {
            if !attached_cb.load(Ordering::Relaxed) {
                return;
            }
            let pushed = chunker.push(data, |frame| {
                delivered_cb.fetch_add(1, Ordering::Relaxed);
                sink(frame);
            });
            if let Err(e) = pushed {
                tracing::warn!("Dropping capture block: {}", e);
            }
        });

        let stream = microphone.open_stream(callback)?;
        tracing::info!(
            "Capture started on {} ({} Hz x{} -> {} Hz, {} samples/frame)",
            microphone.name(),
            format.sample_rate,
            format.channels,
            target_rate,
            frame_samples
        );

        Ok(Self {
            stream: Some(stream),
            attached,
            frames_delivered,
        })
    }

    /// Stop forwarding frames to the sink
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Disconnect the stream. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        self.detach();
        match self.stream.take() {
            Some(mut stream) => stream.stop(),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_running()).unwrap_or(false)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// cpal input stream owned by a dedicated thread
pub struct CpalInputStream {
    /// Cleared to let the capture thread drop the stream
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    /// Errors reported by the cpal error callback
    error_rx: Receiver<AudioError>,
}

impl CpalInputStream {
    /// Build and play the stream, waiting until the thread reports success
    pub fn start(
        device: cpal::Device,
        config: cpal::SupportedStreamConfig,
        callback: InputCallback,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (error_tx, error_rx) = bounded::<AudioError>(STREAM_ERROR_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name("capture-input".to_string())
            .spawn(move || {
                let sample_format = config.sample_format();
                let stream_config: cpal::StreamConfig = config.into();

                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_input::<f32>(&device, &stream_config, callback, error_tx)
                    }
                    cpal::SampleFormat::I16 => {
                        build_input::<i16>(&device, &stream_config, callback, error_tx)
                    }
                    cpal::SampleFormat::U16 => {
                        build_input::<u16>(&device, &stream_config, callback, error_tx)
                    }
                    cpal::SampleFormat::I32 => {
                        build_input::<i32>(&device, &stream_config, callback, error_tx)
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

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
                drop(stream);
                tracing::debug!("Capture thread exiting");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".to_string())));

        let mut stream = Self {
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
                .map_err(|_| AudioError::StreamError("capture thread panicked".to_string())),
            None => Ok(()),
        }
    }

    /// Next error reported by the cpal error callback, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: InputCallback,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|s| s.to_sample::<f32>()));
            callback(&scratch);
        },
        move |err| {
            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

impl InputStream for CpalInputStream {
    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(err) = self.check_errors() {
            tracing::warn!("Capture stream reported: {}", err);
        }
        self.join()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread_handle.is_some()
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        let _ = InputStream::stop(self);
    }
}
