//! Audio device enumeration and microphone acquisition

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::audio::capture::CpalInputStream;
use crate::audio::{InputBackend, InputCallback, InputFormat, InputStream, Microphone};
use crate::error::AudioError;

/// Device summary for listings
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    let (sample_rates, channels) = get_device_capabilities(&device, false);
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                        sample_rates,
                        channels,
                    });
                }
            }
        }
    }

    devices
}

fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in configs {
        for rate_val in [16_000u32, 24_000, 44_100, 48_000, 96_000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }
    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

/// Map a backend message onto the error taxonomy. Platforms report denied
/// microphone access as backend-specific errors.
pub(crate) fn classify_backend_error(message: String) -> AudioError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        AudioError::PermissionDenied(message)
    } else {
        AudioError::CpalError(message)
    }
}

fn map_default_config_error(e: cpal::DefaultStreamConfigError) -> AudioError {
    match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            AudioError::DeviceNotFound("device not available".to_string())
        }
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            AudioError::DeviceNotFound("device has no input".to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err } => {
            classify_backend_error(err.description)
        }
    }
}

/// Find an input device by name, or the default one
pub fn get_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

/// Find an output device by name, or the default one
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

/// Microphones from the default cpal host
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl InputBackend for CpalInput {
    fn acquire(&self) -> Result<Box<dyn Microphone>, AudioError> {
        let device = get_input_device(self.device_name.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = device
            .default_input_config()
            .map_err(map_default_config_error)?;

        tracing::info!(
            "Acquired microphone {} ({} Hz, {} ch, {:?})",
            name,
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );

        Ok(Box::new(CpalMicrophone {
            device: Some(device),
            name,
            config,
        }))
    }
}

/// A cpal input device held for the session
pub struct CpalMicrophone {
    device: Option<cpal::Device>,
    name: String,
    config: cpal::SupportedStreamConfig,
}

impl Microphone for CpalMicrophone {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> InputFormat {
        InputFormat {
            sample_rate: self.config.sample_rate().0,
            channels: self.config.channels(),
        }
    }

    fn open_stream(&mut self, callback: InputCallback) -> Result<Box<dyn InputStream>, AudioError> {
        let device = self
            .device
            .clone()
            .ok_or_else(|| AudioError::DeviceNotFound(format!("{} was released", self.name)))?;
        let stream = CpalInputStream::start(device, self.config.clone(), callback)?;
        Ok(Box::new(stream))
    }

    fn release(&mut self) -> Result<(), AudioError> {
        if self.device.take().is_some() {
            tracing::debug!("Released microphone {}", self.name);
        }
        Ok(())
    }

    fn is_acquired(&self) -> bool {
        self.device.is_some()
    }
}
