//! Microphone capture
//!
//! Platform-agnostic capture trait plus the cpal-backed implementation.
//! The capture source delivers fixed-size blocks of signed 16-bit PCM on a
//! dedicated callback thread and knows nothing about encoders; fan-out is
//! the session's job.

use crate::error::{RecorderError, RecorderResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Index into the host's input device list
    pub index: usize,

    /// Device display name
    pub name: String,

    /// Whether this is the host default input
    pub is_default: bool,
}

/// Parameters for opening a capture stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSpec {
    /// Input device index (None = host default)
    pub device_index: Option<usize>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (the pipeline records mono)
    pub channels: u16,

    /// Frames per delivered buffer
    pub buffer_frames: u32,
}

/// Callback receiving interleaved i16 PCM buffers on the capture thread.
///
/// Must return quickly; it runs on the device callback path.
pub type BufferCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// A source of PCM buffers. One open stream at a time.
pub trait CaptureBackend: Send {
    /// Open the device and begin delivering buffers to `on_buffer`.
    fn open(&mut self, spec: &CaptureSpec, on_buffer: BufferCallback) -> RecorderResult<()>;

    /// Stop buffer delivery and release the device. Safe to call when closed.
    fn close(&mut self);
}

/// Enumerate input devices with at least one input channel
pub fn list_input_devices() -> RecorderResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let devices = host
        .input_devices()
        .map_err(|e| RecorderError::Device(format!("failed to enumerate input devices: {}", e)))?;

    let mut result = Vec::new();
    for (index, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| format!("Device {}", index));
        result.push(AudioDeviceInfo {
            index,
            is_default: name == default_name,
            name,
        });
    }
    Ok(result)
}

/// cpal-backed capture source.
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for the
/// whole capture; `close` flips a flag and joins that thread.
pub struct CpalCapture {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    fn select_device(spec: &CaptureSpec) -> RecorderResult<cpal::Device> {
        let host = cpal::default_host();
        match spec.device_index {
            Some(index) => host
                .input_devices()
                .map_err(|e| RecorderError::Device(e.to_string()))?
                .nth(index)
                .ok_or_else(|| {
                    RecorderError::Device(format!("input device index {} not found", index))
                }),
            None => host
                .default_input_device()
                .ok_or_else(|| RecorderError::Device("no default input device".into())),
        }
    }

    fn build_stream(
        device: &cpal::Device,
        spec: &CaptureSpec,
        mut on_buffer: BufferCallback,
    ) -> RecorderResult<cpal::Stream> {
        let sample_format = device
            .default_input_config()
            .map_err(|e| RecorderError::Device(format!("no input config: {}", e)))?
            .sample_format();

        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: SampleRate(spec.sample_rate),
            buffer_size: BufferSize::Fixed(spec.buffer_frames),
        };

        let err_fn = |err| tracing::warn!("audio stream error: {}", err);

        let stream = match sample_format {
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| on_buffer(data),
                    err_fn,
                    None,
                )
                .map_err(|e| RecorderError::Device(e.to_string()))?,

            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<i16> =
                            data.iter().map(|&s| (s * 32767.0) as i16).collect();
                        on_buffer(&converted);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| RecorderError::Device(e.to_string()))?,

            other => {
                return Err(RecorderError::Device(format!(
                    "unsupported sample format: {:?}",
                    other
                )))
            }
        };

        Ok(stream)
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalCapture {
    fn open(&mut self, spec: &CaptureSpec, on_buffer: BufferCallback) -> RecorderResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RecorderError::Device("capture already open".into()));
        }

        self.running.store(true, Ordering::SeqCst);

        let spec = spec.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<RecorderResult<()>>();

        let thread_running = Arc::clone(&self.running);
        let handle = std::thread::spawn(move || {
            let stream = Self::select_device(&spec)
                .and_then(|device| Self::build_stream(&device, &spec, on_buffer))
                .and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| RecorderError::Device(e.to_string()))?;
                    Ok(stream)
                });

            let stream = match stream {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    thread_running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while thread_running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(RecorderError::Device("capture thread exited early".into()))
            }
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}
