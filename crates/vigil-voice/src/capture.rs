//! Microphone capture into a ring buffer the monitor samples once per tick.

use crate::error::VoiceResult;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A live capture. Dropping it releases the device.
pub trait AudioSource: Send + Sync {
    /// The most recent `len` samples, oldest first. Shorter while the buffer fills.
    fn latest(&self, len: usize) -> Vec<f32>;

    fn sample_rate(&self) -> u32;
}

/// Something that can be opened into an [`AudioSource`]. Opening happens while
/// arming; an error disables the audio monitor.
pub trait AudioDevice: Send + Sync {
    fn open(&self, sample_rate: u32, capacity: usize) -> VoiceResult<Box<dyn AudioSource>>;
}

/// Fixed-capacity sample history shared between the capture thread and the monitor.
#[derive(Debug, Clone)]
pub struct SampleRing {
    inner: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push_slice(&self, samples: &[f32]) {
        let Ok(mut buf) = self.inner.lock() else {
            return;
        };
        for &s in samples {
            if buf.len() == self.capacity {
                buf.pop_front();
            }
            buf.push_back(s);
        }
    }

    pub fn latest(&self, len: usize) -> Vec<f32> {
        let Ok(buf) = self.inner.lock() else {
            return Vec::new();
        };
        let skip = buf.len().saturating_sub(len);
        buf.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(feature = "capture")]
pub use microphone::{Microphone, MicrophoneSource};

#[cfg(feature = "capture")]
mod microphone {
    use super::{AudioDevice, AudioSource, SampleRing};
    use crate::error::{VoiceError, VoiceResult};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::StreamConfig;
    use std::sync::mpsc as std_mpsc;
    use std::thread;
    use tracing::{debug, info, warn};

    /// The host's default input device.
    #[derive(Debug, Default, Clone)]
    pub struct Microphone;

    impl AudioDevice for Microphone {
        fn open(&self, sample_rate: u32, capacity: usize) -> VoiceResult<Box<dyn AudioSource>> {
            Ok(Box::new(MicrophoneSource::open(sample_rate, capacity)?))
        }
    }

    /// Capture stream owned by a dedicated thread (cpal `Stream` is `!Send` on
    /// some platforms). Dropping the source stops the thread, which drops the stream.
    pub struct MicrophoneSource {
        ring: SampleRing,
        sample_rate: u32,
        stop_tx: Option<std_mpsc::Sender<()>>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl MicrophoneSource {
        pub fn open(sample_rate: u32, capacity: usize) -> VoiceResult<Self> {
            let ring = SampleRing::new(capacity);
            let writer = ring.clone();
            let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
            let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

            let thread = thread::Builder::new()
                .name("vigil-mic".to_string())
                .spawn(move || {
                    let stream = match build_stream(sample_rate, writer) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    // Park until the source is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Microphone stream closed");
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = thread.join();
                    return Err(e);
                }
                Err(_) => {
                    return Err(VoiceError::AudioStream(
                        "capture thread exited before the stream started".to_string(),
                    ))
                }
            }
            info!(sample_rate, capacity, "Microphone capture started");
            Ok(Self {
                ring,
                sample_rate,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })
        }
    }

    fn build_stream(sample_rate: u32, ring: SampleRing) -> VoiceResult<cpal::Stream> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;
        info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            "Using input device"
        );
        let default_config = device.default_input_config()?;
        debug!(?default_config, "Default input config");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| ring.push_slice(data),
            move |err| warn!("Audio stream error: {}", err),
            None,
        )?;
        stream.play()?;
        Ok(stream)
    }

    impl AudioSource for MicrophoneSource {
        fn latest(&self, len: usize) -> Vec<f32> {
            self.ring.latest(len)
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    impl Drop for MicrophoneSource {
        fn drop(&mut self) {
            if let Some(tx) = self.stop_tx.take() {
                let _ = tx.send(());
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            info!("Microphone released");
        }
    }
}
