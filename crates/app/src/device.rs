use std::{
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use metronome_core::{AudioOutput, ClipHandle, MetronomeError, Result};

/// Clip currently sounding, and how far into it the device has read.
#[derive(Debug, Default)]
struct Voice {
    clip: Option<ClipHandle>,
    position: f64,
}

impl Voice {
    fn start(&mut self, clip: ClipHandle) {
        self.clip = Some(clip);
        self.position = 0.0;
    }

    /// Next mono sample for a device running at `device_rate`. Clips are
    /// resampled by nearest neighbour; silence once the clip has finished.
    fn next(&mut self, device_rate: f64) -> f32 {
        let position = self.position;
        let current = self.clip.as_ref().and_then(|clip| {
            clip.samples()
                .get(position as usize)
                .map(|&sample| (sample, clip.sample_rate()))
        });
        match current {
            Some((sample, clip_rate)) => {
                self.position += f64::from(clip_rate) / device_rate;
                f32::from(sample) / 32_768.0
            }
            None => {
                self.clip = None;
                0.0
            }
        }
    }
}

/// Plays clicks on the default output device of the default host.
///
/// The cpal stream is not `Send` on every platform, so it lives on its own
/// thread for as long as the output exists.
#[derive(Debug, Default)]
pub struct DeviceOutput {
    voice: Arc<Mutex<Voice>>,
    stream: Mutex<Option<mpsc::Sender<()>>>,
}

impl DeviceOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_voice(&self) -> std::sync::MutexGuard<'_, Voice> {
        self.voice.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioOutput for DeviceOutput {
    fn activate(&self) -> Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if stream.is_some() {
            return Ok(());
        }

        let voice = Arc::clone(&self.voice);
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        thread::Builder::new()
            .name("metronome-audio".to_string())
            .spawn(move || match open_stream(voice) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until the output is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("audio stream closed");
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(session_error)?;

        ready_rx
            .recv()
            .map_err(|_| session_error("audio thread exited before the stream started"))??;
        *stream = Some(stop_tx);
        Ok(())
    }

    fn play(&self, clip: &ClipHandle) -> Result<()> {
        let started = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if !started {
            return Err(MetronomeError::PlaybackFailed(
                "audio device has not been started".to_string(),
            ));
        }
        self.lock_voice().start(clip.clone());
        Ok(())
    }
}

fn session_error(err: impl ToString) -> MetronomeError {
    MetronomeError::AudioSessionConfigurationFailed(err.to_string())
}

fn open_stream(voice: Arc<Mutex<Voice>>) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| session_error("no audio output device found"))?;
    let supported = device.default_output_config().map_err(session_error)?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, voice),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, voice),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, voice),
        other => Err(session_error(format!("unsupported sample format {other:?}"))),
    }?;
    stream.play().map_err(session_error)?;

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio output started"
    );
    Ok(stream)
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    voice: Arc<Mutex<Voice>>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = usize::from(config.channels).max(1);
    let device_rate = f64::from(config.sample_rate.0);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Never wait on the engine thread here.
                let Ok(mut voice) = voice.try_lock() else {
                    data.fill(T::EQUILIBRIUM);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    frame.fill(T::from_sample(voice.next(device_rate)));
                }
            },
            |err| tracing::warn!(%err, "audio stream error"),
            None,
        )
        .map_err(session_error)
}
