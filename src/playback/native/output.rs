use super::decoder::{DecoderError, EpisodeDecoder};
use super::SharedPosition;
use crate::playback::transport::{TransportError, TransportEvent};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use symphonia::core::audio::{AudioBufferRef, Signal};
use thiserror::Error;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, error, info, warn};

const POSITION_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No output device found")]
    DeviceNotFound,
    #[error("Stream config error: {0}")]
    StreamConfig(String),
    #[error("Stream build error: {0}")]
    StreamBuild(String),
    #[error("Stream play error: {0}")]
    StreamPlay(String),
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error("Superseded by a newer load")]
    Superseded,
}

/// Requests for the audio thread
pub enum AudioCommand {
    /// Open `data` for `load_id` and start playing
    Open {
        load_id: u64,
        data: Vec<u8>,
        extension: Option<String>,
        reply: oneshot::Sender<Result<(), AudioError>>,
    },
    /// Resume the stream already open for `load_id`
    Resume {
        load_id: u64,
        reply: oneshot::Sender<Result<(), AudioError>>,
    },
    Pause,
    Seek(f64),
    SetRate(f64),
    /// Drop the current stream
    Unload,
}

/// Flags shared between the audio thread and the stream callback
struct StreamControl {
    paused: AtomicBool,
    finished: AtomicBool,
    failed: AtomicBool,
    rate_bits: AtomicU64,
    seek_request: Mutex<Option<f64>>,
}

impl StreamControl {
    fn new(rate: f64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            rate_bits: AtomicU64::new(rate.to_bits()),
            seek_request: Mutex::new(None),
        }
    }

    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    fn take_seek(&self) -> Option<f64> {
        self.seek_request.lock().ok().and_then(|mut seek| seek.take())
    }

    fn request_seek(&self, position: f64) {
        if let Ok(mut seek) = self.seek_request.lock() {
            *seek = Some(position);
        }
    }

    /// Stop output after an error; a later resume retries from `position`
    fn fail(&self) {
        self.failed.store(true, Ordering::Relaxed);
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Unpause. Returns the position playback restarts from when it has to
    /// move: where it failed, or the top after the end was reached.
    fn resume(&self, position: f64) -> Option<f64> {
        let restart = if self.failed.swap(false, Ordering::Relaxed) {
            Some(position)
        } else if self.finished.load(Ordering::Relaxed) {
            Some(0.0)
        } else {
            None
        };
        if let Some(target) = restart {
            self.request_seek(target);
            self.finished.store(false, Ordering::Relaxed);
        }
        self.paused.store(false, Ordering::Relaxed);
        restart
    }
}

struct ActiveStream {
    load_id: u64,
    control: Arc<StreamControl>,
    // Dropping the stream stops the callback
    _stream: Stream,
}

/// Audio output using CPAL. Lives on its own thread since `cpal::Stream`
/// is not `Send`.
pub struct AudioOutput {
    device: Device,
    stream_config: StreamConfig,
    events_tx: tokio_mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<SharedPosition>,
    current_load: Arc<AtomicU64>,
    rate: f64,
    start_at: Option<f64>,
    active: Option<ActiveStream>,
}

impl AudioOutput {
    pub fn new(
        events_tx: tokio_mpsc::UnboundedSender<TransportEvent>,
        shared: Arc<SharedPosition>,
        current_load: Arc<AtomicU64>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::DeviceNotFound)?;

        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::StreamConfig(e.to_string()))?;

        let sample_format = default_config.sample_format();
        let stream_config = StreamConfig::from(default_config);

        info!(
            "Audio device: {} channels, {} Hz, {:?}",
            stream_config.channels, stream_config.sample_rate.0, sample_format
        );

        Ok(Self {
            device,
            stream_config,
            events_tx,
            shared,
            current_load,
            rate: 1.0,
            start_at: None,
            active: None,
        })
    }

    /// Process commands until every sender is gone
    pub fn run(mut self, command_rx: mpsc::Receiver<AudioCommand>) {
        while let Ok(command) = command_rx.recv() {
            match command {
                AudioCommand::Open {
                    load_id,
                    data,
                    extension,
                    reply,
                } => {
                    let _ = reply.send(self.open(load_id, data, extension.as_deref()));
                }
                AudioCommand::Resume { load_id, reply } => {
                    let _ = reply.send(self.resume(load_id));
                }
                AudioCommand::Pause => self.pause(),
                AudioCommand::Seek(position) => self.seek(position),
                AudioCommand::SetRate(rate) => self.set_rate(rate),
                AudioCommand::Unload => {
                    self.start_at = None;
                    if self.active.take().is_some() {
                        debug!("Dropped audio stream");
                    }
                }
            }
        }
        info!("Audio thread exiting");
    }

    fn emit(&self, load_id: u64, event: TransportEvent) {
        if self.current_load.load(Ordering::SeqCst) == load_id {
            let _ = self.events_tx.send(event);
        }
    }

    fn open(
        &mut self,
        load_id: u64,
        data: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<(), AudioError> {
        if self.current_load.load(Ordering::SeqCst) != load_id {
            return Err(AudioError::Superseded);
        }
        self.active = None;
        let mut decoder = EpisodeDecoder::new(data, extension)?;
        if let Some(duration) = decoder.duration() {
            self.shared.set_duration(duration);
            self.emit(load_id, TransportEvent::DurationResolved { duration });
        }
        if let Some(start_at) = self.start_at.take() {
            let landed = decoder.seek(start_at)?;
            self.shared.set_position(landed);
        }

        let control = Arc::new(StreamControl::new(self.rate));
        let stream = self.create_stream(load_id, decoder, control.clone())?;
        stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

        self.active = Some(ActiveStream {
            load_id,
            control,
            _stream: stream,
        });
        self.emit(load_id, TransportEvent::Started);
        Ok(())
    }

    fn resume(&mut self, load_id: u64) -> Result<(), AudioError> {
        let Some(active) = self.active.as_ref().filter(|a| a.load_id == load_id) else {
            return Err(AudioError::StreamPlay("no open stream".to_string()));
        };
        if let Some(restart) = active.control.resume(self.shared.position()) {
            debug!("Resuming from {:.3}s", restart);
        }
        self.emit(load_id, TransportEvent::Started);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(active) = &self.active {
            if !active.control.paused.swap(true, Ordering::Relaxed) {
                self.emit(active.load_id, TransportEvent::Paused);
            }
        }
    }

    fn seek(&mut self, position: f64) {
        match &self.active {
            Some(active) => active.control.request_seek(position),
            None => {
                // Nothing open yet; applied when the stream opens
                self.start_at = Some(position);
                self.shared.set_position(position);
                let load_id = self.current_load.load(Ordering::SeqCst);
                self.emit(load_id, TransportEvent::Seeked { position });
            }
        }
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.shared.set_rate(rate);
        if let Some(active) = &self.active {
            active.control.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        }
        let load_id = self.current_load.load(Ordering::SeqCst);
        self.emit(load_id, TransportEvent::RateChanged { rate });
    }

    fn create_stream(
        &self,
        load_id: u64,
        mut decoder: EpisodeDecoder,
        control: Arc<StreamControl>,
    ) -> Result<Stream, AudioError> {
        let output_rate = self.stream_config.sample_rate.0;
        let channels = self.stream_config.channels as usize;
        let decoder_rate = decoder.sample_rate();

        let events_tx = self.events_tx.clone();
        let current_load = self.current_load.clone();
        let shared = self.shared.clone();
        let emit = move |event: TransportEvent| {
            if current_load.load(Ordering::SeqCst) == load_id {
                let _ = events_tx.send(event);
            }
        };
        let error_control = control.clone();
        let error_emit = emit.clone();

        let mut sample_buffer: Vec<f32> = Vec::new();
        let mut buffer_pos = 0usize;
        let mut last_position_update = Instant::now();

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if let Some(target) = control.take_seek() {
                        match decoder.seek(target) {
                            Ok(landed) => {
                                sample_buffer.clear();
                                buffer_pos = 0;
                                control.finished.store(false, Ordering::Relaxed);
                                shared.set_position(landed);
                                emit(TransportEvent::Seeked { position: landed });
                            }
                            Err(e) => error!("Seek to {:.3}s failed: {:?}", target, e),
                        }
                    }

                    if control.paused.load(Ordering::Relaxed)
                        || control.finished.load(Ordering::Relaxed)
                    {
                        data.fill(0.0);
                        return;
                    }

                    // Playing faster consumes source frames faster
                    let ratio = decoder_rate as f64 * control.rate() / output_rate as f64;

                    let mut output_pos = 0;
                    while output_pos < data.len() {
                        if buffer_pos >= sample_buffer.len() {
                            let position = decoder.position();
                            match decoder.decode_next() {
                                Ok(Some(audio_buf)) => {
                                    let decoder_channels = audio_buf.spec().channels.count();
                                    let Some(interleaved) = interleave(audio_buf) else {
                                        warn!("Unsupported audio buffer format");
                                        control.fail();
                                        shared.set_position(position);
                                        emit(TransportEvent::Failed {
                                            error: TransportError::Decode(
                                                "unsupported sample format".to_string(),
                                            ),
                                        });
                                        data[output_pos..].fill(0.0);
                                        return;
                                    };
                                    let resampled = resample(interleaved, decoder_channels, ratio);
                                    sample_buffer = remix(resampled, decoder_channels, channels);
                                    buffer_pos = 0;
                                }
                                Ok(None) => {
                                    control.finished.store(true, Ordering::Relaxed);
                                    shared.set_position(position);
                                    emit(TransportEvent::Ended);
                                    data[output_pos..].fill(0.0);
                                    return;
                                }
                                Err(e) => {
                                    error!("Decoder error: {:?}", e);
                                    control.fail();
                                    shared.set_position(position);
                                    emit(TransportEvent::Failed {
                                        error: TransportError::Decode(e.to_string()),
                                    });
                                    data[output_pos..].fill(0.0);
                                    return;
                                }
                            }
                        }

                        while output_pos < data.len() && buffer_pos < sample_buffer.len() {
                            data[output_pos] = sample_buffer[buffer_pos];
                            output_pos += 1;
                            buffer_pos += 1;
                        }
                    }

                    if last_position_update.elapsed() >= POSITION_UPDATE_INTERVAL {
                        let position = decoder.position();
                        shared.set_position(position);
                        emit(TransportEvent::PositionUpdated {
                            position,
                            duration: shared.duration(),
                        });
                        last_position_update = Instant::now();
                    }
                },
                move |err| {
                    error!("Audio stream error: {:?}", err);
                    if !error_control.failed.load(Ordering::Relaxed) {
                        error_control.fail();
                        error_emit(TransportEvent::Failed {
                            error: TransportError::Output(err.to_string()),
                        });
                    }
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        Ok(stream)
    }
}

/// Interleave a decoded buffer as f32 samples
fn interleave(audio_buf: AudioBufferRef<'_>) -> Option<Vec<f32>> {
    let frames = audio_buf.frames();
    let channels = audio_buf.spec().channels.count();
    let mut samples = Vec::with_capacity(frames * channels);

    match audio_buf {
        AudioBufferRef::F32(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push(buf.chan(ch)[frame]);
                }
            }
        }
        AudioBufferRef::S16(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push(buf.chan(ch)[frame] as f32 / 32768.0);
                }
            }
        }
        AudioBufferRef::S32(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push(buf.chan(ch)[frame] as f32 / 2147483648.0);
                }
            }
        }
        _ => return None,
    }

    Some(samples)
}

/// Nearest-neighbour resampling by `ratio` source frames per output frame
fn resample(samples: Vec<f32>, channels: usize, ratio: f64) -> Vec<f32> {
    if channels == 0 || (ratio - 1.0).abs() < f64::EPSILON {
        return samples;
    }

    let input_frames = samples.len() / channels;
    let output_frames = (input_frames as f64 / ratio) as usize;
    let mut resampled = Vec::with_capacity(output_frames * channels);

    for frame in 0..output_frames {
        let src = (frame as f64 * ratio) as usize;
        for ch in 0..channels {
            resampled.push(samples.get(src * channels + ch).copied().unwrap_or(0.0));
        }
    }

    resampled
}

/// Map `from` interleaved channels to `to`
fn remix(samples: Vec<f32>, from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 {
        return samples;
    }

    let frames = samples.len() / from;
    let mut converted = Vec::with_capacity(frames * to);
    for frame in 0..frames {
        let base = frame * from;
        if to == 1 {
            converted.push(samples[base]);
        } else if from == 1 {
            // Mono source: duplicate into every output channel
            converted.extend(std::iter::repeat(samples[base]).take(to));
        } else {
            for ch in 0..to {
                converted.push(if ch < from { samples[base + ch] } else { 0.0 });
            }
        }
    }
    converted
}
