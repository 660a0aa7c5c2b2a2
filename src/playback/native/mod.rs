//! Transport backed by reqwest, symphonia and cpal

mod decoder;
mod output;

pub use decoder::{extension_hint, DecoderError, EpisodeDecoder};
pub use output::AudioError;

use crate::playback::transport::{AudioTransport, PlayFuture, TransportError, TransportEvent};
use output::{AudioCommand, AudioOutput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, info, warn};

/// Position, duration and rate as last reported by the audio thread
pub struct SharedPosition {
    position_bits: AtomicU64,
    duration_bits: AtomicU64,
    rate_bits: AtomicU64,
}

impl Default for SharedPosition {
    fn default() -> Self {
        Self {
            position_bits: AtomicU64::new(0f64.to_bits()),
            duration_bits: AtomicU64::new(f64::NAN.to_bits()),
            rate_bits: AtomicU64::new(1f64.to_bits()),
        }
    }
}

impl SharedPosition {
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Relaxed))
    }

    pub fn set_position(&self, position: f64) {
        self.position_bits
            .store(position.to_bits(), Ordering::Relaxed);
    }

    pub fn duration(&self) -> f64 {
        f64::from_bits(self.duration_bits.load(Ordering::Relaxed))
    }

    pub fn set_duration(&self, duration: f64) {
        self.duration_bits
            .store(duration.to_bits(), Ordering::Relaxed);
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    pub fn set_rate(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    fn reset(&self) {
        self.set_position(0.0);
        self.set_duration(f64::NAN);
    }
}

/// Plays episodes fetched over HTTP on the default output device.
///
/// The whole file is downloaded on the first `play()` after a load, then
/// decoded and played on a dedicated audio thread.
pub struct NativeTransport {
    audio_tx: mpsc::Sender<AudioCommand>,
    shared: Arc<SharedPosition>,
    current_load: Arc<AtomicU64>,
    opened_load: Arc<AtomicU64>,
    client: reqwest::Client,
    url: Option<String>,
}

impl NativeTransport {
    /// Open the default output device. Returns the transport and its event
    /// stream.
    pub fn new() -> Result<(Self, tokio_mpsc::UnboundedReceiver<TransportEvent>), AudioError> {
        let (events_tx, events_rx) = tokio_mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();

        let shared = Arc::new(SharedPosition::default());
        let current_load = Arc::new(AtomicU64::new(0));

        let shared_for_thread = shared.clone();
        let load_for_thread = current_load.clone();
        std::thread::Builder::new()
            .name("castsync-audio".to_string())
            .spawn(move || {
                match AudioOutput::new(events_tx, shared_for_thread, load_for_thread) {
                    Ok(output) => {
                        let _ = init_tx.send(Ok(()));
                        output.run(audio_rx);
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        init_rx
            .recv()
            .map_err(|_| AudioError::StreamBuild("audio thread exited".to_string()))??;

        info!("Native audio transport ready");

        Ok((
            Self {
                audio_tx,
                shared,
                current_load,
                opened_load: Arc::new(AtomicU64::new(0)),
                client: reqwest::Client::new(),
                url: None,
            },
            events_rx,
        ))
    }

    fn send(&self, command: AudioCommand) {
        if self.audio_tx.send(command).is_err() {
            warn!("Audio thread is gone, dropping command");
        }
    }
}

fn output_error(e: AudioError) -> TransportError {
    match e {
        AudioError::Decoder(e) => TransportError::Decode(e.to_string()),
        AudioError::Superseded => TransportError::Load(e.to_string()),
        e => TransportError::Output(e.to_string()),
    }
}

async fn request(
    audio_tx: &mpsc::Sender<AudioCommand>,
    command: impl FnOnce(oneshot::Sender<Result<(), AudioError>>) -> AudioCommand,
) -> Result<(), TransportError> {
    let (reply, reply_rx) = oneshot::channel();
    audio_tx
        .send(command(reply))
        .map_err(|_| TransportError::Output("audio thread is gone".to_string()))?;
    reply_rx
        .await
        .map_err(|_| TransportError::Output("audio thread dropped the request".to_string()))?
        .map_err(output_error)
}

impl AudioTransport for NativeTransport {
    fn load(&mut self, url: &str) -> Result<(), TransportError> {
        reqwest::Url::parse(url).map_err(|e| TransportError::Load(e.to_string()))?;

        let load_id = self.current_load.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(AudioCommand::Unload);
        self.shared.reset();
        self.url = Some(url.to_string());
        debug!("Loaded {} as {}", url, load_id);
        Ok(())
    }

    fn play(&mut self) -> PlayFuture {
        let Some(url) = self.url.clone() else {
            return Box::pin(futures::future::ready(Err(TransportError::NoSource)));
        };

        let load_id = self.current_load.load(Ordering::SeqCst);
        let opened_load = self.opened_load.clone();
        let audio_tx = self.audio_tx.clone();
        let client = self.client.clone();

        Box::pin(async move {
            if opened_load.load(Ordering::SeqCst) == load_id {
                return request(&audio_tx, |reply| AudioCommand::Resume { load_id, reply }).await;
            }

            info!("Fetching {}", url);
            let response = client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| TransportError::Load(e.to_string()))?;
            let data = response
                .bytes()
                .await
                .map_err(|e| TransportError::Load(e.to_string()))?
                .to_vec();
            debug!("Fetched {} bytes from {}", data.len(), url);

            let extension = extension_hint(&url);
            request(&audio_tx, |reply| AudioCommand::Open {
                load_id,
                data,
                extension,
                reply,
            })
            .await?;
            opened_load.store(load_id, Ordering::SeqCst);
            Ok(())
        })
    }

    fn pause(&mut self) {
        self.send(AudioCommand::Pause);
    }

    fn position(&self) -> f64 {
        self.shared.position()
    }

    fn duration(&self) -> f64 {
        self.shared.duration()
    }

    fn set_position(&mut self, position: f64) {
        self.send(AudioCommand::Seek(position));
    }

    fn rate(&self) -> f64 {
        self.shared.rate()
    }

    fn set_rate(&mut self, rate: f64) {
        self.send(AudioCommand::SetRate(rate));
    }
}
