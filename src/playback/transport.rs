use futures::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Playback blocked by host: {0}")]
    Blocked(String),
    #[error("Failed to load source: {0}")]
    Load(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Audio output error: {0}")]
    Output(String),
    #[error("No source loaded")]
    NoSource,
}

/// Completion of a `play()` request. `'static` so the driver can keep
/// polling it while newer commands arrive.
pub type PlayFuture = BoxFuture<'static, Result<(), TransportError>>;

/// Lifecycle notifications from the playback engine
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Raw position sample. Values may be non-finite.
    PositionUpdated { position: f64, duration: f64 },
    Started,
    Paused,
    Seeked { position: f64 },
    RateChanged { rate: f64 },
    DurationResolved { duration: f64 },
    Ended,
    /// Playback stopped on an error after it had started
    Failed { error: TransportError },
}

/// Thin interface over the native playback engine.
///
/// Implementations push [`TransportEvent`]s into the channel handed out at
/// construction; the engine never polls for state changes.
pub trait AudioTransport: Send {
    /// Point the transport at a new stream. Playback does not start.
    fn load(&mut self, url: &str) -> Result<(), TransportError>;

    fn play(&mut self) -> PlayFuture;

    fn pause(&mut self);

    fn position(&self) -> f64;

    fn duration(&self) -> f64;

    fn set_position(&mut self, position: f64);

    fn rate(&self) -> f64;

    fn set_rate(&mut self, rate: f64);
}
