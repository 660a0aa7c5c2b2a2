pub mod clock;
pub mod engine;
#[cfg(feature = "native-audio")]
pub mod native;
pub mod progress;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod shadow_clock;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use engine::{PendingPlay, PlaybackError, SyncEngine};
pub use progress::{PlaybackProgress, PlaybackProgressHandle};
pub use router::{CommandKind, RemoteCommand, RemoteCommandRouter};
pub use scheduler::{SchedulerConfig, SyncScheduler};
pub use service::{PlaybackCommand, PlaybackHandle, PlaybackService};
pub use session::{PlaybackSession, SessionState, StreamLength};
pub use shadow_clock::ShadowClock;
pub use transport::{AudioTransport, PlayFuture, TransportError, TransportEvent};
