use crate::config::SyncConfig;
use crate::episode::EpisodeMetadata;
use crate::media_controls::NowPlayingSurface;
use crate::playback::clock::{Clock, SystemClock};
use crate::playback::engine::{PendingPlay, SyncEngine};
use crate::playback::progress::{PlaybackProgress, PlaybackProgressHandle, ProgressEmitter};
use crate::playback::router::RemoteCommand;
use crate::playback::transport::{AudioTransport, TransportError, TransportEvent};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, warn};

/// Playback commands sent to the service
#[derive(Debug, Clone)]
pub enum PlaybackCommand {
    Load {
        url: String,
        metadata: Option<EpisodeMetadata>,
        autoplay: bool,
    },
    Remote(RemoteCommand),
    SeekPercent(f64),
    SetRate(f64),
    Shutdown,
}

/// Handle to the playback service for sending commands
#[derive(Clone)]
pub struct PlaybackHandle {
    command_tx: tokio_mpsc::UnboundedSender<PlaybackCommand>,
    progress_handle: PlaybackProgressHandle,
}

impl PlaybackHandle {
    pub fn load(&self, url: String, metadata: Option<EpisodeMetadata>) {
        let _ = self.command_tx.send(PlaybackCommand::Load {
            url,
            metadata,
            autoplay: false,
        });
    }

    pub fn load_and_play(&self, url: String, metadata: Option<EpisodeMetadata>) {
        let _ = self.command_tx.send(PlaybackCommand::Load {
            url,
            metadata,
            autoplay: true,
        });
    }

    pub fn play(&self) {
        self.remote(RemoteCommand::Play);
    }

    pub fn pause(&self) {
        self.remote(RemoteCommand::Pause);
    }

    pub fn toggle(&self) {
        self.remote(RemoteCommand::Toggle);
    }

    pub fn stop(&self) {
        self.remote(RemoteCommand::Stop);
    }

    /// Seek to an absolute position in seconds
    pub fn seek(&self, seconds: f64) {
        self.remote(RemoteCommand::SeekTo(seconds));
    }

    /// Seek relative to the current position
    pub fn seek_by(&self, offset: f64) {
        self.remote(RemoteCommand::SeekBy(offset));
    }

    pub fn seek_percent(&self, percent: f64) {
        let _ = self.command_tx.send(PlaybackCommand::SeekPercent(percent));
    }

    pub fn set_rate(&self, rate: f64) {
        let _ = self.command_tx.send(PlaybackCommand::SetRate(rate));
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(PlaybackCommand::Shutdown);
    }

    pub fn subscribe_progress(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress> {
        self.progress_handle.subscribe_all()
    }

    fn remote(&self, command: RemoteCommand) {
        let _ = self.command_tx.send(PlaybackCommand::Remote(command));
    }
}

type PlayResult = (u64, Result<(), TransportError>);

/// Drives a [`SyncEngine`] from commands, transport events, surface
/// buttons, resolved `play()` calls and the settle timer
pub struct PlaybackService<T, S> {
    engine: SyncEngine<T, S>,
    command_rx: tokio_mpsc::UnboundedReceiver<PlaybackCommand>,
    transport_rx: Option<tokio_mpsc::UnboundedReceiver<TransportEvent>>,
    remote_rx: Option<tokio_mpsc::UnboundedReceiver<RemoteCommand>>,
    pending_plays: FuturesUnordered<BoxFuture<'static, PlayResult>>,
}

impl<T, S> PlaybackService<T, S>
where
    T: AudioTransport + 'static,
    S: NowPlayingSurface + 'static,
{
    /// Spawn the service on `runtime_handle`.
    ///
    /// `transport_rx` carries the transport's events and `remote_rx` the
    /// surface's button presses, if the surface has any.
    pub fn start(
        transport: T,
        transport_rx: tokio_mpsc::UnboundedReceiver<TransportEvent>,
        surface: S,
        config: SyncConfig,
        remote_rx: Option<tokio_mpsc::UnboundedReceiver<RemoteCommand>>,
        runtime_handle: tokio::runtime::Handle,
    ) -> PlaybackHandle {
        Self::start_with_clock(
            transport,
            transport_rx,
            surface,
            config,
            remote_rx,
            Arc::new(SystemClock),
            runtime_handle,
        )
    }

    pub fn start_with_clock(
        transport: T,
        transport_rx: tokio_mpsc::UnboundedReceiver<TransportEvent>,
        surface: S,
        config: SyncConfig,
        remote_rx: Option<tokio_mpsc::UnboundedReceiver<RemoteCommand>>,
        clock: Arc<dyn Clock>,
        runtime_handle: tokio::runtime::Handle,
    ) -> PlaybackHandle {
        let (command_tx, command_rx) = tokio_mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();

        let progress_handle = PlaybackProgressHandle::new(progress_rx, runtime_handle.clone());

        let handle = PlaybackHandle {
            command_tx,
            progress_handle,
        };

        let engine = SyncEngine::new(
            transport,
            surface,
            &config,
            clock,
            ProgressEmitter::new(progress_tx),
        );

        let mut service = PlaybackService {
            engine,
            command_rx,
            transport_rx: Some(transport_rx),
            remote_rx,
            pending_plays: FuturesUnordered::new(),
        };

        runtime_handle.spawn(async move {
            service.run().await;
        });

        handle
    }

    async fn run(&mut self) {
        info!("PlaybackService started");
        self.engine.register_commands();

        loop {
            let deadline = self.engine.next_deadline();

            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(PlaybackCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                event = recv_or_pending(&mut self.transport_rx) => {
                    match event {
                        Some(event) => self.engine.handle_transport_event(event),
                        None => {
                            warn!("Transport event channel closed");
                            self.transport_rx = None;
                        }
                    }
                }
                remote = recv_or_pending(&mut self.remote_rx) => {
                    match remote {
                        Some(command) => self.route(command),
                        None => {
                            debug!("Remote command channel closed");
                            self.remote_rx = None;
                        }
                    }
                }
                Some((generation, result)) = self.pending_plays.next(), if !self.pending_plays.is_empty() => {
                    // Failures are logged and reported as progress by the engine
                    let _ = self.engine.on_play_resolved(generation, result);
                }
                _ = sleep_until(deadline) => {
                    self.engine.poll_timers();
                }
            }
        }

        info!("PlaybackService stopped");
    }

    fn handle_command(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Load {
                url,
                metadata,
                autoplay,
            } => {
                if self.engine.load(&url, metadata).is_ok() && autoplay {
                    self.route(RemoteCommand::Play);
                }
            }
            PlaybackCommand::Remote(command) => self.route(command),
            PlaybackCommand::SeekPercent(percent) => self.engine.seek_percent(percent),
            PlaybackCommand::SetRate(rate) => {
                if let Err(e) = self.engine.set_rate(rate) {
                    warn!("{}", e);
                }
            }
            PlaybackCommand::Shutdown => {}
        }
    }

    fn route(&mut self, command: RemoteCommand) {
        if let Some(PendingPlay { generation, future }) = self.engine.handle_remote(command) {
            self.pending_plays
                .push(Box::pin(async move { (generation, future.await) }));
        }
    }
}

async fn recv_or_pending<T>(rx: &mut Option<tokio_mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
