#![allow(dead_code)]

use castsync::config::SyncConfig;
use castsync::playback::progress::{PlaybackProgress, ProgressEmitter};
use castsync::playback::{SyncEngine, TransportEvent};
use castsync::test_support::{ManualClock, MockTransport, RecordingSurface};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Engine wired to in-memory doubles and a manual clock
pub struct Harness {
    pub engine: SyncEngine<MockTransport, RecordingSurface>,
    pub transport: MockTransport,
    pub surface: RecordingSurface,
    pub clock: ManualClock,
    pub events_rx: tokio_mpsc::UnboundedReceiver<TransportEvent>,
    pub progress_rx: tokio_mpsc::UnboundedReceiver<PlaybackProgress>,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_surface(config, RecordingSurface::new())
    }

    /// Harness whose transport answers commands with events
    pub fn with_surface(config: SyncConfig, surface: RecordingSurface) -> Self {
        tracing_init();
        let (transport, events_rx) = MockTransport::with_auto_events();
        let clock = ManualClock::new();
        let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();
        let engine = SyncEngine::new(
            transport.clone(),
            surface.clone(),
            &config,
            Arc::new(clock.clone()),
            ProgressEmitter::new(progress_tx),
        );
        Self {
            engine,
            transport,
            surface,
            clock,
            events_rx,
            progress_rx,
        }
    }

    /// Deliver every event the transport has emitted so far
    pub fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.engine.handle_transport_event(event);
        }
    }

    pub fn event(&mut self, event: TransportEvent) {
        self.engine.handle_transport_event(event);
        self.pump();
    }

    pub fn sample(&mut self, position: f64, duration: f64) {
        self.event(TransportEvent::PositionUpdated { position, duration });
    }

    /// Loaded, duration known and playing, with the surface log cleared
    pub fn playing(&mut self, url: &str, duration: f64) {
        self.engine.load(url, None).unwrap();
        self.event(TransportEvent::DurationResolved { duration });
        self.event(TransportEvent::Started);
        self.surface.clear();
        self.transport.clear_calls();
        self.drain_progress();
    }

    pub fn drain_progress(&mut self) -> Vec<PlaybackProgress> {
        let mut drained = Vec::new();
        while let Ok(progress) = self.progress_rx.try_recv() {
            drained.push(progress);
        }
        drained
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Receive progress until `matches` accepts one, or two seconds pass
pub async fn wait_for_progress(
    rx: &mut tokio_mpsc::UnboundedReceiver<PlaybackProgress>,
    mut matches: impl FnMut(&PlaybackProgress) -> bool,
) -> Option<PlaybackProgress> {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(progress) = rx.recv().await {
            if matches(&progress) {
                return Some(progress);
            }
        }
        None
    })
    .await;
    result.ok().flatten()
}
