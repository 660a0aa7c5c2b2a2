#![cfg(feature = "test-utils")]

mod support;

use crate::support::Harness;
use castsync::config::SyncConfig;
use castsync::media_controls::{PositionState, SurfaceStatus};
use castsync::playback::progress::PlaybackProgress;
use castsync::playback::{
    CommandKind, PlaybackError, RemoteCommand, SchedulerConfig, SessionState, StreamLength,
    TransportError, TransportEvent,
};
use castsync::test_support::{RecordingSurface, TransportCall};

const EPISODE: &str = "https://cdn.example.com/feed/episode-12.mp3";
const NEXT_EPISODE: &str = "https://cdn.example.com/feed/episode-13.mp3";

fn position_state(position: f64, duration: f64) -> PositionState {
    PositionState {
        duration,
        position,
        rate: 1.0,
    }
}

#[test]
fn test_duration_resolution_forces_one_push() {
    let mut h = Harness::new(SyncConfig::default());
    h.engine.load(EPISODE, None).unwrap();
    h.event(TransportEvent::Started);
    assert_eq!(h.surface.playback_states(), vec![SurfaceStatus::Playing]);
    assert!(h.surface.position_states().is_empty());

    // Samples before the duration is known carry no position payload
    h.sample(0.5, f64::NAN);
    h.sample(1.0, f64::NAN);
    h.surface.clear();

    h.clock.advance_ms(100);
    h.event(TransportEvent::DurationResolved { duration: 300.0 });
    h.event(TransportEvent::DurationResolved { duration: 300.0 });

    assert_eq!(h.surface.push_count(), 1);
    assert_eq!(h.surface.position_states(), vec![position_state(1.0, 300.0)]);
    assert_eq!(h.engine.session().length(), StreamLength::Known(300.0));
}

#[tokio::test]
async fn test_duration_resolved_after_play_pushes_once() {
    let mut h = Harness::new(SyncConfig::default());
    h.engine.load(EPISODE, None).unwrap();
    let pending = h.engine.play().unwrap();
    let result = pending.future.await;
    h.engine.on_play_resolved(pending.generation, result).unwrap();
    h.pump();
    assert_eq!(h.engine.session().state(), SessionState::Playing);
    assert!(h.surface.position_states().is_empty());
    h.surface.clear();

    h.clock.advance_ms(100);
    h.event(TransportEvent::DurationResolved { duration: 300.0 });

    assert_eq!(h.surface.push_count(), 1);
    assert_eq!(h.surface.position_states(), vec![position_state(0.0, 300.0)]);
}

#[test]
fn test_duration_from_sample_pushes_that_sample() {
    let mut h = Harness::new(SyncConfig::default());
    h.engine.load(EPISODE, None).unwrap();
    h.event(TransportEvent::Started);
    h.surface.clear();

    h.clock.advance_ms(100);
    h.sample(12.0, 300.0);

    assert_eq!(h.surface.push_count(), 1);
    assert_eq!(h.surface.position_states(), vec![position_state(12.0, 300.0)]);
    assert_eq!(h.engine.session().length(), StreamLength::Known(300.0));
}

#[test]
fn test_seek_burst_settles_into_one_push() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(10.0, 300.0);
    assert_eq!(h.surface.push_count(), 1);
    h.surface.clear();

    h.engine.handle_remote(RemoteCommand::SeekTo(100.0));
    h.clock.advance_ms(2);
    h.engine.handle_remote(RemoteCommand::SeekTo(105.0));
    h.clock.advance_ms(3);
    h.engine.handle_remote(RemoteCommand::SeekTo(110.0));

    // The transport confirms all three; only the last one matters
    h.pump();
    assert_eq!(h.engine.session().pending_seek(), None);
    assert_eq!(h.engine.session().authoritative_position(), 110.0);
    assert_eq!(h.surface.push_count(), 0);
    assert!(h.engine.next_deadline().is_some());

    h.clock.advance_ms(15);
    h.engine.poll_timers();

    assert_eq!(h.surface.push_count(), 1);
    assert_eq!(h.surface.position_states(), vec![position_state(110.0, 300.0)]);
    assert!(h.engine.next_deadline().is_none());
}

#[test]
fn test_source_swap_cancels_settle_timer() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.engine.handle_remote(RemoteCommand::SeekTo(50.0));
    assert!(h.engine.next_deadline().is_some());
    // The old source's confirmation never arrives
    while h.events_rx.try_recv().is_ok() {}

    h.engine.load(NEXT_EPISODE, None).unwrap();
    assert!(h.engine.next_deadline().is_none());

    h.clock.advance_ms(100);
    h.engine.poll_timers();

    assert_eq!(h.surface.push_count(), 0);
    let session = h.engine.session();
    assert_eq!(session.generation(), 2);
    assert_eq!(session.state(), SessionState::Loading);
    assert_eq!(session.source_id(), Some(NEXT_EPISODE));
    assert_eq!(session.authoritative_position(), 0.0);
    assert_eq!(session.pending_seek(), None);
    assert_eq!(session.length(), StreamLength::Unknown);
}

#[test]
fn test_pause_pushes_inside_throttle_window() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(5.0, 300.0);
    h.clock.advance_ms(200);

    // Play/pause only reach the transport; its event drives the push
    h.engine.handle_remote(RemoteCommand::Pause);
    assert_eq!(h.engine.session().state(), SessionState::Playing);
    h.pump();

    assert_eq!(h.engine.session().state(), SessionState::Paused);
    assert_eq!(
        h.surface.playback_states(),
        vec![SurfaceStatus::Playing, SurfaceStatus::Paused]
    );
    let progress = h.drain_progress();
    assert!(progress.iter().any(|p| matches!(
        p,
        PlaybackProgress::StateChanged {
            state: SessionState::Paused,
            ..
        }
    )));
}

#[test]
fn test_periodic_pushes_bounded_by_min_interval() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);

    // 10 seconds of samples every 250ms
    for i in 1..=40 {
        h.clock.advance_ms(250);
        h.sample(i as f64 * 0.25, 300.0);
    }

    assert_eq!(h.surface.push_count(), 10);
    // Progress is not throttled
    let updates = h
        .drain_progress()
        .into_iter()
        .filter(|p| matches!(p, PlaybackProgress::PositionUpdate { .. }))
        .count();
    assert_eq!(updates, 40);
}

#[test]
fn test_spurious_zero_is_held_and_transport_rearmed() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(42.3, 300.0);
    h.surface.clear();
    h.drain_progress();

    h.clock.advance_ms(250);
    h.sample(0.0, 300.0);

    assert_eq!(h.engine.session().authoritative_position(), 42.3);
    assert_eq!(h.transport.calls(), vec![TransportCall::SetPosition(42.3)]);
    assert!(h
        .surface
        .position_states()
        .iter()
        .all(|state| state.position == 42.3));
    // The UI never sees the zero either
    assert!(h.drain_progress().iter().all(|p| !matches!(
        p,
        PlaybackProgress::PositionUpdate { position, .. } if *position == 0.0
    )));

    h.clock.advance_ms(1000);
    h.sample(42.55, 300.0);
    assert_eq!(
        h.surface.position_states().last(),
        Some(&position_state(42.55, 300.0))
    );
}

#[test]
fn test_seek_landing_off_target_without_confirmation() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(10.0, 300.0);

    h.engine.handle_remote(RemoteCommand::SeekTo(100.0));
    // The transport's seeked event is lost
    while h.events_rx.try_recv().is_ok() {}
    h.surface.clear();
    h.drain_progress();

    for i in 0..40 {
        h.clock.advance_ms(250);
        h.sample(100.3 + i as f64 * 0.25, 300.0);
    }

    assert_eq!(h.engine.session().pending_seek(), None);
    assert!((h.engine.session().authoritative_position() - 110.05).abs() < 1e-9);
    let updates = h
        .drain_progress()
        .into_iter()
        .filter(|p| matches!(p, PlaybackProgress::PositionUpdate { .. }))
        .count();
    assert_eq!(updates, 40);
    assert_eq!(h.surface.push_count(), 10);
}

#[test]
fn test_lost_confirmation_releases_surface_after_timeout() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(10.0, 300.0);
    h.engine.handle_remote(RemoteCommand::Pause);
    h.pump();
    h.surface.clear();

    h.engine.handle_remote(RemoteCommand::SeekTo(100.0));
    while h.events_rx.try_recv().is_ok() {}

    h.clock.advance_ms(15);
    h.engine.poll_timers();
    assert_eq!(h.surface.push_count(), 0);
    assert!(h.engine.next_deadline().is_some());

    h.clock.advance_ms(2000);
    h.engine.poll_timers();
    assert_eq!(h.surface.playback_states(), vec![SurfaceStatus::Paused]);
    assert_eq!(h.surface.position_states(), vec![position_state(100.0, 300.0)]);
    assert!(h.engine.next_deadline().is_none());
}

#[test]
fn test_reset_to_near_zero_is_rearmed_then_followed() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(42.3, 300.0);
    h.transport.clear_calls();
    h.surface.clear();
    h.drain_progress();

    // The host restarted the episode and ignores the re-arm
    for i in 1..=40 {
        h.clock.advance_ms(250);
        h.sample(i as f64 * 0.25, 300.0);
    }

    let rearms = h
        .transport
        .calls()
        .into_iter()
        .filter(|call| *call == TransportCall::SetPosition(42.3))
        .count();
    assert_eq!(rearms, 3);
    assert_eq!(h.engine.session().authoritative_position(), 10.0);
    let positions: Vec<f64> = h
        .drain_progress()
        .into_iter()
        .filter_map(|p| match p {
            PlaybackProgress::PositionUpdate { position, .. } => Some(position),
            _ => None,
        })
        .collect();
    assert!(!positions.contains(&0.25));
    assert_eq!(positions.last(), Some(&10.0));
    assert_eq!(
        h.surface.position_states().last(),
        Some(&position_state(10.0, 300.0))
    );
}

#[test]
fn test_seek_to_zero_is_not_spurious() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(100.0, 300.0);
    h.surface.clear();
    h.transport.clear_calls();

    h.engine.handle_remote(RemoteCommand::SeekTo(0.0));
    h.sample(0.0, 300.0);

    assert_eq!(h.engine.session().authoritative_position(), 0.0);
    assert_eq!(h.transport.calls(), vec![TransportCall::SetPosition(0.0)]);

    h.clock.advance_ms(15);
    h.engine.poll_timers();
    assert_eq!(h.surface.position_states(), vec![position_state(0.0, 300.0)]);
}

#[test]
fn test_relative_seek_uses_authoritative_position() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(100.0, 300.0);
    h.transport.clear_calls();
    // Raw transport position is garbage
    h.transport.set_reported_position(0.0);

    h.engine.handle_remote(RemoteCommand::SeekBy(15.0));
    assert_eq!(h.transport.calls(), vec![TransportCall::SetPosition(115.0)]);

    h.engine.handle_remote(RemoteCommand::SeekBy(500.0));
    assert_eq!(h.engine.session().pending_seek(), Some(300.0));
}

#[test]
fn test_unknown_duration_pushes_status_only() {
    let mut h = Harness::new(SyncConfig::default());
    h.engine.load(EPISODE, None).unwrap();
    h.event(TransportEvent::Started);
    h.clock.advance_ms(1000);
    h.sample(10.0, f64::NAN);

    h.engine.handle_remote(RemoteCommand::SeekBy(-30.0));
    assert_eq!(h.engine.session().pending_seek(), Some(0.0));
    h.pump();
    h.clock.advance_ms(1000);
    h.engine.poll_timers();

    assert!(h.surface.position_states().is_empty());
    assert!(h.surface.push_count() >= 1);
    let labels: Vec<String> = h
        .drain_progress()
        .into_iter()
        .filter_map(|p| match p {
            PlaybackProgress::PositionUpdate { duration_label, .. } => Some(duration_label),
            _ => None,
        })
        .collect();
    assert!(!labels.is_empty());
    assert!(labels.iter().all(|label| label == "--:--"));
}

#[test]
fn test_live_stream_has_no_upper_clamp() {
    let mut h = Harness::new(SyncConfig::default());
    h.engine.load(EPISODE, None).unwrap();
    h.event(TransportEvent::DurationResolved {
        duration: f64::INFINITY,
    });
    h.event(TransportEvent::Started);
    assert_eq!(h.engine.session().length(), StreamLength::Live);

    h.engine.handle_remote(RemoteCommand::SeekTo(10_000.0));
    assert_eq!(h.engine.session().pending_seek(), Some(10_000.0));
    assert!(h.surface.position_states().is_empty());
}

#[test]
fn test_transitions_throttled_without_force() {
    let config = SyncConfig {
        scheduler: SchedulerConfig {
            force_on_transition: false,
            ..SchedulerConfig::default()
        },
        ..SyncConfig::default()
    };
    let mut h = Harness::new(config);
    h.engine.load(EPISODE, None).unwrap();
    h.event(TransportEvent::DurationResolved { duration: 300.0 });
    h.event(TransportEvent::Started);
    assert_eq!(h.surface.push_count(), 1);

    h.clock.advance_ms(200);
    h.engine.handle_remote(RemoteCommand::Pause);
    h.pump();
    assert_eq!(h.surface.push_count(), 1);

    h.clock.advance_ms(1000);
    h.sample(1.2, 300.0);
    assert_eq!(h.surface.push_count(), 2);
    assert_eq!(h.surface.playback_states().last(), Some(&SurfaceStatus::Paused));
}

#[test]
fn test_end_of_stream() {
    let mut h = Harness::new(SyncConfig::default());
    h.playing(EPISODE, 300.0);
    h.clock.advance_ms(1000);
    h.sample(299.9, 300.0);
    h.surface.clear();
    h.transport.clear_calls();

    h.event(TransportEvent::Ended);
    assert_eq!(h.engine.session().state(), SessionState::Ended);
    assert_eq!(h.surface.playback_states(), vec![SurfaceStatus::Paused]);
    assert_eq!(h.surface.position_states(), vec![position_state(300.0, 300.0)]);

    assert!(h.engine.handle_remote(RemoteCommand::Play).is_none());
    assert!(h.transport.calls().is_empty());
}

#[test]
fn test_registration_skips_unsupported_commands() {
    let surface = RecordingSurface::new().without_command(CommandKind::SeekTo);
    let mut h = Harness::with_surface(SyncConfig::default(), surface);

    let registered = h.engine.register_commands().to_vec();
    assert_eq!(registered.len(), CommandKind::ALL.len() - 1);
    assert!(!registered.contains(&CommandKind::SeekTo));
    assert!(registered.contains(&CommandKind::SeekForward));

    // Loading still works with a partial surface
    assert!(h.engine.load(EPISODE, None).is_ok());
}

#[test]
fn test_surface_failure_does_not_block_progress() {
    let surface = RecordingSurface::new().failing_position_state();
    let mut h = Harness::with_surface(SyncConfig::default(), surface);
    h.engine.load(EPISODE, None).unwrap();
    h.event(TransportEvent::Started);
    h.sample(3.0, 60.0);

    assert_eq!(h.engine.session().authoritative_position(), 3.0);
    assert!(h.drain_progress().iter().any(|p| matches!(
        p,
        PlaybackProgress::PositionUpdate { current_label, duration_label, percent, .. }
            if current_label == "0:03" && duration_label == "1:00" && (*percent - 5.0).abs() < 1e-9
    )));
}

#[tokio::test]
async fn test_play_rejection_reverts_to_paused() {
    let mut h = Harness::new(SyncConfig::default());
    h.engine.load(EPISODE, None).unwrap();
    h.transport
        .resolve_next_play(Err(TransportError::Blocked("autoplay".to_string())));

    let pending = h.engine.play().unwrap();
    let result = pending.future.await;
    let err = h
        .engine
        .on_play_resolved(pending.generation, result)
        .unwrap_err();

    assert!(matches!(
        err,
        PlaybackError::PlayRejected {
            source: TransportError::Blocked(_),
            ..
        }
    ));
    h.pump();
    assert_eq!(h.engine.session().state(), SessionState::Paused);
    assert_eq!(h.surface.playback_states(), vec![SurfaceStatus::Paused]);
    assert!(h.drain_progress().iter().any(|p| matches!(
        p,
        PlaybackProgress::PlaybackFailed { source_id, error }
            if source_id == EPISODE && error.contains("autoplay")
    )));
}

#[tokio::test]
async fn test_superseded_play_result_is_ignored() {
    let mut h = Harness::new(SyncConfig::default());
    h.engine.load(EPISODE, None).unwrap();
    let release_first = h.transport.defer_next_play();
    let first = h.engine.play().unwrap();

    h.engine.load(NEXT_EPISODE, None).unwrap();
    let second = h.engine.play().unwrap();
    let result = second.future.await;
    h.engine
        .on_play_resolved(second.generation, result)
        .unwrap();
    h.pump();
    assert_eq!(h.engine.session().state(), SessionState::Playing);
    h.drain_progress();

    release_first
        .send(Err(TransportError::Decode("truncated".to_string())))
        .unwrap();
    let stale = first.future.await;
    assert!(stale.is_err());
    assert!(h.engine.on_play_resolved(first.generation, stale).is_ok());

    assert_eq!(h.engine.session().state(), SessionState::Playing);
    assert_eq!(h.engine.session().source_id(), Some(NEXT_EPISODE));
    assert!(h
        .drain_progress()
        .iter()
        .all(|p| !matches!(p, PlaybackProgress::PlaybackFailed { .. })));
}
