//! Session lifecycle integration tests
//!
//! Load, play, crossfade handoff, natural end and repeat-one, driven through
//! the public `Player` surface over simulated collaborators.

mod helpers;

use helpers::{ended_event, harness, transition_to, wait_crossfade, wait_event, wait_state};
use segue_common::events::{EndReason, PlaybackState, SegueEvent};
use segue_common::model::{MediaProduct, QualityTier};
use segue_player::playback::DecodeSignal;
use segue_player::telemetry::{PlaybackAction, TelemetryEvent};
use segue_player::PlayerError;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_crossfade_hands_over_to_preloaded_session() {
    let h = harness();
    let mut rx = h.player.subscribe();

    let first = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    let next = h.player.set_next(MediaProduct::track("B")).await.unwrap();
    assert_ne!(first, next);
    assert_eq!(h.player.preloaded_session(), Some(next));
    assert_eq!(h.player.next_media_product(), Some(MediaProduct::track("B")));

    wait_event(&mut rx, ended_event(first, EndReason::Completed)).await;
    wait_event(&mut rx, transition_to(next)).await;

    assert_eq!(h.player.current_session_id(), Some(next));
    let volumes = h.player.engines()[0].coordinator().volumes();
    assert!(
        volumes == [1.0, 0.0] || volumes == [0.0, 1.0],
        "one slot audible, one silent: {:?}",
        volumes
    );
    assert_eq!(h.player.playback_state(), PlaybackState::Playing);
    assert!(h.player.next_media_product().is_none());

    // Outgoing records are gone; only the new session remains
    let store = h.player.context().store.read().await;
    assert!(!store.has_transition(&first));
    assert!(store.has_transition(&next));
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_natural_end_without_next_goes_idle() {
    let h = harness();
    let mut rx = h.player.subscribe();

    let id = h.player.load(MediaProduct::track("C"), 0.0).await.unwrap();
    h.player.play().await.unwrap();

    let ended = wait_event(&mut rx, ended_event(id, EndReason::Completed)).await;
    if let SegueEvent::MediaProductEnded { end_position, .. } = ended {
        assert_eq!(end_position, 3.0);
    }
    wait_state(&h.player, PlaybackState::Idle).await;

    assert!(h.player.media_product().is_none());
    assert!(h.player.context().store.read().await.is_empty());
    assert!(matches!(h.player.play().await, Err(PlayerError::NoActiveSession)));

    let ends = h
        .telemetry
        .events()
        .into_iter()
        .filter(|e| matches!(e, TelemetryEvent::StreamingSessionEnd { .. }))
        .count();
    assert_eq!(ends, 1);
}

#[tokio::test(start_paused = true)]
async fn test_preload_requested_once_per_session() {
    let h = harness();
    h.resolver.add_track("long", 14.0);
    let mut rx = h.player.subscribe();

    let id = h.player.load(MediaProduct::track("long"), 0.0).await.unwrap();
    h.player.play().await.unwrap();

    let request = wait_event(&mut rx, |e| matches!(e, SegueEvent::PreloadRequested { .. })).await;
    match request {
        SegueEvent::PreloadRequested {
            session_id,
            remaining,
            ..
        } => {
            assert_eq!(session_id, id);
            assert!(remaining <= 10.0 && remaining > 9.0, "remaining {}", remaining);
        }
        other => panic!("unexpected event {:?}", other),
    }

    wait_event(&mut rx, ended_event(id, EndReason::Completed)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, SegueEvent::PreloadRequested { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_play_pause_seek_play_logs_single_start() {
    let h = harness();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();

    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    h.player.pause().await.unwrap();
    wait_state(&h.player, PlaybackState::NotPlaying).await;
    h.player.seek(0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let actions = h.telemetry.actions(id);
    let starts = actions
        .iter()
        .filter(|a| **a == PlaybackAction::PlaybackStart)
        .count();
    assert_eq!(starts, 1, "actions: {:?}", actions);
    assert_eq!(actions, vec![PlaybackAction::PlaybackStop, PlaybackAction::PlaybackStart]);
}

#[tokio::test(start_paused = true)]
async fn test_seek_while_playing_logs_stop_then_start() {
    let h = harness();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    h.player.seek(3.0).await.unwrap();
    assert_eq!(
        h.telemetry.actions(id),
        vec![PlaybackAction::PlaybackStop, PlaybackAction::PlaybackStart]
    );
    let context = h.player.playback_context().await.unwrap();
    assert!(context.asset_position >= 3.0);
}

#[tokio::test(start_paused = true)]
async fn test_repeat_one_mints_new_sessions_without_refetch() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let product = MediaProduct::track("C");

    let mut ids = vec![h.player.load(product.clone(), 0.0).await.unwrap()];
    h.player.play().await.unwrap();

    for _ in 0..2 {
        let current = *ids.last().unwrap();
        wait_event(&mut rx, |e| {
            matches!(e, SegueEvent::PreloadRequested { session_id, .. } if *session_id == current)
        })
        .await;
        let next = h.player.set_next(product.clone()).await.unwrap();
        let transition = wait_event(&mut rx, transition_to(next)).await;
        if let SegueEvent::MediaProductTransition { media_product, .. } = transition {
            assert_eq!(media_product.product_id, "C");
        }
        ids.push(next);
    }

    let last = *ids.last().unwrap();
    wait_event(&mut rx, ended_event(last, EndReason::Completed)).await;

    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);
    assert_eq!(h.resolver.fetch_count("C"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_ended_signal_is_ignored() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    let stale = segue_common::model::StreamingSessionId::new();
    h.slot(id).inject_for(stale, DecodeSignal::Ended);
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(h.player.playback_state(), PlaybackState::Playing);
    assert_eq!(h.player.current_session_id(), Some(id));
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, SegueEvent::MediaProductEnded { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_finish_on_never_started_session_is_noop() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();

    h.player.engines()[0]
        .finish_current_media_product(EndReason::Skip)
        .await;

    assert_eq!(h.player.current_session_id(), Some(id));
    assert!(h.player.context().store.read().await.has_transition(&id));
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, SegueEvent::MediaProductEnded { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_skip_to_other_item_ends_current_as_skip() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let first = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    let second = h.player.load(MediaProduct::track("B"), 1.5).await.unwrap();
    wait_event(&mut rx, ended_event(first, EndReason::Skip)).await;

    assert_ne!(first, second);
    let context = h.player.playback_context().await.unwrap();
    assert_eq!(context.actual_product_id, "B");
    assert_eq!(context.asset_position, 1.5);
    assert_eq!(h.player.playback_state(), PlaybackState::NotPlaying);
}

#[tokio::test(start_paused = true)]
async fn test_quality_change_updates_context() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    h.slot(id).inject(DecodeSignal::QualityChange(QualityTier::Low));
    wait_event(&mut rx, |e| {
        matches!(e, SegueEvent::StreamingQualityChanged { quality: QualityTier::Low, .. })
    })
    .await;

    let context = h.player.playback_context().await.unwrap();
    assert_eq!(context.actual_quality, QualityTier::Low);
    assert!(h
        .telemetry
        .events()
        .iter()
        .any(|e| matches!(e, TelemetryEvent::QualityAdaptation { session_id, .. } if *session_id == id)));
}

#[tokio::test(start_paused = true)]
async fn test_quality_change_while_buffered_survives_handoff() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let first = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    let next = h.player.set_next(MediaProduct::track("B")).await.unwrap();
    h.slot(next).inject(DecodeSignal::QualityChange(QualityTier::Low));
    wait_event(&mut rx, |e| {
        matches!(e, SegueEvent::StreamingQualityChanged { session_id, .. } if *session_id == next)
    })
    .await;

    {
        let store = h.player.context().store.read().await;
        let transition = store.get_transition(&next).unwrap();
        assert_eq!(transition.playback_context.actual_quality, QualityTier::Low);
        assert_eq!(store.get_stream_info(&next).unwrap().quality, QualityTier::Low);
    }
    assert!(h
        .telemetry
        .events()
        .iter()
        .any(|e| matches!(e, TelemetryEvent::QualityAdaptation { session_id, .. } if *session_id == next)));

    wait_event(&mut rx, ended_event(first, EndReason::Completed)).await;
    let transition = wait_event(&mut rx, transition_to(next)).await;
    if let SegueEvent::MediaProductTransition { playback_context, .. } = transition {
        assert_eq!(playback_context.actual_quality, QualityTier::Low);
    }
    let context = h.player.playback_context().await.unwrap();
    assert_eq!(context.playback_session_id, next);
    assert_eq!(context.actual_quality, QualityTier::Low);
}

#[tokio::test(start_paused = true)]
async fn test_volume_scales_loudness_gain() {
    let h = harness();
    h.resolver
        .add("loud", segue_player::sim::SimTrack::new(5.0).loudness(-6.0, 0.5));
    let id = h.player.load(MediaProduct::track("loud"), 0.0).await.unwrap();

    let normalized = h.slot(id).loudness_gain();
    assert!((normalized - 10f32.powf(-6.0 / 20.0)).abs() < 1e-4);

    assert_eq!(h.player.set_volume(0.5).await, 0.5);
    assert!((h.slot(id).loudness_gain() - normalized * 0.5).abs() < 1e-4);
    assert_eq!(h.player.set_volume(3.0).await, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_forgets_everything() {
    let h = harness();
    h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    h.player.set_next(MediaProduct::track("B")).await.unwrap();

    h.player.reset().await;

    assert_eq!(h.player.playback_state(), PlaybackState::Idle);
    assert!(h.player.current_session_id().is_none());
    assert!(h.player.next_media_product().is_none());
    assert!(h.player.preloaded_session().is_none());
    assert!(h.player.context().store.read().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_crossfade_cancels_handoff() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let first = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    let next = h.player.set_next(MediaProduct::track("B")).await.unwrap();

    wait_crossfade(&h.player).await;
    h.player.reset().await;

    let coordinator = h.player.engines()[0].coordinator();
    assert!(!coordinator.crossfade_running());
    assert_eq!(coordinator.volumes(), [1.0, 0.0]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(coordinator.volumes(), [1.0, 0.0]);
    assert_eq!(h.player.playback_state(), PlaybackState::Idle);
    assert!(h.player.current_session_id().is_none());
    assert!(h.player.context().store.read().await.is_empty());
    while let Ok(event) = rx.try_recv() {
        assert!(!transition_to(next)(&event), "late handoff to {}", next);
        assert!(!ended_event(first, EndReason::Completed)(&event));
    }
}

#[tokio::test(start_paused = true)]
async fn test_load_during_crossfade_cancels_handoff() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let first = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    let next = h.player.set_next(MediaProduct::track("B")).await.unwrap();

    wait_crossfade(&h.player).await;
    let loaded = h.player.load(MediaProduct::track("C"), 0.0).await.unwrap();

    let coordinator = h.player.engines()[0].coordinator();
    assert!(!coordinator.crossfade_running());
    assert_eq!(coordinator.volumes(), [1.0, 0.0]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(coordinator.volumes(), [1.0, 0.0]);
    assert_eq!(h.player.current_session_id(), Some(loaded));
    assert_eq!(h.player.media_product(), Some(MediaProduct::track("C")));
    assert!(h.player.next_media_product().is_none());
    assert!(!h.player.context().store.read().await.has_transition(&next));

    let mut skipped = false;
    while let Ok(event) = rx.try_recv() {
        assert!(!transition_to(next)(&event), "late handoff to {}", next);
        assert!(!ended_event(first, EndReason::Completed)(&event));
        skipped |= ended_event(first, EndReason::Skip)(&event);
    }
    assert!(skipped);
}
