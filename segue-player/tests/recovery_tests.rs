//! Connectivity recovery and decode fault integration tests

mod helpers;

use chrono::Duration as ChronoDuration;
use helpers::{ended_event, harness, transition_to, wait_event, wait_state};
use segue_common::events::{EndReason, ErrorCategory, PlaybackState, SegueEvent};
use segue_common::model::MediaProduct;
use segue_player::playback::{DecodeFault, DecodeSignal};
use segue_player::sim::SimTrack;
use segue_player::telemetry::TelemetryEvent;
use segue_player::{PlayerError, RecoveryOutcome};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_reconnect_while_playing_keeps_session() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let id = h.player.load(MediaProduct::track("B"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.player.connection_lost();
    assert!(!h.player.is_online());
    tokio::time::sleep(Duration::from_millis(500)).await;

    let outcome = h.player.connection_restored().await.unwrap();
    assert_eq!(outcome, RecoveryOutcome::Unchanged);
    assert!(h.player.is_online());
    assert_eq!(h.player.current_session_id(), Some(id));
    assert_eq!(h.player.playback_state(), PlaybackState::Playing);
    assert_eq!(h.resolver.fetch_count("B"), 1);

    let mut changes = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SegueEvent::ConnectivityChanged { online, .. } = event {
            changes.push(online);
        }
    }
    assert_eq!(changes, vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_stop_reloads_with_new_session() {
    let h = harness();
    let first = h.player.load(MediaProduct::track("B"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.player.connection_lost();
    h.player.pause().await.unwrap();
    wait_state(&h.player, PlaybackState::NotPlaying).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(h
        .telemetry
        .events()
        .iter()
        .any(|e| matches!(e, TelemetryEvent::Stall { session_id, .. } if *session_id == first)));

    let outcome = h.player.connection_restored().await.unwrap();
    let RecoveryOutcome::Resumed {
        previous,
        session_id,
    } = outcome
    else {
        panic!("expected a reload, got {:?}", outcome);
    };
    assert_eq!(previous, first);
    assert_ne!(session_id, first);
    assert_eq!(h.player.media_product(), Some(MediaProduct::track("B")));
    assert_eq!(h.resolver.fetch_count("B"), 2);

    wait_state(&h.player, PlaybackState::Playing).await;
    let context = h.player.playback_context().await.unwrap();
    assert_eq!(context.playback_session_id, session_id);
    assert!(context.asset_position >= 0.9, "resumed at {}", context.asset_position);
}

#[tokio::test(start_paused = true)]
async fn test_loss_before_start_captures_nothing() {
    let h = harness();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();

    h.player.connection_lost();
    let outcome = h.player.connection_restored().await.unwrap();
    assert_eq!(outcome, RecoveryOutcome::Unchanged);
    assert_eq!(h.player.current_session_id(), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_decode_error_ends_session() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    h.slot(id).inject(DecodeSignal::Error(DecodeFault::fatal("DRM", "license rejected")));

    let event = wait_event(&mut rx, |e| matches!(e, SegueEvent::PlaybackError { .. })).await;
    assert!(matches!(
        event,
        SegueEvent::PlaybackError {
            category: ErrorCategory::Decode,
            session_id: Some(s),
            ..
        } if s == id
    ));
    wait_event(&mut rx, ended_event(id, EndReason::Error)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.player.playback_state(), PlaybackState::Stalled);
    assert!(h.player.current_session_id().is_none());
    assert!(h.player.context().store.read().await.is_empty());
    assert!(matches!(h.player.play().await, Err(PlayerError::NoActiveSession)));

    h.player.load(MediaProduct::track("B"), 0.0).await.unwrap();
    assert_eq!(h.player.playback_state(), PlaybackState::NotPlaying);
}

#[tokio::test(start_paused = true)]
async fn test_reset_after_fatal_error_goes_idle() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let id = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    h.slot(id).inject(DecodeSignal::Error(DecodeFault::fatal("DRM", "license rejected")));
    wait_event(&mut rx, ended_event(id, EndReason::Error)).await;
    assert_eq!(h.player.playback_state(), PlaybackState::Stalled);

    h.player.reset().await;
    assert_eq!(h.player.playback_state(), PlaybackState::Idle);
    assert_eq!(h.player.engines()[0].playback_state(), PlaybackState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_network_error_reloads_on_next_play() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let first = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    h.slot(first).inject(DecodeSignal::Error(DecodeFault::network("SEGMENT", "timeout")));
    wait_state(&h.player, PlaybackState::Stalled).await;
    assert_eq!(h.player.current_session_id(), Some(first));

    h.player.play().await.unwrap();
    wait_event(&mut rx, ended_event(first, EndReason::Skip)).await;
    wait_state(&h.player, PlaybackState::Playing).await;

    let reloaded = h.current();
    assert_ne!(reloaded, first);
    assert_eq!(h.resolver.fetch_count("A"), 2);
    let context = h.player.playback_context().await.unwrap();
    assert!(context.asset_position >= 0.4, "reloaded at {}", context.asset_position);
}

#[tokio::test(start_paused = true)]
async fn test_retry_reload_keeps_next_item() {
    let h = harness();
    let mut rx = h.player.subscribe();
    let first = h.player.load(MediaProduct::track("B"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    let next = h.player.set_next(MediaProduct::track("A")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    h.slot(first).inject(DecodeSignal::Error(DecodeFault::network("SEGMENT", "timeout")));
    wait_state(&h.player, PlaybackState::Stalled).await;
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    let reloaded = h.current();
    assert_ne!(reloaded, first);
    assert_eq!(h.player.next_media_product(), Some(MediaProduct::track("A")));
    assert_eq!(h.player.preloaded_session(), Some(next));
    assert!(h.player.context().store.read().await.has_transition(&next));
    assert_eq!(h.resolver.fetch_count("A"), 1);

    wait_event(&mut rx, ended_event(reloaded, EndReason::Completed)).await;
    wait_event(&mut rx, transition_to(next)).await;
    assert_eq!(h.player.current_session_id(), Some(next));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_reload_keeps_next_item() {
    let h = harness();
    let first = h.player.load(MediaProduct::track("B"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;
    let next = h.player.set_next(MediaProduct::track("C")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.player.connection_lost();
    h.player.pause().await.unwrap();
    wait_state(&h.player, PlaybackState::NotPlaying).await;

    let outcome = h.player.connection_restored().await.unwrap();
    assert!(matches!(outcome, RecoveryOutcome::Resumed { previous, .. } if previous == first));
    assert_eq!(h.player.next_media_product(), Some(MediaProduct::track("C")));
    assert_eq!(h.player.preloaded_session(), Some(next));
}

#[tokio::test(start_paused = true)]
async fn test_expired_stream_is_reloaded_before_play() {
    let h = harness();
    h.resolver
        .add("stale", SimTrack::new(5.0).expires_in(ChronoDuration::minutes(-1)));
    let first = h.player.load(MediaProduct::track("stale"), 0.0).await.unwrap();

    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    assert_ne!(h.current(), first);
    assert_eq!(h.resolver.fetch_count("stale"), 2);
    assert!(!h.player.context().store.read().await.has_transition(&first));
}

#[tokio::test(start_paused = true)]
async fn test_preview_stream_is_reloaded_before_play() {
    let h = harness();
    h.resolver.add("clip", SimTrack::new(5.0).preview());
    let first = h.player.load(MediaProduct::track("clip"), 0.0).await.unwrap();

    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    assert_ne!(h.current(), first);
    assert_eq!(h.resolver.fetch_count("clip"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_preload_leaves_active_slot_alone() {
    let h = harness();
    let current = h.player.load(MediaProduct::track("A"), 0.0).await.unwrap();
    h.player.play().await.unwrap();
    wait_state(&h.player, PlaybackState::Playing).await;

    let slots = h.backend.engines();
    let inactive = slots
        .iter()
        .find(|slot| slot.loaded_session() != Some(current))
        .expect("an idle slot")
        .clone();
    inactive.fail_next_load(DecodeFault::fatal("CORRUPT", "bad header"));

    let err = h.player.set_next(MediaProduct::track("B")).await.unwrap_err();
    assert!(matches!(err, PlayerError::Decode(_)));

    assert_eq!(h.slot(current).loaded_session(), Some(current));
    assert_eq!(h.player.playback_state(), PlaybackState::Playing);
    assert!(h.player.next_media_product().is_none());
    assert_eq!(h.player.context().store.read().await.session_ids(), vec![current]);
}
