mod common;

use rtc_demo::{
    live::LiveStreamRequest,
    media::{TrackId, TrackTag},
    platform::{LiveStreamingState, RejectionKind, RtcEvent},
    Conf, ErrorKind, LiveMode, LivePhase, StreamId,
};

use self::common::{rejection, Harness};

/// Joins and publishes camera and microphone tracks.
fn publishing() -> Harness {
    let mut h = Harness::new();
    h.join();
    let room = h.room.clone();
    h.run(async move {
        room.create_track(TrackTag::Camera).await.unwrap();
        room.create_track(TrackTag::Microphone).await.unwrap();
        room.publish(vec![TrackTag::Camera, TrackTag::Microphone])
            .await
            .unwrap();
    });
    h
}

fn toggle(h: &mut Harness) -> Result<(), rtc_demo::Error> {
    let room = h.room.clone();
    h.run(async move { room.toggle_live().await })
}

fn report(
    h: &Harness,
    id: &StreamId,
    mode: LiveMode,
    state: LiveStreamingState,
) {
    h.client.emit(RtcEvent::LiveStreamingStateChanged {
        stream_id: id.clone(),
        mode,
        state,
    });
}

fn phase(h: &Harness) -> LivePhase {
    h.snapshot().live.phase
}

#[test]
fn requires_connection() {
    let mut h = Harness::new();

    let err = toggle(&mut h).unwrap_err();
    assert_eq!(err.name(), "NotConnected");
    assert_eq!(phase(&h), LivePhase::Idle);
}

#[test]
fn requires_published_tracks() {
    let mut h = Harness::new();
    h.join();

    let err = toggle(&mut h).unwrap_err();
    assert_eq!(err.name(), "NoPublishedTracks");
    assert_eq!(err.kind(), ErrorKind::RecoverableUser);
    assert_eq!(h.client.count("start"), 0);
}

#[test]
fn toggles_on_and_off() {
    let mut h = publishing();

    toggle(&mut h).unwrap();
    let id = h.client.stream_id(0);
    assert_eq!(phase(&h), LivePhase::Pending);
    match &h.client.live_requests.borrow()[0] {
        LiveStreamRequest::Direct {
            url,
            video_track,
            audio_track,
            ..
        } => {
            assert_eq!(url, &format!("rtmp://127.0.0.1:1935/live/{}", id));
            assert_eq!(video_track, &Some(TrackId::from("camera-1")));
            assert_eq!(audio_track, &Some(TrackId::from("mic-2")));
        }
        LiveStreamRequest::Composed { .. } => {
            panic!("expected direct request")
        }
    }

    let err = toggle(&mut h).unwrap_err();
    assert_eq!(err.name(), "LiveStreamingInProgress");

    report(&h, &id, LiveMode::Direct, LiveStreamingState::Started);
    assert_eq!(phase(&h), LivePhase::Connected);
    assert_eq!(h.snapshot().live.stream_id, Some(id.clone()));

    toggle(&mut h).unwrap();
    assert!(h.client.called(&format!("stop:{}", id)));
    assert_eq!(phase(&h), LivePhase::Idle);
    assert!(h.snapshot().live.active.is_empty());
}

#[test]
fn rejected_start_returns_to_idle() {
    let mut h = publishing();
    h.client
        .start_error
        .replace(Some(rejection(RejectionKind::Network)));

    let err = toggle(&mut h).unwrap_err();
    assert_eq!(err.name(), "LiveStreamingStartError");
    assert_eq!(phase(&h), LivePhase::Idle);
}

#[test]
fn failed_session_returns_to_idle() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let id = h.client.stream_id(0);

    report(&h, &id, LiveMode::Direct, LiveStreamingState::Failed);

    assert_eq!(phase(&h), LivePhase::Idle);
}

#[test]
fn unconfirmed_start_returns_to_idle() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    assert_eq!(phase(&h), LivePhase::Pending);
    assert_eq!(
        h.timer.delays.borrow().last().copied(),
        Some(Conf::default().live.confirmation_timeout),
    );

    h.timer.elapse();
    h.settle();

    assert_eq!(phase(&h), LivePhase::Idle);
    assert!(h.snapshot().live.active.is_empty());
    toggle(&mut h).unwrap();
    assert_eq!(h.client.count("start"), 2);
}

#[test]
fn late_confirmation_of_forgotten_start_is_ignored() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let id = h.client.stream_id(0);
    h.timer.elapse();
    h.settle();

    report(&h, &id, LiveMode::Direct, LiveStreamingState::Started);

    assert_eq!(phase(&h), LivePhase::Idle);
    assert_eq!(h.snapshot().live.stream_id, None);
}

#[test]
fn failed_stop_returns_to_connected() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let id = h.client.stream_id(0);
    report(&h, &id, LiveMode::Direct, LiveStreamingState::Started);
    h.client
        .stop_error
        .replace(Some(rejection(RejectionKind::Network)));

    let err = toggle(&mut h).unwrap_err();
    assert_eq!(err.name(), "LiveStreamingStopError");

    let live = h.snapshot().live.clone();
    assert_eq!(live.phase, LivePhase::Connected);
    assert_eq!(live.stream_id, Some(id.clone()));
    assert_eq!(live.active, vec![id]);
}

#[test]
fn idle_mode_change_only_sets_mode() {
    let mut h = publishing();
    let room = h.room.clone();

    h.run(async move { room.change_live_mode(LiveMode::Composed).await })
        .unwrap();

    assert_eq!(h.snapshot().live.mode, LiveMode::Composed);
    assert_eq!(phase(&h), LivePhase::Idle);
    assert_eq!(h.client.count("start"), 0);
}

#[test]
fn mode_switch_stops_old_session_after_new_one_started() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let old = h.client.stream_id(0);
    report(&h, &old, LiveMode::Direct, LiveStreamingState::Started);

    let room = h.room.clone();
    h.spawn(async move {
        room.change_live_mode(LiveMode::Composed).await.unwrap();
    });
    h.settle();

    let new = h.client.stream_id(1);
    assert_ne!(old, new);
    assert!(matches!(
        h.client.live_requests.borrow()[1],
        LiveStreamRequest::Composed { .. }
    ));
    assert_eq!(phase(&h), LivePhase::Pending);
    assert!(!h.client.called(&format!("stop:{}", old)));

    report(&h, &new, LiveMode::Composed, LiveStreamingState::Started);
    h.settle();

    let start = h.client.position(&format!("start:{}", new)).unwrap();
    let stop = h.client.position(&format!("stop:{}", old)).unwrap();
    assert!(start < stop);
    let live = h.snapshot().live.clone();
    assert_eq!(live.phase, LivePhase::Connected);
    assert_eq!(live.mode, LiveMode::Composed);
    assert_eq!(live.stream_id, Some(new.clone()));
    assert_eq!(live.active, vec![new]);
}

#[test]
fn failed_switch_keeps_old_session() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let old = h.client.stream_id(0);
    report(&h, &old, LiveMode::Direct, LiveStreamingState::Started);

    let room = h.room.clone();
    h.spawn(async move {
        let err =
            room.change_live_mode(LiveMode::Composed).await.unwrap_err();
        assert_eq!(err.name(), "LiveStreamingNotConfirmed");
    });
    h.settle();
    let new = h.client.stream_id(1);
    report(&h, &new, LiveMode::Composed, LiveStreamingState::Failed);
    h.settle();

    assert!(!h.client.called(&format!("stop:{}", old)));
    let live = h.snapshot().live.clone();
    assert_eq!(live.phase, LivePhase::Connected);
    assert_eq!(live.mode, LiveMode::Direct);
    assert_eq!(live.stream_id, Some(old));
}

#[test]
fn leaving_forgets_sessions() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let id = h.client.stream_id(0);
    report(&h, &id, LiveMode::Direct, LiveStreamingState::Started);
    let room = h.room.clone();

    h.run(async move { room.leave().await }).unwrap();

    let live = h.snapshot().live.clone();
    assert_eq!(live.phase, LivePhase::Idle);
    assert!(live.active.is_empty());
}

#[test]
fn unconfirmed_switch_keeps_old_session() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let old = h.client.stream_id(0);
    report(&h, &old, LiveMode::Direct, LiveStreamingState::Started);

    let room = h.room.clone();
    h.spawn(async move {
        let err =
            room.change_live_mode(LiveMode::Composed).await.unwrap_err();
        assert_eq!(err.name(), "LiveStreamingNotConfirmed");
    });
    h.settle();
    assert_eq!(phase(&h), LivePhase::Pending);

    h.timer.elapse();
    h.settle();

    assert!(!h.client.called(&format!("stop:{}", old)));
    let live = h.snapshot().live.clone();
    assert_eq!(live.phase, LivePhase::Connected);
    assert_eq!(live.mode, LiveMode::Direct);
    assert_eq!(live.stream_id, Some(old.clone()));
    assert_eq!(live.active, vec![old.clone()]);

    toggle(&mut h).unwrap();
    assert!(h.client.called(&format!("stop:{}", old)));
    assert_eq!(phase(&h), LivePhase::Idle);
}

#[test]
fn failed_stop_of_replaced_session_keeps_connected() {
    let mut h = publishing();
    toggle(&mut h).unwrap();
    let old = h.client.stream_id(0);
    report(&h, &old, LiveMode::Direct, LiveStreamingState::Started);
    h.client
        .stop_error
        .replace(Some(rejection(RejectionKind::Network)));

    let room = h.room.clone();
    h.spawn(async move {
        let err =
            room.change_live_mode(LiveMode::Composed).await.unwrap_err();
        assert_eq!(err.name(), "LiveStreamingStopError");
    });
    h.settle();
    let new = h.client.stream_id(1);
    report(&h, &new, LiveMode::Composed, LiveStreamingState::Started);
    h.settle();

    assert!(h.client.called(&format!("stop:{}", old)));
    let live = h.snapshot().live.clone();
    assert_eq!(live.phase, LivePhase::Connected);
    assert_eq!(live.mode, LiveMode::Composed);
    assert_eq!(live.stream_id, Some(new.clone()));
    assert_eq!(live.active, vec![old, new]);
}
