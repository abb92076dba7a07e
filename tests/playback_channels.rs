use glam::Quat;
use kestrel_avatar::assets::{ClipInterpolation, NodeTrack, QuatTrack, TrackData};
use kestrel_avatar::config::PlaybackConfig;
use kestrel_avatar::rig::{AvatarRig, BodyRegion, HumanBone, NodeTransform};
use kestrel_avatar::{AnimationPlayer, PlayOptions, PlayerEvent, ResolvedClip};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const DT: f32 = 1.0 / 60.0;

fn clip(id: &str, duration: f32, region: BodyRegion) -> Arc<ResolvedClip> {
    Arc::new(ResolvedClip::new(id, duration, Vec::new()).with_region(region))
}

fn turning_clip(id: &str, angle: f32) -> Arc<ResolvedClip> {
    let track = QuatTrack::new(
        ClipInterpolation::Linear,
        &[0.0, 1.0],
        vec![Quat::from_rotation_y(angle), Quat::from_rotation_y(angle)],
    )
    .expect("track");
    Arc::new(ResolvedClip::new(id, 1.0, vec![NodeTrack { target: Arc::from("head"), data: TrackData::Rotation(track) }]))
}

fn bound_player(config: PlaybackConfig) -> AnimationPlayer {
    let mut player = AnimationPlayer::new(config);
    player.bind_skeleton(Arc::new(AvatarRig::builder().standard_humanoid().hips_height(1.0).build()));
    player
}

fn run(player: &mut AnimationPlayer, seconds: f32) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    let frames = (seconds / DT).round() as usize;
    for _ in 0..frames {
        events.extend(player.tick(DT));
    }
    events
}

#[test]
fn play_is_a_noop_without_avatar_or_clip() {
    let mut unbound = AnimationPlayer::default();
    assert!(!unbound.play(Some(clip("idle", 2.0, BodyRegion::Full)), PlayOptions::looping()));
    assert!(unbound.tick(DT).is_empty());
    assert!(!unbound.is_playing());

    let mut player = bound_player(PlaybackConfig::default());
    assert!(!player.play(None, PlayOptions::looping()));
    assert!(player.active_clip(BodyRegion::Full).is_none());
}

#[test]
fn fresh_plays_skip_the_first_frame() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("idle", 2.0, BodyRegion::Full)), PlayOptions::looping());
    let start = player.channel_time(BodyRegion::Full).expect("time");
    assert!((start - 1.0 / 30.0).abs() < 1e-6);

    player.play(Some(clip("blip", 0.02, BodyRegion::Upper)), PlayOptions::once());
    assert_eq!(player.channel_time(BodyRegion::Upper), Some(0.0));
}

#[test]
fn full_body_play_clears_partial_channels() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("wave", 2.0, BodyRegion::Upper)), PlayOptions::once());
    player.play(Some(clip("step", 2.0, BodyRegion::Lower)), PlayOptions::once());
    run(&mut player, 0.2);
    assert!(player.channel(BodyRegion::Upper).is_active());
    assert!(player.channel(BodyRegion::Lower).is_active());

    player.play(Some(clip("idle", 3.0, BodyRegion::Full)), PlayOptions::looping());
    assert!(!player.channel(BodyRegion::Upper).is_active());
    assert!(!player.channel(BodyRegion::Lower).is_active());
    assert_eq!(player.channel(BodyRegion::Upper).departing_len(), 0);

    let events = player.tick(DT);
    assert!(events.contains(&PlayerEvent::Cleared { channel: BodyRegion::Upper }));
    assert!(events.contains(&PlayerEvent::Cleared { channel: BodyRegion::Lower }));
    assert!(events.contains(&PlayerEvent::Started { clip: Arc::from("idle"), channel: BodyRegion::Full }));
}

#[test]
fn partial_channels_do_not_disturb_each_other() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("idle", 3.0, BodyRegion::Full)), PlayOptions::looping());
    player.play(Some(clip("wave", 2.0, BodyRegion::Upper)), PlayOptions::once());
    player.play(Some(clip("step", 2.0, BodyRegion::Lower)), PlayOptions::once());
    assert_eq!(player.active_clip_id(BodyRegion::Full), Some("idle"));
    assert_eq!(player.active_clip_id(BodyRegion::Upper), Some("wave"));
    assert_eq!(player.active_clip_id(BodyRegion::Lower), Some("step"));
}

#[test]
fn lower_body_weight_is_capped() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("step", 2.0, BodyRegion::Lower)), PlayOptions::looping());
    for _ in 0..60 {
        player.tick(DT);
        assert!(player.channel_weight(BodyRegion::Lower) <= 0.5 + 1e-6);
        assert!(player.cursors(BodyRegion::Lower).iter().all(|cursor| cursor.weight <= 0.5 + 1e-6));
    }
    assert!((player.channel_weight(BodyRegion::Lower) - 0.5).abs() < 1e-6);
    assert!((player.channel(BodyRegion::Lower).envelope_weight() - 1.0).abs() < 1e-6);
}

#[test]
fn once_clip_completes_exactly_once_and_freezes() {
    let completions = Arc::new(AtomicUsize::new(0));
    let mut player = bound_player(PlaybackConfig::default());
    let counter = Arc::clone(&completions);
    player.on_completed(move |clip, channel| {
        assert_eq!(clip, "bow");
        assert_eq!(channel, BodyRegion::Full);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    player.play(Some(clip("bow", 1.0, BodyRegion::Full)), PlayOptions::once().with_fade(0.0));

    let events = run(&mut player, 3.0);
    let completed = events.iter().filter(|event| matches!(event, PlayerEvent::Completed { .. })).count();
    assert_eq!(completed, 1);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(player.channel_time(BodyRegion::Full), Some(1.0));
    assert!(player.channel(BodyRegion::Full).is_active());
}

#[test]
fn completion_can_release_the_channel() {
    let config = PlaybackConfig { freeze_on_finish: false, ..PlaybackConfig::default() };
    let mut player = bound_player(config);
    player.play(Some(clip("nod", 0.5, BodyRegion::Upper)), PlayOptions::once().with_fade(0.0));
    let events = run(&mut player, 1.0);
    assert!(events.contains(&PlayerEvent::Completed { clip: Arc::from("nod"), channel: BodyRegion::Upper }));
    assert!(events.contains(&PlayerEvent::Cleared { channel: BodyRegion::Upper }));
    assert!(!player.channel(BodyRegion::Upper).is_active());
}

#[test]
fn faded_out_clip_is_not_reported_complete() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("bow", 1.0, BodyRegion::Full)), PlayOptions::once().with_fade(0.0));
    run(&mut player, 0.5);
    player.play(Some(clip("idle", 4.0, BodyRegion::Full)), PlayOptions::looping().with_fade(1.0));
    let events = run(&mut player, 1.0);
    assert!(!events.iter().any(|event| matches!(event, PlayerEvent::Completed { .. })));
}

#[test]
fn looping_switch_preserves_phase() {
    let config = PlaybackConfig { initial_frame_offset: 0.0, ..PlaybackConfig::default() };
    let mut player = bound_player(config);
    player.play(Some(clip("short", 2.0, BodyRegion::Full)), PlayOptions::looping().with_fade(0.0));
    player.tick(1.0);
    assert!((player.current_time() - 1.0).abs() < 1e-5);

    player.play(Some(clip("long", 4.0, BodyRegion::Full)), PlayOptions::looping().with_fade(0.0));
    assert!((player.current_time() - 2.0).abs() < 1e-5);

    player.play(Some(clip("wave", 4.0, BodyRegion::Full)), PlayOptions::once().with_fade(0.0));
    assert_eq!(player.current_time(), 0.0, "one-shots start fresh");
}

#[test]
fn replaying_the_same_loop_keeps_its_cursor() {
    let mut player = bound_player(PlaybackConfig::default());
    let idle = clip("idle", 3.0, BodyRegion::Full);
    player.play(Some(Arc::clone(&idle)), PlayOptions::looping());
    run(&mut player, 1.0);
    let before = player.current_time();
    player.play(Some(idle), PlayOptions::looping());
    assert!((player.current_time() - before).abs() < 1e-6);
    assert_eq!(player.channel(BodyRegion::Full).departing_len(), 0);
}

#[test]
fn departing_clip_is_removed_after_its_fade() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("a", 3.0, BodyRegion::Full)), PlayOptions::looping().with_fade(0.0));
    player.tick(0.1);
    player.play(Some(clip("b", 3.0, BodyRegion::Full)), PlayOptions::looping().with_fade(0.3));
    assert_eq!(player.channel(BodyRegion::Full).departing_len(), 1);
    player.tick(0.2);
    assert_eq!(player.channel(BodyRegion::Full).departing_len(), 1);
    player.tick(0.2);
    assert_eq!(player.channel(BodyRegion::Full).departing_len(), 0);
    assert!((player.channel_weight(BodyRegion::Full) - 1.0).abs() < 1e-6);
}

#[test]
fn release_channel_fades_out_and_empties_it() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("wave", 2.0, BodyRegion::Upper)), PlayOptions::looping());
    assert!(player.release_channel(BodyRegion::Upper, Some(0.25)));
    assert!(!player.channel(BodyRegion::Upper).is_active());
    assert_eq!(player.channel(BodyRegion::Upper).departing_len(), 1);
    assert!(!player.release_channel(BodyRegion::Upper, None));
    run(&mut player, 0.5);
    assert_eq!(player.channel(BodyRegion::Upper).departing_len(), 0);
}

#[test]
fn pause_freezes_cursors_and_stop_clears() {
    let mut player = bound_player(PlaybackConfig::default());
    player.play(Some(clip("idle", 3.0, BodyRegion::Full)), PlayOptions::looping());
    run(&mut player, 0.5);
    player.pause();
    assert!(player.is_paused());
    let frozen = player.current_time();
    run(&mut player, 0.5);
    assert_eq!(player.current_time(), frozen);
    player.resume();
    run(&mut player, 0.1);
    assert!(player.current_time() > frozen);

    player.stop();
    assert!(!player.is_playing());
    assert!(!player.channel(BodyRegion::Full).is_active());
    assert_eq!(player.tick(DT).to_vec(), vec![PlayerEvent::Cleared { channel: BodyRegion::Full }]);
}

#[test]
fn short_loops_report_repeat_once_per_play() {
    let mut player = bound_player(PlaybackConfig::default());
    let idle = clip("idle", 1.0, BodyRegion::Full);
    player.play(Some(Arc::clone(&idle)), PlayOptions::looping().with_fade(0.0));
    let events = run(&mut player, 3.0);
    let repeats = events.iter().filter(|event| matches!(event, PlayerEvent::AboutToRepeat { .. })).count();
    assert_eq!(repeats, 1);

    player.play(Some(idle), PlayOptions::looping());
    let events = run(&mut player, 1.0);
    assert!(events.iter().any(|event| matches!(event, PlayerEvent::AboutToRepeat { .. })));
}

#[test]
fn pose_blends_toward_rest_by_missing_weight() {
    let rig = AvatarRig::builder()
        .node_with_rest("head", NodeTransform { rotation: Quat::IDENTITY, ..NodeTransform::default() })
        .bone(HumanBone::Head, "head")
        .hips_height(1.0)
        .build();
    let mut player = AnimationPlayer::new(PlaybackConfig::default());
    player.bind_skeleton(Arc::new(rig));
    player.play(Some(turning_clip("turn", 1.0)), PlayOptions::looping().with_fade(1.0));
    player.tick(0.5);

    let pose = player.sample_pose();
    let head = pose.get("head").expect("head transform");
    let (_, angle) = head.rotation.to_axis_angle();
    assert!((angle - 0.5).abs() < 1e-3, "half weight gives half the turn, got {angle}");

    player.tick(1.0);
    let pose = player.sample_pose();
    let (_, angle) = pose.get("head").expect("head transform").rotation.to_axis_angle();
    assert!((angle - 1.0).abs() < 1e-3);
}
