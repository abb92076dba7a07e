use kestrel_avatar::config::PlaybackConfig;
use kestrel_avatar::player::CursorSnapshot;
use kestrel_avatar::rig::{AvatarRig, BodyRegion};
use kestrel_avatar::{AnimationPlayer, PlayOptions, PlayerEvent, ResolvedClip};
use std::sync::Arc;

const DT: f32 = 1.0 / 60.0;

fn seamless_clip(id: &str, duration: f32) -> Arc<ResolvedClip> {
    Arc::new(ResolvedClip::new(id, duration, Vec::new()).with_seamless(true))
}

fn bound_player() -> AnimationPlayer {
    let mut player = AnimationPlayer::new(PlaybackConfig::default());
    player.bind_skeleton(Arc::new(AvatarRig::builder().standard_humanoid().hips_height(1.0).build()));
    player
}

fn snapshot(player: &AnimationPlayer) -> Vec<CursorSnapshot> {
    player.cursors(BodyRegion::Full).to_vec()
}

#[test]
fn seamless_loops_bind_two_cursors() {
    let mut player = bound_player();
    player.play(Some(seamless_clip("breathe", 2.0)), PlayOptions::looping().with_fade(0.5));
    assert!(player.channel(BodyRegion::Full).is_seamless());
    let cursors = snapshot(&player);
    assert_eq!(cursors.len(), 2);
    assert_eq!(cursors.iter().filter(|cursor| cursor.active).count(), 1);

    player.play(Some(seamless_clip("wave", 2.0)), PlayOptions::once());
    assert!(!player.channel(BodyRegion::Full).is_seamless(), "one-shots never use the pair");
}

#[test]
fn cursors_only_jump_back_while_silent() {
    let mut player = bound_player();
    player.play(Some(seamless_clip("breathe", 2.0)), PlayOptions::looping().with_fade(0.5));

    let mut previous = snapshot(&player);
    let mut jumps = 0;
    let mut overlapping_frames = 0;
    for _ in 0..(8.0 / DT) as usize {
        player.tick(DT);
        let current = snapshot(&player);
        for (before, after) in previous.iter().zip(&current) {
            if after.time + 1e-4 < before.time {
                jumps += 1;
                assert!(before.weight < 1e-4, "cursor {} rewound at weight {}", before.slot, before.weight);
            }
        }
        if current.iter().all(|cursor| cursor.weight > 0.05) {
            overlapping_frames += 1;
        }
        let total: f32 = current.iter().map(|cursor| cursor.weight).sum();
        assert!(total <= 1.0 + 1e-4, "crossfade never overshoots, got {total}");
        previous = current;
    }
    assert!(jumps >= 3, "expected several splices over 8s, saw {jumps}");
    assert!(overlapping_frames > 0, "cursors should overlap during the splice");
}

#[test]
fn seamless_repeat_event_fires_once_until_replayed() {
    let mut player = bound_player();
    let clip = seamless_clip("breathe", 2.0);
    player.play(Some(Arc::clone(&clip)), PlayOptions::looping().with_fade(0.5));

    let mut repeats = 0;
    for _ in 0..(6.0 / DT) as usize {
        repeats += player
            .tick(DT)
            .iter()
            .filter(|event| matches!(event, PlayerEvent::AboutToRepeat { channel: BodyRegion::Full, .. }))
            .count();
    }
    assert_eq!(repeats, 1);

    player.play(Some(clip), PlayOptions::looping());
    assert!(player.channel(BodyRegion::Full).is_seamless());
    let mut rearmed = 0;
    for _ in 0..(2.5 / DT) as usize {
        rearmed += player
            .tick(DT)
            .iter()
            .filter(|event| matches!(event, PlayerEvent::AboutToRepeat { .. }))
            .count();
    }
    assert_eq!(rearmed, 1);
}

#[test]
fn seam_window_is_bounded_by_half_the_clip() {
    let mut player = bound_player();
    player.play(Some(seamless_clip("blink", 0.4)), PlayOptions::looping().with_fade(1.0));
    let mut max_overlap_frames = 0;
    let mut run = 0;
    for _ in 0..120 {
        player.tick(DT);
        let cursors = snapshot(&player);
        if cursors.iter().all(|cursor| cursor.weight > 1e-3) {
            run += 1;
            max_overlap_frames = max_overlap_frames.max(run);
        } else {
            run = 0;
        }
    }
    // Splices last at most 0.2s (half of 0.4s).
    assert!(max_overlap_frames <= 13, "overlap lasted {max_overlap_frames} frames");
    assert!(max_overlap_frames > 0);
}
