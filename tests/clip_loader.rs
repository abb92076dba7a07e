use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use glam::{Quat, Vec3};
use kestrel_avatar::assets::{
    AssetSource, ClipInterpolation, NodeTrack, QuatTrack, RawAnimation, SourceBone, TrackData, Vec3Track,
};
use kestrel_avatar::config::LoaderConfig;
use kestrel_avatar::registry::{AnimationCategory, AnimationDefinition, AnimationRegistry, AssetFormat};
use kestrel_avatar::rig::{AvatarRig, BodyRegion, HumanBone};
use kestrel_avatar::{ClipLoader, LoadingState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingSource {
    clips: HashMap<String, RawAnimation>,
    fetches: AtomicUsize,
    delay: Duration,
}

impl CountingSource {
    fn new(clips: impl IntoIterator<Item = (&'static str, RawAnimation)>) -> Self {
        Self {
            clips: clips.into_iter().map(|(path, raw)| (path.to_string(), raw)).collect(),
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for CountingSource {
    async fn fetch(&self, definition: &AnimationDefinition) -> Result<RawAnimation> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.clips.get(&definition.path).cloned().ok_or_else(|| anyhow!("no such file '{}'", definition.path))
    }
}

fn rotation_track(times: &[f32]) -> TrackData {
    let values = times.iter().map(|t| Quat::from_rotation_y(*t)).collect();
    TrackData::Rotation(QuatTrack::new(ClipInterpolation::Linear, times, values).expect("rotation track"))
}

fn native_raw(duration: f32, targets: &[&str]) -> RawAnimation {
    let times: Vec<f32> = (0..=(duration * 2.0) as usize).map(|i| i as f32 * 0.5).collect();
    RawAnimation {
        name: Arc::from("native"),
        duration,
        tracks: targets.iter().map(|target| NodeTrack { target: Arc::from(*target), data: rotation_track(&times) }).collect(),
        bones: HashMap::new(),
    }
}

fn mixamo_raw(arm_rest: Quat, hips_position: Vec3) -> RawAnimation {
    let bone = |name: &str, rest_translation: Vec3, rest_world_rotation: Quat| SourceBone {
        name: Arc::from(name),
        rest_translation,
        rest_world_rotation,
        parent_world_rotation: Quat::IDENTITY,
    };
    let mut bones = HashMap::new();
    bones.insert(Arc::from("mixamorigHips"), bone("mixamorigHips", Vec3::new(0.0, 100.0, 0.0), Quat::IDENTITY));
    bones.insert(Arc::from("mixamorigLeftArm"), bone("mixamorigLeftArm", Vec3::ZERO, arm_rest));
    let tracks = vec![
        NodeTrack {
            target: Arc::from("mixamorigHips"),
            data: TrackData::Translation(
                Vec3Track::new(ClipInterpolation::Linear, &[0.0, 1.0], vec![hips_position, hips_position])
                    .expect("hips track"),
            ),
        },
        NodeTrack {
            target: Arc::from("mixamorigLeftArm"),
            data: TrackData::Rotation(
                QuatTrack::new(ClipInterpolation::Linear, &[0.0, 1.0], vec![arm_rest, arm_rest]).expect("arm track"),
            ),
        },
        NodeTrack { target: Arc::from("mixamorigHeadTop_End"), data: rotation_track(&[0.0, 1.0]) },
    ];
    RawAnimation { name: Arc::from("mixamo.com"), duration: 1.0, tracks, bones }
}

fn avatar() -> Arc<AvatarRig> {
    Arc::new(AvatarRig::builder().standard_humanoid().node("hair").hips_height(1.0).build())
}

fn loader(definitions: Vec<AnimationDefinition>, source: Arc<CountingSource>) -> ClipLoader {
    let registry = Arc::new(AnimationRegistry::new(definitions));
    ClipLoader::new(registry, source, &LoaderConfig::default())
}

fn glb(id: &str) -> AnimationDefinition {
    AnimationDefinition::new(id, AssetFormat::Glb, format!("{id}.glb"))
}

#[tokio::test]
async fn concurrent_resolves_share_one_fetch() {
    let source = Arc::new(
        CountingSource::new([("wave.glb", native_raw(2.0, &["rightUpperArm"]))]).with_delay(Duration::from_millis(20)),
    );
    let loader = loader(vec![glb("wave")], Arc::clone(&source));
    loader.attach_skeleton(avatar());

    let results = join_all((0..4).map(|_| loader.resolve("wave"))).await;
    assert_eq!(source.fetches(), 1);
    let first = results[0].clone().expect("clip resolved");
    for clip in &results {
        assert!(Arc::ptr_eq(&first, clip.as_ref().expect("clip")));
    }
    assert_eq!(loader.loading_state("wave"), LoadingState::Loaded);
    assert!(loader.get_loaded("wave").is_some());

    loader.resolve("wave").await.expect("cached clip");
    assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn unknown_id_and_missing_avatar_return_none_without_caching() {
    let source = Arc::new(CountingSource::new([("wave.glb", native_raw(1.0, &["head"]))]));
    let loader = loader(vec![glb("wave")], Arc::clone(&source));

    assert!(loader.resolve("wave").await.is_none(), "no avatar attached yet");
    assert_eq!(source.fetches(), 0);
    assert_eq!(loader.loading_state("wave"), LoadingState::Idle);

    loader.attach_skeleton(avatar());
    assert!(loader.resolve("nope").await.is_none());
    assert_eq!(source.fetches(), 0);
    assert!(loader.resolve("wave").await.is_some(), "resolve retried once the avatar is attached");
    assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn failures_are_cached_until_unloaded() {
    let source = Arc::new(CountingSource::new([]));
    let loader = loader(vec![glb("missing")], Arc::clone(&source));
    loader.attach_skeleton(avatar());

    assert!(loader.resolve("missing").await.is_none());
    assert!(loader.resolve("missing").await.is_none());
    assert_eq!(source.fetches(), 1);
    assert_eq!(loader.loading_state("missing"), LoadingState::Failed);

    assert!(loader.unload("missing"));
    assert!(!loader.unload("missing"));
    assert!(loader.resolve("missing").await.is_none());
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn clip_without_playable_tracks_fails() {
    let source = Arc::new(CountingSource::new([("tail.glb", native_raw(1.0, &["J_Sec_Tail", "tail"]))]));
    let loader = loader(vec![glb("tail")], source);
    loader.attach_skeleton(avatar());
    assert!(loader.resolve("tail").await.is_none());
    assert_eq!(loader.loading_state("tail"), LoadingState::Failed);
}

#[tokio::test]
async fn native_tracks_fall_back_to_normalized_nodes() {
    let rig = Arc::new(
        AvatarRig::builder()
            .bone(HumanBone::Hips, "Normalized_hips")
            .bone(HumanBone::Head, "Normalized_head")
            .hips_height(0.9)
            .build(),
    );
    let source = Arc::new(CountingSource::new([("nod.glb", native_raw(1.0, &["hips", "head", "J_Sec_Hair"]))]));
    let loader = loader(vec![glb("nod")], source);
    loader.attach_skeleton(rig);

    let clip = loader.resolve("nod").await.expect("clip");
    let mut targets: Vec<&str> = clip.tracks.iter().map(|track| track.target.as_ref()).collect();
    targets.sort();
    assert_eq!(targets, vec!["Normalized_head", "Normalized_hips"]);
}

#[tokio::test]
async fn mixamo_clips_are_retargeted_and_scaled() {
    let arm_rest = Quat::from_rotation_z(0.6);
    let source = Arc::new(CountingSource::new([(
        "wave.fbx.glb",
        mixamo_raw(arm_rest, Vec3::new(10.0, 100.0, 5.0)),
    )]));
    let definition = AnimationDefinition::new("wave", AssetFormat::Glb, "wave.fbx.glb");
    let loader = loader(vec![definition], source);
    loader.attach_skeleton(avatar());

    let clip = loader.resolve("wave").await.expect("retargeted clip");
    assert_eq!(clip.tracks.len(), 2, "unmapped joints are dropped");

    let hips = clip.tracks.iter().find(|track| track.target.as_ref() == "hips").expect("hips track");
    let TrackData::Translation(positions) = &hips.data else {
        panic!("hips should carry translation");
    };
    let position = positions.sample(0.0).expect("position");
    assert!((position - Vec3::new(0.1, 1.0, 0.05)).length() < 1e-5);

    let arm = clip.tracks.iter().find(|track| track.target.as_ref() == "leftUpperArm").expect("arm track");
    let TrackData::Rotation(rotations) = &arm.data else {
        panic!("arm should carry rotation");
    };
    let rotation = rotations.sample(0.5).expect("rotation");
    assert!(rotation.angle_between(Quat::IDENTITY) < 1e-4, "rest pose maps onto identity");
}

#[tokio::test]
async fn legacy_rigs_mirror_x_and_z() {
    let source = Arc::new(CountingSource::new([("walk.glb", mixamo_raw(Quat::IDENTITY, Vec3::new(10.0, 100.0, 5.0)))]));
    let loader = loader(vec![glb("walk")], source);
    loader.attach_skeleton(Arc::new(
        AvatarRig::builder().standard_humanoid().hips_height(2.0).legacy_axes(true).build(),
    ));

    let clip = loader.resolve("walk").await.expect("clip");
    let hips = clip.tracks.iter().find(|track| track.target.as_ref() == "hips").expect("hips track");
    let TrackData::Translation(positions) = &hips.data else {
        panic!("hips should carry translation");
    };
    let position = positions.sample(0.0).expect("position");
    assert!((position - Vec3::new(-0.2, 2.0, -0.1)).length() < 1e-5);
}

#[tokio::test]
async fn partial_clips_keep_only_their_region() {
    let source = Arc::new(CountingSource::new([("shrug.glb", native_raw(1.0, &["hips", "head", "leftHand", "hair"]))]));
    let definition = glb("shrug").with_region(BodyRegion::Upper).with_category(AnimationCategory::Gesture);
    let loader = loader(vec![definition], source);
    loader.attach_skeleton(avatar());

    let clip = loader.resolve("shrug").await.expect("clip");
    assert_eq!(clip.region(), BodyRegion::Upper);
    let mut targets: Vec<&str> = clip.tracks.iter().map(|track| track.target.as_ref()).collect();
    targets.sort();
    assert_eq!(targets, vec!["head", "leftHand"]);
}

#[tokio::test]
async fn frame_window_trims_and_rebases() {
    let source = Arc::new(CountingSource::new([("long.glb", native_raw(4.0, &["head"]))]));
    let definition = glb("long").with_frames(Some(30), Some(60));
    let loader = loader(vec![definition], source);
    loader.attach_skeleton(avatar());

    let clip = loader.resolve("long").await.expect("clip");
    assert!((clip.duration() - 1.0).abs() < 1e-5);
    assert_eq!(clip.meta.frame_count, 30);
    let trim = clip.meta.trim.expect("trim bounds");
    assert!((trim.start - 1.0).abs() < 1e-5 && (trim.end - 2.0).abs() < 1e-5);

    let TrackData::Rotation(rotations) = &clip.tracks[0].data else {
        panic!("rotation track expected");
    };
    let times: Vec<f32> = rotations.keyframes.iter().map(|kf| kf.time).collect();
    assert_eq!(times, vec![0.0, 0.5, 1.0]);
    let first = rotations.sample(0.0).expect("sample");
    assert!(first.angle_between(Quat::from_rotation_y(1.0)) < 1e-4);
}

#[tokio::test]
async fn preload_reports_critical_idle_readiness() {
    let source = Arc::new(CountingSource::new([("idle.glb", native_raw(3.0, &["hips", "spine"]))]));
    let definitions = vec![
        glb("idle").with_category(AnimationCategory::Idle).preloaded(),
        glb("wave").preloaded(),
        glb("lazy"),
    ];
    let loader = loader(definitions, Arc::clone(&source));
    loader.attach_skeleton(avatar());

    let report = loader.preload().await;
    assert!(report.critical_ready);
    assert!(report.critical_error.is_none());
    assert_eq!(report.loaded, vec!["idle".to_string()]);
    assert_eq!(report.failed, vec!["wave".to_string()]);
    assert_eq!(source.fetches(), 2, "only the preload set is fetched");
    assert!(loader.critical_ready());
    assert_eq!(loader.preloaded_ids(), vec!["idle".to_string()]);
}

#[tokio::test]
async fn preload_without_any_idle_is_critical() {
    let source = Arc::new(CountingSource::new([("wave.glb", native_raw(1.0, &["head"]))]));
    let definitions = vec![glb("idle").with_category(AnimationCategory::Idle).preloaded(), glb("wave").preloaded()];
    let loader = loader(definitions, source);
    loader.attach_skeleton(avatar());

    let report = loader.preload().await;
    assert!(!report.critical_ready);
    assert!(report.critical_error.is_some());
    assert_eq!(loader.critical_error(), report.critical_error);
}

#[tokio::test]
async fn attaching_a_new_avatar_drops_cached_clips() {
    let source = Arc::new(CountingSource::new([("wave.glb", native_raw(1.0, &["head"]))]));
    let loader = loader(vec![glb("wave")], Arc::clone(&source));
    loader.attach_skeleton(avatar());
    loader.resolve("wave").await.expect("clip");
    loader.attach_skeleton(avatar());
    assert!(loader.get_loaded("wave").is_none());
    loader.resolve("wave").await.expect("clip");
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn unload_during_a_load_leaves_no_stale_state() {
    let source = Arc::new(
        CountingSource::new([("wave.glb", native_raw(1.0, &["head"]))]).with_delay(Duration::from_millis(40)),
    );
    let loader = loader(vec![glb("wave")], Arc::clone(&source));
    loader.attach_skeleton(avatar());

    let (clip, unloaded) = tokio::join!(loader.resolve("wave"), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(loader.loading_state("wave"), LoadingState::Loading);
        loader.unload("wave")
    });
    assert!(clip.is_some(), "the in-flight caller still gets its clip");
    assert!(unloaded);
    assert!(loader.get_loaded("wave").is_none());
    assert_eq!(loader.loading_state("wave"), LoadingState::Idle);

    loader.resolve("wave").await.expect("reloaded");
    assert_eq!(loader.loading_state("wave"), LoadingState::Loaded);
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn avatar_swap_during_a_load_leaves_no_stale_state() {
    let source = Arc::new(
        CountingSource::new([("wave.glb", native_raw(1.0, &["head"]))]).with_delay(Duration::from_millis(40)),
    );
    let loader = loader(vec![glb("wave")], source);
    loader.attach_skeleton(avatar());

    let (_, ()) = tokio::join!(loader.resolve("wave"), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        loader.attach_skeleton(avatar());
    });
    assert!(loader.get_loaded("wave").is_none());
    assert_eq!(loader.loading_state("wave"), LoadingState::Idle);
}
