use anyhow::{anyhow, Context, Result};
use kestrel_avatar::assets::skeletal::load_gltf;
use kestrel_avatar::assets::FileAssetSource;
use kestrel_avatar::config::LoaderConfig;
use kestrel_avatar::registry::{AnimationRegistry, RegistryIssue, RegistryIssueSeverity};
use kestrel_avatar::rig::AvatarRig;
use kestrel_avatar::{AvatarSkeleton, ClipLoader};
use serde::Serialize;
use serde_json::json;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    match run().await {
        Ok(result) => {
            if result.summary.errors > 0 || (result.fail_on_warn && result.summary.warnings > 0) {
                process::exit(2);
            }
        }
        Err(err) => {
            error!("avatar_check error: {err:?}");
            process::exit(1);
        }
    }
}

#[derive(Default, Serialize)]
struct RunSummary {
    definitions: usize,
    resolved: usize,
    warnings: usize,
    errors: usize,
}

struct RunResult {
    summary: RunSummary,
    fail_on_warn: bool,
}

#[derive(Debug, Default)]
struct CliOptions {
    fail_on_warn: bool,
    report_stats: bool,
    legacy_axes: bool,
    show_help: bool,
    avatar: Option<PathBuf>,
    root: Option<PathBuf>,
    registry: Option<PathBuf>,
}

async fn run() -> Result<RunResult> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_cli_args(&args)?;
    if options.show_help {
        print_usage();
        return Ok(RunResult { summary: RunSummary::default(), fail_on_warn: options.fail_on_warn });
    }

    let registry = match options.registry.as_deref() {
        Some(path) => AnimationRegistry::load(path)?,
        None => AnimationRegistry::builtin()?,
    };
    let mut summary = RunSummary { definitions: registry.len(), ..RunSummary::default() };
    for issue in registry.validate() {
        report_issue(&issue, options.report_stats);
        tally(&mut summary, issue.severity);
    }

    if let Some(avatar) = options.avatar.as_deref() {
        let root = options
            .root
            .clone()
            .or_else(|| options.registry.as_deref().and_then(Path::parent).map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        resolve_all(registry, avatar, &root, options.legacy_axes, options.report_stats, &mut summary).await?;
    }

    println!(
        "Checked {} definitions ({} resolved, {} warnings, {} errors)",
        summary.definitions, summary.resolved, summary.warnings, summary.errors
    );
    if options.report_stats {
        println!("{}", json!({ "summary": summary }));
    }
    Ok(RunResult { summary, fail_on_warn: options.fail_on_warn })
}

async fn resolve_all(
    registry: AnimationRegistry,
    avatar: &Path,
    root: &Path,
    legacy_axes: bool,
    report_stats: bool,
    summary: &mut RunSummary,
) -> Result<()> {
    let scene = load_gltf(avatar)?;
    let rig = AvatarRig::from_scene(&scene.nodes, legacy_axes)
        .with_context(|| format!("'{}' is not a humanoid avatar", avatar.display()))?;
    println!(
        "Avatar {}: {} nodes, {} humanoid bones, hips height {:.3}",
        avatar.display(),
        rig.node_count(),
        rig.bone_count(),
        rig.hips_height()
    );

    let registry = Arc::new(registry);
    let loader = ClipLoader::new(Arc::clone(&registry), Arc::new(FileAssetSource::new(root)), &LoaderConfig::default());
    loader.attach_skeleton(Arc::new(rig));

    for definition in registry.iter() {
        match loader.resolve(&definition.id).await {
            Some(clip) => {
                summary.resolved += 1;
                println!(
                    "OK {} ({:.2}s, {} tracks, {})",
                    clip.id,
                    clip.duration(),
                    clip.tracks.len(),
                    clip.region()
                );
                if report_stats {
                    println!(
                        "{}",
                        json!({
                            "id": clip.id.as_ref(),
                            "duration": clip.duration(),
                            "frames": clip.meta.frame_count,
                            "tracks": clip.tracks.len(),
                            "region": clip.region().label(),
                            "seamless": clip.is_seamless(),
                        })
                    );
                }
            }
            None => {
                summary.errors += 1;
                println!("[ERROR] {} - failed to resolve '{}'", definition.id, definition.path);
            }
        }
    }

    let report = loader.preload().await;
    if let Some(message) = report.critical_error {
        summary.errors += 1;
        println!("[ERROR] {message}");
    }
    Ok(())
}

fn tally(summary: &mut RunSummary, severity: RegistryIssueSeverity) {
    match severity {
        RegistryIssueSeverity::Warning => summary.warnings += 1,
        RegistryIssueSeverity::Error => summary.errors += 1,
        RegistryIssueSeverity::Info => {}
    }
}

fn report_issue(issue: &RegistryIssue, as_json: bool) {
    println!("{issue}");
    if as_json {
        let json_value = json!({
            "severity": issue.severity.to_string(),
            "id": issue.id,
            "message": issue.message,
        });
        println!("{json_value}");
    }
}

fn print_usage() {
    eprintln!(
        "Avatar Check

Usage:
  avatar_check [--fail-on-warn] [--report-stats] [--resolve <avatar.gltf>] [--root <dir>] [--legacy-axes] [<registry.json>]

Validates an animation registry (the built-in one when no path is given).
With --resolve, every clip is also loaded and retargeted onto the avatar;
asset paths are read below --root (default: the registry's directory).
Exits with code 2 on errors, or on warnings with --fail-on-warn.
"
    );
}

fn parse_cli_args(args: &[String]) -> Result<CliOptions> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--fail-on-warn" => options.fail_on_warn = true,
            "--report-stats" => options.report_stats = true,
            "--legacy-axes" => options.legacy_axes = true,
            "--help" | "-h" => options.show_help = true,
            "--resolve" => {
                let value = iter.next().ok_or_else(|| anyhow!("--resolve expects an avatar path"))?;
                options.avatar = Some(PathBuf::from(value));
            }
            "--root" => {
                let value = iter.next().ok_or_else(|| anyhow!("--root expects a directory"))?;
                options.root = Some(PathBuf::from(value));
            }
            _ if arg.starts_with("--") => {
                return Err(anyhow!("unknown flag '{arg}'"));
            }
            _ => {
                if options.registry.is_some() {
                    return Err(anyhow!("only one registry path may be given"));
                }
                options.registry = Some(PathBuf::from(arg));
            }
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parse_args_handles_resolve_and_root() {
        let opts = parse_cli_args(&args(&["--fail-on-warn", "--resolve", "avatar.glb", "--root", "public", "reg.json"]))
            .expect("parse args");
        assert!(opts.fail_on_warn);
        assert_eq!(opts.avatar, Some(PathBuf::from("avatar.glb")));
        assert_eq!(opts.root, Some(PathBuf::from("public")));
        assert_eq!(opts.registry, Some(PathBuf::from("reg.json")));
    }

    #[test]
    fn parse_args_errors_on_missing_value_and_unknown_flag() {
        assert!(parse_cli_args(&args(&["--resolve"])).is_err());
        assert!(parse_cli_args(&args(&["--unknown"])).is_err());
        assert!(parse_cli_args(&args(&["a.json", "b.json"])).is_err());
    }
}
