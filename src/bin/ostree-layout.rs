use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ostree_layout::packages::dpkg;
use ostree_layout::{
    load_config, preflight, BuildContext, LayoutTransformer, LoadedConfig, OstreeCli,
    TransformReport,
};
use tracing::info;

fn usage() -> &'static str {
    "Usage:\n  ostree-layout transform <rootfs> [--config <file.toml>] [--report <file.json>] [--debug]\n  ostree-layout check-tools"
}

struct TransformArgs {
    rootfs: PathBuf,
    config: Option<PathBuf>,
    report: Option<PathBuf>,
    debug: bool,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd] if cmd == "check-tools" => {
            init_logging(false);
            preflight::check_host_tools()
        }
        [cmd, rest @ ..] if cmd == "transform" => {
            let args = parse_transform_args(rest)?;
            init_logging(args.debug);
            transform(&args)
        }
        _ => bail!(usage()),
    }
}

fn parse_transform_args(args: &[String]) -> Result<TransformArgs> {
    let mut rootfs = None;
    let mut config = None;
    let mut report = None;
    let mut debug = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(flag_value(&mut iter, "--config")?)),
            "--report" => report = Some(PathBuf::from(flag_value(&mut iter, "--report")?)),
            "--debug" => debug = true,
            flag if flag.starts_with("--") => bail!("unknown flag '{}'\n{}", flag, usage()),
            path if rootfs.is_none() => rootfs = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument '{}'\n{}", extra, usage()),
        }
    }

    let Some(rootfs) = rootfs else {
        bail!(usage());
    };
    Ok(TransformArgs {
        rootfs,
        config,
        report,
        debug,
    })
}

fn flag_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a str> {
    iter.next()
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn transform(args: &TransformArgs) -> Result<()> {
    let rootfs = args
        .rootfs
        .canonicalize()
        .with_context(|| format!("resolving rootfs '{}'", args.rootfs.display()))?;
    if !rootfs.is_dir() {
        bail!("rootfs '{}' is not a directory", rootfs.display());
    }

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => LoadedConfig::default(),
    };
    if config.commit.is_some() {
        preflight::check_host_tools()?;
    }

    let index = dpkg::load_index(&dpkg::info_dir(&rootfs))
        .with_context(|| format!("loading package index of '{}'", rootfs.display()))?;
    info!("Loaded file lists for {} package(s)", index.len());

    let ctx = BuildContext::new(&rootfs, args.debug);
    let mut transformer = LayoutTransformer::new(ctx, index, config.layout);
    let report = transformer
        .run()
        .with_context(|| format!("transforming '{}'", rootfs.display()))?;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    if let Some(commit) = &config.commit {
        let backend = OstreeCli::new(&commit.repo, transformer.context().debug);
        transformer
            .commit(&backend, &commit.branch, &commit.subject, &commit.body)
            .with_context(|| format!("committing '{}'", rootfs.display()))?;
        info!("Committed {} to {}", commit.branch, commit.repo.display());
    }
    Ok(())
}

fn write_report(path: &Path, report: &TransformReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing transform report")?;
    std::fs::write(path, format!("{json}\n"))
        .with_context(|| format!("writing report '{}'", path.display()))
}
