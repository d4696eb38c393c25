//! graft - inspect a read-only namespace built from local directories.
//!
//! Usage:
//!   # List a directory mounted on the command line
//!   graft --mount /srv/music:/media/music ls /media/music
//!
//!   # Build the namespace from a config file and print a file
//!   graft --config graft.toml cat /media/music/README
//!
//!   # Wait for two batches of changes to a path
//!   graft --mount /tmp/drop:/drop watch /drop/incoming --events created --count 2
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `info` filter.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strum::IntoEnumIterator;
use tracing_subscriber::{EnvFilter, fmt};

use graft_vfs::{
    AbsolutePath, FileAttr, MountConfig, Namespace, NamespaceConfig, WatchEventKind,
};

/// Inspect a read-only namespace of grafted directories.
#[derive(Parser, Debug)]
#[command(name = "graft")]
#[command(about = "Read-only view over local directories grafted into one tree")]
struct Args {
    /// TOML namespace config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra local mount, as SOURCE:AT (repeatable)
    #[arg(short, long = "mount", value_parser = parse_mount)]
    mounts: Vec<MountConfig>,

    /// Override the watcher poll interval
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Show attributes
    Stat { path: String },
    /// Show active mounts
    Mounts,
    /// Print changes to a path
    Watch {
        path: String,

        /// Kinds of change to report (default: all)
        #[arg(long, value_delimiter = ',')]
        events: Vec<WatchEventKind>,

        /// Stop after this many batches
        #[arg(long)]
        count: Option<usize>,
    },
}

fn parse_mount(arg: &str) -> Result<MountConfig, String> {
    match arg.rsplit_once(':') {
        Some((source, at)) if !source.is_empty() && at.starts_with('/') => Ok(MountConfig {
            source: PathBuf::from(source),
            at: at.to_string(),
        }),
        _ => Err(format!("expected SOURCE:/namespace/path, got {arg:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NamespaceConfig::load_from(path)?,
        None => NamespaceConfig::default(),
    };
    config.mounts.extend(args.mounts);
    if let Some(ms) = args.poll_interval_ms {
        config.watch.poll_interval_ms = ms;
    }

    let ns = Arc::new(Namespace::new(config));
    ns.mount_configured()
        .await
        .context("Failed to mount configured directories")?;
    tracing::info!(
        namespace = %ns.id(),
        name = %ns.name(),
        mounts = ns.mounted_filesystems().len(),
        "namespace ready"
    );

    let mut out = std::io::stdout().lock();
    match args.command {
        Command::Ls { path } => {
            let path = ns_path(&ns, &path)?;
            for entry in ns.list_directory(&path).await? {
                let suffix = if entry.kind.is_dir() { "/" } else { "" };
                writeln!(out, "{}{suffix}", entry.name)?;
            }
        }
        Command::Cat { path } => {
            let path = ns_path(&ns, &path)?;
            let data = ns.read_all(&path).await?;
            out.write_all(&data)?;
        }
        Command::Stat { path } => {
            let path = ns_path(&ns, &path)?;
            let attr = ns.read_attributes(&path).await?;
            write_stat(&mut out, &path, &attr)?;
        }
        Command::Mounts => {
            for mount in ns.mounted_filesystems() {
                writeln!(out, "{} <- {}", mount.mount_point, mount.source.display())?;
            }
        }
        Command::Watch {
            path,
            events,
            count,
        } => {
            let path = ns_path(&ns, &path)?;
            let kinds: Vec<WatchEventKind> = if events.is_empty() {
                WatchEventKind::iter().collect()
            } else {
                events
            };
            drop(out);
            watch(&ns, &path, &kinds, count).await?;
        }
    }

    ns.close();
    Ok(())
}

fn ns_path(ns: &Namespace, text: &str) -> Result<AbsolutePath> {
    ns.path(text)
        .with_context(|| format!("Invalid namespace path {text:?}"))
}

fn write_stat(out: &mut impl Write, path: &AbsolutePath, attr: &FileAttr) -> Result<()> {
    writeln!(out, "path:  {path}")?;
    writeln!(out, "kind:  {:?}", attr.kind)?;
    writeln!(out, "size:  {}", attr.size)?;
    writeln!(out, "mtime: {}", epoch_secs(attr.mtime))?;
    if let Some(ctime) = attr.ctime {
        writeln!(out, "ctime: {}", epoch_secs(ctime))?;
    }
    Ok(())
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn watch(
    ns: &Arc<Namespace>,
    path: &AbsolutePath,
    kinds: &[WatchEventKind],
    count: Option<usize>,
) -> Result<()> {
    let service = ns.new_watch_service()?;
    let key = service.register(path, kinds).await?;
    tracing::info!(
        path = %path,
        interval_ms = service.poll_interval().as_millis() as u64,
        "watching"
    );

    let mut batches = 0;
    while count.is_none_or(|limit| batches < limit) {
        let ready = service.take().await?;
        for event in ready.poll_events() {
            println!("{} {}", event.kind, event.context);
        }
        batches += 1;
        if !ready.reset() {
            bail!("watch on {} is no longer valid", key.path());
        }
    }
    Ok(())
}
