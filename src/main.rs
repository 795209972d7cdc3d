use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use liked_sync::cache::{SessionCache, DEFAULT_SESSION_FILENAME};
use liked_sync::config::{Config, DEFAULT_CONFIG_FILENAME};
use liked_sync::pipeline::{self, OrphanMode, RunOptions};
use liked_sync::progress::{format_duration, set_log_only};
use liked_sync::remote::ExportCatalog;
use liked_sync::report::{self, RunReport};
use liked_sync::scan::DirectoryLibrary;
use liked_sync::terminal::TerminalPresenter;

#[derive(Parser)]
#[command(name = "liked-sync")]
#[command(about = "Find liked tracks missing from local music folders, and local tracks missing from likes")]
struct Args {
    /// Music directories to scan
    #[arg(required = true)]
    music_dirs: Vec<PathBuf>,

    /// JSON export of the remote account (liked tracks, playlists, catalogue)
    #[arg(long)]
    remote_export: PathBuf,

    /// Configuration file (default: liked-sync.json next to the session file)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Similarity threshold for automatic matches (0-100)
    #[arg(long)]
    threshold: Option<u8>,

    /// Lowest score sent to review (0-100)
    #[arg(long)]
    review_threshold: Option<u8>,

    #[arg(short, long)]
    verbose: bool,

    /// Session file (default: .liked-sync-session.json in the output directory)
    #[arg(long)]
    session_file: Option<PathBuf>,

    /// Ignore any saved session
    #[arg(long)]
    force_rescan: bool,

    #[arg(long)]
    no_save_session: bool,

    /// Run everything but change nothing remotely
    #[arg(long)]
    dry_run: bool,

    /// Process local tracks that are not liked
    #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "display")]
    process_orphans: Option<OrphanArg>,

    /// Playlist for orphans added with add-to-playlist
    #[arg(long, default_value = "Local Orphans Found")]
    orphan_playlist_name: String,

    /// Directory for report files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Log progress lines instead of drawing progress bars
    #[arg(long)]
    log_only: bool,

    #[arg(long, default_value = "0")]
    workers: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrphanArg {
    Display,
    AddToLiked,
    AddToPlaylist,
}

impl From<OrphanArg> for OrphanMode {
    fn from(arg: OrphanArg) -> Self {
        match arg {
            OrphanArg::Display => OrphanMode::Display,
            OrphanArg::AddToLiked => OrphanMode::AddToLiked,
            OrphanArg::AddToPlaylist => OrphanMode::AddToPlaylist,
        }
    }
}

fn print_orphans(report: &RunReport) {
    let with_results: Vec<_> = report.orphans.iter().filter(|o| !o.results.is_empty()).collect();
    if with_results.is_empty() {
        return;
    }
    println!("\nLocal tracks not in the liked collection:");
    println!("{:-<80}", "");
    for orphan in with_results {
        println!("{}", orphan.local.track.display_name());
        for r in &orphan.results {
            println!("    {:>3}%  {}  ({})", r.score, r.track.display_name(), r.track.identifier);
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();
    set_log_only(args.log_only);

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let start = Instant::now();

    let session_path = args
        .session_file
        .clone()
        .unwrap_or_else(|| args.output_dir.join(DEFAULT_SESSION_FILENAME));
    let config_path = args.config.clone().unwrap_or_else(|| {
        session_path
            .parent()
            .map(|p| p.join(DEFAULT_CONFIG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME))
    });

    let config = Config::from_file(&config_path)
        .and_then(|c| c.with_thresholds(args.threshold, args.review_threshold))
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    let remote = ExportCatalog::open(&args.remote_export)
        .with_context(|| format!("Failed to open remote export {:?}", args.remote_export))?;
    let library = DirectoryLibrary::new(&args.music_dirs, &config.supported_extensions)
        .context("Failed to open music directories")?;
    let cache = SessionCache::new(session_path, args.force_rescan);

    let options = RunOptions {
        dry_run: args.dry_run,
        save_session: !args.no_save_session,
        orphan_mode: args.process_orphans.map(OrphanMode::from),
        orphan_playlist_name: args.orphan_playlist_name.clone(),
    };

    let stdin = io::stdin();
    let mut presenter = TerminalPresenter::new(stdin.lock(), io::stdout(), config.version_keywords.clone());
    let report = pipeline::run(&config, &options, &cache, &remote, &library, &mut presenter)
        .context("Reconciliation failed")?;

    if !args.dry_run && remote.persist().context("Failed to write remote export")? {
        println!("Updated remote export: {:?}", args.remote_export);
    }

    let missing_files = report::write_missing(&args.output_dir, &config, &report)
        .context("Failed to write missing-tracks report")?;
    let annotated_file = report::write_annotated(&args.output_dir, &config, &report)
        .context("Failed to write annotated report")?;

    if options.orphan_mode == Some(OrphanMode::Display) {
        print_orphans(&report);
    }
    report.log_summary();

    let stats = &report.stats;
    println!("\n{:=<60}", "");
    if report.cancelled {
        println!("Run cancelled during review (progress saved)");
    } else {
        println!("Reconciliation complete!");
    }
    if report.dry_run {
        println!("  DRY RUN: changes were not applied");
    }
    println!("  Liked tracks: {}", stats.remote_tracks);
    println!("  Local tracks: {} ({} files excluded)", stats.local_tracks, stats.local_files_excluded);
    println!("  Matched: {} ({:.1}%)", stats.auto_matched + stats.review_accepted, stats.match_rate());
    println!("  Missing locally: {}", report.missing.len());
    println!("  Unresolved reviews: {}", report.unresolved.len());
    if let Some((links, details)) = missing_files {
        println!("  Missing links: {:?}", links);
        println!("  Missing details: {:?}", details);
    }
    if let Some(path) = annotated_file {
        println!("  Version notes: {:?}", path);
    }
    if options.orphan_mode.is_some() {
        println!("  Local orphans: {}", stats.orphans);
    }
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
