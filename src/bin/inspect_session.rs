//! Print what a saved session holds: metadata, tier counts, open review
//! items and version notes.
//!
//! Usage: inspect-session [session.json] [--all]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use liked_sync::cache::{SessionCache, SNAPSHOT_VERSION};
use liked_sync::classify::tier_counts;
use liked_sync::models::Tier;
use liked_sync::review::ReviewSummary;

#[derive(Parser)]
#[command(name = "inspect-session")]
#[command(about = "Inspect a liked-sync session file")]
struct Args {
    #[arg(default_value = ".liked-sync-session.json")]
    session: PathBuf,

    /// List every open review item and note instead of the first 20
    #[arg(long)]
    all: bool,
}

const PREVIEW: usize = 20;

fn main() -> Result<()> {
    let args = Args::parse();

    let cache = SessionCache::new(&args.session, false);
    let Some(snapshot) = cache
        .try_load()
        .with_context(|| format!("Failed to read {:?}", args.session))?
    else {
        bail!("No session file at {:?}", args.session);
    };

    println!("Session: {:?}", args.session);
    println!("{:-<60}", "");
    println!(
        "  Version:      {}{}",
        snapshot.version,
        if snapshot.version == SNAPSHOT_VERSION { "" } else { " (outdated, will be rebuilt)" }
    );
    println!("  Saved at:     {}", snapshot.saved_at.to_rfc3339());
    println!("  Fingerprint:  {}", snapshot.fingerprint.as_str());
    println!("  Rules digest: {}", snapshot.rules_digest);
    println!(
        "  Thresholds:   similarity {}%, review {}%",
        snapshot.thresholds.similarity, snapshot.thresholds.review
    );
    println!("  Liked tracks: {}", snapshot.remote.len());
    println!(
        "  Local tracks: {} of {} files ({} excluded)",
        snapshot.local.len(),
        snapshot.local_files_seen,
        snapshot.local_files_excluded
    );

    let (matched, review, missing) = tier_counts(&snapshot.decisions);
    let summary = ReviewSummary::tally(&snapshot.decisions);
    println!("\nDecisions");
    println!("{:-<60}", "");
    println!("  Matched: {}", matched);
    println!("  Review:  {}", review);
    println!("  Missing: {}", missing);
    println!(
        "  Reviewed: {} accepted, {} rejected, {} conflicts",
        summary.accepted, summary.rejected, summary.conflicts
    );

    let limit = if args.all { usize::MAX } else { PREVIEW };

    let open: Vec<_> = snapshot.decisions.iter().filter(|d| d.tier == Tier::Review).collect();
    if !open.is_empty() {
        println!("\nOpen review items ({})", open.len());
        println!("{:-<60}", "");
        for d in open.iter().take(limit) {
            let local = d
                .candidate
                .as_ref()
                .map(|c| c.local.display_name())
                .unwrap_or_else(|| "-".to_string());
            println!("  {:>3}%  {}  <->  {}", d.score, d.remote.display_name(), local);
        }
        if open.len() > limit {
            println!("  ... {} more", open.len() - limit);
        }
    }

    let noted: Vec<_> = snapshot
        .decisions
        .iter()
        .filter_map(|d| d.version_note.as_ref().map(|n| (d, n)))
        .collect();
    if !noted.is_empty() {
        println!("\nVersion notes ({})", noted.len());
        println!("{:-<60}", "");
        for (d, note) in noted.iter().take(limit) {
            println!("  {}: {}", d.remote.display_name(), note);
        }
        if noted.len() > limit {
            println!("  ... {} more", noted.len() - limit);
        }
    }

    Ok(())
}
