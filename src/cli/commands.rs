//! Command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::bitstream;
use crate::cli::Cli;
use crate::engine::Quality;
use crate::index::{GopIndex, GopStats};
use crate::job::{CancelFlag, Job, JobOptions};
use crate::probe::{self, MediaInfo};
use crate::timeline::TimeResolver;
use crate::utils::format_time;

/// Dispatch the parsed command line
pub fn run(cli: Cli) -> Result<()> {
    if cli.inspect {
        inspect(&cli)
    } else {
        cut(cli)
    }
}

/// Execute a cutting job
fn cut(cli: Cli) -> Result<()> {
    let input = PathBuf::from(&cli.input);
    let output = PathBuf::from(
        cli.output
            .as_deref()
            .context("output path is required")?,
    );

    crate::init().context("failed to initialize codec library")?;
    let media = probe::probe(&input).context("failed to probe input")?;
    let video = media
        .reference_video()
        .context("input has no video stream")?;

    let resolver = TimeResolver::new(
        media.duration,
        video.frame_rate.unwrap_or(25.0),
        video.time_base(),
    );
    let intervals = if !cli.cut.is_empty() {
        resolver.resolve_cut(&cli.cut)
    } else {
        resolver.resolve_keep(&cli.keep)
    }?;

    info!(
        "Keeping {} interval(s) of {}",
        intervals.len(),
        format_time(media.duration)
    );

    let options = JobOptions {
        quality: Quality::parse(&cli.quality).unwrap_or_default(),
        keyframe_mode: cli.keyframe_mode,
        preserve_timestamps: cli.preserve_timestamps,
        max_gop_frames: cli.max_gop_frames,
        remove_partial: cli.remove_partial,
        log_level: Some(cli.log_level.clone()),
    };

    let job = Job::new(input, output, intervals, options);
    let report = job.run(&CancelFlag::new())?;

    println!(
        "Wrote {}: {} segments, {} copied / {} re-encoded video packets, {} passthrough packets",
        report.output.display(),
        report.segments,
        report.copied_packets,
        report.reencoded_packets,
        report.passthrough_packets
    );
    Ok(())
}

#[derive(Serialize)]
struct InspectReport {
    media: MediaInfo,
    gop: GopStats,
}

/// Print stream layout and GOP statistics
fn inspect(cli: &Cli) -> Result<()> {
    let input = PathBuf::from(&cli.input);
    crate::init().context("failed to initialize codec library")?;
    let media = probe::probe(&input).context("failed to probe input")?;
    let video = media
        .reference_video()
        .context("input has no video stream")?;

    let surgeon = bitstream::surgeon_for(video.codec_id);
    let index = GopIndex::scan(&input, video.index, surgeon.as_ref())
        .context("failed to index video stream")?;
    let report = InspectReport {
        gop: index.stats(),
        media,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Media Information");
    println!("=================");
    println!("File:     {}", report.media.path.display());
    println!("Format:   {}", report.media.format);
    println!("Duration: {}", format_time(report.media.duration));
    println!();
    println!("Streams:");
    for s in &report.media.streams {
        match s.kind {
            probe::StreamKind::Video => println!(
                "  #{} video: {} {}x{} @ {:.3} fps",
                s.index,
                s.codec,
                s.width.unwrap_or(0),
                s.height.unwrap_or(0),
                s.frame_rate.unwrap_or(0.0)
            ),
            probe::StreamKind::Audio => println!(
                "  #{} audio: {} {} Hz, {} ch",
                s.index,
                s.codec,
                s.sample_rate.unwrap_or(0),
                s.channels.unwrap_or(0)
            ),
            _ => println!("  #{} {:?}: {}", s.index, s.kind, s.codec),
        }
    }
    println!();
    println!("GOP structure:");
    println!("  GOPs:        {}", report.gop.gop_count);
    println!("  Open GOPs:   {}", report.gop.open_gop_count);
    println!("  Epochs:      {}", report.gop.epoch_count);
    println!(
        "  Duration:    {:.3}s min / {:.3}s mean / {:.3}s max",
        report.gop.min_gop_duration, report.gop.mean_gop_duration, report.gop.max_gop_duration
    );
    Ok(())
}
