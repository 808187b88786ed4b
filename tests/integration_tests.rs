//! Integration tests for job configuration and error policy
//!
//! Tests that need real media files are `#[ignore]`d by default and run
//! against whatever sample file is dropped next to the manifest.

use std::path::{Path, PathBuf};

use framecut::engine::Quality;
use framecut::job::{CancelFlag, Job, JobOptions};
use framecut::{FrameCutError, TimeInterval};
use tempfile::TempDir;

#[test]
fn job_options_defaults() {
    let options = JobOptions::default();
    assert_eq!(options.quality, Quality::Normal);
    assert!(!options.keyframe_mode);
    assert!(!options.preserve_timestamps);
    assert_eq!(options.max_gop_frames, 600);
    assert!(!options.remove_partial);
}

#[test]
fn quality_presets_cover_cli_spellings() {
    for (name, expected) in [
        ("low", Quality::Low),
        ("normal", Quality::Normal),
        ("high", Quality::High),
        ("indistinguishable", Quality::Indistinguishable),
        ("near-lossless", Quality::NearLossless),
        ("lossless", Quality::Lossless),
    ] {
        assert_eq!(Quality::parse(name), Some(expected));
    }
    assert_eq!(Quality::parse("medium"), None);
}

#[test]
fn cancel_flag_is_shared_between_clones() {
    let flag = CancelFlag::new();
    let observer = flag.clone();
    assert!(!observer.is_cancelled());
    flag.cancel();
    assert!(observer.is_cancelled());
}

#[test]
fn missing_input_is_unreadable_with_exit_3() {
    let tmp = TempDir::new().unwrap();
    let job = Job::new(
        PathBuf::from("/nonexistent/clip.mp4"),
        tmp.path().join("out.mp4"),
        vec![TimeInterval::new(0, 900_000)],
        JobOptions::default(),
    );
    let err = job.run(&CancelFlag::new()).unwrap_err();
    assert!(matches!(err, FrameCutError::InputUnreadable { .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn garbage_input_is_unreadable() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("not-a-video.mp4");
    std::fs::write(&input, b"this is not a container").unwrap();
    let job = Job::new(
        input,
        tmp.path().join("out.mp4"),
        vec![TimeInterval::new(0, 900_000)],
        JobOptions::default(),
    );
    let err = job.run(&CancelFlag::new()).unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

// Real-media scenarios; provide `sample.mp4` beside Cargo.toml to run

fn sample() -> Option<PathBuf> {
    let path = Path::new("sample.mp4");
    path.exists().then(|| path.to_path_buf())
}

#[test]
#[ignore]
fn cut_aligned_interval_produces_output() {
    let Some(input) = sample() else { return };
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("cut.mp4");

    framecut::init().unwrap();
    let media = framecut::probe::probe(&input).unwrap();
    let video = media.reference_video().unwrap();
    let resolver = framecut::TimeResolver::new(
        media.duration,
        video.frame_rate.unwrap_or(25.0),
        video.time_base(),
    );
    let intervals = resolver
        .resolve_keep(&["1".to_string(), "3".to_string()])
        .unwrap();

    let job = Job::new(input, output.clone(), intervals, JobOptions::default());
    let report = job.run(&CancelFlag::new()).unwrap();
    assert!(output.exists());
    assert!(report.copied_packets + report.reencoded_packets > 0);
}

#[test]
#[ignore]
fn whole_file_remux_keeps_all_streams() {
    let Some(input) = sample() else { return };
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("remux.mkv");

    framecut::init().unwrap();
    let media = framecut::probe::probe(&input).unwrap();
    let video = media.reference_video().unwrap();
    let resolver = framecut::TimeResolver::new(
        media.duration,
        video.frame_rate.unwrap_or(25.0),
        video.time_base(),
    );
    let intervals = resolver
        .resolve_keep(&["start".to_string(), "end".to_string()])
        .unwrap();

    let job = Job::new(input, output.clone(), intervals, JobOptions::default());
    job.run(&CancelFlag::new()).unwrap();

    let out_media = framecut::probe::probe(&output).unwrap();
    assert!(out_media.reference_video().is_some());
    assert_eq!(out_media.audio_streams().count(), media.audio_streams().count());
}
