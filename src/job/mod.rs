//! Job lifecycle
//!
//! A [`Job`] owns one input/output pair, drives the pipeline from probing
//! through muxing, and releases all codec resources on every exit path. No
//! shared mutable state outlives a job.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_next::Rational;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bitstream::{self, NalFormat};
use crate::engine::reencode::ReencodeRequest;
use crate::engine::{BoundaryAction, PacketCopier, Quality, SegmentEncoder};
use crate::error::{FrameCutError, FrameCutResult};
use crate::index::{GopEntry, GopIndex};
use crate::mux::MuxScheduler;
use crate::planner::{CutPlanner, CutSegment, SegmentMode};
use crate::probe::{self, MediaInfo};
use crate::streams::PassthroughRouter;
use crate::timeline::TimeInterval;

/// Tuning knobs for one job
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub quality: Quality,
    /// Cut on GOP boundaries only; also the automatic fallback for codecs
    /// outside the smart-cut set
    pub keyframe_mode: bool,
    /// Keep input timestamps instead of rebasing the first output DTS to 0
    pub preserve_timestamps: bool,
    /// Decode-window cap for pathological long-GOP inputs
    pub max_gop_frames: usize,
    /// Delete the partial output when cancelled
    pub remove_partial: bool,
    /// Forwarded to codec libraries that take a log level
    pub log_level: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            quality: Quality::Normal,
            keyframe_mode: false,
            preserve_timestamps: false,
            max_gop_frames: 600,
            remove_partial: false,
            log_level: None,
        }
    }
}

/// Cooperative cancellation handle, checked at packet boundaries
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What a finished job did
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub output: PathBuf,
    pub intervals: usize,
    pub segments: usize,
    pub copied_packets: u64,
    pub reencoded_packets: u64,
    pub passthrough_packets: u64,
}

/// One cutting job
pub struct Job {
    input: PathBuf,
    output: PathBuf,
    intervals: Vec<TimeInterval>,
    options: JobOptions,
}

impl Job {
    pub fn new(
        input: PathBuf,
        output: PathBuf,
        intervals: Vec<TimeInterval>,
        options: JobOptions,
    ) -> Job {
        Job {
            input,
            output,
            intervals,
            options,
        }
    }

    /// Run the job to completion or cancellation
    pub fn run(&self, cancel: &CancelFlag) -> FrameCutResult<JobReport> {
        crate::init()?;

        let media = probe::probe(&self.input)?;
        let video = media
            .reference_video()
            .ok_or_else(|| FrameCutError::InputUnreadable {
                message: "no video stream in input".to_string(),
            })?
            .clone();
        let ref_tb = video.time_base();

        let surgeon = bitstream::surgeon_for(video.codec_id);
        let mut keyframe_mode = self.options.keyframe_mode;
        if !surgeon.smart_cut_capable() && !keyframe_mode {
            warn!(
                "Codec {} has no smart-cut support; cutting on keyframes only",
                video.codec
            );
            keyframe_mode = true;
        }

        let index = GopIndex::scan(&self.input, video.index, surgeon.as_ref())?;
        if index.is_empty() {
            return Err(FrameCutError::InputUnreadable {
                message: "no usable keyframes in video stream".to_string(),
            });
        }

        let intervals = adjust_intervals(&self.intervals, &media, &video, ref_tb);
        let planner = CutPlanner::new(&index, keyframe_mode, self.options.max_gop_frames);
        let plans = planner.plan(&intervals)?;
        for plan in &plans {
            info!(
                "Interval [{}, {}): prefix {} frames, suffix {} frames, copy from {:?}",
                plan.interval.start_pts,
                plan.interval.end_pts,
                plan.reencode_prefix.len(),
                plan.reencode_suffix.len(),
                plan.copy_from_pts
            );
        }

        let mut scheduler = MuxScheduler::new(
            &self.output,
            &self.input,
            ref_tb,
            self.options.preserve_timestamps,
        )?;

        // Copied packet framing follows the output container family
        let target = target_nal_format(scheduler.format_name(), video.codec_id);
        if matches!(target, Some(NalFormat::LengthPrefixed { .. })) {
            let annexb_input = video
                .extradata
                .as_deref()
                .map(bitstream::is_annex_b)
                .unwrap_or(true);
            if annexb_input {
                // TS-style input: rebuild out-of-band codec configuration
                // from the first epoch's parameter sets
                if let Some(sets) = index.parameter_sets_for_epoch(0) {
                    if let Some(private) = surgeon.codec_private(sets) {
                        scheduler.set_video_extradata(&private)?;
                    }
                }
            }
        }
        scheduler.write_header()?;

        let mut encoder = if keyframe_mode {
            None
        } else {
            Some(SegmentEncoder::new(
                &self.input,
                video.index,
                self.options.quality,
                self.options.log_level.clone(),
            )?)
        };
        let mut copier = PacketCopier::new(&self.input, video.index, target)?;
        let mut routers = Vec::new();
        for descriptor in media.audio_streams().chain(media.subtitle_streams()) {
            routers.push(PassthroughRouter::new(&self.input, descriptor, ref_tb)?);
        }

        let gops = index.gops();
        let mut last_epoch: Option<u32> = None;
        let mut copied = 0u64;
        let mut reencoded = 0u64;
        let mut passthrough = 0u64;
        let mut segment_count = 0usize;
        let mut cancelled = false;

        'plans: for plan in &plans {
            let mut interval_head = true;
            for seg in &plan.segments {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'plans;
                }
                scheduler.begin_segment(seg.start_pts, seg.end_pts);
                debug!(
                    "Segment {:?} gop {} window [{}, {})",
                    seg.mode, seg.gop_index, seg.start_pts, seg.end_pts
                );

                match seg.mode {
                    SegmentMode::Copy => {
                        if let Some(enc) = encoder.as_mut() {
                            for packet in enc.flush()? {
                                scheduler.write(video.index, packet, true)?;
                                reencoded += 1;
                            }
                        }
                        let action = BoundaryAction {
                            inject_parameter_sets: self
                                .epoch_injection(&index, seg, &mut last_epoch),
                            ..BoundaryAction::default()
                        };
                        for packet in copier.copy_segment(seg, surgeon.as_ref(), &action)? {
                            scheduler.write(video.index, packet, false)?;
                            copied += 1;
                        }
                    }
                    SegmentMode::HybridLeading => {
                        let gop = &gops[seg.gop_index];
                        // Leading pictures re-encode on the still-open
                        // encoder so B-frame state carries over from the
                        // prefix
                        let enc = encoder.as_mut().ok_or_else(|| {
                            FrameCutError::EncoderExhausted {
                                message: "hybrid splice requested in keyframe mode".to_string(),
                            }
                        })?;
                        let request =
                            hybrid_request(gops, gop, seg, scheduler.output_position());
                        for packet in enc.encode_request(&request)? {
                            scheduler.write(video.index, packet, true)?;
                            reencoded += 1;
                        }
                        for packet in enc.flush()? {
                            scheduler.write(video.index, packet, true)?;
                            reencoded += 1;
                        }

                        let action = BoundaryAction {
                            rewrite_cra: true,
                            had_leading: gop.has_leading,
                            drop_leading: true,
                            inject_parameter_sets: self
                                .epoch_injection(&index, seg, &mut last_epoch),
                        };
                        for packet in copier.copy_segment(seg, surgeon.as_ref(), &action)? {
                            scheduler.write(video.index, packet, false)?;
                            copied += 1;
                        }
                    }
                    SegmentMode::Reencode => {
                        let enc = encoder.as_mut().ok_or_else(|| {
                            FrameCutError::EncoderExhausted {
                                message: "re-encode requested in keyframe mode".to_string(),
                            }
                        })?;
                        let request =
                            reencode_request(gops, seg, scheduler.output_position());
                        for packet in enc.encode_request(&request)? {
                            scheduler.write(video.index, packet, true)?;
                            reencoded += 1;
                        }
                    }
                }

                for router in &mut routers {
                    let stream_index = router.stream_index();
                    for packet in router.segment(seg.start_pts, seg.end_pts, interval_head)? {
                        scheduler.write(stream_index, packet, false)?;
                        passthrough += 1;
                    }
                }

                scheduler.end_segment();
                segment_count += 1;
                interval_head = false;
            }
        }

        // Tail of the last re-encoded run
        if !cancelled {
            if let Some(enc) = encoder.as_mut() {
                for packet in enc.flush()? {
                    scheduler.write(video.index, packet, true)?;
                    reencoded += 1;
                }
            }
        }

        // Finalize even when cancelled so the container is playable up to
        // the last muxed packet
        scheduler.finalize()?;

        if cancelled {
            if self.options.remove_partial {
                if let Err(e) = std::fs::remove_file(&self.output) {
                    warn!("Could not remove partial output: {}", e);
                }
            }
            return Err(FrameCutError::Cancelled);
        }

        info!(
            "Done: {} copied, {} re-encoded, {} passthrough packets over {} segments",
            copied, reencoded, passthrough, segment_count
        );
        Ok(JobReport {
            output: self.output.clone(),
            intervals: plans.len(),
            segments: segment_count,
            copied_packets: copied,
            reencoded_packets: reencoded,
            passthrough_packets: passthrough,
        })
    }

    /// Parameter sets to prepend when the copied stream crosses into a new
    /// epoch mid-file
    ///
    /// The first epoch is covered by the container extradata, and copied
    /// ranges must stay byte-identical, so injection happens only on a
    /// transition between epochs.
    fn epoch_injection(
        &self,
        index: &GopIndex,
        seg: &CutSegment,
        last_epoch: &mut Option<u32>,
    ) -> Vec<Vec<u8>> {
        let previous = last_epoch.replace(seg.parameter_set_epoch);
        match previous {
            Some(prev) if prev != seg.parameter_set_epoch => index
                .parameter_sets_for_epoch(seg.parameter_set_epoch)
                .map(|sets| sets.to_vec())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Widen file-edge endpoints and shift onto the container's clock
///
/// Endpoints within one frame of 0 or the duration are pushed past the file
/// edges so timestamp rounding never drops the first or last frame.
fn adjust_intervals(
    intervals: &[TimeInterval],
    media: &MediaInfo,
    video: &crate::probe::StreamDescriptor,
    ref_tb: Rational,
) -> Vec<TimeInterval> {
    let to_pts = |seconds: f64| -> i64 {
        (seconds * ref_tb.denominator() as f64 / ref_tb.numerator() as f64).round() as i64
    };
    let duration_pts = to_pts(media.duration);
    let frame_pts = video
        .frame_rate
        .filter(|r| *r > 0.0)
        .map(|r| to_pts(1.0 / r))
        .unwrap_or(1);
    let margin = to_pts(10.0);

    intervals
        .iter()
        .map(|i| {
            let mut start = i.start_pts;
            let mut end = i.end_pts;
            if start <= frame_pts {
                start = -margin;
            }
            if end >= duration_pts - frame_pts {
                end = duration_pts + margin;
            }
            TimeInterval::new(
                start + media.start_time_pts,
                end + media.start_time_pts,
            )
        })
        .collect()
}

/// Framing the output container wants for NAL-structured codecs
fn target_nal_format(format_name: &str, codec_id: ffmpeg_next::codec::Id) -> Option<NalFormat> {
    use ffmpeg_next::codec::Id;
    if !matches!(codec_id, Id::H264 | Id::HEVC) {
        return None;
    }
    let wants_length_prefix = ["mp4", "mov", "ipod", "matroska", "webm"]
        .iter()
        .any(|n| format_name.contains(n));
    if wants_length_prefix {
        Some(NalFormat::LengthPrefixed { length_size: 4 })
    } else {
        Some(NalFormat::AnnexB)
    }
}

/// Decode/keep windows for a plain re-encode segment
fn reencode_request(gops: &[GopEntry], seg: &CutSegment, output_position: i64) -> ReencodeRequest {
    let gop = &gops[seg.gop_index];
    let prev = seg.gop_index.checked_sub(1).map(|i| &gops[i]);
    let (decode_from, widen) = if seg.primed {
        (
            prev.map(|p| p.start_dts).unwrap_or(gop.start_dts),
            seg.gop_index.checked_sub(2).map(|i| gops[i].start_dts),
        )
    } else {
        (gop.start_dts, prev.map(|p| p.start_dts))
    };
    ReencodeRequest {
        decode_from_dts: decode_from,
        decode_to_dts: gop.end_dts,
        keep_from_pts: seg.start_pts,
        keep_to_pts: seg.end_pts,
        widen_to_dts: widen,
        pts_offset: output_position - seg.start_pts,
    }
}

/// Decode/keep windows for the leading pictures of a hybrid splice
fn hybrid_request(
    gops: &[GopEntry],
    gop: &GopEntry,
    seg: &CutSegment,
    output_position: i64,
) -> ReencodeRequest {
    let prev = seg.gop_index.checked_sub(1).map(|i| &gops[i]);
    ReencodeRequest {
        decode_from_dts: prev.map(|p| p.start_dts).unwrap_or(gop.start_dts),
        decode_to_dts: gop.end_dts,
        keep_from_pts: seg.start_pts.max(gop.start_pts),
        // Leading pictures display strictly before their random-access point
        keep_to_pts: gop.keyframe_pts,
        widen_to_dts: seg.gop_index.checked_sub(2).map(|i| gops[i].start_dts),
        pts_offset: output_position - seg.start_pts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let shared = flag.clone();
        shared.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn default_options() {
        let opts = JobOptions::default();
        assert_eq!(opts.quality, Quality::Normal);
        assert!(!opts.keyframe_mode);
        assert_eq!(opts.max_gop_frames, 600);
    }

    #[test]
    fn target_format_follows_container_family() {
        use ffmpeg_next::codec::Id;
        assert_eq!(
            target_nal_format("mp4", Id::H264),
            Some(NalFormat::LengthPrefixed { length_size: 4 })
        );
        assert_eq!(
            target_nal_format("matroska,webm", Id::HEVC),
            Some(NalFormat::LengthPrefixed { length_size: 4 })
        );
        assert_eq!(target_nal_format("avi", Id::H264), Some(NalFormat::AnnexB));
        assert_eq!(target_nal_format("mp4", Id::VP9), None);
    }
}
