//! GOP index
//!
//! One cold scan over a video stream's packets produces an ordered table of
//! GOP entries: keyframe timing, openness, leading-picture presence, and the
//! parameter-set epoch in force. Queries afterwards are binary searches.

use std::path::Path;

use ffmpeg_next::codec::packet::Flags;
use ffmpeg_next::Rational;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bitstream::{CodecSurgeon, PicType};
use crate::error::{FrameCutError, FrameCutResult};

/// Whether a GOP's pictures may reference the preceding GOP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GopOpenness {
    Closed,
    Open,
}

/// Per-packet metadata captured during the scan, in decode order
#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub keyframe: bool,
    /// Keyframe verified by the surgeon as a usable splice point
    pub safe_keyframe: bool,
    pub pic: Option<PicType>,
    /// In-band VPS/SPS/PPS payloads, concatenated per NAL
    pub param_sets: Vec<Vec<u8>>,
}

/// One GOP in the index
#[derive(Debug, Clone, Serialize)]
pub struct GopEntry {
    pub index: usize,
    /// Earliest display pts belonging to this GOP
    pub start_pts: i64,
    /// Display pts of the keyframe itself (differs from `start_pts` when
    /// leading pictures precede it in display order)
    pub keyframe_pts: i64,
    pub start_dts: i64,
    pub end_dts: i64,
    pub next_start_pts: Option<i64>,
    pub openness: GopOpenness,
    pub has_leading: bool,
    pub has_rasl: bool,
    pub frame_count: usize,
    pub parameter_set_epoch: u32,
}

/// A frame position in display order
#[derive(Debug, Clone, Copy)]
pub struct FramePoint {
    pub pts: i64,
    pub dts: i64,
    pub pic: Option<PicType>,
}

/// Summary statistics for inspection output
#[derive(Debug, Clone, Serialize)]
pub struct GopStats {
    pub gop_count: usize,
    pub open_gop_count: usize,
    pub epoch_count: usize,
    pub min_gop_duration: f64,
    pub mean_gop_duration: f64,
    pub max_gop_duration: f64,
}

/// Keyframe and epoch index for one (file, stream) pair
pub struct GopIndex {
    time_base: Rational,
    /// All frames sorted by display pts
    frames: Vec<FramePoint>,
    gops: Vec<GopEntry>,
    /// Epoch id -> parameter-set NAL payloads. Epoch 0 is the container
    /// extradata.
    epochs: Vec<Vec<Vec<u8>>>,
}

impl GopIndex {
    /// Cold scan: demux the stream once and build the index
    pub fn scan(
        path: &Path,
        stream_index: usize,
        surgeon: &dyn CodecSurgeon,
    ) -> FrameCutResult<GopIndex> {
        let mut ictx = ffmpeg_next::format::input(&path).map_err(|e| {
            FrameCutError::InputUnreadable {
                message: format!("{}: {}", path.display(), e),
            }
        })?;

        let stream = ictx
            .stream(stream_index)
            .ok_or_else(|| FrameCutError::InputUnreadable {
                message: format!("stream {} not found", stream_index),
            })?;
        let time_base = stream.time_base();
        let container_psets = crate::probe::stream_extradata(&stream)
            .map(|xd| surgeon.parameter_sets(&xd))
            .unwrap_or_default();

        info!(
            "Indexing GOP structure of stream {} (codec {})",
            stream_index,
            surgeon.name()
        );

        let mut metas = Vec::new();
        let mut skipped = 0usize;
        for (pkt_stream, packet) in ictx.packets() {
            if pkt_stream.index() != stream_index {
                continue;
            }
            let Some(pts) = packet.pts() else {
                skipped += 1;
                continue;
            };
            if packet.flags().contains(Flags::CORRUPT) {
                warn!("Skipping corrupt packet at pts {}", pts);
                continue;
            }
            let keyframe = packet.flags().contains(Flags::KEY);
            let data = packet.data().unwrap_or(&[]);
            let pic = surgeon.classify(data, keyframe);
            let safe_keyframe = keyframe && surgeon.is_safe_cut_keyframe(data);
            let param_sets = if keyframe {
                surgeon.in_band_parameter_sets(data)
            } else {
                Vec::new()
            };
            metas.push(FrameMeta {
                pts,
                dts: packet.dts().unwrap_or(pts),
                duration: packet.duration(),
                keyframe,
                safe_keyframe,
                pic,
                param_sets,
            });
        }
        if skipped > 0 {
            debug!("Skipped {} packets without pts during indexing", skipped);
        }

        Ok(Self::from_frames(metas, time_base, container_psets))
    }

    /// Build the index from already-collected frame metadata (decode order)
    pub fn from_frames(
        metas: Vec<FrameMeta>,
        time_base: Rational,
        container_parameter_sets: Vec<Vec<u8>>,
    ) -> GopIndex {
        let mut epochs = vec![container_parameter_sets];
        let mut current_epoch = 0u32;

        // GOP boundaries at safe keyframes; the very first keyframe is always
        // accepted so streams that open on SEI or recovery points still index.
        let mut boundaries = Vec::new();
        let mut saw_first = false;
        for (i, m) in metas.iter().enumerate() {
            if !m.keyframe {
                continue;
            }
            if !saw_first || m.safe_keyframe {
                boundaries.push(i);
            }
            saw_first = true;
        }

        let mut gops = Vec::with_capacity(boundaries.len());
        for (g, &start) in boundaries.iter().enumerate() {
            let end = boundaries.get(g + 1).copied().unwrap_or(metas.len());
            let slice = &metas[start..end];
            let key = &metas[start];

            if !key.param_sets.is_empty() {
                let flat: Vec<u8> = key.param_sets.concat();
                let current_flat: Vec<u8> = epochs[current_epoch as usize].concat();
                if flat != current_flat {
                    epochs.push(key.param_sets.clone());
                    current_epoch = (epochs.len() - 1) as u32;
                }
            }

            let start_pts = slice.iter().map(|m| m.pts).min().unwrap_or(key.pts);
            let has_rasl = slice.iter().any(|m| m.pic == Some(PicType::Rasl));
            let has_leading = has_rasl || slice.iter().any(|m| m.pic == Some(PicType::Radl));
            let openness = match key.pic {
                Some(p) if p.opens_gop() => GopOpenness::Open,
                // A container keyframe that is not a clean random-access
                // point indicates an open GOP for NAL-structured codecs
                Some(PicType::I) => GopOpenness::Open,
                _ if has_rasl => GopOpenness::Open,
                _ => GopOpenness::Closed,
            };

            gops.push(GopEntry {
                index: g,
                start_pts,
                keyframe_pts: key.pts,
                start_dts: key.dts,
                end_dts: slice.iter().map(|m| m.dts).max().unwrap_or(key.dts),
                next_start_pts: None,
                openness,
                has_leading,
                has_rasl,
                frame_count: slice.len(),
                parameter_set_epoch: current_epoch,
            });
        }
        for g in 0..gops.len() {
            gops[g].next_start_pts = gops.get(g + 1).map(|n| n.start_pts);
        }

        let mut frames: Vec<FramePoint> = metas
            .iter()
            .map(|m| FramePoint {
                pts: m.pts,
                dts: m.dts,
                pic: m.pic,
            })
            .collect();
        frames.sort_by_key(|f| f.pts);

        debug!(
            "Indexed {} frames in {} GOPs across {} parameter-set epochs",
            frames.len(),
            gops.len(),
            epochs.len()
        );

        GopIndex {
            time_base,
            frames,
            gops,
            epochs,
        }
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn gops(&self) -> &[GopEntry] {
        &self.gops
    }

    pub fn is_empty(&self) -> bool {
        self.gops.is_empty()
    }

    /// First frame's display pts
    pub fn first_pts(&self) -> Option<i64> {
        self.frames.first().map(|f| f.pts)
    }

    /// End of the last frame in display order
    pub fn last_pts(&self) -> Option<i64> {
        self.frames.last().map(|f| f.pts)
    }

    /// First GOP whose display range starts at or after `pts`
    pub fn keyframe_at_or_after(&self, pts: i64) -> Option<&GopEntry> {
        let idx = self.gops.partition_point(|g| g.start_pts < pts);
        self.gops.get(idx)
    }

    /// GOP whose display range contains `pts`
    pub fn gop_containing(&self, pts: i64) -> Option<&GopEntry> {
        let idx = self.gops.partition_point(|g| g.start_pts <= pts);
        idx.checked_sub(1).and_then(|i| self.gops.get(i))
    }

    /// Decodability class of the frame displayed at `pts`
    pub fn classify(&self, pts: i64) -> Option<PicType> {
        let idx = self.frames.partition_point(|f| f.pts < pts);
        self.frames.get(idx).filter(|f| f.pts == pts).and_then(|f| f.pic)
    }

    /// Parameter sets for an epoch; epoch 0 is the container extradata
    pub fn parameter_sets_for_epoch(&self, epoch: u32) -> Option<&[Vec<u8>]> {
        self.epochs.get(epoch as usize).map(|v| v.as_slice())
    }

    pub fn epoch_count(&self) -> usize {
        self.epochs.len()
    }

    /// Frames with display pts in `[from, to)`
    pub fn frames_in(&self, from: i64, to: i64) -> &[FramePoint] {
        let lo = self.frames.partition_point(|f| f.pts < from);
        let hi = self.frames.partition_point(|f| f.pts < to);
        &self.frames[lo..hi]
    }

    /// Summary statistics over GOP durations
    pub fn stats(&self) -> GopStats {
        let tb = self.time_base.numerator() as f64 / self.time_base.denominator() as f64;
        let mut durations = Vec::with_capacity(self.gops.len());
        for g in &self.gops {
            if let Some(next) = g.next_start_pts {
                durations.push((next - g.start_pts) as f64 * tb);
            }
        }
        let (min, max, mean) = if durations.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let min = durations.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = durations.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mean = durations.iter().sum::<f64>() / durations.len() as f64;
            (min, max, mean)
        };
        GopStats {
            gop_count: self.gops.len(),
            open_gop_count: self
                .gops
                .iter()
                .filter(|g| g.openness == GopOpenness::Open)
                .count(),
            epoch_count: self.epochs.len(),
            min_gop_duration: min,
            mean_gop_duration: mean,
            max_gop_duration: max,
        }
    }
}
