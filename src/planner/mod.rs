//! Cut planning
//!
//! Turns resolved time intervals plus the GOP index into splice plans: which
//! packet ranges are copied verbatim, which frames are re-encoded to reach
//! the first copyable keyframe, and which open-GOP boundaries need hybrid
//! treatment (re-encode leading pictures, copy the rest).

use tracing::debug;

use crate::error::{FrameCutError, FrameCutResult};
use crate::index::{GopIndex, GopOpenness};
use crate::timeline::TimeInterval;

/// How a segment's packets reach the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMode {
    /// Packet-level passthrough of a whole GOP
    Copy,
    /// Decode and re-encode every frame in the segment window
    Reencode,
    /// Open-GOP boundary: re-encode leading pictures, copy the random-access
    /// picture and trailing pictures
    HybridLeading,
}

/// One executable slice of the output timeline
#[derive(Debug, Clone)]
pub struct CutSegment {
    pub mode: SegmentMode,
    /// Display window start in the reference timebase
    pub start_pts: i64,
    /// Display window end, exclusive
    pub end_pts: i64,
    pub gop_index: usize,
    pub gop_start_dts: i64,
    pub gop_end_dts: i64,
    /// Decode must begin at the previous GOP so leading-picture references
    /// exist
    pub primed: bool,
    pub parameter_set_epoch: u32,
}

/// Per-interval splice description
#[derive(Debug, Clone)]
pub struct SplicePlan {
    pub interval: TimeInterval,
    /// Display pts of the first passthrough keyframe, if any GOP is copied
    pub copy_from_pts: Option<i64>,
    /// Display pts of the last copied frame
    pub copy_to_pts: Option<i64>,
    /// Display-order frame pts re-encoded to reach the first copyable
    /// keyframe
    pub reencode_prefix: Vec<i64>,
    /// Display-order frame pts re-encoded after the last copied GOP
    pub reencode_suffix: Vec<i64>,
    /// Epoch whose parameter sets must precede the first copied packet
    pub boundary_epoch: u32,
    pub segments: Vec<CutSegment>,
}

/// Planner over one indexed video stream
pub struct CutPlanner<'a> {
    index: &'a GopIndex,
    /// Cut on GOP boundaries only, never re-encode
    keyframe_mode: bool,
    /// Decode-window cap; exceeding it is an error rather than an unbounded
    /// allocation
    max_gop_frames: usize,
}

impl<'a> CutPlanner<'a> {
    pub fn new(index: &'a GopIndex, keyframe_mode: bool, max_gop_frames: usize) -> Self {
        Self {
            index,
            keyframe_mode,
            max_gop_frames,
        }
    }

    /// Plan all intervals in output order
    ///
    /// Copy-continuity is tracked across intervals because the output is one
    /// continuous stream; a GOP jump between copied segments is what forces
    /// hybrid handling of open-GOP boundaries.
    pub fn plan(&self, intervals: &[TimeInterval]) -> FrameCutResult<Vec<SplicePlan>> {
        let mut plans = Vec::with_capacity(intervals.len());
        let mut last_copied_gop: Option<usize> = None;
        let mut copied_any = false;
        for interval in intervals {
            let plan = self.plan_interval(*interval, &mut last_copied_gop, &mut copied_any)?;
            debug!(
                "Planned interval [{}, {}): {} segments, prefix {} frames, suffix {} frames",
                interval.start_pts,
                interval.end_pts,
                plan.segments.len(),
                plan.reencode_prefix.len(),
                plan.reencode_suffix.len()
            );
            plans.push(plan);
        }
        Ok(plans)
    }

    fn plan_interval(
        &self,
        interval: TimeInterval,
        last_copied_gop: &mut Option<usize>,
        copied_any: &mut bool,
    ) -> FrameCutResult<SplicePlan> {
        let gops = self.index.gops();
        let mut segments = Vec::new();

        let first = self
            .index
            .gop_containing(interval.start_pts)
            .map(|g| g.index)
            .unwrap_or(0);

        for gop in &gops[first..] {
            if gop.start_pts >= interval.end_pts {
                break;
            }
            let gop_end = self.gop_end_pts(gop.index);
            if gop_end <= interval.start_pts {
                continue;
            }

            let fully_covered =
                gop.start_pts >= interval.start_pts && gop_end <= interval.end_pts;

            if self.keyframe_mode {
                // Keyframe mode trades boundary accuracy for zero
                // re-encoding; a GOP spanning two intervals is copied once
                if *last_copied_gop == Some(gop.index) {
                    continue;
                }
                segments.push(self.copy_segment(gop.index, gop.start_pts, gop_end, false));
                *last_copied_gop = Some(gop.index);
                *copied_any = true;
                continue;
            }

            if fully_covered {
                let discontinuity = match *last_copied_gop {
                    None => *copied_any || gop.index > 0,
                    Some(prev) => gop.index != prev + 1,
                };
                if discontinuity && gop.openness == GopOpenness::Open {
                    if gop.has_rasl {
                        // Leading pictures lost their references across the
                        // splice; re-encode just those and copy the rest
                        self.check_window(gop.index, true)?;
                        segments.push(CutSegment {
                            mode: SegmentMode::HybridLeading,
                            start_pts: gop.start_pts,
                            end_pts: gop_end,
                            gop_index: gop.index,
                            gop_start_dts: gop.start_dts,
                            gop_end_dts: gop.end_dts,
                            primed: gop.index > 0,
                            parameter_set_epoch: gop.parameter_set_epoch,
                        });
                    } else {
                        // Open GOP without leading-picture markers: re-encode
                        // the whole GOP to guarantee decoder convergence
                        self.check_window(gop.index, gop.index > 0)?;
                        segments.push(self.reencode_segment(
                            gop.index,
                            gop.start_pts.max(interval.start_pts),
                            gop_end.min(interval.end_pts),
                        ));
                        continue;
                    }
                } else {
                    segments.push(self.copy_segment(gop.index, gop.start_pts, gop_end, false));
                }
                *last_copied_gop = Some(gop.index);
                *copied_any = true;
            } else {
                // Partial overlap: every covered frame of this GOP is
                // re-encoded
                self.check_window(gop.index, gop.has_rasl && gop.index > 0)?;
                segments.push(self.reencode_segment(
                    gop.index,
                    gop.start_pts.max(interval.start_pts),
                    gop_end.min(interval.end_pts),
                ));
            }
        }

        self.summarize(interval, segments)
    }

    fn copy_segment(&self, gop_index: usize, start: i64, end: i64, primed: bool) -> CutSegment {
        let gop = &self.index.gops()[gop_index];
        CutSegment {
            mode: SegmentMode::Copy,
            start_pts: start,
            end_pts: end,
            gop_index,
            gop_start_dts: gop.start_dts,
            gop_end_dts: gop.end_dts,
            primed,
            parameter_set_epoch: gop.parameter_set_epoch,
        }
    }

    fn reencode_segment(&self, gop_index: usize, start: i64, end: i64) -> CutSegment {
        let gop = &self.index.gops()[gop_index];
        CutSegment {
            mode: SegmentMode::Reencode,
            start_pts: start,
            end_pts: end,
            gop_index,
            gop_start_dts: gop.start_dts,
            gop_end_dts: gop.end_dts,
            primed: gop.has_rasl && gop_index > 0,
            parameter_set_epoch: gop.parameter_set_epoch,
        }
    }

    /// Display end of a GOP (start of the next, or one tick past the last
    /// frame of the stream)
    fn gop_end_pts(&self, gop_index: usize) -> i64 {
        let gop = &self.index.gops()[gop_index];
        gop.next_start_pts
            .unwrap_or_else(|| self.index.last_pts().map(|p| p + 1).unwrap_or(gop.start_pts))
    }

    /// Enforce the decode-window cap before committing to a re-encode
    fn check_window(&self, gop_index: usize, primed: bool) -> FrameCutResult<()> {
        let gops = self.index.gops();
        let mut frames = gops[gop_index].frame_count;
        if primed {
            if let Some(prev) = gop_index.checked_sub(1).and_then(|i| gops.get(i)) {
                frames += prev.frame_count;
            }
        }
        if frames > self.max_gop_frames {
            return Err(FrameCutError::GopTooLarge {
                frames,
                cap: self.max_gop_frames,
            });
        }
        Ok(())
    }

    /// Fold the segment list into the per-interval splice description
    fn summarize(
        &self,
        interval: TimeInterval,
        segments: Vec<CutSegment>,
    ) -> FrameCutResult<SplicePlan> {
        let first_copy = segments
            .iter()
            .position(|s| s.mode != SegmentMode::Reencode);
        let last_copy = segments
            .iter()
            .rposition(|s| s.mode != SegmentMode::Reencode);

        let copy_from_pts = first_copy.map(|i| segments[i].start_pts);
        let copy_to_pts = last_copy.and_then(|i| {
            let seg = &segments[i];
            self.index
                .frames_in(seg.start_pts, seg.end_pts)
                .last()
                .map(|f| f.pts)
        });

        let mut reencode_prefix = Vec::new();
        let mut reencode_suffix = Vec::new();
        for (i, seg) in segments.iter().enumerate() {
            if seg.mode != SegmentMode::Reencode {
                continue;
            }
            let frames: Vec<i64> = self
                .index
                .frames_in(seg.start_pts, seg.end_pts)
                .iter()
                .map(|f| f.pts)
                .collect();
            match first_copy {
                Some(fc) if i > fc => reencode_suffix.extend(frames),
                _ => reencode_prefix.extend(frames),
            }
        }

        let boundary_epoch = first_copy
            .map(|i| segments[i].parameter_set_epoch)
            .or_else(|| segments.first().map(|s| s.parameter_set_epoch))
            .unwrap_or(0);

        Ok(SplicePlan {
            interval,
            copy_from_pts,
            copy_to_pts,
            reencode_prefix,
            reencode_suffix,
            boundary_epoch,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::PicType;
    use crate::index::FrameMeta;
    use ffmpeg_next::Rational;

    /// Closed-GOP synthetic stream: `frames` frames, keyframe every `gop`,
    /// one pts tick per frame
    fn closed_index(frames: usize, gop: usize) -> GopIndex {
        let metas = (0..frames)
            .map(|i| FrameMeta {
                pts: i as i64,
                dts: i as i64,
                duration: 1,
                keyframe: i % gop == 0,
                safe_keyframe: i % gop == 0,
                pic: Some(if i % gop == 0 { PicType::Idr } else { PicType::Trail }),
                param_sets: Vec::new(),
            })
            .collect();
        GopIndex::from_frames(metas, Rational::new(1, 30), vec![])
    }

    fn plan_one(index: &GopIndex, start: i64, end: i64) -> SplicePlan {
        CutPlanner::new(index, false, 600)
            .plan(&[TimeInterval::new(start, end)])
            .unwrap()
            .remove(0)
    }

    #[test]
    fn interval_on_idr_has_zero_prefix() {
        let index = closed_index(1800, 30);
        // Frames 300..600: starts exactly on a closed-GOP keyframe
        let plan = plan_one(&index, 300, 600);
        assert!(plan.reencode_prefix.is_empty());
        assert!(plan.reencode_suffix.is_empty());
        assert_eq!(plan.copy_from_pts, Some(300));
        assert_eq!(plan.copy_to_pts, Some(599));
        assert_eq!(plan.segments.len(), 10);
        assert!(plan.segments.iter().all(|s| s.mode == SegmentMode::Copy));
    }

    #[test]
    fn interval_one_frame_before_idr_has_one_frame_prefix() {
        let index = closed_index(1800, 30);
        let plan = plan_one(&index, 299, 600);
        assert_eq!(plan.reencode_prefix, vec![299]);
        assert_eq!(plan.copy_from_pts, Some(300));
    }

    #[test]
    fn mid_gop_start_reencodes_to_next_keyframe() {
        let index = closed_index(1800, 30);
        let plan = plan_one(&index, 310, 600);
        assert_eq!(plan.reencode_prefix, (310..330).collect::<Vec<i64>>());
        assert_eq!(plan.copy_from_pts, Some(330));
        assert_eq!(plan.segments[0].mode, SegmentMode::Reencode);
    }

    #[test]
    fn partial_tail_gop_becomes_suffix() {
        let index = closed_index(1800, 30);
        let plan = plan_one(&index, 300, 615);
        assert_eq!(plan.copy_to_pts, Some(599));
        assert_eq!(plan.reencode_suffix, (600..615).collect::<Vec<i64>>());
        assert_eq!(
            plan.segments.last().unwrap().mode,
            SegmentMode::Reencode
        );
    }

    #[test]
    fn keyframe_mode_copies_partial_gops_whole() {
        let index = closed_index(1800, 30);
        let planner = CutPlanner::new(&index, true, 600);
        let plans = planner.plan(&[TimeInterval::new(310, 615)]).unwrap();
        assert!(plans[0]
            .segments
            .iter()
            .all(|s| s.mode == SegmentMode::Copy));
        assert!(plans[0].reencode_prefix.is_empty());
        // The partial head and tail GOPs are copied in full
        assert_eq!(plans[0].segments.first().unwrap().start_pts, 300);
        assert_eq!(plans[0].segments.last().unwrap().end_pts, 630);
    }

    #[test]
    fn interval_past_last_keyframe_reencodes_tail() {
        let index = closed_index(90, 30);
        let plan = plan_one(&index, 75, 90);
        assert!(plan.copy_from_pts.is_none());
        assert_eq!(plan.reencode_prefix, (75..90).collect::<Vec<i64>>());
    }

    /// Open-GOP stream: each non-first GOP opens with a CRA whose first five
    /// frames are RASL
    fn cra_index() -> GopIndex {
        let mut metas = Vec::new();
        for g in 0..4i64 {
            let base = g * 60;
            let key_pts = if g == 0 { 0 } else { base + 5 };
            metas.push(FrameMeta {
                pts: key_pts,
                dts: base,
                duration: 1,
                keyframe: true,
                safe_keyframe: true,
                pic: Some(if g == 0 { PicType::Idr } else { PicType::Cra }),
                param_sets: Vec::new(),
            });
            let mut dts = base + 1;
            if g > 0 {
                for pts in base..base + 5 {
                    metas.push(FrameMeta {
                        pts,
                        dts,
                        duration: 1,
                        keyframe: false,
                        safe_keyframe: false,
                        pic: Some(PicType::Rasl),
                        param_sets: Vec::new(),
                    });
                    dts += 1;
                }
            }
            let trail_start = if g == 0 { 1 } else { base + 6 };
            for pts in trail_start..base + 60 {
                metas.push(FrameMeta {
                    pts,
                    dts,
                    duration: 1,
                    keyframe: false,
                    safe_keyframe: false,
                    pic: Some(PicType::Trail),
                    param_sets: Vec::new(),
                });
                dts += 1;
            }
        }
        GopIndex::from_frames(metas, Rational::new(1, 30), vec![])
    }

    #[test]
    fn cra_after_splice_gets_hybrid_treatment() {
        let index = cra_index();
        let planner = CutPlanner::new(&index, false, 600);
        // Interval starts inside GOP 1, so GOP 2 opens after a discontinuity
        let plans = planner.plan(&[TimeInterval::new(70, 180)]).unwrap();
        let modes: Vec<SegmentMode> = plans[0].segments.iter().map(|s| s.mode).collect();
        assert_eq!(
            modes,
            vec![SegmentMode::Reencode, SegmentMode::HybridLeading]
        );
        let hybrid = &plans[0].segments[1];
        assert!(hybrid.primed);
        assert_eq!(hybrid.gop_index, 2);
    }

    #[test]
    fn continuous_copy_needs_no_hybrid() {
        let index = cra_index();
        let planner = CutPlanner::new(&index, false, 600);
        // Whole file from the first keyframe: GOPs stay contiguous, so CRA
        // GOPs keep their references and are plain copies
        let plans = planner.plan(&[TimeInterval::new(0, 240)]).unwrap();
        assert!(plans[0]
            .segments
            .iter()
            .all(|s| s.mode == SegmentMode::Copy));
    }

    #[test]
    fn gap_between_intervals_forces_hybrid_on_next_cra() {
        let index = cra_index();
        let planner = CutPlanner::new(&index, false, 600);
        let plans = planner
            .plan(&[
                TimeInterval::new(0, 60),
                TimeInterval::new(180, 240),
            ])
            .unwrap();
        assert!(plans[0].segments.iter().all(|s| s.mode == SegmentMode::Copy));
        assert_eq!(plans[1].segments[0].mode, SegmentMode::HybridLeading);
    }

    #[test]
    fn oversized_gop_is_rejected() {
        let index = closed_index(1800, 30);
        let planner = CutPlanner::new(&index, false, 20);
        let err = planner
            .plan(&[TimeInterval::new(310, 600)])
            .unwrap_err();
        assert!(matches!(err, FrameCutError::GopTooLarge { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn epoch_change_spans_both_epochs() {
        let sps_a = vec![vec![0x67, 0x01]];
        let sps_b = vec![vec![0x67, 0x02]];
        let mut metas = Vec::new();
        for g in 0..2usize {
            for i in 0..30usize {
                let pts = (g * 30 + i) as i64;
                metas.push(FrameMeta {
                    pts,
                    dts: pts,
                    duration: 1,
                    keyframe: i == 0,
                    safe_keyframe: i == 0,
                    pic: Some(if i == 0 { PicType::Idr } else { PicType::Trail }),
                    param_sets: if i == 0 {
                        if g == 0 { sps_a.clone() } else { sps_b.clone() }
                    } else {
                        Vec::new()
                    },
                });
            }
        }
        let index = GopIndex::from_frames(metas, Rational::new(1, 30), sps_a);
        let plan = plan_one(&index, 0, 60);
        let epochs: Vec<u32> = plan
            .segments
            .iter()
            .map(|s| s.parameter_set_epoch)
            .collect();
        assert_eq!(epochs, vec![0, 1]);
    }
}
