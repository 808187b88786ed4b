//! Splice planning scenarios over synthetic GOP structures
//!
//! Timebase is 1/30 so one pts tick is one frame at 30 fps.

use ffmpeg_next::Rational;
use framecut::bitstream::PicType;
use framecut::index::{FrameMeta, GopIndex};
use framecut::planner::{CutPlanner, SegmentMode};
use framecut::{FrameCutError, TimeInterval};

/// Closed-GOP stream: keyframe every `gop` frames
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

/// Open-GOP HEVC-style stream: CRA every 60 frames, 5 RASL frames each
fn cra_index(gop_count: usize) -> GopIndex {
    let mut metas = Vec::new();
    for g in 0..gop_count as i64 {
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

/// 60 s, GOP=30, 30 fps, closed GOP, keep 10..20 and 40..50: boundaries land
/// on frames 300 and 1200 and everything between is copied verbatim
#[test]
fn closed_gop_aligned_cuts_are_pure_copy() {
    let index = closed_index(1800, 30);
    let planner = CutPlanner::new(&index, false, 600);
    let plans = planner
        .plan(&[
            TimeInterval::new(300, 600),
            TimeInterval::new(1200, 1500),
        ])
        .unwrap();

    for plan in &plans {
        assert!(plan.reencode_prefix.is_empty());
        assert!(plan.reencode_suffix.is_empty());
        assert!(plan.segments.iter().all(|s| s.mode == SegmentMode::Copy));
    }
    assert_eq!(plans[0].copy_from_pts, Some(300));
    assert_eq!(plans[0].copy_to_pts, Some(599));
    assert_eq!(plans[1].copy_from_pts, Some(1200));
    assert_eq!(plans[1].copy_to_pts, Some(1499));
}

#[test]
fn interval_starting_one_frame_early_reencodes_exactly_one_frame() {
    let index = closed_index(1800, 30);
    let planner = CutPlanner::new(&index, false, 600);
    let plans = planner.plan(&[TimeInterval::new(299, 600)]).unwrap();
    assert_eq!(plans[0].reencode_prefix, vec![299]);
    assert_eq!(plans[0].copy_from_pts, Some(300));
}

/// HEVC with CRA GOPs: a cut landing mid-stream re-encodes up to the CRA,
/// then treats the CRA GOP as a hybrid boundary (RASL dropped and
/// re-encoded leading pictures, CRA rewritten downstream)
#[test]
fn cra_boundary_after_cut_is_hybrid() {
    let index = cra_index(30);
    let planner = CutPlanner::new(&index, false, 600);
    // Keep 5 s .. 15 s: pts 150 .. 450
    let plans = planner.plan(&[TimeInterval::new(150, 450)]).unwrap();
    let segs = &plans[0].segments;

    assert_eq!(segs[0].mode, SegmentMode::Reencode);
    assert_eq!(segs[0].start_pts, 150);
    assert_eq!(segs[0].end_pts, 180);

    // First copied GOP after the splice carries the boundary surgery
    assert_eq!(segs[1].mode, SegmentMode::HybridLeading);
    assert_eq!(segs[1].gop_index, 3);
    assert!(segs[1].primed);

    // Later contiguous CRA GOPs are plain copies
    assert!(segs[2..]
        .iter()
        .take_while(|s| s.mode != SegmentMode::Reencode)
        .all(|s| s.mode == SegmentMode::Copy));

    // Tail is a partial GOP
    assert_eq!(segs.last().unwrap().mode, SegmentMode::Reencode);
    assert_eq!(segs.last().unwrap().end_pts, 450);
}

#[test]
fn whole_file_from_start_stays_contiguous() {
    let index = cra_index(4);
    let planner = CutPlanner::new(&index, false, 600);
    let plans = planner.plan(&[TimeInterval::new(0, 240)]).unwrap();
    assert!(plans[0]
        .segments
        .iter()
        .all(|s| s.mode == SegmentMode::Copy));
}

#[test]
fn decode_window_cap_is_enforced() {
    let index = closed_index(1800, 600);
    let planner = CutPlanner::new(&index, false, 500);
    let err = planner.plan(&[TimeInterval::new(10, 500)]).unwrap_err();
    assert!(matches!(err, FrameCutError::GopTooLarge { .. }));
}

#[test]
fn keyframe_mode_never_reencodes() {
    let index = cra_index(30);
    let planner = CutPlanner::new(&index, true, 600);
    let plans = planner.plan(&[TimeInterval::new(150, 450)]).unwrap();
    assert!(plans[0]
        .segments
        .iter()
        .all(|s| s.mode == SegmentMode::Copy));
}

#[test]
fn boundary_epoch_matches_first_copied_gop() {
    let index = closed_index(300, 30);
    let planner = CutPlanner::new(&index, false, 600);
    let plans = planner.plan(&[TimeInterval::new(45, 150)]).unwrap();
    assert_eq!(plans[0].boundary_epoch, 0);
    assert_eq!(plans[0].copy_from_pts, Some(60));
}
