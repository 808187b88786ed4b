//! Codec capability interface for splice surgery
//!
//! The planner and GOP index talk to codecs only through [`CodecSurgeon`];
//! adding a codec means adding a variant here, not branching elsewhere.

use ffmpeg_next::codec;
use serde::Serialize;

use super::{h264, h265, validate_ranks};
use crate::error::FrameCutResult;

/// Decodability class of a picture at a splice boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PicType {
    I,
    P,
    B,
    Idr,
    Cra,
    Bla,
    Rasl,
    Radl,
    Trail,
}

impl PicType {
    /// Leading pictures display before their random-access point but decode
    /// after it
    pub fn is_leading(&self) -> bool {
        matches!(self, PicType::Rasl | PicType::Radl)
    }

    /// True when a GOP starting with this picture may reference the previous
    /// GOP
    pub fn opens_gop(&self) -> bool {
        matches!(self, PicType::Cra)
    }
}

/// Codec-specific splice operations
///
/// Defaults describe a codec where every container keyframe is a clean
/// random-access point and no bitstream rewriting is needed.
pub trait CodecSurgeon: Send {
    fn name(&self) -> &'static str;

    /// Whether the smart-cut path (partial-GOP re-encode) is supported
    fn smart_cut_capable(&self) -> bool {
        true
    }

    /// Classify the picture carried by a packet
    fn classify(&self, _data: &[u8], keyframe: bool) -> Option<PicType> {
        if keyframe {
            Some(PicType::Idr)
        } else {
            None
        }
    }

    /// True if a container keyframe at this packet is a safe splice point
    fn is_safe_cut_keyframe(&self, _data: &[u8]) -> bool {
        true
    }

    /// Parameter sets from container extradata
    fn parameter_sets(&self, _extradata: &[u8]) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// Parameter sets carried in-band by this packet (epoch tracking)
    fn in_band_parameter_sets(&self, _data: &[u8]) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// Rewrite the first copied packet after a splice; `None` means no
    /// rewrite was needed
    fn rewrite_boundary(&self, _data: &[u8], _has_leading: bool) -> Option<Vec<u8>> {
        None
    }

    /// Drop undecodable leading pictures from a packet; `None` means nothing
    /// to drop
    fn strip_undecodable_leading(&self, _data: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Verify NAL sequencing of a rewritten packet
    fn validate(&self, _data: &[u8], _pts: i64) -> FrameCutResult<()> {
        Ok(())
    }

    /// Build out-of-band codec configuration from parameter sets, when the
    /// codec has a container-private format for it
    fn codec_private(&self, _parameter_sets: &[Vec<u8>]) -> Option<Vec<u8>> {
        None
    }
}

/// Select the surgeon for a video codec
pub fn surgeon_for(id: codec::Id) -> Box<dyn CodecSurgeon> {
    match id {
        codec::Id::H264 => Box::new(H264Surgeon),
        codec::Id::HEVC => Box::new(H265Surgeon),
        codec::Id::VP9 => Box::new(Vp9Surgeon),
        codec::Id::AV1 => Box::new(Av1Surgeon),
        codec::Id::MPEG2VIDEO => Box::new(Mpeg2Surgeon),
        _ => Box::new(GenericSurgeon),
    }
}

pub struct H264Surgeon;

impl CodecSurgeon for H264Surgeon {
    fn name(&self) -> &'static str {
        "h264"
    }

    fn classify(&self, data: &[u8], keyframe: bool) -> Option<PicType> {
        match h264::packet_nal_type(data)? {
            h264::NAL_IDR => Some(PicType::Idr),
            ty if (h264::NAL_SLICE..h264::NAL_IDR).contains(&ty) => {
                if keyframe {
                    Some(PicType::I)
                } else {
                    Some(PicType::Trail)
                }
            }
            _ => None,
        }
    }

    fn is_safe_cut_keyframe(&self, data: &[u8]) -> bool {
        h264::is_safe_keyframe_nal(h264::packet_nal_type(data))
    }

    fn parameter_sets(&self, extradata: &[u8]) -> Vec<Vec<u8>> {
        h264::parameter_sets_from_extradata(extradata)
    }

    fn in_band_parameter_sets(&self, data: &[u8]) -> Vec<Vec<u8>> {
        h264::in_band_parameter_sets(data)
    }

    fn validate(&self, data: &[u8], pts: i64) -> FrameCutResult<()> {
        let format = super::detect_format(data);
        if let Some(nals) = super::split_nals(data, format) {
            let types = nals.iter().filter_map(|n| n.first()).map(|&b| h264::nal_unit_type(b));
            validate_ranks(types, h264::sequence_rank, pts)?;
        }
        Ok(())
    }

    fn codec_private(&self, parameter_sets: &[Vec<u8>]) -> Option<Vec<u8>> {
        h264::build_avcc(parameter_sets)
    }
}

pub struct H265Surgeon;

impl CodecSurgeon for H265Surgeon {
    fn name(&self) -> &'static str {
        "hevc"
    }

    fn classify(&self, data: &[u8], keyframe: bool) -> Option<PicType> {
        match h265::packet_nal_type(data)? {
            h265::NAL_IDR_W_RADL | h265::NAL_IDR_N_LP => Some(PicType::Idr),
            h265::NAL_CRA => Some(PicType::Cra),
            h265::NAL_BLA_W_LP | h265::NAL_BLA_W_RADL | h265::NAL_BLA_N_LP => Some(PicType::Bla),
            ty if h265::is_rasl(ty) => Some(PicType::Rasl),
            ty if h265::is_radl(ty) => Some(PicType::Radl),
            ty if ty <= 15 => {
                if keyframe {
                    Some(PicType::I)
                } else {
                    Some(PicType::Trail)
                }
            }
            _ => None,
        }
    }

    fn is_safe_cut_keyframe(&self, data: &[u8]) -> bool {
        h265::is_safe_keyframe_nal(h265::packet_nal_type(data))
    }

    fn parameter_sets(&self, extradata: &[u8]) -> Vec<Vec<u8>> {
        h265::parameter_sets_from_extradata(extradata)
    }

    fn in_band_parameter_sets(&self, data: &[u8]) -> Vec<Vec<u8>> {
        h265::in_band_parameter_sets(data)
    }

    fn rewrite_boundary(&self, data: &[u8], has_leading: bool) -> Option<Vec<u8>> {
        h265::rewrite_cra_to_bla(data, has_leading)
    }

    fn strip_undecodable_leading(&self, data: &[u8]) -> Option<Vec<u8>> {
        h265::strip_rasl(data)
    }

    fn validate(&self, data: &[u8], pts: i64) -> FrameCutResult<()> {
        let format = super::detect_format(data);
        if let Some(nals) = super::split_nals(data, format) {
            let types = nals.iter().filter_map(|n| n.first()).map(|&b| h265::nal_unit_type(b));
            validate_ranks(types, h265::sequence_rank, pts)?;
        }
        Ok(())
    }
}

/// VP9: superframes are keyframe-addressable, no NAL structure
pub struct Vp9Surgeon;

impl CodecSurgeon for Vp9Surgeon {
    fn name(&self) -> &'static str {
        "vp9"
    }
}

/// AV1: temporal units are keyframe-addressable via the container flag
pub struct Av1Surgeon;

impl CodecSurgeon for Av1Surgeon {
    fn name(&self) -> &'static str {
        "av1"
    }
}

/// MPEG-2: every container keyframe carries its sequence header
pub struct Mpeg2Surgeon;

impl CodecSurgeon for Mpeg2Surgeon {
    fn name(&self) -> &'static str {
        "mpeg2video"
    }
}

/// Fallback for codecs outside the smart-cut set; cuts on keyframes only
pub struct GenericSurgeon;

impl CodecSurgeon for GenericSurgeon {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn smart_cut_capable(&self) -> bool {
        false
    }
}
