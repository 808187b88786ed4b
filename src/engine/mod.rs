//! Splice execution engines
//!
//! [`reencode::SegmentEncoder`] materializes the short re-encoded runs at
//! cut boundaries; [`copy::PacketCopier`] streams whole GOPs through with
//! boundary surgery applied. Both produce packets timed in the input
//! timebase; the muxing scheduler owns all output-timeline rebasing.

pub mod copy;
pub mod reencode;

pub use copy::{BoundaryAction, PacketCopier};
pub use reencode::SegmentEncoder;

use ffmpeg_next::codec;
use serde::Serialize;

/// Quality preset for boundary re-encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    Low,
    Normal,
    High,
    Indistinguishable,
    NearLossless,
    Lossless,
}

impl Quality {
    /// Parse the CLI spelling; `None` for unknown values
    pub fn parse(value: &str) -> Option<Quality> {
        match value {
            "low" => Some(Quality::Low),
            "normal" => Some(Quality::Normal),
            "high" => Some(Quality::High),
            "indistinguishable" => Some(Quality::Indistinguishable),
            "near-lossless" => Some(Quality::NearLossless),
            "lossless" => Some(Quality::Lossless),
            _ => None,
        }
    }

    fn base_crf(&self) -> u32 {
        match self {
            Quality::Low => 23,
            Quality::Normal => 18,
            Quality::High => 14,
            Quality::Indistinguishable => 8,
            Quality::NearLossless => 3,
            Quality::Lossless => 0,
        }
    }

    /// CRF for a codec; newer codecs are more efficient so their scale
    /// shifts up
    pub fn crf_for(&self, codec_id: codec::Id) -> u32 {
        if *self == Quality::Lossless {
            return 0;
        }
        match codec_id {
            codec::Id::HEVC | codec::Id::VP9 | codec::Id::AV1 => self.base_crf() + 4,
            _ => self.base_crf(),
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Normal
    }
}
