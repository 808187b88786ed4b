//! Input probing
//!
//! Opens the input container once and captures the stream layout, timing,
//! and codec parameters the rest of the pipeline needs.

use std::path::{Path, PathBuf};

use ffmpeg_next::codec;
use ffmpeg_next::media;
use ffmpeg_next::Rational;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{FrameCutError, FrameCutResult};

/// Stream classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
}

/// One input stream's identity and codec parameters
#[derive(Debug, Clone, Serialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: String,
    #[serde(skip)]
    pub codec_id: codec::Id,
    pub time_base: (i32, i32),
    /// Video: display dimensions
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Video: average frame rate
    pub frame_rate: Option<f64>,
    /// Audio: sample rate and channel count
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    /// Opaque codec configuration (avcC/hvcC or Annex-B parameter sets)
    #[serde(skip)]
    pub extradata: Option<Vec<u8>>,
}

impl StreamDescriptor {
    pub fn time_base(&self) -> Rational {
        Rational::new(self.time_base.0, self.time_base.1)
    }
}

/// Probed view of one input file
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub format: String,
    /// Container duration in seconds
    pub duration: f64,
    /// Container start time in the reference video timebase
    pub start_time_pts: i64,
    pub streams: Vec<StreamDescriptor>,
}

impl MediaInfo {
    /// The reference video stream driving all interval resolution
    pub fn reference_video(&self) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }

    pub fn subtitle_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Subtitle)
    }
}

/// Probe an input container
pub fn probe(path: &Path) -> FrameCutResult<MediaInfo> {
    let ictx = ffmpeg_next::format::input(&path).map_err(|e| FrameCutError::InputUnreadable {
        message: format!("{}: {}", path.display(), e),
    })?;

    let format = ictx.format().name().to_string();
    let duration = if ictx.duration() >= 0 {
        ictx.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
    } else {
        0.0
    };

    let mut streams = Vec::new();
    for stream in ictx.streams() {
        let params = stream.parameters();
        let kind = match params.medium() {
            media::Type::Video => StreamKind::Video,
            media::Type::Audio => StreamKind::Audio,
            media::Type::Subtitle => StreamKind::Subtitle,
            media::Type::Attachment => StreamKind::Attachment,
            _ => StreamKind::Data,
        };
        let tb = stream.time_base();

        // AVCodecParameters carries layout details without opening a decoder
        let (width, height, sample_rate, channels) = unsafe {
            let p = params.as_ptr();
            (
                ((*p).width > 0).then(|| (*p).width as u32),
                ((*p).height > 0).then(|| (*p).height as u32),
                ((*p).sample_rate > 0).then(|| (*p).sample_rate as u32),
                ((*p).ch_layout.nb_channels > 0).then(|| (*p).ch_layout.nb_channels as u32),
            )
        };

        let frame_rate = if kind == StreamKind::Video {
            let rate = stream.avg_frame_rate();
            if rate.denominator() != 0 && rate.numerator() != 0 {
                Some(rate.numerator() as f64 / rate.denominator() as f64)
            } else {
                Some(25.0)
            }
        } else {
            None
        };

        streams.push(StreamDescriptor {
            index: stream.index(),
            kind,
            codec: format!("{:?}", params.id()).to_lowercase(),
            codec_id: params.id(),
            time_base: (tb.numerator(), tb.denominator()),
            width,
            height,
            frame_rate,
            sample_rate,
            channels,
            extradata: stream_extradata(&stream),
        });
    }

    // Container start time, converted into the reference video timebase so
    // interval arithmetic happens in one clock
    let start_time_av = unsafe {
        let st = (*ictx.as_ptr()).start_time;
        if st == ffmpeg_next::ffi::AV_NOPTS_VALUE {
            0
        } else {
            st
        }
    };
    let start_time_pts = streams
        .iter()
        .find(|s| s.kind == StreamKind::Video)
        .map(|v| {
            let tb = v.time_base();
            (start_time_av as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
                * tb.denominator() as f64
                / tb.numerator() as f64)
                .round() as i64
        })
        .unwrap_or(0);

    info!(
        "Probed {}: format {}, {:.3}s, {} streams",
        path.display(),
        format,
        duration,
        streams.len()
    );
    debug!("Container start time: {} pts (reference timebase)", start_time_pts);

    Ok(MediaInfo {
        path: path.to_path_buf(),
        format,
        duration,
        start_time_pts,
        streams,
    })
}

/// Copy a stream's codec extradata out of its parameters
pub fn stream_extradata(stream: &ffmpeg_next::Stream) -> Option<Vec<u8>> {
    let params = stream.parameters();
    unsafe {
        let p = params.as_ptr();
        if (*p).extradata.is_null() || (*p).extradata_size <= 0 {
            return None;
        }
        Some(std::slice::from_raw_parts((*p).extradata, (*p).extradata_size as usize).to_vec())
    }
}
