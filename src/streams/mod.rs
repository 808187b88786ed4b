//! Passthrough routing for non-video streams
//!
//! Audio, subtitle, and data packets are never re-encoded; the router trims
//! them to each segment's display window, flags pre-roll packets `discard`
//! so decoders can prime without players showing them, and leaves timestamp
//! rebasing to the muxing scheduler.

use std::path::Path;

use ffmpeg_next::codec;
use ffmpeg_next::codec::packet::Flags;
use ffmpeg_next::format;
use ffmpeg_next::Packet;
use ffmpeg_next::Rational;
use tracing::trace;

use crate::error::{FrameCutError, FrameCutResult};
use crate::probe::{StreamDescriptor, StreamKind};
use crate::utils::rescale;

/// Router over one non-video stream
pub struct PassthroughRouter {
    ictx: format::context::Input,
    stream_index: usize,
    kind: StreamKind,
    time_base: Rational,
    ref_time_base: Rational,
    /// Codec priming window in stream timebase units
    pre_roll: i64,
}

impl PassthroughRouter {
    pub fn new(
        path: &Path,
        descriptor: &StreamDescriptor,
        ref_time_base: Rational,
    ) -> FrameCutResult<PassthroughRouter> {
        let ictx = format::input(&path).map_err(|e| FrameCutError::InputUnreadable {
            message: format!("{}: {}", path.display(), e),
        })?;
        let time_base = descriptor.time_base();
        let pre_roll = pre_roll_pts(descriptor, time_base);
        Ok(PassthroughRouter {
            ictx,
            stream_index: descriptor.index,
            kind: descriptor.kind,
            time_base,
            ref_time_base,
            pre_roll,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Packets for one segment window given in the reference timebase
    ///
    /// `interval_head` widens the window back by the codec pre-roll; those
    /// extra packets come back flagged `discard`.
    pub fn segment(
        &mut self,
        start_pts_ref: i64,
        end_pts_ref: i64,
        interval_head: bool,
    ) -> FrameCutResult<Vec<Packet>> {
        let start = rescale(start_pts_ref, self.ref_time_base, self.time_base);
        let end = rescale(end_pts_ref, self.ref_time_base, self.time_base);
        let window_start = if interval_head && self.kind == StreamKind::Audio {
            start - self.pre_roll
        } else {
            start
        };

        self.seek_to_pts(window_start)?;

        let mut out = Vec::new();
        let mut packets = Vec::new();
        for (stream, packet) in self.ictx.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            let Some(pts) = packet.pts() else { continue };
            if pts < window_start {
                continue;
            }
            if pts >= end {
                break;
            }
            packets.push(packet);
        }

        for mut packet in packets {
            let pts = packet.pts().unwrap_or(0);
            if pts < start {
                // Priming packet: muxed for decoder continuity, not display
                let flags = packet.flags()
                    | Flags::from_bits_retain(ffmpeg_next::ffi::AV_PKT_FLAG_DISCARD);
                packet.set_flags(flags);
            }
            out.push(packet);
        }

        trace!(
            "Stream {}: {} passthrough packets in [{}, {})",
            self.stream_index,
            out.len(),
            window_start,
            end
        );
        Ok(out)
    }

    fn seek_to_pts(&mut self, pts: i64) -> FrameCutResult<()> {
        unsafe {
            let ret = ffmpeg_next::ffi::av_seek_frame(
                self.ictx.as_mut_ptr(),
                self.stream_index as i32,
                pts,
                ffmpeg_next::ffi::AVSEEK_FLAG_BACKWARD,
            );
            if ret < 0 {
                // Streams without an index (some subtitle tracks) reject
                // seeks; reading forward from the current position still
                // works because segments are emitted in order
                trace!("Seek on stream {} failed, reading forward", self.stream_index);
            }
        }
        Ok(())
    }
}

/// Priming duration a decoder needs before the first audible sample
fn pre_roll_pts(descriptor: &StreamDescriptor, time_base: Rational) -> i64 {
    let Some(sample_rate) = descriptor.sample_rate else {
        return 0;
    };
    let samples: u32 = match descriptor.codec_id {
        codec::Id::AAC => 1024,
        codec::Id::MP3 => 529,
        codec::Id::OPUS => 3840,
        _ => 0,
    };
    if samples == 0 || sample_rate == 0 {
        return 0;
    }
    let seconds = samples as f64 / sample_rate as f64;
    (seconds * time_base.denominator() as f64 / time_base.numerator() as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_descriptor(codec_id: codec::Id, sample_rate: u32, tb: (i32, i32)) -> StreamDescriptor {
        StreamDescriptor {
            index: 1,
            kind: StreamKind::Audio,
            codec: format!("{:?}", codec_id).to_lowercase(),
            codec_id,
            time_base: tb,
            width: None,
            height: None,
            frame_rate: None,
            sample_rate: Some(sample_rate),
            channels: Some(2),
            extradata: None,
        }
    }

    #[test]
    fn aac_pre_roll_is_one_frame_of_samples() {
        let d = audio_descriptor(codec::Id::AAC, 48000, (1, 48000));
        assert_eq!(pre_roll_pts(&d, d.time_base()), 1024);
    }

    #[test]
    fn unknown_codecs_have_no_pre_roll() {
        let d = audio_descriptor(codec::Id::FLAC, 48000, (1, 48000));
        assert_eq!(pre_roll_pts(&d, d.time_base()), 0);
    }
}
