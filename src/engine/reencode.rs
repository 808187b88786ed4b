//! Re-encode segment engine
//!
//! Decodes the frames of a splice boundary and re-encodes them with an
//! encoder matched to the copied stream: same codec, dimensions, pixel
//! format, frame rate, timebase, and SAR, emitting a closed GOP so the next
//! copied packet needs no decoder state carryover.

use std::path::Path;

use ffmpeg_next::codec;
use ffmpeg_next::format;
use ffmpeg_next::frame;
use ffmpeg_next::Dictionary;
use ffmpeg_next::Packet;
use ffmpeg_next::Rational;
use tracing::{debug, warn};

use crate::engine::Quality;
use crate::error::{FrameCutError, FrameCutResult};

/// Decode window and keep window for one re-encoded run
#[derive(Debug, Clone, Copy)]
pub struct ReencodeRequest {
    /// Decode from this dts (a keyframe)
    pub decode_from_dts: i64,
    /// Decode through this dts inclusive
    pub decode_to_dts: i64,
    /// Keep frames with display pts in `[keep_from_pts, keep_to_pts)`
    pub keep_from_pts: i64,
    pub keep_to_pts: i64,
    /// Fallback decode start one keyframe earlier, used once if the first
    /// attempt cannot produce the leading frames
    pub widen_to_dts: Option<i64>,
    /// Added to every kept frame's pts, placing it on the output timeline
    pub pts_offset: i64,
}

/// Encoder for boundary segments of one video stream
pub struct SegmentEncoder {
    ictx: format::context::Input,
    stream_index: usize,
    in_time_base: Rational,
    decoder: codec::decoder::Video,
    codec_id: codec::Id,
    quality: Quality,
    log_level: Option<String>,
    encoder: Option<codec::encoder::video::Encoder>,
    /// Encoder output timebase; differs from the stream timebase only for
    /// MPEG-2, whose encoder wants 1/frame_rate
    enc_time_base: Rational,
    enc_last_pts: i64,
    extradata: Option<Vec<u8>>,
}

impl SegmentEncoder {
    /// Open a dedicated demux context for re-encode work
    ///
    /// Seeking the shared scan context is unreliable mid-iteration, so the
    /// engine reads the input through its own handle.
    pub fn new(
        path: &Path,
        stream_index: usize,
        quality: Quality,
        log_level: Option<String>,
    ) -> FrameCutResult<SegmentEncoder> {
        let ictx = format::input(&path).map_err(|e| FrameCutError::InputUnreadable {
            message: format!("{}: {}", path.display(), e),
        })?;
        let stream = ictx
            .stream(stream_index)
            .ok_or_else(|| FrameCutError::InputUnreadable {
                message: format!("stream {} not found", stream_index),
            })?;
        let in_time_base = stream.time_base();
        let codec_id = stream.parameters().id();
        let decoder = codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        Ok(SegmentEncoder {
            ictx,
            stream_index,
            in_time_base,
            decoder,
            codec_id,
            quality,
            log_level,
            encoder: None,
            enc_time_base: in_time_base,
            enc_last_pts: -1,
            extradata: None,
        })
    }

    /// The encoder's parameter sets, available after the first frame is
    /// encoded
    pub fn extradata(&self) -> Option<&[u8]> {
        self.extradata.as_deref()
    }

    /// Decode the request's window and re-encode the kept frames
    ///
    /// Returned packets carry pts/dts in the input timebase. The encoder
    /// stays open across consecutive requests so B-frame state flows through
    /// a multi-GOP prefix; callers flush before switching back to copying.
    pub fn encode_request(&mut self, request: &ReencodeRequest) -> FrameCutResult<Vec<Packet>> {
        let mut frames = self.decode_window(request.decode_from_dts, request.decode_to_dts)?;

        // One retry with a widened window when the seek landed past the
        // references we need; a second miss is fatal.
        let covered = frames
            .first()
            .map(|f| f.pts().unwrap_or(i64::MAX) <= request.keep_from_pts)
            .unwrap_or(false);
        if !covered {
            if let Some(widened) = request.widen_to_dts {
                warn!(
                    "Decode window missed pts {}; widening to dts {} and retrying",
                    request.keep_from_pts, widened
                );
                frames = self.decode_window(widened, request.decode_to_dts)?;
            }
        }
        let covered = frames
            .first()
            .map(|f| f.pts().unwrap_or(i64::MAX) <= request.keep_from_pts)
            .unwrap_or(false);
        if !covered && request.decode_from_dts > 0 {
            return Err(FrameCutError::DecoderRefMissing {
                pts: request.keep_from_pts,
            });
        }

        self.ensure_encoder()?;
        let mut packets = Vec::new();
        for mut frame in frames {
            let Some(pts) = frame.pts() else { continue };
            if pts < request.keep_from_pts || pts >= request.keep_to_pts {
                continue;
            }

            let positioned = pts + request.pts_offset;
            let mut out_pts = if self.enc_time_base != self.in_time_base {
                // MPEG-2 path: frame clock in encoder units
                let scaled = positioned as f64
                    * (self.in_time_base.numerator() as f64
                        / self.in_time_base.denominator() as f64)
                    * (self.enc_time_base.denominator() as f64
                        / self.enc_time_base.numerator() as f64);
                scaled.round() as i64
            } else {
                positioned
            };
            if out_pts <= self.enc_last_pts {
                out_pts = self.enc_last_pts + 1;
            }
            self.enc_last_pts = out_pts;

            frame.set_pts(Some(out_pts));
            // Let the encoder pick picture types; the first frame of a fresh
            // encoder becomes the closed-GOP keyframe
            frame.set_kind(ffmpeg_next::picture::Type::None);

            let encoder =
                self.encoder
                    .as_mut()
                    .ok_or_else(|| FrameCutError::EncoderExhausted {
                        message: "encoder disappeared mid-segment".to_string(),
                    })?;
            encoder
                .send_frame(&frame)
                .map_err(|e| FrameCutError::EncoderExhausted {
                    message: format!("send frame pts {}: {}", out_pts, e),
                })?;
            self.drain_encoder(&mut packets)?;
        }

        debug!(
            "Re-encoded window [{}, {}) into {} packets",
            request.keep_from_pts,
            request.keep_to_pts,
            packets.len()
        );
        Ok(packets)
    }

    /// Flush and drop the encoder; the next request starts a fresh closed GOP
    pub fn flush(&mut self) -> FrameCutResult<Vec<Packet>> {
        let Some(mut encoder) = self.encoder.take() else {
            return Ok(Vec::new());
        };
        encoder
            .send_eof()
            .map_err(|e| FrameCutError::EncoderExhausted {
                message: format!("flush: {}", e),
            })?;
        let mut packets = Vec::new();
        let mut packet = Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            self.rescale_from_encoder(&mut packet);
            packets.push(std::mem::replace(&mut packet, Packet::empty()));
        }
        Ok(packets)
    }

    /// Decode packets with dts in `[from, to]`, returning frames sorted by
    /// display pts
    fn decode_window(&mut self, from: i64, to: i64) -> FrameCutResult<Vec<frame::Video>> {
        self.seek_to_dts(from)?;
        let mut frames: Vec<frame::Video> = Vec::new();

        let mut receive_all =
            |decoder: &mut codec::decoder::Video, frames: &mut Vec<frame::Video>| {
                let mut decoded = frame::Video::empty();
                while decoder.receive_frame(&mut decoded).is_ok() {
                    frames.push(std::mem::replace(&mut decoded, frame::Video::empty()));
                }
            };

        for (stream, packet) in self.ictx.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            let dts = packet.dts().unwrap_or(i64::MIN);
            if dts > to {
                break;
            }
            if self.decoder.send_packet(&packet).is_err() {
                warn!("Decoder rejected packet at dts {}, skipping", dts);
                continue;
            }
            receive_all(&mut self.decoder, &mut frames);
        }

        // Drain reordering delay, then reset so the decoder is reusable
        let _ = self.decoder.send_eof();
        receive_all(&mut self.decoder, &mut frames);
        self.decoder.flush();

        frames.sort_by_key(|f| f.pts().unwrap_or(-1));
        Ok(frames)
    }

    fn seek_to_dts(&mut self, dts: i64) -> FrameCutResult<()> {
        unsafe {
            let ret = ffmpeg_next::ffi::av_seek_frame(
                self.ictx.as_mut_ptr(),
                self.stream_index as i32,
                dts,
                ffmpeg_next::ffi::AVSEEK_FLAG_BACKWARD,
            );
            if ret < 0 {
                return Err(ffmpeg_next::Error::from(ret).into());
            }
        }
        self.decoder.flush();
        Ok(())
    }

    fn ensure_encoder(&mut self) -> FrameCutResult<()> {
        if self.encoder.is_some() {
            return Ok(());
        }

        let codec = ffmpeg_next::encoder::find(self.codec_id).ok_or_else(|| {
            FrameCutError::EncoderParamMismatch {
                message: format!("no encoder for {:?}", self.codec_id),
            }
        })?;

        self.enc_time_base = if self.codec_id == codec::Id::MPEG2VIDEO {
            // The MPEG-2 encoder wants a frame-rate timebase
            match self.decoder.frame_rate() {
                Some(rate) if rate.numerator() != 0 => {
                    Rational::new(rate.denominator(), rate.numerator())
                }
                _ => self.in_time_base,
            }
        } else {
            self.in_time_base
        };

        let opened = match self.open_encoder(codec, true) {
            Ok(enc) => enc,
            Err(first) => {
                // Nearest-compatible fallback: drop the codec-specific
                // options and keep going with a warning
                warn!(
                    "Encoder rejected exact stream parameters ({}); falling back to nearest compatible configuration",
                    first
                );
                self.open_encoder(codec, false)
                    .map_err(|e| FrameCutError::EncoderExhausted {
                        message: format!("encoder open failed after fallback: {}", e),
                    })?
            }
        };

        self.extradata = unsafe {
            let p = opened.as_ptr();
            if (*p).extradata.is_null() || (*p).extradata_size <= 0 {
                None
            } else {
                Some(
                    std::slice::from_raw_parts((*p).extradata, (*p).extradata_size as usize)
                        .to_vec(),
                )
            }
        };
        self.enc_last_pts = -1;
        self.encoder = Some(opened);
        Ok(())
    }

    fn open_encoder(
        &self,
        codec: ffmpeg_next::Codec,
        exact: bool,
    ) -> Result<codec::encoder::video::Encoder, ffmpeg_next::Error> {
        let mut enc = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        enc.set_width(self.decoder.width());
        enc.set_height(self.decoder.height());
        enc.set_format(self.decoder.format());
        enc.set_time_base(self.enc_time_base);
        if let Some(rate) = self.decoder.frame_rate() {
            if rate.numerator() != 0 {
                enc.set_frame_rate(Some(rate));
            }
        }
        let sar = self.decoder.aspect_ratio();
        if sar.numerator() > 0 {
            enc.set_aspect_ratio(sar);
        }

        enc.open_as_with(codec, self.encoder_options(exact))
    }

    /// Encoder options mirroring the copied stream's conventions
    fn encoder_options(&self, exact: bool) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        let crf = self.quality.crf_for(self.codec_id);
        match self.codec_id {
            codec::Id::H264 => {
                opts.set("crf", &crf.to_string());
                if exact {
                    // Keep our SPS id clear of the copied stream's ids,
                    // which almost always include 0
                    opts.set("x264-params", "sps-id=3");
                }
            }
            codec::Id::HEVC => {
                opts.set("crf", &crf.to_string());
                if exact {
                    let mut params = vec![
                        // In-band parameter sets; the copied packets carry
                        // theirs the same way
                        "repeat-headers=1".to_string(),
                        // No encoder-info SEI: it would misdescribe the
                        // mostly-copied stream
                        "info=0".to_string(),
                    ];
                    if let Some(level) = &self.log_level {
                        params.push(format!("log_level={}", level));
                    }
                    if self.quality == Quality::Lossless {
                        params.push("lossless=1".to_string());
                    }
                    opts.set("x265-params", &params.join(":"));
                }
            }
            codec::Id::VP9 => {
                opts.set("crf", &crf.to_string());
                opts.set("b:v", "0");
                if self.quality == Quality::Lossless {
                    opts.set("lossless", "1");
                }
            }
            codec::Id::AV1 => {
                opts.set("crf", &crf.to_string());
            }
            _ => {}
        }
        opts
    }

    fn drain_encoder(&mut self, packets: &mut Vec<Packet>) -> FrameCutResult<()> {
        let enc_tb = self.enc_time_base;
        let in_tb = self.in_time_base;
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        let mut packet = Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            let mut done = std::mem::replace(&mut packet, Packet::empty());
            if enc_tb != in_tb {
                done.rescale_ts(enc_tb, in_tb);
            }
            packets.push(done);
        }
        Ok(())
    }

    /// Bring an encoder packet back into the input timebase
    fn rescale_from_encoder(&self, packet: &mut Packet) {
        if self.enc_time_base != self.in_time_base {
            packet.rescale_ts(self.enc_time_base, self.in_time_base);
        }
    }
}
