//! Muxing scheduler
//!
//! Owns the output container: stream mapping, chapter and attachment
//! preservation, codec-tag normalization, and the single place where
//! timestamps are rebased onto the output timeline with strict per-stream
//! DTS monotonicity.

use std::collections::HashMap;
use std::path::Path;

use ffmpeg_next::codec;
use ffmpeg_next::format;
use ffmpeg_next::media;
use ffmpeg_next::Packet;
use ffmpeg_next::Rational;
use tracing::{debug, info, warn};

use crate::error::{FrameCutError, FrameCutResult};
use crate::utils::rescale;

/// DTS values outside this window are treated as uninitialized encoder
/// output rather than real timestamps
const DTS_GARBAGE_MIN: i64 = -900_000;
const DTS_GARBAGE_MAX: i64 = 1_000_000_000_000;

const LAST_DTS_UNSET: i64 = -100_000_000;

/// Output-side scheduler for one job
pub struct MuxScheduler {
    octx: format::context::Output,
    /// Input stream index -> output stream index
    stream_map: HashMap<usize, usize>,
    /// Input timebase per output stream
    in_tbs: Vec<Rational>,
    /// Running DTS high-water mark per output stream, in output units
    last_dts: Vec<i64>,
    video_out_index: Option<usize>,
    ref_time_base: Rational,
    /// Accumulated output position in the reference timebase
    output_position: i64,
    /// Input-timeline start of the segment currently being written
    segment_start_pts: i64,
    segment_end_pts: i64,
    preserve_timestamps: bool,
    format_name: String,
    packets_written: u64,
}

impl MuxScheduler {
    /// Create the output container and map the retained input streams
    pub fn new(
        output_path: &Path,
        input_path: &Path,
        ref_time_base: Rational,
        preserve_timestamps: bool,
    ) -> FrameCutResult<MuxScheduler> {
        let mut octx =
            format::output(&output_path).map_err(|e| FrameCutError::OutputWriteError {
                message: format!("{}: {}", output_path.display(), e),
            })?;
        let ictx = format::input(&input_path).map_err(|e| FrameCutError::InputUnreadable {
            message: format!("{}: {}", input_path.display(), e),
        })?;

        let format_name = octx.format().name().to_string();
        let is_mp4_mov = ["mp4", "mov", "ipod"]
            .iter()
            .any(|n| format_name.contains(n));
        let is_mkv = format_name.contains("matroska") || format_name.contains("webm");
        let normalizes_tags = is_mp4_mov || is_mkv;

        // Container-level metadata plus the tool stamp
        let mut metadata = ictx.metadata().to_owned();
        metadata.set(
            "encoder",
            concat!("framecut ", env!("CARGO_PKG_VERSION")),
        );
        octx.set_metadata(metadata);

        let mut stream_map = HashMap::new();
        let mut in_tbs = Vec::new();
        let mut video_out_index = None;
        let mut video_mapped = false;

        for stream in ictx.streams() {
            let params = stream.parameters();
            let codec_id = params.id();
            let medium = params.medium();
            let retain = match medium {
                media::Type::Video => !video_mapped,
                media::Type::Audio | media::Type::Subtitle => true,
                // MKV attachments (fonts, covers) ride along as whole streams
                media::Type::Attachment => is_mkv,
                _ => false,
            };
            if !retain {
                debug!("Skipping input stream {} ({:?})", stream.index(), medium);
                continue;
            }

            let mut ost = octx
                .add_stream(ffmpeg_next::encoder::find(codec_id))
                .map_err(|e| FrameCutError::OutputWriteError {
                    message: format!("add stream: {}", e),
                })?;
            ost.set_parameters(params);
            ost.set_time_base(stream.time_base());
            ost.set_metadata(stream.metadata().to_owned());

            unsafe {
                // Disposition bits (default, forced, hearing-impaired) copy
                // verbatim
                (*ost.as_mut_ptr()).disposition = (*stream.as_ptr()).disposition;

                let par = (*ost.as_mut_ptr()).codecpar;
                if codec_id == codec::Id::HEVC && is_mp4_mov {
                    // hev1 keeps parameter sets in-band, which the splice
                    // relies on and which plays more broadly than hvc1
                    (*par).codec_tag = u32::from_le_bytes(*b"hev1");
                } else if normalizes_tags {
                    // Drop source-container tags (MPEG-TS style ids) so the
                    // muxer picks its own
                    (*par).codec_tag = 0;
                }
            }

            let out_idx = ost.index();
            if medium == media::Type::Video {
                video_out_index = Some(out_idx);
                video_mapped = true;
            }
            stream_map.insert(stream.index(), out_idx);
            in_tbs.push(stream.time_base());
        }

        if stream_map.is_empty() {
            return Err(FrameCutError::InputUnreadable {
                message: "no mappable streams in input".to_string(),
            });
        }

        // Chapters ride along untouched; players tolerate marks past the end
        for chapter in ictx.chapters() {
            let title = chapter.metadata().get("title").unwrap_or("").to_string();
            if let Err(e) = octx.add_chapter(
                chapter.id(),
                chapter.time_base(),
                chapter.start(),
                chapter.end(),
                &title,
            ) {
                warn!("Could not copy chapter {}: {}", chapter.id(), e);
            }
        }

        let last_dts = vec![LAST_DTS_UNSET; in_tbs.len()];
        info!(
            "Output {}: format {}, {} streams",
            output_path.display(),
            format_name,
            stream_map.len()
        );

        Ok(MuxScheduler {
            octx,
            stream_map,
            in_tbs,
            last_dts,
            video_out_index,
            ref_time_base,
            output_position: 0,
            segment_start_pts: 0,
            segment_end_pts: 0,
            preserve_timestamps,
            format_name,
            packets_written: 0,
        })
    }

    pub fn format_name(&self) -> &str {
        &self.format_name
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Accumulated output position in the reference timebase
    pub fn output_position(&self) -> i64 {
        self.output_position
    }

    /// Replace the video stream's codec configuration before the header is
    /// written (Annex-B input remuxed into an avcC container)
    pub fn set_video_extradata(&mut self, bytes: &[u8]) -> FrameCutResult<()> {
        let Some(out_idx) = self.video_out_index else {
            return Ok(());
        };
        unsafe {
            let stream = *(*self.octx.as_mut_ptr()).streams.add(out_idx);
            let par = (*stream).codecpar;
            ffmpeg_next::ffi::av_freep(
                &mut (*par).extradata as *mut *mut u8 as *mut std::ffi::c_void,
            );
            let size = bytes.len();
            let buf = ffmpeg_next::ffi::av_mallocz(
                size + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
            ) as *mut u8;
            if buf.is_null() {
                return Err(FrameCutError::OutputWriteError {
                    message: "extradata allocation failed".to_string(),
                });
            }
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, size);
            (*par).extradata = buf;
            (*par).extradata_size = size as i32;
        }
        debug!("Installed {} bytes of rebuilt codec configuration", bytes.len());
        Ok(())
    }

    pub fn write_header(&mut self) -> FrameCutResult<()> {
        self.octx
            .write_header()
            .map_err(|e| FrameCutError::OutputWriteError {
                message: format!("write header: {}", e),
            })
    }

    /// Enter a segment window given in the reference timebase
    pub fn begin_segment(&mut self, start_pts: i64, end_pts: i64) {
        self.segment_start_pts = start_pts;
        self.segment_end_pts = end_pts;
    }

    /// Leave the current segment, advancing the output position
    pub fn end_segment(&mut self) {
        self.output_position += self.segment_end_pts - self.segment_start_pts;
    }

    /// Write one packet for an input stream
    ///
    /// `prepositioned` marks encoder output whose pts were already placed on
    /// the output timeline; copied and passthrough packets carry input-
    /// timeline stamps and get the segment offset applied here.
    pub fn write(
        &mut self,
        input_stream_index: usize,
        mut packet: Packet,
        prepositioned: bool,
    ) -> FrameCutResult<()> {
        let Some(&out_idx) = self.stream_map.get(&input_stream_index) else {
            return Ok(());
        };
        let in_tb = self.in_tbs[out_idx];

        if !self.preserve_timestamps && !prepositioned {
            let offset = rescale(
                self.output_position - self.segment_start_pts,
                self.ref_time_base,
                in_tb,
            );
            if let Some(pts) = packet.pts() {
                packet.set_pts(Some(pts + offset));
            }
            if let Some(dts) = packet.dts() {
                packet.set_dts(Some(dts + offset));
            }
        }

        let out_tb = self
            .octx
            .stream(out_idx)
            .map(|s| s.time_base())
            .unwrap_or(in_tb);
        packet.rescale_ts(in_tb, out_tb);

        self.fix_monotonic(out_idx, &mut packet);

        packet.set_stream(out_idx);
        packet
            .write_interleaved(&mut self.octx)
            .map_err(|e| FrameCutError::OutputWriteError {
                message: format!("write packet: {}", e),
            })?;
        self.packets_written += 1;
        Ok(())
    }

    /// Enforce strict DTS monotonicity and pts >= dts per output stream
    fn fix_monotonic(&mut self, out_idx: usize, packet: &mut Packet) {
        let mut dts = packet.dts();
        if let Some(d) = dts {
            // Encoder flush can leak uninitialized DTS values
            if !(DTS_GARBAGE_MIN..=DTS_GARBAGE_MAX).contains(&d) {
                dts = None;
            }
        }

        let fixed = match dts {
            Some(d) => {
                if d <= self.last_dts[out_idx] {
                    self.last_dts[out_idx] + 1
                } else {
                    d
                }
            }
            None => {
                if self.last_dts[out_idx] == LAST_DTS_UNSET {
                    packet.pts().unwrap_or(0)
                } else {
                    self.last_dts[out_idx] + 1
                }
            }
        };

        packet.set_dts(Some(fixed));
        if let Some(pts) = packet.pts() {
            if pts < fixed {
                packet.set_pts(Some(fixed));
            }
        } else {
            packet.set_pts(Some(fixed));
        }
        self.last_dts[out_idx] = fixed;
    }

    /// Finalize the container; safe to call on the cancel path, truncating
    /// to the last muxed packet
    pub fn finalize(&mut self) -> FrameCutResult<()> {
        self.octx
            .write_trailer()
            .map_err(|e| FrameCutError::OutputWriteError {
                message: format!("write trailer: {}", e),
            })?;
        info!("Finalized output after {} packets", self.packets_written);
        Ok(())
    }
}
