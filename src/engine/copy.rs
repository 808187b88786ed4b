//! Packet-level passthrough of whole GOPs
//!
//! Streams copied video packets out of its own demux handle, applying the
//! bitstream surgeon's boundary work on the way: framing conversion between
//! container families, parameter-set injection at epoch changes, CRA→BLA
//! rewriting after a splice, and RASL discard.

use std::path::Path;

use ffmpeg_next::codec::packet::Flags;
use ffmpeg_next::format;
use ffmpeg_next::Packet;
use tracing::{debug, warn};

use crate::bitstream::{self, CodecSurgeon, NalFormat};
use crate::error::{FrameCutError, FrameCutResult};
use crate::planner::CutSegment;

/// Surgery to apply at the head of one copied segment
#[derive(Debug, Clone, Default)]
pub struct BoundaryAction {
    /// Rewrite a CRA opening the segment into a BLA (mid-stream splice)
    pub rewrite_cra: bool,
    /// The original GOP carried leading pictures (selects BLA_W_LP)
    pub had_leading: bool,
    /// Drop leading pictures entirely (hybrid re-encode handles them)
    pub drop_leading: bool,
    /// Parameter sets to emit before the first packet (epoch change)
    pub inject_parameter_sets: Vec<Vec<u8>>,
}

/// Copier over one video stream
pub struct PacketCopier {
    ictx: format::context::Input,
    stream_index: usize,
    /// Framing the output container wants
    target_format: Option<NalFormat>,
}

impl PacketCopier {
    pub fn new(
        path: &Path,
        stream_index: usize,
        target_format: Option<NalFormat>,
    ) -> FrameCutResult<PacketCopier> {
        let ictx = format::input(&path).map_err(|e| FrameCutError::InputUnreadable {
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(PacketCopier {
            ictx,
            stream_index,
            target_format,
        })
    }

    /// Copy one GOP's packets, applying boundary surgery to the head
    ///
    /// Packets keep their input-timebase timestamps; rebasing happens in the
    /// muxing scheduler.
    pub fn copy_segment(
        &mut self,
        segment: &CutSegment,
        surgeon: &dyn CodecSurgeon,
        action: &BoundaryAction,
    ) -> FrameCutResult<Vec<Packet>> {
        self.seek_to_dts(segment.gop_start_dts)?;

        let mut out = Vec::new();
        let mut pending_sets = action.inject_parameter_sets.clone();
        let mut rewrite_pending = action.rewrite_cra;
        let mut dropped = 0usize;

        // Collect owned packets first; packets() borrows the context
        let mut packets = Vec::new();
        for (stream, packet) in self.ictx.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            let dts = packet.dts().unwrap_or(i64::MIN);
            if dts < segment.gop_start_dts {
                continue;
            }
            if dts > segment.gop_end_dts {
                break;
            }
            packets.push(packet);
        }

        for packet in packets {
            let pts = packet.pts().unwrap_or(0);
            if packet.flags().contains(Flags::CORRUPT) {
                warn!("Dropping corrupt packet at pts {}", pts);
                continue;
            }

            let data = packet.data().unwrap_or(&[]);

            if action.drop_leading {
                if let Some(pic) = surgeon.classify(data, packet.flags().contains(Flags::KEY)) {
                    if pic.is_leading() {
                        dropped += 1;
                        continue;
                    }
                }
            }

            let mut payload: Option<Vec<u8>> = None;

            if rewrite_pending {
                if let Some(rewritten) = surgeon.rewrite_boundary(data, action.had_leading) {
                    surgeon.validate(&rewritten, pts)?;
                    payload = Some(rewritten);
                }
                // Only the picture opening the segment is a splice boundary
                rewrite_pending = false;
            }

            if !pending_sets.is_empty() {
                let current = payload.as_deref().unwrap_or(data);
                let format = bitstream::detect_format(current);
                let injected = bitstream::prepend_nals(current, &pending_sets, format);
                surgeon.validate(&injected, pts)?;
                payload = Some(injected);
                pending_sets.clear();
            }

            if let Some(target) = self.target_format {
                let current = payload.as_deref().unwrap_or(data);
                let have = bitstream::detect_format(current);
                if have != target {
                    let converted = match target {
                        NalFormat::AnnexB => bitstream::to_annex_b(current, have, pts)?,
                        NalFormat::LengthPrefixed { .. } => {
                            bitstream::to_length_prefixed(current, have, pts)?
                        }
                    };
                    payload = Some(converted);
                }
            }

            out.push(match payload {
                Some(bytes) => clone_with_payload(&packet, &bytes),
                None => packet,
            });
        }

        if dropped > 0 {
            debug!(
                "Dropped {} leading pictures at splice into GOP {}",
                dropped, segment.gop_index
            );
        }
        Ok(out)
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
        Ok(())
    }
}

/// New packet with replaced payload, keeping the original's timing and flags
fn clone_with_payload(original: &Packet, payload: &[u8]) -> Packet {
    let mut packet = Packet::copy(payload);
    packet.set_pts(original.pts());
    packet.set_dts(original.dts());
    packet.set_duration(original.duration());
    packet.set_flags(original.flags());
    packet
}
