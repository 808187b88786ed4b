//! Bitstream surgery at splice boundaries
//!
//! Owns the byte-level work the splice needs: Annex-B / length-prefix
//! detection and conversion, NAL unit iteration, emulation-prevention
//! encoding, parameter-set injection, and NAL sequencing validation.
//! Codec-specific knowledge lives in [`h264`], [`h265`], and the
//! [`codec::CodecSurgeon`] capability trait.

pub mod codec;
pub mod h264;
pub mod h265;

pub use codec::{surgeon_for, CodecSurgeon, PicType};

use crate::error::{FrameCutError, FrameCutResult};

/// How NAL units are framed inside a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFormat {
    /// 00 00 01 / 00 00 00 01 start codes (MPEG-TS, raw streams)
    AnnexB,
    /// Big-endian length prefixes (MP4/MOV/MKV)
    LengthPrefixed { length_size: usize },
}

/// True if the buffer starts with an Annex-B start code
pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Detect the NAL framing of a packet or extradata blob
pub fn detect_format(data: &[u8]) -> NalFormat {
    if is_annex_b(data) {
        NalFormat::AnnexB
    } else {
        NalFormat::LengthPrefixed { length_size: 4 }
    }
}

/// Split a packet into NAL unit payloads (header byte first, no framing)
///
/// Returns `None` when the framing is inconsistent with `format`.
pub fn split_nals(data: &[u8], format: NalFormat) -> Option<Vec<&[u8]>> {
    match format {
        NalFormat::LengthPrefixed { length_size } => split_length_prefixed(data, length_size),
        NalFormat::AnnexB => Some(split_annex_b(data)),
    }
}

fn split_length_prefixed(data: &[u8], length_size: usize) -> Option<Vec<&[u8]>> {
    let mut nals = Vec::new();
    let mut i = 0usize;
    while i + length_size <= data.len() {
        let mut len = 0usize;
        for &b in &data[i..i + length_size] {
            len = (len << 8) | b as usize;
        }
        i += length_size;
        if len == 0 || i + len > data.len() {
            return None;
        }
        nals.push(&data[i..i + len]);
        i += len;
    }
    if i != data.len() {
        return None;
    }
    Some(nals)
}

fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0usize;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
                continue;
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push(i + 4);
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = if n + 1 < starts.len() {
            // Back off over the next start code (3 or 4 bytes)
            let next = starts[n + 1];
            if next >= 4 && data[next - 4] == 0 && data[next - 3] == 0 {
                next - 4
            } else {
                next - 3
            }
        } else {
            data.len()
        };
        if end > start {
            nals.push(&data[start..end]);
        }
    }
    nals
}

/// Convert a packet to Annex-B framing
pub fn to_annex_b(data: &[u8], format: NalFormat, pts: i64) -> FrameCutResult<Vec<u8>> {
    if format == NalFormat::AnnexB {
        return Ok(data.to_vec());
    }
    let nals = split_nals(data, format).ok_or_else(|| FrameCutError::BitstreamMalformed {
        pts,
        message: "inconsistent NAL length prefixes".to_string(),
    })?;
    let mut out = Vec::with_capacity(data.len() + nals.len() * 4);
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    Ok(out)
}

/// Convert a packet to 4-byte length-prefixed framing
pub fn to_length_prefixed(data: &[u8], format: NalFormat, pts: i64) -> FrameCutResult<Vec<u8>> {
    if matches!(format, NalFormat::LengthPrefixed { length_size: 4 }) {
        return Ok(data.to_vec());
    }
    let nals = split_nals(data, format).ok_or_else(|| FrameCutError::BitstreamMalformed {
        pts,
        message: "inconsistent NAL framing".to_string(),
    })?;
    let mut out = Vec::with_capacity(data.len() + nals.len() * 4);
    for nal in nals {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    Ok(out)
}

/// Prepend NAL units (typically parameter sets) to a packet, keeping its
/// framing
pub fn prepend_nals(data: &[u8], nals: &[Vec<u8>], format: NalFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + nals.iter().map(|n| n.len() + 4).sum::<usize>());
    for nal in nals {
        match format {
            NalFormat::AnnexB => out.extend_from_slice(&[0, 0, 0, 1]),
            NalFormat::LengthPrefixed { .. } => {
                out.extend_from_slice(&(nal.len() as u32).to_be_bytes())
            }
        }
        out.extend_from_slice(nal);
    }
    out.extend_from_slice(data);
    out
}

/// Strip emulation-prevention bytes, yielding the raw RBSP
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    let mut i = 0usize;
    while i < data.len() {
        let b = data[i];
        if zeros >= 2 && b == 0x03 && i + 1 < data.len() && data[i + 1] <= 0x03 {
            zeros = 0;
            i += 1;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
        i += 1;
    }
    out
}

/// Insert emulation-prevention bytes into raw RBSP
pub fn escape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// Verify that NAL units inside a rewritten packet appear in legal order
///
/// `rank` maps a NAL type to its position class; `None` means the type is
/// order-free. Ranks must be non-decreasing through the packet.
pub(crate) fn validate_ranks(
    nal_types: impl Iterator<Item = u8>,
    rank: impl Fn(u8) -> Option<u8>,
    pts: i64,
) -> FrameCutResult<()> {
    let mut last = 0u8;
    for ty in nal_types {
        if let Some(r) = rank(ty) {
            if r < last {
                return Err(FrameCutError::BitstreamMalformed {
                    pts,
                    message: format!("NAL type {} out of sequence", ty),
                });
            }
            last = r;
        }
    }
    Ok(())
}
