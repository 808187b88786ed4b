//! H.265/HEVC NAL inspection, CRA→BLA rewriting, and leading-picture rules

use super::{detect_format, split_nals, NalFormat};

pub const NAL_TRAIL_N: u8 = 0;
pub const NAL_TRAIL_R: u8 = 1;
pub const NAL_RADL_N: u8 = 6;
pub const NAL_RADL_R: u8 = 7;
pub const NAL_RASL_N: u8 = 8;
pub const NAL_RASL_R: u8 = 9;
pub const NAL_BLA_W_LP: u8 = 16;
pub const NAL_BLA_W_RADL: u8 = 17;
pub const NAL_BLA_N_LP: u8 = 18;
pub const NAL_IDR_W_RADL: u8 = 19;
pub const NAL_IDR_N_LP: u8 = 20;
pub const NAL_CRA: u8 = 21;
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;
pub const NAL_PREFIX_SEI: u8 = 39;
pub const NAL_SUFFIX_SEI: u8 = 40;

/// NAL unit type from the first header byte
pub fn nal_unit_type(header: u8) -> u8 {
    (header >> 1) & 0x3F
}

pub fn is_rasl(nal_type: u8) -> bool {
    matches!(nal_type, NAL_RASL_N | NAL_RASL_R)
}

pub fn is_radl(nal_type: u8) -> bool {
    matches!(nal_type, NAL_RADL_N | NAL_RADL_R)
}

/// Leading pictures display before their IRAP but decode after it
pub fn is_leading(nal_type: u8) -> bool {
    is_rasl(nal_type) || is_radl(nal_type)
}

pub fn is_irap(nal_type: u8) -> bool {
    (NAL_BLA_W_LP..=NAL_CRA).contains(&nal_type)
}

/// Dominant NAL type of a packet
///
/// Random-access picture types (BLA/IDR, then CRA) win over trailing
/// pictures, which win over parameter sets and SEI, so a packet carrying
/// VPS+SPS+PPS+slice classifies as its picture.
pub fn packet_nal_type(data: &[u8]) -> Option<u8> {
    let nals = split_nals(data, detect_format(data))?;
    let mut found = Vec::with_capacity(nals.len());
    for nal in &nals {
        let ty = nal_unit_type(*nal.first()?);
        if (NAL_BLA_W_LP..=NAL_IDR_N_LP).contains(&ty) {
            return Some(ty);
        }
        found.push(ty);
    }
    found
        .iter()
        .copied()
        .find(|&ty| ty == NAL_CRA)
        .or_else(|| found.iter().copied().find(|&ty| ty <= 15))
        .or_else(|| found.first().copied())
}

/// True if a keyframe packet with this NAL type is a safe splice point
///
/// BLA, IDR, and CRA pictures qualify, as do parameter sets; CRA needs its
/// RASL pictures handled separately by the splice.
pub fn is_safe_keyframe_nal(nal_type: Option<u8>) -> bool {
    match nal_type {
        None => true,
        Some(ty) => is_irap(ty) || matches!(ty, NAL_VPS | NAL_SPS | NAL_PPS),
    }
}

/// Collect VPS/SPS/PPS NAL units carried inside a packet
pub fn in_band_parameter_sets(data: &[u8]) -> Vec<Vec<u8>> {
    let Some(nals) = split_nals(data, detect_format(data)) else {
        return Vec::new();
    };
    nals.iter()
        .filter(|nal| {
            nal.first()
                .map(|&b| matches!(nal_unit_type(b), NAL_VPS | NAL_SPS | NAL_PPS))
                .unwrap_or(false)
        })
        .map(|nal| nal.to_vec())
        .collect()
}

/// Extract VPS/SPS/PPS from container extradata (hvcC or Annex-B)
pub fn parameter_sets_from_extradata(extradata: &[u8]) -> Vec<Vec<u8>> {
    if super::is_annex_b(extradata) {
        return in_band_parameter_sets(extradata);
    }
    parse_hvcc(extradata).map(|(sets, _)| sets).unwrap_or_default()
}

/// NAL length-prefix size declared by hvcC extradata (defaults to 4)
pub fn nal_length_size(extradata: &[u8]) -> usize {
    if super::is_annex_b(extradata) {
        return 4;
    }
    parse_hvcc(extradata).map(|(_, size)| size).unwrap_or(4)
}

/// Parse an HEVCDecoderConfigurationRecord into (parameter sets, length size)
fn parse_hvcc(data: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    if data.len() < 23 || data[0] != 1 {
        return None;
    }
    let length_size = (data[21] & 0x03) as usize + 1;
    let num_arrays = data[22] as usize;
    let mut sets = Vec::new();
    let mut i = 23usize;
    for _ in 0..num_arrays {
        let nal_type = *data.get(i)? & 0x3F;
        let num_nalus = u16::from_be_bytes([*data.get(i + 1)?, *data.get(i + 2)?]) as usize;
        i += 3;
        for _ in 0..num_nalus {
            let len = u16::from_be_bytes([*data.get(i)?, *data.get(i + 1)?]) as usize;
            i += 2;
            let nal = data.get(i..i + len)?;
            i += len;
            if matches!(nal_type, NAL_VPS | NAL_SPS | NAL_PPS) {
                sets.push(nal.to_vec());
            }
        }
    }
    Some((sets, length_size))
}

/// Rewrite a CRA picture at a splice point into a BLA picture
///
/// A CRA is only decodable as a stream entry point when its RASL pictures
/// can be discarded; after a mid-stream splice the standard requires the
/// broken-link marker instead. Picks `BLA_W_LP` when leading pictures
/// follow, `BLA_N_LP` otherwise. Returns `None` when the packet carries no
/// CRA slice.
pub fn rewrite_cra_to_bla(data: &[u8], has_leading: bool) -> Option<Vec<u8>> {
    let format = detect_format(data);
    let nals = split_nals(data, format)?;
    if !nals
        .iter()
        .any(|nal| nal.first().map(|&b| nal_unit_type(b) == NAL_CRA).unwrap_or(false))
    {
        return None;
    }

    let new_type = if has_leading { NAL_BLA_W_LP } else { NAL_BLA_N_LP };
    let mut out = data.to_vec();

    // Walk the framing again over the owned buffer and patch header bytes in
    // place; the header is not emulation-protected so no re-escaping is
    // needed.
    let mut offsets = Vec::new();
    {
        let mut cursor = 0usize;
        for nal in &nals {
            // Locate this NAL's header byte within `data`
            let start = nal.as_ptr() as usize - data.as_ptr() as usize;
            debug_assert!(start >= cursor);
            cursor = start + nal.len();
            if nal_unit_type(nal[0]) == NAL_CRA {
                offsets.push(start);
            }
        }
    }
    for off in offsets {
        out[off] = (out[off] & 0x81) | (new_type << 1);
    }
    Some(out)
}

/// Drop RASL NAL units from a packet; `None` when nothing was removed
///
/// RASL pictures reference frames from before their CRA and become
/// undecodable once the splice removed those references.
pub fn strip_rasl(data: &[u8]) -> Option<Vec<u8>> {
    let format = detect_format(data);
    let nals = split_nals(data, format)?;
    if !nals
        .iter()
        .any(|nal| nal.first().map(|&b| is_rasl(nal_unit_type(b))).unwrap_or(false))
    {
        return None;
    }
    let kept: Vec<Vec<u8>> = nals
        .iter()
        .filter(|nal| !nal.first().map(|&b| is_rasl(nal_unit_type(b))).unwrap_or(false))
        .map(|nal| nal.to_vec())
        .collect();
    Some(super::prepend_nals(&[], &kept, format))
}

/// Ordering rank for packet-level NAL sequencing validation
pub fn sequence_rank(nal_type: u8) -> Option<u8> {
    match nal_type {
        NAL_AUD => Some(0),
        NAL_VPS => Some(1),
        NAL_SPS => Some(2),
        NAL_PPS => Some(3),
        NAL_PREFIX_SEI => Some(4),
        0..=31 => Some(5),
        NAL_SUFFIX_SEI => Some(6),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hevc_header(nal_type: u8) -> [u8; 2] {
        // forbidden_zero=0, layer_id=0, temporal_id_plus1=1
        [(nal_type << 1), 0x01]
    }

    fn annexb_packet(types: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for &ty in types {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(&hevc_header(ty));
            out.extend_from_slice(&[0x40, 0x00]);
        }
        out
    }

    #[test]
    fn idr_wins_over_parameter_sets() {
        let data = annexb_packet(&[NAL_VPS, NAL_SPS, NAL_PPS, NAL_IDR_W_RADL]);
        assert_eq!(packet_nal_type(&data), Some(NAL_IDR_W_RADL));
    }

    #[test]
    fn cra_wins_over_trailing() {
        let data = annexb_packet(&[NAL_TRAIL_R, NAL_CRA]);
        assert_eq!(packet_nal_type(&data), Some(NAL_CRA));
    }

    #[test]
    fn classifies_leading_pictures() {
        assert!(is_leading(NAL_RASL_N));
        assert!(is_leading(NAL_RADL_R));
        assert!(!is_leading(NAL_TRAIL_N));
        assert!(is_rasl(NAL_RASL_R));
        assert!(is_radl(NAL_RADL_N));
    }

    #[test]
    fn cra_rewritten_to_bla_w_lp_with_leading() {
        let data = annexb_packet(&[NAL_CRA]);
        let out = rewrite_cra_to_bla(&data, true).unwrap();
        let nals = split_nals(&out, NalFormat::AnnexB).unwrap();
        assert_eq!(nal_unit_type(nals[0][0]), NAL_BLA_W_LP);
        // Layer id and temporal id bits survive the rewrite
        assert_eq!(nals[0][1], 0x01);
    }

    #[test]
    fn cra_rewritten_to_bla_n_lp_without_leading() {
        let data = annexb_packet(&[NAL_SPS, NAL_CRA]);
        let out = rewrite_cra_to_bla(&data, false).unwrap();
        let nals = split_nals(&out, NalFormat::AnnexB).unwrap();
        assert_eq!(nal_unit_type(nals[0][0]), NAL_SPS);
        assert_eq!(nal_unit_type(nals[1][0]), NAL_BLA_N_LP);
    }

    #[test]
    fn rewrite_leaves_non_cra_packets_alone() {
        let data = annexb_packet(&[NAL_IDR_W_RADL]);
        assert!(rewrite_cra_to_bla(&data, false).is_none());
    }

    #[test]
    fn strips_rasl_nals() {
        let data = annexb_packet(&[NAL_RASL_N, NAL_TRAIL_R]);
        let out = strip_rasl(&data).unwrap();
        let nals = split_nals(&out, NalFormat::AnnexB).unwrap();
        assert_eq!(nals.len(), 1);
        assert_eq!(nal_unit_type(nals[0][0]), NAL_TRAIL_R);
        assert!(strip_rasl(&annexb_packet(&[NAL_TRAIL_R])).is_none());
    }

    #[test]
    fn hvcc_parse_extracts_parameter_sets() {
        // Minimal hvcC: 22-byte header, one SPS array with one 4-byte NAL
        let mut hvcc = vec![1u8];
        hvcc.extend_from_slice(&[0u8; 20]);
        hvcc.push(0x03); // lengthSizeMinusOne = 3
        hvcc.push(1); // numOfArrays
        hvcc.push(NAL_SPS);
        hvcc.extend_from_slice(&1u16.to_be_bytes());
        hvcc.extend_from_slice(&4u16.to_be_bytes());
        hvcc.extend_from_slice(&[(NAL_SPS << 1), 0x01, 0xAA, 0xBB]);

        let sets = parameter_sets_from_extradata(&hvcc);
        assert_eq!(sets.len(), 1);
        assert_eq!(nal_unit_type(sets[0][0]), NAL_SPS);
        assert_eq!(nal_length_size(&hvcc), 4);
    }
}
