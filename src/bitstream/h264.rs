//! H.264/AVC NAL inspection and parameter-set handling

use super::{detect_format, split_nals, NalFormat};

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// NAL unit type from the header byte
pub fn nal_unit_type(header: u8) -> u8 {
    header & 0x1F
}

/// Dominant NAL type of a packet
///
/// IDR slices win outright; otherwise non-IDR picture slices (1-4) take
/// priority over metadata so a packet carrying SPS+PPS+slice classifies as
/// its picture.
pub fn packet_nal_type(data: &[u8]) -> Option<u8> {
    let nals = split_nals(data, detect_format(data))?;
    let mut found = Vec::with_capacity(nals.len());
    for nal in &nals {
        let ty = nal_unit_type(*nal.first()?);
        if ty == NAL_IDR {
            return Some(NAL_IDR);
        }
        found.push(ty);
    }
    found
        .iter()
        .copied()
        .find(|&ty| (NAL_SLICE..NAL_IDR).contains(&ty))
        .or_else(|| found.first().copied())
}

/// True if a keyframe packet with this NAL type is a safe splice point
///
/// IDR slices, SEI, and parameter sets qualify; a keyframe flag on anything
/// else means the container lied or the GOP is open.
pub fn is_safe_keyframe_nal(nal_type: Option<u8>) -> bool {
    match nal_type {
        None => true,
        Some(ty) => matches!(ty, NAL_IDR | NAL_SEI | NAL_SPS | NAL_PPS),
    }
}

/// Collect SPS/PPS NAL units carried inside a packet
pub fn in_band_parameter_sets(data: &[u8]) -> Vec<Vec<u8>> {
    let Some(nals) = split_nals(data, detect_format(data)) else {
        return Vec::new();
    };
    nals.iter()
        .filter(|nal| {
            nal.first()
                .map(|&b| matches!(nal_unit_type(b), NAL_SPS | NAL_PPS))
                .unwrap_or(false)
        })
        .map(|nal| nal.to_vec())
        .collect()
}

/// Extract SPS/PPS from container extradata (avcC or Annex-B)
pub fn parameter_sets_from_extradata(extradata: &[u8]) -> Vec<Vec<u8>> {
    if super::is_annex_b(extradata) {
        return in_band_parameter_sets(extradata);
    }
    parse_avcc(extradata).map(|(sets, _)| sets).unwrap_or_default()
}

/// NAL length-prefix size declared by avcC extradata (defaults to 4)
pub fn nal_length_size(extradata: &[u8]) -> usize {
    if super::is_annex_b(extradata) {
        return 4;
    }
    parse_avcc(extradata).map(|(_, size)| size).unwrap_or(4)
}

/// Parse an AVCDecoderConfigurationRecord into (parameter sets, length size)
fn parse_avcc(data: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    if data.len() < 7 || data[0] != 1 {
        return None;
    }
    let length_size = (data[4] & 0x03) as usize + 1;
    let mut sets = Vec::new();
    let mut i = 5usize;

    let num_sps = (data[i] & 0x1F) as usize;
    i += 1;
    for _ in 0..num_sps {
        let len = u16::from_be_bytes([*data.get(i)?, *data.get(i + 1)?]) as usize;
        i += 2;
        sets.push(data.get(i..i + len)?.to_vec());
        i += len;
    }

    let num_pps = *data.get(i)? as usize;
    i += 1;
    for _ in 0..num_pps {
        let len = u16::from_be_bytes([*data.get(i)?, *data.get(i + 1)?]) as usize;
        i += 2;
        sets.push(data.get(i..i + len)?.to_vec());
        i += len;
    }

    Some((sets, length_size))
}

/// Build an AVCDecoderConfigurationRecord from raw SPS/PPS NAL units
///
/// Used when remuxing Annex-B input (MPEG-TS) into containers that carry
/// configuration out-of-band (MP4/MOV/MKV).
pub fn build_avcc(parameter_sets: &[Vec<u8>]) -> Option<Vec<u8>> {
    let sps: Vec<&Vec<u8>> = parameter_sets
        .iter()
        .filter(|n| n.first().map(|&b| nal_unit_type(b) == NAL_SPS).unwrap_or(false))
        .collect();
    let pps: Vec<&Vec<u8>> = parameter_sets
        .iter()
        .filter(|n| n.first().map(|&b| nal_unit_type(b) == NAL_PPS).unwrap_or(false))
        .collect();
    let first_sps = sps.first()?;
    if first_sps.len() < 4 {
        return None;
    }

    let mut out = Vec::with_capacity(16 + parameter_sets.iter().map(|n| n.len()).sum::<usize>());
    out.push(1); // configurationVersion
    out.push(first_sps[1]); // AVCProfileIndication
    out.push(first_sps[2]); // profile_compatibility
    out.push(first_sps[3]); // AVCLevelIndication
    out.push(0xFF); // 4-byte NAL lengths
    out.push(0xE0 | (sps.len() as u8 & 0x1F));
    for s in &sps {
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
        out.extend_from_slice(s);
    }
    out.push(pps.len() as u8);
    for p in &pps {
        out.extend_from_slice(&(p.len() as u16).to_be_bytes());
        out.extend_from_slice(p);
    }
    Some(out)
}

/// Ordering rank for packet-level NAL sequencing validation
pub fn sequence_rank(nal_type: u8) -> Option<u8> {
    match nal_type {
        NAL_AUD => Some(0),
        NAL_SPS => Some(1),
        NAL_PPS => Some(2),
        NAL_SEI => Some(3),
        NAL_SLICE..=NAL_IDR => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb_packet(nal_headers: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nal_headers {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn idr_wins_over_metadata() {
        let data = annexb_packet(&[&[0x67, 0x64, 0x00, 0x1F], &[0x68, 0xEE], &[0x65, 0x88]]);
        assert_eq!(packet_nal_type(&data), Some(NAL_IDR));
    }

    #[test]
    fn slice_wins_over_sei() {
        let data = annexb_packet(&[&[0x06, 0x05], &[0x41, 0x9A]]);
        assert_eq!(packet_nal_type(&data), Some(NAL_SLICE));
    }

    #[test]
    fn safe_keyframe_nal_types() {
        assert!(is_safe_keyframe_nal(Some(NAL_IDR)));
        assert!(is_safe_keyframe_nal(Some(NAL_SPS)));
        assert!(is_safe_keyframe_nal(None));
        assert!(!is_safe_keyframe_nal(Some(NAL_SLICE)));
    }

    #[test]
    fn avcc_round_trip() {
        let sps = vec![0x67, 0x64, 0x00, 0x1F, 0xAC];
        let pps = vec![0x68, 0xEE, 0x3C, 0x80];
        let avcc = build_avcc(&[sps.clone(), pps.clone()]).unwrap();
        assert_eq!(avcc[0], 1);
        assert_eq!(avcc[1], 0x64);
        let (sets, length_size) = parse_avcc(&avcc).unwrap();
        assert_eq!(length_size, 4);
        assert_eq!(sets, vec![sps, pps]);
    }

    #[test]
    fn in_band_sets_found_in_idr_packet() {
        let data = annexb_packet(&[&[0x67, 0x64, 0x00, 0x1F], &[0x68, 0xEE], &[0x65, 0x88]]);
        let sets = in_band_parameter_sets(&data);
        assert_eq!(sets.len(), 2);
        assert_eq!(nal_unit_type(sets[0][0]), NAL_SPS);
        assert_eq!(nal_unit_type(sets[1][0]), NAL_PPS);
    }
}
