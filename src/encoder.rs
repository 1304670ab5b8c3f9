//! C4: thin contract over the external H.264 encoder (§1, §4.4). The real
//! backend wraps the `x264` crate, whose `Setup` vocabulary (preset
//! string, colorspace, `annexb`, `repeat_headers`, profile) matches this
//! contract closely enough that the adapter does no re-implementation of
//! its own — it only translates configuration and tags output NALs.

use crate::error::CaptureError;

/// H.264 NAL unit types relevant to muxing, per ITU-T H.264 Annex B
/// (`nal_unit_type` in the low 5 bits of the NAL header byte).
const NAL_TYPE_NON_IDR: u8 = 1;
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    Sps,
    Pps,
    Idr,
    NonIdr,
    Other,
}

impl NalKind {
    pub fn is_idr(self) -> bool {
        matches!(self, NalKind::Idr)
    }

    /// Classify by the low 5 bits of an Annex-B NAL header byte.
    pub fn from_header_byte(byte: u8) -> Self {
        match byte & 0x1f {
            NAL_TYPE_SPS => NalKind::Sps,
            NAL_TYPE_PPS => NalKind::Pps,
            NAL_TYPE_IDR => NalKind::Idr,
            NAL_TYPE_NON_IDR => NalKind::NonIdr,
            _ => NalKind::Other,
        }
    }
}

/// A single NAL unit as handed to the muxer: Annex-B framing as produced
/// by the encoder, copied verbatim into a Matroska Block (§3).
#[derive(Debug, Clone)]
pub struct Nal {
    pub kind: NalKind,
    pub payload: Vec<u8>,
}

/// The contract §4.4 describes: configure once, fetch SPS/PPS headers
/// once before any frame is submitted, then submit one RGB frame per call
/// and receive zero or more NALs.
pub trait Encoder {
    fn headers(&mut self) -> Result<Vec<Nal>, CaptureError>;
    fn encode(&mut self, rgb: &[u8], pts: i64) -> Result<Vec<Nal>, CaptureError>;
}

/// Real backend: 8-bit depth, RGB color space, not variable-frame-rate,
/// `repeat_headers=false`, Annex-B framing, profile "high444". Any
/// configuration failure is fatal to the recording session (§4.4).
pub struct X264Encoder {
    inner: x264::Encoder,
}

impl X264Encoder {
    pub fn configure(width: u32, height: u32, preset: &str) -> Result<Self, CaptureError> {
        let preset = x264::Preset::from_str(preset).map_err(|_| {
            CaptureError::EncoderConfiguration(format!("unknown encoder preset {preset:?}"))
        })?;

        let (encoder, _headers) = x264::Setup::preset(preset, x264::Tune::None, false, false)
            .annexb(true)
            .repeat_headers(false)
            .profile("high444")
            .fps(60, 1)
            .timebase(1, 1_000_000_000)
            .build(x264::Colorspace::RGB, width as i32, height as i32)
            .map_err(|e| CaptureError::EncoderConfiguration(format!("{e:?}")))?;

        Ok(X264Encoder { inner: encoder })
    }

    /// Split an Annex-B byte stream (one or more start-code-prefixed NALs)
    /// into tagged [`Nal`] values.
    fn split_annex_b(data: &[u8]) -> Vec<Nal> {
        let mut nals = Vec::new();
        let starts = find_start_codes(data);
        for (idx, &start) in starts.iter().enumerate() {
            let body_start = start;
            let body_end = starts.get(idx + 1).copied().unwrap_or(data.len());
            if body_start >= body_end {
                continue;
            }
            let payload = data[body_start..body_end].to_vec();
            if let Some(&header) = payload.first() {
                nals.push(Nal { kind: NalKind::from_header_byte(header), payload });
            }
        }
        nals
    }
}

/// Locate the first byte after each Annex-B start code (`00 00 01` or
/// `00 00 00 01`) in `data`.
fn find_start_codes(data: &[u8]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else if i + 4 <= data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 0 && data[i + 3] == 1 {
            starts.push(i + 4);
            i += 4;
        } else {
            i += 1;
        }
    }
    starts
}

impl Encoder for X264Encoder {
    fn headers(&mut self) -> Result<Vec<Nal>, CaptureError> {
        let data = self
            .inner
            .headers()
            .map_err(|e| CaptureError::EncoderConfiguration(format!("{e:?}")))?;
        Ok(Self::split_annex_b(data.as_bytes()))
    }

    fn encode(&mut self, rgb: &[u8], pts: i64) -> Result<Vec<Nal>, CaptureError> {
        let image = x264::Image::rgb(self.inner.width(), self.inner.height(), rgb);
        match self
            .inner
            .encode(pts, image)
            .map_err(|e| CaptureError::EncoderConfiguration(format!("{e:?}")))?
        {
            Some((data, _frame_size)) => Ok(Self::split_annex_b(data.as_bytes())),
            None => Ok(Vec::new()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_nal_header_bytes() {
        assert_eq!(NalKind::from_header_byte(0x67), NalKind::Sps);
        assert_eq!(NalKind::from_header_byte(0x68), NalKind::Pps);
        assert_eq!(NalKind::from_header_byte(0x65), NalKind::Idr);
        assert_eq!(NalKind::from_header_byte(0x41), NalKind::NonIdr);
        assert_eq!(NalKind::from_header_byte(0x06), NalKind::Other);
    }

    #[test]
    fn splits_multiple_annex_b_nals() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(&[0x67, 0xaa]);
        data.extend_from_slice(&[0, 0, 1]);
        data.extend_from_slice(&[0x68, 0xbb]);
        let nals = X264Encoder::split_annex_b(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0].kind, NalKind::Sps);
        assert_eq!(nals[0].payload, vec![0x67, 0xaa]);
        assert_eq!(nals[1].kind, NalKind::Pps);
        assert_eq!(nals[1].payload, vec![0x68, 0xbb]);
    }
}
