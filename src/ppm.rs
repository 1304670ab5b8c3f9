//! Screenshot mode's wire format (§6): binary PPM ("P6"). Decode exists
//! only to support the round-trip law in §8; nothing in the record path
//! reads a PPM back.

use std::io::Write;

use crate::error::CaptureError;

/// Write `P6\n<w>\n<h>\n255\n` followed by `w*h*3` bytes of R,G,B in
/// scanline order.
pub fn encode(w: u32, h: u32, rgb: &[u8], out: &mut impl Write) -> Result<(), CaptureError> {
    debug_assert_eq!(rgb.len(), w as usize * h as usize * 3);
    write!(out, "P6\n{w}\n{h}\n255\n").map_err(CaptureError::Io)?;
    out.write_all(rgb).map_err(CaptureError::Io)
}

/// Parse a binary PPM produced by [`encode`]. Only the exact header shape
/// this crate writes is accepted; this is a test fixture, not a general
/// PPM reader.
pub fn decode(data: &[u8]) -> Result<(u32, u32, Vec<u8>), CaptureError> {
    let mut fields = Vec::new();
    let mut rest = data;
    while fields.len() < 4 {
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| CaptureError::RuntimeCapture("truncated PPM header".into()))?;
        let (line, tail) = rest.split_at(nl);
        fields.push(line.to_vec());
        rest = &tail[1..];
    }

    if fields[0] != b"P6" {
        return Err(CaptureError::RuntimeCapture("not a P6 PPM".into()));
    }
    let w: u32 = parse_ascii_field(&fields[1])?;
    let h: u32 = parse_ascii_field(&fields[2])?;
    let maxval: u32 = parse_ascii_field(&fields[3])?;
    if maxval != 255 {
        return Err(CaptureError::RuntimeCapture("unsupported PPM maxval".into()));
    }

    let expected = w as usize * h as usize * 3;
    if rest.len() != expected {
        return Err(CaptureError::RuntimeCapture(format!(
            "PPM body length {} does not match {w}x{h}x3",
            rest.len()
        )));
    }
    Ok((w, h, rest.to_vec()))
}

fn parse_ascii_field(field: &[u8]) -> Result<u32, CaptureError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CaptureError::RuntimeCapture("malformed PPM header field".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_image() {
        let w = 5u32;
        let h = 3u32;
        let rgb: Vec<u8> = (0..(w * h * 3)).map(|i| (i % 251) as u8).collect();
        let mut buf = Vec::new();
        encode(w, h, &rgb, &mut buf).unwrap();
        let (dw, dh, body) = decode(&buf).unwrap();
        assert_eq!((dw, dh), (w, h));
        assert_eq!(body, rgb);
    }

    #[test]
    fn matches_seed_scenario_1_header_and_body() {
        let rgb = vec![
            30, 20, 10, 31, 21, 11, 32, 22, 12, 33, 23, 13, 34, 24, 14, 35, 25, 15, 36, 26, 16,
            37, 27, 17,
        ];
        let mut buf = Vec::new();
        encode(4, 2, &rgb, &mut buf).unwrap();
        assert!(buf.starts_with(b"P6\n4\n2\n255\n"));
        let (w, h, body) = decode(&buf).unwrap();
        assert_eq!((w, h), (4, 2));
        assert_eq!(body, rgb);
    }

    #[test]
    fn rejects_truncated_body() {
        let buf = b"P6\n2\n2\n255\n\x00\x00\x00".to_vec();
        assert!(decode(&buf).is_err());
    }
}
