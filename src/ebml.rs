//! Low-level EBML primitives the muxer builds on: element IDs, the
//! length-1 size encoding this format uses throughout, and a typed
//! "deferred length" handle for the back-patch pattern (§9's design
//! note: "a typed 'deferred length' handle returned when a size-bearing
//! element is opened, and resolved when the element is closed").

use std::io::{Seek, SeekFrom, Write};

use crate::error::CaptureError;

/// The length-1 EBML size marker: a 4-byte field whose top nibble is
/// `0x1`, leaving 28 usable bits. Used uniformly for Segment, Cluster and
/// SimpleBlock sizes per §9's resolution of the source's 28-vs-20-bit
/// inconsistency.
pub const LEN1_MARKER: u32 = 0x1000_0000;
pub const LEN1_MAX: u32 = 0x0FFF_FFFF;

/// The all-ones placeholder written where a size is not yet known. Any
/// 4-byte read of this value before it is resolved is a bug in the muxer.
const LEN1_PLACEHOLDER: [u8; 4] = [0x1F, 0xFF, 0xFF, 0xFF];

/// A size-bearing EBML element whose length field was written as the
/// placeholder and must be resolved exactly once. Dropping a `DeferredLen`
/// without calling [`DeferredLen::resolve`] is a logic error; debug builds
/// catch it.
#[must_use = "every opened element must be resolved by close"]
pub struct DeferredLen {
    /// File offset of the 4-byte length field.
    field_offset: u64,
    resolved: bool,
}

impl DeferredLen {
    /// Write the 28-bit `value` over the placeholder at `field_offset`,
    /// restoring the writer's position to `field_offset + 4` is not
    /// required — callers seek again for whatever comes next.
    pub fn resolve<W: Write + Seek>(mut self, w: &mut W, value: u32) -> Result<(), CaptureError> {
        debug_assert!(value <= LEN1_MAX, "cluster/segment size exceeds 28 bits");
        let bytes = (LEN1_MARKER | (value & LEN1_MAX)).to_be_bytes();
        let here = w.stream_position().map_err(CaptureError::FinalizeSeek)?;
        w.seek(SeekFrom::Start(self.field_offset))
            .map_err(CaptureError::FinalizeSeek)?;
        w.write_all(&bytes).map_err(CaptureError::Io)?;
        w.seek(SeekFrom::Start(here)).map_err(CaptureError::FinalizeSeek)?;
        self.resolved = true;
        Ok(())
    }
}

#[cfg(debug_assertions)]
impl Drop for DeferredLen {
    fn drop(&mut self) {
        if !self.resolved {
            panic!("DeferredLen at offset {} dropped without being resolved", self.field_offset);
        }
    }
}

/// Write an EBML element ID verbatim (IDs are already in their wire form,
/// e.g. `0x1A45DFA3` for the EBML header).
pub fn write_id<W: Write>(w: &mut W, id: &[u8]) -> Result<(), CaptureError> {
    w.write_all(id).map_err(CaptureError::Io)
}

/// Write a known-size length-1 field (`0x80 | len`), for sizes `< 0x7F`.
/// Used for the small fixed-shape sub-elements (Timestamp, CueTime, ...)
/// whose size never needs back-patching.
pub fn write_len1(w: &mut impl Write, len: u8) -> Result<(), CaptureError> {
    debug_assert!(len < 0x7F);
    w.write_all(&[0x80 | len]).map_err(CaptureError::Io)
}

/// Open a size-bearing element: write its ID, then a 4-byte placeholder
/// length field, and return the handle that must later [`DeferredLen::resolve`]
/// it. Returns the file offset the placeholder was written at.
pub fn open_deferred<W: Write + Seek>(w: &mut W, id: &[u8]) -> Result<DeferredLen, CaptureError> {
    write_id(w, id)?;
    let field_offset = w.stream_position().map_err(CaptureError::FinalizeSeek)?;
    w.write_all(&LEN1_PLACEHOLDER).map_err(CaptureError::Io)?;
    Ok(DeferredLen { field_offset, resolved: false })
}

/// Write a fixed-size (known up front) length-1 element body: ID, the
/// literal size byte(s), then the body. `len` must fit one byte
/// (`< 0x7F`); everything here stays well under that.
pub fn write_element(w: &mut impl Write, id: &[u8], body: &[u8]) -> Result<(), CaptureError> {
    write_id(w, id)?;
    write_len1(w, body.len() as u8)?;
    w.write_all(body).map_err(CaptureError::Io)
}

/// Validate a body length against the ≤126-byte length-1 EBML limit
/// (§4.5: CodecPrivate, Track Entry, Tracks must each satisfy this).
pub fn check_len1_limit(element: &'static str, len: usize) -> Result<(), CaptureError> {
    if len > 126 {
        Err(CaptureError::ElementTooLarge { element, len })
    } else {
        Ok(())
    }
}

/// Big-endian, minimum-width unsigned-int encoding used for EBML UInt
/// element bodies (TrackNumber, TrackUID, TimestampScale, ...).
pub fn uint_bytes(value: u64) -> Vec<u8> {
    let full = value.to_be_bytes();
    let first_nonzero = full.iter().position(|&b| b != 0).unwrap_or(7);
    full[first_nonzero..].to_vec()
}

pub fn current_offset<W: Seek>(w: &mut W) -> Result<u64, CaptureError> {
    w.stream_position().map_err(CaptureError::FinalizeSeek)
}

/// A plain 4-byte big-endian field whose value isn't known at the point
/// it's written — used for the SeekHead's Cues-position slot, which can
/// only be resolved once the Cues element itself has been written.
/// Distinct from [`DeferredLen`]: this is a raw position value, not a
/// length-1 EBML size.
#[must_use = "every deferred field must be resolved"]
pub struct DeferredField {
    offset: u64,
    resolved: bool,
}

impl DeferredField {
    pub fn resolve<W: Write + Seek>(mut self, w: &mut W, value: u32) -> Result<(), CaptureError> {
        let here = w.stream_position().map_err(CaptureError::FinalizeSeek)?;
        w.seek(SeekFrom::Start(self.offset)).map_err(CaptureError::FinalizeSeek)?;
        w.write_all(&value.to_be_bytes()).map_err(CaptureError::Io)?;
        w.seek(SeekFrom::Start(here)).map_err(CaptureError::FinalizeSeek)?;
        self.resolved = true;
        Ok(())
    }
}

#[cfg(debug_assertions)]
impl Drop for DeferredField {
    fn drop(&mut self) {
        if !self.resolved {
            panic!("DeferredField at offset {} dropped without being resolved", self.offset);
        }
    }
}

/// Write a 4-byte zero placeholder and return a handle to resolve it later.
pub fn open_deferred_field<W: Write + Seek>(w: &mut W) -> Result<DeferredField, CaptureError> {
    let offset = w.stream_position().map_err(CaptureError::FinalizeSeek)?;
    w.write_all(&[0u8; 4]).map_err(CaptureError::Io)?;
    Ok(DeferredField { offset, resolved: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn deferred_len_resolves_in_place() {
        let mut buf = Cursor::new(Vec::new());
        write_id(&mut buf, &[0xAA]).unwrap();
        let handle = open_deferred(&mut buf, &[0xBB]).unwrap();
        buf.write_all(&[1, 2, 3]).unwrap();
        handle.resolve(&mut buf, 3).unwrap();

        let data = buf.into_inner();
        assert_eq!(data[0], 0xAA);
        assert_eq!(data[1], 0xBB);
        assert_eq!(&data[2..6], &(LEN1_MARKER | 3).to_be_bytes());
        assert_eq!(&data[6..9], &[1, 2, 3]);
    }

    #[test]
    fn uint_bytes_trims_leading_zeros() {
        assert_eq!(uint_bytes(0), vec![0]);
        assert_eq!(uint_bytes(1), vec![1]);
        assert_eq!(uint_bytes(256), vec![1, 0]);
        assert_eq!(uint_bytes(1), vec![0x01]);
    }

    #[test]
    fn rejects_oversize_len1_element() {
        assert!(check_len1_limit("Tracks", 127).is_err());
        assert!(check_len1_limit("Tracks", 126).is_ok());
    }
}
