//! Source pixel format and layout modifier, with the §4.1 "unsupported ->
//! warn and fall back" policy.

use log::warn;

/// DRM fourcc pixel formats this crate knows how to detile. Only XR24
/// (`DRM_FORMAT_XRGB8888`) is specified; anything else falls back to it
/// with a warning (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Xrgb8888,
}

/// `DRM_FORMAT_XRGB8888` little-endian fourcc bytes: 'X','R','2','4'.
pub const XRGB8888_FOURCC: u32 = u32::from_le_bytes(*b"XR24");

impl PixelFormat {
    pub fn from_fourcc(fourcc: u32) -> Self {
        if fourcc == XRGB8888_FOURCC {
            PixelFormat::Xrgb8888
        } else {
            warn!(
                "unsupported fourcc 0x{fourcc:08x}, proceeding as XR24"
            );
            PixelFormat::Xrgb8888
        }
    }
}

/// Vendor + code pair identifying a framebuffer's memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modifier {
    pub vendor: u8,
    pub code: u64,
}

/// The layouts this crate's detiler implements (§4.1, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Linear,
    XTiled4k,
}

/// DRM vendor id for Intel, and the modifier code for the 4 KiB X-tiled
/// layout (`I915_FORMAT_MOD_X_TILED`).
const DRM_FORMAT_MOD_VENDOR_INTEL: u8 = 0x01;
const I915_FORMAT_MOD_X_TILED: u64 = 1;
const DRM_FORMAT_MOD_LINEAR: u64 = 0;

impl Layout {
    pub fn from_modifier(modifier: Modifier) -> Self {
        match (modifier.vendor, modifier.code) {
            (_, DRM_FORMAT_MOD_LINEAR) => Layout::Linear,
            (DRM_FORMAT_MOD_VENDOR_INTEL, I915_FORMAT_MOD_X_TILED) => Layout::XTiled4k,
            _ => {
                warn!(
                    "unsupported layout modifier (vendor=0x{:02x}, code={}), proceeding as linear",
                    modifier.vendor, modifier.code
                );
                Layout::Linear
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_xr24() {
        assert_eq!(PixelFormat::from_fourcc(XRGB8888_FOURCC), PixelFormat::Xrgb8888);
    }

    #[test]
    fn falls_back_to_xr24_for_unknown_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(0xdeadbeef), PixelFormat::Xrgb8888);
    }

    #[test]
    fn recognizes_linear_and_x_tiled() {
        assert_eq!(
            Layout::from_modifier(Modifier { vendor: 0, code: DRM_FORMAT_MOD_LINEAR }),
            Layout::Linear
        );
        assert_eq!(
            Layout::from_modifier(Modifier {
                vendor: DRM_FORMAT_MOD_VENDOR_INTEL,
                code: I915_FORMAT_MOD_X_TILED
            }),
            Layout::XTiled4k
        );
    }

    #[test]
    fn falls_back_to_linear_for_unknown_modifier() {
        assert_eq!(
            Layout::from_modifier(Modifier { vendor: 0xff, code: 99 }),
            Layout::Linear
        );
    }
}
