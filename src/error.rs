use std::io;

use thiserror::Error;

/// Every fatal condition the pipeline can hit, grouped the way §7 of the
/// specification groups them. Warning-class conditions (unsupported
/// fourcc/modifier, frame skip, oversized NAL) are not represented here —
/// they are logged in place and the pipeline continues.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Passthrough for IO errors (open/read/write/seek).
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Device open, framebuffer inspect, export, stat, or map failed.
    #[error("resource acquisition failed: {0}")]
    ResourceAcquisition(String),

    /// Encoder create/configure/profile/alloc failed.
    #[error("encoder configuration failed: {0}")]
    EncoderConfiguration(String),

    /// The AVCDecoderConfigurationRecord, Track Entry, or Tracks element
    /// would exceed the 126-byte length-1 EBML size limit.
    #[error("{element} length {len} exceeds the 126-byte length-1 EBML limit")]
    ElementTooLarge { element: &'static str, len: usize },

    /// `wait_vblank` or the stdin readability poll failed.
    #[error("runtime capture failed: {0}")]
    RuntimeCapture(String),

    /// A seek required at finalization time failed.
    #[error("seek failed during finalization: {0}")]
    FinalizeSeek(#[source] io::Error),

    /// Geometry is out of bounds for the source framebuffer.
    #[error(
        "geometry ({x},{y},{w}x{h}) is out of bounds for a {fb_w}x{fb_h} framebuffer"
    )]
    GeometryOutOfBounds {
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        fb_w: u32,
        fb_h: u32,
    },

    /// `--geometry` could not be parsed.
    #[error("could not parse geometry {raw:?}: {reason}")]
    GeometrySyntax { raw: String, reason: &'static str },

    /// `-o`/`--output` was not given in record mode.
    #[error("--output is required in --record-screen mode")]
    MissingOutput,

    /// `-y`/`--record-every-th` was outside the 1..=9 range §4.3 mandates.
    #[error("--record-every-th must be in 1..=9, got {0}")]
    InvalidRecordInterval(u8),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
