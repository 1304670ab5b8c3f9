//! C8: flag parsing and mode resolution (§6). Mutually exclusive modes
//! with "last flag seen wins" semantics, matched the way the teacher
//! resolves its own competing `--csv`/`--json`/`--format` flags.

use std::path::PathBuf;

use clap::Parser;

use crate::error::CaptureError;
use crate::geometry::{parse_geometry, Geometry, RawGeometry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    DumpInfo,
    Screenshot,
    Record,
}

#[derive(Parser, Debug)]
#[command(name = "screencap")]
#[command(about = "Capture the primary display's scanout framebuffer to H.264/Matroska", long_about = None)]
pub struct RawArgs {
    /// Enumerate devices and print a textual report to standard output.
    #[arg(short = 'd', long = "dump-info", action = clap::ArgAction::SetTrue)]
    dump_info: bool,

    /// Emit a binary PPM screenshot to standard output.
    #[arg(short = 's', long = "take-screenshot", action = clap::ArgAction::SetTrue)]
    take_screenshot: bool,

    /// Record to the file given by --output until standard input becomes readable.
    #[arg(short = 'r', long = "record-screen", action = clap::ArgAction::SetTrue)]
    record_screen: bool,

    /// Encoder preset string.
    #[arg(short = 'p', long = "preset", default_value = "medium")]
    pub preset: String,

    /// Sub-rectangle: X,Y[,WxH].
    #[arg(short = 'g', long = "geometry")]
    geometry: Option<String>,

    /// Captured-frame interval in vblanks, 1..=9.
    #[arg(short = 'y', long = "record-every-th", default_value_t = 1)]
    pub record_every_th: u8,

    /// Output file (required for --record-screen).
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

/// Fully resolved configuration handed to `main`'s dispatch.
pub struct Args {
    pub mode: Mode,
    pub preset: String,
    pub geometry: Option<RawGeometry>,
    pub record_every_th: u8,
    pub output: Option<PathBuf>,
}

impl RawArgs {
    /// Resolve the mode flags using "the last mode flag seen wins" (§6).
    /// `clap` gives us presence, not order, for plain boolean flags, so
    /// order is recovered from `std::env::args` the same way the teacher
    /// resolves `--csv`/`--json`/`--format` precedence in `main.rs`
    /// (there: fixed precedence; here: textual order, since §6 calls for
    /// "last flag seen", not a fixed priority).
    pub fn resolve(self, raw_argv: &[String]) -> Result<Args, CaptureError> {
        let mode = last_mode_flag(raw_argv).unwrap_or(if self.dump_info {
            Mode::DumpInfo
        } else if self.take_screenshot {
            Mode::Screenshot
        } else {
            Mode::Record
        });

        if mode == Mode::Record && self.output.is_none() {
            return Err(CaptureError::MissingOutput);
        }

        if !(1..=9).contains(&self.record_every_th) {
            return Err(CaptureError::InvalidRecordInterval(self.record_every_th));
        }

        let geometry = match &self.geometry {
            Some(raw) => Some(parse_geometry(raw)?),
            None => None,
        };

        Ok(Args {
            mode,
            preset: self.preset,
            geometry,
            record_every_th: self.record_every_th,
            output: self.output,
        })
    }
}

fn last_mode_flag(argv: &[String]) -> Option<Mode> {
    let mut found = None;
    for arg in argv {
        found = match arg.as_str() {
            "-d" | "--dump-info" => Some(Mode::DumpInfo),
            "-s" | "--take-screenshot" => Some(Mode::Screenshot),
            "-r" | "--record-screen" => Some(Mode::Record),
            _ => found,
        };
    }
    found
}

impl Geometry {
    /// Resolve against a known framebuffer size, or default to the full
    /// frame if no `--geometry` flag was given.
    pub fn from_args(raw: &Option<RawGeometry>, fb_w: u32, fb_h: u32) -> Geometry {
        match raw {
            Some(raw) => raw.resolve(fb_w, fb_h),
            None => Geometry::full(fb_w, fb_h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn last_flag_wins_regardless_of_clap_booleans() {
        let args = argv("screencap -d -r -o out.mkv");
        assert_eq!(last_mode_flag(&args), Some(Mode::Record));
        let args2 = argv("screencap -r -o out.mkv -d");
        assert_eq!(last_mode_flag(&args2), Some(Mode::DumpInfo));
    }

    #[test]
    fn record_without_output_is_an_error() {
        let raw = RawArgs {
            dump_info: false,
            take_screenshot: false,
            record_screen: true,
            preset: "medium".into(),
            geometry: None,
            record_every_th: 1,
            output: None,
        };
        let argv = argv("screencap -r");
        assert!(raw.resolve(&argv).is_err());
    }

    #[test]
    fn rejects_record_every_th_out_of_range() {
        let argv = argv("screencap -r -o out.mkv");
        let zero = RawArgs {
            dump_info: false,
            take_screenshot: false,
            record_screen: true,
            preset: "medium".into(),
            geometry: None,
            record_every_th: 0,
            output: Some(PathBuf::from("out.mkv")),
        };
        assert!(zero.resolve(&argv).is_err());

        let too_high = RawArgs {
            dump_info: false,
            take_screenshot: false,
            record_screen: true,
            preset: "medium".into(),
            geometry: None,
            record_every_th: 10,
            output: Some(PathBuf::from("out.mkv")),
        };
        assert!(too_high.resolve(&argv).is_err());
    }

    #[test]
    fn record_with_output_resolves() {
        let raw = RawArgs {
            dump_info: false,
            take_screenshot: false,
            record_screen: true,
            preset: "fast".into(),
            geometry: None,
            record_every_th: 2,
            output: Some(PathBuf::from("out.mkv")),
        };
        let argv = argv("screencap -r -o out.mkv");
        let resolved = raw.resolve(&argv).unwrap();
        assert_eq!(resolved.mode, Mode::Record);
        assert_eq!(resolved.record_every_th, 2);
    }
}
