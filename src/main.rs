//! Binary entry point: parses flags, resolves the mode, and dispatches to
//! info-dump, screenshot, or record.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;

use screencap::cli::{Args, Mode, RawArgs};
use screencap::detile::detile_strip;
use screencap::device;
use screencap::driver::{self, RecordingSession};
use screencap::encoder::X264Encoder;
use screencap::error::CaptureError;
use screencap::geometry::Geometry;
use screencap::ppm;
use screencap::vblank::{DrmVblank, VblankClock};

fn main() -> ExitCode {
    #[cfg(feature = "cli")]
    env_logger::init();

    let raw_argv: Vec<String> = std::env::args().collect();
    let raw = RawArgs::parse();
    let args = match raw.resolve(&raw_argv) {
        Ok(args) => args,
        Err(e) => return fatal(e),
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fatal(e),
    }
}

fn fatal(e: CaptureError) -> ExitCode {
    log::error!("{e}");
    ExitCode::FAILURE
}

fn run(args: Args) -> Result<(), CaptureError> {
    match args.mode {
        Mode::DumpInfo => dump_info(),
        Mode::Screenshot => take_screenshot(&args),
        Mode::Record => record(&args),
    }
}

fn dump_info() -> Result<(), CaptureError> {
    let fb = device::open_primary_framebuffer()?;
    println!("device: primary DRM node");
    println!("resolution: {}x{}", fb.width, fb.height);
    println!("pitch: {} bytes", fb.pitch_bytes);
    println!("format: {:?}", fb.format);
    println!("layout: {:?}", fb.layout);
    println!("refresh: {} Hz", fb.refresh_hz);
    Ok(())
}

fn take_screenshot(args: &Args) -> Result<(), CaptureError> {
    let fb = device::open_primary_framebuffer()?;
    let geom = Geometry::from_args(&args.geometry, fb.width, fb.height);
    geom.validate(fb.width, fb.height)?;

    let mut rgb = vec![0u8; geom.w as usize * geom.h as usize * 3];
    detile_strip(
        fb.bytes(),
        fb.pitch_bytes as usize,
        fb.format,
        fb.layout,
        geom,
        0,
        geom.h as usize,
        &mut rgb,
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    ppm::encode(geom.w, geom.h, &rgb, &mut out)?;
    out.flush().map_err(CaptureError::Io)
}

fn record(args: &Args) -> Result<(), CaptureError> {
    let output = args.output.as_ref().ok_or(CaptureError::MissingOutput)?;

    let fb = device::open_primary_framebuffer()?;
    let geom = Geometry::from_args(&args.geometry, fb.width, fb.height);
    geom.validate(fb.width, fb.height)?;

    let encoder = X264Encoder::configure(geom.w, geom.h, &args.preset)?;
    let vblank = VblankClock::new(DrmVblank::new(fb.device_fd()), args.record_every_th as u64);
    let worker_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let session = RecordingSession {
        src: fb.bytes(),
        pitch: fb.pitch_bytes as usize,
        format: fb.format,
        layout: fb.layout,
        geom,
        refresh_hz: fb.refresh_hz,
        recording_interval: args.record_every_th as u64,
        vblank,
        encoder,
        worker_count,
    };

    driver::record(session, output)
}
