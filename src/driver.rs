//! C7: the top-level per-frame loop (§4.7). Sequences the vblank clock,
//! worker pool, encoder and muxer; owns cluster-rollover trigger state
//! only insofar as it decides when to hand a new IDR to the muxer (the
//! muxer itself does the rollover bookkeeping, per §4.5's scaffold
//! invariants); observes the stop signal on standard input; and runs
//! finalization exactly once.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::encoder::Encoder;
use crate::error::CaptureError;
use crate::fourcc::{Layout, PixelFormat};
use crate::geometry::Geometry;
use crate::mux::{Muxer, TrackConfig};
use crate::vblank::VblankClock;
use crate::vblank::VblankSource;
use crate::workers::spawn_workers;

/// Everything the driver needs that isn't itself (framebuffer bytes,
/// geometry, pitch/format/layout) plus the file it writes to.
pub struct RecordingSession<'a, S: VblankSource, E: Encoder> {
    pub src: &'a [u8],
    pub pitch: usize,
    pub format: PixelFormat,
    pub layout: Layout,
    pub geom: Geometry,
    pub refresh_hz: u32,
    pub recording_interval: u64,
    pub vblank: VblankClock<S>,
    pub encoder: E,
    pub worker_count: usize,
}

const OUTPUT_FILE_MODE: u32 = 0o644;

/// Create (truncating) the output file at `path` with explicit `0644`
/// permissions (§9: "the source opens without a mode argument ...
/// implementers should pass explicit 0644 permissions").
fn create_output_file(path: &Path) -> Result<BufWriter<std::fs::File>, CaptureError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(OUTPUT_FILE_MODE)
        .open(path)
        .map_err(CaptureError::Io)?;
    Ok(BufWriter::new(file))
}

/// Non-blocking readability check on standard input (§4.7 step 5, §5).
fn stdin_readable() -> Result<bool, CaptureError> {
    let stdin_fd = std::io::stdin();
    let mut fds = [PollFd::new(stdin_fd.as_fd_for_poll(), PollFlags::POLLIN)];
    let n = poll(&mut fds, PollTimeout::ZERO)
        .map_err(|e| CaptureError::RuntimeCapture(format!("poll(stdin): {e}")))?;
    Ok(n > 0 && fds[0].any().unwrap_or(false))
}

/// Small extension so `driver.rs` reads naturally as "ask stdin if it's
/// readable" without importing `AsFd` at every call site.
trait AsFdForPoll {
    fn as_fd_for_poll(&self) -> std::os::fd::BorrowedFd<'_>;
}

impl AsFdForPoll for std::io::Stdin {
    fn as_fd_for_poll(&self) -> std::os::fd::BorrowedFd<'_> {
        use std::os::fd::AsFd;
        self.as_fd()
    }
}

/// Run the record loop to completion: writes the full scaffold, captures
/// frames until stdin becomes readable, and finalizes exactly once.
pub fn record<S: VblankSource, E: Encoder>(
    session: RecordingSession<'_, S, E>,
    output_path: &Path,
) -> Result<(), CaptureError> {
    let out = create_output_file(output_path)?;
    let mut out = record_into(session, out, stdin_readable)?;
    out.flush().map_err(CaptureError::Io)?;
    out.get_mut().sync_all().map_err(CaptureError::Io)?;
    Ok(())
}

/// The loop itself, parameterized over the output writer and the
/// cancellation check so tests can drive it with an in-memory buffer and
/// a scripted stop condition instead of a real file and standard input.
/// Returns the writer after finalization so the caller can flush/sync it.
pub fn record_into<S, E, W>(
    mut session: RecordingSession<'_, S, E>,
    out: W,
    mut should_stop: impl FnMut() -> Result<bool, CaptureError>,
) -> Result<W, CaptureError>
where
    S: VblankSource,
    E: Encoder,
    W: Write + std::io::Seek,
{

    let headers = session.encoder.headers()?;
    let sps = headers
        .iter()
        .find(|n| n.kind == crate::encoder::NalKind::Sps)
        .map(|n| n.payload.clone())
        .ok_or_else(|| CaptureError::EncoderConfiguration("encoder produced no SPS".into()))?;
    let pps = headers
        .iter()
        .find(|n| n.kind == crate::encoder::NalKind::Pps)
        .map(|n| n.payload.clone())
        .ok_or_else(|| CaptureError::EncoderConfiguration("encoder produced no PPS".into()))?;

    let frame_duration_ns = (1_000_000_000f64 / session.refresh_hz as f64).round() as u64;
    let track_config = TrackConfig {
        width: session.geom.w,
        height: session.geom.h,
        frame_duration_ns,
        recording_interval: session.recording_interval,
        sps,
        pps,
    };
    let mut muxer = Muxer::open(out, &track_config)?;

    let w = session.geom.w as usize;
    let h = session.geom.h as usize;
    let mut rgb = vec![0u8; w * h * 3];

    let mut num_frames_within_cluster: u64 = 0;
    let mut last_vblank: u64 = 0;
    let mut started = false;

    let rgb_ptr = rgb.as_mut_ptr();
    let rgb_len = rgb.len();

    let result = std::thread::scope(|scope| -> Result<(), CaptureError> {
        // SAFETY: `rgb` outlives this scope (it's dropped after `result` is
        // unwrapped below), `rgb_len` matches its allocation, and every
        // read of `rgb` in this closure happens after `barrier.run_frame()`
        // has returned, i.e. only when no worker strip is live.
        let barrier = unsafe {
            spawn_workers(
                scope,
                session.worker_count,
                session.src,
                rgb_ptr,
                rgb_len,
                session.pitch,
                session.format,
                session.layout,
                session.geom,
            )
        };

        loop {
            let tick = session.vblank.tick()?;
            if !started {
                last_vblank = tick.sequence;
                started = true;
            } else {
                num_frames_within_cluster += tick.sequence.saturating_sub(last_vblank);
                last_vblank = tick.sequence;
            }

            barrier.run_frame();

            let nals = session
                .encoder
                .encode(&rgb, num_frames_within_cluster as i64)?;

            for nal in &nals {
                let frame_ticks = num_frames_within_cluster * frame_duration_ns;
                muxer.write_nal(nal, frame_ticks)?;
            }

            if should_stop()? {
                break;
            }
        }

        barrier.shutdown();
        Ok(())
    });
    result?;

    muxer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, Nal, NalKind};
    use crate::vblank::{VblankClock, VblankRequest, VblankSource};
    use std::io::Cursor;

    struct SteadyVblank {
        seq: u64,
    }

    impl VblankSource for SteadyVblank {
        fn wait_vblank(&mut self, req: VblankRequest) -> Result<u64, CaptureError> {
            match req {
                VblankRequest::RelativeNext => {
                    self.seq += 1;
                    Ok(self.seq)
                }
                VblankRequest::Absolute(target) => {
                    self.seq = target;
                    Ok(self.seq)
                }
            }
        }
    }

    /// Emits an IDR every `gop` frames (including frame 0), non-IDR otherwise.
    struct GopEncoder {
        gop: u64,
        frame: u64,
    }

    impl Encoder for GopEncoder {
        fn headers(&mut self) -> Result<Vec<Nal>, CaptureError> {
            Ok(vec![
                Nal { kind: NalKind::Sps, payload: vec![0x67, 0x42, 0xc0, 0x1f] },
                Nal { kind: NalKind::Pps, payload: vec![0x68, 0xce, 0x3c, 0x80] },
            ])
        }

        fn encode(&mut self, _rgb: &[u8], pts: i64) -> Result<Vec<Nal>, CaptureError> {
            let is_idr = self.frame % self.gop == 0;
            self.frame += 1;
            let kind = if is_idr { NalKind::Idr } else { NalKind::NonIdr };
            let mut payload = vec![if is_idr { 0x65 } else { 0x41 }];
            payload.extend_from_slice(&(pts as u32).to_be_bytes());
            Ok(vec![Nal { kind, payload }])
        }
    }

    fn segment_size_backpatch_matches_eof(data: &[u8]) -> bool {
        let needle = [0x18, 0x53, 0x80, 0x67];
        let segment_id_at = data
            .windows(4)
            .position(|w| w == needle)
            .expect("Segment ID present");
        let field_start = segment_id_at + 4;
        let field = u32::from_be_bytes(data[field_start..field_start + 4].try_into().unwrap());
        let size = (field & crate::ebml::LEN1_MAX) as u64;
        let segment_body_start = (field_start + 4) as u64;
        size == data.len() as u64 - segment_body_start
    }

    // Seed scenario 6: 200 frames, 3 IDRs, finalization back-patches cleanly.
    #[test]
    fn finalizes_after_200_frames_with_3_idrs() {
        let w = 4usize;
        let h = 4usize;
        let pitch = w * 4;
        let src = vec![0u8; pitch * h];
        let geom = Geometry { x: 0, y: 0, w: w as u32, h: h as u32 };

        let session = RecordingSession {
            src: &src,
            pitch,
            format: PixelFormat::Xrgb8888,
            layout: Layout::Linear,
            geom,
            refresh_hz: 60,
            recording_interval: 1,
            vblank: VblankClock::new(SteadyVblank { seq: 0 }, 1),
            encoder: GopEncoder { gop: 70, frame: 0 },
            worker_count: 2,
        };

        let mut ticks = 0u32;
        let out = record_into(session, Cursor::new(Vec::new()), || {
            ticks += 1;
            Ok(ticks >= 200)
        })
        .unwrap();

        let data = out.into_inner();
        assert!(!data.is_empty());
        assert!(segment_size_backpatch_matches_eof(&data));
    }

    // Seed scenario 5: an early IDR forces a cluster rollover right away.
    #[test]
    fn idr_on_first_frame_still_produces_valid_scaffold() {
        let w = 2usize;
        let h = 2usize;
        let pitch = w * 4;
        let src = vec![0u8; pitch * h];
        let geom = Geometry { x: 0, y: 0, w: w as u32, h: h as u32 };

        let session = RecordingSession {
            src: &src,
            pitch,
            format: PixelFormat::Xrgb8888,
            layout: Layout::Linear,
            geom,
            refresh_hz: 60,
            recording_interval: 1,
            vblank: VblankClock::new(SteadyVblank { seq: 0 }, 1),
            encoder: GopEncoder { gop: 1, frame: 0 }, // every frame is an IDR
            worker_count: 1,
        };

        let mut ticks = 0u32;
        let out = record_into(session, Cursor::new(Vec::new()), || {
            ticks += 1;
            Ok(ticks >= 10)
        })
        .unwrap();

        let data = out.into_inner();
        assert!(segment_size_backpatch_matches_eof(&data));
    }
}
