//! Out-of-scope collaborator (§1): device discovery and framebuffer
//! acquisition. Opens the primary DRM node, resolves the first CRTC's
//! bound framebuffer, exports its buffer object as a dma-buf, and maps it
//! read-only. The core never sees a `drm`-crate type directly — only the
//! plain [`FramebufferView`] values this module produces.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, RawFd};

use drm::control::{connector, Device as ControlDevice};
use drm::Device as BasicDevice;
use memmap2::{Mmap, MmapOptions};

use crate::error::CaptureError;
use crate::fourcc::{Layout, Modifier, PixelFormat};

/// Minimal wrapper giving the `drm` crate the file descriptor it needs;
/// this crate never issues raw ioctls other than vblank (§ `vblank.rs`),
/// which borrows the same fd.
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

/// A read-only mapped view over the primary display's scanout buffer,
/// plus the metadata the detiler needs to interpret it (§1, §3).
pub struct FramebufferView {
    pub width: u32,
    pub height: u32,
    pub pitch_bytes: u32,
    pub format: PixelFormat,
    pub layout: Layout,
    pub refresh_hz: u32,
    map: Mmap,
    card_fd: RawFd,
}

impl FramebufferView {
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Raw fd of the opened DRM primary node, kept alive for the vblank
    /// clock (§4.3) to issue `DRM_IOCTL_WAIT_VBLANK` against.
    pub fn device_fd(&self) -> RawFd {
        self.card_fd
    }
}

const DEFAULT_PRIMARY_NODE: &str = "/dev/dri/card0";

/// Open the primary DRM node, find the first active CRTC, resolve its
/// framebuffer, export it as a dma-buf, and map it read-only (§1).
/// Any failure here is a resource-acquisition error and fatal (§7).
pub fn open_primary_framebuffer() -> Result<FramebufferView, CaptureError> {
    open_framebuffer_at(DEFAULT_PRIMARY_NODE)
}

pub fn open_framebuffer_at(path: &str) -> Result<FramebufferView, CaptureError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| CaptureError::ResourceAcquisition(format!("open {path}: {e}")))?;
    let card = Card(file);
    let card_fd = card.0.as_raw_fd();

    let res = card
        .resource_handles()
        .map_err(|e| CaptureError::ResourceAcquisition(format!("get resource handles: {e}")))?;

    let crtc_id = *res
        .crtcs()
        .first()
        .ok_or_else(|| CaptureError::ResourceAcquisition("no CRTCs found".into()))?;

    let crtc_info = card
        .get_crtc(crtc_id)
        .map_err(|e| CaptureError::ResourceAcquisition(format!("get_crtc: {e}")))?;

    let fb_id = crtc_info
        .framebuffer()
        .ok_or_else(|| CaptureError::ResourceAcquisition("CRTC has no bound framebuffer".into()))?;

    let fb_info = card
        .get_planar_framebuffer(fb_id)
        .map_err(|e| CaptureError::ResourceAcquisition(format!("get_framebuffer: {e}")))?;

    let refresh_hz = first_connected_mode_refresh(&card, &res).unwrap_or(60);

    let buffer_handle = fb_info
        .handle()
        .ok_or_else(|| CaptureError::ResourceAcquisition("framebuffer has no buffer handle".into()))?;

    let dmabuf_fd = card
        .buffer_to_prime_fd(buffer_handle, 0)
        .map_err(|e| CaptureError::ResourceAcquisition(format!("export dma-buf: {e}")))?;

    let size = fb_info.pitch() as usize * fb_info.size().1 as usize;
    let map = unsafe {
        MmapOptions::new()
            .len(size)
            .map_copy_read_only(&dmabuf_fd)
            .map_err(|e| CaptureError::ResourceAcquisition(format!("mmap framebuffer: {e}")))?
    };

    let format = PixelFormat::from_fourcc(fb_info.pixel_format().as_fourcc());
    let layout = Layout::from_modifier(Modifier {
        vendor: fb_info.modifier_vendor(),
        code: fb_info.modifier_code(),
    });

    Ok(FramebufferView {
        width: fb_info.size().0,
        height: fb_info.size().1,
        pitch_bytes: fb_info.pitch(),
        format,
        layout,
        refresh_hz,
        map,
        card_fd,
    })
}

/// Best-effort refresh rate lookup: the first connected connector's first
/// advertised mode (not necessarily its preferred one). Falls back to 60 Hz
/// in [`open_framebuffer_at`] if this fails or nothing is connected, since
/// §4.5 only needs an approximate `frame_duration_ns`.
fn first_connected_mode_refresh(card: &Card, res: &drm::control::ResourceHandles) -> Option<u32> {
    for &conn_id in res.connectors() {
        let info = card.get_connector(conn_id, false).ok()?;
        if info.state() == connector::State::Connected {
            if let Some(mode) = info.modes().first() {
                return Some(mode.vrefresh());
            }
        }
    }
    None
}
