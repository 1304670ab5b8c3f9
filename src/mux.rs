//! C5 + C6: the hand-built Matroska container writer (§4.5) and its
//! append-only cue index (§4.6).
//!
//! Scaffold order matches §4.5: EBML header, Segment (size back-patched at
//! finalization), SeekHead (Tracks/Info positions known up front, Cues
//! position back-patched), Tracks, Info, a stream of Clusters, Cues.

use std::io::{Seek, Write};

use crate::ebml::{
    check_len1_limit, current_offset, open_deferred, open_deferred_field, uint_bytes,
    write_element, write_id, write_len1, DeferredField, DeferredLen,
};
use crate::encoder::Nal;
use crate::error::CaptureError;

const ID_EBML_HEADER: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const ID_EBML_VERSION: [u8; 2] = [0x42, 0x86];
const ID_EBML_READ_VERSION: [u8; 2] = [0x42, 0xF7];
const ID_EBML_MAX_ID_LENGTH: [u8; 2] = [0x42, 0xF2];
const ID_EBML_MAX_SIZE_LENGTH: [u8; 2] = [0x42, 0xF3];
const ID_DOC_TYPE: [u8; 2] = [0x42, 0x82];
const ID_DOC_TYPE_VERSION: [u8; 2] = [0x42, 0x87];
const ID_DOC_TYPE_READ_VERSION: [u8; 2] = [0x42, 0x85];

const ID_SEGMENT: [u8; 4] = [0x18, 0x53, 0x80, 0x67];
const ID_SEEK_HEAD: [u8; 4] = [0x11, 0x4D, 0x9B, 0x74];
const ID_SEEK: [u8; 2] = [0x4D, 0xBB];
const ID_SEEK_ID: [u8; 2] = [0x53, 0xAB];
const ID_SEEK_POSITION: [u8; 2] = [0x53, 0xAC];

const ID_INFO: [u8; 4] = [0x15, 0x49, 0xA9, 0x66];
const ID_TIMESTAMP_SCALE: [u8; 3] = [0x2A, 0xD7, 0xB1];
const ID_MUXING_APP: [u8; 2] = [0x4D, 0x80];
const ID_WRITING_APP: [u8; 2] = [0x57, 0x41];

const ID_TRACKS: [u8; 4] = [0x16, 0x54, 0xAE, 0x6B];
const ID_TRACK_ENTRY: [u8; 1] = [0xAE];
const ID_TRACK_NUMBER: [u8; 1] = [0xD7];
const ID_TRACK_UID: [u8; 2] = [0x73, 0xC5];
const ID_TRACK_TYPE: [u8; 1] = [0x83];
const ID_DEFAULT_DURATION: [u8; 3] = [0x23, 0xE3, 0x83];
const ID_CODEC_ID: [u8; 1] = [0x86];
const ID_CODEC_PRIVATE: [u8; 2] = [0x63, 0xA2];
const ID_VIDEO: [u8; 1] = [0xE0];
const ID_PIXEL_WIDTH: [u8; 1] = [0xB0];
const ID_PIXEL_HEIGHT: [u8; 1] = [0xBA];

const ID_CLUSTER: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];
const ID_TIMESTAMP: [u8; 1] = [0xE7];
const ID_SIMPLE_BLOCK: [u8; 1] = [0xA3];

const ID_CUES: [u8; 4] = [0x1C, 0x53, 0xBB, 0x6B];
const ID_CUE_POINT: [u8; 1] = [0xBB];
const ID_CUE_TIME: [u8; 1] = [0xB3];
const ID_CUE_TRACK_POSITIONS: [u8; 1] = [0xB7];
const ID_CUE_TRACK: [u8; 1] = [0xF7];
const ID_CUE_CLUSTER_POSITION: [u8; 1] = [0xF1];
const ID_CUE_RELATIVE_POSITION: [u8; 1] = [0xF0];

const TRACK_NUMBER: u64 = 1;
const TRACK_UID: u64 = 1;
const TRACK_TYPE_VIDEO: u64 = 1;
const SIMPLE_BLOCK_TRACK_BYTE: u8 = 0x81;
/// Running size of a freshly-opened cluster, measured from the first byte
/// after the Cluster's own size field (matching how `CueRelativePosition`
/// is defined): the Timestamp sub-element is 1-byte ID + 1-byte size + an
/// 8-byte body (§4.7: "starts at 10 for a freshly-opened cluster header").
const FRESH_CLUSTER_HEADER_LEN: u32 = 1 + 1 + 8;

/// One entry of the append-only cue index (§4.6), recorded per IDR.
#[derive(Debug, Clone, Copy)]
pub struct CueEntry {
    pub timestamp_ticks: u64,
    pub cluster_offset_in_segment: u32,
    pub block_offset_in_cluster: u32,
}

/// Append-only chunked list, chunk size 2048. The chunking itself has no
/// behavioral consequence once built on a `Vec` (§9: "semantics —
/// append-only, ordered — are all that matters"), so it's a `Vec<Vec<T>>`
/// with a fixed chunk capacity rather than a linked structure.
pub struct CueIndex {
    chunks: Vec<Vec<CueEntry>>,
    chunk_capacity: usize,
}

impl CueIndex {
    pub fn new() -> Self {
        CueIndex { chunks: vec![Vec::new()], chunk_capacity: 2048 }
    }

    pub fn push(&mut self, entry: CueEntry) {
        if self.chunks.last().unwrap().len() == self.chunk_capacity {
            self.chunks.push(Vec::new());
        }
        self.chunks.last_mut().unwrap().push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CueEntry> {
        self.chunks.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CueIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the cluster currently being written.
struct OpenCluster {
    handle: DeferredLen,
    offset_in_segment: u32,
    timestamp_ticks: u64,
    running_size: u32,
}

/// Track geometry and codec configuration fixed at recording start (§3:
/// "Geometry is fixed at recording start; it never changes mid-session").
pub struct TrackConfig {
    pub width: u32,
    pub height: u32,
    pub frame_duration_ns: u64,
    pub recording_interval: u64,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

/// The muxer itself: owns the output writer and every piece of mutable
/// scaffold state (open cluster, cue index, segment anchor).
pub struct Muxer<W: Write + Seek> {
    w: W,
    segment_body_start: u64,
    segment_len: DeferredLen,
    cues_position_field: DeferredField,
    cluster: Option<OpenCluster>,
    cues: CueIndex,
}

impl<W: Write + Seek> Muxer<W> {
    /// Write the full scaffold up to and including an initial empty
    /// cluster header at timestamp 0, per §4.7's driver initialization
    /// step. Consumes SPS/PPS from `config` to build the
    /// AVCDecoderConfigurationRecord.
    pub fn open(mut w: W, config: &TrackConfig) -> Result<Self, CaptureError> {
        write_ebml_header(&mut w)?;

        let segment_len = open_deferred(&mut w, &ID_SEGMENT)?;
        let segment_body_start = current_offset(&mut w)?;

        let tracks_buf = build_tracks_element(config)?;
        let info_buf = build_info_element(config)?;

        let seekhead_len = seekhead_encoded_len();
        let tracks_offset = seekhead_len;
        let info_offset = tracks_offset + tracks_buf.len() as u32;
        let cues_position_field = write_seekhead(&mut w, tracks_offset, info_offset)?;

        w.write_all(&tracks_buf).map_err(CaptureError::Io)?;
        w.write_all(&info_buf).map_err(CaptureError::Io)?;

        let mut muxer = Muxer {
            w,
            segment_body_start,
            segment_len,
            cues_position_field,
            cluster: None,
            cues: CueIndex::new(),
        };
        muxer.open_cluster(0)?;
        Ok(muxer)
    }

    fn offset_in_segment(&mut self) -> Result<u32, CaptureError> {
        Ok((current_offset(&mut self.w)? - self.segment_body_start) as u32)
    }

    fn open_cluster(&mut self, timestamp_ticks: u64) -> Result<(), CaptureError> {
        let offset_in_segment = self.offset_in_segment()?;
        let handle = open_deferred(&mut self.w, &ID_CLUSTER)?;
        write_element(&mut self.w, &ID_TIMESTAMP, &pad_u64_to_8(timestamp_ticks))?;
        self.cluster = Some(OpenCluster {
            handle,
            offset_in_segment,
            timestamp_ticks,
            running_size: FRESH_CLUSTER_HEADER_LEN,
        });
        Ok(())
    }

    fn close_cluster(&mut self) -> Result<(), CaptureError> {
        if let Some(cluster) = self.cluster.take() {
            cluster.handle.resolve(&mut self.w, cluster.running_size)?;
        }
        Ok(())
    }

    /// Emit one encoded NAL as a Matroska block (§4.5, §4.7 step 4).
    /// `cluster_ts_absolute` is the tick at which this NAL's cluster would
    /// live if no rollover happened; `ts_in_cluster` is computed by the
    /// caller against whichever cluster is current after this call's
    /// rollover decision.
    pub fn write_nal(&mut self, nal: &Nal, frame_ticks: u64) -> Result<(), CaptureError> {
        let nal_len = nal.payload.len();
        if nal_len + 4 > crate::ebml::LEN1_MAX as usize {
            log::warn!("dropping oversized NAL ({nal_len} bytes): exceeds 28-bit block size field");
            return Ok(());
        }

        let cluster_base = self.cluster.as_ref().map(|c| c.timestamp_ticks).unwrap_or(0);
        let mut ts_in_cluster = frame_ticks.saturating_sub(cluster_base);

        if ts_in_cluster > 0x7FFF || nal.kind.is_idr() {
            self.close_cluster()?;
            self.open_cluster(frame_ticks)?;
            ts_in_cluster = 0;
        }

        let cluster = self.cluster.as_ref().expect("cluster freshly opened above");
        let cluster_offset_in_segment = cluster.offset_in_segment;
        let block_offset_in_cluster = cluster.running_size;

        if nal.kind.is_idr() {
            self.cues.push(CueEntry {
                timestamp_ticks: frame_ticks,
                cluster_offset_in_segment,
                block_offset_in_cluster,
            });
        }

        write_id(&mut self.w, &ID_SIMPLE_BLOCK)?;
        let block_size = (nal_len + 4) as u32;
        self.w
            .write_all(&(crate::ebml::LEN1_MARKER | block_size).to_be_bytes())
            .map_err(CaptureError::Io)?;
        self.w.write_all(&[SIMPLE_BLOCK_TRACK_BYTE]).map_err(CaptureError::Io)?;
        self.w
            .write_all(&(ts_in_cluster as u16).to_be_bytes())
            .map_err(CaptureError::Io)?;
        self.w.write_all(&[0x00]).map_err(CaptureError::Io)?;
        self.w.write_all(&nal.payload).map_err(CaptureError::Io)?;

        if let Some(cluster) = self.cluster.as_mut() {
            cluster.running_size += nal_len as u32 + 9;
        }
        Ok(())
    }

    /// §4.7 finalization: close the last cluster, write Cues, back-patch
    /// the SeekHead's Cues position and the Segment total size. Returns
    /// the underlying writer so the caller can close/flush it.
    pub fn finalize(mut self) -> Result<W, CaptureError> {
        self.close_cluster()?;

        let cues_offset_in_segment = self.offset_in_segment()?;
        write_cues(&mut self.w, &self.cues)?;
        self.cues_position_field.resolve(&mut self.w, cues_offset_in_segment)?;

        let eof = current_offset(&mut self.w)?;
        let segment_size = (eof - self.segment_body_start) as u32;
        self.segment_len.resolve(&mut self.w, segment_size)?;

        Ok(self.w)
    }
}

fn pad_u64_to_8(v: u64) -> [u8; 8] {
    v.to_be_bytes()
}

fn write_ebml_header<W: Write>(w: &mut W) -> Result<(), CaptureError> {
    write_id(w, &ID_EBML_HEADER)?;
    let mut body = Vec::new();
    write_element(&mut body, &ID_EBML_VERSION, &[1])?;
    write_element(&mut body, &ID_EBML_READ_VERSION, &[1])?;
    write_element(&mut body, &ID_EBML_MAX_ID_LENGTH, &[4])?;
    write_element(&mut body, &ID_EBML_MAX_SIZE_LENGTH, &[8])?;
    write_element(&mut body, &ID_DOC_TYPE, b"matroska")?;
    write_element(&mut body, &ID_DOC_TYPE_VERSION, &[4])?;
    write_element(&mut body, &ID_DOC_TYPE_READ_VERSION, &[2])?;
    write_len1(w, body.len() as u8)?;
    w.write_all(&body).map_err(CaptureError::Io)
}

/// Exact encoded length of the SeekHead element this muxer always writes
/// (three fixed-shape Seek entries), computed without writing it so the
/// Tracks/Info offsets can be filled in immediately (§4.5 invariant).
fn seekhead_encoded_len() -> u32 {
    let seek_entry_len = |id: &[u8]| -> u32 {
        // Seek { SeekID(len1 body), SeekPosition(len1, 4-byte body) }
        let seek_id_len = 2 + 1 + id.len();
        let seek_position_len = 2 + 1 + 4;
        let seek_body_len = seek_id_len + seek_position_len;
        2 + 1 + seek_body_len as u32
    };
    let body_len = seek_entry_len(&ID_TRACKS) + seek_entry_len(&ID_INFO) + seek_entry_len(&ID_CUES);
    4 + 1 + body_len
}

fn write_seekhead<W: Write + Seek>(
    w: &mut W,
    tracks_offset: u32,
    info_offset: u32,
) -> Result<DeferredField, CaptureError> {
    let mut body = Vec::new();
    write_seek_entry(&mut body, &ID_TRACKS, tracks_offset)?;
    write_seek_entry(&mut body, &ID_INFO, info_offset)?;

    write_id(w, &ID_SEEK_HEAD)?;
    let full_body_len = body.len() as u32 + seek_entry_header_len(&ID_CUES);
    write_len1(w, full_body_len as u8)?;
    w.write_all(&body).map_err(CaptureError::Io)?;

    write_id(w, &ID_SEEK)?;
    let cues_seek_body_len = (2 + 1 + ID_CUES.len()) + (2 + 1 + 4);
    write_len1(w, cues_seek_body_len as u8)?;
    write_element(w, &ID_SEEK_ID, &ID_CUES)?;
    write_id(w, &ID_SEEK_POSITION)?;
    write_len1(w, 4)?;
    open_deferred_field(w)
}

fn seek_entry_header_len(id: &[u8]) -> u32 {
    let body_len = (2 + 1 + id.len()) + (2 + 1 + 4);
    2 + 1 + body_len as u32
}

fn write_seek_entry(buf: &mut Vec<u8>, id: &[u8], position: u32) -> Result<(), CaptureError> {
    let mut body = Vec::new();
    write_element(&mut body, &ID_SEEK_ID, id)?;
    write_element(&mut body, &ID_SEEK_POSITION, &position.to_be_bytes())?;
    write_element(buf, &ID_SEEK, &body)
}

fn build_info_element(config: &TrackConfig) -> Result<Vec<u8>, CaptureError> {
    let mut body = Vec::new();
    write_element(&mut body, &ID_TIMESTAMP_SCALE, &uint_bytes(1))?;
    write_element(&mut body, &ID_MUXING_APP, b"screencap")?;
    write_element(&mut body, &ID_WRITING_APP, b"screencap")?;
    let mut out = Vec::new();
    write_element(&mut out, &ID_INFO, &body)?;
    Ok(out)
}

/// Build the AVCDecoderConfigurationRecord (§4.5) from SPS+PPS.
fn avc_decoder_configuration_record(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut rec = vec![0x01, 0x42, 0xC0, 0x1F, 0xFF, 0xE1];
    rec.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    rec.extend_from_slice(sps);
    rec.push(0x01);
    rec.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    rec.extend_from_slice(pps);
    rec
}

fn build_tracks_element(config: &TrackConfig) -> Result<Vec<u8>, CaptureError> {
    let codec_private = avc_decoder_configuration_record(&config.sps, &config.pps);
    check_len1_limit("CodecPrivate", codec_private.len())?;

    let mut video = Vec::new();
    write_element(&mut video, &ID_PIXEL_WIDTH, &(config.width as u16).to_be_bytes())?;
    write_element(&mut video, &ID_PIXEL_HEIGHT, &(config.height as u16).to_be_bytes())?;

    let default_duration = config.frame_duration_ns * config.recording_interval;

    let mut entry = Vec::new();
    write_element(&mut entry, &ID_TRACK_NUMBER, &uint_bytes(TRACK_NUMBER))?;
    write_element(&mut entry, &ID_TRACK_UID, &uint_bytes(TRACK_UID))?;
    write_element(&mut entry, &ID_TRACK_TYPE, &uint_bytes(TRACK_TYPE_VIDEO))?;
    write_element(&mut entry, &ID_DEFAULT_DURATION, &uint_bytes(default_duration))?;
    write_element(&mut entry, &ID_CODEC_ID, b"V_MPEG4/ISO/AVC")?;
    write_element(&mut entry, &ID_CODEC_PRIVATE, &codec_private)?;
    write_element(&mut entry, &ID_VIDEO, &video)?;
    check_len1_limit("TrackEntry", entry.len())?;

    let mut tracks_body = Vec::new();
    write_element(&mut tracks_body, &ID_TRACK_ENTRY, &entry)?;
    check_len1_limit("Tracks", tracks_body.len())?;

    let mut out = Vec::new();
    write_element(&mut out, &ID_TRACKS, &tracks_body)?;
    Ok(out)
}

fn write_cues<W: Write>(w: &mut W, cues: &CueIndex) -> Result<(), CaptureError> {
    let mut body = Vec::new();
    for entry in cues.iter() {
        let mut positions = Vec::new();
        write_element(&mut positions, &ID_CUE_TRACK, &uint_bytes(TRACK_NUMBER))?;
        write_element(
            &mut positions,
            &ID_CUE_CLUSTER_POSITION,
            &entry.cluster_offset_in_segment.to_be_bytes(),
        )?;
        write_element(
            &mut positions,
            &ID_CUE_RELATIVE_POSITION,
            &entry.block_offset_in_cluster.to_be_bytes(),
        )?;

        let mut point = Vec::new();
        write_element(&mut point, &ID_CUE_TIME, &uint_bytes(entry.timestamp_ticks))?;
        write_element(&mut point, &ID_CUE_TRACK_POSITIONS, &positions)?;
        write_element(&mut body, &ID_CUE_POINT, &point)?;
    }

    write_id(w, &ID_CUES)?;
    let len = body.len() as u32;
    w.write_all(&(crate::ebml::LEN1_MARKER | len).to_be_bytes())
        .map_err(CaptureError::Io)?;
    w.write_all(&body).map_err(CaptureError::Io)
}
