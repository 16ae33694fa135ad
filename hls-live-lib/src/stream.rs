//! Live media streams and their readers
//!
//! A [`Stream`] delivers frames to registered readers. Readers are registered
//! first, then started; frames only reach started readers.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::HlsError;

/// Identity of a reader registered on a stream.
pub type ReaderId = Uuid;

/// Codec of one track of a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    #[serde(rename = "H264")]
    H264,
    #[serde(rename = "H265")]
    H265,
    #[serde(rename = "AV1")]
    Av1,
    #[serde(rename = "VP9")]
    Vp9,
    #[serde(rename = "Opus")]
    Opus,
    #[serde(rename = "MPEG-4 Audio")]
    Mpeg4Audio,
    #[serde(rename = "MPEG-1 Audio")]
    Mpeg1Audio,
    #[serde(rename = "AC-3")]
    Ac3,
    #[serde(rename = "G711")]
    G711,
    #[serde(rename = "LPCM")]
    Lpcm,
}

impl Codec {
    /// Codecs that can be carried in HLS segments, in display order.
    pub const HLS_SUPPORTED: [Codec; 8] = [
        Codec::Av1,
        Codec::Vp9,
        Codec::H265,
        Codec::H264,
        Codec::Opus,
        Codec::Mpeg4Audio,
        Codec::Mpeg1Audio,
        Codec::Ac3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H264",
            Codec::H265 => "H265",
            Codec::Av1 => "AV1",
            Codec::Vp9 => "VP9",
            Codec::Opus => "Opus",
            Codec::Mpeg4Audio => "MPEG-4 Audio",
            Codec::Mpeg1Audio => "MPEG-1 Audio",
            Codec::Ac3 => "AC-3",
            Codec::G711 => "G711",
            Codec::Lpcm => "LPCM",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Codec::H264 | Codec::H265 | Codec::Av1 | Codec::Vp9)
    }

    pub fn is_hls_supported(&self) -> bool {
        Self::HLS_SUPPORTED.contains(self)
    }

    /// RFC6381 codec string advertised in `CODECS=`.
    ///
    /// Profile and level are not known without parsing the bitstream, so the
    /// common defaults are used.
    pub fn codec_string(&self) -> Option<&'static str> {
        match self {
            Codec::H264 => Some("avc1.64001f"),    // High 3.1
            Codec::H265 => Some("hvc1.1.6.L93.B0"), // Main
            Codec::Av1 => Some("av01.0.04M.08"),
            Codec::Vp9 => Some("vp09.00.10.08"),
            Codec::Opus => Some("opus"),
            Codec::Mpeg4Audio => Some("mp4a.40.2"),
            Codec::Mpeg1Audio => Some("mp4a.40.34"),
            Codec::Ac3 => Some("ac-3"),
            Codec::G711 | Codec::Lpcm => None,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Human readable description of a format list, e.g. `2 tracks (H264, Opus)`.
pub fn formats_info(formats: &[Codec]) -> String {
    let names: Vec<&str> = formats.iter().map(Codec::name).collect();
    format!(
        "{} {} ({})",
        formats.len(),
        if formats.len() == 1 { "track" } else { "tracks" },
        names.join(", ")
    )
}

/// A chunk of the stream's container data.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Receives frames from a [`Stream`].
pub trait StreamReader: Send + Sync {
    /// Called from the stream's delivery task. Must not block.
    fn on_frame(&self, frame: &Frame);
}

/// A live media source that readers attach to.
pub trait Stream: Send + Sync {
    /// Formats of all tracks of the stream.
    fn formats(&self) -> Vec<Codec>;

    /// Register a reader for `formats`. Frames are not delivered until
    /// [`Stream::start_reader`] is called.
    fn add_reader(&self, id: ReaderId, reader: Arc<dyn StreamReader>, formats: &[Codec]);

    /// Unregister a reader. Unknown ids are ignored.
    fn remove_reader(&self, id: ReaderId);

    /// Begin delivering frames to a registered reader.
    fn start_reader(&self, id: ReaderId);

    /// Formats a reader registered for.
    fn reader_formats(&self, id: ReaderId) -> Vec<Codec>;

    /// Channel yielding at most one fatal error for the reader. It closes
    /// without a value when the reader is removed.
    fn reader_error(&self, id: ReaderId) -> oneshot::Receiver<HlsError>;
}

struct ReaderSlot {
    reader: Arc<dyn StreamReader>,
    formats: Vec<Codec>,
    started: bool,
    error_tx: Option<oneshot::Sender<HlsError>>,
    failed: Option<String>,
}

/// In-memory [`Stream`] fed by an ingest task.
pub struct LiveStream {
    formats: Vec<Codec>,
    readers: DashMap<ReaderId, ReaderSlot>,
}

impl LiveStream {
    pub fn new(formats: Vec<Codec>) -> Self {
        Self {
            formats,
            readers: DashMap::new(),
        }
    }

    /// Deliver a frame to every started reader.
    pub fn write_frame(&self, frame: &Frame) {
        let readers: Vec<Arc<dyn StreamReader>> = self
            .readers
            .iter()
            .filter(|slot| slot.started)
            .map(|slot| slot.reader.clone())
            .collect();

        for reader in readers {
            reader.on_frame(frame);
        }
    }

    /// End the session of every current reader with a [`HlsError::StreamRead`].
    pub fn fail(&self, reason: &str) {
        for mut slot in self.readers.iter_mut() {
            match slot.error_tx.take() {
                Some(tx) => {
                    let _ = tx.send(HlsError::StreamRead(reason.to_string()));
                }
                None => slot.failed = Some(reason.to_string()),
            }
        }
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Readers that are receiving frames.
    pub fn started_readers(&self) -> Vec<ReaderId> {
        self.readers
            .iter()
            .filter(|slot| slot.started)
            .map(|slot| *slot.key())
            .collect()
    }

    pub fn is_reader_started(&self, id: ReaderId) -> bool {
        self.readers.get(&id).map(|slot| slot.started).unwrap_or(false)
    }
}

impl Stream for LiveStream {
    fn formats(&self) -> Vec<Codec> {
        self.formats.clone()
    }

    fn add_reader(&self, id: ReaderId, reader: Arc<dyn StreamReader>, formats: &[Codec]) {
        self.readers.insert(
            id,
            ReaderSlot {
                reader,
                formats: formats.to_vec(),
                started: false,
                error_tx: None,
                failed: None,
            },
        );
    }

    fn remove_reader(&self, id: ReaderId) {
        self.readers.remove(&id);
    }

    fn start_reader(&self, id: ReaderId) {
        if let Some(mut slot) = self.readers.get_mut(&id) {
            slot.started = true;
        }
    }

    fn reader_formats(&self, id: ReaderId) -> Vec<Codec> {
        self.readers
            .get(&id)
            .map(|slot| slot.formats.clone())
            .unwrap_or_default()
    }

    fn reader_error(&self, id: ReaderId) -> oneshot::Receiver<HlsError> {
        let (tx, rx) = oneshot::channel();
        if let Some(mut slot) = self.readers.get_mut(&id) {
            match slot.failed.take() {
                Some(reason) => {
                    let _ = tx.send(HlsError::StreamRead(reason));
                }
                None => slot.error_tx = Some(tx),
            }
        }
        rx
    }
}
