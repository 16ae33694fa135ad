//! HLS engine interface
//!
//! The engine turns stream frames into segments and playlists and serves
//! them over HTTP. Muxer sessions only drive it through this interface.

pub mod process;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::error::{HlsError, Result};
use crate::stream::{Codec, Frame};

pub use process::{ProcessEngine, ProcessEngineFactory};

/// HLS variant produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Variant {
    /// MPEG-TS segments
    Mpegts,
    /// fMP4 segments
    #[default]
    Fmp4,
    /// Low-Latency HLS with fMP4 parts
    LowLatency,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Mpegts => write!(f, "mpegts"),
            Variant::Fmp4 => write!(f, "fmp4"),
            Variant::LowLatency => write!(f, "lowLatency"),
        }
    }
}

/// Called by the engine, possibly from its own worker tasks, with an error.
pub type EncodeErrorHandler = Arc<dyn Fn(HlsError) + Send + Sync>;

/// Everything an engine is constructed with.
#[derive(Clone)]
pub struct EngineConfig {
    pub variant: Variant,
    pub segment_count: usize,
    pub segment_min_duration: Duration,
    pub part_min_duration: Duration,
    pub segment_max_size: u64,
    /// Output directory. `None` keeps the output private to the engine.
    pub directory: Option<PathBuf>,
    /// Encoding failed but the engine keeps running.
    pub on_encode_error: EncodeErrorHandler,
    /// The engine stopped on its own and the session has to end. Called at
    /// most once.
    pub on_fatal_error: EncodeErrorHandler,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("variant", &self.variant)
            .field("segment_count", &self.segment_count)
            .field("segment_min_duration", &self.segment_min_duration)
            .field("part_min_duration", &self.part_min_duration)
            .field("segment_max_size", &self.segment_max_size)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

/// A running segmenter.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Start producing output for the given track formats.
    ///
    /// Errors are reported as [`HlsError::EngineStart`].
    fn start(&self, formats: &[Codec]) -> Result<()>;

    /// Queue a frame. Must not block.
    fn write_frame(&self, frame: &Frame);

    /// Stop and release buffers and output files.
    fn close(&self);

    /// Serve a playlist, segment or part.
    async fn handle(&self, request: Request) -> Response;

    /// Directory the engine writes into, if it was given one.
    fn directory(&self) -> Option<&Path>;
}

/// Constructs engines for muxer sessions.
pub trait EngineFactory: Send + Sync {
    /// Errors are reported as [`HlsError::EngineInit`].
    fn create(&self, config: EngineConfig) -> Result<Arc<dyn Engine>>;
}
