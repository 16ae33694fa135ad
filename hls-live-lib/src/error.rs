use std::path::PathBuf;

use thiserror::Error;

use crate::playlist::SkipReason;

/// Main error type for live HLS muxing sessions
#[derive(Error, Debug)]
pub enum HlsError {
    /// The engine could not be constructed from the session configuration
    #[error("unable to create HLS engine: {0}")]
    EngineInit(String),

    /// The engine was constructed but refused to start
    #[error("unable to start HLS engine: {0}")]
    EngineStart(String),

    /// The live stream ended or failed while the session was reading it
    #[error("stream read error: {0}")]
    StreamRead(String),

    /// None of the stream's formats can be carried over HLS
    #[error("the stream doesn't contain any supported codec, which are currently {0}")]
    NoSupportedCodec(String),

    /// A playlist was served without the subtitle track
    #[error("subtitle annotation skipped: {0}")]
    AnnotationSkipped(SkipReason),

    /// The per-stream storage directory could not be removed
    #[error("unable to remove {path}: {source}")]
    StorageCleanup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The engine failed while encoding a frame or segment
    #[error("encode error: {0}")]
    Encode(String),

    /// The session is not (or no longer) serving requests
    #[error("muxer is not active")]
    NotActive,

    /// `initialize` was called twice on the same session
    #[error("muxer is already initialized")]
    AlreadyInitialized,

    /// Invalid session or track configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, HlsError>;
