pub(crate) mod counter;
pub mod engine;
pub(crate) mod error;
pub(crate) mod muxer;
pub mod playlist;
pub mod stream;

#[cfg(test)]
pub(crate) mod tests;

pub use counter::{count_response, ByteCounter};
pub use engine::{Engine, EngineConfig, EngineFactory, ProcessEngine, ProcessEngineFactory, Variant};
pub use error::{HlsError, Result};
pub use muxer::{MuxerConfig, MuxerInstance};
pub use playlist::{PlaylistAnnotator, SubtitleTrack};
pub use stream::{Codec, Frame, LiveStream, ReaderId, Stream, StreamReader};
