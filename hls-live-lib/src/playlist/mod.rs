//! Playlist handling
//!
//! - Subtitle track descriptor (`#EXT-X-MEDIA:TYPE=SUBTITLES`)
//! - Annotation of engine playlists with that descriptor

pub mod annotate;
pub mod subtitle;

pub use annotate::{
    has_subtitle_rendition, Annotated, Outcome, PlaylistAnnotator, PlaylistKind, SkipReason,
};
pub use subtitle::SubtitleTrack;

/// File name of the multivariant playlist served by the engine.
pub const MULTIVARIANT_PLAYLIST: &str = "index.m3u8";

/// Media type of HLS playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
