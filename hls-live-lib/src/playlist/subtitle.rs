//! Subtitle track descriptor
//!
//! Describes the `#EXT-X-MEDIA:TYPE=SUBTITLES` rendition that is advertised in
//! engine playlists.

use serde::{Deserialize, Serialize};

use crate::error::{HlsError, Result};

fn default_true() -> bool {
    true
}

/// A subtitle rendition whose segments are served outside of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    /// `GROUP-ID` of the rendition group
    pub group_id: String,
    /// Human readable `NAME`
    pub name: String,
    /// RFC5646 `LANGUAGE` tag, omitted from the tag when empty
    #[serde(default)]
    pub language: String,
    /// `DEFAULT=YES`
    #[serde(default)]
    pub default: bool,
    /// `AUTOSELECT=YES`
    #[serde(default = "default_true")]
    pub autoselect: bool,
    /// `FORCED=YES`
    #[serde(default)]
    pub forced: bool,
    /// Playlist URI, relative to the multivariant playlist
    pub uri: String,
}

impl SubtitleTrack {
    /// Check that the descriptor renders into a valid `EXT-X-MEDIA` tag.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("group_id", &self.group_id),
            ("name", &self.name),
            ("language", &self.language),
            ("uri", &self.uri),
        ];

        for (field, value) in fields {
            if value.contains(['"', '\r', '\n']) {
                return Err(HlsError::Config(format!(
                    "subtitle {} must not contain quotes or line breaks: {:?}",
                    field, value
                )));
            }
        }

        for (field, value) in [("group_id", &self.group_id), ("name", &self.name), ("uri", &self.uri)] {
            if value.trim().is_empty() {
                return Err(HlsError::Config(format!("subtitle {} is empty", field)));
            }
        }

        // HLS: AUTOSELECT must be YES when DEFAULT is YES.
        if self.default && !self.autoselect {
            return Err(HlsError::Config(
                "subtitle track with default = true must also set autoselect = true".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the `#EXT-X-MEDIA` line, without line terminator.
    pub fn media_tag(&self) -> String {
        fn yes_no(v: bool) -> &'static str {
            if v {
                "YES"
            } else {
                "NO"
            }
        }

        let mut tag = format!(
            "#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"{}\",NAME=\"{}\",DEFAULT={},AUTOSELECT={},FORCED={}",
            self.group_id,
            self.name,
            yes_no(self.default),
            yes_no(self.autoselect),
            yes_no(self.forced),
        );
        if !self.language.is_empty() {
            tag.push_str(&format!(",LANGUAGE=\"{}\"", self.language));
        }
        tag.push_str(&format!(",URI=\"{}\"", self.uri));
        tag
    }
}
