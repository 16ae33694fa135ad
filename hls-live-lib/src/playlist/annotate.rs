//! Playlist annotation
//!
//! Injects a subtitle `#EXT-X-MEDIA` line into a playlist produced by the
//! engine. The transform only looks at the bytes it is given, so it can run
//! on every response without coordinating with the engine's own rewrites.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

use super::subtitle::SubtitleTrack;

/// Anchor line of a multivariant playlist.
pub const INDEPENDENT_SEGMENTS: &str = "#EXT-X-INDEPENDENT-SEGMENTS";

/// First line of every playlist, the anchor of a media playlist.
pub const HEADER: &str = "#EXTM3U";

const MEDIA_TAG: &str = "#EXT-X-MEDIA:";
const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF:";
const SEGMENT_TAGS: [&str; 2] = ["#EXTINF:", "#EXT-X-TARGETDURATION:"];

/// Why a playlist was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The anchor line for this kind of playlist was not found.
    MissingAnchor(PlaylistKind),
    /// The playlist is not UTF-8 text.
    InvalidUtf8,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingAnchor(PlaylistKind::Multivariant) => {
                write!(f, "multivariant playlist has no {} line", INDEPENDENT_SEGMENTS)
            }
            SkipReason::MissingAnchor(PlaylistKind::Media) => {
                write!(f, "media playlist does not start with {}", HEADER)
            }
            SkipReason::InvalidUtf8 => write!(f, "playlist is not valid UTF-8"),
        }
    }
}

/// The two kinds of HLS playlists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Multivariant,
    Media,
}

impl PlaylistKind {
    /// A playlist listing variants, or one listing nothing at all, is treated
    /// as multivariant. Anything with segment tags is a media playlist.
    pub fn detect(text: &str) -> Self {
        let mut has_segments = false;
        for line in text.lines() {
            let line = line.trim_start();
            if line.starts_with(STREAM_INF_TAG) {
                return PlaylistKind::Multivariant;
            }
            if SEGMENT_TAGS.iter().any(|tag| line.starts_with(tag)) {
                has_segments = true;
            }
        }
        if has_segments {
            PlaylistKind::Media
        } else {
            PlaylistKind::Multivariant
        }
    }

    fn anchor(self) -> &'static str {
        match self {
            PlaylistKind::Multivariant => INDEPENDENT_SEGMENTS,
            PlaylistKind::Media => HEADER,
        }
    }
}

/// What `annotate` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Injected,
    AlreadyPresent,
    Skipped(SkipReason),
}

/// Result of annotating one playlist.
#[derive(Debug)]
pub struct Annotated<'a> {
    pub content: Cow<'a, [u8]>,
    pub outcome: Outcome,
}

impl Annotated<'_> {
    /// True if the subtitle line was added by this call.
    pub fn injected(&self) -> bool {
        self.outcome == Outcome::Injected
    }

    fn unchanged(raw: &[u8], outcome: Outcome) -> Annotated<'_> {
        Annotated {
            content: Cow::Borrowed(raw),
            outcome,
        }
    }
}

/// Injects one pre-rendered subtitle tag into playlists.
#[derive(Debug, Clone)]
pub struct PlaylistAnnotator {
    tag: String,
}

impl PlaylistAnnotator {
    pub fn new(track: &SubtitleTrack) -> Self {
        Self {
            tag: track.media_tag(),
        }
    }

    /// The `#EXT-X-MEDIA` line this annotator injects.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Add the subtitle line right after the anchor line, unless the playlist
    /// already advertises a subtitle rendition.
    pub fn annotate<'a>(&self, raw: &'a [u8]) -> Annotated<'a> {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => return Annotated::unchanged(raw, Outcome::Skipped(SkipReason::InvalidUtf8)),
        };

        if has_subtitle_rendition(text) {
            return Annotated::unchanged(raw, Outcome::AlreadyPresent);
        }

        let kind = PlaylistKind::detect(text);
        let anchor = kind.anchor();

        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            let end = offset + line.len();
            if line.trim_end() == anchor {
                let eol = if line.ends_with("\r\n") { "\r\n" } else { "\n" };

                let mut out = String::with_capacity(text.len() + self.tag.len() + 2 * eol.len());
                out.push_str(&text[..end]);
                if !line.ends_with('\n') {
                    out.push_str(eol);
                }
                out.push_str(&self.tag);
                out.push_str(eol);
                out.push_str(&text[end..]);

                return Annotated {
                    content: Cow::Owned(out.into_bytes()),
                    outcome: Outcome::Injected,
                };
            }
            offset = end;
        }

        Annotated::unchanged(raw, Outcome::Skipped(SkipReason::MissingAnchor(kind)))
    }

    /// Annotate an owned buffer, returning it as-is when nothing was injected.
    pub fn annotate_bytes(&self, raw: Bytes) -> (Bytes, Outcome) {
        let (rewritten, outcome) = {
            let annotated = self.annotate(&raw);
            let rewritten = match annotated.content {
                Cow::Owned(content) => Some(content),
                Cow::Borrowed(_) => None,
            };
            (rewritten, annotated.outcome)
        };
        match rewritten {
            Some(content) => (Bytes::from(content), outcome),
            None => (raw, outcome),
        }
    }
}

/// Whether any `#EXT-X-MEDIA` line in `text` has `TYPE=SUBTITLES`.
pub fn has_subtitle_rendition(text: &str) -> bool {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix(MEDIA_TAG))
        .any(|attrs| {
            attributes(attrs).any(|(name, value)| name == "TYPE" && value == "SUBTITLES")
        })
}

/// Split an attribute list into `(name, value)` pairs. Commas inside quoted
/// strings do not separate attributes.
fn attributes(list: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut rest = list;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let mut quoted = false;
        let mut split = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '"' => quoted = !quoted,
                ',' if !quoted => {
                    split = i;
                    break;
                }
                _ => {}
            }
        }
        let item = &rest[..split];
        rest = rest.get(split + 1..).unwrap_or("");
        let (name, value) = item.split_once('=').unwrap_or((item, ""));
        Some((name.trim(), value.trim()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotator() -> PlaylistAnnotator {
        PlaylistAnnotator::new(&SubtitleTrack {
            group_id: "subs".to_string(),
            name: "Deutsch".to_string(),
            language: "de".to_string(),
            default: true,
            autoselect: true,
            forced: false,
            uri: "subtitles.m3u8".to_string(),
        })
    }

    const MULTIVARIANT: &str = "#EXTM3U\n\
        #EXT-X-VERSION:9\n\
        #EXT-X-INDEPENDENT-SEGMENTS\n\
        \n\
        #EXT-X-STREAM-INF:BANDWIDTH=1200000,CODECS=\"avc1.64001f,mp4a.40.2\"\n\
        stream.m3u8\n";

    fn count_subtitle_tags(text: &str) -> usize {
        text.lines()
            .filter(|l| l.starts_with("#EXT-X-MEDIA:TYPE=SUBTITLES"))
            .count()
    }

    #[test]
    fn test_injects_after_independent_segments() {
        let a = annotator();
        let raw = "#EXTM3U\n#EXT-X-INDEPENDENT-SEGMENTS\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nstream.m3u8\n";

        let out = a.annotate(raw.as_bytes());
        assert!(out.injected());

        let text = std::str::from_utf8(&out.content).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#EXTM3U",
                "#EXT-X-INDEPENDENT-SEGMENTS",
                a.tag(),
                "#EXT-X-STREAM-INF:BANDWIDTH=1000",
                "stream.m3u8",
            ]
        );
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_annotation_is_idempotent() {
        let a = annotator();
        let first = a.annotate(MULTIVARIANT.as_bytes());
        assert!(first.injected());

        let second = a.annotate(&first.content);
        assert!(!second.injected());
        assert_eq!(second.outcome, Outcome::AlreadyPresent);
        assert_eq!(second.content, first.content);

        let text = std::str::from_utf8(&second.content).unwrap();
        assert_eq!(count_subtitle_tags(text), 1);
    }

    #[test]
    fn test_foreign_subtitle_tag_is_left_alone() {
        let a = annotator();
        let raw = "#EXTM3U\n\
            #EXT-X-INDEPENDENT-SEGMENTS\n\
            #EXT-X-MEDIA:GROUP-ID=\"cc\",NAME=\"English\",TYPE=SUBTITLES,URI=\"en.m3u8\"\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1000,SUBTITLES=\"cc\"\n\
            stream.m3u8\n";

        let out = a.annotate(raw.as_bytes());
        assert_eq!(out.outcome, Outcome::AlreadyPresent);
        assert!(matches!(out.content, Cow::Borrowed(_)));
        assert_eq!(&out.content[..], raw.as_bytes());
    }

    #[test]
    fn test_audio_rendition_does_not_count() {
        let a = annotator();
        let raw = "#EXTM3U\n\
            #EXT-X-INDEPENDENT-SEGMENTS\n\
            #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"TYPE=SUBTITLES\",URI=\"a.m3u8\"\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1000,AUDIO=\"aud\"\n\
            stream.m3u8\n";

        let out = a.annotate(raw.as_bytes());
        assert!(out.injected());
    }

    #[test]
    fn test_missing_anchor_fails_closed() {
        let a = annotator();
        let raw = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nstream.m3u8\n";

        let out = a.annotate(raw.as_bytes());
        assert_eq!(
            out.outcome,
            Outcome::Skipped(SkipReason::MissingAnchor(PlaylistKind::Multivariant))
        );
        assert_eq!(&out.content[..], raw.as_bytes());
    }

    #[test]
    fn test_anchor_must_be_a_whole_line() {
        let a = annotator();
        let raw = "#EXTM3U\n#EXT-X-INDEPENDENT-SEGMENTS-X\n#EXT-X-STREAM-INF:BANDWIDTH=1\ns.m3u8\n";

        let out = a.annotate(raw.as_bytes());
        assert!(!out.injected());
        assert_eq!(&out.content[..], raw.as_bytes());
    }

    #[test]
    fn test_invalid_utf8_is_skipped() {
        let a = annotator();
        let raw = b"#EXTM3U\n\xff\xfe\n";

        let out = a.annotate(raw);
        assert_eq!(out.outcome, Outcome::Skipped(SkipReason::InvalidUtf8));
        assert_eq!(&out.content[..], &raw[..]);
    }

    #[test]
    fn test_crlf_line_endings_are_kept() {
        let a = annotator();
        let raw = "#EXTM3U\r\n#EXT-X-INDEPENDENT-SEGMENTS\r\n#EXT-X-STREAM-INF:BANDWIDTH=1\r\ns.m3u8\r\n";

        let out = a.annotate(raw.as_bytes());
        let text = std::str::from_utf8(&out.content).unwrap();
        let expected = format!(
            "#EXTM3U\r\n#EXT-X-INDEPENDENT-SEGMENTS\r\n{}\r\n#EXT-X-STREAM-INF:BANDWIDTH=1\r\ns.m3u8\r\n",
            a.tag()
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_anchor_on_last_line_without_newline() {
        let a = annotator();
        let raw = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\ns.m3u8\n#EXT-X-INDEPENDENT-SEGMENTS";

        let out = a.annotate(raw.as_bytes());
        let text = std::str::from_utf8(&out.content).unwrap();
        assert_eq!(text, format!("{}\n{}\n", raw, a.tag()));
    }

    #[test]
    fn test_media_playlist_anchor_is_header() {
        let a = annotator();
        let raw = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.000,\nsegment_5.ts\n";

        let out = a.annotate(raw.as_bytes());
        assert!(out.injected());
        let text = std::str::from_utf8(&out.content).unwrap();
        assert_eq!(text, format!("#EXTM3U\n{}\n{}", a.tag(), &raw[8..]));
    }

    #[test]
    fn test_media_playlist_without_header_fails_closed() {
        let a = annotator();
        let raw = "#EXT-X-TARGETDURATION:2\n#EXTINF:2.000,\nsegment_5.ts\n";

        let out = a.annotate(raw.as_bytes());
        assert_eq!(
            out.outcome,
            Outcome::Skipped(SkipReason::MissingAnchor(PlaylistKind::Media))
        );
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(PlaylistKind::detect(MULTIVARIANT), PlaylistKind::Multivariant);
        assert_eq!(
            PlaylistKind::detect("#EXTM3U\n#EXTINF:1.0,\na.ts\n"),
            PlaylistKind::Media
        );
        assert_eq!(PlaylistKind::detect(""), PlaylistKind::Multivariant);
    }

    #[test]
    fn test_annotate_bytes_reuses_buffer() {
        let a = annotator();
        let raw = Bytes::from_static(b"not a playlist");
        let (out, outcome) = a.annotate_bytes(raw.clone());
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert_eq!(out.as_ptr(), raw.as_ptr());

        let (out, outcome) = a.annotate_bytes(Bytes::from_static(MULTIVARIANT.as_bytes()));
        assert_eq!(outcome, Outcome::Injected);
        assert_eq!(count_subtitle_tags(std::str::from_utf8(&out).unwrap()), 1);
    }

    #[test]
    fn test_attribute_parsing() {
        let attrs: Vec<_> = attributes("TYPE=AUDIO,NAME=\"a,b\",DEFAULT=YES").collect();
        assert_eq!(
            attrs,
            vec![("TYPE", "AUDIO"), ("NAME", "\"a,b\""), ("DEFAULT", "YES")]
        );
    }
}
