//! Server configuration

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use hls_live_lib::{Codec, MuxerConfig, ProcessEngineFactory, SubtitleTrack, Variant};

use crate::error::{Result, ServerError};

/// Where a path's live stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Listen on `host:port` and accept one publisher at a time
    Tcp(String),
    /// Read a container file, from the start for every session
    File(PathBuf),
}

impl Source {
    pub fn parse(source: &str) -> Result<Self> {
        if let Some(addr) = source.strip_prefix("tcp://") {
            if addr.rsplit_once(':').map_or(true, |(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            }) {
                return Err(ServerError::Config(format!(
                    "invalid tcp source '{}', expected tcp://host:port",
                    source
                )));
            }
            return Ok(Source::Tcp(addr.to_string()));
        }
        if source.is_empty() {
            return Err(ServerError::Config("empty source".to_string()));
        }
        Ok(Source::File(PathBuf::from(source)))
    }
}

/// HLS muxer defaults shared by all paths
#[derive(Debug, Clone)]
pub struct HlsConfig {
    pub variant: Variant,

    /// Number of segments kept in the media playlist
    pub segment_count: usize,

    /// Minimum segment duration in seconds
    pub segment_duration_secs: f64,

    /// Minimum part duration in seconds (low-latency only)
    pub part_duration_secs: f64,

    /// Maximum size of a segment in bytes
    pub segment_max_size: u64,

    /// Parent of the per-path storage directories
    pub directory: Option<PathBuf>,

    /// ffmpeg executable used by the segmenter
    pub ffmpeg: PathBuf,

    /// Container format publishers send
    pub input_format: String,

    /// Pause before a failed session is restarted
    pub retry_pause_secs: u64,

    /// Subtitle track advertised on every path
    pub subtitles: Option<SubtitleTrack>,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            segment_count: 7,
            segment_duration_secs: 1.0,
            part_duration_secs: 0.2,
            segment_max_size: 50_000_000,
            directory: None,
            ffmpeg: PathBuf::from("ffmpeg"),
            input_format: "mpegts".to_string(),
            retry_pause_secs: 10,
            subtitles: None,
        }
    }
}

impl HlsConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_secs(self.retry_pause_secs)
    }

    pub fn engine_factory(&self) -> ProcessEngineFactory {
        ProcessEngineFactory {
            program: self.ffmpeg.clone(),
            input_format: self.input_format.clone(),
        }
    }
}

/// One published path
#[derive(Debug, Clone)]
pub struct PathConfig {
    pub name: String,
    pub source: Source,
    /// Track formats the publisher sends
    pub formats: Vec<Codec>,
    /// Overrides the shared subtitle track
    pub subtitles: Option<SubtitleTrack>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,

    pub hls: HlsConfig,

    pub paths: Vec<PathConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            cors_enabled: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            hls: HlsConfig::default(),
            paths: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session configuration for one path.
    pub fn muxer_config(&self, path: &PathConfig) -> MuxerConfig {
        MuxerConfig {
            variant: self.hls.variant,
            segment_count: self.hls.segment_count,
            segment_min_duration: Duration::from_secs_f64(self.hls.segment_duration_secs),
            part_min_duration: Duration::from_secs_f64(self.hls.part_duration_secs),
            segment_max_size: self.hls.segment_max_size,
            directory: self.hls.directory.clone(),
            path_name: path.name.clone(),
            subtitles: path.subtitles.clone().or_else(|| self.hls.subtitles.clone()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let hls = &self.hls;
        if hls.segment_count < 1 {
            return Err(ServerError::Config("segment_count must be at least 1".to_string()));
        }
        if !(hls.segment_duration_secs.is_finite() && hls.segment_duration_secs > 0.0) {
            return Err(ServerError::Config(
                "segment_duration_secs must be greater than zero".to_string(),
            ));
        }
        if !(hls.part_duration_secs.is_finite() && hls.part_duration_secs > 0.0) {
            return Err(ServerError::Config(
                "part_duration_secs must be greater than zero".to_string(),
            ));
        }
        if hls.part_duration_secs > hls.segment_duration_secs {
            return Err(ServerError::Config(
                "part_duration_secs cannot exceed segment_duration_secs".to_string(),
            ));
        }
        if hls.segment_max_size == 0 {
            return Err(ServerError::Config("segment_max_size must be greater than zero".to_string()));
        }
        if let Some(track) = &hls.subtitles {
            track.validate()?;
        }

        let mut names = HashSet::new();
        let mut listeners = HashSet::new();
        for path in &self.paths {
            if path.name.is_empty()
                || path.name.starts_with('/')
                || path.name.ends_with('/')
                || path
                    .name
                    .split('/')
                    .any(|part| part.is_empty() || part == "." || part == "..")
            {
                return Err(ServerError::Config(format!("invalid path name '{}'", path.name)));
            }
            // Paths share nothing: not a storage directory, not a listener.
            if !names.insert(path.name.as_str()) {
                return Err(ServerError::Config(format!("duplicate path name '{}'", path.name)));
            }
            if let Source::Tcp(addr) = &path.source {
                if !listeners.insert(addr.as_str()) {
                    return Err(ServerError::Config(format!(
                        "path '{}' listens on {}, which is already used by another path",
                        path.name, addr
                    )));
                }
            }
            if path.formats.is_empty() {
                return Err(ServerError::Config(format!("path '{}' has no formats", path.name)));
            }
            if let Some(track) = &path.subtitles {
                track.validate()?;
            }
        }

        Ok(())
    }
}
