//! Configuration file support
//!
//! Loads server configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hls_live_lib::{Codec, SubtitleTrack, Variant};

use crate::config::{HlsConfig, PathConfig, ServerConfig, Source};
use crate::error::Result;

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// HLS muxer settings
    pub hls: Option<HlsSettings>,
    /// Published paths, keyed by path name
    #[serde(default)]
    pub paths: BTreeMap<String, PathSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HlsSettings {
    /// mpegts, fmp4 or lowLatency
    pub variant: Option<Variant>,
    pub segment_count: Option<usize>,
    pub segment_duration_secs: Option<f64>,
    pub part_duration_secs: Option<f64>,
    /// Maximum segment size in bytes
    pub segment_max_size: Option<u64>,
    /// Storage directory; segments stay private to the segmenter when unset
    pub directory: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub input_format: Option<String>,
    pub retry_pause_secs: Option<u64>,
    /// Subtitle track advertised on every path
    pub subtitles: Option<SubtitleTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// `tcp://host:port` or a file path
    pub source: String,
    /// Track formats the publisher sends
    pub formats: Option<Vec<Codec>>,
    /// Overrides `[hls.subtitles]` for this path
    pub subtitles: Option<SubtitleTrack>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8888,
                cors_enabled: Some(true),
            },
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some("pretty".to_string()),
            }),
            hls: Some(HlsSettings::default()),
            paths: BTreeMap::new(),
        }
    }

    /// Convert to a validated ServerConfig
    pub fn into_server_config(self) -> Result<ServerConfig> {
        let defaults = HlsConfig::default();
        let hls = self.hls.unwrap_or_default();

        let hls = HlsConfig {
            variant: hls.variant.unwrap_or(defaults.variant),
            segment_count: hls.segment_count.unwrap_or(defaults.segment_count),
            segment_duration_secs: hls
                .segment_duration_secs
                .unwrap_or(defaults.segment_duration_secs),
            part_duration_secs: hls.part_duration_secs.unwrap_or(defaults.part_duration_secs),
            segment_max_size: hls.segment_max_size.unwrap_or(defaults.segment_max_size),
            directory: hls.directory.filter(|dir| !dir.as_os_str().is_empty()),
            ffmpeg: hls.ffmpeg.unwrap_or(defaults.ffmpeg),
            input_format: hls.input_format.unwrap_or(defaults.input_format),
            retry_pause_secs: hls.retry_pause_secs.unwrap_or(defaults.retry_pause_secs),
            subtitles: hls.subtitles,
        };

        let mut paths = Vec::with_capacity(self.paths.len());
        for (name, settings) in self.paths {
            paths.push(PathConfig {
                source: Source::parse(&settings.source)?,
                formats: settings.formats.unwrap_or_else(|| vec![Codec::H264]),
                subtitles: settings.subtitles,
                name,
            });
        }

        let (log_level, log_format) = match self.logging {
            Some(logging) => (
                logging.level,
                logging.format.unwrap_or_else(|| "pretty".to_string()),
            ),
            None => ("info".to_string(), "pretty".to_string()),
        };

        let config = ServerConfig {
            host: self.server.host,
            port: self.server.port,
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_level,
            log_format,
            hls,
            paths,
        };
        config.validate()?;
        Ok(config)
    }
}
