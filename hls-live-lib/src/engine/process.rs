//! Engine backed by an external `ffmpeg` process
//!
//! Frames are piped into ffmpeg's stdin. ffmpeg writes a media playlist and
//! its segments into the output directory; the multivariant playlist is
//! generated here from the track formats.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;

use super::{EncodeErrorHandler, Engine, EngineConfig, EngineFactory, Variant};
use crate::error::{HlsError, Result};
use crate::playlist::{MULTIVARIANT_PLAYLIST, PLAYLIST_CONTENT_TYPE};
use crate::stream::{Codec, Frame};

/// Media playlist written by ffmpeg.
pub const MEDIA_PLAYLIST: &str = "stream.m3u8";

const INIT_SEGMENT: &str = "init.mp4";
const SEGMENT_PREFIX: &str = "segment_";
const TEMP_SUFFIX: &str = ".tmp";

/// Frames buffered between the stream and ffmpeg's stdin.
const INPUT_QUEUE: usize = 1024;

/// Advertised when no finished segment can be measured yet.
const DEFAULT_BANDWIDTH: u64 = 200_000;

/// How long `close` waits for a killed encoder to exit.
const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds [`ProcessEngine`]s.
#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    /// ffmpeg executable
    pub program: PathBuf,
    /// Container format of the frames written to ffmpeg (`-f`)
    pub input_format: String,
}

impl Default for ProcessEngineFactory {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            input_format: "mpegts".to_string(),
        }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn create(&self, config: EngineConfig) -> Result<Arc<dyn Engine>> {
        let engine = ProcessEngine::new(self.program.clone(), self.input_format.clone(), config)?;
        Ok(Arc::new(engine))
    }
}

pub struct ProcessEngine {
    program: PathBuf,
    input_format: String,
    config: EngineConfig,
    output_dir: PathBuf,
    /// Private output directory, used when no directory was configured.
    scratch: Mutex<Option<TempDir>>,
    formats: OnceLock<Vec<Codec>>,
    input: Mutex<Option<mpsc::Sender<Bytes>>>,
    child: Mutex<Option<Child>>,
    closed: Arc<AtomicBool>,
}

impl ProcessEngine {
    pub fn new(program: PathBuf, input_format: String, config: EngineConfig) -> Result<Self> {
        if config.variant == Variant::LowLatency {
            return Err(HlsError::EngineInit(
                "the lowLatency variant needs partial segments, which ffmpeg's hls muxer cannot produce"
                    .to_string(),
            ));
        }
        if config.segment_min_duration.is_zero() {
            return Err(HlsError::EngineInit(
                "segment duration must be greater than zero".to_string(),
            ));
        }

        let (output_dir, scratch) = match &config.directory {
            Some(dir) => (dir.clone(), None),
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("hls-live-")
                    .tempdir()
                    .map_err(|e| HlsError::EngineInit(format!("unable to create scratch directory: {}", e)))?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        Ok(Self {
            program,
            input_format,
            config,
            output_dir,
            scratch: Mutex::new(scratch),
            formats: OnceLock::new(),
            input: Mutex::new(None),
            child: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Directory the ffmpeg output lands in.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn segment_extension(&self) -> &'static str {
        match self.config.variant {
            Variant::Mpegts => "ts",
            Variant::Fmp4 | Variant::LowLatency => "m4s",
        }
    }

    /// Command line passed to ffmpeg.
    pub fn command_args(&self, formats: &[Codec]) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "info", "-f"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(self.input_format.clone());
        args.extend(["-i".to_string(), "pipe:0".to_string()]);

        if formats.iter().any(Codec::is_video) {
            args.extend(["-map".to_string(), "0:v:0?".to_string()]);
        }
        if formats.iter().any(|c| !c.is_video()) {
            args.extend(["-map".to_string(), "0:a:0?".to_string()]);
        }

        args.extend(["-c".to_string(), "copy".to_string(), "-f".to_string(), "hls".to_string()]);
        args.push("-hls_time".to_string());
        args.push(format!("{:.3}", self.config.segment_min_duration.as_secs_f64()));
        args.push("-hls_list_size".to_string());
        args.push(self.config.segment_count.to_string());
        args.push("-hls_flags".to_string());
        args.push("delete_segments+independent_segments+omit_endlist+temp_file".to_string());
        args.push("-hls_segment_type".to_string());
        args.push(
            match self.config.variant {
                Variant::Mpegts => "mpegts",
                Variant::Fmp4 | Variant::LowLatency => "fmp4",
            }
            .to_string(),
        );
        if self.config.variant != Variant::Mpegts {
            args.push("-hls_fmp4_init_filename".to_string());
            args.push(INIT_SEGMENT.to_string());
        }
        args.push("-hls_segment_filename".to_string());
        args.push(
            self.output_dir
                .join(format!("{}%d.{}", SEGMENT_PREFIX, self.segment_extension()))
                .to_string_lossy()
                .to_string(),
        );
        args.push(
            self.output_dir
                .join(MEDIA_PLAYLIST)
                .to_string_lossy()
                .to_string(),
        );
        args
    }

    async fn serve_multivariant(&self) -> Response {
        let media = match tokio::fs::read_to_string(self.output_dir.join(MEDIA_PLAYLIST)).await {
            Ok(media) => media,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return (StatusCode::NOT_FOUND, "stream is not ready yet").into_response();
            }
            Err(e) => {
                tracing::warn!("unable to read {}: {}", MEDIA_PLAYLIST, e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let bandwidth = estimate_bandwidth(&media, &self.output_dir).await;
        let formats = self.formats.get().map(Vec::as_slice).unwrap_or(&[]);
        let playlist = multivariant_playlist(self.config.variant, formats, bandwidth);

        playlist_response(Bytes::from(playlist))
    }

    async fn serve_file(&self, name: &str) -> Response {
        if !is_output_file(name) {
            return StatusCode::NOT_FOUND.into_response();
        }

        match tokio::fs::read(self.output_dir.join(name)).await {
            Ok(data) if name.ends_with(".m3u8") => playlist_response(Bytes::from(data)),
            Ok(data) => {
                let mut response = Response::new(Body::from(data));
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(name)));
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
                response
            }
            Err(e) if e.kind() == ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
            Err(e) => {
                tracing::warn!("unable to read {}: {}", name, e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    fn remove_output(&self) {
        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!("unable to list {}: {}", self.output_dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let name = name.strip_suffix(TEMP_SUFFIX).unwrap_or(name);
            if !is_output_file(name) {
                continue;
            }
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::warn!("unable to remove {}: {}", entry.path().display(), e);
            }
        }
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    fn start(&self, formats: &[Codec]) -> Result<()> {
        // Same lower bound as other live HLS muxers: players need a few
        // segments of headroom.
        if self.config.segment_count < 3 {
            return Err(HlsError::EngineStart(
                "the minimum number of HLS segments is 3".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HlsError::EngineStart(e.to_string()))?;
        if self.formats.set(formats.to_vec()).is_err() {
            return Err(HlsError::EngineStart("engine already started".to_string()));
        }

        let mut child = Command::new(&self.program)
            .args(self.command_args(formats))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HlsError::EngineStart(format!("failed to spawn {}: {}", self.program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HlsError::EngineStart("encoder stdin was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HlsError::EngineStart("encoder stderr was not captured".to_string()))?;

        let (tx, rx) = mpsc::channel(INPUT_QUEUE);
        runtime.spawn(pump_input(rx, stdin, self.config.on_encode_error.clone()));
        runtime.spawn(monitor_encoder(
            stderr,
            self.config.segment_max_size,
            self.config.on_encode_error.clone(),
            self.config.on_fatal_error.clone(),
            self.closed.clone(),
        ));

        *self.input.lock() = Some(tx);
        *self.child.lock() = Some(child);

        tracing::debug!(
            "started {} writing into {}",
            self.program.display(),
            self.output_dir.display()
        );
        Ok(())
    }

    fn write_frame(&self, frame: &Frame) {
        let sent = match self.input.lock().as_ref() {
            Some(tx) => tx.try_send(frame.payload.clone()),
            None => return,
        };

        if let Err(mpsc::error::TrySendError::Full(_)) = sent {
            (self.config.on_encode_error)(HlsError::Encode(
                "encoder input queue is full, dropping frame".to_string(),
            ));
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the sender ends the input pump, which closes ffmpeg's stdin.
        self.input.lock().take();
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("encoder already exited: {}", e);
            }
            // The encoder must be gone before its output is removed, or a
            // segment it finishes meanwhile is left behind.
            if !reap(&mut child, EXIT_TIMEOUT) {
                tracing::warn!("encoder did not exit within {:?}", EXIT_TIMEOUT);
            }
        }

        self.remove_output();

        if let Some(scratch) = self.scratch.lock().take() {
            if let Err(e) = scratch.close() {
                tracing::warn!("unable to remove scratch directory: {}", e);
            }
        }
    }

    async fn handle(&self, request: Request) -> Response {
        let name = request.uri().path().rsplit('/').next().unwrap_or("");

        if name == MULTIVARIANT_PLAYLIST {
            self.serve_multivariant().await
        } else {
            self.serve_file(name).await
        }
    }

    fn directory(&self) -> Option<&Path> {
        self.config.directory.as_deref()
    }
}

async fn pump_input(
    mut rx: mpsc::Receiver<Bytes>,
    mut stdin: ChildStdin,
    on_error: EncodeErrorHandler,
) {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            on_error(HlsError::Encode(format!("unable to write to encoder: {}", e)));
            break;
        }
    }
}

async fn monitor_encoder(
    stderr: ChildStderr,
    segment_max_size: u64,
    on_error: EncodeErrorHandler,
    on_fatal: EncodeErrorHandler,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut current: Option<PathBuf> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(opened) = opened_segment(&line) {
            if let Some(finished) = current.replace(opened) {
                check_segment_size(&finished, segment_max_size, &on_error).await;
            }
            continue;
        }

        if is_error_line(&line) {
            on_error(HlsError::Encode(line.trim().to_string()));
        } else {
            tracing::trace!("ffmpeg: {}", line);
        }
    }

    if !closed.load(Ordering::SeqCst) {
        on_fatal(HlsError::Encode("encoder process exited".to_string()));
    }
}

/// Wait up to `timeout` for `child` to exit. Returns false if it is still
/// running.
fn reap(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(None) => return false,
            Err(e) => {
                tracing::debug!("unable to wait for encoder: {}", e);
                return true;
            }
        }
    }
}

async fn check_segment_size(path: &Path, max_size: u64, on_error: &EncodeErrorHandler) {
    if let Ok(meta) = tokio::fs::metadata(path).await {
        if meta.len() > max_size {
            on_error(HlsError::Encode(format!(
                "segment {} is {} bytes, which exceeds the maximum segment size of {} bytes",
                path.display(),
                meta.len(),
                max_size
            )));
        }
    }
}

/// Path of a segment ffmpeg started writing, from a line like
/// `[hls @ 0x5581] Opening '/data/cam/segment_3.ts.tmp' for writing`.
fn opened_segment(line: &str) -> Option<PathBuf> {
    let start = line.find("Opening '")? + "Opening '".len();
    let rest = &line[start..];
    let end = rest.find("' for writing")?;
    let path = rest[..end].strip_suffix(TEMP_SUFFIX).unwrap_or(&rest[..end]);

    let name = Path::new(path).file_name()?.to_str()?;
    if name.starts_with(SEGMENT_PREFIX) {
        Some(PathBuf::from(path))
    } else {
        None
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("error") || lower.contains("invalid data")
}

/// Files the engine produces. Anything else in the directory is never served
/// or removed.
fn is_output_file(name: &str) -> bool {
    if name == MEDIA_PLAYLIST || name == INIT_SEGMENT {
        return true;
    }
    match name.strip_prefix(SEGMENT_PREFIX) {
        Some(rest) => match rest.split_once('.') {
            Some((seq, ext)) => {
                !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) && (ext == "ts" || ext == "m4s")
            }
            None => false,
        },
        None => false,
    }
}

fn content_type(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("m3u8") => PLAYLIST_CONTENT_TYPE,
        Some("ts") => "video/mp2t",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn playlist_response(body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PLAYLIST_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Multivariant playlist with one variant pointing at [`MEDIA_PLAYLIST`].
pub fn multivariant_playlist(variant: Variant, formats: &[Codec], bandwidth: u64) -> String {
    let mut output = String::new();

    output.push_str("#EXTM3U\n");
    let version = match variant {
        Variant::Mpegts => 3,
        Variant::Fmp4 | Variant::LowLatency => 7,
    };
    output.push_str(&format!("#EXT-X-VERSION:{}\n", version));
    output.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    output.push('\n');

    let codecs: Vec<&str> = formats.iter().filter_map(Codec::codec_string).collect();
    let codec_attr = if codecs.is_empty() {
        String::new()
    } else {
        format!(",CODECS=\"{}\"", codecs.join(","))
    };

    output.push_str(&format!(
        "#EXT-X-STREAM-INF:BANDWIDTH={}{}\n",
        bandwidth, codec_attr
    ));
    output.push_str(MEDIA_PLAYLIST);
    output.push('\n');

    output
}

/// `(uri, duration)` of every segment listed in a media playlist.
pub fn listed_segments(media: &str) -> Vec<(String, f64)> {
    let mut segments = Vec::new();
    let mut duration = None;

    for line in media.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            duration = rest.split(',').next().and_then(|d| d.trim().parse::<f64>().ok());
        } else if !line.is_empty() && !line.starts_with('#') {
            if let Some(d) = duration.take() {
                segments.push((line.to_string(), d));
            }
        }
    }

    segments
}

/// Peak bitrate over the listed segments, in bits per second.
async fn estimate_bandwidth(media: &str, dir: &Path) -> u64 {
    let mut peak = 0u64;

    for (uri, duration) in listed_segments(media) {
        if duration <= 0.0 || !is_output_file(&uri) {
            continue;
        }
        if let Ok(meta) = tokio::fs::metadata(dir.join(&uri)).await {
            let bits = (meta.len() * 8) as f64 / duration;
            peak = peak.max(bits.ceil() as u64);
        }
    }

    if peak == 0 {
        DEFAULT_BANDWIDTH
    } else {
        peak
    }
}
