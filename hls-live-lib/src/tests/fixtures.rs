//! Scripted engine and session builders shared by the session tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::{Engine, EngineConfig, EngineFactory, Variant};
use crate::error::{HlsError, Result};
use crate::muxer::{MuxerConfig, MuxerInstance};
use crate::playlist::{SubtitleTrack, PLAYLIST_CONTENT_TYPE};
use crate::stream::{Codec, Frame, LiveStream};

pub const MULTIVARIANT: &str = "#EXTM3U\n\
#EXT-X-VERSION:9\n\
#EXT-X-INDEPENDENT-SEGMENTS\n\
\n\
#EXT-X-STREAM-INF:BANDWIDTH=1200000,CODECS=\"avc1.64001f,mp4a.40.2\"\n\
stream.m3u8\n";

pub const SEGMENT: &[u8] = b"\x47\x40\x00\x10#EXT-X-INDEPENDENT-SEGMENTS\x00\xff";

/// Engine that serves fixed content and records how it was driven.
pub struct ScriptedEngine {
    pub multivariant: Mutex<Bytes>,
    pub fail_start: bool,
    pub started: Mutex<Option<Vec<Codec>>>,
    pub frames: AtomicUsize,
    pub closes: AtomicUsize,
    pub config: Mutex<Option<EngineConfig>>,
    pub directory: OnceLock<Option<PathBuf>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    pub fn failing_start() -> Arc<Self> {
        Self::build(true)
    }

    fn build(fail_start: bool) -> Arc<Self> {
        Arc::new(Self {
            multivariant: Mutex::new(Bytes::from_static(MULTIVARIANT.as_bytes())),
            fail_start,
            started: Mutex::new(None),
            frames: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            config: Mutex::new(None),
            directory: OnceLock::new(),
        })
    }

    /// Report an encode error the way an engine worker would.
    pub fn raise_encode_error(&self, message: &str) {
        let handler = self
            .config
            .lock()
            .as_ref()
            .map(|config| config.on_encode_error.clone())
            .expect("engine was created");
        handler(HlsError::Encode(message.to_string()));
    }

    /// Stop on its own, like an encoder process that died.
    pub fn exit(&self, message: &str) {
        let handler = self
            .config
            .lock()
            .as_ref()
            .map(|config| config.on_fatal_error.clone())
            .expect("engine was created");
        handler(HlsError::Encode(message.to_string()));
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn start(&self, formats: &[Codec]) -> Result<()> {
        if self.fail_start {
            return Err(HlsError::EngineStart("scripted failure".to_string()));
        }
        *self.started.lock() = Some(formats.to_vec());
        Ok(())
    }

    fn write_frame(&self, _frame: &Frame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn handle(&self, request: Request) -> Response {
        let name = request.uri().path().rsplit('/').next().unwrap_or("");
        match name {
            "index.m3u8" => (
                [(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)],
                self.multivariant.lock().clone(),
            )
                .into_response(),
            "segment_5.ts" => (
                [(header::CONTENT_TYPE, "video/mp2t")],
                Bytes::from_static(SEGMENT),
            )
                .into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    fn directory(&self) -> Option<&Path> {
        self.directory.get().and_then(|dir| dir.as_deref())
    }
}

pub struct ScriptedFactory {
    pub engine: Arc<ScriptedEngine>,
    pub fail_create: bool,
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, config: EngineConfig) -> Result<Arc<dyn Engine>> {
        if self.fail_create {
            return Err(HlsError::EngineInit("scripted failure".to_string()));
        }
        let _ = self.engine.directory.set(config.directory.clone());
        *self.engine.config.lock() = Some(config);
        let engine: Arc<dyn Engine> = self.engine.clone();
        Ok(engine)
    }
}

pub fn german() -> SubtitleTrack {
    SubtitleTrack {
        group_id: "subs".to_string(),
        name: "Deutsch".to_string(),
        language: "de".to_string(),
        default: true,
        autoselect: true,
        forced: false,
        uri: "subtitles.m3u8".to_string(),
    }
}

pub fn muxer_config(directory: Option<PathBuf>, subtitles: Option<SubtitleTrack>) -> MuxerConfig {
    MuxerConfig {
        variant: Variant::Mpegts,
        segment_count: 7,
        segment_min_duration: Duration::from_secs(1),
        part_min_duration: Duration::from_millis(200),
        segment_max_size: 50 * 1024 * 1024,
        directory,
        path_name: "cam".to_string(),
        subtitles,
    }
}

/// A session wired to a fresh stream and the given engine.
pub struct Session {
    pub muxer: Arc<MuxerInstance>,
    pub stream: Arc<LiveStream>,
    pub engine: Arc<ScriptedEngine>,
    pub bytes_sent: Arc<AtomicU64>,
}

pub fn session(
    config: MuxerConfig,
    formats: Vec<Codec>,
    engine: Arc<ScriptedEngine>,
    fail_create: bool,
) -> Session {
    let stream = Arc::new(LiveStream::new(formats));
    let bytes_sent = Arc::new(AtomicU64::new(0));
    let factory = Arc::new(ScriptedFactory {
        engine: engine.clone(),
        fail_create,
    });
    let muxer = MuxerInstance::new(config, stream.clone(), factory, bytes_sent.clone())
        .expect("valid muxer config");

    Session {
        muxer,
        stream,
        engine,
        bytes_sent,
    }
}

/// Initialized session with the German subtitle track.
pub fn annotated_session() -> Session {
    let s = session(
        muxer_config(None, Some(german())),
        vec![Codec::H264, Codec::Mpeg4Audio],
        ScriptedEngine::new(),
        false,
    );
    s.muxer.initialize().expect("initialize");
    s
}

pub fn get(path: &str) -> Request {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    use http_body_util::BodyExt;
    response.into_body().collect().await.unwrap().to_bytes()
}
