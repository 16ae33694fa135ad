//! One HLS muxing session bound to one live stream
//!
//! A [`MuxerInstance`] attaches to a [`Stream`] as a reader, feeds an
//! [`Engine`] and serves the engine's output over HTTP. Multivariant playlist
//! responses are captured and annotated with the configured subtitle track.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::Span;
use uuid::Uuid;

use crate::counter::count_response;
use crate::engine::{EncodeErrorHandler, Engine, EngineConfig, EngineFactory, Variant};
use crate::error::{HlsError, Result};
use crate::playlist::{
    Outcome, PlaylistAnnotator, SubtitleTrack, MULTIVARIANT_PLAYLIST, PLAYLIST_CONTENT_TYPE,
};
use crate::stream::{formats_info, Codec, Frame, ReaderId, Stream, StreamReader};

/// Largest engine playlist that is captured for annotation.
const MAX_PLAYLIST_SIZE: usize = 4 * 1024 * 1024;

/// Session configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    pub variant: Variant,
    pub segment_count: usize,
    pub segment_min_duration: Duration,
    pub part_min_duration: Duration,
    pub segment_max_size: u64,
    /// Parent of the per-path storage directory. `None` keeps segments
    /// inside the engine.
    pub directory: Option<PathBuf>,
    pub path_name: String,
    /// Subtitle track advertised in the multivariant playlist.
    pub subtitles: Option<SubtitleTrack>,
}

impl MuxerConfig {
    /// `<directory>/<path_name>`, when on-disk storage is configured.
    pub fn storage_dir(&self) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join(&self.path_name))
    }
}

pub struct MuxerInstance {
    id: ReaderId,
    config: MuxerConfig,
    stream: Arc<dyn Stream>,
    engines: Arc<dyn EngineFactory>,
    bytes_sent: Arc<AtomicU64>,
    annotator: Option<PlaylistAnnotator>,
    span: Span,
    /// Set once `initialize` succeeded.
    engine: OnceLock<Arc<dyn Engine>>,
    /// Fatal engine error, taken by the first `error_channel` call.
    engine_exit: Mutex<Option<oneshot::Receiver<HlsError>>>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl MuxerInstance {
    /// Create an uninitialized session. `bytes_sent` is owned by the caller
    /// so it can outlive the session.
    pub fn new(
        config: MuxerConfig,
        stream: Arc<dyn Stream>,
        engines: Arc<dyn EngineFactory>,
        bytes_sent: Arc<AtomicU64>,
    ) -> Result<Arc<Self>> {
        let annotator = match &config.subtitles {
            Some(track) => {
                track.validate()?;
                Some(PlaylistAnnotator::new(track))
            }
            None => None,
        };
        let span = tracing::info_span!("muxer", path = %config.path_name);

        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            stream,
            engines,
            bytes_sent,
            annotator,
            span,
            engine: OnceLock::new(),
            engine_exit: Mutex::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> ReaderId {
        self.id
    }

    pub fn path_name(&self) -> &str {
        &self.config.path_name
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    /// Total bytes served by this session.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// True between a successful `initialize` and `close`.
    pub fn is_active(&self) -> bool {
        self.engine.get().is_some() && !self.closed.load(Ordering::SeqCst)
    }

    /// Create storage, build and start the engine, then start reading frames.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        let _enter = self.span.enter();

        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(HlsError::AlreadyInitialized);
        }

        let storage = self.config.storage_dir();
        let created_dir = match &storage {
            Some(dir) => {
                let existed = dir.is_dir();
                std::fs::create_dir_all(dir)?;
                !existed
            }
            None => false,
        };

        match self.start_engine(storage.clone()) {
            Ok((engine, formats, engine_exit)) => {
                tracing::info!("converting {} into HLS", formats_info(&formats));
                *self.engine_exit.lock() = Some(engine_exit);
                // Frames may arrive as soon as the reader starts.
                let _ = self.engine.set(engine);
                self.stream.start_reader(self.id);
                Ok(())
            }
            Err(e) => {
                if created_dir {
                    if let Some(dir) = &storage {
                        self.remove_storage(dir);
                    }
                }
                Err(e)
            }
        }
    }

    fn start_engine(
        self: &Arc<Self>,
        storage: Option<PathBuf>,
    ) -> Result<(Arc<dyn Engine>, Vec<Codec>, oneshot::Receiver<HlsError>)> {
        let span = self.span.clone();
        let on_encode_error: EncodeErrorHandler = Arc::new(move |err: HlsError| {
            tracing::warn!(parent: &span, "{}", err);
        });

        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_tx = Mutex::new(Some(exit_tx));
        let span = self.span.clone();
        let on_fatal_error: EncodeErrorHandler = Arc::new(move |err: HlsError| {
            match exit_tx.lock().take() {
                Some(tx) => {
                    let _ = tx.send(err);
                }
                None => tracing::warn!(parent: &span, "{}", err),
            }
        });

        let engine = self.engines.create(EngineConfig {
            variant: self.config.variant,
            segment_count: self.config.segment_count,
            segment_min_duration: self.config.segment_min_duration,
            part_min_duration: self.config.part_min_duration,
            segment_max_size: self.config.segment_max_size,
            directory: storage,
            on_encode_error,
            on_fatal_error,
        })?;

        let supported: Vec<Codec> = self
            .stream
            .formats()
            .into_iter()
            .filter(Codec::is_hls_supported)
            .collect();
        if supported.is_empty() {
            engine.close();
            let names: Vec<&str> = Codec::HLS_SUPPORTED.iter().map(Codec::name).collect();
            return Err(HlsError::NoSupportedCodec(names.join(", ")));
        }

        let reader: Arc<dyn StreamReader> = self.clone();
        self.stream.add_reader(self.id, reader, &supported);
        let formats = self.stream.reader_formats(self.id);

        if let Err(e) = engine.start(&formats) {
            self.stream.remove_reader(self.id);
            engine.close();
            return Err(e);
        }

        Ok((engine, formats, exit_rx))
    }

    /// Stop reading, stop the engine and remove the storage directory.
    /// Does nothing for a session that never started or was already closed.
    pub fn close(&self) {
        let _enter = self.span.enter();

        let Some(engine) = self.engine.get() else {
            tracing::debug!("close on a muxer that was never started");
            return;
        };
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stream.remove_reader(self.id);
        engine.close();

        if let Some(dir) = engine.directory() {
            self.remove_storage(dir);
        }
        tracing::debug!("muxer closed");
    }

    fn remove_storage(&self, dir: &Path) {
        match std::fs::remove_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                let err = HlsError::StorageCleanup {
                    path: dir.to_path_buf(),
                    source,
                };
                tracing::warn!(parent: &self.span, "{}", err);
            }
        }
    }

    /// Yields at most one fatal error, from the stream or from the engine. A
    /// value or a closed channel both mean the session has ended and `close`
    /// must be called.
    ///
    /// Engine failures are only reported to the first channel; it has to be
    /// taken from within a tokio runtime.
    pub fn error_channel(&self) -> oneshot::Receiver<HlsError> {
        let mut stream_errors = self.stream.reader_error(self.id);
        let Some(mut engine_errors) = self.engine_exit.lock().take() else {
            return stream_errors;
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                *self.engine_exit.lock() = Some(engine_errors);
                return stream_errors;
            }
        };

        let (tx, rx) = oneshot::channel();
        runtime.spawn(async move {
            // Closing the session removes the reader, which closes
            // `stream_errors` and ends this task.
            tokio::select! {
                result = &mut stream_errors => {
                    if let Ok(err) = result {
                        let _ = tx.send(err);
                    }
                }
                Ok(err) = &mut engine_errors => {
                    let _ = tx.send(err);
                }
            }
        });
        rx
    }

    /// Serve a request for `/<path_name>/<file>`.
    pub async fn handle_request(&self, request: Request) -> Result<Response> {
        let engine = match self.engine.get() {
            Some(engine) if !self.closed.load(Ordering::SeqCst) => engine.clone(),
            _ => return Err(HlsError::NotActive),
        };

        let response = match &self.annotator {
            Some(annotator) if is_multivariant_request(request.uri().path()) => {
                self.serve_annotated(engine.as_ref(), annotator, request).await
            }
            _ => engine.handle(request).await,
        };

        Ok(count_response(response, self.bytes_sent.clone()))
    }

    async fn serve_annotated(
        &self,
        engine: &dyn Engine,
        annotator: &PlaylistAnnotator,
        request: Request,
    ) -> Response {
        let response = engine.handle(request).await;
        if !response.status().is_success() {
            return response;
        }

        // Known to be too large: serve it as the engine wrote it.
        let size = http_body::Body::size_hint(response.body()).lower();
        if size > MAX_PLAYLIST_SIZE as u64 {
            tracing::warn!(
                parent: &self.span,
                "playlist of {} bytes is too large to annotate, serving it unchanged",
                size
            );
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let raw = match axum::body::to_bytes(body, MAX_PLAYLIST_SIZE).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(parent: &self.span, "unable to read playlist from engine: {}", e);
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let (content, outcome) = annotator.annotate_bytes(raw);
        if let Outcome::Skipped(reason) = outcome {
            tracing::warn!(parent: &self.span, "{}", HlsError::AnnotationSkipped(reason));
        }

        parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PLAYLIST_CONTENT_TYPE),
        );
        parts.headers.remove(header::CONTENT_LENGTH);
        Response::from_parts(parts, Body::from(content))
    }
}

impl StreamReader for MuxerInstance {
    fn on_frame(&self, frame: &Frame) {
        if let Some(engine) = self.engine.get() {
            engine.write_frame(frame);
        }
    }
}

fn is_multivariant_request(path: &str) -> bool {
    path.rsplit('/').next() == Some(MULTIVARIANT_PLAYLIST)
}
