//! Publisher ingest
//!
//! Feeds container bytes from a path's source into its [`LiveStream`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hls_live_lib::{Frame, LiveStream, ReaderId};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Source;
use crate::error::Result;

/// Read size; a multiple of the 188 byte MPEG-TS packet.
const CHUNK_SIZE: usize = 188 * 348;

/// Run the ingest of one path until shutdown.
pub async fn run_ingest(
    path: String,
    source: Source,
    stream: Arc<LiveStream>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    match source {
        Source::Tcp(addr) => {
            let listener = TcpListener::bind(&addr).await?;
            tracing::info!("path {} waiting for publishers on tcp://{}", path, addr);

            loop {
                let (socket, peer) = tokio::select! {
                    accepted = listener.accept() => accepted?,
                    _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                };
                tracing::info!("path {} publisher {} connected", path, peer);

                // One publisher at a time: the next one is only accepted
                // after this one is gone.
                let reason = tokio::select! {
                    reason = pump(socket, &stream) => reason,
                    _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                };
                tracing::info!("path {} publisher {} gone: {}", path, peer, reason);
                stream.fail(&reason);
            }
        }
        Source::File(file) => {
            let mut served: Vec<ReaderId> = Vec::new();
            loop {
                // Every session gets the file from the start, once its
                // reader has started.
                tokio::select! {
                    _ = wait_for_new_reader(&stream, &served) => {}
                    _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                }

                let reason = tokio::select! {
                    reason = read_file(&file, &stream) => reason,
                    _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                };
                tracing::info!("path {} finished reading {}: {}", path, file.display(), reason);
                served = stream.started_readers();
                stream.fail(&reason);
            }
        }
    }
}

async fn read_file(file: &Path, stream: &LiveStream) -> String {
    match tokio::fs::File::open(file).await {
        Ok(reader) => pump(reader, stream).await,
        Err(e) => format!("unable to open {}: {}", file.display(), e),
    }
}

/// Copy `reader` into the stream. Returns why reading stopped.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, stream: &LiveStream) -> String {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return "end of stream".to_string(),
            Ok(n) => stream.write_frame(&Frame::new(bytes::Bytes::copy_from_slice(&buf[..n]))),
            Err(e) => return format!("read error: {}", e),
        }
    }
}

/// Wait for a started reader that is not in `served`.
async fn wait_for_new_reader(stream: &LiveStream, served: &[ReaderId]) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    while stream
        .started_readers()
        .iter()
        .all(|id| served.contains(id))
    {
        interval.tick().await;
    }
}

/// Resolves once shutdown was requested or the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
