//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - Active muxer sessions, keyed by path name
//! - Per-path byte counters that outlive individual sessions
//! - Metrics and server configuration

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hls_live_lib::{MuxerInstance, ReaderId};

use crate::config::ServerConfig;
use crate::metrics::Metrics;

/// Application state shared across all handlers
pub struct AppState {
    /// Active sessions (path name -> muxer)
    pub muxers: DashMap<String, Arc<MuxerInstance>>,

    /// Bytes served per path, across session restarts
    pub bytes_sent: DashMap<String, Arc<AtomicU64>>,

    pub metrics: Metrics,

    /// Server configuration
    pub config: ServerConfig,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            muxers: DashMap::new(),
            bytes_sent: DashMap::new(),
            metrics: Metrics::new(),
            config,
        }
    }

    /// Counter handed to every session of `path`.
    pub fn bytes_counter(&self, path: &str) -> Arc<AtomicU64> {
        self.bytes_sent
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Make a session reachable over HTTP.
    pub fn publish(&self, muxer: Arc<MuxerInstance>) {
        self.muxers.insert(muxer.path_name().to_string(), muxer);
    }

    /// Remove the session of `path`, unless it was already replaced by
    /// another one.
    pub fn unpublish(&self, path: &str, id: ReaderId) -> Option<Arc<MuxerInstance>> {
        self.muxers
            .remove_if(path, |_, muxer| muxer.id() == id)
            .map(|(_, muxer)| muxer)
    }

    pub fn get_muxer(&self, path: &str) -> Option<Arc<MuxerInstance>> {
        self.muxers.get(path).map(|r| r.clone())
    }

    pub fn active_muxers(&self) -> usize {
        self.muxers.len()
    }

    /// `(path, bytes)` for every path that ever had a session, sorted by path.
    pub fn bytes_by_path(&self) -> Vec<(String, u64)> {
        let mut totals: Vec<(String, u64)> = self
            .bytes_sent
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        totals.sort();
        totals
    }
}
