//! Session tests
//!
//! Drive [`MuxerInstance`](crate::MuxerInstance) against a [`LiveStream`](crate::LiveStream)
//! and a scripted engine:
//! - Lifecycle: initialize, failures, close
//! - Request dispatch and playlist annotation
//! - Byte accounting under concurrent requests

pub mod dispatch;
pub mod fixtures;
