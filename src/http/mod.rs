//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with health, version, metrics and media endpoints
//! - Media requests dispatched to the muxer session owning the path
//! - Request logging and CORS middleware

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::create_router;
