//! HTTP API server for external control
//!
//! This module provides a REST API over a [`Studio`](crate::studio::Studio):
//! - GET /health - Health check
//! - GET /studio/status - Studio stats
//! - POST /studio/screen/{share,stop} - Screen sharing
//! - POST /studio/camera/{enable,disable}, /studio/microphone/{enable,disable}
//! - POST /studio/overlay - Partial overlay update
//! - POST /studio/recording/{start,pause,resume,stop,discard} - Recording control
//! - GET /studio/recording/artifact - Download the finished recording
//! - POST /studio/errors/clear - Clear component errors

mod handlers;
mod routes;
mod state;

pub use handlers::{ActionResponse, ErrorResponse, ShareScreenRequest};
pub use routes::create_router;
pub use state::AppState;
