//! Embedded HTTP status endpoint

pub mod auth;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::{build_status_response, render_status};
pub use server::{router, ApiState, ServerError, StatusServer};
pub use types::StatusResponse;
