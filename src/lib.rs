//! PDF document library: an HTTP API storing uploaded files on disk and
//! their metadata in SQLite, plus a typed client for it.

pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use middleware::identity::TokenDecoder;
use services::document_service::DocumentService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub documents: DocumentService,
    pub tokens: TokenDecoder,
    /// Render internal error text in 500 bodies. Off in production.
    pub expose_error_details: bool,
}
