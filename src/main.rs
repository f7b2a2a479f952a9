use anyhow::Result;
use doc_library::{
    AppState, config, db, middleware::identity::TokenDecoder, routes,
    services::document_service::DocumentService,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_library=info,tower_http=info".into()),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting doc-library on {} (storage: {}, database: {}, production: {})",
        cfg.addr(),
        cfg.storage_dir,
        cfg.database_url,
        cfg.production
    );

    // --- Database ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Core service ---
    let documents = DocumentService::new(Arc::new(pool), cfg.storage_dir.clone());
    documents.blobs.ensure_dir().await?;

    let tokens = TokenDecoder::new(cfg.token_secret.as_deref());
    if !tokens.verifies_signatures() {
        tracing::warn!(
            "No token secret configured: bearer tokens are decoded WITHOUT signature verification"
        );
    }

    let state = AppState {
        documents,
        tokens,
        expose_error_details: !cfg.production,
    };
    let app = routes::routes::routes(state, &cfg.cors_origins);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
