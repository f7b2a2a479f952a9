use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Origins allowed by CORS when nothing else is configured: the local dev
/// servers of this client and of the main application.
pub const DEFAULT_CORS_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub cors_origins: Vec<String>,
    /// Suppresses internal error details in responses.
    pub production: bool,
    /// Shared HS256 secret of the identity service. When unset, bearer tokens
    /// are decoded without any signature check.
    pub token_secret: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "PDF document library API")]
pub struct Args {
    /// Host to bind to (overrides DOC_LIBRARY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DOC_LIBRARY_PORT / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides DOC_LIBRARY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DOC_LIBRARY_DATABASE_URL / DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Allowed CORS origin, repeatable (overrides DOC_LIBRARY_CORS_ORIGINS)
    #[arg(long = "cors-origin")]
    pub cors_origins: Vec<String>,

    /// Hide internal error details (same as DOC_LIBRARY_ENV=production)
    #[arg(long)]
    pub production: bool,

    /// HS256 secret used to verify bearer tokens (overrides DOC_LIBRARY_TOKEN_SECRET)
    #[arg(long)]
    pub token_secret: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Merge already-parsed CLI arguments over the environment.
    pub fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("DOC_LIBRARY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match first_var(&["DOC_LIBRARY_PORT", "PORT"]) {
            Some((name, value)) => value
                .parse::<u16>()
                .with_context(|| format!("parsing {} value `{}`", name, value))?,
            None => 3001,
        };
        let env_storage =
            env::var("DOC_LIBRARY_STORAGE_DIR").unwrap_or_else(|_| "./uploads".into());
        let env_db = first_var(&["DOC_LIBRARY_DATABASE_URL", "DATABASE_URL"])
            .map(|(_, value)| value)
            .unwrap_or_else(|| "sqlite://./data/documents.db".into());
        let env_origins = env::var("DOC_LIBRARY_CORS_ORIGINS")
            .map(|raw| parse_origin_list(&raw))
            .unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect());
        let env_production = env::var("DOC_LIBRARY_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let env_secret = env::var("DOC_LIBRARY_TOKEN_SECRET").ok();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            cors_origins: if args.cors_origins.is_empty() {
                env_origins
            } else {
                args.cors_origins
            },
            production: args.production || env_production,
            token_secret: args.token_secret.or(env_secret).filter(|s| !s.is_empty()),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn first_var(names: &[&'static str]) -> Option<(&'static str, String)> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().map(|value| (*name, value)))
}

fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
