use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use doc_library::client::{
    api::DocumentClient,
    token::{DEFAULT_RELAY_INTERVAL, TokenRelay, TokenStore},
    views::{LibraryView, Route, SelectedFile, UploadForm, format_file_size},
};
use std::{path::PathBuf, time::Duration};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal client for the PDF document library")]
struct Cli {
    /// API base URL
    #[arg(long, env = "DOCLIB_API_URL", default_value = "http://localhost:3001/api")]
    api_url: String,

    /// File holding the bearer token
    #[arg(long, env = "DOCLIB_TOKEN_FILE", default_value = "./.doclib/auth_token")]
    token_file: PathBuf,

    /// Relay file shared with the main application
    #[arg(long, env = "DOCLIB_RELAY_FILE")]
    relay_file: Option<PathBuf>,

    /// Origin trusted for token responses on the relay
    #[arg(long, env = "DOCLIB_MAIN_ORIGIN", default_value = "http://localhost:5173")]
    main_origin: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List documents
    List {
        /// Only documents owned by the current token's identity
        #[arg(long)]
        mine: bool,
    },
    /// Show one document
    Show { id: i64 },
    /// Upload a PDF
    Upload {
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "general")]
        category: String,
    },
    /// Download a document into a directory
    Download {
        id: i64,
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
    },
    /// Delete a document you own
    Delete { id: i64 },
    /// Manage the stored token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Exchange tokens through the relay file
    Sync {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
        /// Polling period in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    Set { token: String },
    Show,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "doc_library=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let tokens = TokenStore::file_backed(&cli.token_file)
        .await
        .with_context(|| format!("reading token file {}", cli.token_file.display()))?;
    let relay = cli
        .relay_file
        .as_ref()
        .map(|path| TokenRelay::new(tokens.clone(), path, cli.main_origin.clone()));

    // One relay pass before talking to the API, like a page load would
    if let Some(relay) = &relay {
        if !matches!(cli.command, Command::Sync { .. } | Command::Token { .. }) {
            relay.tick().await.context("syncing token through relay")?;
        }
    }

    let client = DocumentClient::new(cli.api_url.clone(), tokens.clone());

    match cli.command {
        Command::List { mine } => {
            let mut view = LibraryView::new(client);
            if mine && view.viewer().is_none() {
                bail!("--mine needs a token; run `doclib token set <token>` first");
            }
            let result = view.set_mine_only(mine).await;
            print!("{}", view.render());
            result?;
        }
        Command::Show { id } => {
            let doc = client.get(id).await?;
            let d = &doc.document;
            println!("id:          {}", d.id);
            println!("title:       {}", d.title);
            println!("description: {}", d.description);
            println!("category:    {}", d.category);
            println!("filename:    {}", d.filename);
            println!("size:        {}", format_file_size(d.filesize));
            println!(
                "owner:       {} ({})",
                d.user_name.as_deref().unwrap_or("Anonymous User"),
                d.user_id.as_deref().unwrap_or("anonymous")
            );
            println!("uploaded:    {}", d.uploaded_at.to_rfc3339());
            println!("view:        {}{}", client.origin(), doc.view_url);
            println!("download:    {}{}", client.origin(), doc.download_url);
        }
        Command::Upload {
            file,
            title,
            description,
            category,
        } => {
            let mut form = UploadForm {
                title,
                description,
                category,
                ..Default::default()
            };
            let selected = SelectedFile::from_path(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            if let Err(msg) = form.select_file(selected) {
                bail!(msg);
            }
            match form.submit(&client).await {
                Ok(Route::Library) => {
                    let mut view = LibraryView::new(client);
                    view.refresh().await?;
                    print!("{}", view.render());
                }
                Ok(Route::Upload) => {}
                Err(_) => bail!(form.error.unwrap_or_default()),
            }
        }
        Command::Download { id, output } => {
            let path = client.download_to(id, output).await?;
            println!("saved {}", path.display());
        }
        Command::Delete { id } => {
            let message = client.delete(id).await?;
            println!("{}", message.message);
        }
        Command::Token { action } => match action {
            TokenAction::Set { token } => {
                tokens.set(&token).await?;
                if let Some(relay) = &relay {
                    relay.publish().await?;
                }
                match tokens.identity() {
                    Some(identity) => println!("token stored for {} ({})", identity.name, identity.id),
                    None => println!("token stored (payload not readable)"),
                }
            }
            TokenAction::Show => match (tokens.get(), tokens.identity()) {
                (Some(_), Some(identity)) => println!("{} ({})", identity.name, identity.id),
                (Some(_), None) => println!("token present, payload not readable"),
                (None, _) => println!("no token"),
            },
            TokenAction::Clear => {
                match &relay {
                    Some(relay) => relay.retract().await?,
                    None => tokens.clear().await?,
                }
                println!("token removed");
            }
        },
        Command::Sync { watch, interval } => {
            let Some(relay) = relay else {
                bail!("sync needs --relay-file or DOCLIB_RELAY_FILE");
            };
            if watch {
                let period = interval
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RELAY_INTERVAL);
                if tokens.get().is_none() {
                    relay.request_token().await?;
                }
                let _handle = relay.with_interval(period).spawn();
                tokio::signal::ctrl_c().await?;
            } else {
                let outcome = relay.tick().await?;
                println!("{:?}", outcome);
            }
        }
    }

    Ok(())
}
