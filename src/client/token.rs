//! Client-side token holding and best-effort token relay.
//!
//! [`TokenStore`] keeps the current bearer token in memory, optionally
//! mirrored to a file so separate runs share it. [`TokenRelay`] polls a relay
//! file shared with other clients (for instance the main application) and
//! copies tokens between it and the store. The relay is unauthenticated,
//! unordered and last-write-wins.

use crate::models::identity::{Identity, decode_claims_unverified};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::{fs, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default polling period of the relay.
pub const DEFAULT_RELAY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub struct TokenStore {
    token: Arc<RwLock<Option<String>>>,
    path: Option<Arc<PathBuf>>,
}

impl TokenStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store mirrored to `path`, starting from whatever the file holds.
    pub async fn file_backed(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let token = match fs::read_to_string(&path).await {
            Ok(raw) => Some(raw.trim().to_string()).filter(|t| !t.is_empty()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        Ok(Self {
            token: Arc::new(RwLock::new(token)),
            path: Some(Arc::new(path)),
        })
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    pub async fn set(&self, token: &str) -> io::Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return self.clear().await;
        }
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.to_string());
        }
        if let Some(path) = &self.path {
            write_atomic(path, token.as_bytes()).await?;
        }
        debug!("token stored");
        Ok(())
    }

    pub async fn clear(&self) -> io::Result<()> {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
        if let Some(path) = &self.path {
            match fs::remove_file(path.as_path()).await {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        debug!("token removed");
        Ok(())
    }

    /// Identity claimed by the held token. Display only: nothing is verified.
    pub fn identity(&self) -> Option<Identity> {
        let token = self.get()?;
        decode_claims_unverified(&token).map(|claims| Identity::from_claims(&claims))
    }
}

/// Messages exchanged through the relay file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMessage {
    /// Broadcast of a token; accepted from any origin.
    TokenSync {
        token: String,
        #[serde(default)]
        origin: Option<String>,
    },
    /// Reply from the main application; accepted only from its origin.
    TokenResponse {
        token: String,
        #[serde(default)]
        origin: Option<String>,
    },
    /// Ask whoever holds a token to publish it.
    RequestToken {
        #[serde(default)]
        origin: Option<String>,
    },
}

/// What a single relay pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// A token from the relay replaced the local one.
    Adopted,
    /// The local token was written to the relay.
    Published,
    /// A message was present but not acceptable.
    Ignored,
    Idle,
}

#[derive(Clone)]
pub struct TokenRelay {
    store: TokenStore,
    relay_file: PathBuf,
    /// Origin whose `TOKEN_RESPONSE` messages are trusted.
    trusted_origin: String,
    /// Origin stamped on messages this relay writes.
    own_origin: String,
    interval: Duration,
}

impl TokenRelay {
    pub fn new(
        store: TokenStore,
        relay_file: impl Into<PathBuf>,
        trusted_origin: impl Into<String>,
    ) -> Self {
        Self {
            store,
            relay_file: relay_file.into(),
            trusted_origin: trusted_origin.into(),
            own_origin: "doclib".to_string(),
            interval: DEFAULT_RELAY_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_own_origin(mut self, origin: impl Into<String>) -> Self {
        self.own_origin = origin.into();
        self
    }

    /// Ask the other side for its token. A token already waiting on the
    /// relay is left for the next [`tick`](Self::tick); returns whether the
    /// request was written.
    pub async fn request_token(&self) -> io::Result<bool> {
        if let Some(RelayMessage::TokenSync { .. } | RelayMessage::TokenResponse { .. }) =
            self.read().await?
        {
            debug!("token already pending on relay, not requesting");
            return Ok(false);
        }
        self.post(&RelayMessage::RequestToken {
            origin: Some(self.own_origin.clone()),
        })
        .await?;
        Ok(true)
    }

    /// Forget the held token everywhere: in the store and on the relay, so
    /// the next pass cannot adopt it back.
    pub async fn retract(&self) -> io::Result<()> {
        self.store.clear().await?;
        match fs::remove_file(&self.relay_file).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        info!("token retracted from relay");
        Ok(())
    }

    /// Publish the held token, if any.
    pub async fn publish(&self) -> io::Result<bool> {
        match self.store.get() {
            Some(token) => {
                self.post(&RelayMessage::TokenSync {
                    token,
                    origin: Some(self.own_origin.clone()),
                })
                .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// One relay pass: read the relay file and react to what it holds.
    pub async fn tick(&self) -> io::Result<RelayOutcome> {
        let current = self.store.get();
        let message = self.read().await?;

        let outcome = match message {
            Some(RelayMessage::TokenSync { token, .. }) => self.adopt(token, current).await?,
            Some(RelayMessage::TokenResponse { token, origin }) => {
                if origin.as_deref() == Some(self.trusted_origin.as_str()) {
                    self.adopt(token, current).await?
                } else {
                    debug!("ignoring token response from {:?}", origin);
                    RelayOutcome::Ignored
                }
            }
            Some(RelayMessage::RequestToken { .. }) | None => {
                if self.publish().await? {
                    RelayOutcome::Published
                } else {
                    RelayOutcome::Idle
                }
            }
        };
        Ok(outcome)
    }

    async fn adopt(&self, token: String, current: Option<String>) -> io::Result<RelayOutcome> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(RelayOutcome::Ignored);
        }
        if current.as_deref() == Some(token) {
            return Ok(RelayOutcome::Idle);
        }
        self.store.set(token).await?;
        info!("token updated from relay");
        Ok(RelayOutcome::Adopted)
    }

    async fn read(&self) -> io::Result<Option<RelayMessage>> {
        let raw = match fs::read_to_string(&self.relay_file).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        match serde_json::from_str::<RelayMessage>(&raw) {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                debug!("unrecognized relay message: {}", err);
                Ok(None)
            }
        }
    }

    async fn post(&self, message: &RelayMessage) -> io::Result<()> {
        let body = serde_json::to_vec(message)?;
        write_atomic(&self.relay_file, &body).await
    }

    /// Run [`tick`](Self::tick) now and then every interval until the
    /// returned handle is dropped. Requests already sent are unaffected.
    pub fn spawn(self) -> RelayHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                match self.tick().await {
                    Ok(RelayOutcome::Idle) => {}
                    Ok(outcome) => debug!("token relay: {:?}", outcome),
                    Err(err) => warn!("token relay failed: {}", err),
                }
            }
        });
        RelayHandle { task }
    }
}

/// Stops the relay loop when dropped.
pub struct RelayHandle {
    task: JoinHandle<()>,
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, bytes).await?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}
