//! Typed access to the document API.
//!
//! Every call reads the token from the [`TokenStore`] once, at call time, and
//! sends it both as `Authorization: Bearer` and as `x-access-token`. A token
//! replaced while a call is in flight does not affect that call.

use crate::{
    client::token::TokenStore,
    middleware::identity::ACCESS_TOKEN_HEADER,
    models::document::{CreatedResponse, DocumentResponse, MessageResponse},
};
use bytes::Bytes;
use reqwest::{RequestBuilder, Response, StatusCode, header, multipart};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("{message}")]
    Api { status: StatusCode, message: String },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(err) => err.status(),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Form contents for an upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// A downloaded file with the name the server suggested.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Clone)]
pub struct DocumentClient {
    http: reqwest::Client,
    /// API base, e.g. `http://localhost:3001/api`.
    base_url: String,
    tokens: TokenStore,
}

impl DocumentClient {
    pub fn new(base_url: impl Into<String>, tokens: TokenStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Server origin without the `/api` suffix, for resolving `viewUrl`s.
    pub fn origin(&self) -> &str {
        self.base_url
            .strip_suffix("/api")
            .unwrap_or(&self.base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.tokens.get() {
            Some(token) => builder
                .bearer_auth(&token)
                .header(ACCESS_TOKEN_HEADER, token),
            None => builder,
        }
    }

    pub async fn list(&self, user_id: Option<&str>) -> ClientResult<Vec<DocumentResponse>> {
        let mut builder = self
            .http
            .get(self.url("/documents"))
            .header(header::ACCEPT, "application/json");
        if let Some(user_id) = user_id {
            builder = builder.query(&[("userId", user_id)]);
        }
        let resp = check(self.authorize(builder).send().await?, "Error fetching documents").await?;
        Ok(resp.json().await?)
    }

    pub async fn get(&self, id: i64) -> ClientResult<DocumentResponse> {
        let builder = self
            .http
            .get(self.url(&format!("/documents/{}", id)))
            .header(header::ACCEPT, "application/json");
        let resp = check(
            self.authorize(builder).send().await?,
            "Error fetching document details",
        )
        .await?;
        Ok(resp.json().await?)
    }

    pub async fn upload(&self, upload: UploadRequest) -> ClientResult<CreatedResponse> {
        let file_part = multipart::Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename)
            .mime_str(&upload.content_type)?;
        let form = multipart::Form::new()
            .text("title", upload.title)
            .text("description", upload.description)
            .text("category", upload.category)
            .part("file", file_part);

        let builder = self.http.post(self.url("/documents")).multipart(form);
        let resp = check(self.authorize(builder).send().await?, "Error uploading document").await?;
        Ok(resp.json().await?)
    }

    pub async fn download(&self, id: i64) -> ClientResult<DownloadedFile> {
        let builder = self.http.get(self.url(&format!("/documents/{}/download", id)));
        let resp = check(
            self.authorize(builder).send().await?,
            "Error downloading document",
        )
        .await?;
        let filename = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| format!("document-{}.pdf", id));
        let bytes = resp.bytes().await?;
        Ok(DownloadedFile { filename, bytes })
    }

    pub async fn delete(&self, id: i64) -> ClientResult<MessageResponse> {
        let builder = self.http.delete(self.url(&format!("/documents/{}", id)));
        let resp = check(self.authorize(builder).send().await?, "Error deleting document").await?;
        Ok(resp.json().await?)
    }

    /// Download `id` into `dir`, returning the written path.
    pub async fn download_to(&self, id: i64, dir: impl Into<PathBuf>) -> ClientResult<PathBuf> {
        let file = self.download(id).await?;
        let name = std::path::Path::new(&file.filename)
            .file_name()
            .map(|n| n.to_owned())
            .unwrap_or_else(|| format!("document-{}.pdf", id).into());
        let path = dir.into().join(name);
        tokio::fs::write(&path, &file.bytes).await?;
        Ok(path)
    }
}

/// Turn a non-success response into [`ClientError::Api`], preferring the
/// server's `message` over `fallback`.
async fn check(resp: Response, fallback: &str) -> ClientResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| fallback.to_string());
    tracing::debug!("request failed with {}: {}", status, message);
    Err(ClientError::Api { status, message })
}

/// File name from a Content-Disposition value, preferring the UTF-8
/// `filename*` form over the ASCII `filename` fallback.
fn disposition_filename(value: &str) -> Option<String> {
    let params: Vec<&str> = value.split(';').map(str::trim).collect();

    let extended = params.iter().find_map(|param| {
        let encoded = param.strip_prefix("filename*=")?;
        let (charset, rest) = encoded.split_once('\'')?;
        if !charset.eq_ignore_ascii_case("UTF-8") {
            return None;
        }
        // skip the language tag
        let (_, name) = rest.split_once('\'')?;
        urlencoding::decode(name)
            .ok()
            .map(|n| n.into_owned())
            .filter(|n| !n.is_empty())
    });

    extended.or_else(|| {
        params.iter().find_map(|param| {
            param
                .strip_prefix("filename=")
                .map(|name| name.trim_matches('"').to_string())
                .filter(|name| !name.is_empty())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_read_from_disposition() {
        let value = "attachment; filename=\"spec.pdf\"; filename*=UTF-8''spec.pdf";
        assert_eq!(disposition_filename(value).as_deref(), Some("spec.pdf"));
        assert_eq!(disposition_filename("inline"), None);
        assert_eq!(
            disposition_filename("attachment; filename=\"plain.pdf\"").as_deref(),
            Some("plain.pdf")
        );
    }

    #[test]
    fn utf8_filename_is_preferred_over_ascii_fallback() {
        let value = "attachment; filename=\"a_o.pdf\"; filename*=UTF-8''a%C3%B1o%20final.pdf";
        assert_eq!(disposition_filename(value).as_deref(), Some("año final.pdf"));
    }

    #[test]
    fn origin_strips_api_suffix() {
        let client = DocumentClient::new("http://localhost:3001/api/", TokenStore::in_memory());
        assert_eq!(client.origin(), "http://localhost:3001");
        assert_eq!(client.url("/documents"), "http://localhost:3001/api/documents");
    }
}
