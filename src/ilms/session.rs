//! Shared state for talking to one iLMS site during a run.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{SiteError, location};
use crate::transport::Transport;

/// Site used when neither configuration nor environment names one.
pub const DEFAULT_TARGET_ORIGIN: &str = "http://lms.csmu.edu.tw";

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL, after redirects.
    pub url: Url,
    /// Body text.
    pub body: String,
}

/// HTTP session plus output location, handed to every expansion.
#[derive(Debug, Clone)]
pub struct Session {
    transport: Transport,
    origin: Url,
    data_dir: PathBuf,
}

impl Session {
    /// Creates a session against `origin`, storing files under `data_dir`.
    pub fn new(transport: Transport, origin: Url, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            origin,
            data_dir: data_dir.into(),
        }
    }

    /// The retrying transport.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Site origin, e.g. `http://lms.csmu.edu.tw`.
    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Run data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Builds a site URL from an absolute path and query pairs.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Url`] if `path` cannot be joined to the origin.
    pub fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, SiteError> {
        let mut url = self.origin.join(path).map_err(|source| SiteError::Url {
            url: path.to_string(),
            source,
        })?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Fetches an HTML page.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Transport`] if the request fails.
    #[instrument(level = "debug", skip(self, query))]
    pub async fn page(&self, path: &str, query: &[(&str, String)]) -> Result<Page, SiteError> {
        let url = self.url(path, query)?;
        let fetched = self.transport.get(url).await?;
        let url = fetched.url().clone();
        let body = fetched.text().await?;
        debug!(url = %url, bytes = body.len(), "page fetched");
        Ok(Page { url, body })
    }

    /// Fetches a JSON document, whatever content type the server declares.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Transport`] if the request fails or the body is
    /// not JSON.
    #[instrument(level = "debug", skip(self, query))]
    pub async fn json(&self, path: &str, query: &[(&str, String)]) -> Result<(Url, Value), SiteError> {
        let url = self.url(path, query)?;
        let fetched = self.transport.get(url).await?;
        let url = fetched.url().clone();
        let value = fetched.json().await?;
        Ok((url, value))
    }

    /// Directory of the item `type_tag`/`id`, created if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Io`] if the directory cannot be created.
    pub async fn item_dir(&self, type_tag: &str, id: i64) -> Result<PathBuf, SiteError> {
        let dir = self.data_dir.join(location(type_tag, id));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SiteError::io(&dir, e))?;
        Ok(dir)
    }

    /// Writes `contents` to `name` inside the item's directory.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Io`] if the file cannot be written.
    pub async fn save(
        &self,
        type_tag: &str,
        id: i64,
        name: &str,
        contents: impl AsRef<[u8]>,
    ) -> Result<PathBuf, SiteError> {
        let path = self.item_dir(type_tag, id).await?.join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| SiteError::io(&path, e))?;
        debug!(path = %path.display(), "saved");
        Ok(path)
    }

    /// Streams `url` into `name` inside the item's directory.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Transport`] if the download fails.
    pub async fn download(
        &self,
        url: Url,
        type_tag: &str,
        id: i64,
        name: &str,
    ) -> Result<u64, SiteError> {
        let path = self.item_dir(type_tag, id).await?.join(name);
        let written = self.transport.get(url).await?.save_to(&path).await?;
        debug!(path = %path.display(), bytes = written, "downloaded");
        Ok(written)
    }
}
