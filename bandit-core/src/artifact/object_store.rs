//! Object store clients for downloading artifact bundles

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::ArtifactError;

/// A parsed `scheme://bucket/key` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectUri {
    /// Parse an artifact location
    ///
    /// `file://` URIs carry an absolute path in `key` and an empty bucket.
    pub fn parse(uri: &str) -> Result<Self, ArtifactError> {
        let url =
            Url::parse(uri).map_err(|e| ArtifactError::InvalidUri(format!("{uri}: {e}")))?;
        let scheme = url.scheme().to_string();

        if scheme == "file" {
            return Ok(Self {
                scheme,
                bucket: String::new(),
                key: url.path().to_string(),
            });
        }

        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ArtifactError::InvalidUri(format!("{uri}: missing bucket")))?
            .to_string();
        let key = url.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return Err(ArtifactError::InvalidUri(format!("{uri}: missing key")));
        }

        Ok(Self {
            scheme,
            bucket,
            key,
        })
    }

    pub fn is_local_file(&self) -> bool {
        self.scheme == "file"
    }
}

impl std::fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_local_file() {
            write!(f, "file://{}", self.key)
        } else {
            write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
        }
    }
}

/// Download objects to local files
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy the object at `uri` to `dest`, overwriting it
    async fn download(&self, uri: &ObjectUri, dest: &Path) -> Result<(), ArtifactError>;
}

async fn copy_local(source: &Path, dest: &Path) -> Result<(), ArtifactError> {
    tokio::fs::copy(source, dest).await.map_err(|e| {
        ArtifactError::Download(format!("failed to copy {}: {e}", source.display()))
    })?;
    Ok(())
}

/// Object store rooted in a local directory
///
/// `scheme://bucket/key` maps to `<root>/<bucket>/<key>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local path an object resolves to
    pub fn resolve(&self, uri: &ObjectUri) -> PathBuf {
        if uri.is_local_file() {
            PathBuf::from(&uri.key)
        } else {
            self.root.join(&uri.bucket).join(&uri.key)
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn download(&self, uri: &ObjectUri, dest: &Path) -> Result<(), ArtifactError> {
        let source = self.resolve(uri);
        debug!(source = %source.display(), dest = %dest.display(), "Copying object");
        copy_local(&source, dest).await
    }
}

/// Object store reachable over HTTP
///
/// Objects are fetched with `GET <endpoint>/<bucket>/<key>` and streamed to
/// disk chunk by chunk.
pub struct HttpObjectStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn object_url(&self, uri: &ObjectUri) -> String {
        format!("{}/{}/{}", self.endpoint, uri.bucket, uri.key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn download(&self, uri: &ObjectUri, dest: &Path) -> Result<(), ArtifactError> {
        if uri.is_local_file() {
            return copy_local(Path::new(&uri.key), dest).await;
        }

        let url = self.object_url(uri);
        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ArtifactError::Download(format!("GET {url}: {e}")))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ArtifactError::Download(format!("GET {url}: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(url = %url, bytes = written, "Downloaded object");
        Ok(())
    }
}
