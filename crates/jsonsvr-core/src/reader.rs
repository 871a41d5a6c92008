use crate::error::{InterpretError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::io::ErrorKind;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_OBJECT_STORAGE_ENDPOINT: &str = "https://s3.amazonaws.com";
pub const DEFAULT_OBJECT_STORAGE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Source of response templates and data files.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String>;
}

fn object_uri() -> &'static Regex {
    static OBJECT_URI: OnceLock<Regex> = OnceLock::new();
    OBJECT_URI.get_or_init(|| {
        Regex::new(r"(?i)^s3://([^/]+)/(.+)$").expect("object storage pattern is valid")
    })
}

/// True when `path` addresses object storage (`s3://bucket/key`).
pub fn is_object_storage_uri(path: &str) -> bool {
    object_uri().is_match(path)
}

/// Split an object storage URI into bucket and key.
pub fn parse_object_uri(path: &str) -> Option<(&str, &str)> {
    let caps = object_uri().captures(path)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

#[derive(Debug, Clone, Default)]
pub struct LocalFileReader;

#[async_trait]
impl FileReader for LocalFileReader {
    async fn read_file(&self, path: &str) -> Result<String> {
        debug!(path, "reading local file");
        tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => InterpretError::FileNotFound(path.to_string()),
            _ => InterpretError::Read {
                path: path.to_string(),
                message: e.to_string(),
            },
        })
    }
}

/// Fetches objects over plain HTTPS from `{endpoint}/{bucket}/{key}`.
///
/// Requests are unsigned, so only public objects (or a presigning proxy in
/// front of the endpoint) are reachable.
#[derive(Clone)]
pub struct ObjectStorageReader {
    endpoint: String,
    agent: ureq::Agent,
}

impl ObjectStorageReader {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn object_url(&self, path: &str) -> Option<String> {
        let (bucket, key) = parse_object_uri(path)?;
        Some(format!("{}/{}/{}", self.endpoint, bucket, key))
    }
}

impl Default for ObjectStorageReader {
    fn default() -> Self {
        Self::new(DEFAULT_OBJECT_STORAGE_ENDPOINT, DEFAULT_OBJECT_STORAGE_TIMEOUT)
    }
}

#[async_trait]
impl FileReader for ObjectStorageReader {
    async fn read_file(&self, path: &str) -> Result<String> {
        let Some(url) = self.object_url(path) else {
            return Err(InterpretError::Read {
                path: path.to_string(),
                message: "not an object storage URI".to_string(),
            });
        };
        debug!(path, %url, "fetching object");

        let agent = self.agent.clone();
        let owned = path.to_string();
        let read_error = |message: String| InterpretError::Read {
            path: path.to_string(),
            message,
        };

        tokio::task::spawn_blocking(move || fetch_object(&agent, &url, &owned))
            .await
            .map_err(|e| read_error(e.to_string()))?
    }
}

fn fetch_object(agent: &ureq::Agent, url: &str, path: &str) -> Result<String> {
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(404, _)) => {
            return Err(InterpretError::FileNotFound(path.to_string()));
        }
        Err(ureq::Error::Status(code, _)) => {
            return Err(InterpretError::Read {
                path: path.to_string(),
                message: format!("object storage answered {code}"),
            });
        }
        Err(e) => {
            return Err(InterpretError::Read {
                path: path.to_string(),
                message: e.to_string(),
            });
        }
    };

    response.into_string().map_err(|e| InterpretError::Read {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Picks the reader for a path: object storage URIs go to the object store,
/// everything else to the local filesystem.
#[derive(Clone)]
pub struct Readers {
    local: Arc<dyn FileReader>,
    object_storage: Arc<dyn FileReader>,
}

impl Readers {
    pub fn new(local: Arc<dyn FileReader>, object_storage: Arc<dyn FileReader>) -> Self {
        Self {
            local,
            object_storage,
        }
    }

    pub fn reader_for(&self, path: &str) -> &dyn FileReader {
        if is_object_storage_uri(path) {
            self.object_storage.as_ref()
        } else {
            self.local.as_ref()
        }
    }

    pub async fn read(&self, path: &str) -> Result<String> {
        self.reader_for(path).read_file(path).await
    }
}

impl Default for Readers {
    fn default() -> Self {
        Self::new(
            Arc::new(LocalFileReader),
            Arc::new(ObjectStorageReader::default()),
        )
    }
}

impl std::fmt::Debug for Readers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readers").finish_non_exhaustive()
    }
}
