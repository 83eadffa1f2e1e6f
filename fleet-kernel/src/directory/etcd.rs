//! etcd v2 keys API client.
//!
//! `GET {endpoint}/v2/keys{key}` returns `{"action": "get", "node": {...}}`
//! on success and `{"errorCode": .., "message": ..}` on failure. Endpoints are
//! tried in order; only transport failures move on to the next one.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DirEntry, DirListing, Directory};
use crate::error::DirectoryError;

/// etcd `errorCode` for a missing key.
const ETCD_KEY_NOT_FOUND: u64 = 100;

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    node: EtcdNode,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    key: Option<String>,
    #[serde(default)]
    dir: bool,
    value: Option<String>,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u64,
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

pub struct EtcdDirectory {
    endpoints: Vec<String>,
    http: reqwest::Client,
}

impl EtcdDirectory {
    /// `endpoints` may be bare `host:port` pairs; `http://` is assumed.
    pub fn new(endpoints: &[String], request_timeout: Duration) -> Result<Self, DirectoryError> {
        if endpoints.is_empty() {
            return Err(DirectoryError::Unreachable("no etcd endpoints configured".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DirectoryError::Unreachable(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoints: endpoints.iter().map(|e| normalize_endpoint(e)).collect(),
            http,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn fetch(&self, key: &str) -> Result<EtcdNode, DirectoryError> {
        let mut last_err = None;
        for endpoint in &self.endpoints {
            let url = keys_url(endpoint, key);
            debug!("GET {}", url);
            let resp = match self.http.get(&url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("etcd endpoint {} failed: {}", endpoint, e);
                    last_err = Some(DirectoryError::Unreachable(format!("{endpoint}: {e}")));
                    continue;
                }
            };
            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| DirectoryError::Unreachable(format!("{endpoint}: {e}")))?;
            return decode_body(key, status.is_success(), &body);
        }
        Err(last_err
            .unwrap_or_else(|| DirectoryError::Unreachable("no etcd endpoint answered".into())))
    }
}

#[async_trait]
impl Directory for EtcdDirectory {
    async fn list(&self, path: &str) -> Result<DirListing, DirectoryError> {
        let node = self.fetch(path).await?;
        Ok(listing_from_node(node))
    }

    async fn get(&self, key: &str) -> Result<String, DirectoryError> {
        let node = self.fetch(key).await?;
        if node.dir {
            return Err(DirectoryError::Protocol(format!("{key} is a directory")));
        }
        node.value
            .ok_or_else(|| DirectoryError::Protocol(format!("{key} has no value")))
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn keys_url(endpoint: &str, key: &str) -> String {
    if key.starts_with('/') {
        format!("{endpoint}/v2/keys{key}")
    } else {
        format!("{endpoint}/v2/keys/{key}")
    }
}

fn decode_body(key: &str, success: bool, body: &str) -> Result<EtcdNode, DirectoryError> {
    if success {
        let resp: EtcdResponse = serde_json::from_str(body)
            .map_err(|e| DirectoryError::Protocol(format!("{key}: {e}")))?;
        return Ok(resp.node);
    }
    match serde_json::from_str::<EtcdErrorBody>(body) {
        Ok(err) if err.error_code == ETCD_KEY_NOT_FOUND => {
            Err(DirectoryError::NotFound(key.to_string()))
        }
        Ok(err) => Err(DirectoryError::Protocol(format!(
            "{key}: etcd error {} ({}{})",
            err.error_code,
            err.message,
            err.cause.map(|c| format!(": {c}")).unwrap_or_default()
        ))),
        Err(_) => Err(DirectoryError::Protocol(format!("{key}: unexpected response {body:?}"))),
    }
}

fn listing_from_node(node: EtcdNode) -> DirListing {
    if !node.dir {
        return DirListing {
            is_dir: false,
            children: Vec::new(),
        };
    }
    let children = node
        .nodes
        .into_iter()
        .filter_map(|child| {
            child.key.map(|key| DirEntry {
                key,
                is_dir: child.dir,
            })
        })
        .collect();
    DirListing {
        is_dir: true,
        children,
    }
}
