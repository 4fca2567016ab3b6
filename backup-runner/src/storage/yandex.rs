//! Yandex Disk cloud storage over its REST API.

use super::{join_remote, StorageBackend, StorageResult};
use crate::utils::StorageError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::path::Path;
use tokio_util::io::ReaderStream;

const API_BASE: &str = "https://cloud-api.yandex.net/v1/disk";
const LIST_PAGE: usize = 1_000;

pub struct YandexDiskBackend {
    client: Client,
    token: String,
    root: String,
    api_base: String,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct UploadLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Resource {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, rename = "_embedded")]
    embedded: Option<ResourceList>,
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    items: Vec<Resource>,
}

impl YandexDiskBackend {
    pub fn new(token: String, root: String) -> StorageResult<Self> {
        Self::with_api_base(token, root, API_BASE.to_string())
    }

    pub fn with_api_base(token: String, root: String, api_base: String) -> StorageResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("backup-runner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            token,
            root,
            api_base,
            page_size: LIST_PAGE,
        })
    }

    fn disk_path(&self, name: &str) -> String {
        join_remote(&self.root, name)
    }

    fn auth(&self) -> String {
        format!("OAuth {}", self.token)
    }

    async fn resource(&self, name: &str) -> StorageResult<Option<Resource>> {
        self.fetch(name, &[]).await
    }

    /// One page of a directory listing, starting at `offset`.
    async fn listing_page(&self, name: &str, offset: usize) -> StorageResult<Option<Resource>> {
        self.fetch(
            name,
            &[
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    async fn fetch(
        &self,
        name: &str,
        params: &[(&'static str, String)],
    ) -> StorageResult<Option<Resource>> {
        let mut query = vec![("path", self.disk_path(name))];
        query.extend(params.iter().cloned());

        let resp = self
            .client
            .get(format!("{}/resources", self.api_base))
            .header("Authorization", self.auth())
            .query(&query)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(ensure_success(resp).await?.json::<Resource>().await?))
    }
}

async fn ensure_success(resp: Response) -> StorageResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(StorageError::Api {
        status: status.as_u16(),
        message,
    })
}

fn entry_names(listing: Resource) -> Vec<String> {
    listing
        .embedded
        .map(|list| list.items)
        .unwrap_or_default()
        .into_iter()
        .map(|item| item.name.trim_matches('/').to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[async_trait]
impl StorageBackend for YandexDiskBackend {
    async fn is_available(&self) -> bool {
        let resp = self
            .client
            .get(format!("{}/", self.api_base))
            .header("Authorization", self.auth())
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::debug!("Yandex Disk probe returned {}", resp.status());
                false
            }
            Err(e) => {
                tracing::debug!("Yandex Disk probe failed: {}", e);
                false
            }
        }
    }

    async fn copy(&self, source: &Path, dest: &str) -> StorageResult<()> {
        let link: UploadLink = ensure_success(
            self.client
                .get(format!("{}/resources/upload", self.api_base))
                .header("Authorization", self.auth())
                .query(&[
                    ("path", self.disk_path(dest)),
                    ("overwrite", "true".to_string()),
                ])
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        ensure_success(
            self.client
                .put(&link.href)
                .header("Content-Length", length.to_string())
                .body(body)
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    async fn scan_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .listing_page(path, offset)
                .await?
                .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
            let count = page.embedded.as_ref().map_or(0, |list| list.items.len());
            names.extend(entry_names(page));

            // a short page is the last one
            if count < self.page_size {
                return Ok(names);
            }
            offset += count;
        }
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.resource(path).await?.is_some())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let resp = self
            .client
            .delete(format!("{}/resources", self.api_base))
            .header("Authorization", self.auth())
            .query(&[
                ("path", self.disk_path(path)),
                ("permanently", "true".to_string()),
            ])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(path.to_string()));
        }
        // 202 means the removal continues asynchronously; the delete verifier
        // catches it if it has not landed yet.
        ensure_success(resp).await?;
        Ok(())
    }

    async fn get_size(&self, path: &str) -> StorageResult<u64> {
        self.resource(path)
            .await?
            .and_then(|r| r.size)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}
