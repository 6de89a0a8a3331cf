use super::{LocalFile, Publisher, Summary};
use crate::errors::*;
use crate::fetch;
use crate::repo::INDEX_FILES;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

pub const API_URL: &str = "https://api.github.com";
pub const UPLOAD_URL: &str = "https://uploads.github.com";
pub const ASSETS_PAGE_SIZE: usize = 100;

#[derive(Debug)]
pub struct Github {
    pub http: reqwest::Client,
    pub token: String,
    pub repository: String,
    pub tag: String,
    pub delete: bool,
}

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub name: String,
    pub size: u64,
    pub browser_download_url: String,
}

/// What a sync run against release assets is going to do
#[derive(Debug, Default, PartialEq)]
pub struct Plan<'a> {
    pub upload: Vec<&'a LocalFile>,
    /// Assets that need to go before a file of the same name can be uploaded
    pub replace: Vec<&'a Asset>,
    pub skip: Vec<&'a LocalFile>,
    pub delete: Vec<&'a Asset>,
}

/// Release assets are a flat namespace, anything in a subdirectory is left out
pub fn publishable(file: &LocalFile) -> bool {
    !file.name.contains('/')
}

/// Packages are immutable once published, index files are replaced on every run
pub fn plan<'a>(local: &'a [LocalFile], assets: &'a [Asset], delete: bool) -> Plan<'a> {
    let mut plan = Plan::default();
    for file in local.iter().filter(|f| publishable(f)) {
        match assets.iter().find(|asset| asset.name == file.name) {
            Some(asset) if file.is_deb() && asset.size == file.size => plan.skip.push(file),
            Some(asset) => {
                plan.replace.push(asset);
                plan.upload.push(file);
            }
            None => plan.upload.push(file),
        }
    }

    if delete {
        for asset in assets {
            if !local.iter().any(|file| publishable(file) && file.name == asset.name) {
                plan.delete.push(asset);
            }
        }
    }

    plan
}

fn content_type(name: &str) -> &'static str {
    if name.ends_with(".deb") {
        "application/vnd.debian.binary-package"
    } else if name.ends_with(".bz2") {
        "application/x-bzip2"
    } else if name.ends_with(".gpg") {
        "application/pgp-keys"
    } else {
        "application/octet-stream"
    }
}

impl Github {
    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        trace!("Requesting {url:?}");
        let response = self
            .request(self.http.get(url))
            .send()
            .await
            .with_context(|| anyhow!("Failed to send request to {url:?}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .error_for_status()
            .with_context(|| anyhow!("Received http error from {url:?}"))?
            .bytes()
            .await?;
        let body = serde_json::from_slice(&body)
            .with_context(|| anyhow!("Failed to parse response from {url:?}"))?;
        Ok(Some(body))
    }

    async fn release(&self) -> Result<Release> {
        let url = format!(
            "{API_URL}/repos/{}/releases/tags/{}",
            self.repository, self.tag
        );
        if let Some(release) = self.get_json(&url).await? {
            return Ok(release);
        }

        info!("Creating release {:?} in {:?}", self.tag, self.repository);
        let url = format!("{API_URL}/repos/{}/releases", self.repository);
        let body = self
            .request(self.http.post(&url))
            .body(serde_json::to_vec(&serde_json::json!({
                "tag_name": self.tag,
                "name": self.tag,
                "body": "apt repository",
            }))?)
            .send()
            .await
            .context("Failed to send request to create release")?
            .error_for_status()
            .context("Failed to create release")?
            .bytes()
            .await?;
        let release = serde_json::from_slice(&body).context("Failed to parse created release")?;
        Ok(release)
    }

    async fn assets(&self, release: &Release) -> Result<Vec<Asset>> {
        let mut assets = Vec::new();
        for page in 1.. {
            let url = format!(
                "{API_URL}/repos/{}/releases/{}/assets?per_page={ASSETS_PAGE_SIZE}&page={page}",
                self.repository, release.id
            );
            let list = self.get_json::<Vec<Asset>>(&url).await?.unwrap_or_default();
            let len = list.len();
            assets.extend(list);
            if len < ASSETS_PAGE_SIZE {
                break;
            }
        }
        debug!("Found {} assets in release {:?}", assets.len(), self.tag);
        Ok(assets)
    }

    async fn upload(&self, release: &Release, file: &LocalFile) -> Result<()> {
        let data = fs::read(&file.path)
            .await
            .with_context(|| anyhow!("Failed to read {:?}", file.path))?;
        info!("Uploading {:?} ({} bytes)", file.name, data.len());
        let url = format!(
            "{UPLOAD_URL}/repos/{}/releases/{}/assets",
            self.repository, release.id
        );
        self.request(self.http.post(&url))
            .query(&[("name", file.name.as_str())])
            .header("Content-Type", content_type(&file.name))
            .body(data)
            .send()
            .await
            .with_context(|| anyhow!("Failed to upload {:?}", file.name))?
            .error_for_status()
            .with_context(|| anyhow!("Received http error while uploading {:?}", file.name))?;
        Ok(())
    }

    async fn delete_asset(&self, asset: &Asset) -> Result<()> {
        info!("Deleting release asset {:?}", asset.name);
        let url = format!(
            "{API_URL}/repos/{}/releases/assets/{}",
            self.repository, asset.id
        );
        self.request(self.http.delete(&url))
            .send()
            .await
            .with_context(|| anyhow!("Failed to delete asset {:?}", asset.name))?
            .error_for_status()
            .with_context(|| anyhow!("Received http error while deleting {:?}", asset.name))?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for Github {
    async fn fetch(&self, repo: &Path) -> Result<()> {
        let release = self.release().await?;
        let assets = self.assets(&release).await?;
        fs::create_dir_all(repo).await?;

        for asset in assets.iter().filter(|a| a.name.ends_with(".deb")) {
            if !super::is_plain_name(&asset.name) {
                warn!("Skipping release asset with unexpected name: {:?}", asset.name);
                continue;
            }
            let dest = repo.join(&asset.name);
            if dest.exists() {
                continue;
            }
            fetch::download_deb(&self.http, &asset.browser_download_url, &dest).await?;
        }

        // the index goes last so it's newer than every package it describes
        for asset in assets.iter().filter(|a| INDEX_FILES.contains(&a.name.as_str())) {
            let dest = repo.join(&asset.name);
            if !dest.exists() {
                fetch::download(&self.http, &asset.browser_download_url, &dest).await?;
            }
        }
        Ok(())
    }

    async fn publish(&self, repo: &Path) -> Result<Summary> {
        let release = self.release().await?;
        let assets = self.assets(&release).await?;
        let local = super::scan_local(repo).await?;
        let plan = plan(&local, &assets, self.delete);

        let mut summary = Summary {
            skipped: plan.skip.len(),
            ..Default::default()
        };
        for asset in plan.replace.iter().chain(&plan.delete) {
            self.delete_asset(asset).await?;
        }
        summary.deleted = plan.delete.len();
        for file in plan.upload {
            self.upload(&release, file).await?;
            summary.uploaded += 1;
            summary.uploaded_bytes += file.size;
        }
        Ok(summary)
    }
}
