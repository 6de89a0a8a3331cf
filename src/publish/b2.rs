use super::{LocalFile, Publisher, Summary};
use crate::errors::*;
use crate::fetch;
use crate::hash::HashAlgo;
use crate::repo::INDEX_FILES;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

pub const AUTHORIZE_URL: &str = "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";
pub const LIST_PAGE_SIZE: u32 = 1000;
/// Placeholder b2 creates for empty folders
pub const EMPTY_MARKER: &str = ".bzEmpty";
pub const SRC_LAST_MODIFIED: &str = "src_last_modified_millis";

/// Everything but `/` and unreserved characters gets percent encoded in file names
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug)]
pub struct B2 {
    pub http: reqwest::Client,
    pub key_id: String,
    pub key: String,
    pub bucket: String,
    pub public_url: String,
    pub delete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Authorization {
    account_id: String,
    authorization_token: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketList {
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    bucket_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNames<'a> {
    bucket_id: &'a str,
    start_file_name: Option<String>,
    max_file_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileNames {
    files: Vec<RemoteFile>,
    next_file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub file_name: String,
    pub content_length: u64,
    #[serde(default)]
    pub file_info: BTreeMap<String, String>,
}

impl RemoteFile {
    pub fn modified_millis(&self) -> Option<u64> {
        self.file_info.get(SRC_LAST_MODIFIED)?.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    upload_url: String,
    authorization_token: String,
}

/// What a sync run is going to do
#[derive(Debug, Default, PartialEq)]
pub struct Plan<'a> {
    pub upload: Vec<&'a LocalFile>,
    pub skip: Vec<&'a LocalFile>,
    pub hide: Vec<String>,
}

/// Packages are immutable once uploaded, index files get replaced whenever they changed
pub fn plan<'a>(local: &'a [LocalFile], remote: &BTreeMap<String, RemoteFile>, delete: bool) -> Plan<'a> {
    let mut plan = Plan::default();
    for file in local {
        let upload = match remote.get(&file.name) {
            None => true,
            Some(_) if file.is_deb() => false,
            Some(existing) => {
                existing.content_length != file.size
                    || existing.modified_millis() != Some(file.modified_millis)
            }
        };
        if upload {
            plan.upload.push(file);
        } else {
            plan.skip.push(file);
        }
    }

    if delete {
        for name in remote.keys() {
            if !local.iter().any(|file| &file.name == name) {
                plan.hide.push(name.clone());
            }
        }
    }

    plan
}

/// Remote `.deb` files that are missing locally
pub fn missing_debs<'a>(remote: &'a BTreeMap<String, RemoteFile>, repo: &Path) -> Vec<&'a str> {
    remote
        .keys()
        .filter(|name| name.ends_with(".deb"))
        .filter(|name| !repo.join(name.as_str()).exists())
        .map(String::as_str)
        .collect()
}

struct Session {
    auth: Authorization,
    bucket_id: String,
}

impl B2 {
    async fn call<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        session: &Session,
        api: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}/b2api/v2/{api}", session.auth.api_url);
        trace!("Calling b2 api {url:?}");
        let response = self
            .http
            .post(&url)
            .header("Authorization", &session.auth.authorization_token)
            .body(serde_json::to_vec(body)?)
            .send()
            .await
            .with_context(|| anyhow!("Failed to send request to {api}"))?
            .error_for_status()
            .with_context(|| anyhow!("Received http error from {api}"))?
            .bytes()
            .await?;
        let response = serde_json::from_slice(&response)
            .with_context(|| anyhow!("Failed to parse response of {api}"))?;
        Ok(response)
    }

    async fn authorize(&self) -> Result<Session> {
        debug!("Authorizing b2 account");
        let body = self
            .http
            .get(AUTHORIZE_URL)
            .basic_auth(&self.key_id, Some(&self.key))
            .send()
            .await
            .context("Failed to send b2 authorization request")?
            .error_for_status()
            .context("Failed to authorize b2 account")?
            .bytes()
            .await?;
        let auth = serde_json::from_slice::<Authorization>(&body)
            .context("Failed to parse b2 authorization")?;

        let mut session = Session {
            auth,
            bucket_id: String::new(),
        };
        let list = self
            .call::<BucketList, _>(
                &session,
                "b2_list_buckets",
                &serde_json::json!({
                    "accountId": session.auth.account_id,
                    "bucketName": self.bucket,
                }),
            )
            .await?;
        session.bucket_id = list
            .buckets
            .into_iter()
            .next()
            .with_context(|| anyhow!("Bucket not found: {:?}", self.bucket))?
            .bucket_id;
        Ok(session)
    }

    async fn list(&self, session: &Session) -> Result<BTreeMap<String, RemoteFile>> {
        let mut files = BTreeMap::new();
        let mut start_file_name = None;
        loop {
            let page = self
                .call::<FileNames, _>(
                    session,
                    "b2_list_file_names",
                    &ListFileNames {
                        bucket_id: &session.bucket_id,
                        start_file_name,
                        max_file_count: LIST_PAGE_SIZE,
                    },
                )
                .await?;
            for file in page.files {
                if file.file_name.rsplit('/').next() == Some(EMPTY_MARKER) {
                    continue;
                }
                files.insert(file.file_name.clone(), file);
            }
            match page.next_file_name {
                Some(next) => start_file_name = Some(next),
                None => break,
            }
        }
        debug!("Found {} files in bucket {:?}", files.len(), self.bucket);
        Ok(files)
    }

    async fn upload(&self, session: &Session, file: &LocalFile) -> Result<()> {
        let upload = self
            .call::<UploadUrl, _>(
                session,
                "b2_get_upload_url",
                &serde_json::json!({ "bucketId": session.bucket_id }),
            )
            .await?;

        let data = fs::read(&file.path)
            .await
            .with_context(|| anyhow!("Failed to read {:?}", file.path))?;
        let sha1 = HashAlgo::Sha1.hex_digest(&data);

        info!("Uploading {:?} ({} bytes)", file.name, data.len());
        self.http
            .post(&upload.upload_url)
            .header("Authorization", &upload.authorization_token)
            .header("X-Bz-File-Name", utf8_percent_encode(&file.name, FILE_NAME).to_string())
            .header("Content-Type", "b2/x-auto")
            .header("X-Bz-Content-Sha1", sha1)
            .header(
                format!("X-Bz-Info-{SRC_LAST_MODIFIED}"),
                file.modified_millis.to_string(),
            )
            .body(data)
            .send()
            .await
            .with_context(|| anyhow!("Failed to upload {:?}", file.name))?
            .error_for_status()
            .with_context(|| anyhow!("Received http error while uploading {:?}", file.name))?;
        Ok(())
    }

    async fn hide(&self, session: &Session, name: &str) -> Result<()> {
        info!("Hiding remote file {name:?}");
        self.call::<serde_json::Value, _>(
            session,
            "b2_hide_file",
            &serde_json::json!({ "bucketId": session.bucket_id, "fileName": name }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for B2 {
    async fn fetch(&self, repo: &Path) -> Result<()> {
        let session = self.authorize().await?;
        let remote = self.list(&session).await?;
        fs::create_dir_all(repo).await?;

        // downloads through the public url don't count against the api quota
        for name in missing_debs(&remote, repo) {
            if !super::is_plain_name(name) {
                warn!("Skipping remote file with unexpected name: {name:?}");
                continue;
            }
            let url = format!(
                "{}/{}",
                self.public_url.trim_end_matches('/'),
                utf8_percent_encode(name, FILE_NAME)
            );
            fetch::download_deb(&self.http, &url, &repo.join(name)).await?;
        }

        // the index goes last so it's newer than every package it describes
        for name in INDEX_FILES {
            let dest = repo.join(name);
            if remote.contains_key(*name) && !dest.exists() {
                let url = format!("{}/{name}", self.public_url.trim_end_matches('/'));
                fetch::download(&self.http, &url, &dest).await?;
            }
        }
        Ok(())
    }

    async fn publish(&self, repo: &Path) -> Result<Summary> {
        let session = self.authorize().await?;
        let remote = self.list(&session).await?;
        let local = super::scan_local(repo).await?;
        let plan = plan(&local, &remote, self.delete);

        let mut summary = Summary {
            skipped: plan.skip.len(),
            ..Default::default()
        };
        for file in plan.upload {
            self.upload(&session, file).await?;
            summary.uploaded += 1;
            summary.uploaded_bytes += file.size;
        }
        for name in &plan.hide {
            self.hide(&session, name).await?;
            summary.deleted += 1;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn local(name: &str, size: u64, modified_millis: u64) -> LocalFile {
        LocalFile {
            name: name.to_string(),
            path: PathBuf::from("repo").join(name),
            size,
            modified_millis,
        }
    }

    fn remote(name: &str, size: u64, modified_millis: u64) -> (String, RemoteFile) {
        let mut file_info = BTreeMap::new();
        file_info.insert(SRC_LAST_MODIFIED.to_string(), modified_millis.to_string());
        (
            name.to_string(),
            RemoteFile {
                file_name: name.to_string(),
                content_length: size,
                file_info,
            },
        )
    }

    #[test]
    fn test_plan() {
        let local = vec![
            local("InRelease", 100, 2000),
            local("Packages", 50, 1000),
            local("zotero_7.0.11_amd64.deb", 10, 9999),
            local("zotero_7.0.12_amd64.deb", 10, 1000),
        ];
        let remote = BTreeMap::from([
            remote("InRelease", 100, 1000),
            remote("Packages", 50, 1000),
            remote("zotero_7.0.10_amd64.deb", 10, 1000),
            remote("zotero_7.0.11_amd64.deb", 10, 1000),
        ]);

        let plan = plan(&local, &remote, true);
        let upload = plan.upload.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        let skip = plan.skip.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(upload, vec!["InRelease", "zotero_7.0.12_amd64.deb"]);
        assert_eq!(skip, vec!["Packages", "zotero_7.0.11_amd64.deb"]);
        assert_eq!(plan.hide, vec!["zotero_7.0.10_amd64.deb"]);
    }

    #[test]
    fn test_plan_without_delete() {
        let local = vec![local("Packages", 50, 1000)];
        let remote = BTreeMap::from([remote("Packages", 50, 1000), remote("stale.deb", 1, 1)]);
        let plan = plan(&local, &remote, false);
        assert!(plan.upload.is_empty());
        assert!(plan.hide.is_empty());
    }

    #[test]
    fn test_missing_debs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("zotero_7.0.11_amd64.deb"), b"")?;
        let remote = BTreeMap::from([
            remote("Packages", 50, 1000),
            remote("zotero_7.0.10_amd64.deb", 10, 1000),
            remote("zotero_7.0.11_amd64.deb", 10, 1000),
        ]);
        assert_eq!(missing_debs(&remote, dir.path()), vec!["zotero_7.0.10_amd64.deb"]);
        Ok(())
    }

    #[test]
    fn test_file_name_encoding() {
        assert_eq!(
            utf8_percent_encode("by-hash/SHA256/abc", FILE_NAME).to_string(),
            "by-hash/SHA256/abc"
        );
        assert_eq!(
            utf8_percent_encode("zotero-beta_7.1.3+9a1c_amd64.deb", FILE_NAME).to_string(),
            "zotero-beta_7.1.3%2B9a1c_amd64.deb"
        );
    }

    #[test]
    fn test_parse_file_names() -> Result<()> {
        let page = serde_json::from_str::<FileNames>(
            r#"{
  "files": [
    {
      "accountId": "abc",
      "action": "upload",
      "bucketId": "def",
      "contentLength": 2153,
      "contentSha1": "dca51952447d80bd35bf631bc21f06648798b7e0",
      "contentType": "text/plain",
      "fileId": "4_z27c88f1d182b150646ff0b16_f1004ba650fe24e6b_d20150809_m012853_c100_v0009990_t0000",
      "fileInfo": { "src_last_modified_millis": "1642160794155" },
      "fileName": "InRelease",
      "uploadTimestamp": 1642160794155
    }
  ],
  "nextFileName": null
}"#,
        )?;
        assert_eq!(page.files.len(), 1);
        assert!(page.next_file_name.is_none());
        assert_eq!(page.files[0].modified_millis(), Some(1642160794155));
        Ok(())
    }
}
