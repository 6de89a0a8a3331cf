pub mod b2;
pub mod github;
pub mod rsync;

use crate::args::Credentials;
use crate::config::{Target, TargetKind};
use crate::errors::*;
use async_trait::async_trait;
use num_format::{Locale, ToFormattedString};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

#[async_trait]
pub trait Publisher {
    /// Download remote state that isn't present locally, before the repository gets rebuilt
    async fn fetch(&self, repo: &Path) -> Result<()>;

    /// Make the remote match the local repository directory
    async fn publish(&self, repo: &Path) -> Result<Summary>;
}

#[derive(Debug, Default, PartialEq)]
pub struct Summary {
    pub uploaded: usize,
    pub uploaded_bytes: u64,
    pub skipped: usize,
    pub deleted: usize,
}

impl Summary {
    pub fn is_noop(&self) -> bool {
        self.uploaded == 0 && self.deleted == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        if self.is_noop() && self.skipped == 0 {
            return w.write_str("done");
        }
        write!(
            w,
            "{} uploaded ({} bytes), {} unchanged, {} deleted",
            self.uploaded,
            self.uploaded_bytes.to_formatted_string(&Locale::en),
            self.skipped,
            self.deleted
        )
    }
}

pub fn publisher(
    target: &Target,
    credentials: &Credentials,
    http: reqwest::Client,
) -> Result<Box<dyn Publisher + Send + Sync>> {
    let publisher: Box<dyn Publisher + Send + Sync> = match &target.kind {
        TargetKind::Rsync { remote, retries } => Box::new(rsync::Rsync {
            remote: remote.clone(),
            retries: *retries,
            delete: target.delete(),
        }),
        TargetKind::B2 { bucket, public_url } => {
            let key_id = credentials
                .b2_application_key_id
                .clone()
                .context("B2_APPLICATION_KEY_ID is not set")?;
            let key = credentials
                .b2_application_key
                .clone()
                .context("B2_APPLICATION_KEY is not set")?;
            Box::new(b2::B2 {
                http,
                key_id,
                key,
                bucket: bucket.clone(),
                public_url: public_url.clone(),
                delete: target.delete(),
            })
        }
        TargetKind::Github { repository, tag } => {
            let token = credentials
                .github_token
                .clone()
                .context("GITHUB_TOKEN is not set")?;
            Box::new(github::Github {
                http,
                token,
                repository: repository.clone(),
                tag: tag.clone(),
                delete: target.delete(),
            })
        }
    };
    Ok(publisher)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    /// Path relative to the repository root, with `/` separators
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified_millis: u64,
}

impl LocalFile {
    pub fn is_deb(&self) -> bool {
        self.name.ends_with(".deb")
    }
}

/// Remote names end up as paths in the repository, only plain file names are accepted
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// List regular files in the repository, symlinks are never published
pub async fn scan_local(repo: &Path) -> Result<Vec<LocalFile>> {
    let repo = repo.to_owned();
    tokio::task::spawn_blocking(move || walk_repo(&repo))
        .await
        .context("Failed to join scan task")?
}

fn walk_repo(repo: &Path) -> Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(repo).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| anyhow!("Failed to walk {repo:?}"))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        let relative = entry.path().strip_prefix(repo)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let modified_millis = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        files.push(LocalFile {
            name,
            path: entry.path().to_owned(),
            size: metadata.len(),
            modified_millis,
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_local() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("by-hash/SHA256"))?;
        std::fs::write(dir.path().join("by-hash/SHA256/abcd"), b"ohai")?;
        std::fs::write(dir.path().join("zotero_7.0.11_amd64.deb"), b"!<arch>\n")?;
        std::os::unix::fs::symlink("zotero_7.0.11_amd64.deb", dir.path().join("latest.deb"))?;

        let files = scan_local(dir.path()).await?;
        let names = files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["by-hash/SHA256/abcd", "zotero_7.0.11_amd64.deb"]);
        assert_eq!(files[0].size, 4);
        assert!(!files[0].is_deb());
        assert!(files[1].is_deb());
        Ok(())
    }

    #[test]
    fn test_is_plain_name() {
        assert!(is_plain_name("zotero_7.0.11_amd64.deb"));
        assert!(!is_plain_name("../zotero_7.0.11_amd64.deb"));
        assert!(!is_plain_name("/etc/zotero_7.0.11_amd64.deb"));
        assert!(!is_plain_name("pool/zotero_7.0.11_amd64.deb"));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name(""));
    }

    #[test]
    fn test_summary_noop() {
        assert!(Summary::default().is_noop());
        assert!(Summary {
            skipped: 3,
            ..Default::default()
        }
        .is_noop());
        assert!(!Summary {
            deleted: 1,
            ..Default::default()
        }
        .is_noop());
    }

    #[test]
    fn test_summary_display() {
        let summary = Summary {
            uploaded: 2,
            uploaded_bytes: 123_456_789,
            skipped: 40,
            deleted: 1,
        };
        assert_eq!(
            summary.to_string(),
            "2 uploaded (123,456,789 bytes), 40 unchanged, 1 deleted"
        );
        assert_eq!(Summary::default().to_string(), "done");
    }
}
