use crate::args::{self, Credentials};
use crate::config::Config;
use crate::errors::*;
use crate::fetch;
use crate::lock::Lock;
use crate::package;
use crate::publish;
use crate::release::Release;
use crate::repo;
use crate::resolve::{Filter, Resolver};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const OUTPUT_NAME: &str = "rebuilt";

/// Difference between the repository and upstream
#[derive(Debug, Default, PartialEq)]
pub struct Plan {
    /// Packages that are no longer offered upstream
    pub delete: Vec<PathBuf>,
    /// Releases that don't have a package in the repository yet
    pub build: Vec<Release>,
}

impl Plan {
    pub fn new(repo: &Path, releases: &[Release], existing: &[PathBuf]) -> Plan {
        let wanted = releases
            .iter()
            .map(|release| release.deb_path(repo))
            .collect::<Vec<_>>();

        let delete = existing
            .iter()
            .filter(|deb| !wanted.contains(deb))
            .cloned()
            .collect();

        let mut build = Vec::<Release>::new();
        for (release, path) in releases.iter().zip(&wanted) {
            if existing.contains(path) || build.iter().any(|b| b.deb_path(repo) == *path) {
                continue;
            }
            build.push(release.clone());
        }

        Plan { delete, build }
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.build.is_empty()
    }
}

/// Packages that were filtered out are kept, only selected clients and channels are pruned
pub fn filter_existing(existing: Vec<PathBuf>, filter: &Filter, releases: &[Release]) -> Vec<PathBuf> {
    if filter.clients.is_empty() && filter.channels.is_empty() {
        return existing;
    }
    let packages = releases
        .iter()
        .map(|release| release.package())
        .collect::<Vec<_>>();
    existing
        .into_iter()
        .filter(|deb| {
            let name = deb.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            crate::release::parse_deb_filename(&name)
                .map(|(package, _, _)| packages.iter().any(|p| p == package))
                .unwrap_or(false)
        })
        .collect()
}

/// Tell the GitHub Actions runner that the repository changed
pub async fn set_output(name: &str, value: &str) -> Result<()> {
    if let Some(path) = env::var_os("GITHUB_OUTPUT") {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| anyhow!("Failed to open GITHUB_OUTPUT file: {path:?}"))?;
        file.write_all(format!("{name}={value}\n").as_bytes()).await?;
    } else {
        println!("::set-output name={name}::{value}");
    }
    Ok(())
}

pub async fn rebuild(config: &Config, args: args::Rebuild, credentials: &Credentials) -> Result<bool> {
    let repo_dir = &config.data.repo;
    let staging = &config.data.staging;
    fs::create_dir_all(repo_dir)
        .await
        .with_context(|| anyhow!("Failed to create repository directory: {repo_dir:?}"))?;
    fs::create_dir_all(staging)
        .await
        .with_context(|| anyhow!("Failed to create staging directory: {staging:?}"))?;
    let _lock = Lock::acquire(staging).await?;

    if let Some(name) = &args.fetch {
        let target = config.target(name)?;
        let publisher = publish::publisher(target, credentials, config.http_client()?)?;
        info!("Fetching existing packages from {name:?}");
        publisher.fetch(repo_dir).await?;
    }

    let filter = Filter::from(args.filter);
    let releases = Resolver::new(config)?.resolve(&filter).await?;
    if releases.is_empty() {
        bail!("No upstream releases found, refusing to prune the repository");
    }
    let existing = filter_existing(repo::prebuilt(repo_dir).await?, &filter, &releases);
    let plan = Plan::new(repo_dir, &releases, &existing);

    for deb in &plan.delete {
        info!("Deleting {deb:?}");
        fs::remove_file(deb)
            .await
            .with_context(|| anyhow!("Failed to delete stale package: {deb:?}"))?;
        let changes = deb.with_extension("changes");
        if fs::metadata(&changes).await.is_ok() {
            fs::remove_file(&changes).await?;
        }
    }

    let http = config.http_client()?;
    for release in &plan.build {
        let staged = fetch::stage(&http, staging, release).await?;
        let deb = package::package(config, &staged.path, !args.no_sign).await?;

        let expected = release.deb_path(repo_dir);
        if deb != expected {
            bail!("Package was built as {deb:?} but upstream release expects {expected:?}");
        }
        fs::remove_dir_all(&staged.path)
            .await
            .with_context(|| anyhow!("Failed to remove staged directory: {:?}", staged.path))?;
    }

    for dir in fetch::unstage(staging, &[]).await? {
        debug!("Removed leftover staging directory {dir:?}");
    }

    if plan.is_empty() {
        // an earlier run may have changed packages and failed before the index was written
        let debs = repo::prebuilt(repo_dir).await?;
        if !repo::index_stale(repo_dir, &debs).await? {
            info!("Nothing to do");
            return Ok(false);
        }
        info!("Repository index is out of date, rebuilding index");
    } else {
        info!(
            "Removed {} and added {} packages, rebuilding index",
            plan.delete.len(),
            plan.build.len()
        );
    }
    repo::mkrepo(config).await?;
    set_output(OUTPUT_NAME, "true").await?;
    Ok(true)
}
