use crate::args::{self, Credentials};
use crate::config::Config;
use crate::errors::*;
use crate::publish;
use crate::repo;
use crate::site;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const BETA_PREFIX: &str = "zotero-beta";

/// Recursively copy a repository, symlinks are not carried over
pub fn copy_repo(src: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| anyhow!("Failed to walk {src:?}"))?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| anyhow!("Failed to create directory {target:?}"))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| anyhow!("Failed to copy {:?} to {target:?}", entry.path()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// New filename for a beta package, if it needs renaming
pub fn delimited_name(name: &str, delim: &str) -> Option<String> {
    if name.starts_with(BETA_PREFIX) && name.ends_with(".deb") && name.contains('+') {
        Some(name.replace('+', delim))
    } else {
        None
    }
}

pub fn rename_beta_debs(dir: &Path, delim: &str) -> Result<usize> {
    let mut renamed = 0;
    for entry in fs::read_dir(dir).with_context(|| anyhow!("Failed to list {dir:?}"))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(new_name) = delimited_name(&name.to_string_lossy(), delim) else {
            continue;
        };
        let target = dir.join(&new_name);
        debug!("Renaming {:?} to {target:?}", entry.path());
        fs::rename(entry.path(), &target)?;
        renamed += 1;
    }
    Ok(renamed)
}

/// Codename as it appears in sources.list for a flat repository in a subdirectory
pub fn flat_codename(codename: &str) -> String {
    format!("{}/", codename.trim_matches('/'))
}

pub async fn republish(
    config: &Config,
    args: &args::Republish,
    credentials: &Credentials,
) -> Result<()> {
    let target = config.target(&args.target)?;
    let codename = args.codename.trim_matches('/');
    if codename.is_empty() || codename.contains('/') {
        bail!("Codename must be a single directory name: {:?}", args.codename);
    }

    let build = tempfile::Builder::new()
        .prefix("zotero-deb-republish-")
        .tempdir()
        .context("Failed to create build directory")?;
    let dir = build.path().join(codename);

    let (copied, renamed) = {
        let src = config.data.repo.clone();
        let dir = dir.clone();
        let beta_delim = args.beta_delim.clone();
        tokio::task::spawn_blocking(move || -> Result<(usize, usize)> {
            let copied = copy_repo(&src, &dir)?;
            let renamed = match &beta_delim {
                Some(delim) => rename_beta_debs(&dir, delim)?,
                None => 0,
            };
            Ok((copied, renamed))
        })
        .await
        .context("Failed to join copy task")??
    };
    info!("Copied {copied} files to {dir:?}");
    if renamed > 0 {
        debug!("Renamed {renamed} beta packages");
    }

    let release_codename = flat_codename(codename);
    repo::build_index(config, &dir, build.path(), codename, &release_codename).await?;

    let install_sh = dir.join("install.sh");
    let script = match tokio::fs::read_to_string(&install_sh).await {
        Ok(script) => site::patch_install_sh(&script, &args.baseurl, &release_codename),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            site::install_sh(&args.baseurl, &release_codename)
        }
        Err(err) => return Err(err).with_context(|| anyhow!("Failed to read {install_sh:?}")),
    };
    tokio::fs::write(&install_sh, script).await?;

    let publisher = publish::publisher(target, credentials, config.http_client()?)?;
    let summary = publisher.publish(build.path()).await?;
    info!("Republished {codename:?} to {:?}: {summary}", target.name);
    Ok(())
}
