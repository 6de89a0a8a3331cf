use crate::errors::*;
use crate::exec;
use crate::release::Release;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// An extracted vendor tarball, waiting to be packaged
#[derive(Debug, Clone, PartialEq)]
pub struct StagedTree {
    pub path: PathBuf,
    pub release: Release,
}

const DEB_MAGIC: &[u8] = b"!<arch>\ndebian-binary";

async fn get(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    client
        .get(url)
        .send()
        .await
        .context("Failed to send request")?
        .error_for_status()
        .context("Received http error")
}

/// Stream a http response body into a file
pub async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    info!("Downloading {url:?} to {dest:?}...");
    let response = get(client, url).await?;
    let written = write_stream(response.bytes_stream(), dest, b"").await?;
    debug!("Downloaded {written} bytes from {url:?}");
    Ok(written)
}

/// Download a package, refusing anything that isn't a debian binary package
pub async fn download_deb(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    info!("Downloading {url:?} to {dest:?}...");
    let response = get(client, url).await?;
    let written = write_stream(response.bytes_stream(), dest, DEB_MAGIC)
        .await
        .with_context(|| anyhow!("Failed to download package from {url:?}"))?;
    debug!("Downloaded {written} bytes from {url:?}");
    Ok(written)
}

/// Write a stream of chunks next to `dest` and only move it into place once it's complete
pub async fn write_stream<S, E>(mut stream: S, dest: &Path, magic: &[u8]) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let (file, tmp) = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(dir)
        .with_context(|| anyhow!("Failed to create temporary file in {dir:?}"))?
        .into_parts();
    let mut file = fs::File::from_std(file);

    let mut head = Vec::with_capacity(magic.len());
    let mut written = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to download http response")?;
        if head.len() < magic.len() {
            let n = (magic.len() - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..n]);
        }
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if head != magic {
        bail!(
            "Downloaded file has unexpected content, expected it to start with {:?}",
            String::from_utf8_lossy(magic)
        );
    }

    tmp.persist(dest)
        .with_context(|| anyhow!("Failed to move download into place: {dest:?}"))?;
    Ok(written)
}

/// Download and extract the vendor tarball of a release, reusing an existing staging directory
pub async fn stage(client: &reqwest::Client, staging: &Path, release: &Release) -> Result<StagedTree> {
    let path = staging.join(release.staging_name());
    let staged = StagedTree {
        path: path.clone(),
        release: release.clone(),
    };

    if fs::metadata(&path).await.is_ok() {
        info!("Reusing staged directory: {path:?}");
        return Ok(staged);
    }

    let tarball = tempfile::Builder::new()
        .prefix("zotero-deb-")
        .suffix(".tar")
        .tempfile()
        .context("Failed to create temporary file")?;
    download(client, &release.url, tarball.path()).await?;

    fs::create_dir_all(&path)
        .await
        .with_context(|| anyhow!("Failed to create staging directory: {path:?}"))?;

    // tar detects the compression on its own when reading from a file
    let result = exec::run(
        Command::new("tar")
            .arg("xf")
            .arg(tarball.path())
            .arg("-C")
            .arg(&path)
            .arg("--strip-components=1"),
    )
    .await;
    if let Err(err) = result {
        // don't leave a half-extracted tree behind, it would be reused on the next run
        fs::remove_dir_all(&path).await.ok();
        return Err(err);
    }

    if let Some(badge) = release.channel.badge() {
        if let Err(err) = mark_icons(&path, badge).await {
            fs::remove_dir_all(&path).await.ok();
            return Err(err);
        }
    }

    Ok(staged)
}

/// Draw a glyph onto the icons of a pre-release build
pub async fn mark_icons(staged: &Path, badge: char) -> Result<()> {
    let Some(convert) = exec::find_program(&["magick", "convert"]) else {
        warn!("ImageMagick is not installed, not marking icons of {staged:?}");
        return Ok(());
    };

    let icons = staged.join("chrome/icons/default");
    let mut dir = match fs::read_dir(&icons).await {
        Ok(dir) => dir,
        Err(err) => {
            warn!("Failed to list icons in {icons:?}: {err:#}");
            return Ok(());
        }
    };

    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().is_none() || !entry.file_type().await?.is_file() {
            continue;
        }

        let size = exec::output(
            Command::new(&convert)
                .arg(&path)
                .args(["-format", "%w %h", "info:"]),
        )
        .await?;
        let (width, height) = parse_dimensions(&String::from_utf8_lossy(&size))?;

        info!("Marking icon {path:?} with {badge:?}");
        exec::run(
            Command::new(&convert)
                .arg(&path)
                .args(["-fill", "rgba(3,3,3,0.6)", "-font", "Symbol"])
                .arg("-pointsize")
                .arg(height.to_string())
                .arg("-annotate")
                .arg(format!("+{}+{}", width / 5, height * 4 / 5))
                .arg(badge.to_string())
                .arg(&path),
        )
        .await?;
    }

    Ok(())
}

fn parse_dimensions(s: &str) -> Result<(u32, u32)> {
    let (width, height) = s
        .trim()
        .split_once(' ')
        .with_context(|| anyhow!("Unexpected image dimensions: {s:?}"))?;
    let width = width.parse().context("Failed to parse image width")?;
    let height = height.parse().context("Failed to parse image height")?;
    Ok((width, height))
}

/// Remove every staging directory that isn't in use anymore
pub async fn unstage(staging: &Path, keep: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut dir = match fs::read_dir(staging).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(err) => {
            return Err(err).with_context(|| anyhow!("Failed to list staging directory: {staging:?}"))
        }
    };

    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if keep.contains(&path) || !entry.file_type().await?.is_dir() {
            continue;
        }
        info!("Unstaging {path:?}");
        fs::remove_dir_all(&path)
            .await
            .with_context(|| anyhow!("Failed to remove staging directory: {path:?}"))?;
        removed.push(path);
    }

    Ok(removed)
}
