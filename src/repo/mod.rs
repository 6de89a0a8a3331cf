pub mod release;

use self::release::ReleaseFile;
use crate::config::Config;
use crate::errors::*;
use crate::exec;
use crate::hash::HashAlgo;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::process::Command;

pub const KEYRING_NAME: &str = "zotero-archive-keyring";

/// Generated index files, removed before every rebuild
pub const INDEX_FILES: &[&str] = &[
    "Packages",
    "Packages.bz2",
    "Release",
    "Release.gpg",
    "InRelease",
];

/// Index files of a repository directory
#[derive(Debug)]
pub struct RepositoryIndex {
    pub path: PathBuf,
    pub release: ReleaseFile,
}

impl RepositoryIndex {
    pub async fn load(path: &Path) -> Result<Self> {
        let release_path = path.join("Release");
        let bytes = fs::read(&release_path)
            .await
            .with_context(|| anyhow!("Failed to read {release_path:?}"))?;
        let release = ReleaseFile::parse(&bytes)
            .with_context(|| anyhow!("Failed to parse {release_path:?}"))?;
        Ok(RepositoryIndex {
            path: path.to_owned(),
            release,
        })
    }

    pub fn by_hash_path(&self, algo: HashAlgo, hash: &str) -> PathBuf {
        self.path.join("by-hash").join(algo.section()).join(hash)
    }

    /// Verify size and hash of every referenced file, then copy it into `by-hash/`
    pub async fn write_by_hash(&self) -> Result<usize> {
        let by_hash = self.path.join("by-hash");
        if fs::metadata(&by_hash).await.is_ok() {
            fs::remove_dir_all(&by_hash)
                .await
                .with_context(|| anyhow!("Failed to remove {by_hash:?}"))?;
        }

        let mut written = 0;
        for (algo, entries) in self.release.hash_sections() {
            let dir = by_hash.join(algo.section());
            fs::create_dir_all(&dir).await?;

            for entry in entries {
                // Release can't contain its own hash
                if entry.path == "Release" {
                    continue;
                }

                let path = self.path.join(&entry.path);
                let data = fs::read(&path)
                    .await
                    .with_context(|| anyhow!("Failed to read indexed file: {path:?}"))?;
                if data.len() as u64 != entry.size {
                    bail!(
                        "Size mismatch for {:?}: Release says {}, file has {}",
                        entry.path,
                        entry.size,
                        data.len()
                    );
                }
                let hash = algo.hex_digest(&data);
                if hash != entry.hash {
                    bail!("{algo} mismatch for {:?}: expected {}, got {hash}", entry.path, entry.hash);
                }

                let target = self.by_hash_path(algo, &entry.hash);
                debug!("Copying {path:?} to {target:?}");
                fs::write(&target, &data).await?;
                written += 1;
            }
        }

        Ok(written)
    }

    /// List every (algorithm, file) pair that is advertised but missing from `by-hash/`
    pub async fn missing_by_hash(&self) -> Vec<(HashAlgo, String)> {
        let mut missing = Vec::new();
        for (algo, entries) in self.release.hash_sections() {
            for entry in entries {
                if entry.path == "Release" {
                    continue;
                }
                let path = self.by_hash_path(algo, &entry.hash);
                if fs::metadata(&path).await.is_err() {
                    missing.push((algo, entry.path.clone()));
                }
            }
        }
        missing
    }
}

/// `apt-ftparchive` exits successfully even if it printed errors, see debian bug #299035
pub fn check_ftparchive_output(output: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(output);
    let errors = text
        .lines()
        .filter(|line| line.starts_with("E: "))
        .collect::<Vec<_>>();
    if !errors.is_empty() {
        bail!("apt-ftparchive reported errors: {}", errors.join("; "));
    }
    Ok(())
}

pub fn bzip2(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    let compressed = encoder.finish().context("Failed to finish bzip2 stream")?;
    Ok(compressed)
}

async fn remove_index_files(dir: &Path) -> Result<()> {
    for name in INDEX_FILES {
        let path = dir.join(name);
        if fs::metadata(&path).await.is_ok() {
            debug!("Removing old index file {path:?}");
            fs::remove_file(&path).await?;
        }
    }
    let by_hash = dir.join("by-hash");
    if fs::metadata(&by_hash).await.is_ok() {
        fs::remove_dir_all(&by_hash).await?;
    }
    Ok(())
}

/// Write `Packages` into `dir`, scanning `scan` relative to `cwd`
pub async fn write_packages(cwd: &Path, scan: &str, dir: &Path) -> Result<()> {
    let packages = exec::output(
        Command::new("apt-ftparchive")
            .current_dir(cwd)
            .arg("packages")
            .arg(scan),
    )
    .await?;
    check_ftparchive_output(&packages)?;
    fs::write(dir.join("Packages"), &packages).await?;

    let compressed = bzip2(&packages)?;
    fs::write(dir.join("Packages.bz2"), compressed).await?;
    Ok(())
}

pub async fn write_release(dir: &Path, codename: &str) -> Result<()> {
    let release = exec::output(
        Command::new("apt-ftparchive")
            .current_dir(dir)
            .args(["-o", "APT::FTPArchive::AlwaysStat=true"])
            .arg("-o")
            .arg(format!("APT::FTPArchive::Release::Codename={codename}"))
            .args(["-o", "APT::FTPArchive::Release::Acquire-By-Hash=yes"])
            .args(["release", "."]),
    )
    .await?;
    check_ftparchive_output(&release)?;
    fs::write(dir.join("Release"), release).await?;
    Ok(())
}

pub async fn export_keyring(dir: &Path, gpgkey: &str) -> Result<()> {
    exec::output_to(
        Command::new("gpg").arg("--export").arg(gpgkey),
        &dir.join(format!("{KEYRING_NAME}.gpg")),
    )
    .await?;
    exec::output_to(
        Command::new("gpg").args(["--armor", "--export"]).arg(gpgkey),
        &dir.join(format!("{KEYRING_NAME}.asc")),
    )
    .await?;
    Ok(())
}

pub async fn sign_release(dir: &Path, gpgkey: &str) -> Result<()> {
    exec::run(
        Command::new("gpg")
            .current_dir(dir)
            .args(["--yes", "-abs", "--local-user"])
            .arg(gpgkey)
            .args(["-o", "Release.gpg", "--digest-algo", "sha256", "Release"]),
    )
    .await?;
    exec::run(
        Command::new("gpg")
            .current_dir(dir)
            .args(["--yes", "-abs", "--local-user"])
            .arg(gpgkey)
            .args(["--clearsign", "-o", "InRelease", "--digest-algo", "sha256", "Release"]),
    )
    .await?;
    Ok(())
}

/// Regenerate, sign and by-hash the index of a repository directory
///
/// `scan` is the directory handed to `apt-ftparchive packages`, relative to
/// `cwd`. For a flat repository both are `.` and the repository itself.
pub async fn build_index(
    config: &Config,
    dir: &Path,
    cwd: &Path,
    scan: &str,
    codename: &str,
) -> Result<RepositoryIndex> {
    info!("Rebuilding repository index in {dir:?}");
    remove_index_files(dir).await?;

    write_packages(cwd, scan, dir).await?;
    write_release(dir, codename).await?;

    let gpgkey = &config.data.maintainer.gpgkey;
    export_keyring(dir, gpgkey).await?;
    sign_release(dir, gpgkey).await?;

    let index = RepositoryIndex::load(dir).await?;
    let n = index.write_by_hash().await?;
    info!("Wrote {n} by-hash entries");
    Ok(index)
}

pub async fn mkrepo(config: &Config) -> Result<RepositoryIndex> {
    let repo = &config.data.repo;
    fs::create_dir_all(repo).await?;
    build_index(config, repo, repo, ".", &config.data.codename).await
}

/// List the `.deb` files currently in the repository
pub async fn prebuilt(repo: &Path) -> Result<Vec<PathBuf>> {
    let mut debs = Vec::new();
    let mut dir = match fs::read_dir(repo).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(debs),
        Err(err) => return Err(err).with_context(|| anyhow!("Failed to list {repo:?}")),
    };
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "deb") && entry.file_type().await?.is_file() {
            debs.push(path);
        }
    }
    debs.sort();
    Ok(debs)
}

async fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.modified()?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| anyhow!("Failed to stat {path:?}")),
    }
}

/// Package filenames listed in a `Packages` index
pub fn indexed_packages(packages: &str) -> BTreeSet<&str> {
    packages
        .lines()
        .filter_map(|line| line.strip_prefix("Filename:"))
        .map(|name| name.trim())
        .map(|name| name.trim_start_matches("./"))
        .collect()
}

/// Check if the index is missing or doesn't describe the packages in the repository anymore
pub async fn index_stale(repo: &Path, debs: &[PathBuf]) -> Result<bool> {
    let Some(release) = modified(&repo.join("Release")).await? else {
        debug!("Repository has no Release file");
        return Ok(true);
    };
    if modified(&repo.join("InRelease")).await?.is_none() {
        debug!("Repository has no InRelease file");
        return Ok(true);
    }

    for deb in debs {
        if modified(deb).await?.is_some_and(|mtime| mtime > release) {
            debug!("Package is newer than the index: {deb:?}");
            return Ok(true);
        }
    }

    let path = repo.join("Packages");
    let packages = match fs::read_to_string(&path).await {
        Ok(packages) => packages,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err).with_context(|| anyhow!("Failed to read {path:?}")),
    };
    let indexed = indexed_packages(&packages);
    let names = debs
        .iter()
        .filter_map(|deb| deb.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    let present = names.iter().map(String::as_str).collect::<BTreeSet<_>>();
    if indexed != present {
        debug!("Packages index doesn't match the repository contents");
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::read::BzDecoder;
    use std::io::Read;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    async fn fixture() -> Result<tempfile::TempDir> {
        init();
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("Packages"), b"ohai").await?;
        fs::write(dir.path().join("Packages.bz2"), b"").await?;
        fs::write(dir.path().join("Release"), release::tests::RELEASE).await?;
        Ok(dir)
    }

    #[tokio::test]
    async fn test_write_by_hash() -> Result<()> {
        let dir = fixture().await?;
        let index = RepositoryIndex::load(dir.path()).await?;
        assert_eq!(index.missing_by_hash().await.len(), 4);

        let n = index.write_by_hash().await?;
        assert_eq!(n, 4);
        assert!(index.missing_by_hash().await.is_empty());

        let copied = fs::read(
            dir.path()
                .join("by-hash/SHA256/e84712238709398f6d349dc2250b0efca4b72d8c2bfb7b74339d30ba94056b14"),
        )
        .await?;
        assert_eq!(copied, b"ohai");
        assert!(dir
            .path()
            .join("by-hash/MD5Sum/d41d8cd98f00b204e9800998ecf8427e")
            .exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_write_by_hash_mismatch() -> Result<()> {
        let dir = fixture().await?;
        fs::write(dir.path().join("Packages"), b"ohno").await?;
        let index = RepositoryIndex::load(dir.path()).await?;
        let err = index.write_by_hash().await.err().unwrap().to_string();
        assert!(err.contains("mismatch for \"Packages\""), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn test_write_by_hash_size_mismatch() -> Result<()> {
        let dir = fixture().await?;
        fs::write(dir.path().join("Packages"), b"ohai!").await?;
        let index = RepositoryIndex::load(dir.path()).await?;
        let err = index.write_by_hash().await.err().unwrap().to_string();
        assert!(err.starts_with("Size mismatch"), "{err}");
        Ok(())
    }

    #[test]
    fn test_check_ftparchive_output() {
        assert!(check_ftparchive_output(b"Package: zotero\nVersion: 7.0.11\n").is_ok());
        let err = check_ftparchive_output(b"Package: zotero\nE: Unable to open ./broken.deb\n")
            .err()
            .unwrap()
            .to_string();
        assert_eq!(
            err,
            "apt-ftparchive reported errors: E: Unable to open ./broken.deb"
        );
    }

    #[test]
    fn test_bzip2() -> Result<()> {
        let compressed = bzip2(b"Package: zotero\n")?;
        assert!(compressed.starts_with(b"BZh"));
        let mut decoded = Vec::new();
        BzDecoder::new(&compressed[..]).read_to_end(&mut decoded)?;
        assert_eq!(decoded, b"Package: zotero\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_prebuilt_and_cleanup() -> Result<()> {
        let dir = fixture().await?;
        fs::write(dir.path().join("zotero_7.0.11_amd64.deb"), b"").await?;
        fs::write(dir.path().join("zotero_7.0.11_amd64.changes"), b"").await?;
        assert_eq!(
            prebuilt(dir.path()).await?,
            vec![dir.path().join("zotero_7.0.11_amd64.deb")]
        );

        remove_index_files(dir.path()).await?;
        assert!(!dir.path().join("Packages").exists());
        assert!(!dir.path().join("Release").exists());
        assert!(dir.path().join("zotero_7.0.11_amd64.deb").exists());
        Ok(())
    }

    #[test]
    fn test_indexed_packages() {
        let packages = "Package: zotero\nFilename: ./zotero_7.0.11_amd64.deb\nSize: 10\n\nPackage: jurism\nFilename: jurism_6.0.30m3_i386.deb\n";
        assert_eq!(
            indexed_packages(packages).into_iter().collect::<Vec<_>>(),
            vec!["jurism_6.0.30m3_i386.deb", "zotero_7.0.11_amd64.deb"]
        );
    }

    async fn indexed_fixture() -> Result<(tempfile::TempDir, Vec<PathBuf>)> {
        init();
        let dir = tempfile::tempdir()?;
        let deb = dir.path().join("zotero_7.0.11_amd64.deb");
        fs::write(&deb, b"!<arch>\n").await?;
        let old = SystemTime::now() - std::time::Duration::from_secs(3600);
        std::fs::File::options().write(true).open(&deb)?.set_modified(old)?;
        fs::write(
            dir.path().join("Packages"),
            "Package: zotero\nFilename: ./zotero_7.0.11_amd64.deb\n",
        )
        .await?;
        fs::write(dir.path().join("Release"), release::tests::RELEASE).await?;
        fs::write(dir.path().join("InRelease"), b"").await?;
        Ok((dir, vec![deb]))
    }

    #[tokio::test]
    async fn test_index_up_to_date() -> Result<()> {
        let (dir, debs) = indexed_fixture().await?;
        assert!(!index_stale(dir.path(), &debs).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_index_missing() -> Result<()> {
        let (dir, debs) = indexed_fixture().await?;
        fs::remove_file(dir.path().join("InRelease")).await?;
        assert!(index_stale(dir.path(), &debs).await?);

        remove_index_files(dir.path()).await?;
        assert!(index_stale(dir.path(), &debs).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_index_older_than_package() -> Result<()> {
        let (dir, debs) = indexed_fixture().await?;
        let new = SystemTime::now() + std::time::Duration::from_secs(3600);
        std::fs::File::options().write(true).open(&debs[0])?.set_modified(new)?;
        assert!(index_stale(dir.path(), &debs).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_index_lists_deleted_package() -> Result<()> {
        let (dir, debs) = indexed_fixture().await?;
        fs::remove_file(&debs[0]).await?;
        assert!(index_stale(dir.path(), &[]).await?);
        Ok(())
    }
}
