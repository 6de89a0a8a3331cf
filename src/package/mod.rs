pub mod control;
pub mod desktop;

use self::control::DebMetadata;
use crate::config::Config;
use crate::errors::*;
use crate::exec;
use crate::ini::Ini;
use crate::release::{Arch, Channel, Client};
use crate::version;
use chrono::Utc;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use walkdir::WalkDir;

/// Files that only matter to the built-in updater, apt manages updates instead
pub const UPDATER_FILES: &[&str] = &[
    "active-update.xml",
    "precomplete",
    "removed-files",
    "updates",
    "updates.xml",
];

/// Package identity as derived from `application.ini` and the staging directory name
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub client: Client,
    pub channel: Channel,
    pub package: String,
    pub version: String,
    pub arch: Arch,
}

pub async fn find_application_ini(staged: &Path) -> Result<PathBuf> {
    for candidate in [
        staged.join("application.ini"),
        staged.join("app").join("application.ini"),
    ] {
        if fs::metadata(&candidate).await.is_ok() {
            return Ok(candidate);
        }
    }
    bail!("No application.ini in {staged:?}")
}

pub fn identify(config: &Config, app: &Ini, staged_name: &str) -> Result<Identity> {
    // vendor instead of app name, juris-m uses the same app name as zotero
    let vendor = app.require("App", "Vendor")?;
    let client = vendor.to_lowercase().parse::<Client>()?;
    let raw = app.require("App", "Version")?;

    let channel = [Channel::Beta, Channel::Dev]
        .into_iter()
        .find(|channel| channel.suffix().is_some_and(|suffix| raw.contains(suffix)))
        .unwrap_or(Channel::Release);

    let mut package = client.to_string();
    let upstream = if let Some(suffix) = channel.suffix() {
        package.push_str(suffix);
        version::prerelease_version(raw, suffix, config.data.beta_delim.as_deref())
    } else {
        raw.to_string()
    };
    let version = version::bumped(config.client(client)?, &upstream);

    let arch = staged_name
        .rsplit('_')
        .next()
        .with_context(|| anyhow!("Failed to detect architecture from {staged_name:?}"))?;
    let arch = Arch::from_debian(arch)?;

    Ok(Identity {
        client,
        channel,
        package,
        version,
        arch,
    })
}

/// Fill `{package}`, `{version}`, `{client}` and `{arch}` placeholders
pub fn expand_description(template: &str, id: &Identity) -> String {
    template
        .replace("{package}", &id.package)
        .replace("{version}", &id.version)
        .replace("{client}", id.client.as_str())
        .replace("{arch}", id.arch.debian())
}

async fn inherited_dependencies(package: &str) -> Result<Vec<String>> {
    if package.is_empty() {
        return Ok(Vec::new());
    }
    let output = exec::output(Command::new("apt-cache").arg("depends").arg(package))
        .await
        .with_context(|| anyhow!("Failed to query dependencies of {package:?}"))?;
    Ok(control::parse_apt_cache_depends(&String::from_utf8_lossy(&output)))
}

/// Gather everything needed to write the control file for a staged directory
pub async fn metadata(config: &Config, staged: &Path) -> Result<DebMetadata> {
    let app = Ini::read(&find_application_ini(staged).await?).await?;
    let staged_name = staged
        .file_name()
        .and_then(OsStr::to_str)
        .with_context(|| anyhow!("Invalid staging directory name: {staged:?}"))?;
    let id = identify(config, &app, staged_name)?;
    let client_config = config.client(id.client)?;

    let vendor_desktop = staged.join(format!("{}.desktop", id.client));
    let vendor_desktop = Ini::read(&vendor_desktop).await?;

    let mut dependencies = config.data.common.dependencies.clone();
    dependencies.extend(client_config.dependencies.iter().cloned());
    dependencies.extend(inherited_dependencies(&config.data.common.inherit_depends).await?);
    let dependencies = control::join_dependencies(dependencies);
    debug!("Dependencies for {:?}: {dependencies:?}", id.package);

    Ok(DebMetadata {
        client: id.client.to_string(),
        package: id.package.clone(),
        version: id.version.clone(),
        arch: id.arch.debian().to_string(),
        dependencies,
        section: desktop::section(&vendor_desktop),
        description: expand_description(&client_config.description, &id),
    })
}

fn is_excluded(name: &OsStr, desktop_file: &str) -> bool {
    let Some(name) = name.to_str() else {
        return false;
    };
    name == desktop_file || UPDATER_FILES.contains(&name)
}

/// Recursively copy a staged tree, skipping excluded names at any depth
pub fn copy_tree(src: &Path, dest: &Path, desktop_file: &str) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| anyhow!("Failed to create directory: {dest:?}"))?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry.file_name(), desktop_file));

    for entry in walker {
        let entry = entry.context("Failed to walk staged tree")?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| anyhow!("Failed to create directory: {target:?}"))?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| anyhow!("Failed to create symlink: {target:?}"))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| anyhow!("Failed to copy {:?} to {target:?}", entry.path()))?;
        }
    }

    Ok(())
}

/// Assemble the filesystem tree of the package in `build`
pub async fn assemble(config: &Config, staged: &Path, deb: &DebMetadata, build: &Path) -> Result<()> {
    let app_dir = build.join("usr/lib").join(&deb.package);
    let desktop_file = format!("{}.desktop", deb.client);
    {
        let staged = staged.to_owned();
        let app_dir = app_dir.clone();
        let desktop_file = desktop_file.clone();
        tokio::task::spawn_blocking(move || copy_tree(&staged, &app_dir, &desktop_file))
            .await
            .context("Failed to join copy task")??;
    }

    desktop::disable_auto_update(&app_dir).await?;

    let vendor = Ini::read(&staged.join(&desktop_file)).await?;
    let has_icon128 = fs::metadata(app_dir.join("icons/icon128.png"))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    let entry = desktop::desktop_entry(vendor, deb, has_icon128);
    let applications = build.join("usr/share/applications");
    fs::create_dir_all(&applications).await?;
    fs::write(
        applications.join(format!("{}.desktop", deb.package)),
        entry.to_string(),
    )
    .await?;

    let mime = build.join("usr/share/mime/packages");
    fs::create_dir_all(&mime).await?;
    fs::write(mime.join(format!("{}.xml", deb.package)), desktop::MIME_XML).await?;

    let debian = build.join("DEBIAN");
    fs::create_dir_all(&debian).await?;
    fs::write(debian.join("control"), deb.control(&config.data.maintainer)).await?;

    let bin = build.join("usr/bin");
    fs::create_dir_all(&bin).await?;
    fs::symlink(
        format!("/usr/lib/{}/{}", deb.package, deb.client),
        bin.join(&deb.package),
    )
    .await
    .context("Failed to create symlink to binary")?;

    Ok(())
}

/// Build a signed `.deb` from a staged directory, returns the path of the package
pub async fn package(config: &Config, staged: &Path, sign: bool) -> Result<PathBuf> {
    if !fs::metadata(staged).await.map(|m| m.is_dir()).unwrap_or(false) {
        bail!("Staged path is not a directory: {staged:?}");
    }
    info!("Packaging {staged:?}");

    let deb = metadata(config, staged).await?;
    let repo = &config.data.repo;
    fs::create_dir_all(repo)
        .await
        .with_context(|| anyhow!("Failed to create repository directory: {repo:?}"))?;
    let deb_file = repo.join(deb.filename());

    let build = tempfile::Builder::new()
        .prefix("zotero-deb-build-")
        .tempdir()
        .context("Failed to create build directory")?;
    debug!("Created temporary directory {:?}", build.path());
    assemble(config, staged, &deb, build.path()).await?;

    if fs::metadata(&deb_file).await.is_ok() {
        fs::remove_file(&deb_file).await?;
    }
    exec::run(
        Command::new("fakeroot")
            .args(["dpkg-deb", "--build", "-Zgzip"])
            .arg(build.path())
            .arg(&deb_file),
    )
    .await?;

    let bytes = fs::read(&deb_file)
        .await
        .with_context(|| anyhow!("Failed to read package: {deb_file:?}"))?;
    let changes = deb_file.with_extension("changes");
    fs::write(
        &changes,
        deb.changes(&config.data.maintainer, &bytes, Utc::now()),
    )
    .await?;

    if sign {
        exec::run(
            Command::new("debsign")
                .arg(format!("-k{}", config.data.maintainer.gpgkey))
                .arg(&changes),
        )
        .await?;
    }

    info!("Built {deb_file:?}");
    Ok(deb_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigData;

    fn config() -> Config {
        let data = toml::from_str::<ConfigData>(
            r#"
beta_delim = "."

[maintainer]
name = "Emiliano Heyns"
email = "emiliano.heyns@iris-advies.com"
gpgkey = "dpkg"

[client.zotero]
description = "Zotero {version} is a free, easy-to-use tool"
bump = { "7.0.11" = "2" }

[client.jurism]
description = "Juris-M"
"#,
        )
        .unwrap();
        Config {
            config_path: None,
            data,
        }
    }

    #[test]
    fn test_identify_release() -> Result<()> {
        let app = Ini::parse("[App]\nVendor=Zotero\nVersion=7.0.11\n")?;
        let id = identify(&config(), &app, "zotero_7.0.11-2_amd64")?;
        assert_eq!(
            id,
            Identity {
                client: Client::Zotero,
                channel: Channel::Release,
                package: "zotero".to_string(),
                version: "7.0.11-2".to_string(),
                arch: Arch::X86_64,
            }
        );
        assert_eq!(
            expand_description("Zotero {version} is a free, easy-to-use tool", &id),
            "Zotero 7.0.11-2 is a free, easy-to-use tool"
        );
        Ok(())
    }

    #[test]
    fn test_identify_beta() -> Result<()> {
        let app = Ini::parse("[App]\nVendor=Zotero\nVersion=7.1-beta.3+9a1c3b2\n")?;
        let id = identify(&config(), &app, "zotero-beta_7.1.3.9a1c3b2_i386")?;
        assert_eq!(id.package, "zotero-beta");
        assert_eq!(id.channel, Channel::Beta);
        assert_eq!(id.version, "7.1.3.9a1c3b2");
        assert_eq!(id.arch, Arch::I686);
        Ok(())
    }

    #[test]
    fn test_identify_jurism() -> Result<()> {
        let app = Ini::parse("[App]\nVendor=Jurism\nVersion=6.0.30m10\n")?;
        let id = identify(&config(), &app, "jurism_6.0.30m10_amd64")?;
        assert_eq!(id.package, "jurism");
        assert_eq!(id.version, "6.0.30m10");
        Ok(())
    }

    #[test]
    fn test_identify_unknown_arch() -> Result<()> {
        let app = Ini::parse("[App]\nVendor=Zotero\nVersion=7.0.11\n")?;
        assert!(identify(&config(), &app, "zotero_7.0.11_arm64").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_find_application_ini() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(find_application_ini(dir.path()).await.is_err());
        fs::create_dir(dir.path().join("app")).await?;
        fs::write(dir.path().join("app/application.ini"), "[App]\n").await?;
        assert_eq!(
            find_application_ini(dir.path()).await?,
            dir.path().join("app/application.ini")
        );
        fs::write(dir.path().join("application.ini"), "[App]\n").await?;
        assert_eq!(
            find_application_ini(dir.path()).await?,
            dir.path().join("application.ini")
        );
        Ok(())
    }

    #[test]
    fn test_copy_tree_excludes_updater() -> Result<()> {
        let src = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        std::fs::write(src.path().join("zotero"), b"#!/bin/sh")?;
        std::fs::write(src.path().join("zotero.desktop"), b"[Desktop Entry]")?;
        std::fs::write(src.path().join("precomplete"), b"")?;
        std::fs::create_dir_all(src.path().join("updates/0"))?;
        std::fs::write(src.path().join("updates/0/update.status"), b"")?;
        std::fs::create_dir_all(src.path().join("defaults/pref"))?;
        std::fs::write(src.path().join("defaults/pref/updates.xml"), b"")?;
        std::fs::write(src.path().join("defaults/pref/prefs.js"), b"pref")?;
        std::os::unix::fs::symlink("zotero", src.path().join("zotero-bin"))?;

        let out = dest.path().join("usr/lib/zotero");
        copy_tree(src.path(), &out, "zotero.desktop")?;

        assert!(out.join("zotero").is_file());
        assert!(out.join("defaults/pref/prefs.js").is_file());
        assert_eq!(std::fs::read_link(out.join("zotero-bin"))?, Path::new("zotero"));
        assert!(!out.join("zotero.desktop").exists());
        assert!(!out.join("precomplete").exists());
        assert!(!out.join("updates").exists());
        assert!(!out.join("defaults/pref/updates.xml").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_assemble_tree() -> Result<()> {
        let staged = tempfile::tempdir()?;
        let build = tempfile::tempdir()?;
        fs::write(staged.path().join("zotero"), b"#!/bin/sh").await?;
        fs::write(
            staged.path().join("zotero.desktop"),
            "[Desktop Entry]\nName=Zotero\nExec=zotero\nCategories=Office;\n",
        )
        .await?;

        let deb = DebMetadata {
            client: "zotero".to_string(),
            package: "zotero".to_string(),
            version: "7.0.11-2".to_string(),
            arch: "amd64".to_string(),
            dependencies: "libnss3".to_string(),
            section: "Office".to_string(),
            description: "Zotero".to_string(),
        };
        assemble(&config(), staged.path(), &deb, build.path()).await?;

        let build = build.path();
        assert!(build.join("usr/lib/zotero/zotero").is_file());
        assert!(build.join("usr/lib/zotero/mozilla.cfg").is_file());
        assert!(!build.join("usr/lib/zotero/zotero.desktop").exists());
        assert!(build.join("usr/share/mime/packages/zotero.xml").is_file());
        assert_eq!(
            std::fs::read_link(build.join("usr/bin/zotero"))?,
            Path::new("/usr/lib/zotero/zotero")
        );

        let desktop = Ini::read(&build.join("usr/share/applications/zotero.desktop")).await?;
        assert_eq!(
            desktop.get("Desktop Entry", "Exec"),
            Some("/usr/lib/zotero/zotero --url %u")
        );

        let control = fs::read_to_string(build.join("DEBIAN/control")).await?;
        let fields = control::parse_paragraph(&control)?;
        assert_eq!(fields["Version"], "7.0.11-2");
        assert_eq!(fields["Section"], "Office");
        Ok(())
    }
}
