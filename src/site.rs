use crate::errors::*;
use crate::repo::KEYRING_NAME;
use std::fmt::Write as _;
use std::path::Path;
use walkdir::WalkDir;

/// Url the README refers to, replaced with the actual repository url
pub const README_BASEURL: &str = "https://zotero.retorque.re/file/apt-package-archive";
pub const KEYRING_URL: &str = "https://raw.githubusercontent.com/retorquere/zotero-deb/master";
pub const README_SEPARATOR: &str = "----";
pub const INDEX_META: &str = "---
title: Zotero/Jurism binaries for Debian-based linux systems
...
";

pub fn install_sh(baseurl: &str, codename: &str) -> String {
    format!(
        r#"
# https://wiki.debian.org/DebianRepository/UseThirdParty

case `uname -m` in
  "i386" | "i686" | "x86_64")
    ;;
  *)
    echo "Zotero is only available for architectures i686 and x86_64"
    exit
    ;;
esac

BASEURL={baseurl}
CODENAME={codename}

export GNUPGHOME="/dev/null"

KEYNAME={KEYRING_NAME}.gpg
GPGKEY={KEYRING_URL}/$KEYNAME
KEYRING=/usr/share/keyrings/$KEYNAME
if [ -x "$(command -v curl)" ]; then
  sudo curl -L $GPGKEY -o $KEYRING
elif [ -x "$(command -v wget)" ]; then
  sudo wget -O $KEYRING $GPGKEY
else
  echo "Error: need wget or curl installed." >&2
  exit 1
fi

sudo chmod 644 $KEYRING
# old key with too broad reach
sudo rm -f /etc/apt/trusted.gpg.d/zotero.gpg

cat << EOF | sudo tee /etc/apt/sources.list.d/zotero.list
deb [signed-by=$KEYRING by-hash=force] $BASEURL $CODENAME
EOF

sudo apt-get clean
"#
    )
}

/// Point an existing install.sh at a different repository location
pub fn patch_install_sh(script: &str, baseurl: &str, codename: &str) -> String {
    let mut out = String::with_capacity(script.len());
    for line in script.split_inclusive('\n') {
        let newline = if line.ends_with('\n') { "\n" } else { "" };
        if line.starts_with("BASEURL=") {
            out.push_str(&format!("BASEURL={baseurl}{newline}"));
        } else if line.starts_with("CODENAME=") {
            out.push_str(&format!("CODENAME={codename}{newline}"));
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Files in the repository, relative and sorted
pub fn list_assets(repo: &Path) -> Result<Vec<String>> {
    let mut assets = Vec::new();
    for entry in WalkDir::new(repo).min_depth(1) {
        let entry = entry.with_context(|| anyhow!("Failed to walk {repo:?}"))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(repo)?;
        assets.push(relative.to_string_lossy().into_owned());
    }
    assets.sort();
    Ok(assets)
}

pub fn index_md(readme: &str, url: &str, assets: &[String]) -> Result<String> {
    let url = url.trim_end_matches('/');
    let (header, body) = readme
        .split_once(README_SEPARATOR)
        .with_context(|| anyhow!("README is missing the {README_SEPARATOR:?} separator"))?;

    let mut out = String::from(INDEX_META);
    out.push_str(header);
    out.push_str(README_SEPARATOR);
    out.push_str(&body.replace(README_BASEURL, url));
    out.push_str("\n---\n\n");
    for asset in assets {
        let name = asset.replace('_', "\\_");
        writeln!(out, "* [{name}]({url}/{asset})")?;
    }
    Ok(out)
}

pub fn packages_url(url: &str) -> String {
    if url.ends_with('/') {
        format!("{url}Packages")
    } else {
        format!("{url}/Packages")
    }
}

/// Check if the remote repository serves a Packages index
pub async fn remote_has_packages(http: &reqwest::Client, url: &str) -> Result<bool> {
    let url = packages_url(url);
    debug!("Checking for remote index at {url:?}");
    let response = http
        .get(&url)
        .send()
        .await
        .with_context(|| anyhow!("Failed to send request to {url:?}"))?;
    let status = response.status();
    debug!("Remote index responded with {status}");
    Ok(!(status.is_client_error() || status.is_server_error()))
}
