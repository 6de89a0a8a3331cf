use crate::errors::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Client {
    Zotero,
    Jurism,
}

impl Client {
    pub fn as_str(&self) -> &'static str {
        match self {
            Client::Zotero => "zotero",
            Client::Jurism => "jurism",
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        w.write_str(self.as_str())
    }
}

impl FromStr for Client {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zotero" => Ok(Client::Zotero),
            "jurism" => Ok(Client::Jurism),
            _ => bail!("Unknown client: {s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Release,
    Beta,
    Dev,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Release => "release",
            Channel::Beta => "beta",
            Channel::Dev => "dev",
        }
    }

    /// Suffix appended to the package name, and stripped from upstream version strings
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            Channel::Release => None,
            Channel::Beta => Some("-beta"),
            Channel::Dev => Some("-dev"),
        }
    }

    /// The glyph that gets drawn onto the application icons of pre-release builds
    pub fn badge(&self) -> Option<char> {
        match self {
            Channel::Release => None,
            Channel::Beta => Some('b'),
            Channel::Dev => Some('c'),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        w.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Arch {
    I686,
    X86_64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::I686, Arch::X86_64];

    /// Architecture name used by the vendor download endpoints
    pub fn vendor(&self) -> &'static str {
        match self {
            Arch::I686 => "i686",
            Arch::X86_64 => "x86_64",
        }
    }

    pub fn debian(&self) -> &'static str {
        match self {
            Arch::I686 => "i386",
            Arch::X86_64 => "amd64",
        }
    }

    pub fn from_debian(s: &str) -> Result<Self> {
        match s {
            "i386" => Ok(Arch::I686),
            "amd64" => Ok(Arch::X86_64),
            _ => bail!("Unsupported debian architecture: {s:?}"),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        w.write_str(self.debian())
    }
}

/// A single upstream build that should end up as one `.deb` in the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Release {
    pub client: Client,
    pub channel: Channel,
    /// The version as it appears in the package, bump suffix included
    pub version: String,
    pub arch: Arch,
    pub url: String,
}

impl Release {
    pub fn package(&self) -> String {
        let mut name = self.client.to_string();
        if let Some(suffix) = self.channel.suffix() {
            name.push_str(suffix);
        }
        name
    }

    pub fn deb_filename(&self) -> String {
        deb_filename(&self.package(), &self.version, self.arch.debian())
    }

    pub fn staging_name(&self) -> String {
        format!("{}_{}_{}", self.package(), self.version, self.arch.debian())
    }

    pub fn deb_path(&self, repo: &Path) -> PathBuf {
        repo.join(self.deb_filename())
    }
}

impl fmt::Display for Release {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        write!(w, "{} {} {}", self.package(), self.version, self.arch)
    }
}

pub fn deb_filename(package: &str, version: &str, arch: &str) -> String {
    format!("{package}_{version}_{arch}.deb")
}

/// Split `{package}_{version}_{arch}.deb` into its components
pub fn parse_deb_filename(name: &str) -> Result<(&str, &str, &str)> {
    let stem = name
        .strip_suffix(".deb")
        .with_context(|| anyhow!("Not a .deb filename: {name:?}"))?;
    let mut parts = stem.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(package), Some(version), Some(arch))
            if !package.is_empty() && !version.is_empty() && !arch.contains('_') =>
        {
            Ok((package, version, arch))
        }
        _ => bail!("Filename does not follow package_version_arch.deb: {name:?}"),
    }
}
