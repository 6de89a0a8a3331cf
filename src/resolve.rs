use crate::config::Config;
use crate::errors::*;
use crate::release::{Arch, Channel, Client, Release};
use crate::version;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Deserialize;
use url::Url;

pub const ZOTERO_RELEASE_MANIFEST: &str =
    "https://www.zotero.org/download/client/manifests/release/updates-linux-x86_64.json";
pub const ZOTERO_RELEASE_DOWNLOAD: &str = "https://www.zotero.org/download/client/dl";
pub const ZOTERO_CHANNEL_DOWNLOAD: &str = "https://www.zotero.org/download/standalone/dl";
pub const JURISM_INCREMENTALS: &str = "https://github.com/Juris-M/assets/releases/download/client%2Freleases%2Fincrementals-linux/incrementals-release-linux";

#[derive(Debug, Default, Clone)]
pub struct Filter {
    pub clients: Vec<Client>,
    pub channels: Vec<Channel>,
}

impl Filter {
    pub fn wants(&self, client: Client, channel: Channel) -> bool {
        (self.clients.is_empty() || self.clients.contains(&client))
            && (self.channels.is_empty() || self.channels.contains(&channel))
    }
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    version: String,
}

pub fn parse_zotero_manifest(bytes: &[u8]) -> Result<Vec<String>> {
    let entries = serde_json::from_slice::<Vec<ManifestEntry>>(bytes)
        .context("Failed to parse zotero release manifest")?;
    Ok(entries.into_iter().map(|e| e.version).collect())
}

pub fn zotero_release_url(version: &str, arch: Arch) -> Result<String> {
    let platform = format!("linux-{}", arch.vendor());
    let url = Url::parse_with_params(
        ZOTERO_RELEASE_DOWNLOAD,
        &[
            ("channel", "release"),
            ("platform", platform.as_str()),
            ("version", version),
        ],
    )?;
    Ok(url.into())
}

pub fn zotero_channel_url(channel: Channel, arch: Arch) -> Result<String> {
    let platform = format!("linux-{}", arch.vendor());
    let url = Url::parse_with_params(
        ZOTERO_CHANNEL_DOWNLOAD,
        &[("platform", platform.as_str()), ("channel", channel.as_str())],
    )?;
    Ok(url.into())
}

/// Extract the upstream version from the url a pre-release download redirects to
pub fn parse_redirect_version(url: &str, channel: Channel, delim: Option<&str>) -> Result<String> {
    let suffix = channel
        .suffix()
        .with_context(|| anyhow!("Channel {channel} is not a pre-release channel"))?;
    let re = Regex::new(&format!(
        r"^https://download\.zotero\.org/client/{}/([^/]+)",
        regex::escape(channel.as_str())
    ))?;
    let caps = re
        .captures(url)
        .with_context(|| anyhow!("Unexpected {channel} download location: {url:?}"))?;
    let raw = percent_decode_str(&caps[1])
        .decode_utf8()
        .context("Version in download location is not valid utf8")?;
    Ok(version::prerelease_version(&raw, suffix, delim))
}

pub fn parse_jurism_incrementals(text: &str) -> Result<Vec<String>> {
    let versions = text.lines().map(str::trim).filter(|v| !v.is_empty());
    version::latest_per_base(versions)
}

pub fn jurism_release_url(version: &str, arch: Arch) -> String {
    format!(
        "https://github.com/Juris-M/assets/releases/download/client%2Frelease%2F{version}/Jurism-{version}_linux-{}.tar.bz2",
        arch.vendor()
    )
}

pub struct Resolver<'a> {
    config: &'a Config,
    client: reqwest::Client,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a Config) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Resolver { config, client })
    }

    async fn fetch(&self, url: &str) -> Result<bytes::Bytes> {
        debug!("Fetching url {url:?}...");
        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?
            .error_for_status()
            .context("Received http error")?
            .bytes()
            .await
            .context("Failed to download http response")?;
        Ok(body)
    }

    /// Follow the redirect chain and return the final location
    async fn locate(&self, url: &str) -> Result<String> {
        debug!("Resolving download location of {url:?}...");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?
            .error_for_status()
            .context("Received http error")?;
        Ok(response.url().to_string())
    }

    async fn zotero_release(&self) -> Result<Vec<Release>> {
        let cfg = self.config.client(Client::Zotero)?;
        let body = self.fetch(ZOTERO_RELEASE_MANIFEST).await?;
        let mut out = Vec::new();
        for upstream in parse_zotero_manifest(&body)? {
            for arch in Arch::ALL {
                out.push(Release {
                    client: Client::Zotero,
                    channel: Channel::Release,
                    version: version::bumped(cfg, &upstream),
                    arch,
                    url: zotero_release_url(&upstream, arch)?,
                });
            }
        }
        Ok(out)
    }

    async fn zotero_prerelease(&self, channel: Channel) -> Result<Vec<Release>> {
        let cfg = self.config.client(Client::Zotero)?;
        let delim = self.config.data.beta_delim.as_deref();
        let mut out = Vec::new();
        for arch in Arch::ALL {
            let url = self.locate(&zotero_channel_url(channel, arch)?).await?;
            let upstream = parse_redirect_version(&url, channel, delim)?;
            out.push(Release {
                client: Client::Zotero,
                channel,
                version: version::bumped(cfg, &upstream),
                arch,
                url,
            });
        }
        Ok(out)
    }

    async fn jurism_release(&self) -> Result<Vec<Release>> {
        let cfg = self.config.client(Client::Jurism)?;
        let body = self.fetch(JURISM_INCREMENTALS).await?;
        let text = String::from_utf8_lossy(&body);
        let mut out = Vec::new();
        for upstream in parse_jurism_incrementals(&text)? {
            for arch in Arch::ALL {
                out.push(Release {
                    client: Client::Jurism,
                    channel: Channel::Release,
                    version: version::bumped(cfg, &upstream),
                    arch,
                    url: jurism_release_url(&upstream, arch),
                });
            }
        }
        Ok(out)
    }

    pub async fn resolve(&self, filter: &Filter) -> Result<Vec<Release>> {
        let mut releases = Vec::new();

        if filter.wants(Client::Zotero, Channel::Release) {
            info!("Finding Zotero versions...");
            releases.extend(self.zotero_release().await?);
        }
        for channel in [Channel::Beta, Channel::Dev] {
            if filter.wants(Client::Zotero, channel) {
                info!("Finding Zotero {channel} versions...");
                releases.extend(self.zotero_prerelease(channel).await?);
            }
        }
        if filter.wants(Client::Jurism, Channel::Release) {
            info!("Finding Juris-M versions...");
            releases.extend(self.jurism_release().await?);
        }

        for release in &releases {
            debug!("Resolved upstream release: {release}");
        }
        Ok(releases)
    }
}
