use crate::args::Args;
use crate::errors::*;
use crate::release::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const DEFAULT_CONFIG_NAME: &str = "zotero-deb.toml";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_3) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/35.0.1916.47 Safari/537.36";

#[derive(Debug)]
pub struct Config {
    pub config_path: Option<PathBuf>,
    pub data: ConfigData,
}

impl Config {
    pub async fn load_config_from(path: &Path) -> Result<ConfigData> {
        let buf = fs::read_to_string(&path).await?;
        let config = toml::from_str(&buf)?;
        Ok(config)
    }

    fn find_config_path(args: &Args) -> Option<PathBuf> {
        if let Some(path) = &args.config {
            return Some(path.clone());
        }

        let local = PathBuf::from(DEFAULT_CONFIG_NAME);
        if local.exists() {
            return Some(local);
        }

        let global = dirs::config_dir()?.join("zotero-deb").join("config.toml");
        if global.exists() {
            Some(global)
        } else {
            None
        }
    }

    pub async fn load_with_args(args: &Args) -> Result<Self> {
        let config_path = Self::find_config_path(args);
        let data = if let Some(path) = &config_path {
            debug!("Loading configuration from {path:?}");
            Self::load_config_from(path)
                .await
                .with_context(|| anyhow!("Failed to load configuration from {:?}", path))?
        } else {
            bail!("No configuration file found, expected {DEFAULT_CONFIG_NAME:?} or --config");
        };

        Ok(Config { config_path, data })
    }

    pub fn client(&self, client: Client) -> Result<&ClientConfig> {
        self.data
            .clients
            .get(client.as_str())
            .with_context(|| anyhow!("Client is not configured: {client:?}"))
    }

    pub fn target(&self, name: &str) -> Result<&Target> {
        self.data
            .targets
            .iter()
            .find(|target| target.name == name)
            .with_context(|| anyhow!("No publish target with name: {name:?}"))
    }

    pub fn user_agent(&self) -> &str {
        self.data
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent())
            .build()
            .context("Failed to setup http client")
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(default = "default_repo")]
    pub repo: PathBuf,
    #[serde(default = "default_staging")]
    pub staging: PathBuf,
    /// Value of the `Codename` field in the generated Release file
    #[serde(default = "default_codename")]
    pub codename: String,
    /// Replacement for `+` in pre-release versions
    pub beta_delim: Option<String>,
    pub user_agent: Option<String>,
    pub maintainer: Maintainer,
    #[serde(default)]
    pub common: Common,
    #[serde(rename = "client", default)]
    pub clients: BTreeMap<String, ClientConfig>,
    #[serde(rename = "target", default)]
    pub targets: Vec<Target>,
}

fn default_repo() -> PathBuf {
    PathBuf::from("repo")
}

fn default_staging() -> PathBuf {
    PathBuf::from("staging")
}

fn default_codename() -> String {
    "./".to_string()
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    pub email: String,
    pub gpgkey: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Common {
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Package whose `Depends:` get copied, empty string to disable
    #[serde(default = "default_inherit_depends")]
    pub inherit_depends: String,
}

impl Default for Common {
    fn default() -> Self {
        Common {
            dependencies: Vec::new(),
            inherit_depends: default_inherit_depends(),
        }
    }
}

fn default_inherit_depends() -> String {
    "firefox-esr".to_string()
}

#[derive(Debug, PartialEq, Default, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Upstream version -> bump suffix
    #[serde(default)]
    pub bump: BTreeMap<String, String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(flatten)]
    pub kind: TargetKind,
    /// Remove remote files that are gone locally, rsync mirrors unless told otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<bool>,
}

impl Target {
    pub fn delete(&self) -> bool {
        self.delete
            .unwrap_or(matches!(self.kind, TargetKind::Rsync { .. }))
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetKind {
    Rsync {
        remote: String,
        #[serde(default = "default_retries")]
        retries: usize,
    },
    B2 {
        bucket: String,
        public_url: String,
    },
    Github {
        repository: String,
        tag: String,
    },
}

fn default_retries() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
codename = "./"

[maintainer]
name = "Emiliano Heyns"
email = "emiliano.heyns@iris-advies.com"
gpgkey = "dpkg"

[common]
dependencies = ["libnss3"]

[client.zotero]
description = "Zotero is a free, easy-to-use tool to help you collect, organize, cite, and share research"
bump = { "6.0.26" = "1" }

[client.jurism]
description = "Juris-M is a free, easy-to-use tool"
dependencies = ["libgtk-3-0"]

[[target]]
name = "sourceforge"
kind = "rsync"
remote = "retorquere@frs.sourceforge.net:/home/frs/project/zotero-deb/"
retries = 5

[[target]]
name = "b2"
kind = "b2"
bucket = "zotero-apt"
public_url = "https://apt.retorque.re/file/zotero-apt"
delete = true

[[target]]
name = "github"
kind = "github"
repository = "retorquere/zotero-deb"
tag = "apt-get"
"#;

    #[test]
    fn test_parse_config() -> Result<()> {
        let config = toml::from_str::<ConfigData>(CONFIG)?;
        assert_eq!(config.repo, PathBuf::from("repo"));
        assert_eq!(config.staging, PathBuf::from("staging"));
        assert_eq!(config.common.inherit_depends, "firefox-esr");
        assert_eq!(config.maintainer.gpgkey, "dpkg");

        let zotero = &config.clients["zotero"];
        assert_eq!(zotero.bump.get("6.0.26").map(String::as_str), Some("1"));
        assert!(zotero.dependencies.is_empty());
        assert_eq!(config.clients["jurism"].dependencies, ["libgtk-3-0"]);

        assert_eq!(
            config.targets,
            vec![
                Target {
                    name: "sourceforge".to_string(),
                    kind: TargetKind::Rsync {
                        remote: "retorquere@frs.sourceforge.net:/home/frs/project/zotero-deb/"
                            .to_string(),
                        retries: 5,
                    },
                    delete: None,
                },
                Target {
                    name: "b2".to_string(),
                    kind: TargetKind::B2 {
                        bucket: "zotero-apt".to_string(),
                        public_url: "https://apt.retorque.re/file/zotero-apt".to_string(),
                    },
                    delete: Some(true),
                },
                Target {
                    name: "github".to_string(),
                    kind: TargetKind::Github {
                        repository: "retorquere/zotero-deb".to_string(),
                        tag: "apt-get".to_string(),
                    },
                    delete: None,
                },
            ]
        );
        let delete = config.targets.iter().map(Target::delete).collect::<Vec<_>>();
        assert_eq!(delete, vec![true, true, false]);
        Ok(())
    }

    #[test]
    fn test_lookup_target() -> Result<()> {
        let config = Config {
            config_path: None,
            data: toml::from_str(CONFIG)?,
        };
        assert!(config.target("b2").is_ok());
        assert!(config.target("sourceforge")?.delete());
        assert!(config.target("ftp").is_err());
        assert!(config.client(Client::Jurism).is_ok());
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
        Ok(())
    }
}
