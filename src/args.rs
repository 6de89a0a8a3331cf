use crate::errors::*;
use crate::release::{Channel, Client};
use crate::resolve::Filter;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::ffi::OsString;
use std::io::stdout;
use std::path::PathBuf;
use tokio::fs;
use tokio::io;
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone, PartialEq)]
pub enum FileOrStdin {
    File(PathBuf),
    Stdin,
}

impl FileOrStdin {
    pub async fn read(&self) -> Result<Vec<u8>> {
        let buf = match self {
            Self::File(path) => fs::read(&path)
                .await
                .with_context(|| anyhow!("Failed to read file at path: {path:?}"))?,
            Self::Stdin => {
                let mut buf = Vec::new();
                let mut stdin = io::stdin();
                stdin.read_to_end(&mut buf).await?;
                buf
            }
        };
        Ok(buf)
    }
}

impl From<OsString> for FileOrStdin {
    fn from(s: OsString) -> Self {
        if s.to_str() == Some("-") {
            Self::Stdin
        } else {
            Self::File(s.into())
        }
    }
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Increase logging output (can be used multiple times)
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Reduce logging output (can be used multiple times)
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub quiet: u8,
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "ZOTERO_DEB_CONFIG")]
    pub config: Option<PathBuf>,
    /// Always enable colored output
    #[arg(short = 'C', long, global = true)]
    pub colors: bool,
    #[command(flatten)]
    pub credentials: Credentials,
    #[command(subcommand)]
    pub subcommand: SubCommand,
}

/// Secrets for publish targets, only read from the environment
#[derive(Debug, Default, Clone, Parser)]
pub struct Credentials {
    #[arg(long, hide = true, env = "B2_APPLICATION_KEY_ID", hide_env_values = true)]
    pub b2_application_key_id: Option<String>,
    #[arg(long, hide = true, env = "B2_APPLICATION_KEY", hide_env_values = true)]
    pub b2_application_key: Option<String>,
    #[arg(long, hide = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    Resolve(Resolve),
    Rebuild(Rebuild),
    Package(Package),
    Repo(Repo),
    Publish(Publish),
    Republish(Republish),
    Site(Site),
    Verify(Verify),
    #[command(subcommand)]
    Plumbing(Plumbing),
    Completions(Completions),
}

/// Select which releases are considered, everything if empty
#[derive(Debug, Default, Clone, Parser)]
pub struct ReleaseFilter {
    /// Only consider this client (can be used multiple times)
    #[arg(long = "client", value_enum)]
    pub clients: Vec<Client>,
    /// Only consider this channel (can be used multiple times)
    #[arg(long = "channel", value_enum)]
    pub channels: Vec<Channel>,
}

impl From<ReleaseFilter> for Filter {
    fn from(filter: ReleaseFilter) -> Self {
        Filter {
            clients: filter.clients,
            channels: filter.channels,
        }
    }
}

/// Print the latest upstream releases
#[derive(Debug, Parser)]
pub struct Resolve {
    #[command(flatten)]
    pub filter: ReleaseFilter,
    /// Output as json
    #[arg(long)]
    pub json: bool,
}

/// Bring the repository up to date with upstream
#[derive(Debug, Parser)]
pub struct Rebuild {
    #[command(flatten)]
    pub filter: ReleaseFilter,
    /// Don't sign the .changes files with debsign
    #[arg(long)]
    pub no_sign: bool,
    /// Download the packages of this publish target before rebuilding
    #[arg(long)]
    pub fetch: Option<String>,
}

/// Package an already staged directory into a .deb
#[derive(Debug, Parser)]
pub struct Package {
    /// Staged directories, named `{package}_{version}_{arch}`
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Don't sign the .changes file with debsign
    #[arg(long)]
    pub no_sign: bool,
}

/// Regenerate and sign the repository index
#[derive(Debug, Parser)]
pub struct Repo {}

/// Synchronize the repository with a publish target
#[derive(Debug, Parser)]
pub struct Publish {
    /// Name of the configured target
    pub target: String,
    /// Download remote packages that are missing locally, instead of uploading
    #[arg(long)]
    pub fetch: bool,
}

/// Publish a copy of the repository under a codename
#[derive(Debug, Parser)]
pub struct Republish {
    /// Directory name the repository is published under
    #[arg(long)]
    pub codename: String,
    /// Url the republished repository is served from, written into install.sh
    #[arg(long)]
    pub baseurl: String,
    /// Name of the configured target to sync to
    #[arg(long)]
    pub target: String,
    /// Replace `+` with this in the filenames of beta packages
    #[arg(long)]
    pub beta_delim: Option<String>,
}

/// Generate install.sh and index.md for the repository landing page
#[derive(Debug, Parser)]
pub struct Site {
    /// Public url of the repository
    #[arg(long)]
    pub url: String,
    /// Markdown to build index.md from, `-` for stdin
    #[arg(long, default_value = "README.md")]
    pub readme: FileOrStdin,
    /// Directory to write the generated files to
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
    /// Exit successfully only if the remote repository has no Packages file
    #[arg(long)]
    pub remote_check: bool,
}

/// Check that packages and by-hash entries are consistent
#[derive(Debug, Parser)]
pub struct Verify {}

/// Access to low-level features
#[derive(Debug, Subcommand)]
pub enum Plumbing {
    Config(Config),
    ByHash(ByHash),
    Control(Control),
}

/// Print the parsed configuration as json
#[derive(Debug, Parser)]
pub struct Config {}

/// Regenerate the by-hash tree from an existing Release file
#[derive(Debug, Parser)]
pub struct ByHash {
    /// Repository directory, defaults to the configured one
    pub path: Option<PathBuf>,
}

/// Print the control file a staged directory would get
#[derive(Debug, Parser)]
pub struct Control {
    pub path: PathBuf,
}

/// Generate shell completions
#[derive(Debug, Parser)]
pub struct Completions {
    pub shell: Shell,
}

pub fn gen_completions(args: &Completions) -> Result<()> {
    clap_complete::generate(args.shell, &mut Args::command(), "zotero-deb", &mut stdout());
    Ok(())
}
