use super::{Publisher, Summary};
use crate::errors::*;
use crate::exec;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

pub const RETRY_DELAY: Duration = Duration::from_secs(10);
pub const SSH: &str = "ssh -o StrictHostKeyChecking=no";

#[derive(Debug)]
pub struct Rsync {
    pub remote: String,
    pub retries: usize,
    pub delete: bool,
}

/// Make sure rsync copies the contents of a directory, not the directory itself
fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

impl Rsync {
    pub fn command<S: Into<OsString>, D: Into<OsString>>(&self, src: S, dest: D) -> Command {
        let mut cmd = Command::new("rsync");
        cmd.args(["--progress", "-e", SSH, "-avhz"]);
        if self.delete {
            cmd.arg("--delete");
        }
        cmd.arg(src.into()).arg(dest.into());
        cmd
    }

    async fn run_with_retries(&self, mut make: impl FnMut() -> Command) -> Result<()> {
        let attempts = self.retries.max(1);
        let mut attempt = 1;
        loop {
            match exec::run(&mut make()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    warn!("rsync failed (attempt {attempt}/{attempts}), retrying in {RETRY_DELAY:?}: {err:#}");
                    time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Publisher for Rsync {
    async fn fetch(&self, repo: &Path) -> Result<()> {
        let dest = with_trailing_slash(&repo.to_string_lossy());
        let src = with_trailing_slash(&self.remote);
        tokio::fs::create_dir_all(repo).await?;
        self.run_with_retries(|| self.command(&src, &dest)).await
    }

    async fn publish(&self, repo: &Path) -> Result<Summary> {
        let src = with_trailing_slash(&repo.to_string_lossy());
        let dest = self.remote.clone();
        self.run_with_retries(|| self.command(&src, &dest)).await?;
        // rsync reports its own transfer statistics
        Ok(Summary::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsync_command() {
        let rsync = Rsync {
            remote: "retorquere@frs.sourceforge.net:/home/frs/project/zotero-deb/".to_string(),
            retries: 5,
            delete: true,
        };
        let cmd = rsync.command("repo/", &rsync.remote);
        assert_eq!(
            exec::display(&cmd),
            "rsync --progress -e 'ssh -o StrictHostKeyChecking=no' -avhz --delete repo/ retorquere@frs.sourceforge.net:/home/frs/project/zotero-deb/"
        );
    }

    #[test]
    fn test_trailing_slash() {
        assert_eq!(with_trailing_slash("repo"), "repo/");
        assert_eq!(with_trailing_slash("repo/"), "repo/");
    }
}
