use crate::errors::*;
use colored::Colorize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Render a command the way it would be typed into a shell
pub fn display(cmd: &Command) -> String {
    let cmd = cmd.as_std();
    let mut out = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        let arg = arg.to_string_lossy();
        out.push(' ');
        if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || "'\"$`\\*?;&|<>()".contains(c)) {
            out.push('\'');
            out.push_str(&arg.replace('\'', "'\\''"));
            out.push('\'');
        } else {
            out.push_str(&arg);
        }
    }
    out
}

fn announce(cmd: &Command) {
    info!("$ {}", display(cmd).green());
}

/// Run a command with inherited stdio, fail if it doesn't exit successfully
pub async fn run(cmd: &mut Command) -> Result<()> {
    announce(cmd);
    let status = cmd
        .status()
        .await
        .with_context(|| anyhow!("Failed to execute {:?}", cmd.as_std().get_program()))?;
    if !status.success() {
        bail!("Command exited with error ({status}): {}", display(cmd));
    }
    Ok(())
}

/// Run a command and return its stdout, stderr is logged but not treated as an error
pub async fn output(cmd: &mut Command) -> Result<Vec<u8>> {
    announce(cmd);
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| anyhow!("Failed to execute {:?}", cmd.as_std().get_program()))?;

    if !output.stderr.is_empty() {
        let error = String::from_utf8_lossy(&output.stderr);
        warn!("Command stderr was non-empty: {:?}", error.trim_end());
    }

    if !output.status.success() {
        bail!("Command exited with error ({}): {}", output.status, display(cmd));
    }

    Ok(output.stdout)
}

/// Run a command and write its stdout to a file
pub async fn output_to(cmd: &mut Command, path: &Path) -> Result<Vec<u8>> {
    let stdout = output(cmd).await?;
    tokio::fs::write(path, &stdout)
        .await
        .with_context(|| anyhow!("Failed to write command output to {path:?}"))?;
    Ok(stdout)
}

/// Find the first of the given programs that is available in PATH
pub fn find_program(candidates: &[&str]) -> Option<std::path::PathBuf> {
    candidates.iter().find_map(|name| which::which(name).ok())
}
