//! Shell completion generation.

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::env;
use std::io;
use std::path::Path;

use crate::{Cli, CliError};

/// Write completions for `shell` to `out`.
pub(crate) fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

/// Generate completions to stdout, detecting the shell when not given.
pub(crate) fn cmd_completions(shell: Option<Shell>) -> Result<()> {
    let shell = shell.or_else(detect_shell_type).ok_or_else(|| {
        CliError::Usage("could not detect the shell; pass it explicitly, e.g. `oquam completions bash`".into())
    })?;
    write_completions(shell, &mut io::stdout());
    Ok(())
}

/// Detect the user's current shell from environment.
fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }

    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }

    None
}

/// Parse a shell binary path into its `Shell` enum.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}
