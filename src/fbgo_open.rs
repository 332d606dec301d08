// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Open targets with the platform's default handler
/// Folders open in the file browser, files in their associated application.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{0} no longer exists")]
    Missing(PathBuf),
    #[error("failed to open {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait TargetOpener {
    fn open(&self, path: &Path) -> Result<(), LaunchError>;
}

#[derive(Default)]
pub struct SystemOpener;

impl SystemOpener {
    #[cfg(windows)]
    fn command(path: &Path) -> Command {
        // explorer.exe browses folders and shell-executes files
        let mut cmd = Command::new("explorer.exe");
        cmd.arg(path);
        cmd
    }

    #[cfg(target_os = "macos")]
    fn command(path: &Path) -> Command {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        cmd
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    fn command(path: &Path) -> Command {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        cmd
    }
}

impl TargetOpener for SystemOpener {
    fn open(&self, path: &Path) -> Result<(), LaunchError> {
        if !path.exists() {
            return Err(LaunchError::Missing(path.to_path_buf()));
        }

        // explorer.exe reports odd exit codes; only a failed spawn counts
        Self::command(path)
            .spawn()
            .map_err(|source| LaunchError::Spawn { path: path.to_path_buf(), source })?;

        info!(path = %path.display(), "opened target");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let gone = dir.path().join("gone.txt");
        match SystemOpener.open(&gone) {
            Err(LaunchError::Missing(path)) => assert_eq!(path, gone),
            other => panic!("unexpected {:?}", other),
        }
    }
}
