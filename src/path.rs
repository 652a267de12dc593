// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the kubeconfig document that should be updated lives on
//! the user's file system.

use std::{env, path::PathBuf};

/// Environment variable holding a list of kubeconfig paths.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to kubeconfig document.
///
/// Uses `$HOME/.kube/config`. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_kubeconfig_path() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".kube").join("config"))
}

/// Determine kubeconfig path from the environment.
///
/// The `KUBECONFIG` variable may list several documents separated by the
/// platform path separator. Only one document is ever updated: the first
/// listed one that exists, or the first listed one if none exist yet. Falls
/// back to [`default_kubeconfig_path`] when the variable is unset or empty.
///
/// # Errors
///
/// - Return [`NoWayHome`] if the fallback path cannot be determined.
pub fn path_from_env() -> Result<PathBuf> {
    let listed = env::var_os(KUBECONFIG_ENV)
        .map(|value| {
            env::split_paths(&value)
                .filter(|path| !path.as_os_str().is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if let Some(existing) = listed.iter().find(|path| path.exists()) {
        return Ok(existing.clone());
    }

    match listed.into_iter().next() {
        Some(first) => Ok(first),
        None => default_kubeconfig_path(),
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("KUBECONFIG", "")])]
    fn path_from_env_falls_back_to_home() -> anyhow::Result<()> {
        assert_eq!(path_from_env()?, default_kubeconfig_path()?);
        Ok(())
    }

    #[sealed_test(env = [("KUBECONFIG", "/nowhere/a.yaml:/nowhere/b.yaml")])]
    fn path_from_env_picks_first_when_none_exist() -> anyhow::Result<()> {
        assert_eq!(path_from_env()?, PathBuf::from("/nowhere/a.yaml"));
        Ok(())
    }

    #[sealed_test]
    fn path_from_env_prefers_existing_entry() -> anyhow::Result<()> {
        // Sealed tests run inside their own scratch directory.
        let existing = env::current_dir()?.join("present.yaml");
        std::fs::write(&existing, "")?;
        let listed = env::join_paths([PathBuf::from("/nowhere/a.yaml"), existing.clone()])?;
        env::set_var(KUBECONFIG_ENV, listed);

        assert_eq!(path_from_env()?, existing);
        Ok(())
    }
}
