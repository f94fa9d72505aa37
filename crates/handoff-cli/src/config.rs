//! Configuration file management for handoff.
//!
//! Provides a TOML-based config file at `~/.config/handoff/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use handoff_core::context::DEFAULT_MAIN_BRANCH;
use handoff_core::layout::DEFAULT_NAMESPACE_DIR;

pub const NAMESPACE_DIR_ENV: &str = "HANDOFF_NAMESPACE_DIR";
pub const MAIN_BRANCH_ENV: &str = "HANDOFF_MAIN_BRANCH";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub workspace: WorkspaceSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Directory (relative to the repository root) holding tasks, worktrees
    /// and the abandon log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_dir: Option<String>,
    /// Branch that finalized plans are merged into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_branch: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the handoff config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/handoff` or `~/.config/handoff`,
/// also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("handoff");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("handoff")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file at `path`; `Ok(None)` if it does not exist.
pub fn load_config(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffConfig {
    pub namespace_dir: String,
    pub main_branch: String,
}

impl HandoffConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Namespace dir: `cli_namespace_dir` > `HANDOFF_NAMESPACE_DIR` > `workspace.namespace_dir` > `.handoff`
    /// - Main branch: `cli_main_branch` > `HANDOFF_MAIN_BRANCH` > `workspace.main_branch` > `main`
    pub fn resolve(cli_namespace_dir: Option<&str>, cli_main_branch: Option<&str>) -> Result<Self> {
        let file = load_config(&config_path())?.unwrap_or_default();

        let namespace_dir = pick(
            cli_namespace_dir,
            NAMESPACE_DIR_ENV,
            file.workspace.namespace_dir,
            DEFAULT_NAMESPACE_DIR,
        );
        check_namespace_dir(&namespace_dir)?;

        let main_branch = pick(
            cli_main_branch,
            MAIN_BRANCH_ENV,
            file.workspace.main_branch,
            DEFAULT_MAIN_BRANCH,
        );
        if main_branch.trim().is_empty() {
            bail!("main branch name must not be empty");
        }

        Ok(Self {
            namespace_dir,
            main_branch,
        })
    }
}

fn pick(cli: Option<&str>, env: &str, file: Option<String>, default: &str) -> String {
    if let Some(value) = cli {
        value.to_string()
    } else if let Ok(value) = std::env::var(env) {
        value
    } else if let Some(value) = file {
        value
    } else {
        default.to_string()
    }
}

/// The namespace dir must be a plain relative path inside the repository.
fn check_namespace_dir(dir: &str) -> Result<()> {
    let path = Path::new(dir);
    if dir.is_empty() {
        bail!("namespace dir must not be empty");
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        bail!("namespace dir {dir:?} must be a relative path without '..'");
    }
    Ok(())
}

// -----------------------------------------------------------------------
// `handoff init`
// -----------------------------------------------------------------------

/// Write a config file holding the given (or default) settings.
pub fn cmd_init(force: bool, namespace_dir: Option<&str>, main_branch: Option<&str>) -> Result<()> {
    let path = config_path();

    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let namespace_dir = namespace_dir.unwrap_or(DEFAULT_NAMESPACE_DIR);
    check_namespace_dir(namespace_dir)?;
    let main_branch = main_branch.unwrap_or(DEFAULT_MAIN_BRANCH);

    let cfg = ConfigFile {
        workspace: WorkspaceSection {
            namespace_dir: Some(namespace_dir.to_string()),
            main_branch: Some(main_branch.to_string()),
        },
    };
    save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  workspace.namespace_dir = {namespace_dir}");
    println!("  workspace.main_branch = {main_branch}");
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    /// Point XDG_CONFIG_HOME at a fresh temp dir and clear handoff env vars.
    fn isolated_env() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };
        unsafe { std::env::remove_var(NAMESPACE_DIR_ENV) };
        unsafe { std::env::remove_var(MAIN_BRANCH_ENV) };
        tmp
    }

    fn write_file_config(ns: &str, branch: &str) {
        let cfg = ConfigFile {
            workspace: WorkspaceSection {
                namespace_dir: Some(ns.to_string()),
                main_branch: Some(branch.to_string()),
            },
        };
        save_config(&config_path(), &cfg).unwrap();
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("handoff").join("config.toml");
        let original = ConfigFile {
            workspace: WorkspaceSection {
                namespace_dir: Some(".plans".to_string()),
                main_branch: Some("trunk".to_string()),
            },
        };

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap().unwrap();

        assert_eq!(loaded.workspace.namespace_dir.as_deref(), Some(".plans"));
        assert_eq!(loaded.workspace.main_branch.as_deref(), Some("trunk"));
    }

    #[test]
    fn missing_config_file_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_config(&tmp.path().join("config.toml")).unwrap().is_none());
    }

    #[test]
    fn empty_config_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        let loaded = load_config(&path).unwrap().unwrap();
        assert!(loaded.workspace.namespace_dir.is_none());
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[workspace\nnamespace_dir = 3").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        let _tmp = isolated_env();

        let config = HandoffConfig::resolve(None, None).unwrap();
        assert_eq!(config.namespace_dir, DEFAULT_NAMESPACE_DIR);
        assert_eq!(config.main_branch, DEFAULT_MAIN_BRANCH);
    }

    #[test]
    fn resolve_reads_config_file() {
        let _lock = lock_env();
        let _tmp = isolated_env();
        write_file_config(".plans", "trunk");

        let config = HandoffConfig::resolve(None, None).unwrap();
        assert_eq!(config.namespace_dir, ".plans");
        assert_eq!(config.main_branch, "trunk");
    }

    #[test]
    fn resolve_env_var_overrides_config_file() {
        let _lock = lock_env();
        let _tmp = isolated_env();
        write_file_config(".plans", "trunk");
        unsafe { std::env::set_var(MAIN_BRANCH_ENV, "develop") };

        let config = HandoffConfig::resolve(None, None).unwrap();

        unsafe { std::env::remove_var(MAIN_BRANCH_ENV) };
        assert_eq!(config.namespace_dir, ".plans");
        assert_eq!(config.main_branch, "develop");
    }

    #[test]
    fn resolve_cli_flag_overrides_all() {
        let _lock = lock_env();
        let _tmp = isolated_env();
        write_file_config(".plans", "trunk");
        unsafe { std::env::set_var(NAMESPACE_DIR_ENV, ".env-plans") };

        let config = HandoffConfig::resolve(Some(".cli-plans"), Some("release")).unwrap();

        unsafe { std::env::remove_var(NAMESPACE_DIR_ENV) };
        assert_eq!(config.namespace_dir, ".cli-plans");
        assert_eq!(config.main_branch, "release");
    }

    #[test]
    fn resolve_rejects_escaping_namespace_dir() {
        let _lock = lock_env();
        let _tmp = isolated_env();

        for bad in ["../outside", "/abs/plans", ""] {
            let err = HandoffConfig::resolve(Some(bad), None).unwrap_err();
            assert!(err.to_string().contains("namespace dir"), "{bad}: {err}");
        }
        assert!(HandoffConfig::resolve(Some("tools/plans"), None).is_ok());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let _lock = lock_env();
        let _tmp = isolated_env();

        cmd_init(false, None, Some("trunk")).unwrap();
        assert!(cmd_init(false, None, None).is_err());
        cmd_init(true, Some(".plans"), None).unwrap();

        let loaded = load_config(&config_path()).unwrap().unwrap();
        assert_eq!(loaded.workspace.namespace_dir.as_deref(), Some(".plans"));
        assert_eq!(loaded.workspace.main_branch.as_deref(), Some("main"));
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("handoff/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
