//! Runtime configuration read from the environment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Default decoded-image budget in megabytes.
pub const DEFAULT_CACHE_MB: usize = 1024;

/// Default number of neighbours precached on each side of the current item.
pub const DEFAULT_PRECACHE_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cache_mb: usize,
    pub precache_window: usize,
    /// Where link shortcuts are read from. `None` when no config directory is known.
    pub links_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_mb: DEFAULT_CACHE_MB,
            precache_window: DEFAULT_PRECACHE_WINDOW,
            links_file: default_links_file().ok(),
        }
    }
}

impl Config {
    /// Read `IGAL_CACHE_MB`, `IGAL_PRECACHE_WINDOW` and `IGAL_LINKS_FILE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let cache_mb = lookup("IGAL_CACHE_MB")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_CACHE_MB);

        let precache_window = lookup("IGAL_PRECACHE_WINDOW")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_PRECACHE_WINDOW);

        let links_file = lookup("IGAL_LINKS_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| default_links_file().ok());

        Self {
            cache_mb,
            precache_window,
            links_file,
        }
    }
}

/// `<config dir>/igal/links.txt` for the current user.
pub fn default_links_file() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "igal").context("Failed to determine project directories")?;
    Ok(proj_dirs.config_dir().join("links.txt"))
}
