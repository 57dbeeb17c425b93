use std::{fs, path::{Path, PathBuf}};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

// data in settings.json
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub install_root: Option<PathBuf>,
}

pub fn get_settings_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rhdeploy")
        .join("settings.json")
}

// Normalize path to remove Windows extended-length prefix
pub fn normalize_path(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => {
            let canonical_str = canonical.to_string_lossy();
            match canonical_str.strip_prefix(r"\\?\") {
                Some(stripped) => PathBuf::from(stripped),
                None => canonical,
            }
        }
        Err(_) => path.to_path_buf(),
    }
}

impl Settings {
    pub fn load() -> Self {
        Self::load_from(&get_settings_path())
    }

    /// Loads settings from `path`; an unreadable or corrupt file is replaced
    /// with defaults.
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No settings at {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Settings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to parse {}: {}. Resetting settings.", path.display(), e);
                let defaults = Self::default();
                if let Err(e) = defaults.save_to(path) {
                    warn!("Failed to reset settings: {}", e);
                }
                defaults
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&get_settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Remember `root` so later `services` invocations can omit `--root`.
pub fn remember_install_root(root: &Path) -> Result<()> {
    let path = get_settings_path();
    let mut settings = Settings::load_from(&path);
    let normalized = normalize_path(root);
    if settings.install_root.as_deref() != Some(normalized.as_path()) {
        settings.install_root = Some(normalized.clone());
        settings.save_to(&path)?;
        println!(
            "{} {}",
            "ℹ Install root saved:".blue(),
            normalized.display()
        );
    }
    Ok(())
}
