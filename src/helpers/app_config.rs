use std::path::Path;

use ini::Ini;

use crate::error::{DeployError, Result};

pub const DEFAULT_APP_NAME: &str = "Unnamed application";

/// Contents of the installer's `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    pub backend_url: String,
    pub frontend_url: String,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeployError::Config(format!(
                "'{}' is missing. Place it next to the installer.",
                path.display()
            )));
        }
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    pub fn from_ini(ini: &Ini) -> Result<Self> {
        let app_name = ini
            .get_from(Some("Application"), "name")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_APP_NAME)
            .to_string();

        let repo = |key: &str| {
            ini.get_from(Some("Repositories"), key)
                .map(|v| v.trim().to_string())
                .ok_or_else(|| {
                    DeployError::Config(format!("[Repositories] {} is not set in config.ini", key))
                })
        };

        Ok(Self {
            app_name,
            backend_url: repo("backend_url")?,
            frontend_url: repo("frontend_url")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_name_and_repositories() {
        let (_dir, path) = write_config(
            "[Application]\nname = HR Portal\n\n[Repositories]\nbackend_url = https://github.com/acme/hr-backend.git\nfrontend_url = https://github.com/acme/hr-frontend.git\n",
        );
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.app_name, "HR Portal");
        assert_eq!(config.backend_url, "https://github.com/acme/hr-backend.git");
        assert_eq!(config.frontend_url, "https://github.com/acme/hr-frontend.git");
    }

    #[test]
    fn application_name_is_optional() {
        let (_dir, path) =
            write_config("[Repositories]\nbackend_url = a\nfrontend_url = b\n");
        assert_eq!(AppConfig::load(&path).unwrap().app_name, DEFAULT_APP_NAME);
    }

    #[test]
    fn missing_repository_is_a_config_error() {
        let (_dir, path) = write_config("[Repositories]\nbackend_url = a\n");
        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("frontend_url"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("config.ini")).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }
}
