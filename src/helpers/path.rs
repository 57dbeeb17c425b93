use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};

/// Interpreter inside a virtualenv.
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

pub fn venv_pip(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("pip.exe")
    } else {
        venv.join("bin").join("pip")
    }
}

/// Well-known locations under an install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub backend: PathBuf,
    pub frontend: PathBuf,
    pub frontend_dist: PathBuf,
    pub venv: PathBuf,
    pub python: PathBuf,
    pub backend_env: PathBuf,
    pub frontend_env: PathBuf,
    pub pid_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let backend = root.join("backend");
        let frontend = root.join("frontend");
        let venv = backend.join("venv");
        Self {
            frontend_dist: frontend.join("dist"),
            python: venv_python(&venv),
            backend_env: backend.join(".env"),
            frontend_env: frontend.join(".env.local"),
            pid_dir: root.join(".pids"),
            log_dir: root.join("logs"),
            root,
            backend,
            frontend,
            venv,
        }
    }

    /// Every missing piece the service manager needs, in one message per
    /// problem.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, dir) in [("backend", &self.backend), ("frontend/dist", &self.frontend_dist)] {
            if !dir.is_dir() {
                problems.push(format!("- Directory '{}' not found.", name));
            }
        }
        for (name, file) in [("venv", &self.python), ("backend/.env", &self.backend_env)] {
            if !file.exists() {
                problems.push(format!("- Required file '{}' not found.", name));
            }
        }
        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DeployError::InvalidLayout(problems))
        }
    }

    /// Creates the bookkeeping directories for PID and log files.
    pub fn ensure_runtime_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.pid_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = ProjectLayout::new("/srv/hr");
        assert_eq!(layout.backend, PathBuf::from("/srv/hr/backend"));
        assert_eq!(layout.frontend_dist, PathBuf::from("/srv/hr/frontend/dist"));
        assert_eq!(layout.frontend_env, PathBuf::from("/srv/hr/frontend/.env.local"));
        assert_eq!(layout.pid_dir, PathBuf::from("/srv/hr/.pids"));
        assert!(layout.python.starts_with("/srv/hr/backend/venv"));
    }

    #[test]
    fn empty_root_reports_all_problems() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert_eq!(layout.problems().len(), 4);
        assert!(matches!(layout.validate(), Err(DeployError::InvalidLayout(p)) if p.len() == 4));
    }

    #[test]
    fn complete_layout_validates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        fs::create_dir_all(&layout.frontend_dist).unwrap();
        fs::create_dir_all(layout.python.parent().unwrap()).unwrap();
        fs::write(&layout.python, "").unwrap();
        fs::write(&layout.backend_env, "A=1").unwrap();
        layout.validate().unwrap();

        layout.ensure_runtime_dirs().unwrap();
        assert!(layout.pid_dir.is_dir());
        assert!(layout.log_dir.is_dir());
    }
}
