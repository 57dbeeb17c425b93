use std::path::Path;

use crate::helpers::runner::CommandSpec;

/// Markers left in template URLs that were never filled in.
const PLACEHOLDER_MARKERS: &[&str] = &["VOTRE", "YOUR_"];

/// Repository URLs plus the optional access token used to reach them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSettings {
    pub backend_url: String,
    pub frontend_url: String,
    pub token: Option<String>,
}

impl RepoSettings {
    pub fn repositories(&self) -> [(&'static str, &str); 2] {
        [("Backend", &self.backend_url), ("Frontend", &self.frontend_url)]
    }
}

pub fn is_placeholder(url: &str) -> bool {
    url.trim().is_empty() || PLACEHOLDER_MARKERS.iter().any(|m| url.contains(m))
}

/// `https://host/path` becomes `https://<token>@host/path`. Tokens can only be
/// carried by HTTPS URLs.
pub fn authenticated_url(url: &str, token: Option<&str>) -> Result<String, String> {
    match token.filter(|t| !t.is_empty()) {
        None => Ok(url.to_string()),
        Some(token) => match url.strip_prefix("https://") {
            Some(rest) => Ok(format!("https://{}@{}", token, rest)),
            None => Err("an access token can only be used with an HTTPS URL".to_string()),
        },
    }
}

pub fn ls_remote(name: &str, url: &str, token: Option<&str>) -> CommandSpec {
    CommandSpec::new(format!("Validate {} repository", name), "git")
        .args(["ls-remote", "--exit-code", url])
        .secret(token.unwrap_or_default())
}

/// `git -C <dir> pull` when `dir` is already a checkout, otherwise a clone.
pub fn clone_or_pull(name: &str, url: &str, dir: &Path, token: Option<&str>) -> CommandSpec {
    if dir.join(".git").exists() {
        CommandSpec::new(format!("Update {}", name), "git")
            .arg("-C")
            .arg(dir)
            .arg("pull")
    } else {
        CommandSpec::new(format!("Clone {}", name), "git")
            .arg("clone")
            .arg(url)
            .arg(dir)
            .secret(token.unwrap_or_default())
    }
}
