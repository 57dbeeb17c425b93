use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use regex::Regex;

use crate::error::{DeployError, Result};

pub const SECRET_KEY_LENGTH: usize = 60;

const SECRET_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Line-preserving view of a `KEY=VALUE` file.
///
/// Unknown lines, comments and ordering survive a read-modify-write cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<String>,
}

impl EnvFile {
    pub fn parse(contents: &str) -> Self {
        Self {
            lines: contents.lines().map(str::to_string).collect(),
        }
    }

    /// Reads `path`, treating a missing file as empty.
    pub fn read(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Key/value pairs with blank lines and `#` comments skipped, values
    /// trimmed and stripped of surrounding quotes.
    pub fn vars(&self) -> Vec<(String, String)> {
        self.lines
            .iter()
            .filter_map(|line| {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                let (key, value) = trimmed.split_once('=')?;
                Some((key.trim().to_string(), unquote(value.trim()).to_string()))
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Replaces every assignment of `key` by `key=value`, appending the line
    /// when none exists.
    pub fn set(&mut self, key: &str, value: &str) {
        let replacement = format!("{}={}", key, value);
        let mut found = false;
        for line in self.lines.iter_mut() {
            let assigns_key = line
                .trim_start()
                .strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with('='));
            if assigns_key {
                *line = replacement.clone();
                found = true;
            }
        }
        if !found {
            self.lines.push(replacement);
        }
    }

    /// Raw text of the file, for pattern searches.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

fn unquote(value: &str) -> &str {
    value.trim_matches(|c| c == '\'' || c == '"')
}

/// Random secret drawn from letters, digits and punctuation, with quote
/// characters replaced so the value can sit inside single quotes.
pub fn generate_secret_key() -> String {
    let mut rng = rand::thread_rng();
    (0..SECRET_KEY_LENGTH)
        .map(|_| {
            let c = *SECRET_ALPHABET.choose(&mut rng).unwrap_or(&b's') as char;
            match c {
                '\'' | '"' | '`' => 's',
                other => other,
            }
        })
        .collect()
}

/// Values the installer collects for the backend `.env`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEnv {
    pub secret_key: String,
    pub allowed_hosts: String,
    pub database_url: String,
    pub redis_port: u16,
    pub biostar_url: String,
    pub biostar_login: String,
    pub biostar_password: String,
}

impl BackendEnv {
    /// First entry of the comma-separated allowed hosts list.
    pub fn primary_host(&self) -> &str {
        self.allowed_hosts.split(',').next().unwrap_or("").trim()
    }

    pub fn render(&self) -> String {
        let host = self.primary_host();
        let redis = format!("redis://localhost:{}/0", self.redis_port);
        [
            format!("DJANGO_SECRET_KEY='{}'", self.secret_key),
            "DJANGO_DEBUG=False".to_string(),
            format!("ALLOWED_HOSTS={}", self.allowed_hosts),
            format!("DATABASE_URL='{}'", self.database_url),
            format!("CORS_ALLOWED_ORIGINS=http://{}:3000,https://{}", host, host),
            format!("CELERY_BROKER_URL='{}'", redis),
            format!("CELERY_RESULT_BACKEND='{}'", redis),
            format!("BIOSTAR_API_BASE_URL={}", self.biostar_url),
            format!("BIOSTAR_ADMIN_LOGIN_ID={}", self.biostar_login),
            format!("BIOSTAR_ADMIN_PASSWORD='{}'", self.biostar_password),
            "MOCK_BIOSTAR_API=False".to_string(),
        ]
        .join("\n")
    }
}

/// Port of the first `http(s)://host:port` URL assigned to `key`.
pub fn port_in_url_var(env: &EnvFile, key: &str) -> Option<u16> {
    let pattern = format!(r"{}\s*=\s*['\x22]?https?://[^:/\s]+:(\d+)", regex::escape(key));
    let re = Regex::new(&pattern).ok()?;
    re.captures(&env.text())?.get(1)?.as_str().parse().ok()
}

/// Parses a TCP port typed by the user.
pub fn parse_port(label: &str, value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(DeployError::Validation(format!(
            "{} must be a number between 1 and 65535 (got '{}').",
            label,
            value.trim()
        ))),
    }
}
