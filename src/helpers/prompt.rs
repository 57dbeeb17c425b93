use std::collections::HashMap;
use std::path::Path;

use dialoguer::{Confirm, Input, MultiSelect, Password};
use serde_json::Value;

use crate::error::{DeployError, Result};

/// Source of wizard form values.
///
/// Every field carries a stable `key` so values can be supplied from an
/// answers file instead of the terminal.
pub trait Prompter {
    fn text(&mut self, key: &str, label: &str, default: Option<&str>) -> Result<String>;

    /// Hidden input. An empty answer is allowed; a missing one is not.
    fn secret(&mut self, key: &str, label: &str) -> Result<String>;

    fn confirm(&mut self, key: &str, label: &str, default: bool) -> Result<bool>;

    /// Returns the indices of the chosen items.
    fn select_many(
        &mut self,
        key: &str,
        label: &str,
        items: &[&str],
        defaults: &[bool],
    ) -> Result<Vec<usize>>;
}

/// Interactive prompts on the controlling terminal.
#[derive(Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn text(&mut self, _key: &str, label: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::new().with_prompt(label).allow_empty(true);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        Ok(input.interact_text()?.trim().to_string())
    }

    fn secret(&mut self, _key: &str, label: &str) -> Result<String> {
        Ok(Password::new()
            .with_prompt(label)
            .allow_empty_password(true)
            .interact()?)
    }

    fn confirm(&mut self, _key: &str, label: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new()
            .with_prompt(label)
            .default(default)
            .interact()?)
    }

    fn select_many(
        &mut self,
        _key: &str,
        label: &str,
        items: &[&str],
        defaults: &[bool],
    ) -> Result<Vec<usize>> {
        Ok(MultiSelect::new()
            .with_prompt(label)
            .items(items)
            .defaults(defaults)
            .interact()?)
    }
}

/// Terminal prompts when `interactive`, otherwise every field takes its
/// default.
pub fn terminal_or_defaults(interactive: bool) -> Box<dyn Prompter> {
    if interactive {
        Box::new(TerminalPrompter)
    } else {
        Box::new(AnswerFile::new(HashMap::new()))
    }
}

/// Answers read from a flat JSON object, e.g. `{"db_password": "..."}`.
///
/// Keys that are absent fall back to `fallback` when one is attached,
/// otherwise to the field default; a field with neither is an error.
pub struct AnswerFile {
    answers: HashMap<String, Value>,
    fallback: Option<Box<dyn Prompter>>,
}

impl AnswerFile {
    pub fn new(answers: HashMap<String, Value>) -> Self {
        Self {
            answers,
            fallback: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let answers: HashMap<String, Value> = serde_json::from_str(&contents)?;
        Ok(Self::new(answers))
    }

    pub fn with_fallback(mut self, fallback: Box<dyn Prompter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn missing(key: &str) -> DeployError {
        DeployError::Validation(format!("No answer provided for '{}'.", key))
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Prompter for AnswerFile {
    fn text(&mut self, key: &str, label: &str, default: Option<&str>) -> Result<String> {
        if let Some(value) = self.answers.get(key) {
            return Ok(value_to_string(value));
        }
        if let Some(fallback) = self.fallback.as_mut() {
            return fallback.text(key, label, default);
        }
        default.map(str::to_string).ok_or_else(|| Self::missing(key))
    }

    fn secret(&mut self, key: &str, label: &str) -> Result<String> {
        if let Some(value) = self.answers.get(key) {
            return Ok(value_to_string(value));
        }
        match self.fallback.as_mut() {
            Some(fallback) => fallback.secret(key, label),
            None => Err(Self::missing(key)),
        }
    }

    fn confirm(&mut self, key: &str, label: &str, default: bool) -> Result<bool> {
        match self.answers.get(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => match value_to_string(other).to_lowercase().as_str() {
                "y" | "yes" | "true" | "1" => Ok(true),
                "n" | "no" | "false" | "0" => Ok(false),
                _ => Err(DeployError::Validation(format!(
                    "Answer for '{}' must be a boolean.",
                    key
                ))),
            },
            None => match self.fallback.as_mut() {
                Some(fallback) => fallback.confirm(key, label, default),
                None => Ok(default),
            },
        }
    }

    fn select_many(
        &mut self,
        key: &str,
        label: &str,
        items: &[&str],
        defaults: &[bool],
    ) -> Result<Vec<usize>> {
        match self.answers.get(key) {
            Some(Value::Array(chosen)) => chosen
                .iter()
                .map(value_to_string)
                .map(|name| {
                    items.iter().position(|i| *i == name).ok_or_else(|| {
                        DeployError::Validation(format!("Unknown choice '{}' for '{}'.", name, key))
                    })
                })
                .collect(),
            Some(_) => Err(DeployError::Validation(format!(
                "Answer for '{}' must be a list.",
                key
            ))),
            None => match self.fallback.as_mut() {
                Some(fallback) => fallback.select_many(key, label, items, defaults),
                None => Ok(defaults
                    .iter()
                    .enumerate()
                    .filter_map(|(i, on)| on.then_some(i))
                    .collect()),
            },
        }
    }
}

#[cfg(test)]
pub(crate) fn answers(pairs: &[(&str, Value)]) -> AnswerFile {
    AnswerFile::new(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answers_override_defaults() {
        let mut prompter = answers(&[("db_host", json!("db.local")), ("db_port", json!(5433))]);
        assert_eq!(prompter.text("db_host", "Host", Some("localhost")).unwrap(), "db.local");
        assert_eq!(prompter.text("db_port", "Port", Some("5432")).unwrap(), "5433");
        assert_eq!(prompter.text("db_name", "Name", Some("rh_app_db")).unwrap(), "rh_app_db");
    }

    #[test]
    fn missing_required_text_is_an_error() {
        let mut prompter = answers(&[]);
        let err = prompter.text("biostar_url", "URL", None).unwrap_err();
        assert!(err.to_string().contains("biostar_url"));
    }

    #[test]
    fn confirm_accepts_strings_and_bools() {
        let mut prompter = answers(&[("a", json!(false)), ("b", json!("yes")), ("c", json!("maybe"))]);
        assert!(!prompter.confirm("a", "", true).unwrap());
        assert!(prompter.confirm("b", "", false).unwrap());
        assert!(prompter.confirm("c", "", false).is_err());
        assert!(prompter.confirm("d", "", true).unwrap());
    }

    #[test]
    fn select_many_maps_names_to_indices() {
        let items = ["git", "python", "nodejs-lts"];
        let mut prompter = answers(&[("tools", json!(["nodejs-lts", "git"]))]);
        assert_eq!(prompter.select_many("tools", "", &items, &[true; 3]).unwrap(), vec![2, 0]);

        let mut defaults_only = answers(&[]);
        assert_eq!(
            defaults_only.select_many("tools", "", &items, &[true, false, true]).unwrap(),
            vec![0, 2]
        );

        let mut unknown = answers(&[("tools", json!(["emacs"]))]);
        assert!(unknown.select_many("tools", "", &items, &[true; 3]).is_err());
    }

    #[test]
    fn load_reads_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answers.json");
        std::fs::write(&path, r#"{"su_username": "admin", "token": ""}"#).unwrap();
        let mut prompter = AnswerFile::load(&path).unwrap();
        assert_eq!(prompter.text("su_username", "", None).unwrap(), "admin");
        assert_eq!(prompter.secret("token", "").unwrap(), "");
    }

    #[test]
    fn missing_secret_is_an_error() {
        let mut prompter = answers(&[]);
        let err = prompter.secret("su_password", "Superuser password").unwrap_err();
        assert!(err.to_string().contains("'su_password'"));
    }
}
