use std::ffi::OsStr;
use std::path::PathBuf;

use regex::Regex;

use crate::error::{DeployError, Result};
use crate::helpers::runner::CommandSpec;

pub const DEFAULT_DB_NAME: &str = "rh_app_db";
pub const DEFAULT_DB_USER: &str = "rh_app_user";
pub const DEFAULT_PORT: u16 = 5432;

/// Where the PostgreSQL 14 package installs its client tools.
const DEFAULT_BIN_DIR: &str = r"C:\Program Files\PostgreSQL\14\bin";

/// Connection details the application uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseSettings {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }

    /// `SELECT 1` against the application database.
    pub fn connection_test(&self, psql: &OsStr) -> CommandSpec {
        CommandSpec::new("Test PostgreSQL connection", psql)
            .args(["-h", self.host.as_str(), "-p", self.port.to_string().as_str()])
            .args(["-U", self.user.as_str(), "-d", self.name.as_str()])
            .args(["-w", "-c", "SELECT 1"])
            .env("PGPASSWORD", &self.password)
            .env("PGCONNECT_TIMEOUT", "3")
    }
}

/// Database and role the prerequisites wizard creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSetup {
    pub admin_password: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
}

pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| DeployError::Validation(e.to_string()))?;
    if re.is_match(value) {
        Ok(())
    } else {
        Err(DeployError::Validation(format!(
            "{} '{}' must start with a letter or underscore and contain only letters, digits and underscores.",
            kind, value
        )))
    }
}

impl DatabaseSetup {
    pub fn validate(&self) -> Result<()> {
        if self.admin_password.is_empty() {
            return Err(DeployError::Validation(
                "The administrator ('postgres') password is required.".to_string(),
            ));
        }
        validate_identifier("Database name", &self.db_name)?;
        validate_identifier("Database user", &self.db_user)
    }

    pub fn statements(&self) -> Vec<String> {
        vec![
            format!("CREATE DATABASE {};", self.db_name),
            format!(
                "CREATE USER {} WITH PASSWORD '{}';",
                self.db_user,
                self.db_password.replace('\'', "''")
            ),
            format!(
                "GRANT ALL PRIVILEGES ON DATABASE {} TO {};",
                self.db_name, self.db_user
            ),
        ]
    }

    /// One `psql -U postgres -c <sql>` invocation per statement.
    pub fn provisioning_commands(&self, psql: &OsStr, search_path: Option<&OsStr>) -> Vec<CommandSpec> {
        self.statements()
            .into_iter()
            .map(|sql| {
                let verb = sql.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
                CommandSpec::new(format!("psql {}", verb), psql)
                    .args(["-U", "postgres", "-w", "-c"])
                    .arg(&sql)
                    .env("PGPASSWORD", &self.admin_password)
                    .search_path(search_path)
                    .secret(self.admin_password.clone())
                    .secret(self.db_password.replace('\'', "''"))
            })
            .collect()
    }
}

/// `psql` from `PATH`, or from the default PostgreSQL 14 install directory.
pub fn locate_psql(search_path: Option<&OsStr>) -> Option<PathBuf> {
    let found = match search_path {
        Some(path) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            which::which_in("psql", Some(path), cwd)
        }
        None => which::which("psql"),
    };
    found.ok().or_else(|| {
        let candidate = PathBuf::from(DEFAULT_BIN_DIR).join("psql.exe");
        candidate.exists().then_some(candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> DatabaseSetup {
        DatabaseSetup {
            admin_password: "root".into(),
            db_name: DEFAULT_DB_NAME.into(),
            db_user: DEFAULT_DB_USER.into(),
            db_password: "it's secret".into(),
        }
    }

    #[test]
    fn statements_escape_single_quotes() {
        assert_eq!(
            setup().statements(),
            vec![
                "CREATE DATABASE rh_app_db;".to_string(),
                "CREATE USER rh_app_user WITH PASSWORD 'it''s secret';".to_string(),
                "GRANT ALL PRIVILEGES ON DATABASE rh_app_db TO rh_app_user;".to_string(),
            ]
        );
    }

    #[test]
    fn provisioning_masks_passwords() {
        let commands = setup().provisioning_commands(OsStr::new("psql"), None);
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].description(), "psql CREATE DATABASE");
        assert!(!commands[1].display().contains("it''s secret"));
        assert!(!commands[1].display().contains("root"));
    }

    #[test]
    fn validation_rejects_bad_identifiers_and_empty_admin_password() {
        setup().validate().unwrap();

        let mut bad = setup();
        bad.db_name = "rh; DROP".into();
        assert!(bad.validate().is_err());

        let mut no_admin = setup();
        no_admin.admin_password.clear();
        assert!(no_admin.validate().is_err());
    }

    #[test]
    fn database_url_is_assembled() {
        let settings = DatabaseSettings {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            name: "db".into(),
            user: "u".into(),
            password: "p".into(),
        };
        assert_eq!(settings.url(), "postgres://u:p@localhost:5432/db");
        let test = settings.connection_test(OsStr::new("psql"));
        assert!(test.display().contains("-d db"));
    }
}
