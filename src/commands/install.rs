use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::error::{DeployError, Result};
use crate::helpers::app_config::AppConfig;
use crate::helpers::config::{self, Settings};
use crate::helpers::console::{ConsoleLog, LogSink};
use crate::helpers::envfile::{self, BackendEnv, EnvFile};
use crate::helpers::git::{self, RepoSettings};
use crate::helpers::path::{self, ProjectLayout};
use crate::helpers::postgres::{self, DatabaseSettings};
use crate::helpers::prompt::Prompter;
use crate::helpers::runner::{self, CommandOutcome, CommandSpec};
use crate::utils::elevate;

/// Tools that must be on `PATH` before anything is installed.
pub const REQUIRED_TOOLS: &[&str] = &["git", "python", "node", "npm"];

pub const DEFAULT_ALLOWED_HOSTS: &str = "localhost,127.0.0.1";
pub const DEFAULT_REDIS_PORT: u16 = 6379;

const SUPERUSER_CONFLICTS: &[&str] = &["already exists", "already taken"];

pub struct InstallOptions {
    pub config: PathBuf,
    pub target: Option<PathBuf>,
}

/// Django administrator created after the migrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superuser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl Superuser {
    fn env(&self) -> [(&'static str, &str); 5] {
        [
            ("DJANGO_SUPERUSER_USERNAME", self.username.as_str()),
            ("DJANGO_SUPERUSER_EMAIL", self.email.as_str()),
            ("DJANGO_SUPERUSER_PASSWORD", self.password.as_str()),
            ("DJANGO_SUPERUSER_FIRST_NAME", self.first_name.as_str()),
            ("DJANGO_SUPERUSER_LAST_NAME", self.last_name.as_str()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub allowed_hosts: String,
    pub superuser: Option<Superuser>,
    pub database: DatabaseSettings,
    pub redis_port: u16,
    pub biostar_url: String,
    pub biostar_login: String,
    pub biostar_password: String,
}

impl EnvironmentSettings {
    pub fn backend_env(&self, secret_key: String) -> BackendEnv {
        BackendEnv {
            secret_key,
            allowed_hosts: self.allowed_hosts.clone(),
            database_url: self.database.url(),
            redis_port: self.redis_port,
            biostar_url: self.biostar_url.clone(),
            biostar_login: self.biostar_login.clone(),
            biostar_password: self.biostar_password.clone(),
        }
    }
}

/// Everything the installation step needs.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub layout: ProjectLayout,
    pub repos: RepoSettings,
    pub env: EnvironmentSettings,
    /// `PATH` used to find `git`, `python` and `npm`; the inherited one when
    /// `None`.
    pub search_path: Option<OsString>,
}

/// Reports each tool as found or missing and returns the missing ones.
pub fn missing_tools<'a>(tools: &[&'a str], sink: &dyn LogSink) -> Vec<&'a str> {
    let mut missing = Vec::new();
    for tool in tools {
        match which::which(tool) {
            Ok(found) => {
                debug!("{} -> {}", tool, found.display());
                sink.success(&format!("✔ {}", tool));
            }
            Err(_) => {
                sink.error(&format!("✘ {} (not found)", tool));
                missing.push(*tool);
            }
        }
    }
    missing
}

pub fn check_prerequisites(sink: &dyn LogSink) -> Result<()> {
    sink.step("Checking prerequisites...");
    let missing = missing_tools(REQUIRED_TOOLS, sink);
    if missing.is_empty() {
        sink.success("All base dependencies were found.");
        Ok(())
    } else {
        Err(DeployError::Validation(format!(
            "Missing prerequisites: {}. Install them, make sure they are on the system PATH, then retry.",
            missing.join(", ")
        )))
    }
}

pub fn collect_repositories(prompter: &mut dyn Prompter, config: &AppConfig) -> Result<RepoSettings> {
    let backend_url = prompter.text("backend_url", "Backend repository URL", Some(&config.backend_url))?;
    let frontend_url = prompter.text("frontend_url", "Frontend repository URL", Some(&config.frontend_url))?;
    let token = prompter.secret("token", "Personal access token (leave empty for public repositories)")?;
    Ok(RepoSettings {
        backend_url,
        frontend_url,
        token: Some(token.trim().to_string()).filter(|t| !t.is_empty()),
    })
}

/// Checks both repositories and reports every problem at once.
pub async fn validate_repositories(repos: &RepoSettings, sink: &dyn LogSink) -> Result<()> {
    sink.step("Validating repositories...");
    let token = repos.token.as_deref();
    let mut errors = Vec::new();

    for (name, url) in repos.repositories() {
        if git::is_placeholder(url) {
            errors.push(format!("The {} repository URL is invalid or not configured.", name));
            continue;
        }
        let probe_url = match git::authenticated_url(url, token) {
            Ok(probe_url) => probe_url,
            Err(e) => {
                errors.push(format!("{} repository: {}.", name, e));
                continue;
            }
        };
        let spec = git::ls_remote(name, &probe_url, token);
        sink.info(&format!("Probing {}", spec.display()));
        if let Err(e) = runner::run_captured(&spec).await {
            let detail = e.command_output().map(str::trim).unwrap_or_default().to_string();
            let detail = if detail.is_empty() { e.to_string() } else { detail };
            errors.push(format!(
                "Cannot reach the {} repository.\n   - Check the URL and network access.\n   - If private, check the token and its 'repo' scope.\n   - Error: {}",
                name, detail
            ));
        }
    }

    if errors.is_empty() {
        sink.success("Both repository URLs are valid and reachable.");
        Ok(())
    } else {
        Err(DeployError::Validation(errors.join("\n\n")))
    }
}

/// Optional Django superuser. An empty first name defaults to the username.
pub fn collect_superuser(prompter: &mut dyn Prompter, sink: &dyn LogSink) -> Result<Option<Superuser>> {
    if !prompter.confirm("create_superuser", "Create a Django superuser?", true)? {
        return Ok(None);
    }
    let username = prompter.text("su_username", "Superuser username", None)?;
    let email = prompter.text("su_email", "Superuser email", None)?;
    let mut first_name = prompter.text("su_first_name", "First name (optional)", Some(""))?;
    let last_name = prompter.text("su_last_name", "Last name (optional)", Some(""))?;
    let password = prompter.secret("su_password", "Superuser password")?;
    let confirmation = prompter.secret("su_password_confirm", "Confirm password")?;

    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(DeployError::Validation(
            "The superuser username, email and password are required.".to_string(),
        ));
    }
    if password != confirmation {
        return Err(DeployError::Validation(
            "The superuser passwords do not match.".to_string(),
        ));
    }
    if first_name.is_empty() {
        sink.info(&format!("First name was empty; it defaults to '{}'.", username));
        first_name = username.clone();
    }

    Ok(Some(Superuser {
        username,
        email,
        first_name,
        last_name,
        password,
    }))
}

pub fn collect_database(prompter: &mut dyn Prompter) -> Result<DatabaseSettings> {
    let host = prompter.text("db_host", "Database host", Some("localhost"))?;
    let port = prompter.text("db_port", "Database port", Some(&postgres::DEFAULT_PORT.to_string()))?;
    let name = prompter.text("db_name", "Database name", Some(postgres::DEFAULT_DB_NAME))?;
    let user = prompter.text("db_user", "Database user", Some(postgres::DEFAULT_DB_USER))?;
    let password = prompter.secret("db_password", "Database password")?;
    Ok(DatabaseSettings {
        host,
        port: envfile::parse_port("Database port", &port)?,
        name,
        user,
        password,
    })
}

fn continue_or_abort(prompter: &mut dyn Prompter, reason: &str) -> Result<()> {
    if prompter.confirm("continue_without_db_test", "Continue without a validated database connection?", false)? {
        Ok(())
    } else {
        Err(DeployError::Aborted(reason.to_string()))
    }
}

/// `SELECT 1` against the configured database; on failure the user decides
/// whether to go on.
pub async fn check_database(db: &DatabaseSettings, prompter: &mut dyn Prompter, sink: &dyn LogSink) -> Result<()> {
    sink.step("Testing the PostgreSQL connection...");
    let Some(psql) = postgres::locate_psql(None) else {
        sink.warn("psql was not found, so the connection cannot be tested.");
        return continue_or_abort(prompter, "database connection not validated");
    };
    match runner::run_captured(&db.connection_test(psql.as_os_str())).await {
        Ok(_) => {
            sink.success("Connected to PostgreSQL.");
            Ok(())
        }
        Err(e) => {
            sink.error(&format!(
                "Could not connect to PostgreSQL. Check the settings and the firewall.\n{}",
                e
            ));
            continue_or_abort(prompter, "database connection failed")
        }
    }
}

/// Form fields for the backend `.env`, without the connection test.
pub fn collect_environment(prompter: &mut dyn Prompter, sink: &dyn LogSink) -> Result<EnvironmentSettings> {
    let allowed_hosts = prompter.text(
        "allowed_hosts",
        "Allowed hosts (comma separated)",
        Some(DEFAULT_ALLOWED_HOSTS),
    )?;
    let superuser = collect_superuser(prompter, sink)?;
    let database = collect_database(prompter)?;
    let redis_port = prompter.text("redis_port", "Redis port", Some(&DEFAULT_REDIS_PORT.to_string()))?;
    let biostar_url = prompter.text("biostar_url", "BioStar 2 API URL", None)?;
    let biostar_login = prompter.text("biostar_login", "BioStar 2 admin login", None)?;
    let biostar_password = prompter.secret("biostar_password", "BioStar 2 admin password")?;

    if biostar_url.is_empty() || biostar_login.is_empty() {
        return Err(DeployError::Validation(
            "The BioStar 2 API URL and login are required.".to_string(),
        ));
    }

    Ok(EnvironmentSettings {
        allowed_hosts,
        superuser,
        database,
        redis_port: envfile::parse_port("Redis port", &redis_port)?,
        biostar_url,
        biostar_login,
        biostar_password,
    })
}

pub fn collect_target(
    prompter: &mut dyn Prompter,
    target: Option<PathBuf>,
    remembered: Option<&Path>,
) -> Result<PathBuf> {
    let chosen = match target {
        Some(target) => target,
        None => {
            let default = remembered.map(|p| p.to_string_lossy().into_owned());
            let chosen = prompter.text("install_root", "Installation directory", default.as_deref())?;
            if chosen.is_empty() {
                return Err(DeployError::Aborted("no installation directory selected".to_string()));
            }
            PathBuf::from(chosen)
        }
    };
    // Tool paths under the root must stay valid once a step changes directory.
    Ok(std::path::absolute(chosen)?)
}

/// Writes `backend/.env` and returns its variables for the Django steps.
pub fn write_backend_env(layout: &ProjectLayout, env: &BackendEnv) -> Result<Vec<(String, String)>> {
    let rendered = env.render();
    fs::create_dir_all(&layout.backend)?;
    fs::write(&layout.backend_env, format!("{}\n", rendered))?;
    Ok(EnvFile::parse(&rendered).vars())
}

/// A superuser that already exists is not an installation failure.
pub fn check_superuser_outcome(outcome: CommandOutcome, superuser: &Superuser, sink: &dyn LogSink) -> Result<()> {
    if outcome.success {
        return Ok(());
    }
    if outcome.contains_any(SUPERUSER_CONFLICTS) {
        sink.warn(&format!(
            "The superuser '{}' (or its email) already exists. Creation skipped.",
            superuser.username
        ));
        return Ok(());
    }
    outcome.into_result("Create Django administrator").map(|_| ())
}

async fn execute(spec: CommandSpec, sink: &dyn LogSink) -> Result<CommandOutcome> {
    runner::run_streaming(&spec, sink)
        .await?
        .into_result(spec.description())
}

fn advance(bar: &ProgressBar, sink: &dyn LogSink, position: u64, message: &str) {
    bar.set_position(position);
    bar.set_message(message.to_string());
    sink.step(message);
}

pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

/// Clones, configures and builds the application. Stops at the first failed
/// step.
pub async fn run_installation(plan: &InstallPlan, sink: &dyn LogSink, bar: &ProgressBar) -> Result<()> {
    let layout = &plan.layout;
    let token = plan.repos.token.as_deref();
    let search_path = plan.search_path.as_deref();
    sink.info(&format!("Installing into {}", layout.root.display()));
    fs::create_dir_all(&layout.root)?;

    advance(bar, sink, 10, "Step 1: Cloning repositories...");
    for ((name, url), dir) in plan
        .repos
        .repositories()
        .into_iter()
        .zip([&layout.backend, &layout.frontend])
    {
        let clone_url = git::authenticated_url(url, token)
            .map_err(|e| DeployError::Validation(format!("{} repository: {}", name, e)))?;
        execute(git::clone_or_pull(name, &clone_url, dir, token).search_path(search_path), sink).await?;
    }

    advance(bar, sink, 20, "Step 2: Writing backend/.env...");
    let backend_env = plan.env.backend_env(envfile::generate_secret_key());
    let env_vars = write_backend_env(layout, &backend_env)?;
    sink.success(&format!("Wrote {}", layout.backend_env.display()));

    advance(bar, sink, 40, "Step 3: Installing dependencies...");
    if !layout.venv.exists() {
        let create_venv = CommandSpec::new("Create Python virtual environment", "python")
            .args(["-m", "venv"])
            .arg(&layout.venv)
            .search_path(search_path);
        execute(create_venv, sink).await?;
    }
    let pip = CommandSpec::new("Python packages (pip)", path::venv_pip(&layout.venv))
        .args(["install", "-r", "requirements.txt"])
        .current_dir(&layout.backend)
        .search_path(search_path);
    execute(pip, sink).await?;
    let npm_install = CommandSpec::new("JavaScript packages (npm)", "npm")
        .arg("install")
        .current_dir(&layout.frontend)
        .search_path(search_path);
    execute(npm_install, sink).await?;

    advance(bar, sink, 70, "Step 4: Initialising the database...");
    let migrate = CommandSpec::new("Django migrations", &layout.python)
        .args(["manage.py", "migrate"])
        .current_dir(&layout.backend)
        .search_path(search_path)
        .envs(env_vars.clone());
    execute(migrate, sink).await?;

    match &plan.env.superuser {
        Some(superuser) => {
            advance(bar, sink, 80, "Step 5: Creating the superuser...");
            let create = CommandSpec::new("Create Django administrator", &layout.python)
                .args(["manage.py", "createsuperuser", "--noinput"])
                .current_dir(&layout.backend)
                .search_path(search_path)
                .envs(env_vars.clone())
                .envs(superuser.env())
                .secret(superuser.password.clone());
            let outcome = runner::run_streaming(&create, sink).await?;
            check_superuser_outcome(outcome, superuser, sink)?;
        }
        None => advance(bar, sink, 80, "Step 5: Superuser creation skipped (disabled)."),
    }

    advance(bar, sink, 90, "Step 6: Building the frontend...");
    let build = CommandSpec::new("Frontend build", "npm")
        .args(["run", "build"])
        .current_dir(&layout.frontend)
        .search_path(search_path);
    execute(build, sink).await?;

    bar.set_position(100);
    bar.finish_with_message("done");
    sink.success("BASE INSTALLATION COMPLETED SUCCESSFULLY!");
    Ok(())
}

fn print_next_steps() {
    println!();
    println!("{}", "Installation complete!".green().bold());
    println!("Files and base configuration are in place. Before the application is fully");
    println!("operational, these manual steps are {}:", "required".bold());
    println!();
    println!("  1. Windows services: use NSSM or a similar tool to keep running");
    println!("     - the backend server");
    println!("     - Celery Worker and Celery Beat");
    println!("  2. Reverse proxy (Nginx recommended): serve the frontend build folder,");
    println!("     forward API calls to the backend and handle HTTPS.");
    println!("  3. Base services: make sure PostgreSQL and Redis start with the server.");
    println!();
    println!(
        "Use {} to start, stop and inspect the services meanwhile.",
        "rhdeploy services".cyan()
    );
}

/// The full installer: checks, forms, then the installation itself.
pub async fn run(options: InstallOptions, prompter: &mut dyn Prompter, log: &ConsoleLog) -> Result<()> {
    let app = AppConfig::load(&options.config)?;
    info!(config = %options.config.display(), "loaded {}", app.app_name);

    if !elevate::is_elevated()
        && prompter.confirm(
            "relaunch_elevated",
            "This installer works best with administrator rights. Relaunch as administrator?",
            false,
        )?
    {
        if let Err(e) = elevate::run_as_admin() {
            log.warn(&format!("Could not relaunch elevated: {}. Continuing.", e));
        }
    }

    println!("{}", format!("Installing {}", app.app_name).bold());
    println!("This wizard clones the application, configures it and builds it.\n");

    check_prerequisites(log)?;

    let repos = collect_repositories(prompter, &app)?;
    validate_repositories(&repos, log).await?;

    let env = collect_environment(prompter, log)?;
    check_database(&env.database, prompter, log).await?;

    let remembered = Settings::load().install_root;
    let root = collect_target(prompter, options.target, remembered.as_deref())?;

    let plan = InstallPlan {
        layout: ProjectLayout::new(root),
        repos,
        env,
        search_path: None,
    };

    let bar = progress_bar();
    log.attach(bar.clone());
    let result = run_installation(&plan, log, &bar).await;
    log.detach();
    if let Err(e) = result {
        bar.abandon_with_message("failed");
        log.error(&format!("FATAL ERROR: {}", e));
        return Err(e);
    }

    if let Err(e) = config::remember_install_root(&plan.layout.root) {
        log.warn(&format!("Could not remember the install root: {}", e));
    }
    print_next_steps();
    Ok(())
}
