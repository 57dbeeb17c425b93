use std::ffi::OsString;
use std::path::Path;

use colored::Colorize;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::helpers::choco;
use crate::helpers::console::LogSink;
use crate::helpers::postgres::{self, DatabaseSetup};
use crate::helpers::prompt::Prompter;
use crate::helpers::runner;
use crate::utils::elevate;

#[derive(Debug, Default, Clone)]
pub struct PrereqOptions {
    pub skip_tools: bool,
    pub skip_postgres: bool,
    /// Overrides the interactive tool selection.
    pub tools: Option<Vec<String>>,
}

/// Tools whose installation succeeded or failed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ToolReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

/// Requires administrator rights; offers a UAC relaunch otherwise. Either way
/// this process does not continue unelevated.
pub fn ensure_elevated(prompter: &mut dyn Prompter) -> Result<()> {
    if elevate::is_elevated() {
        return Ok(());
    }
    let relaunch = prompter.confirm(
        "relaunch_elevated",
        "This program needs administrator rights to install software with Chocolatey. Relaunch as administrator?",
        true,
    )?;
    if relaunch {
        elevate::run_as_admin()
            .map_err(|e| DeployError::Aborted(format!("could not relaunch as administrator: {}", e)))?;
    }
    Err(DeployError::Aborted("administrator rights are required".to_string()))
}

fn print_welcome() {
    println!("{}", "Prerequisites installation".bold());
    println!("This wizard installs what the HR application needs, using Chocolatey:");
    println!("  • Chocolatey itself, if it is missing");
    println!("  • Git, Python, Node.js and VS Code");
    println!("  • a PostgreSQL server with the application database");
    println!("An Internet connection is required.\n");
}

/// `base` (or the inherited `PATH`) with `dir` appended.
pub fn path_with(base: Option<OsString>, dir: &Path) -> Option<OsString> {
    let base = base.or_else(|| std::env::var_os("PATH")).unwrap_or_default();
    let mut dirs: Vec<_> = std::env::split_paths(&base).collect();
    if !dirs.iter().any(|d| d == dir) {
        dirs.push(dir.to_path_buf());
    }
    std::env::join_paths(dirs).ok()
}

/// Makes sure `choco` can be run, installing Chocolatey when the user agrees.
/// Returns the `PATH` override needed to reach it, if any.
pub async fn ensure_chocolatey(prompter: &mut dyn Prompter, sink: &dyn LogSink) -> Result<Option<OsString>> {
    sink.step("Checking for Chocolatey...");
    if which::which("choco").is_ok() {
        sink.success("Chocolatey is installed.");
        return Ok(None);
    }
    if let Some(found) = choco::locate(None) {
        sink.info(&format!("Chocolatey found at {} (not on PATH).", found.display()));
        return Ok(found.parent().and_then(|dir| path_with(None, dir)));
    }

    sink.warn("Chocolatey was not found.");
    if !prompter.confirm("install_chocolatey", "Install Chocolatey now?", true)? {
        return Err(DeployError::Aborted("Chocolatey is required".to_string()));
    }

    let spec = choco::install_chocolatey();
    runner::run_streaming(&spec, sink)
        .await?
        .into_result(spec.description())?;

    let refreshed = choco::registry_path();
    debug!(path = ?refreshed, "PATH re-read from the registry");
    match choco::locate(refreshed.as_deref()) {
        Some(found) => {
            sink.success(&format!("Chocolatey installed at {}.", found.display()));
            Ok(found.parent().and_then(|dir| path_with(refreshed, dir)))
        }
        None => Err(DeployError::Aborted(
            "Chocolatey was installed but is not on PATH yet. Restart your terminal and run `rhdeploy prereqs` again."
                .to_string(),
        )),
    }
}

pub fn select_tools(prompter: &mut dyn Prompter, requested: Option<&[String]>) -> Result<Vec<String>> {
    if let Some(requested) = requested {
        return Ok(requested
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect());
    }
    let defaults = vec![true; choco::DEFAULT_TOOLS.len()];
    let chosen = prompter.select_many("tools", "Tools to install", choco::DEFAULT_TOOLS, &defaults)?;
    Ok(chosen
        .into_iter()
        .filter_map(|i| choco::DEFAULT_TOOLS.get(i))
        .map(|t| t.to_string())
        .collect())
}

/// Installs each tool in turn. A failure is reported and the next tool is
/// still attempted.
pub async fn install_tools(tools: &[String], search_path: Option<&std::ffi::OsStr>, sink: &dyn LogSink) -> ToolReport {
    let mut report = ToolReport::default();
    if tools.is_empty() {
        sink.info("No tool selected. Skipping.");
        return report;
    }
    for (i, tool) in tools.iter().enumerate() {
        sink.step(&format!("Installing {} ({}/{})...", tool, i + 1, tools.len()));
        let spec = choco::install_package(tool, search_path);
        let ok = match runner::run_streaming(&spec, sink).await {
            Ok(outcome) => outcome.success,
            Err(_) => false,
        };
        if ok {
            report.installed.push(tool.clone());
        } else {
            sink.warn(&format!(
                "Installing {} failed. You can continue, but the application may not work.",
                tool
            ));
            report.failed.push(tool.clone());
        }
    }
    sink.success("All installations finished.");
    report
}

pub fn collect_database_setup(prompter: &mut dyn Prompter) -> Result<DatabaseSetup> {
    let setup = DatabaseSetup {
        admin_password: prompter.secret("pg_admin_password", "PostgreSQL administrator ('postgres') password")?,
        db_name: prompter.text("db_name", "Database name", Some(postgres::DEFAULT_DB_NAME))?,
        db_user: prompter.text("db_user", "Database user", Some(postgres::DEFAULT_DB_USER))?,
        db_password: prompter.secret("db_password", "Database user password")?,
    };
    setup.validate()?;
    Ok(setup)
}

/// Installs PostgreSQL 14 and creates the application database and role.
pub async fn setup_postgres(setup: &DatabaseSetup, search_path: Option<OsString>, sink: &dyn LogSink) -> Result<()> {
    sink.step("Installing PostgreSQL...");
    let install = choco::install_postgres(&setup.admin_password, search_path.as_deref());
    runner::run_streaming(&install, sink)
        .await?
        .into_result(install.description())?;

    // The installer adds its bin directory to the machine PATH.
    let search_path = choco::registry_path().or(search_path);
    let psql = postgres::locate_psql(search_path.as_deref()).ok_or_else(|| {
        DeployError::Validation("psql was not found after installing PostgreSQL.".to_string())
    })?;

    // Every statement runs, even after one fails.
    sink.step("Configuring the database...");
    let mut failed = Vec::new();
    for spec in setup.provisioning_commands(psql.as_os_str(), search_path.as_deref()) {
        let outcome = runner::run_streaming(&spec, sink).await?;
        if !outcome.success {
            failed.push(spec.description().to_string());
        }
    }
    if !failed.is_empty() {
        sink.error("Database configuration failed. The database or the user may already exist; check the log above.");
        return Err(DeployError::Validation(format!(
            "Database configuration failed: {}",
            failed.join(", ")
        )));
    }
    sink.success("PostgreSQL was installed and the database configured.");
    Ok(())
}

pub fn print_summary(setup: Option<&DatabaseSetup>) {
    println!();
    println!("{}", "Prerequisites installation finished!".green().bold());
    match setup {
        Some(setup) => {
            println!("Keep these details for the application installer (`rhdeploy install`):");
            println!("  • Database host: localhost");
            println!("  • PostgreSQL port: {} (default)", postgres::DEFAULT_PORT);
            println!("  • Database name: {}", setup.db_name);
            println!("  • Database user: {}", setup.db_user);
            println!("  • User password: {}", setup.db_password);
        }
        None => println!("Tool installation is done. The PostgreSQL step was skipped."),
    }
    println!();
    println!("{}", "You can now run the application installer.".bold());
}

pub async fn run(options: PrereqOptions, prompter: &mut dyn Prompter, sink: &dyn LogSink) -> Result<()> {
    ensure_elevated(prompter)?;
    print_welcome();

    let search_path = ensure_chocolatey(prompter, sink).await?;

    if options.skip_tools {
        sink.info("Tool installation skipped.");
    } else {
        let tools = select_tools(prompter, options.tools.as_deref())?;
        let report = install_tools(&tools, search_path.as_deref(), sink).await;
        if !report.failed.is_empty() {
            sink.warn(&format!("Failed: {}", report.failed.join(", ")));
        }
    }

    let mut configured = None;
    if options.skip_postgres
        || !prompter.confirm("install_postgres", "Install and configure PostgreSQL?", true)?
    {
        sink.info("PostgreSQL step skipped.");
    } else {
        let setup = collect_database_setup(prompter)?;
        setup_postgres(&setup, search_path, sink).await?;
        configured = Some(setup);
    }

    print_summary(configured.as_ref());
    Ok(())
}
