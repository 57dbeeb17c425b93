use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use colored::Colorize;
use tracing::{debug, warn};

use crate::error::{DeployError, Result};
use crate::helpers::config::{self, Settings};
use crate::helpers::console::{Level, LogSink};
use crate::helpers::envfile::{self, EnvFile};
use crate::helpers::path::ProjectLayout;
use crate::helpers::prompt::Prompter;
use crate::helpers::runner::{self, CommandSpec};
use crate::utils::process::ProcessTable;

pub const DEFAULT_BACKEND_PORT: u16 = 8000;
pub const DEFAULT_FRONTEND_PORT: u16 = 3000;
pub const DEFAULT_LOG_LINES: usize = 50;

const STARTUP_WAIT: Duration = Duration::from_millis(1500);

const API_URL_VAR: &str = "VITE_API_BASE_URL";
const CORS_VAR: &str = "CORS_ALLOWED_ORIGINS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Backend,
    Frontend,
    Worker,
    Beat,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Backend,
        ServiceKind::Frontend,
        ServiceKind::Worker,
        ServiceKind::Beat,
    ];

    /// Name used for PID and log files and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            ServiceKind::Backend => "backend",
            ServiceKind::Frontend => "frontend",
            ServiceKind::Worker => "worker",
            ServiceKind::Beat => "beat",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ServiceKind::Backend => "Backend (Waitress)",
            ServiceKind::Frontend => "Frontend (http.server)",
            ServiceKind::Worker => "Celery Worker",
            ServiceKind::Beat => "Celery Beat",
        }
    }

    fn uses_backend_env(self) -> bool {
        self != ServiceKind::Frontend
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ServiceKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.key() == wanted)
            .ok_or_else(|| {
                DeployError::Validation(format!(
                    "Unknown service '{}'. Expected one of: backend, frontend, worker, beat.",
                    s
                ))
            })
    }
}

/// `.pids/<key>.pid` and `logs/<key>.log` bookkeeping.
#[derive(Debug, Clone)]
pub struct PidStore {
    pid_dir: PathBuf,
    log_dir: PathBuf,
}

impl PidStore {
    pub fn new(layout: &ProjectLayout) -> Self {
        Self {
            pid_dir: layout.pid_dir.clone(),
            log_dir: layout.log_dir.clone(),
        }
    }

    pub fn pid_path(&self, kind: ServiceKind) -> PathBuf {
        self.pid_dir.join(format!("{}.pid", kind.key()))
    }

    pub fn log_path(&self, kind: ServiceKind) -> PathBuf {
        self.log_dir.join(format!("{}.log", kind.key()))
    }

    pub fn write(&self, kind: ServiceKind, pid: u32) -> Result<()> {
        fs::create_dir_all(&self.pid_dir)?;
        fs::write(self.pid_path(kind), pid.to_string())?;
        Ok(())
    }

    /// Missing or unparsable PID files read as `None`.
    pub fn read(&self, kind: ServiceKind) -> Option<u32> {
        fs::read_to_string(self.pid_path(kind))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn delete(&self, kind: ServiceKind) -> Result<()> {
        match fs::remove_file(self.pid_path(kind)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running(u32),
    Stopped { has_log: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub backend: u16,
    pub frontend: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND_PORT,
            frontend: DEFAULT_FRONTEND_PORT,
        }
    }
}

/// Backend port from the frontend's API URL, frontend port from the backend's
/// CORS origins.
pub fn read_ports(layout: &ProjectLayout) -> Result<Ports> {
    let defaults = Ports::default();
    let frontend_env = EnvFile::read(&layout.frontend_env)?;
    let backend_env = EnvFile::read(&layout.backend_env)?;
    Ok(Ports {
        backend: envfile::port_in_url_var(&frontend_env, API_URL_VAR).unwrap_or(defaults.backend),
        frontend: envfile::port_in_url_var(&backend_env, CORS_VAR).unwrap_or(defaults.frontend),
    })
}

pub fn apply_ports(layout: &ProjectLayout, ports: Ports) -> Result<()> {
    if let Some(parent) = layout.frontend_env.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut frontend_env = EnvFile::read(&layout.frontend_env)?;
    frontend_env.set(API_URL_VAR, &format!("http://127.0.0.1:{}/api", ports.backend));
    frontend_env.write(&layout.frontend_env)?;

    let mut backend_env = EnvFile::read(&layout.backend_env)?;
    backend_env.set(
        CORS_VAR,
        &format!(
            "http://localhost:{0},http://127.0.0.1:{0}",
            ports.frontend
        ),
    );
    backend_env.write(&layout.backend_env)?;
    debug!(?ports, "ports applied");
    Ok(())
}

/// Starts, stops and inspects the application's background processes.
pub struct ServiceManager<T: ProcessTable> {
    layout: ProjectLayout,
    pids: PidStore,
    table: T,
    startup_wait: Duration,
}

impl<T: ProcessTable> ServiceManager<T> {
    pub fn new(layout: ProjectLayout, table: T) -> Self {
        Self {
            pids: PidStore::new(&layout),
            layout,
            table,
            startup_wait: STARTUP_WAIT,
        }
    }

    /// How long a fresh process must survive before it counts as started.
    pub fn with_startup_wait(mut self, wait: Duration) -> Self {
        self.startup_wait = wait;
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn pids(&self) -> &PidStore {
        &self.pids
    }

    /// Checks the recorded PID of `kind`, deleting the file when the process
    /// is gone.
    pub fn status_of(&self, kind: ServiceKind) -> Result<ServiceStatus> {
        if let Some(pid) = self.pids.read(kind) {
            if self.table.is_running(pid) {
                return Ok(ServiceStatus::Running(pid));
            }
            debug!(pid, service = kind.key(), "removing stale PID file");
        }
        if self.pids.pid_path(kind).exists() {
            self.pids.delete(kind)?;
        }
        Ok(ServiceStatus::Stopped {
            has_log: self.pids.log_path(kind).exists(),
        })
    }

    pub fn status(&self) -> Result<Vec<(ServiceKind, ServiceStatus)>> {
        ServiceKind::ALL
            .into_iter()
            .map(|kind| Ok((kind, self.status_of(kind)?)))
            .collect()
    }

    fn backend_env(&self) -> Result<Vec<(String, String)>> {
        Ok(EnvFile::read(&self.layout.backend_env)?.vars())
    }

    pub fn command_for(&self, kind: ServiceKind, ports: Ports) -> Result<CommandSpec> {
        let python = &self.layout.python;
        let spec = CommandSpec::new(kind.display_name(), python);
        let spec = match kind {
            ServiceKind::Backend => spec
                .args(["-m", "waitress"])
                .arg(format!("--port={}", ports.backend))
                .arg("core.wsgi:application")
                .current_dir(&self.layout.backend),
            ServiceKind::Frontend => spec
                .args(["-m", "http.server"])
                .arg(ports.frontend.to_string())
                .current_dir(&self.layout.frontend_dist),
            ServiceKind::Worker => spec
                .args(["-m", "celery", "-A", "core", "worker", "-l", "info", "-P", "eventlet"])
                .current_dir(&self.layout.backend),
            ServiceKind::Beat => spec
                .args(["-m", "celery", "-A", "core", "beat", "-l", "info"])
                .args([
                    "--scheduler",
                    "django_celery_beat.schedulers:DatabaseScheduler",
                ])
                .current_dir(&self.layout.backend),
        };
        if kind.uses_backend_env() {
            Ok(spec.envs(self.backend_env()?))
        } else {
            Ok(spec)
        }
    }

    pub fn collectstatic_command(&self) -> Result<CommandSpec> {
        Ok(CommandSpec::new("collectstatic", &self.layout.python)
            .args(["manage.py", "collectstatic", "--noinput"])
            .current_dir(&self.layout.backend)
            .envs(self.backend_env()?))
    }

    pub async fn collectstatic(&self, sink: &dyn LogSink) -> Result<()> {
        let spec = self.collectstatic_command()?;
        runner::run_streaming(&spec, sink)
            .await?
            .into_result(spec.description())?;
        Ok(())
    }

    /// Launches `kind` in the background and records its PID once it has
    /// survived the startup wait. A service that is already running is left
    /// alone and its PID returned.
    pub async fn start(&self, kind: ServiceKind, collectstatic: bool, sink: &dyn LogSink) -> Result<u32> {
        if let ServiceStatus::Running(pid) = self.status_of(kind)? {
            sink.warn(&format!("{} is already running (PID {}).", kind, pid));
            return Ok(pid);
        }
        self.layout.validate()?;
        self.layout.ensure_runtime_dirs()?;

        if kind == ServiceKind::Backend && collectstatic {
            sink.step("Collecting static files before starting the backend...");
            if let Err(e) = self.collectstatic(sink).await {
                sink.error("collectstatic failed; the backend was not started.");
                return Err(e);
            }
        }

        let ports = read_ports(&self.layout)?;
        let spec = self.command_for(kind, ports)?;
        let log = self.pids.log_path(kind);

        sink.step(&format!("Starting {}...", kind));
        sink.log(Level::Cmd, &format!("Running: {}", spec.display()));
        let pid = self
            .table
            .spawn_detached(&spec, &log)
            .map_err(|source| DeployError::Spawn {
                program: spec.resolved_program().display().to_string(),
                source,
            })?;

        tokio::time::sleep(self.startup_wait).await;
        if !self.table.is_running(pid) {
            sink.error(&format!(
                "{} could not be started. See {}",
                kind,
                log.display()
            ));
            return Err(DeployError::ServiceFailed {
                service: kind.display_name().to_string(),
                log,
            });
        }

        self.pids.write(kind, pid)?;
        sink.success(&format!("{} started (PID {}).", kind, pid));
        Ok(pid)
    }

    /// Kills the recorded process tree. Returns whether anything was running.
    pub fn stop(&self, kind: ServiceKind, sink: &dyn LogSink) -> Result<bool> {
        let Some(pid) = self.pids.read(kind) else {
            self.pids.delete(kind)?;
            sink.info(&format!("{} is not running.", kind));
            return Ok(false);
        };
        if let Err(e) = self.table.kill_tree(pid) {
            warn!(pid, service = kind.key(), "kill failed: {}", e);
        }
        self.pids.delete(kind)?;
        sink.success(&format!("{} stopped.", kind));
        Ok(true)
    }

    /// Last `count` lines of the service log, `None` before the first start.
    pub fn tail_log(&self, kind: ServiceKind, count: usize) -> Result<Option<Vec<String>>> {
        let bytes = match fs::read(self.pids.log_path(kind)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(count);
        Ok(Some(lines.into_iter().skip(skip).collect()))
    }

    /// Starts every service in order; failures are reported and the rest are
    /// still attempted.
    pub async fn start_all(&self, collectstatic: bool, sink: &dyn LogSink) -> Result<()> {
        let mut failed = Vec::new();
        for kind in ServiceKind::ALL {
            if let Err(e) = self.start(kind, collectstatic, sink).await {
                sink.error(&e.to_string());
                failed.push(kind.display_name());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(DeployError::Validation(format!(
                "Some services did not start: {}",
                failed.join(", ")
            )))
        }
    }

    pub fn stop_all(&self, sink: &dyn LogSink) -> Result<()> {
        for kind in ServiceKind::ALL {
            self.stop(kind, sink)?;
        }
        Ok(())
    }
}

/// Install root from `--root` (which is then remembered) or from the tool
/// settings.
pub fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => {
            config::remember_install_root(&root)?;
            Ok(config::normalize_path(&root))
        }
        None => Settings::load().install_root.ok_or_else(|| {
            DeployError::Config(
                "No install root known yet. Pass --root <dir> or run `rhdeploy install` first."
                    .to_string(),
            )
        }),
    }
}

/// Whether to run collectstatic before starting `kind`; asks when the
/// command line did not say.
pub fn want_collectstatic(
    kind: Option<ServiceKind>,
    choice: Option<bool>,
    prompter: &mut dyn Prompter,
) -> Result<bool> {
    if kind.is_some_and(|k| k != ServiceKind::Backend) {
        return Ok(false);
    }
    match choice {
        Some(choice) => Ok(choice),
        None => prompter.confirm(
            "collectstatic",
            "Run 'collectstatic' before starting the backend? (recommended so CSS/JS are up to date)",
            true,
        ),
    }
}

pub fn print_status(root: &Path, statuses: &[(ServiceKind, ServiceStatus)]) {
    println!("{} {}", "Install root:".bold(), root.display());
    for (kind, status) in statuses {
        match status {
            ServiceStatus::Running(pid) => println!(
                "  {} {:<24} {}",
                "●".green(),
                kind.display_name(),
                format!("running (PID {})", pid).green()
            ),
            ServiceStatus::Stopped { has_log } => println!(
                "  {} {:<24} {}{}",
                "○".dimmed(),
                kind.display_name(),
                "stopped".dimmed(),
                if *has_log { "  (log available)" } else { "" }
            ),
        }
    }
}

/// Shows the current ports, or applies new ones when either is given. The
/// project must be fully installed first; nothing is written otherwise.
pub fn ports_command(
    layout: &ProjectLayout,
    backend: Option<&str>,
    frontend: Option<&str>,
    sink: &dyn LogSink,
) -> Result<Ports> {
    layout.validate()?;
    let current = read_ports(layout)?;
    if backend.is_none() && frontend.is_none() {
        println!("{} {}", "Backend port: ".bold(), current.backend);
        println!("{} {}", "Frontend port:".bold(), current.frontend);
        return Ok(current);
    }

    let ports = Ports {
        backend: match backend {
            Some(value) => envfile::parse_port("Backend port", value)?,
            None => current.backend,
        },
        frontend: match frontend {
            Some(value) => envfile::parse_port("Frontend port", value)?,
            None => current.frontend,
        },
    };
    apply_ports(layout, ports)?;
    sink.success(&format!(
        "Configuration files updated (backend {}, frontend {}).",
        ports.backend, ports.frontend
    ));
    sink.info("Restart running services for the new ports to take effect.");
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::console::MemoryLog;
    use crate::helpers::prompt::answers;
    use serde_json::json;
    use std::collections::HashSet;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTable {
        alive: Mutex<HashSet<u32>>,
        spawned: Mutex<Vec<String>>,
        killed: Mutex<Vec<u32>>,
        next_pid: Mutex<u32>,
        dies_on_start: bool,
    }

    impl FakeTable {
        fn dying() -> Self {
            Self {
                dies_on_start: true,
                ..Self::default()
            }
        }
    }

    impl ProcessTable for FakeTable {
        fn spawn_detached(&self, spec: &CommandSpec, log: &Path) -> io::Result<u32> {
            fs::write(log, "listening\n")?;
            let mut next = self.next_pid.lock().unwrap();
            *next += 100;
            let pid = *next;
            if !self.dies_on_start {
                self.alive.lock().unwrap().insert(pid);
            }
            self.spawned.lock().unwrap().push(spec.display());
            Ok(pid)
        }

        fn is_running(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }

        fn kill_tree(&self, pid: u32) -> io::Result<()> {
            self.killed.lock().unwrap().push(pid);
            self.alive.lock().unwrap().remove(&pid);
            Ok(())
        }
    }

    fn installed_layout() -> (tempfile::TempDir, ProjectLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        fs::create_dir_all(&layout.frontend_dist).unwrap();
        fs::create_dir_all(layout.python.parent().unwrap()).unwrap();
        fs::write(&layout.python, "").unwrap();
        fs::write(
            &layout.backend_env,
            "# generated\nDJANGO_DEBUG=False\nDATABASE_URL='postgres://u:p@localhost:5432/db'\nCORS_ALLOWED_ORIGINS=http://hr.local:3000,https://hr.local\n",
        )
        .unwrap();
        (dir, layout)
    }

    fn manager<T: ProcessTable>(layout: &ProjectLayout, table: T) -> ServiceManager<T> {
        ServiceManager::new(layout.clone(), table).with_startup_wait(Duration::ZERO)
    }

    #[test]
    fn service_keys_parse() {
        assert_eq!("Worker".parse::<ServiceKind>().unwrap(), ServiceKind::Worker);
        assert_eq!(" beat ".parse::<ServiceKind>().unwrap(), ServiceKind::Beat);
        assert!("nginx".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn pid_store_round_trip() {
        let (_dir, layout) = installed_layout();
        let pids = PidStore::new(&layout);
        assert_eq!(pids.read(ServiceKind::Beat), None);

        pids.write(ServiceKind::Beat, 4242).unwrap();
        assert_eq!(fs::read_to_string(pids.pid_path(ServiceKind::Beat)).unwrap(), "4242");
        assert_eq!(pids.read(ServiceKind::Beat), Some(4242));

        pids.delete(ServiceKind::Beat).unwrap();
        pids.delete(ServiceKind::Beat).unwrap();
        assert_eq!(pids.read(ServiceKind::Beat), None);
    }

    #[tokio::test]
    async fn start_records_pid_and_stop_removes_it() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::default());
        let log = MemoryLog::new();

        let pid = manager.start(ServiceKind::Worker, false, &log).await.unwrap();
        assert_eq!(manager.pids().read(ServiceKind::Worker), Some(pid));
        assert_eq!(manager.status_of(ServiceKind::Worker).unwrap(), ServiceStatus::Running(pid));
        assert!(log.contains(Level::Success, "Celery Worker started"));

        assert!(manager.stop(ServiceKind::Worker, &log).unwrap());
        assert_eq!(*manager.table.killed.lock().unwrap(), vec![pid]);
        assert!(!manager.pids().pid_path(ServiceKind::Worker).exists());
        assert_eq!(
            manager.status_of(ServiceKind::Worker).unwrap(),
            ServiceStatus::Stopped { has_log: true }
        );
    }

    #[tokio::test]
    async fn already_running_service_is_not_spawned_twice() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::default());
        let log = MemoryLog::new();

        let first = manager.start(ServiceKind::Frontend, false, &log).await.unwrap();
        let second = manager.start(ServiceKind::Frontend, false, &log).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.table.spawned.lock().unwrap().len(), 1);
        assert!(log.contains(Level::Warn, "already running"));
    }

    #[tokio::test]
    async fn process_that_dies_is_reported_without_pid_file() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::dying());
        let log = MemoryLog::new();

        let err = manager.start(ServiceKind::Beat, false, &log).await.unwrap_err();
        assert!(matches!(err, DeployError::ServiceFailed { ref log, .. } if log.ends_with("beat.log")));
        assert!(!manager.pids().pid_path(ServiceKind::Beat).exists());
    }

    #[tokio::test]
    async fn start_refuses_incomplete_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let manager = manager(&layout, FakeTable::default());
        let err = manager
            .start(ServiceKind::Backend, false, &MemoryLog::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidLayout(_)));
        assert!(manager.table.spawned.lock().unwrap().is_empty());
    }

    #[test]
    fn stale_pid_file_is_cleaned_up() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::default());
        manager.pids().write(ServiceKind::Backend, 999).unwrap();
        fs::create_dir_all(&layout.log_dir).unwrap();
        fs::write(manager.pids().log_path(ServiceKind::Backend), "old run").unwrap();

        let statuses = manager.status().unwrap();
        assert_eq!(statuses[0], (ServiceKind::Backend, ServiceStatus::Stopped { has_log: true }));
        assert_eq!(statuses[1], (ServiceKind::Frontend, ServiceStatus::Stopped { has_log: false }));
        assert!(!manager.pids().pid_path(ServiceKind::Backend).exists());
    }

    #[test]
    fn stop_without_pid_is_a_no_op() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::default());
        let log = MemoryLog::new();
        assert!(!manager.stop(ServiceKind::Frontend, &log).unwrap());
        assert!(log.contains(Level::Info, "is not running"));
        assert!(manager.table.killed.lock().unwrap().is_empty());
    }

    #[test]
    fn commands_use_ports_and_backend_env() {
        let (_dir, layout) = installed_layout();
        fs::write(&layout.frontend_env, "VITE_API_BASE_URL=http://127.0.0.1:8100/api\n").unwrap();
        let manager = manager(&layout, FakeTable::default());
        let ports = read_ports(&layout).unwrap();
        assert_eq!(ports, Ports { backend: 8100, frontend: 3000 });

        let backend = manager.command_for(ServiceKind::Backend, ports).unwrap();
        assert!(backend.display().ends_with("-m waitress --port=8100 core.wsgi:application"));
        assert_eq!(backend.working_dir(), Some(layout.backend.as_path()));
        assert_eq!(
            backend.get_env("DATABASE_URL").and_then(|v| v.to_str()),
            Some("postgres://u:p@localhost:5432/db")
        );

        let frontend = manager.command_for(ServiceKind::Frontend, ports).unwrap();
        assert!(frontend.display().ends_with("-m http.server 3000"));
        assert_eq!(frontend.working_dir(), Some(layout.frontend_dist.as_path()));
        assert_eq!(frontend.get_env("DATABASE_URL"), None);

        let beat = manager.command_for(ServiceKind::Beat, ports).unwrap();
        assert!(beat.display().contains("--scheduler django_celery_beat.schedulers:DatabaseScheduler"));
    }

    #[test]
    fn missing_env_files_give_default_ports() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert_eq!(read_ports(&layout).unwrap(), Ports::default());
    }

    #[test]
    fn applying_ports_rewrites_only_the_port_lines() {
        let (_dir, layout) = installed_layout();
        let log = MemoryLog::new();
        let ports = ports_command(&layout, Some("8200"), Some("3300"), &log).unwrap();
        assert_eq!(ports, Ports { backend: 8200, frontend: 3300 });

        assert_eq!(
            fs::read_to_string(&layout.frontend_env).unwrap(),
            "VITE_API_BASE_URL=http://127.0.0.1:8200/api\n"
        );
        let backend = fs::read_to_string(&layout.backend_env).unwrap();
        assert!(backend.starts_with("# generated\nDJANGO_DEBUG=False\n"));
        assert!(backend.contains("CORS_ALLOWED_ORIGINS=http://localhost:3300,http://127.0.0.1:3300\n"));
        assert_eq!(read_ports(&layout).unwrap(), ports);
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let (_dir, layout) = installed_layout();
        let before = fs::read_to_string(&layout.backend_env).unwrap();
        assert!(ports_command(&layout, Some("eighty"), None, &MemoryLog::new()).is_err());
        assert_eq!(fs::read_to_string(&layout.backend_env).unwrap(), before);
    }

    #[test]
    fn ports_are_not_written_into_an_incomplete_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let err = ports_command(&layout, Some("8200"), None, &MemoryLog::new()).unwrap_err();
        assert!(matches!(err, DeployError::InvalidLayout(_)));
        assert!(!layout.frontend.exists());
        assert!(!layout.backend.exists());
    }

    #[tokio::test]
    async fn failed_collectstatic_keeps_the_backend_down() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::default());
        let log = MemoryLog::new();

        assert!(manager.start(ServiceKind::Backend, true, &log).await.is_err());
        assert!(manager.table.spawned.lock().unwrap().is_empty());
        assert!(!manager.pids().pid_path(ServiceKind::Backend).exists());
        assert!(log.contains(Level::Error, "the backend was not started"));
    }

    #[tokio::test]
    async fn start_all_attempts_every_service_and_summarises_failures() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::dying());
        let log = MemoryLog::new();

        let err = manager.start_all(false, &log).await.unwrap_err();
        assert_eq!(manager.table.spawned.lock().unwrap().len(), 4);
        let message = err.to_string();
        assert!(message.starts_with("Some services did not start"));
        for kind in ServiceKind::ALL {
            assert!(message.contains(kind.display_name()));
        }
    }

    #[tokio::test]
    async fn stop_all_stops_every_running_service() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::default());
        let log = MemoryLog::new();

        manager.start_all(false, &log).await.unwrap();
        assert_eq!(manager.table.alive.lock().unwrap().len(), 4);

        manager.stop_all(&log).unwrap();
        assert_eq!(manager.table.killed.lock().unwrap().len(), 4);
        assert!(manager.table.alive.lock().unwrap().is_empty());
        for kind in ServiceKind::ALL {
            assert!(!manager.pids().pid_path(kind).exists());
        }
    }

    #[test]
    fn tail_log_returns_last_lines() {
        let (_dir, layout) = installed_layout();
        let manager = manager(&layout, FakeTable::default());
        assert_eq!(manager.tail_log(ServiceKind::Backend, 5).unwrap(), None);

        fs::create_dir_all(&layout.log_dir).unwrap();
        let text: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        fs::write(manager.pids().log_path(ServiceKind::Backend), text).unwrap();
        assert_eq!(
            manager.tail_log(ServiceKind::Backend, 3).unwrap(),
            Some(vec!["line 8".to_string(), "line 9".to_string(), "line 10".to_string()])
        );
    }

    #[test]
    fn collectstatic_is_only_asked_for_the_backend() {
        let mut prompter = answers(&[("collectstatic", json!(false))]);
        assert!(!want_collectstatic(Some(ServiceKind::Worker), None, &mut prompter).unwrap());
        assert!(!want_collectstatic(Some(ServiceKind::Backend), None, &mut prompter).unwrap());
        assert!(want_collectstatic(None, Some(true), &mut prompter).unwrap());

        let mut defaults = answers(&[]);
        assert!(want_collectstatic(Some(ServiceKind::Backend), None, &mut defaults).unwrap());
    }

    #[test]
    fn collectstatic_defaults_to_yes_without_a_terminal() {
        let mut prompter = crate::helpers::prompt::terminal_or_defaults(false);
        assert!(want_collectstatic(Some(ServiceKind::Backend), None, prompter.as_mut()).unwrap());
        assert!(want_collectstatic(None, None, prompter.as_mut()).unwrap());
        assert!(!want_collectstatic(None, Some(false), prompter.as_mut()).unwrap());
    }
}
