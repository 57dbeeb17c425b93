use std::path::PathBuf;

use argh::FromArgs;
use rhdeploy::commands::services::{DEFAULT_LOG_LINES, ServiceKind};

#[derive(FromArgs, Debug)]
/// Deploy and run the HR web application on a single Windows machine
pub struct Cli {
    /// show debug diagnostics (RUST_LOG overrides)
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    #[argh(subcommand)]
    pub command: Commands,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum Commands {
    Prereqs(Prereqs),
    Install(Install),
    Services(Services),
    Version(Version),
}

/// Install Chocolatey, the base tools and PostgreSQL (needs administrator rights)
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "prereqs")]
pub struct Prereqs {
    /// do not install git, python, node.js or vscode
    #[argh(switch)]
    pub skip_tools: bool,

    /// do not install or configure PostgreSQL
    #[argh(switch)]
    pub skip_postgres: bool,

    /// comma separated Chocolatey packages to install instead of asking
    #[argh(option)]
    pub tools: Option<String>,

    /// path to a JSON answers file for unattended runs
    #[argh(option)]
    pub answers: Option<PathBuf>,
}

/// Clone, configure and build the application
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "install")]
pub struct Install {
    /// path to config.ini (default: ./config.ini)
    #[argh(option, default = "PathBuf::from(\"config.ini\")")]
    pub config: PathBuf,

    /// installation directory (asked for when omitted)
    #[argh(option)]
    pub target: Option<PathBuf>,

    /// path to a JSON answers file for unattended runs
    #[argh(option)]
    pub answers: Option<PathBuf>,
}

/// Start, stop and inspect the application services
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "services")]
pub struct Services {
    /// install root holding backend/ and frontend/ (remembered for next time)
    #[argh(option)]
    pub root: Option<PathBuf>,

    #[argh(subcommand)]
    pub action: ServiceAction,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum ServiceAction {
    Status(Status),
    Start(Start),
    Stop(Stop),
    Log(Log),
    Ports(Ports),
    Collectstatic(Collectstatic),
    StartAll(StartAll),
    StopAll(StopAll),
}

/// Show which services are running
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "status")]
pub struct Status {}

/// Start a service: backend, frontend, worker or beat
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "start")]
pub struct Start {
    /// service to start
    #[argh(positional)]
    pub service: ServiceKind,

    /// run collectstatic before starting the backend without asking
    #[argh(switch)]
    pub collectstatic: bool,

    /// start the backend without running collectstatic
    #[argh(switch)]
    pub skip_collectstatic: bool,
}

/// Stop a service: backend, frontend, worker or beat
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "stop")]
pub struct Stop {
    /// service to stop
    #[argh(positional)]
    pub service: ServiceKind,
}

/// Print the end of a service log
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "log")]
pub struct Log {
    /// service whose log to show
    #[argh(positional)]
    pub service: ServiceKind,

    /// number of lines (default: 50)
    #[argh(option, short = 'n', default = "DEFAULT_LOG_LINES")]
    pub lines: usize,
}

/// Show the ports, or set them with --backend/--frontend
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "ports")]
pub struct Ports {
    /// backend (Waitress) port
    #[argh(option)]
    pub backend: Option<String>,

    /// frontend (http.server) port
    #[argh(option)]
    pub frontend: Option<String>,
}

/// Run manage.py collectstatic
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "collectstatic")]
pub struct Collectstatic {}

/// Start backend, frontend, worker and beat
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "start-all")]
pub struct StartAll {
    /// run collectstatic before starting the backend without asking
    #[argh(switch)]
    pub collectstatic: bool,

    /// start the backend without running collectstatic
    #[argh(switch)]
    pub skip_collectstatic: bool,
}

/// Stop every running service
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "stop-all")]
pub struct StopAll {}

/// Show version information
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "version")]
pub struct Version {}

/// `--collectstatic` / `--skip-collectstatic`, or `None` to ask.
pub fn collectstatic_choice(run: bool, skip: bool) -> Option<bool> {
    match (run, skip) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

/// Splits `--tools git,python`.
pub fn split_tools(tools: &str) -> Vec<String> {
    tools
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::from_args(&["rhdeploy"], args).unwrap()
    }

    #[test]
    fn services_root_and_action() {
        let cli = parse(&["-v", "services", "--root", "C:/hr", "start", "backend", "--skip-collectstatic"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Services(services) => {
                assert_eq!(services.root, Some(PathBuf::from("C:/hr")));
                match services.action {
                    ServiceAction::Start(start) => {
                        assert_eq!(start.service, ServiceKind::Backend);
                        assert_eq!(collectstatic_choice(start.collectstatic, start.skip_collectstatic), Some(false));
                    }
                    other => panic!("unexpected action: {:?}", other),
                }
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn unknown_service_is_rejected() {
        assert!(Cli::from_args(&["rhdeploy"], &["services", "stop", "nginx"]).is_err());
    }

    #[test]
    fn install_defaults_to_local_config() {
        match parse(&["install"]).command {
            Commands::Install(install) => {
                assert_eq!(install.config, PathBuf::from("config.ini"));
                assert_eq!(install.target, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn log_lines_default() {
        match parse(&["services", "log", "worker"]).command {
            Commands::Services(Services { action: ServiceAction::Log(log), .. }) => {
                assert_eq!(log.lines, DEFAULT_LOG_LINES);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn tools_are_split_on_commas() {
        assert_eq!(split_tools("git, python,,vscode"), vec!["git", "python", "vscode"]);
    }
}
