use std::io::IsTerminal;
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use rhdeploy::commands::{install, prereqs, services};
use rhdeploy::helpers::console::{ConsoleLog, LogSink};
use rhdeploy::helpers::path::ProjectLayout;
use rhdeploy::helpers::prompt::{self, AnswerFile, Prompter, TerminalPrompter};
use rhdeploy::utils::process::SystemProcessTable;

mod cli;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Terminal prompts, or an answers file that falls back to the terminal when
/// one is attached.
fn make_prompter(answers: Option<&Path>) -> anyhow::Result<Box<dyn Prompter>> {
    match answers {
        None => Ok(Box::new(TerminalPrompter)),
        Some(path) => {
            let file = AnswerFile::load(path)
                .with_context(|| format!("Failed to read answers from {}", path.display()))?;
            if std::io::stdin().is_terminal() {
                Ok(Box::new(file.with_fallback(Box::new(TerminalPrompter))))
            } else {
                Ok(Box::new(file))
            }
        }
    }
}

async fn run_services(args: cli::Services, log: &ConsoleLog) -> anyhow::Result<()> {
    let root = services::resolve_root(args.root)?;
    let layout = ProjectLayout::new(&root);
    let manager = services::ServiceManager::new(layout, SystemProcessTable::new());

    match args.action {
        cli::ServiceAction::Status(_) => {
            let statuses = manager.status()?;
            services::print_status(&root, &statuses);
        }
        cli::ServiceAction::Start(start) => {
            let choice = cli::collectstatic_choice(start.collectstatic, start.skip_collectstatic);
            let mut prompter = prompt::terminal_or_defaults(std::io::stdin().is_terminal());
            let collectstatic = services::want_collectstatic(Some(start.service), choice, prompter.as_mut())?;
            manager.start(start.service, collectstatic, log).await?;
        }
        cli::ServiceAction::Stop(stop) => {
            manager.stop(stop.service, log)?;
        }
        cli::ServiceAction::Log(args) => match manager.tail_log(args.service, args.lines)? {
            Some(lines) => {
                println!(
                    "{}",
                    format!("--- {} ---", manager.pids().log_path(args.service).display()).dimmed()
                );
                for line in lines {
                    println!("{}", line);
                }
            }
            None => log.info("The log file does not exist yet. Start the service first."),
        },
        cli::ServiceAction::Ports(ports) => {
            services::ports_command(
                manager.layout(),
                ports.backend.as_deref(),
                ports.frontend.as_deref(),
                log,
            )?;
        }
        cli::ServiceAction::Collectstatic(_) => {
            manager.layout().validate()?;
            manager.collectstatic(log).await?;
        }
        cli::ServiceAction::StartAll(start) => {
            let choice = cli::collectstatic_choice(start.collectstatic, start.skip_collectstatic);
            let mut prompter = prompt::terminal_or_defaults(std::io::stdin().is_terminal());
            let collectstatic = services::want_collectstatic(None, choice, prompter.as_mut())?;
            manager.start_all(collectstatic, log).await?;
        }
        cli::ServiceAction::StopAll(_) => {
            manager.stop_all(log)?;
        }
    }
    Ok(())
}

async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let log = ConsoleLog::new();
    match cli.command {
        cli::Commands::Prereqs(args) => {
            let mut prompter = make_prompter(args.answers.as_deref())?;
            let options = prereqs::PrereqOptions {
                skip_tools: args.skip_tools,
                skip_postgres: args.skip_postgres,
                tools: args.tools.as_deref().map(cli::split_tools),
            };
            prereqs::run(options, prompter.as_mut(), &log).await?;
        }
        cli::Commands::Install(args) => {
            let mut prompter = make_prompter(args.answers.as_deref())?;
            let options = install::InstallOptions {
                config: args.config,
                target: args.target,
            };
            install::run(options, prompter.as_mut(), &log).await?;
        }
        cli::Commands::Services(args) => run_services(args, &log).await?,
        cli::Commands::Version(_) => {
            println!("rhdeploy v{}", env!("CARGO_PKG_VERSION"));
            println!("Build date: {}", env!("BUILD_DATE"));
            println!("Git commit: {}", env!("GIT_HASH"));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli: cli::Cli = argh::from_env();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "✘".red(), format!("{:#}", e).red());
        std::process::exit(1);
    }
}
