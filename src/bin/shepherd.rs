//! Shepherd - project orchestration CLI
//!
//! Command-line client for managing hosted projects on this machine.
//!
//! ## Usage
//!
//! ```sh
//! shepherd list
//! shepherd show <project-id>
//! shepherd create -f <project.json>
//! shepherd update -f <project.json>
//! shepherd delete <project-id> --force
//! shepherd logs <project-id>
//! shepherd metrics <project-id>
//! shepherd builds <project-id>
//! shepherd buildlog <project-id> <build-number>
//! shepherd restart <project-id>
//! shepherd stats
//! ```
//!
//! The config root defaults to `/etc/shepherd`; override with `-c <dir>`.

use shepherd::{CacheFolder, ConfigFolder, LifecycleOrchestrator, Project, ProjectId};
use std::path::PathBuf;
use std::process::ExitCode;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    List,
    Show { id: String },
    Create { file: PathBuf },
    Update { file: PathBuf },
    Delete { id: String, force: bool },
    Logs { id: String },
    Metrics { id: String },
    Builds { id: String },
    BuildLog { id: String, build_number: u32 },
    Restart { id: String },
    Stats,
    Version,
    Help,
}

struct Cli {
    config_root: PathBuf,
    cache_root: PathBuf,
    command: Command,
}

fn parse_args() -> Result<Cli, String> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_root = PathBuf::from(ConfigFolder::DEFAULT_ROOT);
    let mut cache_root = PathBuf::from(CacheFolder::DEFAULT_ROOT);
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config-root" || args[i] == "-c" {
            if i + 1 >= args.len() {
                return Err("--config-root requires a directory".to_string());
            }
            config_root = PathBuf::from(&args[i + 1]);
            args.drain(i..i + 2);
        } else if args[i] == "--cache-root" {
            if i + 1 >= args.len() {
                return Err("--cache-root requires a directory".to_string());
            }
            cache_root = PathBuf::from(&args[i + 1]);
            args.drain(i..i + 2);
        } else {
            i += 1;
        }
    }

    if args.is_empty() {
        return Ok(Cli {
            config_root,
            cache_root,
            command: Command::Help,
        });
    }

    let file_arg = |args: &[String]| -> Result<PathBuf, String> {
        let mut i = 1;
        while i < args.len() {
            if args[i] == "--file" || args[i] == "-f" {
                return match args.get(i + 1) {
                    Some(path) => Ok(PathBuf::from(path)),
                    None => Err("--file requires a path".to_string()),
                };
            }
            i += 1;
        }
        Err(format!("{} requires -f <project.json>", args[0]))
    };
    let id_arg = |args: &[String]| -> Result<String, String> {
        args.get(1)
            .cloned()
            .ok_or_else(|| format!("{} requires <project-id>", args[0]))
    };

    let command = match args[0].as_str() {
        "list" => Command::List,
        "show" => Command::Show { id: id_arg(&args)? },
        "create" => Command::Create {
            file: file_arg(&args)?,
        },
        "update" => Command::Update {
            file: file_arg(&args)?,
        },
        "delete" => Command::Delete {
            id: id_arg(&args)?,
            force: args.iter().any(|a| a == "--force" || a == "-y"),
        },
        "logs" => Command::Logs { id: id_arg(&args)? },
        "metrics" => Command::Metrics { id: id_arg(&args)? },
        "builds" => Command::Builds { id: id_arg(&args)? },
        "buildlog" => {
            let id = id_arg(&args)?;
            let number = args
                .get(2)
                .ok_or("buildlog requires <project-id> <build-number>")?;
            let build_number: u32 = number
                .parse()
                .map_err(|_| format!("invalid build number: {number}"))?;
            Command::BuildLog { id, build_number }
        }
        "restart" => Command::Restart { id: id_arg(&args)? },
        "stats" => Command::Stats,
        "version" | "--version" | "-v" => Command::Version,
        "help" | "--help" | "-h" => Command::Help,
        unknown => return Err(format!("unknown command: {unknown}")),
    };
    Ok(Cli {
        config_root,
        cache_root,
        command,
    })
}

// =============================================================================
// Command Implementations
// =============================================================================

fn parse_id(id: &str) -> shepherd::Result<ProjectId> {
    ProjectId::new(id)
}

fn load_project(file: &PathBuf) -> shepherd::Result<Project> {
    let text = std::fs::read_to_string(file)?;
    Project::from_json(&text)
}

async fn run(cli: Cli) -> shepherd::Result<()> {
    let folder = ConfigFolder::open(cli.config_root)?;
    let cache = CacheFolder::open(cli.cache_root);
    let orchestrator = LifecycleOrchestrator::open(folder, cache)?;

    match cli.command {
        Command::List => {
            println!("ID\tURL");
            for id in orchestrator.list_project_ids()? {
                println!("{id}\t{}", orchestrator.main_domain_deploy_url(&id));
            }
        }
        Command::Show { id } => {
            let project = orchestrator.get_project(&parse_id(&id)?)?;
            println!("{}", project.to_json()?);
        }
        Command::Create { file } => {
            let project = load_project(&file)?;
            orchestrator.create_project(&project).await?;
            eprintln!(
                "Created {}; the first build is running, the project will appear at {}",
                project.id,
                orchestrator.main_domain_deploy_url(&project.id)
            );
        }
        Command::Update { file } => {
            let project = load_project(&file)?;
            orchestrator.update_project(&project).await?;
            eprintln!("Updated {}", project.id);
        }
        Command::Delete { id, force } => {
            let id = parse_id(&id)?;
            if !force {
                return Err(shepherd::Error::Validation(format!(
                    "deleting {id} destroys its data; re-run with --force"
                )));
            }
            orchestrator.delete_project(&id).await?;
            eprintln!("Deleted {id}");
        }
        Command::Logs { id } => {
            print!("{}", orchestrator.get_run_logs(&parse_id(&id)?).await?);
        }
        Command::Metrics { id } => {
            let usage = orchestrator.get_run_metrics(&parse_id(&id)?).await?;
            println!("memory: {} Mb", usage.memory_mb);
            println!("cpu: {} cores", usage.cpu);
        }
        Command::Builds { id } => {
            println!("#\tOUTCOME\tSTARTED\tDURATION");
            for build in orchestrator.get_recent_builds(&parse_id(&id)?).await? {
                println!(
                    "{}\t{:?}\t{}\t{}s",
                    build.number,
                    build.outcome,
                    build.started.to_rfc3339(),
                    build.duration_ms / 1000
                );
            }
        }
        Command::BuildLog { id, build_number } => {
            print!(
                "{}",
                orchestrator
                    .get_build_log(&parse_id(&id)?, build_number)
                    .await?
            );
        }
        Command::Restart { id } => {
            let id = parse_id(&id)?;
            orchestrator.restart_project(&id).await?;
            eprintln!("Restarted {id}");
        }
        Command::Stats => {
            let stats = orchestrator.stats()?;
            println!("projects: {}", stats.project_count);
            println!(
                "runtime memory: {}",
                stats.project_memory_stats.project_runtime_quota
            );
            println!("total memory: {}", stats.project_memory_stats.total_quota);
            println!(
                "concurrent CI builders: {}",
                stats.concurrent_jenkins_builders
            );
        }
        Command::Version => {
            println!("shepherd version {}", env!("CARGO_PKG_VERSION"));
        }
        Command::Help => cmd_help(),
    }
    Ok(())
}

fn cmd_help() {
    println!(
        r#"shepherd - project orchestration for a multi-tenant app host

USAGE:
    shepherd [options] <command> [args]

COMMANDS:
    list                         List registered projects
    show <id>                    Print a project record (JSON)
    create -f <project.json>     Register a project and start its first build
    update -f <project.json>     Apply changed project settings
    delete <id> --force          Delete a project and all its data
    logs <id>                    Print the workload's run logs
    metrics <id>                 Print current memory/CPU usage
    builds <id>                  List recent CI builds
    buildlog <id> <number>       Print one build's console log
    restart <id>                 Restart the workload from the last build
    stats                        Print host-level statistics
    version                      Show version info
    help                         Show this help

OPTIONS:
    --config-root, -c <dir>  Config folder (default: /etc/shepherd)
    --cache-root <dir>       Build cache folder (default: /var/cache/shepherd)

EXAMPLES:
    shepherd create -f myapp.json
    shepherd logs myapp
    shepherd delete myapp --force
"#
    );
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match parse_args() {
        Ok(cli) => match run(cli).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("error: {e}");
            cmd_help();
            ExitCode::FAILURE
        }
    }
}
