#![deny(clippy::all, warnings)]

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use portdeck_core::{
    outcome_from_error, CommandBus, CommandStatus, Engine, EngineConfig, ExecutionOutcome,
    InstallStatus, PortView, RuntimeView,
};
use serde_json::json;

mod console;

use console::ConsoleCallback;

#[derive(Parser)]
#[command(name = "portdeck", version, about = "Port inventory manager for constrained handheld devices")]
struct PortdeckCli {
    /// Suppress progress and status chatter.
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Log everything, overriding -v.
    #[arg(long, global = true)]
    trace: bool,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Engine root directory (defaults to PORTDECK_HOME or the platform
    /// data directory).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: CommandCli,
}

#[derive(Subcommand)]
enum CommandCli {
    /// Refresh the catalog of every source, or of one source.
    Update {
        /// Source prefix to refresh; all sources when omitted.
        source: Option<String>,
    },
    /// List known ports, optionally filtered by attribute tokens.
    List {
        /// Filter tokens (status, tags, runtime names); AND semantics.
        filters: Vec<String>,
    },
    /// Show one port's aggregated record.
    Info { name: String },
    /// Install a port by name, `source/name`, URL, or local archive path.
    Install { target: String },
    /// Uninstall a registered port, removing exactly its recorded files.
    Uninstall { name: String },
    /// List known runtime blobs and their local presence.
    RuntimeList,
    /// Ensure one runtime blob is present in the local store.
    RuntimeCheck { name: String },
    /// Serve the FIFO command bus until an `exit` request arrives.
    Bus {
        /// Named input pipe to create and read requests from.
        input: PathBuf,
        /// Done sentinel file touched after every request.
        done: PathBuf,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PortdeckCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let mut config = EngineConfig::from_env().map_err(|err| eyre!("{err:?}"))?;
    if let Some(home) = &cli.home {
        let offline = config.offline;
        let staleness = config.staleness;
        config = EngineConfig::at_root(home.clone());
        config.offline = offline;
        config.staleness = staleness;
    }
    let mut engine = Engine::new(config).map_err(|err| eyre!("{err:?}"))?;
    let callback = ConsoleCallback::new(cli.quiet || cli.json);

    let outcome = dispatch(&mut engine, &callback, &cli.command);
    let code = emit_output(&cli, &outcome)?;
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("portdeck_core={level},portdeck_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn dispatch(
    engine: &mut Engine,
    callback: &ConsoleCallback,
    command: &CommandCli,
) -> ExecutionOutcome {
    match command {
        CommandCli::Update { source } => match engine.update_sources(source.as_deref(), callback) {
            Ok(updated) => ExecutionOutcome::success(
                format!("updated {updated} source(s)"),
                json!({ "updated": updated }),
            ),
            Err(err) => outcome_from_error(&err),
        },
        CommandCli::List { filters } => {
            engine.auto_update_sources(callback);
            let views = engine.list_ports(filters);
            let details = json!({ "ports": views.iter().map(port_json).collect::<Vec<_>>() });
            ExecutionOutcome::success(format!("{} port(s)", views.len()), details)
        }
        CommandCli::Info { name } => {
            engine.auto_update_sources(callback);
            match engine.port_info(name) {
                Ok(view) => {
                    let mut details = port_json(&view);
                    if let Ok(total) = engine.port_download_size(name, true) {
                        details["download_size_with_runtimes"] = json!(total);
                    }
                    ExecutionOutcome::success(view.record.name.clone(), details)
                }
                Err(err) => outcome_from_error(&err),
            }
        }
        CommandCli::Install { target } => match engine.install_port(target, callback) {
            Ok(report) => ExecutionOutcome::success(
                format!("installed {}", report.name),
                json!({
                    "name": report.name,
                    "source": report.source,
                    "files": report.files,
                    "bytes_fetched": report.bytes_fetched,
                    "runtimes": report.runtimes,
                }),
            ),
            Err(err) => outcome_from_error(&err),
        },
        CommandCli::Uninstall { name } => match engine.uninstall_port(name, callback) {
            Ok(report) => ExecutionOutcome::success(
                format!("uninstalled {}", report.name),
                json!({
                    "name": report.name,
                    "removed": report.removed,
                    "missing": report.missing,
                }),
            ),
            Err(err) => outcome_from_error(&err),
        },
        CommandCli::RuntimeList => {
            let views = engine.runtime_list();
            let details = json!({ "runtimes": views.iter().map(runtime_json).collect::<Vec<_>>() });
            ExecutionOutcome::success(format!("{} runtime(s)", views.len()), details)
        }
        CommandCli::RuntimeCheck { name } => match engine.check_runtime(name, callback) {
            Ok(()) => {
                ExecutionOutcome::success(format!("runtime {name} present"), json!({ "name": name }))
            }
            Err(err) => outcome_from_error(&err),
        },
        CommandCli::Bus { input, done } => match CommandBus::new().run(engine, input, done) {
            Ok(()) => ExecutionOutcome::success("command bus stopped", serde_json::Value::Null),
            Err(err) => outcome_from_error(&err),
        },
    }
}

fn port_json(view: &PortView) -> serde_json::Value {
    json!({
        "name": view.record.name,
        "title": view.record.title,
        "description": view.record.description,
        "tags": view.record.tags,
        "runtimes": view.record.runtimes,
        "status": view.status.as_str(),
        "source": view.source,
        "url": view.record.url,
        "size": view.record.size,
        "date_added": view.record.date_added,
        "date_updated": view.record.date_updated,
        "attrs": view.attrs(),
    })
}

fn runtime_json(view: &RuntimeView) -> serde_json::Value {
    json!({
        "name": view.name,
        "present": view.present,
        "size": view.size,
        "source": view.source,
    })
}

fn emit_output(cli: &PortdeckCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.status.exit_code();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(code);
    }

    match &cli.command {
        CommandCli::List { .. } => {
            if let Some(ports) = outcome.details["ports"].as_array() {
                for port in ports {
                    println!(
                        "{:<40} {:<14} {}",
                        port["name"].as_str().unwrap_or(""),
                        port["status"].as_str().unwrap_or(""),
                        port["title"].as_str().unwrap_or(""),
                    );
                }
            }
            if !cli.quiet {
                eprintln!("{}", outcome.message);
            }
        }
        CommandCli::Info { .. } if outcome.status == CommandStatus::Ok => {
            println!("{}", serde_json::to_string_pretty(&outcome.details)?);
        }
        CommandCli::RuntimeList => {
            if let Some(runtimes) = outcome.details["runtimes"].as_array() {
                for runtime in runtimes {
                    let present = if runtime["present"].as_bool().unwrap_or(false) {
                        InstallStatus::Installed.as_str()
                    } else {
                        InstallStatus::NotInstalled.as_str()
                    };
                    println!(
                        "{:<40} {:<14} {}",
                        runtime["name"].as_str().unwrap_or(""),
                        present,
                        runtime["size"].as_u64().unwrap_or(0),
                    );
                }
            }
        }
        _ => {
            if code == 0 {
                println!("{}", outcome.message);
            } else {
                eprintln!("portdeck: {}", outcome.message);
            }
        }
    }
    Ok(code)
}
