use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use gpfleet_core::model::OsProduct;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "gpfleet",
    version,
    about = "Policy catalog, distribution and enforcement for managed endpoints"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Config {
        #[arg(long)]
        print: bool,
    },
    /// Manage the master policy catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogCommand,
    },
    /// Build and check distributable payloads
    Payload {
        #[command(subcommand)]
        action: PayloadCommand,
    },
    /// Check which policies apply to this host
    Check {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        supported_on: Option<PathBuf>,
        #[arg(long)]
        os_version: Option<String>,
        #[arg(long)]
        product: Option<OsProduct>,
        #[arg(long)]
        json: bool,
    },
    /// Show the operations enabling or disabling a policy would perform
    Plan {
        policy: String,
        #[command(flatten)]
        choice: PolicyChoice,
    },
    /// Apply a policy to the local key/value store
    Apply {
        policy: String,
        #[command(flatten)]
        choice: PolicyChoice,
        #[arg(long, conflicts_with_all = ["global", "group"])]
        user: Option<String>,
        #[arg(long, conflicts_with = "global")]
        group: Option<String>,
        #[arg(long = "member", requires = "group")]
        members: Vec<String>,
        #[arg(long)]
        global: bool,
    },
    /// Report drift between expected policy state and the local store
    Inspect {
        policies: Vec<String>,
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        disabled: bool,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        redact: bool,
        /// Send the compliance report to the master daemon
        #[arg(long)]
        submit: bool,
    },
    /// Resultant set of policy for a computer in a directory topology
    Rsop {
        #[arg(long)]
        topology: PathBuf,
        computer_dn: String,
        #[arg(long)]
        json: bool,
    },
    /// Pull the current payload from the master and swap it in
    Sync {
        #[arg(long)]
        socket: Option<PathBuf>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List retained working-store backups and sync artifacts
    Backups {
        #[arg(long)]
        json: bool,
    },
    Report {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        redact: bool,
    },
    Daemon {
        #[command(subcommand)]
        action: DaemonCommand,
    },
}

#[derive(clap::Args, Debug)]
struct PolicyChoice {
    /// Plan the disabled state instead of the enabled one
    #[arg(long)]
    disabled: bool,
    /// JSON file with element and list selections
    #[arg(long)]
    selection: Option<PathBuf>,
    /// SID used for user-scoped operations
    #[arg(long)]
    sid: Option<String>,
    #[arg(long)]
    store: Option<PathBuf>,
    /// JSON supported-on definitions used when checking applicability
    #[arg(long)]
    supported_on: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CatalogCommand {
    Import {
        input: PathBuf,
        #[arg(long)]
        note: Option<String>,
    },
    Revision,
    List,
}

#[derive(Subcommand, Debug)]
enum PayloadCommand {
    Build {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Hash {
        path: PathBuf,
    },
    Verify {
        path: PathBuf,
        #[arg(long)]
        sha256: String,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    Start {
        #[arg(long)]
        socket: Option<PathBuf>,
        #[arg(long)]
        pid: Option<PathBuf>,
    },
    Stop {
        #[arg(long)]
        pid: Option<PathBuf>,
    },
    Ping {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    Status {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    SocketPath,
    PidPath,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Init { path, force } => commands::config::init(path, force),
        Commands::Config { print } => {
            if print {
                commands::config::print_effective(config_path)
            } else {
                Ok(())
            }
        }
        Commands::Catalog { action } => {
            let action = match action {
                CatalogCommand::Import { input, note } => commands::catalog::CatalogAction::Import { input, note },
                CatalogCommand::Revision => commands::catalog::CatalogAction::Revision,
                CatalogCommand::List => commands::catalog::CatalogAction::List,
            };
            commands::catalog::execute(config_path, action)
        }
        Commands::Payload { action } => {
            let action = match action {
                PayloadCommand::Build { output } => commands::payload::PayloadAction::Build { output },
                PayloadCommand::Hash { path } => commands::payload::PayloadAction::Hash { path },
                PayloadCommand::Verify { path, sha256 } => commands::payload::PayloadAction::Verify { path, sha256 },
            };
            commands::payload::execute(config_path, action)
        }
        Commands::Check {
            store,
            supported_on,
            os_version,
            product,
            json,
        } => commands::check::execute(commands::check::CheckInputs {
            config_path,
            store,
            supported_on,
            os_version,
            product,
            json,
        }),
        Commands::Plan { policy, choice } => commands::policy::plan(commands::policy::PolicyInputs {
            config_path,
            policy,
            enabled: !choice.disabled,
            selection: choice.selection,
            sid: choice.sid,
            store: choice.store,
            supported_on: choice.supported_on,
        }),
        Commands::Apply {
            policy,
            choice,
            user,
            group,
            members,
            global,
        } => {
            let target = commands::policy::execution_target(user, group, members, global);
            commands::policy::apply(
                commands::policy::PolicyInputs {
                    config_path,
                    policy,
                    enabled: !choice.disabled,
                    selection: choice.selection,
                    sid: choice.sid,
                    store: choice.store,
                    supported_on: choice.supported_on,
                },
                target,
            )
        }
        Commands::Inspect {
            policies,
            store,
            disabled,
            user,
            json,
            redact,
            submit,
        } => commands::policy::inspect(commands::policy::InspectInputs {
            config_path,
            policies,
            store,
            expected_enabled: !disabled,
            user,
            json,
            redact,
            submit,
        }),
        Commands::Rsop {
            topology,
            computer_dn,
            json,
        } => commands::rsop::execute(&topology, &computer_dn, json),
        Commands::Sync { socket, timeout_secs } => commands::sync::execute(config_path, socket, timeout_secs),
        Commands::Backups { json } => commands::sync::list(config_path, json),
        Commands::Report { input, json, redact } => commands::report::execute(&input, json, redact),
        Commands::Daemon { action } => {
            let action = match action {
                DaemonCommand::Start { socket, pid } => commands::daemon::DaemonAction::Start { socket, pid },
                DaemonCommand::Stop { pid } => commands::daemon::DaemonAction::Stop { pid },
                DaemonCommand::Ping { socket } => commands::daemon::DaemonAction::Ping { socket },
                DaemonCommand::Status { socket } => commands::daemon::DaemonAction::Status { socket },
                DaemonCommand::SocketPath => commands::daemon::DaemonAction::SocketPath,
                DaemonCommand::PidPath => commands::daemon::DaemonAction::PidPath,
            };
            commands::daemon::execute(config_path, action)
        }
    }
}
