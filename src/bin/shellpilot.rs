//! Command-line front end: run one account operation on one or more hosts.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use shellpilot::checks::{detect_menu, test_connection};
use shellpilot::maintenance::HostMaintenance;
use shellpilot::monitor::HostMonitor;
use shellpilot::parser::{count_by_user, KindTag};
use shellpilot::provisioner::{run_fleet, Operation, Secret, Strategy};
use shellpilot::{
    Connector, Credential, EngineConfig, OpenSshConnector, RemoteTarget, SshConnector,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "shellpilot")]
#[command(author, version, about = "Provision SSH accounts on remote hosts", long_about = None)]
struct Cli {
    /// Host to act on (repeat for a fleet)
    #[arg(long = "host", required = true)]
    hosts: Vec<String>,

    /// SSH port
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Login user on the hosts
    #[arg(long, default_value = "root")]
    user: String,

    /// Read the login password from this environment variable
    #[arg(long, value_name = "VAR", conflicts_with_all = ["key_file", "agent"])]
    password_env: Option<String>,

    /// Private key file
    #[arg(long, value_name = "PATH", conflicts_with = "agent")]
    key_file: Option<PathBuf>,

    /// Read the key passphrase from this environment variable
    #[arg(long, value_name = "VAR", requires = "key_file")]
    passphrase_env: Option<String>,

    /// Authenticate with the local SSH agent
    #[arg(long)]
    agent: bool,

    /// How to reach the hosts
    #[arg(long, value_enum, default_value_t = TransportKind::Libssh2)]
    transport: TransportKind,

    /// Menu, direct commands, or menu with direct fallback
    #[arg(long, value_enum, default_value_t = Strategy::MenuFirst)]
    via: Strategy,

    /// TOML configuration file
    #[arg(long, env = "SHELLPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportKind {
    /// In-process libssh2
    Libssh2,
    /// System `ssh` client
    Openssh,
}

#[derive(Clone, Copy, ValueEnum)]
enum MaintenanceTask {
    /// Empty system logs and vacuum the journal
    CleanLogs,
    /// Drop the page cache and package caches
    ClearCache,
    /// Root filesystem and /var/log usage
    Usage,
    /// Reboot the host
    Restart,
}

#[derive(clap::Args)]
struct SecretArgs {
    /// Account password
    #[arg(long, conflicts_with = "secret_env")]
    secret: Option<String>,

    /// Read the account password from this environment variable
    #[arg(long, value_name = "VAR")]
    secret_env: Option<String>,
}

impl SecretArgs {
    fn resolve(&self) -> Result<Secret> {
        match (&self.secret, &self.secret_env) {
            (Some(secret), _) => Ok(Secret::new(secret.as_str())),
            (None, Some(var)) => Ok(Secret::new(
                std::env::var(var).with_context(|| format!("environment variable {var} is not set"))?,
            )),
            (None, None) => bail!("an account password is required: --secret or --secret-env"),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create an account
    Create {
        /// Account name
        identifier: String,
        #[command(flatten)]
        secret: SecretArgs,
        /// Validity in days
        #[arg(long, default_value_t = 30)]
        days: u32,
        /// Simultaneous sessions allowed (ordinary accounts)
        #[arg(long, default_value_t = 1)]
        limit: u32,
        /// Mark as a token account bound to this client id
        #[arg(long, conflicts_with = "hwid")]
        token: Option<String>,
        /// Mark as a hardware-id account bound to this client id
        #[arg(long)]
        hwid: Option<String>,
    },
    /// Remove an account
    Remove {
        /// Account name
        identifier: String,
    },
    /// Extend an account's validity
    Renew {
        /// Account name
        identifier: String,
        /// Validity in days from today
        #[arg(long)]
        days: u32,
    },
    /// Block an account
    Block {
        /// Account name
        identifier: String,
    },
    /// Unblock an account
    Unblock {
        /// Account name
        identifier: String,
    },
    /// Change an account's password
    Passwd {
        /// Account name
        identifier: String,
        #[command(flatten)]
        secret: SecretArgs,
    },
    /// Rename an account
    Rename {
        /// Current name
        identifier: String,
        /// New name
        new_identifier: String,
    },
    /// List operator-managed accounts
    List,
    /// Show live sessions
    Online {
        /// Only count sessions of this account
        #[arg(long)]
        user: Option<String>,
    },
    /// Remove expired accounts
    Purge,
    /// Test connectivity
    Test,
    /// Detect the menu program
    Detect,
    /// Host metrics
    Metrics {
        /// Include OS, kernel and host name
        #[arg(long)]
        system: bool,
    },
    /// Housekeeping
    Maintain {
        #[arg(value_enum)]
        task: MaintenanceTask,
    },
}

impl Command {
    fn operation(&self) -> Result<Option<Operation>> {
        Ok(Some(match self {
            Command::Create {
                identifier,
                secret,
                days,
                limit,
                token,
                hwid,
            } => {
                let secret = secret.resolve()?;
                let kind = match (token, hwid) {
                    (Some(client), _) => KindTag::token(client.as_str()),
                    (None, Some(client)) => KindTag::hwid(client.as_str()),
                    (None, None) => KindTag::ordinary(*limit, secret.expose()),
                };
                Operation::Create {
                    identifier: identifier.clone(),
                    secret,
                    days: *days,
                    kind,
                }
            }
            Command::Remove { identifier } => Operation::Remove {
                identifier: identifier.clone(),
            },
            Command::Renew { identifier, days } => Operation::Renew {
                identifier: identifier.clone(),
                days: *days,
            },
            Command::Block { identifier } => Operation::Block {
                identifier: identifier.clone(),
            },
            Command::Unblock { identifier } => Operation::Unblock {
                identifier: identifier.clone(),
            },
            Command::Passwd { identifier, secret } => Operation::SetSecret {
                identifier: identifier.clone(),
                secret: secret.resolve()?,
            },
            Command::Rename {
                identifier,
                new_identifier,
            } => Operation::Rename {
                identifier: identifier.clone(),
                new_identifier: new_identifier.clone(),
            },
            Command::List => Operation::ListAccounts,
            Command::Online { .. } => Operation::ListConnections,
            Command::Purge => Operation::PurgeExpired,
            Command::Test | Command::Detect | Command::Metrics { .. } | Command::Maintain { .. } => {
                return Ok(None)
            }
        }))
    }
}

fn credential(cli: &Cli) -> Result<Credential> {
    if let Some(var) = &cli.password_env {
        let password =
            std::env::var(var).with_context(|| format!("environment variable {var} is not set"))?;
        return Ok(Credential::password(password));
    }
    if let Some(path) = &cli.key_file {
        let passphrase = match &cli.passphrase_env {
            Some(var) => Some(Zeroizing::new(
                std::env::var(var).with_context(|| format!("environment variable {var} is not set"))?,
            )),
            None => None,
        };
        return Ok(Credential::KeyFile {
            path: path.clone(),
            passphrase,
        });
    }
    if cli.agent {
        return Ok(Credential::Agent);
    }
    bail!("no credential given: use --password-env, --key-file or --agent")
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct HostReport<T: Serialize> {
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    debug!(config = ?cli.config, "configuration loaded");

    let connector: Arc<dyn Connector> = match cli.transport {
        TransportKind::Libssh2 => Arc::new(SshConnector::new(config.transport.clone())),
        TransportKind::Openssh => Arc::new(OpenSshConnector::new(config.transport.clone())),
    };

    let credential = credential(&cli)?;
    let targets: Vec<RemoteTarget> = cli
        .hosts
        .iter()
        .map(|host| RemoteTarget::new(host.as_str(), cli.user.as_str(), credential.clone()).port(cli.port))
        .collect();
    let timeout = config.transport.command_timeout();

    if let Some(operation) = cli.command.operation()? {
        info!(operation = operation.label(), hosts = targets.len(), via = ?cli.via, "starting");
        let provisioner = cli.via.build(connector, &config)?;
        let fleet = run_fleet(
            provisioner.as_ref(),
            &targets,
            &operation,
            config.fleet.max_concurrency,
        )
        .await;

        if let Command::Online { user: Some(user) } = &cli.command {
            let counts: Vec<_> = fleet
                .results
                .iter()
                .map(|r| {
                    let sessions = match &r.result {
                        Ok(outcome) => match &outcome.payload {
                            Some(shellpilot::Payload::Connections(list)) => {
                                count_by_user(list).get(user).copied()
                            }
                            _ => None,
                        },
                        Err(_) => None,
                    };
                    HostReport {
                        target: r.target.clone(),
                        result: sessions,
                        error: r.result.as_ref().err().map(ToString::to_string),
                    }
                })
                .collect();
            print_json(&counts)?;
        } else {
            print_json(&fleet.reports())?;
        }
        return Ok(if fleet.any_succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let mut all_ok = true;
    match &cli.command {
        Command::Test => {
            let mut reports = Vec::new();
            for target in &targets {
                let report = test_connection(connector.as_ref(), target, timeout).await;
                all_ok &= report.ok;
                reports.push(HostReport {
                    target: target.label(),
                    result: Some(report),
                    error: None,
                });
            }
            print_json(&reports)?;
        }
        Command::Detect => {
            let mut reports = Vec::new();
            for target in &targets {
                let detected =
                    detect_menu(connector.as_ref(), target, &config.menu.install_dir, timeout).await;
                all_ok &= detected.is_ok();
                reports.push(HostReport {
                    target: target.label(),
                    error: detected.as_ref().err().map(ToString::to_string),
                    result: detected.ok(),
                });
            }
            print_json(&reports)?;
        }
        Command::Metrics { system } => {
            let monitor = HostMonitor::new(connector.clone(), timeout);
            let mut reports = Vec::new();
            for target in &targets {
                let metrics = monitor.collect(target).await;
                all_ok &= metrics.is_ok();
                let info = if *system {
                    Some(monitor.system_info(target).await)
                } else {
                    None
                };
                reports.push(HostReport {
                    target: target.label(),
                    error: metrics.as_ref().err().map(ToString::to_string),
                    result: metrics.ok().map(|m| serde_json::json!({ "metrics": m, "system": info })),
                });
            }
            print_json(&reports)?;
        }
        Command::Maintain { task } => {
            let maintenance = HostMaintenance::new(connector.clone(), timeout);
            let mut reports = Vec::new();
            for target in &targets {
                let outcome = match task {
                    MaintenanceTask::Usage => {
                        let (disk, logs) = tokio::join!(
                            maintenance.disk_space(target),
                            maintenance.log_size_mb(target),
                        );
                        reports.push(HostReport {
                            target: target.label(),
                            result: Some(serde_json::json!({ "disk": disk, "log_size_mb": logs })),
                            error: None,
                        });
                        continue;
                    }
                    MaintenanceTask::CleanLogs => maintenance.clean_logs(target).await,
                    MaintenanceTask::ClearCache => maintenance.clear_cache(target).await,
                    MaintenanceTask::Restart => maintenance.restart(target).await,
                };
                all_ok &= outcome.as_ref().is_ok_and(|o| o.is_success());
                reports.push(HostReport {
                    target: target.label(),
                    error: outcome.as_ref().err().map(ToString::to_string),
                    result: outcome.ok().map(|o| serde_json::json!(o)),
                });
            }
            print_json(&reports)?;
        }
        _ => {}
    }

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
