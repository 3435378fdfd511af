// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anvil_common::model::{Role, UserId};
use anvil_common::tracing::init_tracing;
use anvil_common::SafeDisplay;
use anvil_service::bootstrap::Services;
use anvil_service::config::{make_config_loader, ControllerConfig};
use anvil_service::service::user::UserError;
use anvil_service::AnvilService;
use clap::{Parser, Subcommand};
use prometheus::Registry;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "anvil", version, about = "Factory automation control center")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller
    Server {
        /// Data directory holding the record stores and anvil.toml
        #[arg(long)]
        dir: PathBuf,
        /// Verbose logging
        #[arg(long)]
        debug: bool,
        /// Accept any credentials with operator rights (development only)
        #[arg(long)]
        no_auth: bool,
    },
    /// Manage user accounts
    User {
        /// Data directory holding the record stores and anvil.toml
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[command(subcommand)]
        command: UserCommand,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create an account and print its initial password
    Add {
        name: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },
    /// Deactivate an account
    Remove {
        name: String,
        /// Required; removal cannot be undone by the account itself
        #[arg(long)]
        force: bool,
    },
    /// Show an account
    Show {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Change an account's role
    Role { name: String, role: Role },
}

fn load_config(dir: &PathBuf, debug: bool, no_auth: bool) -> Result<ControllerConfig, String> {
    let mut config = make_config_loader(dir)
        .load()
        .map_err(|err| format!("failed to load configuration: {err}"))?;
    config.data_dir = dir.join(&config.data_dir);
    if debug {
        config.tracing.default_directive = "debug".to_string();
    }
    if no_auth {
        config.auth.enabled = false;
    }
    Ok(config)
}

async fn run_server(dir: PathBuf, debug: bool, no_auth: bool) -> ExitCode {
    let config = match load_config(&dir, debug, no_auth) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.tracing);
    info!("Configuration:\n{}", config.to_safe_string());

    let service = match AnvilService::new(config).await {
        Ok(service) => service,
        Err(err) => {
            error!("Startup failed: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut join_set = JoinSet::new();
    if let Err(err) = service.run(&mut join_set).await {
        error!("Startup failed: {err:#}");
        return ExitCode::FAILURE;
    }

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("Server task failed: {err:#}");
                return ExitCode::FAILURE;
            }
            Err(err) => {
                error!("Server task panicked: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

async fn open_services(dir: &PathBuf) -> Result<Services, ExitCode> {
    let config = load_config(dir, false, false).map_err(|err| {
        eprintln!("{err}");
        ExitCode::FAILURE
    })?;
    Services::new(&config, &Registry::new()).await.map_err(|err| {
        eprintln!("{err}");
        ExitCode::FAILURE
    })
}

async fn run_user_command(dir: PathBuf, command: UserCommand) -> ExitCode {
    let services = match open_services(&dir).await {
        Ok(services) => services,
        Err(code) => return code,
    };
    let users = &services.user_service;

    match command {
        UserCommand::Add { name, role } => {
            match users.add(&UserId::new(name.clone()), role).await {
                Ok((user, password)) => {
                    println!("Created user {} with role {}", user.id, user.role);
                    println!("Initial password: {password}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("{}", err.to_safe_string());
                    ExitCode::FAILURE
                }
            }
        }
        UserCommand::Remove { name, force } => {
            if !force {
                eprintln!("Refusing to remove user \"{name}\" without --force");
                return ExitCode::from(2);
            }
            match users.remove(&UserId::new(name)).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("{}", err.to_safe_string());
                    ExitCode::FAILURE
                }
            }
        }
        UserCommand::Show { name, json } => match users.get(&UserId::new(name.clone())) {
            Some(user) => {
                if json {
                    match serde_json::to_string_pretty(&*user) {
                        Ok(text) => println!("{text}"),
                        Err(err) => {
                            eprintln!("{err}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("name:     {}", user.id);
                    println!("role:     {}", user.role);
                    println!("created:  {}", user.created_at.to_rfc3339());
                    println!("inactive: {}", user.inactive);
                }
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("{}", UserError::UnknownUser(UserId::new(name)).to_safe_string());
                ExitCode::FAILURE
            }
        },
        UserCommand::Role { name, role } => {
            match users.set_role(&UserId::new(name), role).await {
                Ok(user) => {
                    println!("User {} now has role {}", user.id, user.role);
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("{}", err.to_safe_string());
                    ExitCode::FAILURE
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Server {
            dir,
            debug,
            no_auth,
        } => run_server(dir, debug, no_auth).await,
        Command::User { dir, command } => run_user_command(dir, command).await,
    }
}
