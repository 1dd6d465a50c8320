use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use request_shield::config::{load_config, ConfigError};
use request_shield::observability::security_log::read_entries;
use request_shield::security::auth::hash_password;

#[derive(Parser)]
#[command(name = "shield-cli")]
#[command(about = "Operator CLI for the request shield", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print an Argon2 hash for `auth.password_hash` (reads stdin when no password is given)
    HashPassword {
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Load and validate a config file
    CheckConfig { path: PathBuf },
    /// Summarize a security log by event name
    Events {
        path: PathBuf,
        /// Only show entries for this event
        #[arg(short, long)]
        event: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::HashPassword { password } => {
            let password = match password {
                Some(p) => p,
                None => {
                    let mut line = String::new();
                    std::io::stdin().lock().read_line(&mut line)?;
                    line.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            if password.is_empty() {
                eprintln!("Error: empty password");
                std::process::exit(1);
            }
            let hash = hash_password(&password).map_err(|e| format!("hashing failed: {}", e))?;
            println!("{}", hash);
        }
        Commands::CheckConfig { path } => match load_config(&path) {
            Ok(config) => {
                let summary = json!({
                    "bind_address": config.listener.bind_address,
                    "rate_limit_routes": config.rate_limit.routes.len(),
                    "auth_protected_paths": config.auth.protected_paths.len(),
                    "csrf_protected_paths": config.csrf.protected_paths.len(),
                    "extra_signatures": config.firewall.extra_signatures.len(),
                });
                println!("Config OK");
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Err(ConfigError::Validation(errors)) => {
                eprintln!("Config invalid:");
                for error in errors {
                    eprintln!("  - {}", error);
                }
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Events { path, event } => {
            let entries = read_entries(&path)?;
            match event {
                Some(name) => {
                    for entry in entries.iter().filter(|e| e.event == name) {
                        println!("{}", serde_json::to_string(entry)?);
                    }
                }
                None => {
                    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                    for entry in &entries {
                        *counts.entry(entry.event.as_str()).or_default() += 1;
                    }
                    println!("{}", serde_json::to_string_pretty(&counts)?);
                }
            }
        }
    }

    Ok(())
}
