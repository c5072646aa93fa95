mod credentials;
mod logs;
mod serve;

use anyhow::Result;
use console::style;
use std::path::Path;
use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::store::{SharedStore, SqliteStore};
use crate::core::terminal::{self, GuideSection, print_error, print_success};
use crate::platform::{NativePlatform, Platform};

pub(crate) const DB_FILE: &str = "bidpilot.db";

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Run the host the browser extension connects to")
        .command("logs", "Follow real-time logs of a running host")
        .print();

    GuideSection::new("Credentials")
        .command("credentials set", "Save portal credentials (encrypted)")
        .command("credentials show", "List saved credentials without passwords")
        .command("credentials clear", "Remove saved credentials")
        .text("Add --business <id> to target a single quote instead of the default slot.")
        .print();

    GuideSection::new("Control")
        .command("enable", "Allow automations to start")
        .command("disable", "Refuse new automations")
        .print();

    println!(
        "\n {} {} <command> [--host <addr>] [--port <port>]\n",
        style("Usage:").bold(),
        style("bidpilot").green()
    );
}

/// `--host`/`--port` overrides, applied on top of the loaded config.
pub(crate) fn parse_server_flags(
    args: &[String],
    start: usize,
    mut host: String,
    mut port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().unwrap_or(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (host, port)
}

/// Value of `--business <id>`, if given and not blank.
pub(crate) fn parse_business_flag(args: &[String], start: usize) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--business" | "-b" => {
                return args
                    .get(i + 1)
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty());
            }
            _ => i += 1,
        }
    }
    None
}

/// Creates the data directory if needed and opens the shared store in it.
pub(crate) fn open_store(data_dir: &Path) -> Result<SharedStore> {
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)?;
    }
    NativePlatform::restrict_dir_permissions(data_dir);
    let db = SqliteStore::open(&data_dir.join(DB_FILE))?;
    Ok(SharedStore::new(Arc::new(db)))
}

async fn set_enabled(enabled: bool) -> Result<()> {
    let store = open_store(&NativePlatform::data_dir())?;
    store.set_extension_enabled(enabled).await?;
    if enabled {
        print_success("Automation enabled.");
    } else {
        store.clear_authorization().await?;
        print_success("Automation disabled. Running jobs finish; new ones are refused.");
    }
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let data_dir = NativePlatform::data_dir();

    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => {
            let config = AppConfig::load(&data_dir).await?;
            let (host, port) =
                parse_server_flags(&args, 2, config.server.host.clone(), config.server.port);
            serve::run_server(config, &data_dir, host, port).await
        }
        "logs" => {
            let config = AppConfig::load(&data_dir).await?;
            let (host, port) =
                parse_server_flags(&args, 2, config.server.host.clone(), config.server.port);
            logs::follow_logs(&host, port).await
        }
        "credentials" | "creds" => credentials::run_credentials_command(&args, &data_dir).await,
        "enable" => set_enabled(true).await,
        "disable" => set_enabled(false).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
