use anyhow::Result;
use console::style;
use std::path::Path;

use super::{open_store, parse_business_flag};
use crate::core::automation::types::Credentials;
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};
use crate::core::vault::{CredentialScope, CredentialVault, SecretCipher};

async fn open_vault(data_dir: &Path) -> Result<CredentialVault> {
    let config = AppConfig::load(data_dir).await?;
    let store = open_store(data_dir)?;
    Ok(CredentialVault::new(
        store.raw(),
        SecretCipher::for_this_machine()?,
        config.security.credentials_max_age_days,
    ))
}

pub async fn run_credentials_command(args: &[String], data_dir: &Path) -> Result<()> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or_default();
    let scope = CredentialScope::for_business(parse_business_flag(args, 3).as_deref());
    let now = SystemClock.now_ms();

    match sub_cmd {
        "set" => {
            let username = inquire::Text::new("Portal username (RUT):")
                .with_help_message("e.g. 12.345.678-9")
                .prompt()?;
            let password = inquire::Password::new("Portal password:")
                .without_confirmation()
                .with_help_message("Stored encrypted on this machine only")
                .prompt()?;
            let credentials = Credentials::new(username.trim(), password);
            if !credentials.is_complete() {
                print_error("Both username and password are required.");
                return Ok(());
            }
            let vault = open_vault(data_dir).await?;
            vault.save(&scope, &credentials, now).await?;
            print_success(&format!("Saved {} credentials.", scope.label()));
        }
        "clear" => {
            let vault = open_vault(data_dir).await?;
            vault.remove(&scope).await?;
            print_success(&format!("Removed {} credentials.", scope.label()));
        }
        "show" => {
            let vault = open_vault(data_dir).await?;
            let saved = vault.describe(now).await?;
            if saved.is_empty() {
                print_info("No saved credentials. Run `bidpilot credentials set`.");
                return Ok(());
            }
            let mut section = GuideSection::new("Saved credentials");
            for entry in saved {
                let saved_at = entry["savedAt"]
                    .as_i64()
                    .and_then(chrono::DateTime::from_timestamp_millis)
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                section = section.status(
                    entry["scope"].as_str().unwrap_or_default(),
                    &format!(
                        "{} {}",
                        entry["username"].as_str().unwrap_or_default(),
                        style(format!("(saved {})", saved_at)).dim()
                    ),
                );
            }
            section.print();
            println!();
        }
        _ => {
            GuideSection::new("bidpilot credentials")
                .command("set", "Prompt for and save portal credentials")
                .command("show", "List saved credentials")
                .command("clear", "Remove saved credentials")
                .blank()
                .text("Options: --business <id>  target one quote's credential slot")
                .print();
            println!();
        }
    }
    Ok(())
}
