use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::muzzik::sync::SyncOptions;

#[derive(Parser, Debug)]
#[command(name = "muzzik")]
#[command(about = "Harvest video links from a chat channel into capped playlist volumes")]
#[command(version)]
pub struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest the channel, queue new videos and publish what the quota allows
    Sync {
        /// Harvest and queue only; make no playlist calls
        #[arg(long)]
        dry_run: bool,

        /// Read messages from a JSON export instead of the chat API
        #[arg(long, value_name = "PATH")]
        messages_file: Option<PathBuf>,
    },
    /// Show paths, config and the saved run state
    Status,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verdict = if report.ok { "ok" } else { "issues" };
    println!("{}: {verdict}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Sync {
            dry_run,
            messages_file,
        } => commands::sync::run(&SyncOptions {
            dry_run,
            messages_file,
        })?,
        Command::Status => commands::status::run()?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_flags_and_global_json() {
        let cli = Cli::try_parse_from([
            "muzzik",
            "sync",
            "--dry-run",
            "--messages-file",
            "msgs.json",
            "--json",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Command::Sync {
                dry_run,
                messages_file,
            } => {
                assert!(dry_run);
                assert_eq!(messages_file, Some(PathBuf::from("msgs.json")));
            }
            Command::Status => panic!("expected sync"),
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["muzzik", "publish"]).is_err());
    }
}
