//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pool::SelectionStrategy;

/// ScrapeDaemon - account pool and job dispatch scheduler
#[derive(Parser)]
#[command(
    name = "sd",
    about = "Distributes scrape jobs across a pool of rate-limited accounts",
    version,
    after_help = "Logs are written to: ~/.local/share/scrapedaemon/logs/scrapedaemon.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run a batch job: dispatch every URL in a file, then print a summary
    Run {
        /// File with one target URL per line
        #[arg(value_name = "URLS_FILE")]
        urls_file: PathBuf,

        /// Job name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,

        /// Account selection strategy (round-robin, random, least-used)
        #[arg(short, long, default_value = "round-robin")]
        strategy: SelectionStrategy,

        /// Retries per URL before it is marked failed
        #[arg(short = 'r', long, default_value = "3")]
        max_retries: u32,

        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Manage the account pool
    Accounts {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Manage the proxy pool
    Proxies {
        #[command(subcommand)]
        command: ProxyCommand,
    },

    /// Show stored jobs and their progress
    Status {
        /// Show only this job
        #[arg(value_name = "JOB_ID")]
        job_id: Option<String>,
    },
}

/// Account management subcommands
#[derive(Subcommand)]
pub enum AccountCommand {
    /// List accounts and their health
    List,

    /// Add an account to the pool
    Add {
        /// Owner label for the account
        owner: String,

        /// Login username
        #[arg(short, long)]
        username: String,

        /// Login secret (password or token)
        #[arg(short, long)]
        secret: String,

        /// Daily request limit
        #[arg(short, long, default_value = "100")]
        daily_limit: u32,
    },
}

/// Proxy management subcommands
#[derive(Subcommand)]
pub enum ProxyCommand {
    /// List proxies and their rotation state
    List,

    /// Add a proxy to the rotation
    Add {
        /// Proxy host
        host: String,

        /// Proxy port
        port: u16,

        /// Protocol (http, https, socks5)
        #[arg(short = 'P', long, default_value = "http")]
        protocol: String,

        /// Optional proxy username
        #[arg(short, long)]
        username: Option<String>,

        /// Optional proxy password
        #[arg(short = 's', long)]
        password: Option<String>,
    },
}

/// Path to the main log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrapedaemon")
        .join("logs")
        .join("scrapedaemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["sd", "run", "urls.txt"]);
        if let Command::Run {
            urls_file,
            name,
            strategy,
            max_retries,
            workers,
        } = cli.command
        {
            assert_eq!(urls_file, PathBuf::from("urls.txt"));
            assert!(name.is_none());
            assert_eq!(strategy, SelectionStrategy::RoundRobin);
            assert_eq!(max_retries, 3);
            assert!(workers.is_none());
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_run_with_strategy() {
        let cli = Cli::parse_from(["sd", "run", "urls.txt", "--strategy", "least-used", "-r", "1"]);
        if let Command::Run {
            strategy, max_retries, ..
        } = cli.command
        {
            assert_eq!(strategy, SelectionStrategy::LeastUsed);
            assert_eq!(max_retries, 1);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_accounts_add() {
        let cli = Cli::parse_from([
            "sd", "accounts", "add", "alice", "--username", "alice1", "--secret", "hunter2",
        ]);
        if let Command::Accounts {
            command: AccountCommand::Add {
                owner,
                username,
                daily_limit,
                ..
            },
        } = cli.command
        {
            assert_eq!(owner, "alice");
            assert_eq!(username, "alice1");
            assert_eq!(daily_limit, 100);
        } else {
            panic!("Expected Accounts Add command");
        }
    }

    #[test]
    fn test_cli_parse_accounts_list() {
        let cli = Cli::parse_from(["sd", "accounts", "list"]);
        assert!(matches!(
            cli.command,
            Command::Accounts {
                command: AccountCommand::List
            }
        ));
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::parse_from(["sd", "status"]);
        if let Command::Status { job_id } = cli.command {
            assert!(job_id.is_none());
        } else {
            panic!("Expected Status command");
        }
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["sd", "-c", "/path/to/config.yml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }
}
