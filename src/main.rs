//! ScrapeDaemon - account pool and job dispatch scheduler
//!
//! CLI entry point for batch dispatch and pool administration.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use scrapedaemon::cli::{AccountCommand, Cli, Command, ProxyCommand, get_log_path};
use scrapedaemon::config::Config;
use scrapedaemon::domain::{Account, Credential, Job, JobStatus, Proxy, ProxyProtocol};
use scrapedaemon::exec::CommandExecutor;
use scrapedaemon::pool::{AccountPool, ProxyRotator, SelectionStrategy};
use scrapedaemon::queue::{Dispatcher, JobQueue};
use scrapedaemon::rate::RateLimiter;
use scrapedaemon::store::{Repository, SqliteRepository};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_path = get_log_path();
    let log_dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));

    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let repo: Arc<dyn Repository> =
        Arc::new(SqliteRepository::open(&config.storage.db_path).context("Failed to open state database")?);

    match cli.command {
        Command::Run {
            urls_file,
            name,
            strategy,
            max_retries,
            workers,
        } => cmd_run(&config, repo, &urls_file, name, strategy, max_retries, workers).await,
        Command::Accounts { command } => match command {
            AccountCommand::List => cmd_accounts_list(repo),
            AccountCommand::Add {
                owner,
                username,
                secret,
                daily_limit,
            } => cmd_accounts_add(repo, owner, username, secret, daily_limit),
        },
        Command::Proxies { command } => match command {
            ProxyCommand::List => cmd_proxies_list(repo),
            ProxyCommand::Add {
                host,
                port,
                protocol,
                username,
                password,
            } => cmd_proxies_add(repo, host, port, &protocol, username, password),
        },
        Command::Status { job_id } => cmd_status(repo, job_id.as_deref()),
    }
}

/// Submit one job from a URL file and run the dispatcher to completion
async fn cmd_run(
    config: &Config,
    repo: Arc<dyn Repository>,
    urls_file: &PathBuf,
    name: Option<String>,
    strategy: SelectionStrategy,
    max_retries: u32,
    workers: Option<usize>,
) -> Result<()> {
    let urls = read_urls(urls_file)?;
    if urls.is_empty() {
        return Err(eyre::eyre!("No URLs found in {}", urls_file.display()));
    }

    let name = name.unwrap_or_else(|| {
        urls_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string())
    });

    let queue = Arc::new(JobQueue::new(Arc::clone(&repo)).context("Failed to restore job queue")?);
    let pool =
        Arc::new(AccountPool::new(config.pool.clone(), Arc::clone(&repo)).context("Failed to load account pool")?);
    let rotator = Arc::new(
        ProxyRotator::new(config.pool.max_proxy_failures, Arc::clone(&repo)).context("Failed to load proxies")?,
    );

    if pool.accounts().is_empty() {
        return Err(eyre::eyre!("No accounts configured. Add one with: sd accounts add"));
    }

    let job_id = queue.submit_job(&name, urls, strategy, max_retries)?;

    let mut dispatcher_config = config.dispatcher.clone();
    if let Some(workers) = workers {
        dispatcher_config.workers = workers;
    }

    println!("Running job {} ({})", job_id.bold(), name);
    println!("  Strategy: {}", strategy);
    println!("  Workers: {}", dispatcher_config.workers);
    println!("  Accounts: {}", pool.accounts().len());
    println!("  Proxies: {}", rotator.proxies().len());
    println!();

    let executor = Arc::new(CommandExecutor::new(
        config.executor.command.clone(),
        config.executor.args.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        dispatcher_config,
        Arc::clone(&queue),
        Arc::clone(&pool),
        rotator,
        executor,
        Arc::new(RateLimiter::new(config.rate.execution.clone())),
        Arc::new(RateLimiter::new(config.rate.account.clone())),
    ));

    // Ctrl+C triggers a graceful drain
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, draining in-flight units...");
            let _ = shutdown_tx.send(()).await;
        }
    });

    dispatcher.run_to_completion(shutdown_rx).await;

    let job = queue.job_status(&job_id)?;
    print_job(&job);

    let stats = pool.stats();
    println!();
    println!("Pool: {} claims, {} cooldowns, {} blocks", stats.total_claims, stats.cooldowns_entered, stats.blocks_entered);

    if job.status == JobStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

/// List accounts and their health
fn cmd_accounts_list(repo: Arc<dyn Repository>) -> Result<()> {
    let accounts = repo.load_accounts()?;
    if accounts.is_empty() {
        println!("No accounts configured.");
        return Ok(());
    }

    println!(
        "{:<28} {:<12} {:<10} {:>10} {:>9}",
        "ID", "OWNER", "STATUS", "TODAY", "FAILURES"
    );
    for account in &accounts {
        let status = match account.status {
            scrapedaemon::domain::AccountStatus::Active => account.status.to_string().green(),
            scrapedaemon::domain::AccountStatus::Pending => account.status.to_string().yellow(),
            scrapedaemon::domain::AccountStatus::Cooldown => account.status.to_string().yellow(),
            scrapedaemon::domain::AccountStatus::Blocked => account.status.to_string().red(),
        };
        println!(
            "{:<28} {:<12} {:<10} {:>6}/{:<3} {:>9}",
            account.id,
            account.owner,
            status,
            account.requests_today,
            account.daily_request_limit,
            account.consecutive_failures
        );
    }
    Ok(())
}

/// Add an account (starts pending until validated)
fn cmd_accounts_add(
    repo: Arc<dyn Repository>,
    owner: String,
    username: String,
    secret: String,
    daily_limit: u32,
) -> Result<()> {
    let account = Account::new(owner, Credential { username, secret }, daily_limit);
    repo.save_account(&account)?;
    println!("Added account {} ({})", account.id.bold(), account.status);
    Ok(())
}

/// List proxies and their rotation state
fn cmd_proxies_list(repo: Arc<dyn Repository>) -> Result<()> {
    let proxies = repo.load_proxies()?;
    if proxies.is_empty() {
        println!("No proxies configured (requests go direct).");
        return Ok(());
    }

    println!("{:<28} {:<32} {:>9} {:>9} {:>9}", "ID", "URL", "REQUESTS", "FAILURES", "AVG MS");
    for proxy in &proxies {
        let url = if proxy.is_failed {
            proxy.url().red().to_string()
        } else {
            proxy.url()
        };
        println!(
            "{:<28} {:<32} {:>9} {:>9} {:>9}",
            proxy.id,
            url,
            proxy.requests,
            proxy.failure_count,
            proxy.response_time_ms.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

/// Add a proxy to the rotation
fn cmd_proxies_add(
    repo: Arc<dyn Repository>,
    host: String,
    port: u16,
    protocol: &str,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let protocol: ProxyProtocol = protocol.parse().map_err(|e: String| eyre::eyre!(e))?;
    let mut proxy = Proxy::new(host, port, protocol);
    proxy.username = username;
    proxy.password = password;
    repo.save_proxy(&proxy)?;
    println!("Added proxy {} ({})", proxy.id.bold(), proxy.url());
    Ok(())
}

/// Show stored jobs and their progress
fn cmd_status(repo: Arc<dyn Repository>, job_id: Option<&str>) -> Result<()> {
    match job_id {
        Some(id) => {
            let job = repo.load_job(id)?;
            print_job(&job);
        }
        None => {
            let jobs = repo.load_jobs()?;
            if jobs.is_empty() {
                println!("No jobs stored.");
                return Ok(());
            }
            for job in &jobs {
                print_job(job);
                println!();
            }
        }
    }
    Ok(())
}

fn print_job(job: &Job) {
    let status = match job.status {
        JobStatus::Completed => job.status.to_string().green(),
        JobStatus::Failed => job.status.to_string().red(),
        JobStatus::Paused => job.status.to_string().yellow(),
        _ => job.status.to_string().normal(),
    };

    println!("Job {} ({})", job.id.bold(), job.name);
    println!("  Status:     {}", status);
    println!(
        "  Progress:   {}/{} processed ({} ok, {} failed, {} pending)",
        job.progress.processed,
        job.progress.total_urls,
        job.progress.successful.to_string().green(),
        job.progress.failed.to_string().red(),
        job.progress.pending
    );
    if job.waiting_for_capacity {
        println!("  {}", "Waiting for account capacity".yellow());
    }
    if let Some(error) = &job.error {
        println!("  Error:      {}", error.red());
    }
}

fn read_urls(path: &PathBuf) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
