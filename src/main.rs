mod config;
mod dedup;
mod dispatch;
mod email;
mod enrich;
mod error;
mod fingerprint;
mod models;
mod outreach;
mod pipeline;
mod retry;
mod salary;
mod sources;
mod state;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{keys, AgentConfig, CredentialProvider, EnvCredentials};
use email::{AlertChannelAdapter, EmailAlertChannel};
use enrich::{resolve_provider, AiTailor, Profile};
use error::{ConfigError, PipelineError};
use outreach::GmailOutreach;
use pipeline::{status_report, Orchestrator, RunReport, StatusReport};
use sources::{HttpBoardSource, SourceAdapter};
use store::{RunLock, SqliteStore};

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Job search pipeline - discover, dedup, tailor, reach out")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Discover and report without writing state or contacting anyone
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the tracking store
    Init,

    /// Discover new jobs, deduplicate and enrich them
    Scrape,

    /// Send cold emails for jobs awaiting outreach
    SendEmails,

    /// Mark jobs as applied
    MarkApplied {
        /// Record ids as shown by status
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Summarize the store per lifecycle state
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, PipelineError> {
    let config = AgentConfig::load(&cli.config)?;
    let store = SqliteStore::open(config.db_path.as_deref())?;

    match cli.command {
        Commands::Init => {
            store.init()?;
            println!("Store initialized at {}", store.path().display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status => {
            store.ensure_initialized()?;
            let status = status_report(&store)?;
            print_status(&status);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Scrape => {
            store.ensure_initialized()?;
            let _lock = acquire_lock(&store, cli.dry_run)?;
            let mut orchestrator = build_orchestrator(&config, store)?.with_dry_run(cli.dry_run);
            let report = orchestrator.scrape()?;
            print_report(&report, cli.dry_run);
            Ok(ExitCode::from(report.outcome().exit_code() as u8))
        }

        Commands::SendEmails => {
            store.ensure_initialized()?;
            let _lock = acquire_lock(&store, cli.dry_run)?;
            let mut orchestrator = build_orchestrator(&config, store)?.with_dry_run(cli.dry_run);
            let report = orchestrator.send_emails()?;
            print_report(&report, cli.dry_run);
            Ok(ExitCode::from(report.outcome().exit_code() as u8))
        }

        Commands::MarkApplied { ids } => {
            store.ensure_initialized()?;
            let _lock = acquire_lock(&store, cli.dry_run)?;
            let mut orchestrator = build_orchestrator(&config, store)?.with_dry_run(cli.dry_run);
            let report = orchestrator.mark_applied(&ids)?;
            print_report(&report, cli.dry_run);
            Ok(ExitCode::from(report.outcome().exit_code() as u8))
        }
    }
}

/// Refuse to start while another run holds the marker file. Dry runs write
/// nothing, so they skip the lock.
fn acquire_lock(store: &SqliteStore, dry_run: bool) -> Result<Option<RunLock>, PipelineError> {
    if dry_run {
        return Ok(None);
    }
    let lock = RunLock::acquire(RunLock::path_for_db(store.path()))?;
    Ok(Some(lock))
}

/// Wire the real collaborators. Secrets come from the environment through
/// the credential provider, never from the config file.
fn build_orchestrator(
    config: &AgentConfig,
    store: SqliteStore,
) -> Result<Orchestrator, PipelineError> {
    let credentials = EnvCredentials;
    let timeout = config.http_timeout();

    let mut sources: Vec<Box<dyn SourceAdapter>> = Vec::new();
    for board in &config.boards {
        let source = HttpBoardSource::new(&board.name, &board.base_url, timeout)
            .map_err(|e| ConfigError::Invalid(format!("board {}: {e}", board.name)))?;
        sources.push(Box::new(source));
    }

    let mut alerts: Vec<Box<dyn AlertChannelAdapter>> = Vec::new();
    if let Some(alert_config) = &config.email_alerts {
        let password = credentials.get(keys::GMAIL_APP_PASSWORD)?;
        alerts.push(Box::new(EmailAlertChannel::new(
            alert_config.clone(),
            password,
        )));
    }

    let provider = resolve_provider(&config.model, &credentials, timeout)?;
    let tailor = AiTailor::new(provider, config.artifact_dir.clone());

    let outreach = GmailOutreach::new(
        credentials.get(keys::GMAIL_API_TOKEN)?,
        credentials.get(keys::GMAIL_SENDER_EMAIL)?,
        config.applicant_name.clone(),
        timeout,
    );

    let profile = Profile::load(&config.profile_path)?;

    Ok(Orchestrator::new(
        config,
        Box::new(store),
        sources,
        alerts,
        Box::new(tailor),
        Box::new(outreach),
        profile,
    ))
}

fn print_report(report: &RunReport, dry_run: bool) {
    let m = &report.metrics;
    println!("\n{} summary:", report.operation);
    println!("  discovered:        {}", m.discovered);
    println!("  duplicates:        {}", m.duplicates);
    println!("  tailored:          {}", m.tailored);
    println!("  tailoring failed:  {}", m.tailoring_failed);
    println!("  outreach sent:     {}", m.outreach_sent);
    println!("  outreach failed:   {}", m.outreach_failed);
    println!("  marked applied:    {}", m.applied);

    if !m.circuit_broken.is_empty() {
        println!("  circuit broken:    {}", m.circuit_broken.join(", "));
    }
    if !report.unmatched_ids.is_empty() {
        let ids: Vec<String> = report.unmatched_ids.iter().map(|i| i.to_string()).collect();
        println!("  unmatched ids:     {}", ids.join(", "));
    }
    if !m.errors.is_empty() {
        println!("\nFailed, will retry on a later run:");
        for error in &m.errors {
            println!("  - {error}");
        }
    }
    if dry_run {
        println!("\n(Dry run - nothing was written or sent)");
    }
}

fn print_status(status: &StatusReport) {
    println!("{} tracked job(s)", status.total);
    println!("{:<20} {:>6}", "STATE", "COUNT");
    println!("{}", "-".repeat(27));
    for (state, count) in &status.counts {
        println!("{:<20} {:>6}", state.to_string(), count);
    }

    if !status.needs_contact.is_empty() {
        println!("\nTailored, awaiting a recruiter contact (handle manually):");
        for record in &status.needs_contact {
            let id = record.id.map_or("-".to_string(), |i| i.to_string());
            println!(
                "  #{:<5} {} at {}",
                id,
                record.posting.title,
                record.posting.company.as_deref().unwrap_or("unknown"),
            );
        }
    }
}
