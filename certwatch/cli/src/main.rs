#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

//! Check TLS certificates of domain names and report failing ones to Slack

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use log::{debug, info};

use certwatch::{
    build_report, CheckResult, Checker, DomainSource, Notifier, WorkerPool,
    DEFAULT_GRACE_IN_HOURS, DEFAULT_TIMEOUT, DEFAULT_WORKERS,
};
use slack::Webhook;

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Opts {
    /// Slack incoming webhook URL
    #[arg(long, env = "SLACK_WEBHOOK")]
    webhook: String,
    /// Domain list, or directory holding domains.txt
    #[arg(short, long, env = "CONFIG")]
    config: PathBuf,
    /// Number of workers
    #[arg(short, long, env = "WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// Timeout of each check in seconds
    #[arg(
        short,
        long,
        env = "CHECK_TIMEOUT",
        default_value_t = DEFAULT_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout: u64,
    /// Grace period in hours
    #[arg(short, long = "grace", env = "GRACE_HOURS", default_value_t = DEFAULT_GRACE_IN_HOURS)]
    grace_in_hours: i64,
    /// Exit with 1 when any certificate is invalid
    #[arg(long, env = "FAIL_ON_INVALID")]
    fail_on_invalid: bool,
    /// Print report instead of sending it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opts: Opts = Opts::parse();
    let failing = check_command(&opts).await?;
    let code = exit_code(failing, opts.fail_on_invalid);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Exit with 1 only when asked to and some certificate is invalid
fn exit_code(failing: usize, fail_on_invalid: bool) -> i32 {
    if failing > 0 && fail_on_invalid {
        1
    } else {
        0
    }
}

/// Check every domain name and report. Resolves to the number of invalid certificates.
async fn check_command(opts: &Opts) -> anyhow::Result<usize> {
    let webhook = Webhook::new(&opts.webhook).context("invalid SLACK_WEBHOOK")?;
    let source = DomainSource::open(&opts.config)?;

    let grace = chrono::Duration::hours(opts.grace_in_hours);
    let checker = Checker::default()
        .with_grace(grace)
        .with_timeout(Duration::from_secs(opts.timeout));
    debug!("{checker:?}");

    let pool = WorkerPool::new(opts.workers);
    let results = pool
        .run(source, move |domain| {
            let checker = checker.clone();
            async move { checker.check_one(domain).await }
        })
        .await?;

    for result in results.iter() {
        println!("{result}");
    }
    let failing = results.iter().filter(|r| !r.valid()).count();
    info!("{failing} of {} certificate(s) invalid", results.len());

    if opts.dry_run {
        print_report(&results, grace)?;
    } else {
        let notifier = Notifier::new(webhook).with_grace(grace);
        tokio::task::spawn_blocking(move || notifier.notify(&results))
            .await?
            .context("failed to send Slack notification")?;
    }
    Ok(failing)
}

fn print_report(results: &[CheckResult], grace: chrono::Duration) -> anyhow::Result<()> {
    if let Some(message) = build_report(results, grace, chrono::Utc::now()) {
        println!("{}", serde_json::to_string_pretty(&message)?);
    }
    Ok(())
}
