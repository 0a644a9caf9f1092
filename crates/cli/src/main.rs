//! Dormant-users CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse arguments**: organization, credentials, debug flag and step flags.
//! 2. **Wire observability**: JSON `tracing` output plus optional OTLP export.
//! 3. **Load configuration**: the built-in organization policies, or a TOML
//!    file given with `--config`.
//! 4. **Construct infrastructure**: GitHub, Auth0, Notify, Slack and the object
//!    store, injected into a [`LifecycleOrchestrator`] as port trait objects.
//! 5. **Dispatch**: run the selected phases in order and exit non-zero on the
//!    first fatal error.

mod args;
mod telemetry;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use auth0::{Auth0Client, Auth0Credentials};
use clap::Parser;
use dormancy::{
    Clock, DormancyConfig, IdentityProvider, LifecycleOrchestrator, LifecyclePorts, ObjectStore,
    OrgDirectory, OrganizationName, RunReport, SignalAggregator, Sleeper, SystemClock,
};
use github::{GitHubClient, PaginatedApiClient, TokioSleeper, Transport};
use notify::{NotifyClient, SlackAlerts};
use store::{region_from_env, AwsCredentials, LocalDirStore, S3Store};
use tracing::{error, info, warn};

use crate::args::Cli;
use crate::telemetry::Telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = Telemetry::init()?;

    let result = run(cli).await;
    if let Err(err) = &result {
        error!(error = format!("{err:#}"), "Dormant user run failed");
    }

    telemetry.shutdown();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let organization = OrganizationName::new(&cli.organization)
        .context("organization name must not be empty")?;
    let config = load_config(cli.config.as_deref())?;
    let policy = config.policy(&organization)?;

    let selection = cli.selection();
    if selection.is_empty() {
        warn!(%organization, "No step selected, nothing to do");
        return Ok(());
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);

    let transport = Transport::new(&cli.github_token).context("failed to build GitHub client")?;
    let api = PaginatedApiClient::new(
        Arc::new(transport.clone()),
        Arc::clone(&sleeper),
        Arc::clone(&clock),
    )
    .with_buffer(config.rate_limit_buffer());
    let directory: Arc<dyn OrgDirectory> =
        Arc::new(GitHubClient::new(organization.clone(), transport, api));

    let identity: Option<Arc<dyn IdentityProvider>> = if policy.consult_identity_provider {
        let credentials = Auth0Credentials {
            client_id: cli.auth0_client_id.clone(),
            client_secret: cli.auth0_client_secret.clone(),
        };
        let client = Auth0Client::new(&cli.auth0_domain, credentials)
            .context("failed to build Auth0 client")?;
        Some(Arc::new(client))
    } else {
        None
    };

    let store = build_store(&cli)?;

    let signals = SignalAggregator::new(
        organization.clone(),
        &config,
        Arc::clone(&directory),
        identity,
        Arc::clone(&store),
        Arc::clone(&clock),
    )?;
    let notifier = NotifyClient::new(&cli.notify_api_key, policy.reply_to_id.clone())
        .context("failed to build Notify client")?;
    let alerts = SlackAlerts::new(&cli.slack_token, &cli.slack_channel)
        .context("failed to build Slack client")?;

    let ports = LifecyclePorts {
        signals: Arc::new(signals),
        directory,
        notifier: Arc::new(notifier),
        alerts: Arc::new(alerts),
        store,
        clock,
        sleeper,
    };
    let orchestrator = LifecycleOrchestrator::new(organization.clone(), &config, cli.mode(), ports)?;

    info!(
        %organization,
        run_id = %orchestrator.run_id(),
        debug = cli.debug,
        step_one = selection.notify,
        step_two = selection.remind,
        step_three = selection.remove,
        "Starting dormant user run"
    );
    let report = orchestrator
        .run(selection)
        .await
        .with_context(|| format!("dormant user run for {organization} failed"))?;
    log_report(&report);
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DormancyConfig> {
    let Some(path) = path else {
        return Ok(DormancyConfig::builtin());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    DormancyConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))
}

fn build_store(cli: &Cli) -> anyhow::Result<Arc<dyn ObjectStore>> {
    if let Some(dir) = &cli.state_dir {
        info!(dir = %dir.display(), "Using local state directory");
        return Ok(Arc::new(LocalDirStore::new(dir)));
    }
    let credentials = AwsCredentials::from_env().context("AWS credentials are not configured")?;
    let region = region_from_env();
    let store = match &cli.s3_endpoint {
        Some(endpoint) => S3Store::with_endpoint(endpoint, &cli.bucket, &region, credentials),
        None => S3Store::new(&cli.bucket, &region, credentials),
    }
    .context("failed to build S3 client")?;
    Ok(Arc::new(store))
}

fn log_report(report: &RunReport) {
    if let Some(notify) = &report.notify {
        let users: Vec<&str> = notify.notified.iter().map(|r| r.username.as_str()).collect();
        info!(
            phase = "notify",
            dormant = notify.notified.len(),
            emails_sent = notify.emails_sent,
            undelivered = notify.undelivered.len(),
            users = ?users,
            "Notify step complete"
        );
    }
    if let Some(remind) = &report.remind {
        info!(
            phase = "remind",
            in_flight = remind.reminded.len(),
            emails_sent = remind.emails_sent,
            "Remind step complete"
        );
    }
    if let Some(remove) = &report.remove {
        let removed: Vec<&str> = remove.removed.iter().map(|u| u.as_str()).collect();
        info!(
            phase = "remove",
            removed = ?removed,
            rescued = remove.rescued.len(),
            emails_sent = remove.emails_sent,
            "Remove step complete"
        );
    }
}
