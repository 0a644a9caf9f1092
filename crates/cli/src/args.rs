//! Command-line arguments.
//!
//! The positional order is the one the scheduled workflows already pass:
//! organization, credentials, then the debug flag and the three step flags.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use dormancy::{PhaseSelection, RunMode};

/// Notify, remind and remove dormant members of a GitHub organization.
#[derive(Debug, Parser)]
#[command(name = "dormant-users", version)]
pub struct Cli {
    /// GitHub organization to process.
    pub organization: String,

    /// GitHub token with organization admin scope.
    pub github_token: String,

    /// S3 bucket holding the in-flight list and the activity exports.
    pub bucket: String,

    /// Slack bot token used for operator alerts.
    pub slack_token: String,

    /// GOV.UK Notify API key.
    pub notify_api_key: String,

    /// Auth0 client secret.
    pub auth0_client_secret: String,

    /// Auth0 client id.
    pub auth0_client_id: String,

    /// Auth0 tenant domain.
    pub auth0_domain: String,

    /// Read everything, change nothing.
    #[arg(value_parser = parse_flag, action = ArgAction::Set)]
    pub debug: bool,

    /// Run phase 1: notify newly dormant users.
    #[arg(value_parser = parse_flag, action = ArgAction::Set)]
    pub step_one: bool,

    /// Run phase 2: remind notified users.
    #[arg(value_parser = parse_flag, action = ArgAction::Set)]
    pub step_two: bool,

    /// Run phase 3: remove users that are still dormant.
    #[arg(value_parser = parse_flag, action = ArgAction::Set)]
    pub step_three: bool,

    /// Keep state in this directory instead of the S3 bucket.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// S3-compatible endpoint, addressed path-style.
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Slack channel for operator alerts.
    #[arg(long, default_value = notify::DEFAULT_ALERTS_CHANNEL)]
    pub slack_channel: String,

    /// TOML file replacing the built-in organization policies.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        if self.debug {
            RunMode::Debug
        } else {
            RunMode::Live
        }
    }

    pub fn selection(&self) -> PhaseSelection {
        PhaseSelection {
            notify: self.step_one,
            remind: self.step_two,
            remove: self.step_three,
        }
    }
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw {
        "true" | "True" => Ok(true),
        "false" | "False" => Ok(false),
        other => Err(format!("expected true, True, false or False, got '{other}'")),
    }
}
