//! Command-line driver.

use std::env;
use std::future::Future;
use std::io;
use std::time::Duration;

use clap::Parser;

use crate::broker::{CredentialBroker, InvocationConfig};
use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::google::{GoogleTokenSource, AUDIENCE};
use crate::sts::AwsStsExchanger;

/// Historical (misspelled) variable naming the service account to impersonate.
pub const SERVICE_ACCOUNT_ENV: &str = "GCP2AWS_GCP_SERVICE_ACCOUT_EMAIL";
/// Correctly spelled fallback for [`SERVICE_ACCOUNT_ENV`].
pub const SERVICE_ACCOUNT_ENV_FALLBACK: &str = "GCP2AWS_GCP_SERVICE_ACCOUNT_EMAIL";
pub const ROLE_ARN_ENV: &str = "GCP2AWS_AWS_ROLE_ARN";

/// Exchange a Google OIDC ID token for temporary AWS credentials.
///
/// Prints the credentials in the AWS CLI credential_process format.
#[derive(Debug, Parser)]
#[command(name = "gcp2aws", version)]
pub struct Args {
    /// GCP service account email to impersonate. If not specified, use application default credentials.
    #[arg(short = 'i', long = "service-account", value_name = "EMAIL", env = SERVICE_ACCOUNT_ENV)]
    pub service_account: Option<String>,

    /// Role ARN to assume
    #[arg(short = 'r', long = "role-arn", value_name = "ROLE ARN", env = ROLE_ARN_ENV)]
    pub role_arn: Option<String>,

    /// Duration for a short-lived credential (e.g. 1h, 30m, 1h30m)
    #[arg(short = 'd', long, default_value = "1h", value_parser = parse_duration)]
    pub duration: Duration,

    /// Suppress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Print debug diagnostics to standard error
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Args {
    /// Validates the arguments, applying the environment fallbacks.
    pub fn into_config(self) -> Result<InvocationConfig> {
        let fallback = env::var(SERVICE_ACCOUNT_ENV_FALLBACK).ok();
        self.into_config_with(fallback)
    }

    fn into_config_with(self, service_account_fallback: Option<String>) -> Result<InvocationConfig> {
        let role_arn = non_empty(self.role_arn).ok_or_else(|| {
            Error::Config(format!(
                "Role ARN is required: pass -r <ROLE ARN> or set {}",
                ROLE_ARN_ENV
            ))
        })?;

        Ok(InvocationConfig {
            service_account: non_empty(self.service_account)
                .or_else(|| non_empty(service_account_fallback)),
            role_arn,
            duration: self.duration,
            quiet: self.quiet,
            audience: AUDIENCE.to_string(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parses a Go-style duration such as `1h`, `30m`, `1h30m`, `1.5h` or `500ms`.
///
/// The result must be positive.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut rest = s;
    let mut seconds = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = match number {
            "" | "." => return Err(format!("invalid duration {:?}", input)),
            n => n
                .parse()
                .map_err(|_| format!("invalid duration {:?}", input))?,
        };

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {:?}", input)),
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, input)),
        };

        seconds += value * scale;
        rest = tail;
    }

    if seconds <= 0.0 {
        return Err(format!("duration must be positive, got {:?}", input));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration {:?}: {}", input, e))
}

/// Runs one broker invocation against Google, AWS STS and the user cache,
/// writing the credential to standard output.
pub async fn run(args: Args) -> Result<()> {
    let config = args.into_config()?;
    let tokens = GoogleTokenSource::from_env()?;
    let broker = CredentialBroker::new(tokens, AwsStsExchanger::new(), CacheStore::user_default());
    broker.run(&config, &mut io::stdout()).await?;
    Ok(())
}

/// Drives `run` to completion unless `interrupt` resolves first.
///
/// An `interrupt` that fails, e.g. because no signal handler could be
/// installed, is ignored and `run` continues.
pub async fn until_interrupted<R, I>(run: R, interrupt: I) -> Result<()>
where
    R: Future<Output = Result<()>>,
    I: Future<Output = io::Result<()>>,
{
    tokio::select! {
        result = run => result,
        Ok(()) = interrupt => Err(Error::Interrupted),
    }
}
