//! AWS STS `AssumeRoleWithWebIdentity`.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_sts::types::Credentials;
use aws_types::SdkConfig;
use chrono::DateTime;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::credential::{IdToken, TemporaryCredential};
use crate::error::StsError;

/// Exchanges an OIDC ID token for temporary AWS credentials.
#[async_trait]
pub trait StsExchanger: Send + Sync {
    /// Assumes `role_arn` as `session_name`, requesting `duration` truncated
    /// to whole seconds. No retry is performed.
    async fn exchange(
        &self,
        role_arn: &str,
        session_name: &str,
        id_token: &IdToken,
        duration: Duration,
    ) -> Result<TemporaryCredential, StsError>;
}

/// [`StsExchanger`] backed by the AWS SDK.
///
/// The SDK configuration follows the standard resolution chain and is loaded
/// on first use, so a cache hit never touches it.
#[derive(Debug, Default)]
pub struct AwsStsExchanger {
    client: OnceCell<aws_sdk_sts::Client>,
}

impl AwsStsExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an exchanger from an already-loaded SDK configuration, for
    /// example one with a custom `endpoint_url`.
    pub fn from_conf(config: &SdkConfig) -> Self {
        Self {
            client: OnceCell::new_with(Some(aws_sdk_sts::Client::new(config))),
        }
    }

    async fn client(&self) -> &aws_sdk_sts::Client {
        self.client
            .get_or_init(|| async {
                let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
                debug!(region = ?config.region(), "loaded AWS configuration");
                aws_sdk_sts::Client::new(&config)
            })
            .await
    }
}

#[async_trait]
impl StsExchanger for AwsStsExchanger {
    async fn exchange(
        &self,
        role_arn: &str,
        session_name: &str,
        id_token: &IdToken,
        duration: Duration,
    ) -> Result<TemporaryCredential, StsError> {
        let duration_seconds = duration_seconds(duration);
        debug!(role_arn, session_name, duration_seconds, "calling AssumeRoleWithWebIdentity");

        let output = self
            .client()
            .await
            .assume_role_with_web_identity()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .web_identity_token(id_token.as_str())
            .duration_seconds(duration_seconds)
            .send()
            .await
            .map_err(|err| {
                classify(
                    err.code(),
                    err.message(),
                    DisplayErrorContext(&err).to_string(),
                )
            })?;

        let credentials = output
            .credentials()
            .ok_or_else(|| StsError::Remote("STS returned no credentials".to_string()))?;
        into_temporary_credential(credentials)
    }
}

/// Whole seconds of `duration`, saturating at the largest value STS accepts
/// on the wire. Range checks are left to STS.
pub fn duration_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

/// Maps an STS error code onto the broker's error taxonomy.
pub fn classify(code: Option<&str>, message: Option<&str>, context: String) -> StsError {
    match code {
        Some("AccessDenied") => StsError::AccessDenied(context),
        Some(
            "InvalidIdentityToken" | "ExpiredTokenException" | "IDPRejectedClaim",
        ) => StsError::InvalidIdToken(context),
        Some("ValidationError")
            if message.is_some_and(|m| m.to_ascii_lowercase().contains("durationseconds")) =>
        {
            StsError::DurationOutOfRange(context)
        }
        _ => StsError::Remote(context),
    }
}

fn into_temporary_credential(credentials: &Credentials) -> Result<TemporaryCredential, StsError> {
    let expiration = credentials.expiration();
    let expiration = DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
        .ok_or_else(|| StsError::Remote(format!("invalid expiration from STS: {:?}", expiration)))?;

    Ok(TemporaryCredential::new(
        credentials.access_key_id(),
        credentials.secret_access_key(),
        credentials.session_token(),
        expiration,
    ))
}
