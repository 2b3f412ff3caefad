//! Google OIDC ID token acquisition.
//!
//! Two modes are supported:
//!
//! - **Impersonation**: the ambient identity calls IAM Credentials
//!   `generateIdToken` for `projects/-/serviceAccounts/<email>` with
//!   `includeEmail=true`. It needs `roles/iam.serviceAccountTokenCreator`
//!   on the target service account.
//! - **Default**: the ambient identity mints its own ID token.

pub mod adc;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credential::IdToken;
use crate::error::{clip, TokenError, MAX_ERROR_BODY_CHARS};

pub use adc::{AmbientCredentials, ApplicationDefault};

/// Audience requested for every ID token. AWS role trust policies pin it.
pub const AUDIENCE: &str = "gcp2aws";

/// Base URL of the IAM Credentials API.
pub const IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

/// A source of Google OIDC ID tokens.
#[async_trait]
pub trait IdentityTokenSource: Send + Sync {
    /// Obtains an ID token for `audience`, impersonating `service_account`
    /// when given and using the ambient identity otherwise.
    async fn id_token(
        &self,
        service_account: Option<&str>,
        audience: &str,
    ) -> Result<IdToken, TokenError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateIdTokenRequest<'a> {
    audience: &'a str,
    include_email: bool,
}

#[derive(Deserialize)]
struct GenerateIdTokenResponse {
    token: String,
}

/// [`IdentityTokenSource`] backed by an ambient Google identity and the IAM
/// Credentials API.
#[derive(Debug)]
pub struct GoogleTokenSource<A = ApplicationDefault> {
    http: reqwest::Client,
    iam_credentials: String,
    ambient: A,
}

impl GoogleTokenSource {
    /// Creates a source using application default credentials.
    pub fn from_env() -> Result<Self, TokenError> {
        Self::with_ambient(ApplicationDefault::new(), IAM_CREDENTIALS_ENDPOINT)
    }
}

impl<A: AmbientCredentials> GoogleTokenSource<A> {
    /// HTTP request timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn with_ambient(ambient: A, iam_credentials: impl Into<String>) -> Result<Self, TokenError> {
        let http = reqwest::Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self {
            http,
            iam_credentials: iam_credentials.into(),
            ambient,
        })
    }

    async fn impersonate(&self, service_account: &str, audience: &str) -> Result<String, TokenError> {
        let authorization = self.ambient.authorization().await?;
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:generateIdToken",
            self.iam_credentials, service_account
        );

        debug!(service_account, audience, "requesting impersonated ID token");
        let response = self
            .http
            .post(url)
            .headers(authorization)
            .json(&GenerateIdTokenRequest {
                audience,
                include_email: true,
            })
            .send()
            .await?;
        let body: GenerateIdTokenResponse = check_status(response, "IAM Credentials generateIdToken")
            .await?
            .json()
            .await?;
        Ok(body.token)
    }
}

#[async_trait]
impl<A: AmbientCredentials> IdentityTokenSource for GoogleTokenSource<A> {
    async fn id_token(
        &self,
        service_account: Option<&str>,
        audience: &str,
    ) -> Result<IdToken, TokenError> {
        let token = match service_account {
            Some(email) => self.impersonate(email, audience).await?,
            None => self.ambient.id_token(audience).await?,
        };
        Ok(IdToken::new(token))
    }
}

/// Turns a non-success response into a [`TokenError`] naming `endpoint`.
async fn check_status(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, TokenError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!(
        "{} returned HTTP {}: {}",
        endpoint,
        status,
        clip(body.trim(), MAX_ERROR_BODY_CHARS)
    );
    Err(match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            TokenError::PermissionDenied(message)
        }
        _ => TokenError::Remote(message),
    })
}
