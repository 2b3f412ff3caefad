//! The ambient Google identity, resolved through application default
//! credentials.
//!
//! `google-cloud-auth` owns discovery (`GOOGLE_APPLICATION_CREDENTIALS`, the
//! gcloud ADC file, then the metadata server) and every credential type it
//! supports: service account keys, gcloud user credentials, impersonated
//! service accounts and workload identity federation (`external_account`).

use async_trait::async_trait;
use google_cloud_auth::build_errors::Error as BuildError;
use google_cloud_auth::credentials::{self, idtoken, CacheableResource, Credentials};
use http::{Extensions, HeaderMap};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::TokenError;

/// OAuth scope requested for the access token used to call IAM Credentials.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// The identity the process runs as, before any impersonation.
#[async_trait]
pub trait AmbientCredentials: Send + Sync {
    /// Request headers authorizing a call to a Google API.
    async fn authorization(&self) -> Result<HeaderMap, TokenError>;

    /// An OIDC ID token for `audience` minted by this identity itself.
    async fn id_token(&self, audience: &str) -> Result<String, TokenError>;
}

/// [`AmbientCredentials`] loaded from application default credentials.
///
/// Nothing is read from disk or the network until a token is requested.
#[derive(Debug, Default)]
pub struct ApplicationDefault {
    access: OnceCell<Credentials>,
}

impl ApplicationDefault {
    pub fn new() -> Self {
        Self::default()
    }

    async fn access(&self) -> Result<&Credentials, TokenError> {
        self.access
            .get_or_try_init(|| async {
                let credentials = credentials::Builder::default()
                    .with_scopes([CLOUD_PLATFORM_SCOPE])
                    .build()
                    .map_err(unavailable)?;
                debug!("loaded application default credentials");
                Ok(credentials)
            })
            .await
    }
}

#[async_trait]
impl AmbientCredentials for ApplicationDefault {
    async fn authorization(&self) -> Result<HeaderMap, TokenError> {
        match self.access().await?.headers(Extensions::new()).await? {
            CacheableResource::New { data, .. } => Ok(data),
            CacheableResource::NotModified => Err(TokenError::Remote(
                "credentials returned no authorization headers".to_string(),
            )),
        }
    }

    async fn id_token(&self, audience: &str) -> Result<String, TokenError> {
        let credentials = idtoken::Builder::new(audience).build().map_err(unavailable)?;
        debug!(audience, "requesting ID token from application default credentials");
        Ok(credentials.id_token().await?)
    }
}

fn unavailable(e: BuildError) -> TokenError {
    TokenError::Unavailable(e.to_string())
}
