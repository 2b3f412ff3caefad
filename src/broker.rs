//! The credential-exchange pipeline.
//!
//! cache → Google ID token → session name → STS → cache → emit.
//! A valid cached credential short-circuits every remote call.

use std::io::Write;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheStore};
use crate::credential::{IdToken, TemporaryCredential};
use crate::error::{clip, ClaimError, Error, Result};
use crate::google::{IdentityTokenSource, AUDIENCE};
use crate::jwt;
use crate::sts::StsExchanger;

/// STS limit on `RoleSessionName` length.
pub const MAX_SESSION_NAME_CHARS: usize = 64;

/// What one broker invocation needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationConfig {
    /// Service account to impersonate; `None` uses the ambient identity.
    pub service_account: Option<String>,
    pub role_arn: String,
    pub duration: Duration,
    /// Suppress emission on standard output.
    pub quiet: bool,
    pub audience: String,
}

impl InvocationConfig {
    pub fn new(role_arn: impl Into<String>) -> Self {
        Self {
            service_account: None,
            role_arn: role_arn.into(),
            duration: Duration::from_secs(3600),
            quiet: false,
            audience: AUDIENCE.to_string(),
        }
    }
}

/// Where a credential handed out by the broker came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Sts,
}

pub struct CredentialBroker<T, S> {
    tokens: T,
    sts: S,
    cache: CacheStore,
}

impl<T, S> CredentialBroker<T, S>
where
    T: IdentityTokenSource,
    S: StsExchanger,
{
    pub fn new(tokens: T, sts: S, cache: CacheStore) -> Self {
        Self { tokens, sts, cache }
    }

    pub fn token_source(&self) -> &T {
        &self.tokens
    }

    pub fn exchanger(&self) -> &S {
        &self.sts
    }

    /// Returns a valid credential for the configured role, from the cache when
    /// possible and from STS otherwise.
    pub async fn credential(
        &self,
        config: &InvocationConfig,
    ) -> Result<(TemporaryCredential, Source)> {
        match self.cache.load(&config.role_arn) {
            Ok(cached) => return Ok((cached, Source::Cache)),
            Err(e) if e.is_miss() => info!("cache miss: {}", e),
            Err(e) => warn!("ignoring cached credential: {}", e),
        }

        let fresh = self.fetch(config).await?;

        match self.cache.store(&config.role_arn, &fresh) {
            Ok(path) => debug!(path = %path.display(), "stored credential"),
            Err(e) => warn!(
                key = %cache_key(&config.role_arn),
                "could not cache credential: {}", e
            ),
        }
        Ok((fresh, Source::Sts))
    }

    /// Resolves a credential and writes it as one line of JSON to `out`,
    /// unless the configuration is quiet.
    pub async fn run<W: Write>(&self, config: &InvocationConfig, out: &mut W) -> Result<Source> {
        let (credential, source) = self.credential(config).await?;
        if !config.quiet {
            emit(&credential, out)?;
        }
        Ok(source)
    }

    async fn fetch(&self, config: &InvocationConfig) -> Result<TemporaryCredential> {
        let service_account = config.service_account.as_deref();
        let id_token = self
            .tokens
            .id_token(service_account, &config.audience)
            .await?;

        let session_name = session_name(&id_token, service_account.is_none())?;
        debug!(session_name = %session_name, "derived role session name");

        let fresh = self
            .sts
            .exchange(&config.role_arn, &session_name, &id_token, config.duration)
            .await?;
        info!(expiration = %fresh.expiration, "obtained temporary credential");
        Ok(fresh)
    }
}

/// Derives the AWS role session name from the token's `email` claim.
///
/// Tokens minted from the ambient identity may lack `email` (workload
/// identities); those fall back to `gcp2aws-<sub>`.
pub fn session_name(id_token: &IdToken, default_mode: bool) -> Result<String> {
    let claims = jwt::decode_claims(id_token.as_str())?;
    let name = match (claims.email, claims.sub) {
        (Some(email), _) => email,
        (None, Some(sub)) if default_mode => format!("{}-{}", AUDIENCE, sub),
        (None, _) if default_mode => {
            return Err(Error::MissingIdentity(
                "the default Google credentials produced an ID token without an `email` claim; \
                 pass -i <SERVICE ACCOUNT EMAIL> to impersonate a service account"
                    .to_string(),
            ))
        }
        (None, _) => return Err(ClaimError::MissingClaim("email").into()),
    };
    Ok(clip(&name, MAX_SESSION_NAME_CHARS).to_string())
}

/// Writes `credential` as a single line of credential_process JSON.
pub fn emit<W: Write>(credential: &TemporaryCredential, out: &mut W) -> Result<()> {
    serde_json::to_writer(&mut *out, credential).map_err(|e| Error::Output(e.into()))?;
    writeln!(out).and_then(|()| out.flush()).map_err(Error::Output)
}
