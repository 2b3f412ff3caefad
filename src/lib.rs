//! Exchange a Google-issued OIDC ID token for temporary AWS credentials.
//!
//! The `gcp2aws` binary implements the AWS CLI `credential_process`
//! contract:
//!
//! ```ini
//! [profile gcp]
//! credential_process = gcp2aws -i deployer@my-project.iam.gserviceaccount.com -r arn:aws:iam::123456789012:role/gcp-deployer
//! ```
//!
//! The library exposes the pipeline behind it: [`CacheStore`] memoizes
//! credentials per role, an [`IdentityTokenSource`] mints the Google ID token,
//! [`jwt`] reads the caller's email from it, an [`StsExchanger`] calls
//! `AssumeRoleWithWebIdentity`, and [`CredentialBroker`] orchestrates them.

pub mod broker;
pub mod cache;
pub mod cli;
pub mod credential;
pub mod error;
pub mod google;
pub mod jwt;
pub mod logging;
pub mod sts;

pub use broker::{CredentialBroker, InvocationConfig, Source};
pub use cache::CacheStore;
pub use credential::{IdToken, TemporaryCredential};
pub use error::{Error, Result};
pub use google::{GoogleTokenSource, IdentityTokenSource};
pub use sts::{AwsStsExchanger, StsExchanger};

// Compile-time assertions: the broker's collaborators must be Send + Sync.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<GoogleTokenSource>;
    let _ = assert_send_sync::<AwsStsExchanger>;
    let _ = assert_send_sync::<Error>;
};
