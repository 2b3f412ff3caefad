use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, Utc};
use gcp2aws::error::{StsError, TokenError};
use gcp2aws::{
    CacheStore, CredentialBroker, Error, IdToken, IdentityTokenSource, InvocationConfig, Source,
    StsExchanger, TemporaryCredential,
};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

const ROLE_ARN: &str = "arn:aws:iam::123:role/r";
const SERVICE_ACCOUNT: &str = "x@proj.iam.gserviceaccount.com";

fn mock_jwt(body: &str) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode("header"),
        URL_SAFE_NO_PAD.encode(body),
        URL_SAFE_NO_PAD.encode("signature")
    )
}

fn credential(expires_in: ChronoDuration, key: &str) -> TemporaryCredential {
    TemporaryCredential::new(key, "mock key", "mock token", Utc::now() + expires_in)
}

#[derive(Default)]
struct FakeTokens {
    token: Option<String>,
    calls: Mutex<Vec<(Option<String>, String)>>,
}

impl FakeTokens {
    fn issuing(body: &str) -> Self {
        Self {
            token: Some(mock_jwt(body)),
            ..Default::default()
        }
    }

    fn unavailable() -> Self {
        Self::default()
    }

    fn calls(&self) -> Vec<(Option<String>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityTokenSource for FakeTokens {
    async fn id_token(
        &self,
        service_account: Option<&str>,
        audience: &str,
    ) -> Result<IdToken, TokenError> {
        self.calls
            .lock()
            .unwrap()
            .push((service_account.map(str::to_owned), audience.to_owned()));
        match &self.token {
            Some(token) => Ok(IdToken::new(token.clone())),
            None => Err(TokenError::Unavailable("no credentials in test".into())),
        }
    }
}

struct ExchangeCall {
    role_arn: String,
    session_name: String,
    id_token: IdToken,
    duration: Duration,
}

struct FakeSts {
    issue: Option<TemporaryCredential>,
    calls: Mutex<Vec<ExchangeCall>>,
}

impl FakeSts {
    fn issuing(cred: TemporaryCredential) -> Self {
        Self {
            issue: Some(cred),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn denying() -> Self {
        Self {
            issue: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StsExchanger for FakeSts {
    async fn exchange(
        &self,
        role_arn: &str,
        session_name: &str,
        id_token: &IdToken,
        duration: Duration,
    ) -> Result<TemporaryCredential, StsError> {
        self.calls.lock().unwrap().push(ExchangeCall {
            role_arn: role_arn.to_owned(),
            session_name: session_name.to_owned(),
            id_token: id_token.clone(),
            duration,
        });
        self.issue
            .clone()
            .ok_or_else(|| StsError::AccessDenied("Not authorized to perform sts:AssumeRoleWithWebIdentity".into()))
    }
}

/// Collects formatted diagnostics emitted while it is the default subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn config(quiet: bool) -> InvocationConfig {
    InvocationConfig {
        service_account: Some(SERVICE_ACCOUNT.into()),
        quiet,
        ..InvocationConfig::new(ROLE_ARN)
    }
}

fn cache_in(tmp: &TempDir) -> CacheStore {
    CacheStore::new(tmp.path().join("gcp2aws"))
}

#[tokio::test]
async fn cache_hit_makes_no_remote_calls() {
    let tmp = TempDir::new().unwrap();
    let cache = cache_in(&tmp);
    let cached = credential(ChronoDuration::hours(1), "CACHED");
    cache.store(ROLE_ARN, &cached).unwrap();

    let broker = CredentialBroker::new(
        FakeTokens::issuing(r#"{"email":"x@proj.iam.gserviceaccount.com"}"#),
        FakeSts::denying(),
        cache,
    );
    let mut out = Vec::new();
    let source = broker.run(&config(true), &mut out).await.unwrap();

    assert_eq!(source, Source::Cache);
    assert!(out.is_empty(), "quiet run must not write to stdout");
    assert!(broker_tokens(&broker).is_empty());
    assert_eq!(broker_sts_calls(&broker).len(), 0);

    let (cred, _) = broker.credential(&config(false)).await.unwrap();
    assert_eq!(cred, cached);
}

#[tokio::test]
async fn cache_hit_is_emitted() {
    let tmp = TempDir::new().unwrap();
    let cache = cache_in(&tmp);
    let cached = credential(ChronoDuration::hours(1), "CACHED");
    cache.store(ROLE_ARN, &cached).unwrap();

    let tokens = FakeTokens::unavailable();
    let sts = FakeSts::denying();
    let broker = CredentialBroker::new(tokens, sts, cache);
    let mut out = Vec::new();
    broker.run(&config(false), &mut out).await.unwrap();

    let emitted: TemporaryCredential = serde_json::from_slice(&out).unwrap();
    assert_eq!(emitted, cached);
}

#[tokio::test]
async fn expired_cache_triggers_full_exchange() {
    let tmp = TempDir::new().unwrap();
    let cache = cache_in(&tmp);
    cache
        .store(ROLE_ARN, &credential(-ChronoDuration::hours(1), "STALE"))
        .unwrap();

    let fresh = credential(ChronoDuration::hours(1), "FRESH");
    let tokens = FakeTokens::issuing(r#"{"email":"x@proj.iam.gserviceaccount.com","sub":"42"}"#);
    let sts = FakeSts::issuing(fresh.clone());
    let broker = CredentialBroker::new(tokens, sts, cache.clone());

    let mut out = Vec::new();
    let source = broker.run(&config(false), &mut out).await.unwrap();
    assert_eq!(source, Source::Sts);

    let emitted: TemporaryCredential = serde_json::from_slice(&out).unwrap();
    assert_eq!(emitted, fresh);
    assert_eq!(emitted.version, 1);
    assert!(emitted.expiration > Utc::now());
    assert_eq!(cache.load(ROLE_ARN).unwrap(), fresh);
}

#[tokio::test]
async fn exchange_uses_token_identity_and_config() {
    let tmp = TempDir::new().unwrap();
    let tokens = FakeTokens::issuing(r#"{"email":"x@proj.iam.gserviceaccount.com"}"#);
    let issued_token = tokens.token.clone().unwrap();
    let sts = FakeSts::issuing(credential(ChronoDuration::hours(1), "FRESH"));
    let broker = CredentialBroker::new(tokens, sts, cache_in(&tmp));

    let config = InvocationConfig {
        duration: Duration::from_secs(900),
        ..config(true)
    };
    broker.credential(&config).await.unwrap();

    let broker_tokens = broker_tokens(&broker);
    assert_eq!(
        broker_tokens,
        vec![(Some(SERVICE_ACCOUNT.to_string()), "gcp2aws".to_string())]
    );

    let calls = broker_sts_calls(&broker);
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.role_arn, ROLE_ARN);
    assert_eq!(call.session_name, SERVICE_ACCOUNT);
    assert_eq!(call.id_token.as_str(), issued_token);
    assert_eq!(call.duration, Duration::from_secs(900));
}

#[tokio::test]
async fn default_mode_without_email_uses_subject() {
    let tmp = TempDir::new().unwrap();
    let tokens = FakeTokens::issuing(r#"{"sub":"1090","aud":"gcp2aws"}"#);
    let sts = FakeSts::issuing(credential(ChronoDuration::hours(1), "FRESH"));
    let broker = CredentialBroker::new(tokens, sts, cache_in(&tmp));

    let config = InvocationConfig {
        quiet: true,
        ..InvocationConfig::new(ROLE_ARN)
    };
    broker.credential(&config).await.unwrap();

    assert_eq!(broker_tokens(&broker)[0].0, None);
    assert_eq!(broker_sts_calls(&broker)[0].session_name, "gcp2aws-1090");
}

#[tokio::test]
async fn cache_write_failure_is_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("cache");
    fs::write(&blocker, b"not a directory").unwrap();
    let cache = CacheStore::new(blocker.join("gcp2aws"));

    let fresh = credential(ChronoDuration::hours(1), "FRESH");
    let broker = CredentialBroker::new(
        FakeTokens::issuing(r#"{"email":"x@proj.iam.gserviceaccount.com"}"#),
        FakeSts::issuing(fresh.clone()),
        cache,
    );

    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let mut out = Vec::new();
    let source = broker.run(&config(false), &mut out).await.unwrap();
    assert_eq!(source, Source::Sts);
    let emitted: TemporaryCredential = serde_json::from_slice(&out).unwrap();
    assert_eq!(emitted, fresh);

    let logs = logs.contents();
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("could not cache credential"), "{logs}");
    assert!(!logs.contains("mock key"), "secret key leaked: {logs}");
    assert!(!logs.contains("mock token"), "session token leaked: {logs}");
}

#[tokio::test]
async fn malformed_cache_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let cache = cache_in(&tmp);
    let path = cache.path_for(ROLE_ARN).unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "invalid json").unwrap();

    let fresh = credential(ChronoDuration::hours(1), "FRESH");
    let broker = CredentialBroker::new(
        FakeTokens::issuing(r#"{"email":"x@proj.iam.gserviceaccount.com"}"#),
        FakeSts::issuing(fresh.clone()),
        cache.clone(),
    );
    broker.credential(&config(true)).await.unwrap();

    assert_eq!(cache.load(ROLE_ARN).unwrap(), fresh);
}

#[tokio::test]
async fn token_failure_stops_before_sts() {
    let tmp = TempDir::new().unwrap();
    let cache = cache_in(&tmp);
    let broker = CredentialBroker::new(
        FakeTokens::unavailable(),
        FakeSts::issuing(credential(ChronoDuration::hours(1), "FRESH")),
        cache.clone(),
    );

    let mut out = Vec::new();
    let err = broker.run(&config(false), &mut out).await.unwrap_err();
    assert!(matches!(err, Error::Token(TokenError::Unavailable(_))), "{err:?}");
    assert!(err.to_string().starts_with("failed to obtain Google ID token"));
    assert_eq!(broker_sts_calls(&broker).len(), 0);
    assert!(out.is_empty());
    assert!(!cache.path_for(ROLE_ARN).unwrap().exists());
}

#[tokio::test]
async fn malformed_token_stops_before_sts() {
    let tmp = TempDir::new().unwrap();
    let broker = CredentialBroker::new(
        FakeTokens::issuing("notjson"),
        FakeSts::issuing(credential(ChronoDuration::hours(1), "FRESH")),
        cache_in(&tmp),
    );

    let err = broker.credential(&config(true)).await.unwrap_err();
    assert!(matches!(err, Error::MalformedToken(_)), "{err:?}");
    assert_eq!(broker_sts_calls(&broker).len(), 0);
}

#[tokio::test]
async fn sts_failure_is_fatal_and_not_cached() {
    let tmp = TempDir::new().unwrap();
    let cache = cache_in(&tmp);
    let broker = CredentialBroker::new(
        FakeTokens::issuing(r#"{"email":"x@proj.iam.gserviceaccount.com"}"#),
        FakeSts::denying(),
        cache.clone(),
    );

    let mut out = Vec::new();
    let err = broker.run(&config(false), &mut out).await.unwrap_err();
    assert!(matches!(err, Error::Sts(StsError::AccessDenied(_))), "{err:?}");
    assert!(out.is_empty());
    assert!(!cache.path_for(ROLE_ARN).unwrap().exists());
}

fn broker_tokens(broker: &CredentialBroker<FakeTokens, FakeSts>) -> Vec<(Option<String>, String)> {
    broker.token_source().calls()
}

fn broker_sts_calls(
    broker: &CredentialBroker<FakeTokens, FakeSts>,
) -> std::sync::MutexGuard<'_, Vec<ExchangeCall>> {
    broker.exchanger().calls.lock().unwrap()
}
