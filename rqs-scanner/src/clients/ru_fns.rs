//! ru-fns: ФНС mobile app API
//!
//! Fetching is two calls: `POST /v2/ticket` registers the QR text and reports a
//! status, `GET /v2/tickets/{id}` returns the receipt. Requests carry the
//! mobile app's headers and a session id obtained from a refresh token; see
//! [`super::ru_fns_session`].

use async_trait::async_trait;
use chrono::Utc;
use governor::DefaultDirectRateLimiter;
use reqwest::{Method, RequestBuilder, StatusCode};
use rqs_common::config::RuFnsConfig;
use rqs_common::receipts::{DomainCode, ReceiptRef};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::http::{client_builder, excerpt, rate_limiter, read_response, unexpected_status};
use super::ru_fns_session::{Session, SessionError, SessionStore};
use super::{wrong_domain, CorrectnessSink, FetchClient, FetchError};

pub const DEFAULT_BASE_URL: &str = "https://irkkt-mobile.nalog.ru:8888";

pub const DEVICE_ID_ENV: &str = "RU_FNS_DEVICE_ID";
pub const FIREBASE_TOKEN_ENV: &str = "RU_FNS_FIREBASE_TOKEN";

const CLIENT_VERSION: &str = "2.27.3";
const DEVICE_OS: &str = "Android";
const USER_AGENT: &str = "okhttp/5.0.0-alpha.2";
/// What the app sends as `Device-Id` on refresh when it has no firebase token
const NO_FIREBASE_TOKEN: &str = "noFirebaseToken";

/// Ticket registrations per fetch before a not-ready status is reported
const MAX_ATTEMPTS: u32 = 4;
const NOT_READY_PAUSE: Duration = Duration::from_secs(2);

/// Startup profile checks before giving up on the stored session
const PROFILE_CHECK_ATTEMPTS: u32 = 3;
const PROFILE_RETRY_PAUSE: Duration = Duration::from_secs(3);

/// `Device-Id` header values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Sent with regular requests (an Android ID in the app)
    pub device_id: String,
    /// Sent with session refresh requests
    pub firebase_token: String,
}

impl DeviceIdentity {
    /// Environment first, then config; a random device id otherwise
    pub fn resolve(config: &RuFnsConfig) -> Self {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let device_id = from_env(DEVICE_ID_ENV)
            .or_else(|| config.device_id.clone())
            .unwrap_or_else(random_device_id);
        let firebase_token = from_env(FIREBASE_TOKEN_ENV)
            .or_else(|| config.firebase_token.clone())
            .unwrap_or_else(|| NO_FIREBASE_TOKEN.to_string());

        Self {
            device_id,
            firebase_token,
        }
    }
}

/// 64-bit hex id with the top bit set, shaped like an Android ID
pub fn random_device_id() -> String {
    format!("{:x}", rand::random::<u64>() | (1 << 63))
}

/// Meaning of the `status` returned by `POST /v2/ticket`
///
/// Only the listed codes are known; anything else is treated as accepted and
/// the receipt data is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    /// 0, 1, 3: receipt is (probably) known but not loaded yet
    MaybeNotReady,
    /// 5
    WaitingForConnection,
    /// 8: receipt is correct but the register works offline
    CashboxOffline,
    /// 9
    ReceiveFailed,
    /// 15: not a cash receipt or strict reporting form
    WrongReceipt,
    Accepted,
}

impl TicketStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 | 1 | 3 => TicketStatus::MaybeNotReady,
            5 => TicketStatus::WaitingForConnection,
            8 => TicketStatus::CashboxOffline,
            9 => TicketStatus::ReceiveFailed,
            15 => TicketStatus::WrongReceipt,
            _ => TicketStatus::Accepted,
        }
    }

    /// Upstream has seen this receipt
    pub fn confirms_receipt(self) -> bool {
        self == TicketStatus::MaybeNotReady
    }

    fn into_error(self) -> Option<FetchError> {
        match self {
            TicketStatus::MaybeNotReady => Some(FetchError::NotReady(
                "receipt may not be loaded yet".to_string(),
            )),
            TicketStatus::WaitingForConnection => {
                Some(FetchError::NotReady("waiting for connection".to_string()))
            }
            TicketStatus::CashboxOffline => Some(FetchError::NotReady(
                "receipt is correct but absent from storage: autonomous cashbox".to_string(),
            )),
            TicketStatus::ReceiveFailed => Some(FetchError::Rejected("receive failed".to_string())),
            TicketStatus::WrongReceipt => Some(FetchError::WrongReceipt(
                "not a cash receipt or strict reporting form".to_string(),
            )),
            TicketStatus::Accepted => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TicketInfo {
    id: String,
    #[serde(default)]
    kind: String,
    status: i64,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
    refresh_token: String,
}

/// Account owning the session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

pub struct RuFnsClient {
    http: reqwest::Client,
    base_url: String,
    identity: DeviceIdentity,
    store: SessionStore,
    session: Mutex<Option<Session>>,
    limiter: DefaultDirectRateLimiter,
    not_ready_pause: Duration,
    profile_retry_pause: Duration,
}

fn session_err(e: SessionError) -> FetchError {
    FetchError::SessionUnavailable(e.to_string())
}

impl RuFnsClient {
    pub fn new(identity: DeviceIdentity, store: SessionStore) -> reqwest::Result<Self> {
        Ok(Self {
            http: client_builder().build()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            identity,
            store,
            session: Mutex::new(None),
            limiter: rate_limiter(),
            not_ready_pause: NOT_READY_PAUSE,
            profile_retry_pause: PROFILE_RETRY_PAUSE,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Pause between not-ready attempts and between startup profile checks
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.not_ready_pause = pause;
        self.profile_retry_pause = pause;
        self
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Exchanges a refresh token for a first session and stores it
    pub async fn init_session(&self, refresh_token: &str, client_secret: &str) -> Result<(), FetchError> {
        let mut session = Session::new(refresh_token, client_secret);
        self.refresh(&mut session).await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    /// Loads the stored session and checks it against the profile endpoint.
    ///
    /// Returns `Ok(false)` when no session was initialised yet.
    pub async fn load_session(&self) -> Result<bool, FetchError> {
        let Some(mut session) = self.store.load().map_err(session_err)? else {
            warn!(
                path = %self.store.path().display(),
                "ru-fns: no session, run `rqs-scanner init-session <refresh_token> <client_secret>`"
            );
            return Ok(false);
        };

        let mut attempts_left = PROFILE_CHECK_ATTEMPTS;
        loop {
            attempts_left -= 1;
            match self.check_session(&mut session).await {
                Ok(profile) => {
                    info!(phone = %profile.phone, "ru-fns: profile");
                    break;
                }
                Err(e) if attempts_left > 0 && !matches!(e, FetchError::UnexpectedStatus { .. }) => {
                    warn!(error = %e, retries_left = attempts_left, "ru-fns: can not get profile");
                    tokio::time::sleep(self.profile_retry_pause).await;
                }
                Err(e) => return Err(e),
            }
        }

        *self.session.lock().await = Some(session);
        Ok(true)
    }

    async fn check_session(&self, session: &mut Session) -> Result<Profile, FetchError> {
        self.refresh_if_stale(session).await?;
        self.profile(&session.session_id).await
    }

    async fn refresh_if_stale(&self, session: &mut Session) -> Result<(), FetchError> {
        if session.is_stale(Utc::now()) {
            self.refresh(session).await?;
        }
        Ok(())
    }

    async fn refresh(&self, session: &mut Session) -> Result<(), FetchError> {
        let body = json!({
            "client_secret": session.client_secret,
            "refresh_token": session.refresh_token,
        });
        let request = self
            .request(Method::POST, "/v2/mobile/users/refresh", true)
            .json(&body);
        let update: RefreshResponse = parse_json(&self.send(request).await?)?;

        session.refresh_token = update.refresh_token;
        session.session_id = update.session_id;
        session.updated_at = Utc::now();
        self.store.save(session).map_err(session_err)?;
        debug!("ru-fns: session refreshed");
        Ok(())
    }

    pub async fn profile(&self, session_id: &str) -> Result<Profile, FetchError> {
        let request = self
            .request(Method::GET, "/v2/mobile/user/profile", false)
            .header("sessionId", session_id);
        parse_json(&self.send(request).await?)
    }

    /// One register + download round
    async fn fetch_once(
        &self,
        qr_text: &str,
        session_id: &str,
        sink: &dyn CorrectnessSink,
    ) -> Result<Vec<u8>, FetchError> {
        let request = self
            .request(Method::POST, "/v2/ticket", false)
            .header("sessionId", session_id)
            .json(&json!({ "qr": qr_text }));
        let info: TicketInfo = parse_json(&self.send(request).await?)?;

        let status = TicketStatus::from_code(info.status);
        if status.confirms_receipt() {
            sink.mark_likely_correct().await?;
        }
        if let Some(err) = status.into_error() {
            return Err(err);
        }

        debug!(ticket_id = %info.id, kind = %info.kind, "ru-fns: ticket accepted");
        let request = self
            .request(Method::GET, &format!("/v2/tickets/{}", info.id), false)
            .header("sessionId", session_id);
        let body = self.send(request).await?;

        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) if map.contains_key("ticket") => Ok(body),
            _ => Err(FetchError::Malformed(format!(
                "no receipt data in response: {}",
                excerpt(&body)
            ))),
        }
    }

    fn request(&self, method: Method, path: &str, use_firebase_token: bool) -> RequestBuilder {
        let device_id = if use_firebase_token {
            &self.identity.firebase_token
        } else {
            &self.identity.device_id
        };
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("ClientVersion", CLIENT_VERSION)
            .header("Device-Id", device_id.as_str())
            .header("Device-OS", DEVICE_OS)
            .header("User-Agent", USER_AGENT)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>, FetchError> {
        self.limiter.until_ready().await;
        let response = request.send().await?;
        let (status, body) = read_response(DomainCode::RuFns, response).await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if status != StatusCode::OK {
            return Err(unexpected_status(status, &body));
        }
        Ok(body)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, FetchError> {
    serde_json::from_slice(body).map_err(|e| FetchError::Malformed(format!("{}: {}", e, excerpt(body))))
}

#[async_trait]
impl FetchClient for RuFnsClient {
    fn domain(&self) -> DomainCode {
        DomainCode::RuFns
    }

    async fn fetch_receipt(
        &self,
        reference: &ReceiptRef,
        sink: &dyn CorrectnessSink,
    ) -> Result<Vec<u8>, FetchError> {
        let ReceiptRef::RuFns(r) = reference else {
            return Err(wrong_domain(self.domain(), reference));
        };

        let session_id = {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return Err(FetchError::SessionUnavailable(
                    "ru-fns session is not initialised".to_string(),
                ));
            };
            self.refresh_if_stale(session).await?;
            session.session_id.clone()
        };

        let mut attempt = 1;
        loop {
            match self.fetch_once(r.text(), &session_id, sink).await {
                Err(FetchError::NotReady(reason)) if attempt < MAX_ATTEMPTS => {
                    info!(attempt, reason = %reason, "ru-fns: receipt not checked yet, waiting a bit more");
                    tokio::time::sleep(self.not_ready_pause).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::test_support::{serve, CountingSink};
    use axum::{
        extract::Path as UrlPath,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::{get, post},
        Json, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const QR: &str = "t=20240101T1200&s=10.50&fn=123&i=45&fp=999&n=1";

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "8000000000000001".to_string(),
            firebase_token: "fb-token".to_string(),
        }
    }

    fn ru_ref() -> ReceiptRef {
        ReceiptRef::parse(DomainCode::RuFns, QR).unwrap()
    }

    fn session_api() -> Router {
        Router::new()
            .route(
                "/v2/mobile/users/refresh",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(headers["device-id"], "fb-token");
                    assert_eq!(body["client_secret"], "secret");
                    Json(json!({ "sessionId": "sid-2", "refresh_token": "refresh-2" }))
                }),
            )
            .route(
                "/v2/mobile/user/profile",
                get(|headers: HeaderMap| async move {
                    assert_eq!(headers["sessionid"], "sid-2");
                    Json(json!({ "phone": "+79990000000" }))
                }),
            )
    }

    /// Fake API: `statuses[n]` is the ticket status of the n-th registration
    fn fake_api(statuses: &'static [i64], registrations: Arc<AtomicUsize>) -> Router {
        session_api()
            .route(
                "/v2/ticket",
                post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    let registrations = registrations.clone();
                    async move {
                        assert_eq!(headers["device-id"], "8000000000000001");
                        assert_eq!(headers["clientversion"], CLIENT_VERSION);
                        assert_eq!(body["qr"], QR);
                        let n = registrations.fetch_add(1, Ordering::SeqCst);
                        let status = statuses[n.min(statuses.len() - 1)];
                        Json(json!({ "id": "t-1", "kind": "kkt", "status": status }))
                    }
                }),
            )
            .route(
                "/v2/tickets/:id",
                get(|UrlPath(id): UrlPath<String>| async move {
                    assert_eq!(id, "t-1");
                    Json(json!({ "ticket": { "document": { "receipt": { "totalSum": 1050 } } } }))
                }),
            )
    }

    async fn client_with_session(router: Router) -> (RuFnsClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let client = RuFnsClient::new(identity(), SessionStore::in_folder(dir.path()))
            .unwrap()
            .with_base_url(&serve(router).await)
            .with_retry_pause(Duration::from_millis(10));
        client.init_session("refresh-1", "secret").await.unwrap();
        (client, dir)
    }

    #[test]
    fn test_status_table() {
        for code in [0, 1, 3] {
            assert_eq!(TicketStatus::from_code(code), TicketStatus::MaybeNotReady);
        }
        assert_eq!(TicketStatus::from_code(5), TicketStatus::WaitingForConnection);
        assert_eq!(TicketStatus::from_code(8), TicketStatus::CashboxOffline);
        assert_eq!(TicketStatus::from_code(9), TicketStatus::ReceiveFailed);
        assert_eq!(TicketStatus::from_code(15), TicketStatus::WrongReceipt);
        assert_eq!(TicketStatus::from_code(2), TicketStatus::Accepted);

        assert!(TicketStatus::MaybeNotReady.confirms_receipt());
        assert!(!TicketStatus::CashboxOffline.confirms_receipt());
        assert!(matches!(
            TicketStatus::CashboxOffline.into_error(),
            Some(FetchError::NotReady(_))
        ));
        assert!(TicketStatus::Accepted.into_error().is_none());
    }

    #[test]
    #[serial_test::serial]
    fn test_identity_resolution_order() {
        std::env::remove_var(DEVICE_ID_ENV);
        std::env::remove_var(FIREBASE_TOKEN_ENV);

        let defaults = DeviceIdentity::resolve(&RuFnsConfig::default());
        assert_eq!(defaults.device_id.len(), 16);
        assert_eq!(defaults.firebase_token, NO_FIREBASE_TOKEN);

        let config = RuFnsConfig {
            device_id: Some("from-config".to_string()),
            firebase_token: Some("fb-config".to_string()),
        };
        assert_eq!(DeviceIdentity::resolve(&config).device_id, "from-config");

        std::env::set_var(DEVICE_ID_ENV, "from-env");
        let resolved = DeviceIdentity::resolve(&config);
        std::env::remove_var(DEVICE_ID_ENV);
        assert_eq!(resolved.device_id, "from-env");
        assert_eq!(resolved.firebase_token, "fb-config");
    }

    #[test]
    fn test_random_device_id_shape() {
        let id = random_device_id();
        assert_eq!(id.len(), 16);
        assert!(u64::from_str_radix(&id, 16).unwrap() >= 1 << 63);
    }

    #[tokio::test]
    async fn test_fetch_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let client = RuFnsClient::new(identity(), SessionStore::in_folder(dir.path()))
            .unwrap()
            .with_base_url("http://127.0.0.1:1");

        assert!(!client.load_session().await.unwrap());
        let err = client
            .fetch_receipt(&ru_ref(), &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SessionUnavailable(_)));
        assert!(!err.decreases_retry_budget());
    }

    #[tokio::test]
    async fn test_init_session_persists_refreshed_tokens() {
        let registrations = Arc::new(AtomicUsize::new(0));
        let (client, dir) = client_with_session(fake_api(&[2], registrations)).await;

        assert!(client.has_session().await);
        let stored = SessionStore::in_folder(dir.path()).load().unwrap().unwrap();
        assert_eq!(stored.session_id, "sid-2");
        assert_eq!(stored.refresh_token, "refresh-2");
        assert_eq!(stored.client_secret, "secret");
    }

    #[tokio::test]
    async fn test_load_session_checks_profile() {
        let registrations = Arc::new(AtomicUsize::new(0));
        let (first, dir) = client_with_session(fake_api(&[2], registrations.clone())).await;
        let base_url = first.base_url.clone();

        let second = RuFnsClient::new(identity(), SessionStore::in_folder(dir.path()))
            .unwrap()
            .with_base_url(&base_url);
        assert!(second.load_session().await.unwrap());
        assert!(second.has_session().await);
    }

    #[tokio::test]
    async fn test_not_ready_then_success() {
        let registrations = Arc::new(AtomicUsize::new(0));
        let (client, _dir) = client_with_session(fake_api(&[1, 2], registrations.clone())).await;

        let sink = CountingSink::default();
        let body = client.fetch_receipt(&ru_ref(), &sink).await.unwrap();

        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ticket"]["document"]["receipt"]["totalSum"], 1050);
        assert_eq!(registrations.load(Ordering::SeqCst), 2);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_gives_up_after_attempts() {
        let registrations = Arc::new(AtomicUsize::new(0));
        let (client, _dir) = client_with_session(fake_api(&[5], registrations.clone())).await;

        let sink = CountingSink::default();
        let err = client.fetch_receipt(&ru_ref(), &sink).await.unwrap_err();

        assert!(matches!(err, FetchError::NotReady(_)));
        assert!(!err.decreases_retry_budget());
        assert_eq!(registrations.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_receipt_is_final() {
        let registrations = Arc::new(AtomicUsize::new(0));
        let (client, _dir) = client_with_session(fake_api(&[15], registrations.clone())).await;

        let err = client
            .fetch_receipt(&ru_ref(), &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::WrongReceipt(_)));
        assert!(err.decreases_retry_budget());
        assert_eq!(registrations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_too_many_requests() {
        let router = session_api().route(
            "/v2/ticket",
            post(|| async { (AxumStatus::TOO_MANY_REQUESTS, "slow down") }),
        );
        let (client, _dir) = client_with_session(router).await;

        let err = client
            .fetch_receipt(&ru_ref(), &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RateLimited));
    }
}
