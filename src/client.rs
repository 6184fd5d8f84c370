//! Backend client: encrypted request assembly, session handling and all
//! API operations.
//!
//! The backend speaks a single fixed contract: every request is a GET
//! whose query string is an encrypted parameter blob, every response a
//! plaintext sentinel or pseudo-CSV payload. The client owns one session
//! credential and logs in lazily before the first call that needs a
//! session. Transport failures, authorization failures and backend faults
//! are kept distinguishable so callers can decide their own retry policy
//! (an authorization failure must never be retried; a timeout may be).

use crate::crypto::{self, DecodingError};
use crate::geo::{cluster_controls, DEFAULT_MAX_DISTANCE_KM};
use crate::models::{
    Account, AuthState, AuthStatus, Control, ControlCluster, Endpoint, ExchangeResult, MapArea,
    ModelError, CHECK_SCHEMA, CONTROL_SCHEMA, EXCHANGE_SCHEMA, GPS_CONTROL_SCHEMA, LOGIN_SCHEMA,
    MAPS_SCHEMA, SETTINGS_SCHEMA,
};
use crate::query::{self, QueryBuilder};
use crate::wire::{self, AccessDenied, FieldMap, Outcome};
use chrono::Local;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Base URL of the production backend.
pub const API_URL: &str = "http://app.politikontroller.no";

const API_PATH: &str = "/app.php";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of in-flight detail lookups in
/// [`Client::get_controls_from_lists`].
pub const DETAIL_CONCURRENCY: usize = 4;

/// Why authentication failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No credentials were configured on the client
    MissingCredentials,
    /// The backend answered with a no-access sentinel
    Denied(AccessDenied),
    /// Login exchange came back with LOGIN_ERROR
    LoginFailed,
    /// Account exists but is blocked
    Blocked,
    /// Account exists but was never activated
    NotActivated,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::MissingCredentials => write!(f, "no credentials configured"),
            AuthFailure::Denied(reason) => write!(f, "{reason}"),
            AuthFailure::LoginFailed => write!(f, "login rejected"),
            AuthFailure::Blocked => write!(f, "account is blocked"),
            AuthFailure::NotActivated => write!(f, "account is not activated"),
        }
    }
}

/// Client error types.
#[derive(Debug)]
pub enum ClientError {
    /// Malformed ciphertext or base64; fatal, not retryable
    Decoding(DecodingError),
    /// Authorization failure; surfaced, never silently retried
    Authentication(AuthFailure),
    /// Generic-error sentinel or a response that failed grammar
    /// expectations, with the raw body kept for diagnosis
    Protocol { body: String },
    /// Backend returned 404
    NotFound,
    /// Unexpected HTTP status
    Http { status: u16 },
    /// Request timed out
    Timeout,
    /// Connection-level failure
    Network(String),
    /// Caller-supplied value the client cannot work with
    InvalidInput(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Decoding(e) => write!(f, "Decoding error: {e}"),
            ClientError::Authentication(e) => write!(f, "Authentication error: {e}"),
            ClientError::Protocol { body } => write!(f, "Protocol error, raw body: {body:?}"),
            ClientError::NotFound => write!(f, "Resource not found"),
            ClientError::Http { status } => write!(f, "Unexpected HTTP status {status}"),
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Network(e) => write!(f, "Connection error: {e}"),
            ClientError::InvalidInput(e) => write!(f, "Invalid input: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<DecodingError> for ClientError {
    fn from(e: DecodingError) -> Self {
        ClientError::Decoding(e)
    }
}

impl From<ModelError> for ClientError {
    fn from(e: ModelError) -> Self {
        ClientError::InvalidInput(e.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

/// Backend client holding one session credential.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    tokens: QueryBuilder,
    account: Mutex<Option<Account>>,
}

impl Client {
    /// Client against the production backend, without credentials.
    pub fn new() -> Self {
        Self::with_base_url(API_URL)
    }

    /// Client against an alternate base URL (used by the test suite).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            tokens: QueryBuilder::new(),
            account: Mutex::new(None),
        }
    }

    /// Client with credentials configured but not yet verified; the first
    /// call that needs a session will log in.
    pub fn initialize(username: &str, password: &str) -> Result<Self, ClientError> {
        let client = Self::new();
        client.set_account(Account::new(username, password)?);
        Ok(client)
    }

    /// Replace the stored session credential.
    pub fn set_account(&self, account: Account) {
        *self.lock_account() = Some(account);
    }

    /// Snapshot of the stored session credential.
    pub fn account(&self) -> Option<Account> {
        self.lock_account().clone()
    }

    fn lock_account(&self) -> std::sync::MutexGuard<'_, Option<Account>> {
        self.account.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log in with explicit credentials, replacing any stored account.
    pub async fn authenticate_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Account, ClientError> {
        self.set_account(Account::new(username, password)?);
        self.login().await
    }

    /// Perform the login exchange with the stored credentials.
    pub async fn login(&self) -> Result<Account, ClientError> {
        let account = self
            .account()
            .ok_or(ClientError::Authentication(AuthFailure::MissingCredentials))?;

        let body = self.api_request(Endpoint::Login, Vec::new()).await?;
        let outcome = wire::classify_and_split(&body, LOGIN_SCHEMA, false);
        let fields = match outcome {
            Outcome::NoAccess(reason) => {
                self.mark_rejected();
                return Err(ClientError::Authentication(AuthFailure::Denied(reason)));
            }
            Outcome::Failure | Outcome::NoContent => {
                return Err(ClientError::Protocol { body })
            }
            Outcome::Payload(records) => records
                .into_iter()
                .next()
                .ok_or_else(|| ClientError::Protocol { body: body.clone() })?,
        };

        let status = fields
            .get("status")
            .and_then(|v| AuthStatus::from_wire(v))
            .ok_or_else(|| ClientError::Protocol { body: body.clone() })?;
        if status == AuthStatus::LoginError {
            self.mark_rejected();
            return Err(ClientError::Authentication(AuthFailure::LoginFailed));
        }
        match fields.get("state").map(String::as_str) {
            Some("blocked") => {
                self.mark_rejected();
                return Err(ClientError::Authentication(AuthFailure::Blocked));
            }
            Some("not_activated") => {
                self.mark_rejected();
                return Err(ClientError::Authentication(AuthFailure::NotActivated));
            }
            _ => {}
        }

        let mut authenticated = account;
        authenticated.uid = fields.get("uid").and_then(|v| v.parse().ok());
        authenticated.state = AuthState::Authenticated;
        *self.lock_account() = Some(authenticated.clone());
        tracing::info!("Authenticated as uid {:?}", authenticated.uid);
        Ok(authenticated)
    }

    fn mark_rejected(&self) {
        if let Some(account) = self.lock_account().as_mut() {
            account.state = AuthState::Rejected;
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), ClientError> {
        let state = self
            .account()
            .ok_or(ClientError::Authentication(AuthFailure::MissingCredentials))?
            .state;
        match state {
            AuthState::Authenticated => Ok(()),
            AuthState::Unauthenticated | AuthState::Rejected => {
                Box::pin(self.login()).await?;
                Ok(())
            }
        }
    }

    /// Issue one encrypted request and return the raw response body.
    async fn api_request(
        &self,
        endpoint: Endpoint,
        params: Vec<(String, String)>,
    ) -> Result<String, ClientError> {
        if endpoint.needs_session() {
            self.ensure_authenticated().await?;
        }

        let mut plain: Vec<(String, String)> =
            vec![("p".to_string(), endpoint.wire_name().to_string())];
        if endpoint.sends_credentials() {
            let account = self
                .account()
                .ok_or(ClientError::Authentication(AuthFailure::MissingCredentials))?;
            plain.extend(account.auth_params());
        }
        plain.extend(params);

        let form = query::encode_form(&self.tokens.build(&plain));
        let blob = crypto::encrypt(&form);
        let encoded: String = url::form_urlencoded::byte_serialize(blob.as_bytes()).collect();
        let url = format!("{}{}?{}", self.base_url, API_PATH, encoded);

        tracing::debug!("Requesting endpoint {}", endpoint);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        tracing::debug!("Endpoint {} answered {} bytes", endpoint, body.len());
        Ok(body)
    }

    /// Classify a body and hand back its records; `Ok(None)` is the
    /// explicit zero-results outcome, distinct from any error.
    fn expect_records(
        &self,
        body: &str,
        schema: &[Option<&str>],
        multiple: bool,
    ) -> Result<Option<Vec<FieldMap>>, ClientError> {
        match wire::classify_and_split(body, schema, multiple) {
            Outcome::Payload(records) => Ok(Some(records)),
            Outcome::NoContent => Ok(None),
            Outcome::NoAccess(reason) => {
                Err(ClientError::Authentication(AuthFailure::Denied(reason)))
            }
            Outcome::Failure => Err(ClientError::Protocol {
                body: body.to_string(),
            }),
        }
    }

    /// Sentinel-check a body and pass it through otherwise. Used by the
    /// account management calls, which answer with bare status tokens.
    fn passthrough(&self, body: String) -> Result<String, ClientError> {
        let trimmed = body.trim();
        match wire::classify(trimmed) {
            Some(Outcome::NoAccess(reason)) => {
                Err(ClientError::Authentication(AuthFailure::Denied(reason)))
            }
            Some(Outcome::Failure) => Err(ClientError::Protocol {
                body: trimmed.to_string(),
            }),
            _ => Ok(trimmed.to_string()),
        }
    }

    fn materialize_controls(
        &self,
        body: &str,
        records: Vec<FieldMap>,
    ) -> Result<Vec<Control>, ClientError> {
        let reference = Local::now();
        records
            .iter()
            .map(|fields| Control::from_fields(fields, reference))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                tracing::warn!("Response row failed to materialize: {}", e);
                ClientError::Protocol {
                    body: body.to_string(),
                }
            })
    }

    /// Session liveness probe; answers `YES` for a valid session.
    pub async fn check(&self) -> Result<String, ClientError> {
        let body = self.api_request(Endpoint::Check, Vec::new()).await?;
        let records = self
            .expect_records(&body, CHECK_SCHEMA, false)?
            .ok_or_else(|| ClientError::Protocol { body: body.clone() })?;
        records
            .first()
            .and_then(|fields| fields.get("status").cloned())
            .ok_or(ClientError::Protocol { body })
    }

    /// All active controls near a coordinate, clustered unless
    /// `merge_duplicates` is off.
    pub async fn get_controls(
        &self,
        lat: f64,
        lng: f64,
        merge_duplicates: bool,
    ) -> Result<Vec<ControlCluster>, ClientError> {
        let params = vec![
            ("lat".to_string(), lat.to_string()),
            ("lng".to_string(), lng.to_string()),
        ];
        let body = self.api_request(Endpoint::SpeedControls, params).await?;
        let Some(records) = self.expect_records(&body, CONTROL_SCHEMA, true)? else {
            return Ok(Vec::new());
        };
        let controls = self.materialize_controls(&body, records)?;
        Ok(cluster_controls(
            controls,
            merge_duplicates.then_some(DEFAULT_MAX_DISTANCE_KM),
        ))
    }

    /// All active controls inside a radius. Returns the backend's compact
    /// list entries, clustered; resolve full records with
    /// [`Client::get_controls_from_lists`].
    pub async fn get_controls_in_radius(
        &self,
        lat: f64,
        lng: f64,
        radius_km: u32,
        speed: Option<u32>,
        merge_duplicates: bool,
    ) -> Result<Vec<ControlCluster>, ClientError> {
        let mut params = vec![
            ("lat".to_string(), lat.to_string()),
            ("lng".to_string(), lng.to_string()),
            ("radius".to_string(), radius_km.to_string()),
        ];
        if let Some(speed) = speed {
            params.push(("speed".to_string(), speed.to_string()));
        }
        let body = self.api_request(Endpoint::GpsControls, params).await?;
        let Some(records) = self.expect_records(&body, GPS_CONTROL_SCHEMA, true)? else {
            return Ok(Vec::new());
        };
        let controls = self.materialize_controls(&body, records)?;
        Ok(cluster_controls(
            controls,
            merge_duplicates.then_some(DEFAULT_MAX_DISTANCE_KM),
        ))
    }

    /// Full detail for one control id. `Ok(None)` when the backend
    /// reports no such control.
    pub async fn get_control(&self, id: u32) -> Result<Option<Control>, ClientError> {
        let params = vec![("kontroll_id".to_string(), id.to_string())];
        let body = self.api_request(Endpoint::SpeedControl, params).await?;
        let Some(records) = self.expect_records(&body, CONTROL_SCHEMA, false)? else {
            return Ok(None);
        };
        let fields = records
            .first()
            .ok_or_else(|| ClientError::Protocol { body: body.clone() })?;
        let reference = Local::now();
        Control::from_fields(fields, reference)
            .map(Some)
            .map_err(|e| {
                tracing::warn!("Detail row failed to materialize: {}", e);
                ClientError::Protocol { body }
            })
    }

    /// Resolve list entries into full control records with the default
    /// number of in-flight requests.
    pub async fn get_controls_from_lists(
        &self,
        lists: &[ControlCluster],
    ) -> Result<Vec<Control>, ClientError> {
        self.get_controls_from_lists_bounded(lists, DETAIL_CONCURRENCY)
            .await
    }

    /// Resolve list entries into full control records.
    ///
    /// Detail requests for the cluster primaries are issued concurrently,
    /// at most `concurrency` in flight. Results are matched back to the
    /// list entries by the id the backend returns, not by response
    /// arrival order, and the output keeps the input order. Entries that
    /// vanished between listing and lookup are dropped.
    pub async fn get_controls_from_lists_bounded(
        &self,
        lists: &[ControlCluster],
        concurrency: usize,
    ) -> Result<Vec<Control>, ClientError> {
        let ids: Vec<u32> = lists.iter().map(|cluster| cluster.primary.id).collect();
        let fetched: Vec<(u32, Result<Option<Control>, ClientError>)> =
            stream::iter(ids.clone())
                .map(|id| async move { (id, self.get_control(id).await) })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut by_id: HashMap<u32, Control> = HashMap::new();
        for (requested, result) in fetched {
            match result? {
                Some(control) => {
                    by_id.insert(control.id, control);
                }
                None => tracing::debug!("Control {} gone before detail lookup", requested),
            }
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// The caller's registered map areas.
    pub async fn get_maps(&self) -> Result<Vec<MapArea>, ClientError> {
        let body = self.api_request(Endpoint::GetMaps, Vec::new()).await?;
        let Some(records) = self.expect_records(&body, MAPS_SCHEMA, true)? else {
            return Ok(Vec::new());
        };
        records
            .iter()
            .map(MapArea::from_fields)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                tracing::warn!("Map row failed to materialize: {}", e);
                ClientError::Protocol { body }
            })
    }

    /// Backend-side account settings as key/value pairs.
    pub async fn get_settings(&self) -> Result<HashMap<String, String>, ClientError> {
        let body = self.api_request(Endpoint::Settings, Vec::new()).await?;
        let Some(records) = self.expect_records(&body, SETTINGS_SCHEMA, true)? else {
            return Ok(HashMap::new());
        };
        Ok(records
            .into_iter()
            .filter_map(|mut fields| {
                let key = fields.remove("key")?;
                let value = fields.remove("value").unwrap_or_default();
                Some((key, value))
            })
            .collect())
    }

    /// Exchange accumulated points.
    pub async fn exchange_points(&self) -> Result<ExchangeResult, ClientError> {
        let body = self.api_request(Endpoint::ExchangePoints, Vec::new()).await?;
        let records = self
            .expect_records(&body, EXCHANGE_SCHEMA, false)?
            .ok_or_else(|| ClientError::Protocol { body: body.clone() })?;
        let fields = records.first().ok_or(ClientError::Protocol { body })?;
        Ok(ExchangeResult {
            status: fields.get("status").cloned().unwrap_or_default(),
            message: fields.get("message").cloned().unwrap_or_default(),
        })
    }

    /// Request an activation SMS for the stored account.
    pub async fn account_send_sms(&self) -> Result<String, ClientError> {
        let body = self.api_request(Endpoint::SendSms, Vec::new()).await?;
        self.passthrough(body)
    }

    /// Activate the stored account with the code received by SMS.
    pub async fn account_auth_sms(&self) -> Result<String, ClientError> {
        let body = self.api_request(Endpoint::AuthSms, Vec::new()).await?;
        self.passthrough(body)
    }

    /// Activate an account with an activation code.
    pub async fn account_auth(&self, auth_code: &str, uid: u32) -> Result<String, ClientError> {
        let params = vec![
            ("kode".to_string(), auth_code.to_string()),
            ("uid".to_string(), uid.to_string()),
        ];
        let body = self.api_request(Endpoint::Activate, params).await?;
        self.passthrough(body)
    }

    /// Register a new account.
    pub async fn account_register(
        &self,
        phone_number: u64,
        password: &str,
        name: &str,
        country: &str,
    ) -> Result<String, ClientError> {
        let prefix = crate::models::phone_prefix(country)
            .ok_or_else(|| ClientError::InvalidInput(format!("unknown country '{country}'")))?;
        let params = vec![
            ("retning".to_string(), prefix.to_string()),
            ("telefon".to_string(), phone_number.to_string()),
            ("passord".to_string(), password.to_string()),
            ("navn".to_string(), name.to_string()),
            ("land".to_string(), country.to_string()),
        ];
        let body = self.api_request(Endpoint::Register, params).await?;
        self.passthrough(body)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_without_account_reports_missing_credentials() {
        let client = Client::new();
        assert!(client.account().is_none());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = runtime.block_on(client.check()).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Authentication(AuthFailure::MissingCredentials)
        ));
    }

    #[test]
    fn test_initialize_parses_username() {
        let client = Client::initialize("4747474747", "pw").unwrap();
        let account = client.account().unwrap();
        assert_eq!(account.phone_prefix, 47);
        assert_eq!(account.state, AuthState::Unauthenticated);
    }

    #[test]
    fn test_initialize_rejects_bad_username() {
        assert!(matches!(
            Client::initialize("not-a-number", "pw"),
            Err(ClientError::InvalidInput(_))
        ));
    }
}
