//! Data model: control records, clusters, accounts and the endpoint table.

use crate::timefmt::{normalize, ParsedTimestamp};
use crate::wire::FieldMap;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Local phone number length after the country prefix.
pub const PHONE_NUMBER_LENGTH: usize = 8;
/// Country used when a username carries no recognizable prefix.
pub const DEFAULT_COUNTRY: &str = "no";

const DESCRIPTION_TRUNCATE_LENGTH: usize = 27;
const DESCRIPTION_TRUNCATE_SUFFIX: &str = "..";

/// Model-level errors.
#[derive(Debug)]
pub enum ModelError {
    /// A required column was missing from the parsed record
    MissingField(&'static str),
    /// A column was present but could not be coerced
    InvalidField { field: &'static str, value: String },
    /// Username is not a phone-prefix + local-number digit string
    InvalidUsername(String),
    /// Credential token was not base64-encoded JSON
    InvalidCredentialToken(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::MissingField(field) => write!(f, "Missing field '{field}'"),
            ModelError::InvalidField { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ModelError::InvalidUsername(u) => write!(f, "Invalid username '{u}'"),
            ModelError::InvalidCredentialToken(e) => {
                write!(f, "Invalid credential token: {e}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// Control type vocabulary as the backend spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    #[serde(rename = "Fartskontroll")]
    SpeedTrap,
    #[serde(rename = "Belte/mobil")]
    Behaviour,
    #[serde(rename = "Teknisk")]
    Technical,
    #[serde(rename = "Trafikk info")]
    TrafficInfo,
    #[serde(rename = "Observasjon")]
    Observation,
    #[serde(rename = "Toll/grense")]
    Customs,
    #[serde(rename = "Vektkontroll")]
    Weight,
    #[serde(rename = "Ukjent")]
    Unknown,
    #[serde(rename = "Sivilpoliti")]
    CivilPolice,
    #[serde(rename = "Mopedkontroll")]
    MopedControl,
    #[serde(rename = "Politibåten")]
    BoatPatrol,
}

impl ControlType {
    pub const ALL: [ControlType; 11] = [
        ControlType::SpeedTrap,
        ControlType::Behaviour,
        ControlType::Technical,
        ControlType::TrafficInfo,
        ControlType::Observation,
        ControlType::Customs,
        ControlType::Weight,
        ControlType::Unknown,
        ControlType::CivilPolice,
        ControlType::MopedControl,
        ControlType::BoatPatrol,
    ];

    /// Wire spelling of this control type.
    pub fn wire_name(self) -> &'static str {
        match self {
            ControlType::SpeedTrap => "Fartskontroll",
            ControlType::Behaviour => "Belte/mobil",
            ControlType::Technical => "Teknisk",
            ControlType::TrafficInfo => "Trafikk info",
            ControlType::Observation => "Observasjon",
            ControlType::Customs => "Toll/grense",
            ControlType::Weight => "Vektkontroll",
            ControlType::Unknown => "Ukjent",
            ControlType::CivilPolice => "Sivilpoliti",
            ControlType::MopedControl => "Mopedkontroll",
            ControlType::BoatPatrol => "Politibåten",
        }
    }

    /// Parse a wire string. Unrecognized spellings degrade to `Unknown`
    /// since the backend's vocabulary has drifted between app versions.
    pub fn from_wire(value: &str) -> Self {
        ControlType::ALL
            .into_iter()
            .find(|t| t.wire_name() == value)
            .unwrap_or(ControlType::Unknown)
    }
}

impl std::fmt::Display for ControlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// One reported sighting of a traffic control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: u32,
    #[serde(rename = "type")]
    pub control_type: ControlType,
    pub county: String,
    pub municipality: String,
    pub description: String,
    pub lat: f64,
    pub lng: f64,
    /// When the control was first confirmed, if reported
    pub timestamp: Option<DateTime<Utc>>,
    /// When the control was last seen, if reported
    pub last_seen: Option<DateTime<Utc>>,
    /// Confirmation counter
    pub confirmed: u32,
}

impl Control {
    /// Materialize a control from a parsed record.
    ///
    /// Only `id`, `lat` and `lng` are hard requirements; everything else
    /// degrades to a default when absent, since the backend's schemas
    /// drift between response samples.
    pub fn from_fields(fields: &FieldMap, reference: DateTime<Local>) -> Result<Self, ModelError> {
        Ok(Self {
            id: require_parsed(fields, "id")?,
            control_type: fields
                .get("type")
                .map(|v| ControlType::from_wire(v))
                .unwrap_or(ControlType::Unknown),
            county: fields.get("county").cloned().unwrap_or_default(),
            municipality: fields.get("municipality").cloned().unwrap_or_default(),
            description: fields.get("description").cloned().unwrap_or_default(),
            lat: require_parsed(fields, "lat")?,
            lng: require_parsed(fields, "lng")?,
            timestamp: time_field(fields, "timestamp", reference),
            last_seen: time_field(fields, "last_seen", reference),
            confirmed: fields
                .get("confirmed")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    /// Description shortened for display.
    pub fn description_truncated(&self) -> String {
        if self.description.chars().count() > DESCRIPTION_TRUNCATE_LENGTH {
            let head: String = self
                .description
                .chars()
                .take(DESCRIPTION_TRUNCATE_LENGTH - DESCRIPTION_TRUNCATE_SUFFIX.len())
                .collect();
            format!("{head}{DESCRIPTION_TRUNCATE_SUFFIX}")
        } else {
            self.description.clone()
        }
    }

    /// Display title: control type plus shortened description.
    pub fn title(&self) -> String {
        format!("{}: {}", self.control_type, self.description_truncated())
    }
}

fn require_parsed<T: std::str::FromStr>(
    fields: &FieldMap,
    field: &'static str,
) -> Result<T, ModelError> {
    let value = fields
        .get(field)
        .ok_or(ModelError::MissingField(field))?;
    value.trim().parse().map_err(|_| ModelError::InvalidField {
        field,
        value: value.clone(),
    })
}

fn time_field(
    fields: &FieldMap,
    field: &'static str,
    reference: DateTime<Local>,
) -> Option<DateTime<Utc>> {
    match fields.get(field).map(|v| normalize(v, reference)) {
        Some(ParsedTimestamp::At(dt)) => Some(dt),
        Some(ParsedTimestamp::Verbatim(raw)) => {
            tracing::debug!("Time field {} did not parse ({:?}), dropping", field, raw);
            None
        }
        Some(ParsedTimestamp::Absent) | None => None,
    }
}

/// A group of sightings judged to describe the same physical control.
///
/// Every duplicate lies within the clustering threshold of the primary;
/// duplicate-to-duplicate distances are not checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlCluster {
    pub primary: Control,
    pub duplicates: Vec<Control>,
}

impl ControlCluster {
    pub fn singleton(primary: Control) -> Self {
        Self {
            primary,
            duplicates: Vec::new(),
        }
    }
}

/// Backend login verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    LoginOk,
    LoginError,
}

impl AuthStatus {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "LOGIN_OK" => Some(AuthStatus::LoginOk),
            "LOGIN_ERROR" => Some(AuthStatus::LoginError),
            _ => None,
        }
    }
}

/// Authentication state of a session credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
    Rejected,
}

/// Phone-number-derived session credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Backend-assigned account id, known after login
    pub uid: Option<u32>,
    pub country: String,
    pub phone_prefix: u16,
    pub phone_number: u64,
    pub password: String,
    pub state: AuthState,
}

impl Account {
    /// Build a credential from a full username (country prefix digits
    /// followed by the 8-digit local number) and password.
    pub fn new(username: &str, password: &str) -> Result<Self, ModelError> {
        let (phone_prefix, phone_number) = split_username(username)?;
        let country = country_for_prefix(phone_prefix)
            .unwrap_or(DEFAULT_COUNTRY)
            .to_string();
        Ok(Self {
            uid: None,
            country,
            phone_prefix,
            phone_number,
            password: password.to_string(),
            state: AuthState::Unauthenticated,
        })
    }

    /// Full username: prefix digits concatenated with the local number.
    pub fn username(&self) -> String {
        format!("{}{}", self.phone_prefix, self.phone_number)
    }

    /// Credential parameters attached to authenticated requests.
    pub fn auth_params(&self) -> Vec<(String, String)> {
        vec![
            ("retning".into(), self.phone_prefix.to_string()),
            ("telefon".into(), self.phone_number.to_string()),
            ("passord".into(), self.password.clone()),
        ]
    }
}

/// Country prefix table: the backend serves Norway, Sweden and Denmark.
pub fn phone_prefix(country: &str) -> Option<u16> {
    match country {
        "no" => Some(47),
        "se" => Some(46),
        "dk" => Some(45),
        _ => None,
    }
}

fn country_for_prefix(prefix: u16) -> Option<&'static str> {
    match prefix {
        47 => Some("no"),
        46 => Some("se"),
        45 => Some("dk"),
        _ => None,
    }
}

fn split_username(username: &str) -> Result<(u16, u64), ModelError> {
    let invalid = || ModelError::InvalidUsername(username.to_string());
    if username.is_empty() || !username.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if username.len() == PHONE_NUMBER_LENGTH {
        let number = username.parse().map_err(|_| invalid())?;
        return Ok((phone_prefix(DEFAULT_COUNTRY).unwrap_or(47), number));
    }
    if username.len() <= PHONE_NUMBER_LENGTH {
        return Err(invalid());
    }
    let (prefix, number) = username.split_at(username.len() - PHONE_NUMBER_LENGTH);
    Ok((
        prefix.parse().map_err(|_| invalid())?,
        number.parse().map_err(|_| invalid())?,
    ))
}

/// Plain credential pair, convertible to and from the compact local cache
/// token (base64 of its JSON encoding). The token is never used as the
/// wire auth format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn to_token(&self) -> String {
        // Serialization of two string fields cannot fail.
        let json = serde_json::to_string(self).expect("two string fields");
        BASE64.encode(json)
    }

    pub fn from_token(token: &str) -> Result<Self, ModelError> {
        let raw = BASE64
            .decode(token)
            .map_err(|e| ModelError::InvalidCredentialToken(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| ModelError::InvalidCredentialToken(e.to_string()))
    }
}

/// One entry from the maps listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapArea {
    pub id: u32,
    pub name: String,
    pub description: String,
}

impl MapArea {
    pub fn from_fields(fields: &FieldMap) -> Result<Self, ModelError> {
        Ok(Self {
            id: require_parsed(fields, "id")?,
            name: fields.get("name").cloned().unwrap_or_default(),
            description: fields.get("description").cloned().unwrap_or_default(),
        })
    }
}

/// Result of a points exchange call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeResult {
    pub status: String,
    pub message: String,
}

impl ExchangeResult {
    pub fn succeeded(&self) -> bool {
        self.status == "EXCHANGE_OK"
    }
}

/// The closed set of backend routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    Check,
    /// Controls near a coordinate
    SpeedControls,
    /// Controls inside a radius, list form
    GpsControls,
    /// Full detail for one control id
    SpeedControl,
    GetMaps,
    Settings,
    ExchangePoints,
    SendSms,
    AuthSms,
    Activate,
    Register,
}

impl Endpoint {
    /// Value of the `p` query parameter for this route.
    pub fn wire_name(self) -> &'static str {
        match self {
            Endpoint::Login => "login",
            Endpoint::Check => "check",
            Endpoint::SpeedControls => "hk",
            Endpoint::GpsControls => "gps_kontroller",
            Endpoint::SpeedControl => "hki",
            Endpoint::GetMaps => "hent_mine_kart",
            Endpoint::Settings => "instillinger",
            Endpoint::ExchangePoints => "bytt_poeng",
            Endpoint::SendSms => "send_sms",
            Endpoint::AuthSms => "auth_sms",
            Endpoint::Activate => "aktiver",
            Endpoint::Register => "registrer",
        }
    }

    /// Routes that require an authenticated session before the call; a
    /// client will lazily log in first.
    pub fn needs_session(self) -> bool {
        matches!(
            self,
            Endpoint::Check
                | Endpoint::SpeedControls
                | Endpoint::GpsControls
                | Endpoint::SpeedControl
                | Endpoint::GetMaps
                | Endpoint::Settings
                | Endpoint::ExchangePoints
        )
    }

    /// Routes that carry the stored credential parameters. Activation SMS
    /// calls send credentials without a session; they exist so the
    /// account can become loginable in the first place.
    pub fn sends_credentials(self) -> bool {
        self.needs_session()
            || matches!(self, Endpoint::Login | Endpoint::SendSms | Endpoint::AuthSms)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

// Response schemas, one per route. `None` marks columns present on the
// wire but not modeled.

pub const LOGIN_SCHEMA: &[Option<&str>] = &[
    Some("uid"),
    Some("status"),
    Some("country"),
    Some("phone_prefix"),
    Some("phone_number"),
    Some("state"),
];

pub const CHECK_SCHEMA: &[Option<&str>] = &[Some("status")];

pub const CONTROL_SCHEMA: &[Option<&str>] = &[
    Some("id"),
    Some("county"),
    Some("municipality"),
    Some("type"),
    Some("timestamp"),
    Some("description"),
    Some("lat"),
    Some("lng"),
    None,
    None,
    None,
    None,
    None,
    None,
    Some("last_seen"),
    Some("confirmed"),
];

pub const GPS_CONTROL_SCHEMA: &[Option<&str>] = &[
    Some("id"),
    Some("lat"),
    Some("lng"),
    Some("type"),
    Some("description"),
    Some("timestamp"),
];

pub const MAPS_SCHEMA: &[Option<&str>] = &[Some("id"), Some("name"), Some("description")];

pub const SETTINGS_SCHEMA: &[Option<&str>] = &[Some("key"), Some("value")];

pub const EXCHANGE_SCHEMA: &[Option<&str>] = &[Some("status"), Some("message")];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{classify_and_split, Outcome};
    use chrono::TimeZone;

    fn reference() -> DateTime<Local> {
        match Local.with_ymd_and_hms(2023, 5, 28, 12, 0, 0) {
            chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => dt,
            chrono::LocalResult::None => unreachable!(),
        }
    }

    const SAMPLE_ROW: &str = "14242|Trøndelag|Trondheim|Observasjon|21:04|Uniformert politibi\
|63.347522180959|10.3714974432077|NOT_IN_USE|trondheim.png|YES|trondheim.png\
|1685387059|0|53 year|0";

    #[test]
    fn test_control_from_wire_row() {
        let Outcome::Payload(records) = classify_and_split(SAMPLE_ROW, CONTROL_SCHEMA, false)
        else {
            panic!("expected payload");
        };
        let control = Control::from_fields(&records[0], reference()).unwrap();

        assert_eq!(control.id, 14242);
        assert_eq!(control.control_type, ControlType::Observation);
        assert_eq!(control.county, "Trøndelag");
        assert_eq!(control.municipality, "Trondheim");
        assert_eq!(control.description, "Uniformert politibi");
        assert!((control.lat - 63.347522180959).abs() < 1e-9);
        assert!((control.lng - 10.3714974432077).abs() < 1e-9);
        assert!(control.timestamp.is_some());
        // "53 year" is not a time; the field degrades to None
        assert!(control.last_seen.is_none());
        assert_eq!(control.confirmed, 0);
    }

    #[test]
    fn test_control_requires_id_and_position() {
        let mut fields = FieldMap::new();
        fields.insert("id".into(), "1".into());
        assert!(matches!(
            Control::from_fields(&fields, reference()),
            Err(ModelError::MissingField("lat"))
        ));

        fields.insert("lat".into(), "63.0".into());
        fields.insert("lng".into(), "not a number".into());
        assert!(matches!(
            Control::from_fields(&fields, reference()),
            Err(ModelError::InvalidField { field: "lng", .. })
        ));
    }

    #[test]
    fn test_unknown_control_type_degrades() {
        assert_eq!(ControlType::from_wire("Observasjon"), ControlType::Observation);
        assert_eq!(ControlType::from_wire("Romkontroll"), ControlType::Unknown);
    }

    #[test]
    fn test_description_truncation() {
        let mut control = control_at(0.0, 0.0);
        control.description = "short".into();
        assert_eq!(control.description_truncated(), "short");

        control.description = "en veldig lang beskrivelse av en kontroll".into();
        let truncated = control.description_truncated();
        assert_eq!(truncated.chars().count(), 27);
        assert!(truncated.ends_with(".."));
        assert_eq!(control.title(), format!("Ukjent: {truncated}"));
    }

    #[test]
    fn test_account_username_round_trip() {
        let account = Account::new("4747474747", "hunter2").unwrap();
        assert_eq!(account.phone_prefix, 47);
        assert_eq!(account.phone_number, 47474747);
        assert_eq!(account.country, "no");
        assert_eq!(account.username(), "4747474747");
        assert_eq!(account.state, AuthState::Unauthenticated);
    }

    #[test]
    fn test_account_bare_local_number_defaults_to_norway() {
        let account = Account::new("47474747", "pw").unwrap();
        assert_eq!(account.phone_prefix, 47);
        assert_eq!(account.country, "no");
    }

    #[test]
    fn test_account_swedish_prefix() {
        let account = Account::new("4612345678", "pw").unwrap();
        assert_eq!(account.phone_prefix, 46);
        assert_eq!(account.country, "se");
    }

    #[test]
    fn test_account_rejects_garbage_username() {
        assert!(Account::new("abc", "pw").is_err());
        assert!(Account::new("123", "pw").is_err());
        assert!(Account::new("", "pw").is_err());
    }

    #[test]
    fn test_credential_token_round_trip() {
        let creds = Credentials {
            username: "4747474747".into(),
            password: "hunter2".into(),
        };
        let token = creds.to_token();
        assert_eq!(Credentials::from_token(&token).unwrap(), creds);
        assert!(Credentials::from_token("!!!").is_err());
    }

    #[test]
    fn test_endpoint_capabilities() {
        assert!(!Endpoint::Login.needs_session());
        assert!(Endpoint::Login.sends_credentials());
        assert!(Endpoint::SpeedControls.needs_session());
        assert!(Endpoint::SendSms.sends_credentials());
        assert!(!Endpoint::SendSms.needs_session());
        assert!(!Endpoint::Register.sends_credentials());
    }

    pub(super) fn control_at(lat: f64, lng: f64) -> Control {
        Control {
            id: 1,
            control_type: ControlType::Unknown,
            county: String::new(),
            municipality: String::new(),
            description: String::new(),
            lat,
            lng,
            timestamp: None,
            last_seen: None,
            confirmed: 0,
        }
    }
}
