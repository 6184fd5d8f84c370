//! Response grammar for backend payloads.
//!
//! A response body is either a sentinel token (zero results, access denied,
//! or a backend fault) or a pseudo-CSV payload: records separated by `#`,
//! fields separated by `|`. Sentinel classification always runs before any
//! record parsing is attempted; the exact tokens are part of the wire
//! contract and must match byte-for-byte.

use std::collections::HashMap;

pub const NO_CONTROLS: &str = "INGEN_KONTROLLER";
pub const INGEN: &str = "INGEN";
pub const INGEN_PAAMELDTE_STEDER: &str = "INGEN_PAAMELDTE_STEDER";
pub const USER_NOT_AUTHORIZED: &str = "USER_NOT_AUTHORIZED";
pub const USER_NOT_AUTHORIZED_NOPREM: &str = "USER_NOT_AUTHORIZED_NOPREM";
pub const INVALID_AUTH: &str = "INVALID_AUTH";
pub const ERR: &str = "ERR";

const NO_CONTENT_RESPONSES: [&str; 3] = [NO_CONTROLS, INGEN, INGEN_PAAMELDTE_STEDER];
const ERROR_RESPONSES: [&str; 1] = [ERR];

/// Separator between records in a multi-record body.
pub const RECORD_SEPARATOR: char = '#';
/// Separator between fields within a record.
pub const FIELD_SEPARATOR: char = '|';

/// One parsed record: raw string values keyed by schema field name.
pub type FieldMap = HashMap<String, String>;

/// Why the backend refused access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    NotAuthorized,
    NoPremium,
    InvalidCredentials,
}

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessDenied::NotAuthorized => write!(f, "user not authorized"),
            AccessDenied::NoPremium => write!(f, "user not authorized (no premium)"),
            AccessDenied::InvalidCredentials => write!(f, "invalid credentials"),
        }
    }
}

/// Classification of one response body, evaluated exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Parsed records, in body order
    Payload(Vec<FieldMap>),
    /// Zero results; not an error
    NoContent,
    /// Authorization failure; never retried
    NoAccess(AccessDenied),
    /// Backend-reported generic error
    Failure,
}

/// Sentinel check on a trimmed body, without record parsing.
///
/// Returns `None` when the body is not a sentinel and should be handed to
/// the record grammar (or passed through verbatim).
pub fn classify(trimmed: &str) -> Option<Outcome> {
    if trimmed.is_empty() || NO_CONTENT_RESPONSES.contains(&trimmed) {
        return Some(Outcome::NoContent);
    }
    let denied = match trimmed {
        USER_NOT_AUTHORIZED => Some(AccessDenied::NotAuthorized),
        USER_NOT_AUTHORIZED_NOPREM => Some(AccessDenied::NoPremium),
        INVALID_AUTH => Some(AccessDenied::InvalidCredentials),
        _ => None,
    };
    if let Some(reason) = denied {
        return Some(Outcome::NoAccess(reason));
    }
    if ERROR_RESPONSES.contains(&trimmed) {
        return Some(Outcome::Failure);
    }
    None
}

/// Classify a body and split it into records against a schema.
///
/// The schema is the endpoint's ordered column list; a `None` entry skips
/// that column. Rows shorter than the schema simply omit the trailing
/// fields; schemas drift between backend samples, so a column-count
/// mismatch is never an error.
pub fn classify_and_split(
    body: &str,
    schema: &[Option<&str>],
    expect_multiple: bool,
) -> Outcome {
    let trimmed = body.trim();
    if let Some(outcome) = classify(trimmed) {
        return outcome;
    }

    let rows: Vec<&str> = if expect_multiple {
        trimmed.split(RECORD_SEPARATOR).collect()
    } else {
        vec![trimmed]
    };

    Outcome::Payload(rows.iter().map(|row| map_row(row, schema)).collect())
}

fn map_row(row: &str, schema: &[Option<&str>]) -> FieldMap {
    schema
        .iter()
        .zip(row.split(FIELD_SEPARATOR))
        .filter_map(|(key, value)| key.map(|k| (k.to_string(), value.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &[Option<&str>] = &[Some("id"), Some("county"), None, Some("name")];

    #[test]
    fn test_sentinel_checked_before_parsing() {
        // A no-content token with expect_multiple must yield NoContent,
        // never a parse attempt on the token itself.
        assert_eq!(
            classify_and_split(NO_CONTROLS, SCHEMA, true),
            Outcome::NoContent
        );
        assert_eq!(classify_and_split(INGEN, SCHEMA, false), Outcome::NoContent);
        assert_eq!(
            classify_and_split("INGEN_PAAMELDTE_STEDER\n", SCHEMA, true),
            Outcome::NoContent
        );
    }

    #[test]
    fn test_no_access_variants() {
        assert_eq!(
            classify_and_split(USER_NOT_AUTHORIZED, SCHEMA, true),
            Outcome::NoAccess(AccessDenied::NotAuthorized)
        );
        assert_eq!(
            classify_and_split(USER_NOT_AUTHORIZED_NOPREM, SCHEMA, true),
            Outcome::NoAccess(AccessDenied::NoPremium)
        );
        assert_eq!(
            classify_and_split(INVALID_AUTH, SCHEMA, false),
            Outcome::NoAccess(AccessDenied::InvalidCredentials)
        );
    }

    #[test]
    fn test_generic_error() {
        assert_eq!(classify_and_split(ERR, SCHEMA, true), Outcome::Failure);
    }

    #[test]
    fn test_empty_body_is_no_content() {
        assert_eq!(classify_and_split("", SCHEMA, true), Outcome::NoContent);
        assert_eq!(classify_and_split("  \n", SCHEMA, false), Outcome::NoContent);
    }

    #[test]
    fn test_single_record_mapping() {
        let outcome = classify_and_split("14242|Trøndelag|skipme|Trondheim", SCHEMA, false);
        let Outcome::Payload(records) = outcome else {
            panic!("expected payload");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "14242");
        assert_eq!(records[0]["county"], "Trøndelag");
        assert_eq!(records[0]["name"], "Trondheim");
        assert!(!records[0].contains_key("skipme"));
    }

    #[test]
    fn test_multiple_records_split_on_hash() {
        let outcome = classify_and_split("1|a|x|b#2|c|y|d", SCHEMA, true);
        let Outcome::Payload(records) = outcome else {
            panic!("expected payload");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "1");
        assert_eq!(records[1]["id"], "2");
        assert_eq!(records[1]["name"], "d");
    }

    #[test]
    fn test_short_row_omits_trailing_fields() {
        let outcome = classify_and_split("14242|Trøndelag", SCHEMA, false);
        let Outcome::Payload(records) = outcome else {
            panic!("expected payload");
        };
        assert_eq!(records[0]["id"], "14242");
        assert!(!records[0].contains_key("name"));
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let outcome = classify_and_split("1|a|x|b|surplus|more", SCHEMA, false);
        let Outcome::Payload(records) = outcome else {
            panic!("expected payload");
        };
        assert_eq!(records[0].len(), 3);
    }

    #[test]
    fn test_empty_fields_are_kept() {
        let outcome = classify_and_split("1||x|", SCHEMA, false);
        let Outcome::Payload(records) = outcome else {
            panic!("expected payload");
        };
        assert_eq!(records[0]["county"], "");
        assert_eq!(records[0]["name"], "");
    }
}
