//! Query parameter assembly for backend requests.
//!
//! Every request carries a handful of client-generated values alongside the
//! business parameters: an anti-cache token (`bac`), a shifted unix
//! timestamp (`z`), the client version and OS tag, and a trailing token
//! (`tt`). The assembled pair list is urlencoded and then encrypted by the
//! [`crate::crypto`] codec before it goes on the wire.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Version string reported as the `version` parameter.
pub const CLIENT_VERSION: &str = "9.1.0";
/// OS tag reported as the `os` parameter.
pub const CLIENT_OS: &str = "Android";

/// Keys the assembler owns; caller-supplied entries under these names are
/// dropped rather than merged.
const RESERVED_KEYS: [&str; 5] = ["bac", "z", "version", "os", "tt"];

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DEVICE_ID_ALPHABET: &[u8] = b"0123456789abcdef";

/// Unix timestamp the backend expects: current time shifted 10 seconds
/// ahead.
pub fn wire_timestamp() -> i64 {
    Utc::now().timestamp() + 10
}

/// Replace the response grammar's delimiter and escape characters with a
/// hyphen. Applied to assembler-controlled values only; leaking `|`, `#`,
/// `\` or `"` into them would corrupt framing on echo-back endpoints.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '|' | '#' | '\\' | '"' => '-',
            other => other,
        })
        .collect()
}

/// Generator for the randomized query tokens.
///
/// Owns its RNG so tests can seed it for deterministic tokens instead of
/// reaching into global randomness.
pub struct QueryBuilder {
    rng: Mutex<StdRng>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Builder with a fixed seed, for deterministic tokens in tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn random_string(&self, len: usize, alphabet: &[u8]) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        (0..len)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }

    /// 10-character anti-cache token.
    pub fn bac_token(&self) -> String {
        self.random_string(10, TOKEN_ALPHABET)
    }

    /// 5-character trailing token.
    pub fn tt_token(&self) -> String {
        self.random_string(5, TOKEN_ALPHABET)
    }

    /// 16-character lowercase hex device identifier.
    pub fn device_id(&self) -> String {
        self.random_string(16, DEVICE_ID_ALPHABET)
    }

    /// Assemble the full ordered parameter list for one request.
    ///
    /// Injects `bac`, `z`, `version` and `os` up front, then the caller's
    /// parameters, then `tt` last. The five injected values are sanitized;
    /// caller values pass through untouched.
    pub fn build(&self, params: &[(String, String)]) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = vec![
            ("bac".into(), sanitize(&self.bac_token())),
            ("z".into(), sanitize(&wire_timestamp().to_string())),
            ("version".into(), sanitize(CLIENT_VERSION)),
            ("os".into(), sanitize(CLIENT_OS)),
        ];
        query.extend(
            params
                .iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .cloned(),
        );
        query.push(("tt".into(), sanitize(&self.tt_token())));
        query
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Urlencode an ordered pair list into the plaintext query string handed to
/// the codec.
pub fn encode_form(pairs: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}
