// lib.rs — Station protocol: wire frames, packet model, HMAC challenge/response

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

// =============================== Common =====================================

pub type Timestamp = DateTime<Utc>;

pub const MAX_FRAME_SIZE: usize = 1024 * 1024; // 1MB
pub const DEFAULT_STATION_PORT: u16 = 7891;
pub const DEFAULT_OBSERVER_PORT: u16 = 7892;

/// Random bytes per challenge (hex-encoded on the wire, so twice as many chars).
pub const CHALLENGE_BYTES: usize = 256;
/// Bounds for a configured challenge length. The upper bound leaves room for
/// the event envelope so the hex-encoded challenge always fits one frame.
pub const MIN_CHALLENGE_BYTES: usize = 32;
pub const MAX_CHALLENGE_BYTES: usize = (MAX_FRAME_SIZE - 1024) / 2;
/// Hex characters of the content hash echoed back in confirmations.
pub const FINGERPRINT_LEN: usize = 6;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("frame decode: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("frame too large: {0} bytes")]
    Oversized(usize),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

// =============================== Events =====================================

/// Event names. Station namespace first, observer namespace last.
pub mod events {
    pub const AUTH_INITIATE: &str = "auth-initiate";
    pub const AUTH_CHALLENGE: &str = "auth-challenge";
    pub const AUTH_PASS: &str = "auth-pass";
    pub const AUTH_FAIL: &str = "auth-fail";
    pub const DESCRIPTOR_REQUEST: &str = "descriptor-request";
    pub const TAP: &str = "tap";
    pub const INFO: &str = "info";
    pub const CAP: &str = "cap";

    pub const JOIN_MID: &str = "join-mid";
    pub const NEW_TAP: &str = "new-tap";
}

// ================================ Frames ====================================

/// One length-prefixed JSON message.
///
/// An `Event` carrying an `id` expects exactly one `Ack` with the same id
/// from the peer on the same connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Ack {
        ack: u64,
        #[serde(default)]
        data: Value,
    },
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(default)]
        data: Value,
    },
}

/// Codec both peers frame with: `[length (u32 BE)] [json(Frame)]`, bodies
/// capped at `MAX_FRAME_SIZE`.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

impl Frame {
    pub fn event(name: &str, data: Value) -> Self {
        Frame::Event { event: name.to_string(), id: None, data }
    }

    pub fn request(name: &str, id: u64, data: Value) -> Self {
        Frame::Event { event: name.to_string(), id: Some(id), data }
    }

    pub fn ack(id: u64, data: Value) -> Self {
        Frame::Ack { ack: id, data }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = serde_json::to_vec(self).map_err(ProtocolError::Encode)?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::Oversized(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn from_slice(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::Oversized(buf.len()));
        }
        serde_json::from_slice(buf).map_err(ProtocolError::Decode)
    }
}

// ============================== Challenge ===================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlg {
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerEncoding {
    Base64,
}

/// Handshake challenge. Generated per connection and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub alg: HashAlg,
    pub enc: AnswerEncoding,
    /// Lowercase hex of the random bytes. The hex text itself is the MAC input.
    pub data: String,
}

impl Challenge {
    /// Fresh challenge of `CHALLENGE_BYTES` random bytes.
    pub fn new() -> Self {
        Self::with_len(CHALLENGE_BYTES)
    }

    pub fn with_len(len: usize) -> Self {
        let mut raw = vec![0u8; len];
        rand::rng().fill_bytes(&mut raw);
        Self {
            alg: HashAlg::Sha512,
            enc: AnswerEncoding::Base64,
            data: hex::encode(raw),
        }
    }

    /// Answer a station holding `secret` would send back.
    pub fn answer(&self, secret: &[u8]) -> String {
        compute_answer(secret, &self.data)
    }

    pub fn verify(&self, secret: &[u8], candidate: &str) -> bool {
        verify(secret, &self.data, candidate)
    }
}

impl Default for Challenge {
    fn default() -> Self {
        Self::new()
    }
}

/// base64(HMAC-SHA512(secret, challenge_data))
pub fn compute_answer(secret: &[u8], challenge_data: &str) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail here.
    let mut mac = match HmacSha512::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(challenge_data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of `candidate` against the expected answer.
pub fn verify(secret: &[u8], challenge_data: &str, candidate: &str) -> bool {
    let expected = compute_answer(secret, challenge_data);
    ct_eq_str(&expected, candidate)
}

pub fn ct_eq_str(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

// =============================== Packets ====================================

/// TAP header. `t` selects the packet collection, `mid` the mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapHeader {
    pub t: String,
    pub mid: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Telemetry access packet as submitted by a ground station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPacket {
    pub h: TapHeader,
    #[serde(default)]
    pub p: Value,
}

impl TelemetryPacket {
    pub fn from_value(v: &Value) -> Result<Self, ProtocolError> {
        let pkt: TelemetryPacket = serde_json::from_value(v.clone())
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if !valid_tag(&pkt.h.t) {
            return Err(ProtocolError::Malformed(format!("bad type tag {:?}", pkt.h.t)));
        }
        if pkt.h.mid.is_empty() {
            return Err(ProtocolError::Malformed("empty mission id".into()));
        }
        Ok(pkt)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Dedup key: hash of the canonical (header, payload) encoding.
    pub fn unique_key(&self) -> String {
        let v = canonical(&self.to_value());
        hex::encode(Sha256::digest(v.to_string().as_bytes()))
    }
}

/// Header + payload pair handed to a peer with storage metadata stripped.
/// Used for command deliveries (`cap`) and descriptor listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub h: Value,
    pub p: Value,
}

/// Observer notification on the mission topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTap {
    pub id: String,
    pub t: String,
    pub mid: String,
}

/// Type tags and mission ids: non-empty, no whitespace or control chars.
pub fn valid_tag(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

// ============================ Confirmations =================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmStatus {
    Logged { id: String },
    AlreadyLogged,
    TypeUnknown,
    NotSaved,
    Rejected,
}

impl std::fmt::Display for ConfirmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfirmStatus::Logged { id } => write!(f, "logged {id}"),
            ConfirmStatus::AlreadyLogged => f.write_str("already logged"),
            ConfirmStatus::TypeUnknown => f.write_str("type unknown"),
            ConfirmStatus::NotSaved => f.write_str("not saved"),
            ConfirmStatus::Rejected => f.write_str("rejected"),
        }
    }
}

/// What the submitter gets back instead of its packet: fingerprint + status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub fingerprint: String,
    pub status: ConfirmStatus,
}

impl Confirmation {
    pub fn new(submitted: &Value, status: ConfirmStatus) -> Self {
        Self { fingerprint: fingerprint(submitted), status }
    }
}

impl std::fmt::Display for Confirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.fingerprint, self.status)
    }
}

/// First `FINGERPRINT_LEN` hex chars of SHA-256 over the canonical JSON.
pub fn fingerprint(v: &Value) -> String {
    let digest = Sha256::digest(canonical(v).to_string().as_bytes());
    let mut fp = hex::encode(digest);
    fp.truncate(FINGERPRINT_LEN);
    fp
}

/// Rebuild objects with sorted keys so encoding does not depend on map order.
fn canonical(v: &Value) -> Value {
    match v {
        Value::Object(m) => {
            let mut keys: Vec<&String> = m.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonical(&m[k]));
            }
            Value::Object(out)
        }
        Value::Array(a) => Value::Array(a.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

// ================================ Tests =====================================
