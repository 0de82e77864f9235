//! Query signatures and their content-addressed cache keys.
//!
//! A [`QuerySignature`] is everything that determines a model's answer:
//! model id, sampling parameters and the rendered messages. Its
//! [`CacheKey`] is a SHA-256 digest of a canonical JSON encoding in which
//! object keys are sorted, so the key is stable across processes and
//! independent of any map ordering serde_json happens to be built with.
//!
//! Keys are only used to narrow a lookup. Stores always confirm a hit by
//! comparing full signatures.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{QueryError, Result};

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub seed: u64,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            seed: 10000,
            max_tokens: 1000,
        }
    }
}

/// One message of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// The canonical, hashable description of a query.
///
/// Immutable once built; two signatures are the same query iff they are
/// structurally equal. Temperatures compare bitwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySignature {
    model: String,
    temperature: f32,
    seed: u64,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

impl QuerySignature {
    /// Build a signature for a system + user message pair.
    pub fn new(
        model: impl Into<String>,
        params: SamplingParams,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            temperature: params.temperature,
            seed: params.seed,
            max_tokens: params.max_tokens,
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ],
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Reject signatures that cannot be cached: a non-finite temperature
    /// has no JSON encoding.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() {
            return Err(QueryError::Config(format!(
                "temperature must be finite, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    pub fn params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            seed: self.seed,
            max_tokens: self.max_tokens,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Content of the first message with the given role.
    pub fn message(&self, role: &str) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
    }

    /// Content-addressed key of this signature.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::of(self)
    }

    /// Canonical JSON encoding (sorted object keys, no whitespace).
    pub fn canonical_json(&self) -> String {
        // Serializing plain strings and numbers cannot fail.
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        canonical_json(&value)
    }

    /// Encoding persisted next to cache entries.
    pub fn to_json(&self) -> String {
        self.canonical_json()
    }

    /// Decode a persisted signature.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl PartialEq for QuerySignature {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
            && self.temperature.to_bits() == other.temperature.to_bits()
            && self.seed == other.seed
            && self.max_tokens == other.max_tokens
            && self.messages == other.messages
    }
}

impl Eq for QuerySignature {}

/// Fixed-length hex digest of a [`QuerySignature`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash a signature's canonical encoding with SHA-256.
    pub fn of(signature: &QuerySignature) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(signature.canonical_json().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an existing digest (e.g. one read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a JSON value with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
