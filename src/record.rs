//! Cache record codec and expiry rules

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit stored in all three tiers.
///
/// On disk this serializes to the stable format consumed by recovery:
/// `{"key":…,"data":…,"type":…,"timestamp":…,"ttl":…}` with `ttl`
/// omitted when zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
  pub key: String,
  pub data: Value,
  /// Shape of the caller's value at write time (advisory, never dispatched on)
  #[serde(rename = "type")]
  pub type_tag: String,
  /// Seconds since the epoch, assigned at set time
  pub timestamp: i64,
  /// TTL in seconds; 0 = never expires
  #[serde(default, skip_serializing_if = "ttl_is_zero")]
  pub ttl: i64,
}

fn ttl_is_zero(ttl: &i64) -> bool {
  *ttl == 0
}

impl CacheRecord {
  pub fn new(key: impl Into<String>, data: Value, ttl_seconds: u64) -> Self {
    let type_tag = value_shape(&data).to_string();
    Self {
      key: key.into(),
      data,
      type_tag,
      timestamp: Utc::now().timestamp(),
      ttl: ttl_seconds as i64,
    }
  }

  /// Rebuild a record from the raw value a remote GET returned.
  ///
  /// The remote stores values with their enclosing quotes stripped, so a
  /// plain string comes back unparsable as JSON and is kept verbatim. The
  /// remote owns expiry for these entries; the local copy never expires
  /// on its own.
  pub fn from_remote(key: impl Into<String>, raw: String) -> Self {
    let data = match serde_json::from_str::<Value>(&raw) {
      Ok(value) => value,
      Err(_) => Value::String(raw),
    };
    Self::new(key, data, 0)
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now().timestamp())
  }

  pub fn is_expired_at(&self, now: i64) -> bool {
    self.ttl > 0 && now > self.timestamp + self.ttl
  }

  /// Seconds until expiry at `now`; `None` when the record never expires.
  /// Zero or negative means the record is already at (or past) its deadline.
  pub fn remaining_ttl(&self, now: i64) -> Option<i64> {
    if self.ttl > 0 {
      Some(self.timestamp + self.ttl - now)
    } else {
      None
    }
  }
}

/// Describe a JSON value's shape for the record's advisory type tag.
pub fn value_shape(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
    Value::Number(_) => "float",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
