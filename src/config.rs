//! The on-device configuration map.
//!
//! Device configuration is an arbitrary string-keyed map of small typed
//! values. We model it as a tagged-value map rather than coercing
//! everything to strings, so that `update_config` round-trips through
//! MessagePack faithfully and an unrecognized wire type surfaces as a
//! decode error instead of being silently reinterpreted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::{Error, Result};

/// The reserved node-identity key. `update_config` must never carry it;
/// changing a node's ID requires a separate, out-of-scope maintenance
/// tool.
pub const RESERVED_ID_KEY: &str = "ID";

/// A single config value as seen on the wire.
///
/// `#[serde(untagged)]` makes (de)serialization type-driven: MessagePack
/// integers, booleans, byte strings and UTF-8 strings map onto the
/// matching variant, and anything else (floats, nil, nested
/// maps/arrays) fails to deserialize into any variant, which surfaces as
/// [`Error::Decode`] rather than being coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Bool(bool),
    Bytes(ByteBuf),
    Text(String),
}

impl ConfigValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConfigValue::Int(v) => serde_json::Value::from(*v),
            ConfigValue::Bool(v) => serde_json::Value::from(*v),
            ConfigValue::Bytes(v) => serde_json::Value::from(hex_encode(v)),
            ConfigValue::Text(v) => serde_json::Value::from(v.clone()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(ConfigValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Ok(ConfigValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(ConfigValue::Int)
                .ok_or_else(|| Error::Json(json_error(format!(
                    "config value {n} is not a representable integer"
                )))),
            other => Err(Error::Json(json_error(format!(
                "unsupported config value: {other}"
            )))),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn json_error(msg: impl std::fmt::Display) -> serde_json::Error {
    use serde::de::Error as _;
    serde_json::Error::custom(msg)
}

/// A device configuration map, ordered by key for stable JSON output
/// (mirrors the reference client's `json.dumps(..., sort_keys=True)`).
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Parse a JSON object (as produced by `canboot-write-config`'s input
/// file) into a [`ConfigMap`], rejecting the reserved `ID` key before any
/// network I/O takes place.
pub fn config_from_json(json: &serde_json::Value) -> Result<ConfigMap> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::Json(json_error("config file must be a JSON object")))?;

    if object.contains_key(RESERVED_ID_KEY) {
        return Err(Error::ReservedConfigKey);
    }

    object
        .iter()
        .map(|(k, v)| Ok((k.clone(), ConfigValue::from_json(v)?)))
        .collect()
}

/// Render a [`ConfigMap`] as a `serde_json::Value`, for CLI output.
pub fn config_to_json(config: &ConfigMap) -> serde_json::Value {
    serde_json::Value::Object(
        config
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}
