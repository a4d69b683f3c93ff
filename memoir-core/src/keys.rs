//! Key derivation for the two-tier key scheme.
//!
//! A [`MasterKey`] names everything cached for one entity; it is derived from
//! the entity's type and identity only. A [`MethodKey`] names one cached call
//! and is derived from the master key, the method name, the canonical form of
//! the call arguments and, optionally, the entity's last-modified marker.
//!
//! Both keys are SHA-256 digests rendered as hex, so they have a fixed length
//! regardless of how large the arguments are.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::digest_hex;
use crate::{EntityId, KeyError, Timestamp};

/// Domain tags keep master and method digests in disjoint spaces.
const MASTER_TAG: &[u8] = b"memoir.master.v1";
const METHOD_TAG: &[u8] = b"memoir.method.v1";

/// Separator between an optional namespace prefix and the digest.
const PREFIX_SEPARATOR: char = ':';

// ============================================================================
// CALL ARGUMENTS
// ============================================================================

/// Canonicalizable call arguments.
///
/// Every argument is stored as a `[type, value]` pair at insertion time,
/// where `type` is the Rust type name and `value` the `serde_json` encoding.
/// Computations read arguments back with [`CallArgs::get`] and
/// [`CallArgs::get_kwarg`].
/// Two arguments that render to the same JSON but come from different types
/// (`1u32` and `1.0f64`, `"1"` and `1`) therefore never produce the same key.
///
/// Keyword arguments are kept sorted by name, so insertion order is irrelevant.
/// Before canonicalization every scalar, at any depth, is wrapped in a
/// one-field object naming its kind, and numbers keep their exact decimal
/// text: `1` becomes `{"n":"1"}` while `"1"` becomes `{"s":"1"}`. JCS alone
/// would round numbers through `f64` and let large distinct integers collide.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    /// Empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, KeyError> {
        self.push(value)?;
        Ok(self)
    }

    /// Add a keyword argument. A repeated name replaces the earlier value.
    pub fn kwarg<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, KeyError> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Append a positional argument in place.
    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        let index = self.positional.len();
        let encoded = encode_typed(&index.to_string(), value)?;
        self.positional.push(encoded);
        Ok(())
    }

    /// Add a keyword argument in place.
    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), KeyError> {
        let name = name.into();
        let encoded = encode_typed(&name, value)?;
        self.keyword.insert(name, encoded);
        Ok(())
    }

    /// Positional arguments in call order.
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Keyword arguments sorted by name.
    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    /// Decode positional argument `index` back into `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        decode_typed(self.positional.get(index)?)
    }

    /// Decode keyword argument `name` back into `T`.
    pub fn get_kwarg<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        decode_typed(self.keyword.get(name)?)
    }

    /// True when there are no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// RFC 8785 (JCS) canonical bytes of the full argument set.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, KeyError> {
        let exact = CallArgs {
            positional: self.positional.iter().map(tag_scalars).collect(),
            keyword: self
                .keyword
                .iter()
                .map(|(name, value)| (name.clone(), tag_scalars(value)))
                .collect(),
        };
        serde_json_canonicalizer::to_vec(&exact).map_err(|e| KeyError::Argument {
            name: "*".to_string(),
            reason: e.to_string(),
        })
    }
}

fn encode_typed<T: Serialize + ?Sized>(name: &str, value: &T) -> Result<Value, KeyError> {
    let encoded = serde_json::to_value(value).map_err(|e| KeyError::Argument {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Value::Array(vec![
        Value::String(std::any::type_name::<T>().to_string()),
        encoded,
    ]))
}

fn decode_typed<T: DeserializeOwned>(encoded: &Value) -> Option<T> {
    T::deserialize(encoded.get(1)?).ok()
}

/// Wrap each scalar as `{kind: raw}`.
///
/// After tagging, every array element and object member is itself an array
/// or object, so a tagged scalar (whose member is a bare scalar) can never
/// equal the encoding of any other value.
fn tag_scalars(value: &Value) -> Value {
    fn tagged(kind: &str, raw: Value) -> Value {
        let mut map = serde_json::Map::with_capacity(1);
        map.insert(kind.to_string(), raw);
        Value::Object(map)
    }

    match value {
        Value::Null => tagged("z", Value::Null),
        Value::Bool(b) => tagged("b", Value::Bool(*b)),
        Value::Number(n) => tagged("n", Value::String(n.to_string())),
        Value::String(s) => tagged("s", Value::String(s.clone())),
        Value::Array(items) => Value::Array(items.iter().map(tag_scalars).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), tag_scalars(v)))
                .collect(),
        ),
    }
}

// ============================================================================
// KEYS
// ============================================================================

/// Key under which the list of live method keys for one entity is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasterKey(String);

impl MasterKey {
    /// The key as stored in the backend.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key under which one cached method result is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodKey(String);

impl MethodKey {
    /// The key as stored in the backend.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the backend key string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn with_prefix(prefix: Option<&str>, digest: String) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{PREFIX_SEPARATOR}{digest}"),
        None => digest,
    }
}

/// Derive the master key for an entity.
///
/// Fails with [`KeyError::Unidentified`] when the entity has not been
/// persisted; callers must treat that as "not cacheable".
pub fn derive_master_key(
    entity_type: &str,
    entity_id: Option<EntityId>,
) -> Result<MasterKey, KeyError> {
    KeyDeriver::new().master_key(entity_type, entity_id)
}

/// Derive the method key for one call on an entity.
pub fn derive_method_key(
    master: &MasterKey,
    method_name: &str,
    args: &CallArgs,
    last_modified: Option<Timestamp>,
) -> Result<MethodKey, KeyError> {
    KeyDeriver::new().method_key(master, method_name, args, last_modified)
}

/// Key derivation with an optional namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDeriver {
    prefix: Option<String>,
}

impl KeyDeriver {
    /// Deriver without a namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deriver that prepends `prefix:` to every key.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// The configured namespace, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// See [`derive_master_key`].
    pub fn master_key(
        &self,
        entity_type: &str,
        entity_id: Option<EntityId>,
    ) -> Result<MasterKey, KeyError> {
        let entity_id = entity_id.ok_or_else(|| KeyError::Unidentified {
            entity_type: entity_type.to_string(),
        })?;
        let digest = digest_hex(&[MASTER_TAG, entity_type.as_bytes(), entity_id.as_bytes()]);
        Ok(MasterKey(with_prefix(self.prefix(), digest)))
    }

    /// See [`derive_method_key`].
    pub fn method_key(
        &self,
        master: &MasterKey,
        method_name: &str,
        args: &CallArgs,
        last_modified: Option<Timestamp>,
    ) -> Result<MethodKey, KeyError> {
        let canonical_args = args.canonical_bytes()?;
        // Presence byte first so "no marker" can never equal any marker value.
        let marker = match last_modified {
            Some(ts) => {
                let mut bytes = vec![1u8];
                bytes.extend_from_slice(ts.to_rfc3339().as_bytes());
                bytes
            }
            None => vec![0u8],
        };
        let digest = digest_hex(&[
            METHOD_TAG,
            master.as_str().as_bytes(),
            method_name.as_bytes(),
            &canonical_args,
            &marker,
        ]);
        Ok(MethodKey(with_prefix(self.prefix(), digest)))
    }
}
