//! Component identity model.
//!
//! A component is the timeline-side representation of a host entity. Its
//! identity is the pair `(model_type, identifier)`:
//!
//! - `model_type` is the stable name an entity reports for its type
//!   (for example `"user"`). It must be non-empty and free of NUL bytes.
//! - `identifier` is the canonical encoding of the entity's key.
//!
//! # Identifier encoding
//!
//! A key is encoded as its escaped parts joined with `:`, with `\`
//! escaped as `\\` and `:` as `\:` inside each part first; a scalar key
//! is a one-part composite. Scalars without separator bytes therefore
//! keep their display form (`5`, `"alice"`, a hyphenated uuid). The
//! encoding is injective: distinct key vectors never collide,
//! `["a:b", "c"]` differs from `["a", "b:c"]`, and a scalar can only
//! ever coincide with the one-part composite of the same value.

use crate::error::{ChronicleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Entity keys
// ---------------------------------------------------------------------------

/// One part of an entity key as reported by an identity source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(n) => write!(f, "{n}"),
            KeyPart::Uuid(u) => write!(f, "{u}"),
            KeyPart::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

impl From<Uuid> for KeyPart {
    fn from(u: Uuid) -> Self {
        KeyPart::Uuid(u)
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Text(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Text(s)
    }
}

/// An entity key: a single scalar or an ordered composite of scalars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Scalar(KeyPart),
    Composite(Vec<KeyPart>),
}

impl EntityKey {
    pub fn of(part: impl Into<KeyPart>) -> Self {
        EntityKey::Scalar(part.into())
    }

    pub fn composite(parts: Vec<KeyPart>) -> Self {
        EntityKey::Composite(parts)
    }
}

impl<P: Into<KeyPart>> From<P> for EntityKey {
    fn from(part: P) -> Self {
        EntityKey::Scalar(part.into())
    }
}

// ---------------------------------------------------------------------------
// Canonical identifiers
// ---------------------------------------------------------------------------

/// Canonical string encoding of an [`EntityKey`].
///
/// Equality on identifiers is equality on the encoded form, so
/// `KeyPart::Int(5)` and `KeyPart::Text("5")` name the same component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn encode(key: &EntityKey) -> Self {
        let parts = match key {
            EntityKey::Scalar(part) => std::slice::from_ref(part),
            EntityKey::Composite(parts) => parts.as_slice(),
        };
        let encoded: Vec<String> = parts
            .iter()
            .map(|p| p.to_string().replace('\\', "\\\\").replace(':', "\\:"))
            .collect();
        Identifier(encoded.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier(s)
    }
}

// ---------------------------------------------------------------------------
// Component keys and rows
// ---------------------------------------------------------------------------

/// Unique key of a component row: `(model_type, identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    pub model_type: String,
    pub identifier: Identifier,
}

impl ComponentKey {
    pub fn new(model_type: impl Into<String>, identifier: impl Into<Identifier>) -> Self {
        Self {
            model_type: model_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Byte form for ordered storage backends: model type, a NUL
    /// separator, then the identifier. `model_type` never contains NUL,
    /// so the layout is unambiguous and sorts components by type first.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.model_type.len() + 1 + self.identifier.as_str().len());
        key.extend_from_slice(self.model_type.as_bytes());
        key.push(0);
        key.extend_from_slice(self.identifier.as_str().as_bytes());
        key
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model_type, self.identifier)
    }
}

/// Resolved identity of an entity, ready to persist. Construction
/// validates the invariants every component row must hold.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedComponentData {
    pub model_type: String,
    pub identifier: Identifier,
    pub data: Option<Value>,
}

impl ResolvedComponentData {
    pub fn new(
        model_type: impl Into<String>,
        identifier: Identifier,
        data: Option<Value>,
    ) -> Result<Self> {
        let model_type = model_type.into();
        if model_type.is_empty() || model_type.contains('\0') {
            return Err(ChronicleError::InvalidModelType(model_type));
        }
        if identifier.is_empty() {
            return Err(ChronicleError::EmptyIdentifier { model_type });
        }
        Ok(Self {
            model_type,
            identifier,
            data,
        })
    }

    pub fn key(&self) -> ComponentKey {
        ComponentKey {
            model_type: self.model_type.clone(),
            identifier: self.identifier.clone(),
        }
    }
}

/// A stored component row.
///
/// Rows are immutable after creation except for `data`, which an explicit
/// refresh may overwrite with a newer snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub model_type: String,
    pub identifier: Identifier,
    /// Denormalized snapshot of the entity at capture time. Read paths
    /// fall back to it when the live entity is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Component {
    pub fn from_resolved(resolved: ResolvedComponentData) -> Self {
        Self {
            model_type: resolved.model_type,
            identifier: resolved.identifier,
            data: resolved.data,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ComponentKey {
        ComponentKey {
            model_type: self.model_type.clone(),
            identifier: self.identifier.clone(),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model_type, self.identifier)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_keys_encode_as_display_form() {
        assert_eq!(Identifier::encode(&EntityKey::of(5i64)).as_str(), "5");
        assert_eq!(Identifier::encode(&EntityKey::of("alice")).as_str(), "alice");
        let u = Uuid::new_v4();
        assert_eq!(
            Identifier::encode(&EntityKey::of(u)).as_str(),
            u.to_string()
        );
    }

    #[test]
    fn int_and_text_of_same_digits_are_one_identity() {
        let by_int = Identifier::encode(&EntityKey::of(5i64));
        let by_text = Identifier::encode(&EntityKey::of("5"));
        assert_eq!(by_int, by_text);
    }

    #[test]
    fn composite_encoding_is_order_stable() {
        let ab = Identifier::encode(&EntityKey::composite(vec!["a".into(), "b".into()]));
        let ba = Identifier::encode(&EntityKey::composite(vec!["b".into(), "a".into()]));
        assert_eq!(ab.as_str(), "a:b");
        assert_ne!(ab, ba);
    }

    #[test]
    fn composite_encoding_escapes_separator_bytes() {
        let split_late = Identifier::encode(&EntityKey::composite(vec!["a:b".into(), "c".into()]));
        let split_early = Identifier::encode(&EntityKey::composite(vec!["a".into(), "b:c".into()]));
        assert_eq!(split_late.as_str(), "a\\:b:c");
        assert_eq!(split_early.as_str(), "a:b\\:c");
        assert_ne!(split_late, split_early);

        let backslash = Identifier::encode(&EntityKey::composite(vec!["a\\".into(), "b".into()]));
        assert_eq!(backslash.as_str(), "a\\\\:b");
    }

    #[test]
    fn scalar_separator_bytes_are_escaped() {
        // A scalar containing the join byte is a one-part composite, not
        // a two-part one.
        let scalar = Identifier::encode(&EntityKey::of("a:b"));
        assert_eq!(scalar.as_str(), "a\\:b");
        assert_eq!(
            scalar,
            Identifier::encode(&EntityKey::composite(vec!["a:b".into()]))
        );
        assert_ne!(
            scalar,
            Identifier::encode(&EntityKey::composite(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn storage_key_separates_model_type_with_nul() {
        let key = ComponentKey::new("user", "5");
        assert_eq!(key.storage_key(), b"user\x005".to_vec());
    }

    #[test]
    fn resolved_data_rejects_invalid_model_types() {
        let id = Identifier::from("5");
        assert!(matches!(
            ResolvedComponentData::new("", id.clone(), None),
            Err(ChronicleError::InvalidModelType(_))
        ));
        assert!(matches!(
            ResolvedComponentData::new("us\0er", id, None),
            Err(ChronicleError::InvalidModelType(_))
        ));
    }

    #[test]
    fn resolved_data_rejects_empty_identifiers() {
        let err = ResolvedComponentData::new("user", Identifier::from(""), None);
        assert!(matches!(err, Err(ChronicleError::EmptyIdentifier { .. })));
    }

    #[test]
    fn component_carries_snapshot_from_resolution() {
        let resolved = ResolvedComponentData::new(
            "user",
            Identifier::encode(&EntityKey::of(5i64)),
            Some(json!({"name": "alice"})),
        )
        .unwrap();
        let component = Component::from_resolved(resolved);
        assert_eq!(component.key(), ComponentKey::new("user", "5"));
        assert_eq!(component.data, Some(json!({"name": "alice"})));
        assert_eq!(component.to_string(), "user#5");
    }
}
