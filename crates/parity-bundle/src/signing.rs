//! Canonical JSON + HMAC-SHA256 bundle signatures.

use std::path::Path;

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::{BundleError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Field holding the hex signature on a signed bundle.
pub const SIGNATURE_FIELD: &str = "signature";

/// Recursively sort object keys. Array order is preserved.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Lowercase hex HMAC-SHA256 over the compact canonical form of `unsigned`.
pub fn signature_hex(unsigned: &Map<String, Value>, key: &str) -> Result<String> {
    let canonical = canonicalize(&Value::Object(unsigned.clone()));
    let payload = serde_json::to_vec(&canonical)?;
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| BundleError::InvalidKey(e.to_string()))?;
    mac.update(&payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Copy of `unsigned` with a `signature` field attached.
pub fn sign_bundle(unsigned: &Map<String, Value>, key: &str) -> Result<Map<String, Value>> {
    let signature = signature_hex(unsigned, key)?;
    let mut signed = unsigned.clone();
    signed.insert(SIGNATURE_FIELD.to_string(), Value::String(signature));
    Ok(signed)
}

/// Check a signed bundle against `key`. The provided signature may carry a
/// `sha256:` prefix and any case.
pub fn verify_bundle(signed: &Map<String, Value>, key: &str) -> Result<()> {
    let provided = signed
        .get(SIGNATURE_FIELD)
        .and_then(Value::as_str)
        .ok_or(BundleError::MissingSignature)?;
    let provided = normalize_signature(provided);

    let mut unsigned = signed.clone();
    unsigned.remove(SIGNATURE_FIELD);
    let computed = signature_hex(&unsigned, key)?;

    if bool::from(computed.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        Err(BundleError::SignatureMismatch)
    }
}

/// Read an unsigned bundle. The root must be an object; a stale `signature`
/// field is dropped.
pub fn load_unsigned_bundle(path: &Path) -> Result<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).map_err(|source| BundleError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Object(mut bundle) = serde_json::from_str::<Value>(&raw)? else {
        return Err(BundleError::NotAnObject);
    };
    bundle.remove(SIGNATURE_FIELD);
    Ok(bundle)
}

/// Key material: a non-blank explicit value wins, then the named env var.
pub fn resolve_key(explicit: Option<&str>, env_name: Option<&str>, label: &str) -> Result<String> {
    resolve_key_with(explicit, env_name, label, |name| std::env::var(name).ok())
}

pub fn resolve_key_with(
    explicit: Option<&str>,
    env_name: Option<&str>,
    label: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(key) = env_name
        .and_then(&lookup)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
    {
        return Ok(key);
    }
    Err(BundleError::MissingKey {
        label: label.to_string(),
        env: env_name.unwrap_or("<unset>").to_string(),
    })
}

fn normalize_signature(value: &str) -> String {
    let lowered = value.trim().to_ascii_lowercase();
    match lowered.strip_prefix("sha256:") {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn sample() -> Map<String, Value> {
        object(json!({
            "version": 1,
            "policy": {"blockThreshold": 80, "reviewThreshold": 40, "tools": ["exec", "browser"]},
        }))
    }

    #[test]
    fn canonicalize_sorts_nested_keys_and_keeps_arrays() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": 1, "x": 2}], "m": null}});
        let text = serde_json::to_string(&canonicalize(&value)).unwrap();
        assert_eq!(text, r#"{"a":{"m":null,"z":[3,{"x":2,"y":1}]},"b":1}"#);
    }

    #[test]
    fn signing_is_deterministic() {
        let a = signature_hex(&sample(), "k1").unwrap();
        let b = signature_hex(&sample(), "k1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn nested_change_alters_signature() {
        let mut changed = sample();
        changed["policy"]["tools"][1] = json!("browse");
        assert_ne!(
            signature_hex(&sample(), "k1").unwrap(),
            signature_hex(&changed, "k1").unwrap()
        );
        assert_ne!(
            signature_hex(&sample(), "k1").unwrap(),
            signature_hex(&sample(), "k2").unwrap()
        );
    }

    #[test]
    fn signs_the_compact_canonical_bytes() {
        let unsigned = object(json!({"b": {"d": 2, "c": "é"}, "a": 1}));
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(r#"{"a":1,"b":{"c":"é","d":2}}"#.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(signature_hex(&unsigned, "key").unwrap(), expected);
    }

    #[test]
    fn sign_then_verify() {
        let signed = sign_bundle(&sample(), "k1").unwrap();
        assert!(signed.contains_key(SIGNATURE_FIELD));
        verify_bundle(&signed, "k1").unwrap();
        assert!(matches!(
            verify_bundle(&signed, "k2"),
            Err(BundleError::SignatureMismatch)
        ));
    }

    #[test]
    fn verify_accepts_prefixed_uppercase_signature() {
        let mut signed = sign_bundle(&sample(), "k1").unwrap();
        let sig = signed[SIGNATURE_FIELD].as_str().unwrap().to_uppercase();
        signed.insert(SIGNATURE_FIELD.into(), json!(format!("SHA256:{sig}")));
        verify_bundle(&signed, "k1").unwrap();
    }

    #[test]
    fn verify_detects_tampering_and_missing_signature() {
        let mut signed = sign_bundle(&sample(), "k1").unwrap();
        signed.insert("version".into(), json!(2));
        assert!(matches!(
            verify_bundle(&signed, "k1"),
            Err(BundleError::SignatureMismatch)
        ));
        assert!(matches!(
            verify_bundle(&sample(), "k1"),
            Err(BundleError::MissingSignature)
        ));
    }

    #[test]
    fn load_strips_signature_and_rejects_non_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unsigned.json");
        std::fs::write(&path, r#"{"version":1,"signature":"stale"}"#).unwrap();
        let bundle = load_unsigned_bundle(&path).unwrap();
        assert!(!bundle.contains_key(SIGNATURE_FIELD));
        assert_eq!(bundle["version"], 1);

        std::fs::write(&path, "[1,2]").unwrap();
        assert!(matches!(
            load_unsigned_bundle(&path),
            Err(BundleError::NotAnObject)
        ));
        assert!(matches!(
            load_unsigned_bundle(&dir.path().join("missing.json")),
            Err(BundleError::Read { .. })
        ));
    }

    #[test]
    fn resolve_key_precedence() {
        let env = |name: &str| (name == "KEY_ENV").then(|| " from-env ".to_string());
        assert_eq!(
            resolve_key_with(Some(" explicit "), Some("KEY_ENV"), "new key", env).unwrap(),
            "explicit"
        );
        assert_eq!(
            resolve_key_with(Some("  "), Some("KEY_ENV"), "new key", env).unwrap(),
            "from-env"
        );
        match resolve_key_with(None, Some("OTHER"), "previous key", env) {
            Err(BundleError::MissingKey { label, env }) => {
                assert_eq!(label, "previous key");
                assert_eq!(env, "OTHER");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
