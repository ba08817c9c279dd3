//! Staged key rotation: canary, staged and optional rollback artifacts plus
//! a manifest describing them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{BundleError, Result};
use crate::signing::{load_unsigned_bundle, sign_bundle};

pub const CANARY_FILE: &str = "policy-bundle-canary.json";
pub const STAGED_FILE: &str = "policy-bundle-staged.json";
pub const ROLLBACK_FILE: &str = "policy-bundle-rollback.json";
pub const MANIFEST_FILE: &str = "policy-bundle-rotation-manifest.json";

pub const NEW_KEY_ENV: &str = "OPENCLAW_RS_POLICY_BUNDLE_KEY";
pub const PREVIOUS_KEY_ENV: &str = "OPENCLAW_RS_POLICY_BUNDLE_PREVIOUS_KEY";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RolloutStage {
    Canary,
    Staged,
    Rollback,
}

impl RolloutStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Canary => "canary",
            Self::Staged => "staged",
            Self::Rollback => "rollback",
        }
    }
}

/// A key id and its secret.
#[derive(Clone, Debug)]
pub struct SigningKey {
    pub key_id: String,
    pub secret: String,
}

#[derive(Clone, Debug)]
pub struct RotationRequest {
    pub unsigned_path: PathBuf,
    pub output_dir: PathBuf,
    pub new_key: SigningKey,
    /// When set, a rollback bundle is signed with this key.
    pub previous_key: Option<SigningKey>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RotationArtifacts {
    pub canary: String,
    pub staged: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationManifest {
    pub generated_at: String,
    pub unsigned_source: String,
    pub new_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_key_id: Option<String>,
    pub artifacts: RotationArtifacts,
}

#[derive(Clone, Debug)]
pub struct RotationOutcome {
    pub manifest_path: PathBuf,
    pub manifest: RotationManifest,
}

/// Sign `unsigned` for one rollout stage, stamping key id, time and stage.
pub fn build_signed_variant(
    unsigned: &Map<String, Value>,
    key: &SigningKey,
    stage: RolloutStage,
    signed_at: DateTime<Utc>,
) -> Result<Map<String, Value>> {
    let mut payload = unsigned.clone();
    payload.insert("keyId".to_string(), Value::String(key.key_id.clone()));
    payload.insert("signedAt".to_string(), Value::String(timestamp(signed_at)));
    payload.insert(
        "rolloutStage".to_string(),
        Value::String(stage.as_str().to_string()),
    );
    sign_bundle(&payload, &key.secret)
}

/// Run a rotation using the current time.
pub fn rotate(request: &RotationRequest) -> Result<RotationOutcome> {
    rotate_at(request, Utc::now())
}

/// Run a rotation with a fixed clock.
pub fn rotate_at(request: &RotationRequest, now: DateTime<Utc>) -> Result<RotationOutcome> {
    let unsigned = load_unsigned_bundle(&request.unsigned_path)?;
    let dir = &request.output_dir;
    std::fs::create_dir_all(dir).map_err(|source| BundleError::Write {
        path: dir.clone(),
        source,
    })?;

    let canary_path = dir.join(CANARY_FILE);
    let staged_path = dir.join(STAGED_FILE);
    write_json(
        &canary_path,
        &build_signed_variant(&unsigned, &request.new_key, RolloutStage::Canary, now)?,
    )?;
    write_json(
        &staged_path,
        &build_signed_variant(&unsigned, &request.new_key, RolloutStage::Staged, now)?,
    )?;

    let rollback_path = match &request.previous_key {
        Some(previous) => {
            let path = dir.join(ROLLBACK_FILE);
            write_json(
                &path,
                &build_signed_variant(&unsigned, previous, RolloutStage::Rollback, now)?,
            )?;
            Some(path)
        }
        None => None,
    };

    let manifest = RotationManifest {
        generated_at: timestamp(now),
        unsigned_source: request.unsigned_path.display().to_string(),
        new_key_id: request.new_key.key_id.clone(),
        previous_key_id: request.previous_key.as_ref().map(|k| k.key_id.clone()),
        artifacts: RotationArtifacts {
            canary: canary_path.display().to_string(),
            staged: staged_path.display().to_string(),
            rollback: rollback_path.map(|p| p.display().to_string()),
        },
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    write_json(&manifest_path, &manifest)?;

    tracing::info!(
        manifest = %manifest_path.display(),
        new_key_id = %manifest.new_key_id,
        rollback = manifest.previous_key_id.is_some(),
        "policy bundle rotation written"
    );
    Ok(RotationOutcome {
        manifest_path,
        manifest,
    })
}

/// Pretty-printed JSON with a trailing newline.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    std::fs::write(path, text).map_err(|source| BundleError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
