// src/persistence.rs
//
// =============================================================================
// SLAWIZARD: RESULT NOTARY (v 0.4 )
// =============================================================================
//
// The Trust Layer.
//
// Responsibilities:
// 1. Atomic writes: a document either appears whole or not at all.
// 2. The flat result document: merged check results + run identification.
// 3. A sha256 digest over the document so readers can verify it.
// 4. Canonical + legacy file names for one logical document.

use crate::check::{ResultData, ResultValue};
use crate::errors::PrinterError;
use crate::hardware::Hardware;
use crate::states::WizardId;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DIGEST_KEY: &str = "sha256";

/// Keys the wizard injects at finalize time.
pub const IDENTITY_KEYS: [&str; 7] = [
    "wizardId",
    "a64SerialNo",
    "mcSerialNo",
    "mcFwVersion",
    "osVersion",
    "finishedAt",
    "runId",
];

// ============================================================================
// 1. ATOMIC WRITES
// ============================================================================

/// Writes to a sibling temp file, syncs, then renames over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;

    let file_name = path
        .file_name()
        .with_context(|| format!("Not a file path: {:?}", path))?;
    let tmp = dir.join(format!(".{}.tmp", file_name.to_string_lossy()));

    {
        let mut file =
            File::create(&tmp).with_context(|| format!("Failed to create {:?}", tmp))?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} into place", path))?;

    if let Ok(handle) = File::open(&dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// 2. RUN IDENTIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RunIdentity {
    pub wizard_id: WizardId,
    pub a64_serial_no: String,
    pub mc_serial_no: String,
    pub mc_fw_version: String,
    pub os_version: String,
    pub finished_at: DateTime<Utc>,
    pub run_id: Uuid,
}

impl RunIdentity {
    pub fn capture(wizard_id: WizardId, hw: &dyn Hardware, run_id: Uuid) -> Self {
        Self {
            wizard_id,
            a64_serial_no: hw.a64_serial(),
            mc_serial_no: hw.mc_serial(),
            mc_fw_version: hw.mc_fw_version(),
            os_version: hw.os_version(),
            finished_at: Utc::now(),
            run_id,
        }
    }

    fn fields(&self) -> [(&'static str, String); 7] {
        [
            ("wizardId", self.wizard_id.name().to_string()),
            ("a64SerialNo", self.a64_serial_no.clone()),
            ("mcSerialNo", self.mc_serial_no.clone()),
            ("mcFwVersion", self.mc_fw_version.clone()),
            ("osVersion", self.os_version.clone()),
            ("finishedAt", self.finished_at.to_rfc3339()),
            ("runId", self.run_id.to_string()),
        ]
    }
}

// ============================================================================
// 3. THE DOCUMENT
// ============================================================================

/// One flat name -> value document per wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultDocument {
    fields: BTreeMap<String, Value>,
}

impl ResultDocument {
    pub fn new(identity: &RunIdentity, data: &ResultData) -> Result<Self, PrinterError> {
        let mut fields = BTreeMap::new();
        for (key, value) in data {
            if key == DIGEST_KEY {
                return Err(PrinterError::ResultKeyCollision { key: key.clone() });
            }
            let value = serde_json::to_value(value)
                .map_err(|e| PrinterError::FailedToSaveWizardData {
                    reason: e.to_string(),
                })?;
            fields.insert(key.clone(), value);
        }
        // A check may report an identification field itself, but only with the same value.
        for (key, value) in identity.fields() {
            let value = Value::String(value);
            match fields.get(key) {
                Some(reported) if *reported != value => {
                    return Err(PrinterError::ResultKeyCollision {
                        key: key.to_string(),
                    })
                }
                _ => {
                    fields.insert(key.to_string(), value);
                }
            }
        }

        let mut doc = Self { fields };
        let digest = doc.compute_digest();
        doc.fields.insert(DIGEST_KEY.to_string(), Value::String(digest));
        Ok(doc)
    }

    /// Digest over every field except the digest itself.
    fn compute_digest(&self) -> String {
        let body: BTreeMap<&String, &Value> = self
            .fields
            .iter()
            .filter(|(k, _)| k.as_str() != DIGEST_KEY)
            .collect();
        // BTreeMap keeps key order stable, so the bytes are canonical.
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        sha256_bytes(&bytes)
    }

    pub fn digest(&self) -> Option<&str> {
        self.fields.get(DIGEST_KEY).and_then(Value::as_str)
    }

    pub fn verify(&self) -> bool {
        match self.digest() {
            Some(stored) => stored == self.compute_digest(),
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn identity(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Every field except the digest, as result values.
    pub fn results(&self) -> ResultData {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != DIGEST_KEY)
            .filter_map(|(k, v)| {
                serde_json::from_value::<ResultValue>(v.clone())
                    .ok()
                    .map(|value| (k.clone(), value))
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.fields).context("Failed to serialize result document")
    }
}

// ============================================================================
// 4. THE STORE
// ============================================================================

pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, id: WizardId) -> PathBuf {
        self.root.join(id.data_file_name())
    }

    /// Canonical path first, then every legacy alias.
    pub fn paths(&self, id: WizardId) -> Vec<PathBuf> {
        std::iter::once(self.path(id))
            .chain(id.legacy_file_names().iter().map(|name| self.root.join(name)))
            .collect()
    }

    /// Writes the document under every name. Returns the written paths.
    pub fn save(&self, id: WizardId, doc: &ResultDocument) -> Result<Vec<PathBuf>> {
        let raw = doc.to_json()?;
        let paths = self.paths(id);
        for path in &paths {
            write_atomic(path, raw.as_bytes())?;
            log::info!("Wizard data stored to {:?}", path);
        }
        Ok(paths)
    }

    /// Deletes the document under every name. Missing files are skipped.
    pub fn remove(&self, id: WizardId) -> Result<()> {
        for path in self.paths(id) {
            match fs::remove_file(&path) {
                Ok(()) => log::info!("Wizard data removed from {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", path)),
            }
        }
        Ok(())
    }

    /// Reads the first existing file among the canonical and legacy names.
    pub fn load(&self, id: WizardId) -> Result<Option<ResultDocument>> {
        for path in self.paths(id) {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            let doc = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed wizard data {:?}", path))?;
            return Ok(Some(doc));
        }
        Ok(None)
    }
}
