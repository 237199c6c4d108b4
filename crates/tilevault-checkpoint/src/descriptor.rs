use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, CheckpointResult};
use crate::rfc6962::Rfc6962Verifier;
use crate::verify::LOG_DESCRIPTOR_FILE;

/// A log's identity: its name (the checkpoint origin) and public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogDescriptor {
    pub name: String,
    /// PKIX `SubjectPublicKeyInfo`, DER encoded.
    pub public_key_der: Vec<u8>,
}

/// On-disk JSON shape.
#[derive(Serialize, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    description: String,
    #[serde(default)]
    key: String,
}

impl LogDescriptor {
    /// Load `log.v3.json` from a log directory.
    pub fn load(root: &Path) -> CheckpointResult<Self> {
        let path = root.join(LOG_DESCRIPTOR_FILE);
        let json = fs::read(&path).map_err(|e| CheckpointError::io(&path, e))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &[u8]) -> CheckpointResult<Self> {
        let raw: RawDescriptor = serde_json::from_slice(json)
            .map_err(|e| CheckpointError::Config(format!("parsing {LOG_DESCRIPTOR_FILE}: {e}")))?;
        if raw.description.is_empty() {
            return Err(CheckpointError::Config(format!(
                "{LOG_DESCRIPTOR_FILE}: missing log name (\"description\")"
            )));
        }
        if raw.key.is_empty() {
            return Err(CheckpointError::Config(format!(
                "{LOG_DESCRIPTOR_FILE}: missing public key (\"key\")"
            )));
        }
        let public_key_der = STANDARD.decode(&raw.key).map_err(|e| {
            CheckpointError::Config(format!("{LOG_DESCRIPTOR_FILE}: decoding key: {e}"))
        })?;
        Ok(Self {
            name: raw.description,
            public_key_der,
        })
    }

    pub fn to_json(&self) -> CheckpointResult<String> {
        let raw = RawDescriptor {
            description: self.name.clone(),
            key: STANDARD.encode(&self.public_key_der),
        };
        serde_json::to_string_pretty(&raw)
            .map_err(|e| CheckpointError::Config(format!("encoding {LOG_DESCRIPTOR_FILE}: {e}")))
    }

    /// The checkpoint verifier for this log's key.
    pub fn verifier(&self) -> CheckpointResult<Rfc6962Verifier> {
        Rfc6962Verifier::new(&self.name, &self.public_key_der)
    }
}
