//! RFC 6962 tree head signatures carried in signed notes.
//!
//! The signature bytes after the key hash are a TLS `digitally-signed`
//! structure: an 8-byte timestamp, a hash and a signature algorithm byte,
//! and a 2-byte length-prefixed signature over the RFC 6962
//! `TreeHeadSignature` for the checkpoint's size and root hash. The
//! checkpoint must carry no extension lines.
//!
//! The key type is picked from the SPKI algorithm identifier:
//!
//! | Key             | hash_alg          | sig_alg       | Signature bytes |
//! |-----------------|-------------------|---------------|-----------------|
//! | ECDSA P-256     | 4 (`sha256`)      | 3 (`ecdsa`)   | ASN.1 DER       |
//! | Ed25519         | 8 (`intrinsic`)   | 7 (`ed25519`) | 64 raw bytes    |

use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::pkcs8::spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};
use sha2::{Digest, Sha256};

use crate::checkpoint::Checkpoint;
use crate::descriptor::LogDescriptor;
use crate::error::{CheckpointError, CheckpointResult};
use crate::note::{self, NoteSigner, NoteVerifier};

const HASH_ALG_SHA256: u8 = 4;
const SIG_ALG_ECDSA: u8 = 3;
const HASH_ALG_INTRINSIC: u8 = 8;
const SIG_ALG_ED25519: u8 = 7;
const KEY_TYPE_RFC6962: u8 = 0x05;

/// id-ecPublicKey
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// id-Ed25519
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Note key hash: the first four bytes of `SHA-256(name || "\n" || key)`.
pub fn key_hash(name: &str, key: &[u8]) -> u32 {
    let mut h = Sha256::new();
    h.update(name.as_bytes());
    h.update(b"\n");
    h.update(key);
    let digest = h.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Key hash of an RFC 6962 key, identified by the SHA-256 of its PKIX DER.
pub fn rfc6962_key_hash(name: &str, public_key_der: &[u8]) -> u32 {
    let mut key = Vec::with_capacity(33);
    key.push(KEY_TYPE_RFC6962);
    key.extend_from_slice(&Sha256::digest(public_key_der));
    key_hash(name, &key)
}

/// Serialised RFC 6962 `TreeHeadSignature` (v1, tree_hash).
fn tree_head_input(timestamp: u64, checkpoint: &Checkpoint) -> Vec<u8> {
    let mut input = Vec::with_capacity(2 + 8 + 8 + 32);
    input.push(0); // v1
    input.push(1); // tree_hash
    input.extend_from_slice(&timestamp.to_be_bytes());
    input.extend_from_slice(&checkpoint.size.to_be_bytes());
    input.extend_from_slice(&checkpoint.root_hash);
    input
}

fn checkpoint_for_signature(msg: &[u8]) -> Option<Checkpoint> {
    let text = std::str::from_utf8(msg).ok()?;
    let checkpoint = Checkpoint::parse(text).ok()?;
    checkpoint.extensions.is_empty().then_some(checkpoint)
}

fn validate_name(name: &str) -> CheckpointResult<()> {
    if note::is_valid_name(name) {
        Ok(())
    } else {
        Err(CheckpointError::Config(format!("invalid key name {name:?}")))
    }
}

fn unsupported_key(e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Config(format!("unsupported or malformed public key: {e}"))
}

/// A log public key.
#[derive(Clone)]
pub enum LogKey {
    EcdsaP256(p256::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl LogKey {
    /// Decode a PKIX `SubjectPublicKeyInfo`, dispatching on its algorithm.
    pub fn from_public_key_der(der: &[u8]) -> CheckpointResult<Self> {
        let spki = SubjectPublicKeyInfoRef::try_from(der).map_err(unsupported_key)?;
        let oid = spki.algorithm.oid;
        if oid == OID_EC_PUBLIC_KEY {
            p256::ecdsa::VerifyingKey::from_public_key_der(der)
                .map(LogKey::EcdsaP256)
                .map_err(unsupported_key)
        } else if oid == OID_ED25519 {
            ed25519_dalek::VerifyingKey::from_public_key_der(der)
                .map(LogKey::Ed25519)
                .map_err(unsupported_key)
        } else {
            Err(unsupported_key(format!("algorithm {oid}")))
        }
    }

    /// The `(hash_alg, sig_alg)` pair signatures by this key must carry.
    pub fn algorithms(&self) -> (u8, u8) {
        match self {
            LogKey::EcdsaP256(_) => (HASH_ALG_SHA256, SIG_ALG_ECDSA),
            LogKey::Ed25519(_) => (HASH_ALG_INTRINSIC, SIG_ALG_ED25519),
        }
    }

    fn verify(&self, input: &[u8], signature: &[u8]) -> bool {
        match self {
            LogKey::EcdsaP256(key) => {
                use p256::ecdsa::signature::Verifier;
                let Ok(signature) = p256::ecdsa::Signature::from_der(signature) else {
                    return false;
                };
                key.verify(input, &signature).is_ok()
            }
            LogKey::Ed25519(key) => {
                let Ok(signature) = <[u8; 64]>::try_from(signature) else {
                    return false;
                };
                key.verify_strict(input, &ed25519_dalek::Signature::from_bytes(&signature))
                    .is_ok()
            }
        }
    }
}

impl std::fmt::Debug for LogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKey::EcdsaP256(_) => f.write_str("ecdsa-p256"),
            LogKey::Ed25519(key) => write!(f, "ed25519:{}", hex::encode(key.to_bytes())),
        }
    }
}

/// Verifies checkpoint notes signed with a log's RFC 6962 key.
pub struct Rfc6962Verifier {
    name: String,
    hash: u32,
    key: LogKey,
}

impl Rfc6962Verifier {
    /// Build a verifier from a log name and a PKIX DER public key.
    pub fn new(name: &str, public_key_der: &[u8]) -> CheckpointResult<Self> {
        validate_name(name)?;
        let key = LogKey::from_public_key_der(public_key_der)?;
        Ok(Self {
            name: name.to_string(),
            hash: rfc6962_key_hash(name, public_key_der),
            key,
        })
    }

    pub fn key(&self) -> &LogKey {
        &self.key
    }
}

impl NoteVerifier for Rfc6962Verifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_hash(&self) -> u32 {
        self.hash
    }

    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let Some(checkpoint) = checkpoint_for_signature(msg) else {
            return false;
        };
        if sig.len() < 12 {
            return false;
        }
        let (header, signature) = sig.split_at(12);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&header[..8]);
        if (header[8], header[9]) != self.key.algorithms() {
            return false;
        }
        let len = u16::from_be_bytes([header[10], header[11]]) as usize;
        if len != signature.len() {
            return false;
        }

        let input = tree_head_input(u64::from_be_bytes(timestamp), &checkpoint);
        self.key.verify(&input, signature)
    }
}

impl std::fmt::Debug for Rfc6962Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rfc6962Verifier({}, {:08x}, {:?})", self.name, self.hash, self.key)
    }
}

/// Private half of a [`LogKey`].
pub enum LogSigningKey {
    EcdsaP256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl LogSigningKey {
    fn public_key_der(&self) -> CheckpointResult<Vec<u8>> {
        let encoding = |e: ed25519_dalek::pkcs8::spki::Error| {
            CheckpointError::Config(format!("encoding public key: {e}"))
        };
        let der = match self {
            LogSigningKey::EcdsaP256(key) => {
                key.verifying_key().to_public_key_der().map_err(encoding)?
            }
            LogSigningKey::Ed25519(key) => {
                key.verifying_key().to_public_key_der().map_err(encoding)?
            }
        };
        Ok(der.as_bytes().to_vec())
    }

    fn algorithms(&self) -> (u8, u8) {
        match self {
            LogSigningKey::EcdsaP256(_) => (HASH_ALG_SHA256, SIG_ALG_ECDSA),
            LogSigningKey::Ed25519(_) => (HASH_ALG_INTRINSIC, SIG_ALG_ED25519),
        }
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        match self {
            LogSigningKey::EcdsaP256(key) => {
                use p256::ecdsa::signature::Signer;
                let signature: p256::ecdsa::Signature = key.sign(input);
                signature.to_der().as_bytes().to_vec()
            }
            LogSigningKey::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(input).to_bytes().to_vec()
            }
        }
    }
}

/// Signs checkpoints the way [`Rfc6962Verifier`] expects.
///
/// Used by tests and tooling; production checkpoints are signed by the log
/// issuance pipeline.
pub struct Rfc6962Signer {
    name: String,
    hash: u32,
    public_key_der: Vec<u8>,
    key: LogSigningKey,
}

impl Rfc6962Signer {
    pub fn new(name: &str, key: LogSigningKey) -> CheckpointResult<Self> {
        validate_name(name)?;
        let public_key_der = key.public_key_der()?;
        Ok(Self {
            name: name.to_string(),
            hash: rfc6962_key_hash(name, &public_key_der),
            public_key_der,
            key,
        })
    }

    /// Signer with a fresh random P-256 key.
    pub fn generate(name: &str) -> CheckpointResult<Self> {
        let mut csprng = rand::thread_rng();
        Self::new(
            name,
            LogSigningKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut csprng)),
        )
    }

    /// Signer with a fresh random Ed25519 key.
    pub fn generate_ed25519(name: &str) -> CheckpointResult<Self> {
        let mut csprng = rand::thread_rng();
        Self::new(
            name,
            LogSigningKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut csprng)),
        )
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Descriptor naming this key, as written to `log.v3.json`.
    pub fn descriptor(&self) -> LogDescriptor {
        LogDescriptor {
            name: self.name.clone(),
            public_key_der: self.public_key_der.clone(),
        }
    }

    pub fn verifier(&self) -> CheckpointResult<Rfc6962Verifier> {
        Rfc6962Verifier::new(&self.name, &self.public_key_der)
    }

    /// Signature bytes for `checkpoint` at `timestamp` (milliseconds).
    pub fn sign_at(&self, checkpoint: &Checkpoint, timestamp: u64) -> CheckpointResult<Vec<u8>> {
        if !checkpoint.extensions.is_empty() {
            return Err(CheckpointError::Config(
                "RFC 6962 signatures cannot cover checkpoint extensions".into(),
            ));
        }
        let signature = self.key.sign(&tree_head_input(timestamp, checkpoint));
        let (hash_alg, sig_alg) = self.key.algorithms();

        let mut out = Vec::with_capacity(12 + signature.len());
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.push(hash_alg);
        out.push(sig_alg);
        out.extend_from_slice(&(signature.len() as u16).to_be_bytes());
        out.extend_from_slice(&signature);
        Ok(out)
    }

    /// A complete signed checkpoint note.
    pub fn sign_checkpoint(&self, checkpoint: &Checkpoint) -> CheckpointResult<String> {
        note::sign(&checkpoint.to_string(), &[self as &dyn NoteSigner])
    }
}

impl NoteSigner for Rfc6962Signer {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_hash(&self) -> u32 {
        self.hash
    }

    fn sign(&self, msg: &[u8]) -> CheckpointResult<Vec<u8>> {
        let checkpoint = checkpoint_for_signature(msg).ok_or_else(|| {
            CheckpointError::malformed("checkpoint", "not a checkpoint without extensions")
        })?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.sign_at(&checkpoint, timestamp)
    }
}

impl std::fmt::Debug for Rfc6962Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rfc6962Signer({}, <redacted>)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    const NAME: &str = "example.com/log2025h1";

    fn checkpoint(size: u64) -> Checkpoint {
        Checkpoint {
            origin: NAME.into(),
            size,
            root_hash: [0xab; 32],
            extensions: vec![],
        }
    }

    #[test]
    fn signed_checkpoint_verifies() {
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        let verifier = signer.verifier().unwrap();
        let signed = signer.sign_checkpoint(&checkpoint(1000)).unwrap();

        let note = note::open(signed.as_bytes(), &[&verifier]).unwrap();
        assert_eq!(Checkpoint::parse(&note.text).unwrap().size, 1000);
        assert_eq!(note.signatures[0].key_hash, verifier.key_hash());
    }

    #[test]
    fn wrong_key_does_not_verify() {
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        let other = Rfc6962Signer::generate(NAME).unwrap();
        let signed = signer.sign_checkpoint(&checkpoint(5)).unwrap();

        // Different key, different key hash: the signature is unknown.
        let verifier = other.verifier().unwrap();
        assert_ne!(verifier.key_hash(), signer.key_hash());
        assert!(matches!(
            note::open(signed.as_bytes(), &[&verifier]),
            Err(CheckpointError::Verification(_))
        ));
    }

    #[test]
    fn altered_size_does_not_verify() {
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        let verifier = signer.verifier().unwrap();
        let signed = signer.sign_checkpoint(&checkpoint(1000)).unwrap();
        let forged = signed.replacen("\n1000\n", "\n2000\n", 1);
        assert!(matches!(
            note::open(forged.as_bytes(), &[&verifier]),
            Err(CheckpointError::Verification(_))
        ));
    }

    #[test]
    fn extension_lines_are_rejected() {
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        let verifier = signer.verifier().unwrap();
        let cp = checkpoint(10);
        let sig = signer.sign_at(&cp, 1_700_000_000_000).unwrap();

        assert!(verifier.verify(cp.to_string().as_bytes(), &sig));
        let with_ext = format!("{cp}extension\n");
        assert!(!verifier.verify(with_ext.as_bytes(), &sig));

        let mut ext = cp.clone();
        ext.extensions.push("extension".into());
        assert!(signer.sign_at(&ext, 0).is_err());
    }

    #[test]
    fn signature_framing_is_checked() {
        let signer = Rfc6962Signer::generate_ed25519(NAME).unwrap();
        let verifier = signer.verifier().unwrap();
        let cp = checkpoint(10);
        let msg = cp.to_string();
        let sig = signer.sign_at(&cp, 42).unwrap();
        assert_eq!(sig.len(), 8 + 1 + 1 + 2 + 64);

        let mut bad_alg = sig.clone();
        bad_alg[9] = 3;
        assert!(!verifier.verify(msg.as_bytes(), &bad_alg));

        let mut bad_len = sig.clone();
        bad_len[11] = 63;
        assert!(!verifier.verify(msg.as_bytes(), &bad_len));

        let mut bad_ts = sig.clone();
        bad_ts[7] ^= 1;
        assert!(!verifier.verify(msg.as_bytes(), &bad_ts));

        assert!(!verifier.verify(msg.as_bytes(), &sig[..40]));
    }

    // ------------------------------------------------------------------
    // Key types
    // ------------------------------------------------------------------

    /// `openssl ecparam -name prime256v1 -genkey` public key, PKIX DER.
    const OPENSSL_P256_SPKI: &str = concat!(
        "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEZCZo5IJJyTCbi8PhHERls5Ens5FR",
        "a60kM2cUFiv9wCAXfTnoQoHJgHbZP/OT6VIp5Cil5WKVXv2bz1t6wTnTsA==",
    );
    /// `openssl dgst -sha256 -sign` over the tree head for size 1000,
    /// root `ab..ab`, timestamp 1700000000000.
    const OPENSSL_P256_SIG: &str = concat!(
        "MEYCIQCEwlOHWaT0aV81IKJwSbjNyBdCsD6T7r4ct+1XT7YsBAIhALYs66jWOP0v",
        "oMnMrwppiMLRBtY2qHeeg+fVk/TTsaAH",
    );
    const OPENSSL_P384_SPKI: &str = concat!(
        "MHYwEAYHKoZIzj0CAQYFK4EEACIDYgAEeiJnQ+suvN+4NEPGtPosGNJ3TvznudOr",
        "FbuR7id3X+qxyPMTMMo7OmY0cqqQySbmxpxKH0Zhc39sMQuZ91jRYVGwMTnyr2pG",
        "P23EQH/Ywr1U+g3UDzoOt9jOJcbXFkBE",
    );

    fn framed(timestamp: u64, hash_alg: u8, sig_alg: u8, signature: &[u8]) -> Vec<u8> {
        let mut out = timestamp.to_be_bytes().to_vec();
        out.push(hash_alg);
        out.push(sig_alg);
        out.extend_from_slice(&(signature.len() as u16).to_be_bytes());
        out.extend_from_slice(signature);
        out
    }

    #[test]
    fn p256_signed_checkpoint_verifies() {
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        let verifier = signer.verifier().unwrap();
        assert!(matches!(verifier.key(), LogKey::EcdsaP256(_)));

        let cp = checkpoint(1000);
        let sig = signer.sign_at(&cp, 1_700_000_000_000).unwrap();
        assert_eq!((sig[8], sig[9]), (HASH_ALG_SHA256, SIG_ALG_ECDSA));
        assert!(verifier.verify(cp.to_string().as_bytes(), &sig));

        let signed = signer.sign_checkpoint(&cp).unwrap();
        let note = note::open(signed.as_bytes(), &[&verifier]).unwrap();
        assert_eq!(Checkpoint::parse(&note.text).unwrap().size, 1000);
    }

    #[test]
    fn ed25519_signed_checkpoint_verifies() {
        let signer = Rfc6962Signer::generate_ed25519(NAME).unwrap();
        let verifier = signer.verifier().unwrap();
        assert!(matches!(verifier.key(), LogKey::Ed25519(_)));

        let signed = signer.sign_checkpoint(&checkpoint(7)).unwrap();
        let note = note::open(signed.as_bytes(), &[&verifier]).unwrap();
        assert_eq!(Checkpoint::parse(&note.text).unwrap().size, 7);
    }

    #[test]
    fn openssl_p256_signature_verifies() {
        let der = STANDARD.decode(OPENSSL_P256_SPKI).unwrap();
        let verifier = Rfc6962Verifier::new(NAME, &der).unwrap();
        let signature = STANDARD.decode(OPENSSL_P256_SIG).unwrap();
        let cp = checkpoint(1000);
        let msg = cp.to_string();

        let sig = framed(1_700_000_000_000, 4, 3, &signature);
        assert!(verifier.verify(msg.as_bytes(), &sig));

        // Same bytes under the Ed25519 algorithm pair.
        let wrong_alg = framed(1_700_000_000_000, 8, 7, &signature);
        assert!(!verifier.verify(msg.as_bytes(), &wrong_alg));
        // Different timestamp, different tree head.
        let wrong_ts = framed(1_700_000_000_001, 4, 3, &signature);
        assert!(!verifier.verify(msg.as_bytes(), &wrong_ts));
        // Not DER.
        let raw = framed(1_700_000_000_000, 4, 3, &[0x30; 64]);
        assert!(!verifier.verify(msg.as_bytes(), &raw));
    }

    #[test]
    fn p256_descriptor_loads() {
        let json = format!(r#"{{"description":"{NAME}","key":"{OPENSSL_P256_SPKI}"}}"#);
        let descriptor = LogDescriptor::from_json(json.as_bytes()).unwrap();
        let verifier = descriptor.verifier().unwrap();
        assert!(matches!(verifier.key(), LogKey::EcdsaP256(_)));
        assert_eq!(verifier.key().algorithms(), (4, 3));
    }

    #[test]
    fn other_curves_are_unsupported() {
        let der = STANDARD.decode(OPENSSL_P384_SPKI).unwrap();
        assert!(matches!(
            Rfc6962Verifier::new(NAME, &der),
            Err(CheckpointError::Config(_))
        ));
    }

    #[test]
    fn key_hash_binds_name_and_key() {
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        let der = signer.public_key_der();
        assert_eq!(rfc6962_key_hash(NAME, der), rfc6962_key_hash(NAME, der));
        assert_ne!(rfc6962_key_hash(NAME, der), rfc6962_key_hash("other.log", der));

        let mut key = vec![KEY_TYPE_RFC6962];
        key.extend_from_slice(&Sha256::digest(der));
        assert_eq!(rfc6962_key_hash(NAME, der), key_hash(NAME, &key));
    }

    #[test]
    fn rejects_unusable_keys_and_names() {
        assert!(matches!(
            Rfc6962Verifier::new(NAME, &STANDARD.decode("AAAA").unwrap()),
            Err(CheckpointError::Config(_))
        ));
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        assert!(matches!(
            Rfc6962Verifier::new("bad name", signer.public_key_der()),
            Err(CheckpointError::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_signing_key() {
        let signer = Rfc6962Signer::generate(NAME).unwrap();
        assert!(format!("{signer:?}").contains("redacted"));
    }
}
