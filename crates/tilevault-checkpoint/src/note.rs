//! Signed notes.
//!
//! A note is UTF-8 text followed by a blank line and one or more signature
//! lines:
//!
//! ```text
//! <text, ending in \n>
//!
//! — <key name> <base64(key hash || signature)>
//! ```
//!
//! The key hash is four big-endian bytes that, together with the name,
//! select the verifier. Signatures from unknown keys are carried along but
//! not trusted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{CheckpointError, CheckpointResult};

/// Prefix of every signature line.
const SIG_PREFIX: &str = "\u{2014} ";

/// Checks signatures from one key.
pub trait NoteVerifier: Send + Sync {
    /// Key name, as it appears on signature lines.
    fn name(&self) -> &str;

    /// Key hash, as it prefixes the signature bytes.
    fn key_hash(&self) -> u32;

    /// Whether `sig` is a valid signature of `msg`.
    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool;
}

/// Produces signatures for one key.
pub trait NoteSigner {
    fn name(&self) -> &str;

    fn key_hash(&self) -> u32;

    fn sign(&self, msg: &[u8]) -> CheckpointResult<Vec<u8>>;
}

/// One signature line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteSignature {
    pub name: String,
    pub key_hash: u32,
    /// Base64 of key hash and signature bytes, as written on the line.
    pub base64: String,
}

/// A note whose signatures have been checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    pub text: String,
    /// Signatures that verified against a known key.
    pub signatures: Vec<NoteSignature>,
    /// Signatures from keys not in the verifier list.
    pub unverified: Vec<NoteSignature>,
}

/// Parse a signed note and check its signatures.
///
/// Fails unless at least one signature verifies. A signature line naming a
/// known key that does not verify is an error, as is a repeated signature.
pub fn open(msg: &[u8], verifiers: &[&dyn NoteVerifier]) -> CheckpointResult<Note> {
    let msg = std::str::from_utf8(msg)
        .map_err(|_| CheckpointError::malformed("note", "not valid UTF-8"))?;
    if msg.chars().any(|c| c < '\u{20}' && c != '\n') {
        return Err(CheckpointError::malformed("note", "control character"));
    }

    let split = msg
        .rfind("\n\n")
        .ok_or_else(|| CheckpointError::malformed("note", "no signature block"))?;
    let text = &msg[..split + 1];
    let sig_block = &msg[split + 2..];
    let sig_block = sig_block
        .strip_suffix('\n')
        .ok_or_else(|| CheckpointError::malformed("note", "missing final newline"))?;

    let mut signatures: Vec<NoteSignature> = Vec::new();
    let mut unverified = Vec::new();
    for line in sig_block.split('\n') {
        let (sig, raw) = parse_signature_line(line)?;
        let verifier = verifiers
            .iter()
            .find(|v| v.name() == sig.name && v.key_hash() == sig.key_hash);
        let Some(verifier) = verifier else {
            unverified.push(sig);
            continue;
        };
        if signatures
            .iter()
            .any(|s| s.name == sig.name && s.key_hash == sig.key_hash)
        {
            return Err(CheckpointError::Verification(format!(
                "duplicate signature from {}",
                sig.name
            )));
        }
        if !verifier.verify(text.as_bytes(), &raw[4..]) {
            return Err(CheckpointError::Verification(format!(
                "invalid signature from {} ({:08x})",
                sig.name, sig.key_hash
            )));
        }
        signatures.push(sig);
    }

    if signatures.is_empty() {
        return Err(CheckpointError::Verification(format!(
            "no verifiable signatures ({} from unknown keys)",
            unverified.len()
        )));
    }

    Ok(Note {
        text: text.to_string(),
        signatures,
        unverified,
    })
}

fn parse_signature_line(line: &str) -> CheckpointResult<(NoteSignature, Vec<u8>)> {
    let rest = line
        .strip_prefix(SIG_PREFIX)
        .ok_or_else(|| CheckpointError::malformed("note", "bad signature line prefix"))?;
    let (name, b64) = rest
        .split_once(' ')
        .ok_or_else(|| CheckpointError::malformed("note", "signature line missing key name"))?;
    if name.is_empty() || b64.contains(' ') {
        return Err(CheckpointError::malformed("note", "bad signature line"));
    }
    let raw = STANDARD
        .decode(b64)
        .map_err(|e| CheckpointError::malformed("note", format!("signature encoding: {e}")))?;
    if raw.len() < 5 {
        return Err(CheckpointError::malformed("note", "signature too short"));
    }
    let key_hash = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    Ok((
        NoteSignature {
            name: name.to_string(),
            key_hash,
            base64: b64.to_string(),
        },
        raw,
    ))
}

/// Sign `text` with every signer and return the note.
pub fn sign(text: &str, signers: &[&dyn NoteSigner]) -> CheckpointResult<String> {
    if !text.ends_with('\n') {
        return Err(CheckpointError::malformed("note", "text must end in a newline"));
    }
    if signers.is_empty() {
        return Err(CheckpointError::Config("no signers".into()));
    }

    let mut note = String::with_capacity(text.len() + 128 * signers.len());
    note.push_str(text);
    note.push('\n');
    for signer in signers {
        let mut raw = signer.key_hash().to_be_bytes().to_vec();
        raw.extend(signer.sign(text.as_bytes())?);
        note.push_str(SIG_PREFIX);
        note.push_str(signer.name());
        note.push(' ');
        note.push_str(&STANDARD.encode(raw));
        note.push('\n');
    }
    Ok(note)
}

/// Whether `name` can appear on a signature line.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace) && !name.contains('+')
}
