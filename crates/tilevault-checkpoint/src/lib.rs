//! Checkpoint verification for tiled transparency logs.
//!
//! A log directory holds a descriptor (`log.v3.json`, carrying the log name
//! and public key) and a signed `checkpoint`. [`verified_log_size`] checks the
//! checkpoint signature against the descriptor's key and returns the tree
//! size it commits to. Nothing downstream should trust a size that did not
//! come through here.
//!
//! # Key Types
//!
//! - [`LogDescriptor`] -- log name and PKIX public key
//! - [`Checkpoint`] -- origin, tree size, root hash, extension lines
//! - [`note::open`] -- signed-note parsing and signature checking
//! - [`Rfc6962Verifier`] / [`Rfc6962Signer`] -- RFC 6962 tree head
//!   signatures wrapped in a note
//! - [`LogKey`] -- ECDSA P-256 or Ed25519, chosen by SPKI algorithm

pub mod checkpoint;
pub mod descriptor;
pub mod error;
pub mod note;
pub mod rfc6962;
pub mod verify;

pub use checkpoint::Checkpoint;
pub use descriptor::LogDescriptor;
pub use error::{CheckpointError, CheckpointResult};
pub use note::{Note, NoteSignature, NoteSigner, NoteVerifier};
pub use rfc6962::{LogKey, LogSigningKey, Rfc6962Signer, Rfc6962Verifier};
pub use verify::{verified_checkpoint, verified_log_size, CHECKPOINT_FILE, LOG_DESCRIPTOR_FILE};
