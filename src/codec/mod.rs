//! Binary codec for guardian-signed attestations (VAAs)
//!
//! Layout is positional and big-endian throughout:
//!
//! ```text
//! header: version(1) guardian_set_index(4) sig_count(1) [guardian_index(1) signature(65)] * sig_count
//! body:   timestamp(4) nonce(4) emitter_chain(2) emitter_address(32) sequence(8) consistency(1) payload(..)
//! ```
//!
//! The payload is opaque to the attestation codec. Token bridge transfer
//! payloads can be parsed separately with [`TransferPayload`].

mod reader;
mod transfer_payload;
mod vaa;

pub use transfer_payload::TransferPayload;
pub use vaa::{Attestation, GuardianSignature, BODY_MIN_LEN, HEADER_LEN, SIGNATURE_LEN};

use thiserror::Error;

/// Codec failures. Decoding never yields a partially filled record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated message: field {field} needs {needed} bytes, {remaining} remaining")]
    TruncatedMessage {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Signature count {declared} runs past the buffer ({remaining} bytes remaining)")]
    InvalidSignatureCount { declared: u8, remaining: usize },

    #[error("Unsupported transfer payload id {0}")]
    UnsupportedPayload(u8),

    #[error("Cannot encode {0} signatures, at most 255 fit the count byte")]
    TooManySignatures(usize),
}
