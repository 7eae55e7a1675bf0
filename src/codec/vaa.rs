//! Attestation (VAA) record and its wire format

use super::reader::Reader;
use super::DecodeError;

use sha3::{Digest, Keccak256};

/// version + guardian_set_index + signature count
pub const HEADER_LEN: usize = 1 + 4 + 1;
/// guardian_index + 65-byte recoverable signature
pub const SIGNATURE_LEN: usize = 1 + 65;
/// Body without payload: timestamp, nonce, chain, emitter, sequence, consistency
pub const BODY_MIN_LEN: usize = 4 + 4 + 2 + 32 + 8 + 1;

/// One guardian's signature over the attestation body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianSignature {
    pub guardian_index: u8,
    pub signature: [u8; 65],
}

/// Decoded attestation. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub version: u8,
    pub guardian_set_index: u32,
    pub signatures: Vec<GuardianSignature>,
    pub timestamp: u32,
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
}

impl Attestation {
    /// Decode an attestation from its wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8("version")?;
        let guardian_set_index = reader.u32("guardian_set_index")?;
        let declared = reader.u8("signature_count")?;

        let remaining = reader.remaining();
        if remaining < declared as usize * SIGNATURE_LEN {
            return Err(DecodeError::InvalidSignatureCount {
                declared,
                remaining,
            });
        }

        let mut signatures = Vec::with_capacity(declared as usize);
        for _ in 0..declared {
            signatures.push(GuardianSignature {
                guardian_index: reader.u8("guardian_index")?,
                signature: reader.array("signature")?,
            });
        }

        let timestamp = reader.u32("timestamp")?;
        let nonce = reader.u32("nonce")?;
        let emitter_chain = reader.u16("emitter_chain")?;
        let emitter_address = reader.array("emitter_address")?;
        let sequence = reader.u64("sequence")?;
        let consistency_level = reader.u8("consistency_level")?;
        let payload = reader.rest().to_vec();

        Ok(Self {
            version,
            guardian_set_index,
            signatures,
            timestamp,
            nonce,
            emitter_chain,
            emitter_address,
            sequence,
            consistency_level,
            payload,
        })
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let count = u8::try_from(self.signatures.len())
            .map_err(|_| DecodeError::TooManySignatures(self.signatures.len()))?;

        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.version);
        out.extend_from_slice(&self.guardian_set_index.to_be_bytes());
        out.push(count);
        for sig in &self.signatures {
            out.push(sig.guardian_index);
            out.extend_from_slice(&sig.signature);
        }
        self.write_body(&mut out);
        Ok(out)
    }

    /// Exact length of the encoded attestation
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + SIGNATURE_LEN * self.signatures.len() + BODY_MIN_LEN + self.payload.len()
    }

    /// The signed portion of the message
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BODY_MIN_LEN + self.payload.len());
        self.write_body(&mut out);
        out
    }

    /// Double keccak256 of the body, the identifier guardians sign over
    pub fn digest(&self) -> [u8; 32] {
        let inner = Keccak256::digest(self.body());
        Keccak256::digest(inner).into()
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.emitter_chain.to_be_bytes());
        out.extend_from_slice(&self.emitter_address);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.push(self.consistency_level);
        out.extend_from_slice(&self.payload);
    }
}
