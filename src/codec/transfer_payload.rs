//! Token bridge transfer payloads carried inside an attestation

use super::reader::Reader;
use super::DecodeError;

use ethers::types::U256;

const PAYLOAD_TRANSFER: u8 = 1;
const PAYLOAD_TRANSFER_WITH_PAYLOAD: u8 = 3;

/// Decoded token bridge transfer (payload id 1) or transfer-with-payload (id 3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPayload {
    pub payload_id: u8,
    pub amount: U256,
    pub token_address: [u8; 32],
    pub token_chain: u16,
    pub recipient: [u8; 32],
    pub recipient_chain: u16,
    /// Relayer fee, id 1 only
    pub fee: Option<U256>,
    /// Sending contract, id 3 only
    pub sender: Option<[u8; 32]>,
    /// Application payload, id 3 only
    pub extra: Vec<u8>,
}

impl TransferPayload {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(payload);

        let payload_id = reader.u8("payload_id")?;
        if payload_id != PAYLOAD_TRANSFER && payload_id != PAYLOAD_TRANSFER_WITH_PAYLOAD {
            return Err(DecodeError::UnsupportedPayload(payload_id));
        }

        let amount = U256::from_big_endian(reader.take("amount", 32)?);
        let token_address = reader.array("token_address")?;
        let token_chain = reader.u16("token_chain")?;
        let recipient = reader.array("recipient")?;
        let recipient_chain = reader.u16("recipient_chain")?;

        let (fee, sender, extra) = if payload_id == PAYLOAD_TRANSFER {
            (Some(U256::from_big_endian(reader.take("fee", 32)?)), None, Vec::new())
        } else {
            let sender = reader.array("sender")?;
            (None, Some(sender), reader.rest().to_vec())
        };

        Ok(Self {
            payload_id,
            amount,
            token_address,
            token_chain,
            recipient,
            recipient_chain,
            fee,
            sender,
            extra,
        })
    }
}
