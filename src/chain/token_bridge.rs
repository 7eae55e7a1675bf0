//! Token bridge call encoding and core bridge log parsing

use crate::config::{ChainConfig, Settings};
use crate::error::{TrackerError, TrackerResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use ethers::utils::id;
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;

const TRANSFER_TOKENS: &str = "transferTokens(address,uint256,uint16,bytes32,uint256,uint32)";
const COMPLETE_TRANSFER: &str = "completeTransfer(bytes)";
const LOG_MESSAGE_PUBLISHED: &str = "LogMessagePublished(address,uint64,uint32,bytes,uint8)";

lazy_static! {
    /// keccak256 of the core bridge's message publication event
    pub static ref LOG_MESSAGE_PUBLISHED_TOPIC: H256 =
        H256::from_slice(&Keccak256::digest(LOG_MESSAGE_PUBLISHED.as_bytes()));
}

/// Bridge contract addresses on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeContracts {
    pub core_bridge: Address,
    pub token_bridge: Address,
}

impl BridgeContracts {
    pub fn from_config(config: &ChainConfig) -> TrackerResult<Self> {
        Ok(Self {
            core_bridge: config
                .core_bridge()
                .map_err(|e| TrackerError::config(e.to_string()))?,
            token_bridge: config
                .token_bridge()
                .map_err(|e| TrackerError::config(e.to_string()))?,
        })
    }

    /// Contracts of every enabled chain, keyed by bridge chain id
    pub fn from_settings(settings: &Settings) -> TrackerResult<HashMap<u16, Self>> {
        settings
            .enabled_chains()
            .into_iter()
            .map(|chain| Ok((chain.bridge_chain_id, Self::from_config(chain)?)))
            .collect()
    }
}

/// Message publication found in a lock receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedMessage {
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub nonce: u32,
    pub consistency_level: u8,
}

/// Encode `transferTokens` for the source chain's token bridge
pub fn transfer_tokens_call(
    token: Address,
    amount: U256,
    recipient_chain: u16,
    recipient: [u8; 32],
    arbiter_fee: U256,
    nonce: u32,
) -> Bytes {
    let tokens = [
        Token::Address(token),
        Token::Uint(amount),
        Token::Uint(U256::from(recipient_chain)),
        Token::FixedBytes(recipient.to_vec()),
        Token::Uint(arbiter_fee),
        Token::Uint(U256::from(nonce)),
    ];
    with_selector(TRANSFER_TOKENS, &tokens)
}

/// Encode `completeTransfer` for the target chain's token bridge
pub fn complete_transfer_call(encoded_vaa: &[u8]) -> Bytes {
    with_selector(COMPLETE_TRANSFER, &[Token::Bytes(encoded_vaa.to_vec())])
}

fn with_selector(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(tokens));
    Bytes::from(data)
}

/// Find the core bridge's publication log in a receipt.
///
/// Returns `None` if no log from `core_bridge` carries the publication topic
/// or its data does not decode.
pub fn find_published_message(
    receipt: &TransactionReceipt,
    core_bridge: Address,
) -> Option<PublishedMessage> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == core_bridge)
        .filter(|log| log.topics.first() == Some(&*LOG_MESSAGE_PUBLISHED_TOPIC))
        .find_map(|log| {
            let emitter = log.topics.get(1)?.0;
            let decoded = abi::decode(
                &[
                    ParamType::Uint(64),
                    ParamType::Uint(32),
                    ParamType::Bytes,
                    ParamType::Uint(8),
                ],
                &log.data,
            )
            .ok()?;

            match decoded.as_slice() {
                [Token::Uint(sequence), Token::Uint(nonce), Token::Bytes(_), Token::Uint(level)] => {
                    Some(PublishedMessage {
                        emitter_address: emitter,
                        sequence: sequence.low_u64(),
                        nonce: nonce.low_u32(),
                        consistency_level: level.low_u32() as u8,
                    })
                }
                _ => None,
            }
        })
}
