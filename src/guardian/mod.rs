//! Guardian network client
//!
//! Fetches signed attestations for `(emitter chain, emitter, sequence)` from an
//! ordered list of redundant guardian endpoints:
//! - First endpoint to return a well-formed matching attestation wins
//! - Endpoint failures are swallowed and the next endpoint is tried
//! - A failed round waits a fixed delay before the full list is retried
//!
//! The client trusts the aggregated response of a single endpoint. It does not
//! verify signatures against a guardian set or check quorum; a target chain
//! contract that rejects under-signed messages is the only safeguard.

mod client;
mod endpoint;

pub use client::{GuardianClient, RetryPolicy, SignedAttestation};
pub use endpoint::{EndpointError, GuardianEndpoint, HttpGuardianEndpoint};

#[cfg(test)]
pub(crate) use client::tests as testing;
