//! Ordered-fallback attestation fetcher with bounded rounds

use super::endpoint::{GuardianEndpoint, HttpGuardianEndpoint};
use crate::codec::Attestation;
use crate::config::GuardianConfig;
use crate::error::{TrackerError, TrackerResult};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long to keep asking the guardian network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Full passes over the endpoint list
    pub rounds: u32,
    /// Pause between consecutive rounds
    pub round_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rounds: 30,
            round_delay: Duration::from_secs(2),
        }
    }
}

/// Attestation as returned by the network together with its decoded form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAttestation {
    pub bytes: Vec<u8>,
    pub attestation: Attestation,
}

/// Client over a fixed, ordered list of guardian endpoints
pub struct GuardianClient {
    endpoints: Vec<Arc<dyn GuardianEndpoint>>,
    policy: RetryPolicy,
}

impl GuardianClient {
    pub fn new(endpoints: Vec<Arc<dyn GuardianEndpoint>>, policy: RetryPolicy) -> Self {
        Self { endpoints, policy }
    }

    /// Build REST endpoints from configuration
    pub fn from_config(config: &GuardianConfig) -> TrackerResult<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let mut endpoints: Vec<Arc<dyn GuardianEndpoint>> = Vec::new();

        for url in &config.endpoints {
            let endpoint =
                HttpGuardianEndpoint::new(url, timeout).map_err(|e| TrackerError::Endpoint {
                    endpoint: url.clone(),
                    message: e.to_string(),
                })?;
            debug!("Added guardian endpoint {}", url);
            endpoints.push(Arc::new(endpoint));
        }

        if endpoints.is_empty() {
            return Err(TrackerError::config("No guardian endpoints configured"));
        }

        Ok(Self::new(endpoints, config.retry_policy()))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Fetch with the client's default policy
    pub async fn fetch_attestation(
        &self,
        emitter_chain: u16,
        emitter_address: &[u8; 32],
        sequence: u64,
    ) -> TrackerResult<SignedAttestation> {
        self.fetch_attestation_with(emitter_chain, emitter_address, sequence, &self.policy)
            .await
    }

    /// Fetch, trying every endpoint in order for up to `policy.rounds` rounds.
    ///
    /// May block for roughly `rounds * round_delay` plus request time before
    /// returning `AttestationTimeout`.
    pub async fn fetch_attestation_with(
        &self,
        emitter_chain: u16,
        emitter_address: &[u8; 32],
        sequence: u64,
        policy: &RetryPolicy,
    ) -> TrackerResult<SignedAttestation> {
        let started = Instant::now();

        for round in 1..=policy.rounds {
            for endpoint in &self.endpoints {
                let bytes = match endpoint
                    .fetch_signed_vaa(emitter_chain, emitter_address, sequence)
                    .await
                {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!(
                            "Guardian {} has no attestation for {}/{} (round {}/{}): {}",
                            endpoint.name(),
                            emitter_chain,
                            sequence,
                            round,
                            policy.rounds,
                            e
                        );
                        crate::metrics::record_guardian_request("error");
                        continue;
                    }
                };

                match accept(bytes, emitter_chain, emitter_address, sequence) {
                    Ok(signed) => {
                        crate::metrics::record_guardian_request("ok");
                        crate::metrics::record_attestation_latency(started.elapsed().as_secs_f64());
                        info!(
                            "Attestation {}/{}/{} obtained from {} in round {}",
                            emitter_chain,
                            hex::encode(emitter_address),
                            sequence,
                            endpoint.name(),
                            round
                        );
                        return Ok(signed);
                    }
                    Err(reason) => {
                        warn!(
                            "Guardian {} returned an unusable attestation: {}",
                            endpoint.name(),
                            reason
                        );
                        crate::metrics::record_guardian_request("rejected");
                    }
                }
            }

            if round < policy.rounds {
                tokio::time::sleep(policy.round_delay).await;
            }
        }

        warn!(
            "Attestation {}/{} unavailable after {} rounds",
            emitter_chain, sequence, policy.rounds
        );
        crate::metrics::record_guardian_exhausted();

        Err(TrackerError::AttestationTimeout {
            emitter_chain,
            sequence,
            rounds: policy.rounds,
        })
    }
}

/// Decode a response and make sure it answers the question asked
fn accept(
    bytes: Vec<u8>,
    emitter_chain: u16,
    emitter_address: &[u8; 32],
    sequence: u64,
) -> Result<SignedAttestation, String> {
    let attestation = Attestation::decode(&bytes).map_err(|e| e.to_string())?;

    if attestation.emitter_chain != emitter_chain
        || &attestation.emitter_address != emitter_address
        || attestation.sequence != sequence
    {
        return Err(format!(
            "asked for {}/{}, got {}/{}",
            emitter_chain, sequence, attestation.emitter_chain, attestation.sequence
        ));
    }

    Ok(SignedAttestation { bytes, attestation })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::GuardianSignature;
    use crate::guardian::EndpointError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const EMITTER: [u8; 32] = [0x0e; 32];

    pub(crate) fn attestation_bytes(emitter_chain: u16, sequence: u64) -> Vec<u8> {
        Attestation {
            version: 1,
            guardian_set_index: 3,
            signatures: vec![GuardianSignature {
                guardian_index: 0,
                signature: [7; 65],
            }],
            timestamp: 1_700_000_000,
            nonce: 0,
            emitter_chain,
            emitter_address: EMITTER,
            sequence,
            consistency_level: 1,
            payload: vec![1, 2, 3],
        }
        .encode()
        .unwrap()
    }

    /// Fails until its `succeed_on`-th call (1-based), then serves `response`
    pub(crate) struct FakeEndpoint {
        name: String,
        succeed_on: Option<usize>,
        response: Vec<u8>,
        calls: AtomicUsize,
    }

    impl FakeEndpoint {
        pub(crate) fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                succeed_on: None,
                response: Vec::new(),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn succeeding_on(name: &str, call: usize, response: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                succeed_on: Some(call),
                response,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GuardianEndpoint for FakeEndpoint {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_signed_vaa(
            &self,
            _emitter_chain: u16,
            _emitter_address: &[u8; 32],
            _sequence: u64,
        ) -> Result<Vec<u8>, EndpointError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.succeed_on {
                Some(n) if call >= n => Ok(self.response.clone()),
                _ => Err(EndpointError::Status(404)),
            }
        }
    }

    pub(crate) fn endpoints(list: &[&Arc<FakeEndpoint>]) -> Vec<Arc<dyn GuardianEndpoint>> {
        list.iter()
            .map(|e| Arc::clone(e) as Arc<dyn GuardianEndpoint>)
            .collect()
    }

    fn policy(rounds: u32) -> RetryPolicy {
        RetryPolicy {
            rounds,
            round_delay: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_in_third_round_short_circuits() {
        let a = FakeEndpoint::failing("a");
        let b = FakeEndpoint::succeeding_on("b", 3, attestation_bytes(2, 99));
        let c = FakeEndpoint::failing("c");
        let client = GuardianClient::new(endpoints(&[&a, &b, &c]), policy(5));

        let started = tokio::time::Instant::now();
        let signed = client.fetch_attestation(2, &EMITTER, 99).await.unwrap();

        assert_eq!(signed.attestation.sequence, 99);
        assert_eq!(signed.bytes, attestation_bytes(2, 99));
        // Two full rounds, then a and b in round three
        assert_eq!(a.calls() + b.calls() + c.calls(), 3 * 2 + 2);
        assert_eq!(c.calls(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_configured_rounds() {
        let a = FakeEndpoint::failing("a");
        let b = FakeEndpoint::failing("b");
        let client = GuardianClient::new(endpoints(&[&a, &b]), policy(4));

        let started = tokio::time::Instant::now();
        let err = client.fetch_attestation(2, &EMITTER, 5).await.unwrap_err();

        assert!(matches!(
            err,
            TrackerError::AttestationTimeout {
                emitter_chain: 2,
                sequence: 5,
                rounds: 4
            }
        ));
        assert_eq!(a.calls(), 4);
        assert_eq!(b.calls(), 4);
        // No delay after the final round
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_policy_overrides_default() {
        let a = FakeEndpoint::failing("a");
        let client = GuardianClient::new(endpoints(&[&a]), policy(30));

        let short = RetryPolicy {
            rounds: 2,
            round_delay: Duration::from_millis(10),
        };
        assert!(client
            .fetch_attestation_with(2, &EMITTER, 1, &short)
            .await
            .is_err());
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_or_garbage_response_tries_next() {
        let wrong_sequence = FakeEndpoint::succeeding_on("wrong", 1, attestation_bytes(2, 8));
        let garbage = FakeEndpoint::succeeding_on("garbage", 1, vec![1, 0, 0]);
        let good = FakeEndpoint::succeeding_on("good", 1, attestation_bytes(2, 7));
        let client =
            GuardianClient::new(endpoints(&[&wrong_sequence, &garbage, &good]), policy(1));

        let signed = client.fetch_attestation(2, &EMITTER, 7).await.unwrap();
        assert_eq!(signed.attestation.sequence, 7);
        assert_eq!(good.calls(), 1);
    }

    #[tokio::test]
    async fn test_first_endpoint_success_skips_rest() {
        let a = FakeEndpoint::succeeding_on("a", 1, attestation_bytes(4, 1));
        let b = FakeEndpoint::failing("b");
        let client = GuardianClient::new(endpoints(&[&a, &b]), policy(3));

        client.fetch_attestation(4, &EMITTER, 1).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[test]
    fn test_from_config_reports_bad_endpoint() {
        let config = GuardianConfig {
            endpoints: vec!["https://guardian-a.example".to_string(), "guardian-b".to_string()],
            rounds: 5,
            round_delay_ms: 100,
            request_timeout_ms: 1_000,
        };

        let err = GuardianClient::from_config(&config).err().unwrap();
        assert!(matches!(
            err,
            TrackerError::Endpoint { ref endpoint, .. } if endpoint == "guardian-b"
        ));
        assert!(!err.is_retryable());

        let config = GuardianConfig {
            endpoints: vec!["https://guardian-a.example".to_string()],
            ..config
        };
        let client = GuardianClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint_count(), 1);
        assert_eq!(client.policy().rounds, 5);
    }
}
