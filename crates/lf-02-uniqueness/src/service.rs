//! Single-node uniqueness provider
//!
//! Applies each request to a local [`CommitLog`] under a lock, stamping it
//! with the provider's clock. Suitable for a notary run by one node; the
//! replicated variant lives in `lf-03-raft-log`.

use crate::domain::{CommitCommand, CommitLog, CommitRequest, CommitResult, UniquenessError};
use crate::metrics;
use crate::ports::UniquenessProvider;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_crypto::Ed25519KeyPair;
use shared_types::{KeyValueStore, TimeSource};
use std::sync::Arc;
use tracing::{info, warn};

/// Dependencies for [`SingleNodeUniquenessProvider`]
pub struct UniquenessDependencies<S> {
    pub store: S,
    /// Notary service key. Successes are signed with it.
    pub signer: Arc<Ed25519KeyPair>,
    pub time_source: Arc<dyn TimeSource>,
}

pub struct SingleNodeUniquenessProvider<S: KeyValueStore> {
    log: Mutex<CommitLog<S>>,
    signer: Arc<Ed25519KeyPair>,
    time_source: Arc<dyn TimeSource>,
}

impl<S: KeyValueStore> SingleNodeUniquenessProvider<S> {
    pub fn new(deps: UniquenessDependencies<S>) -> Result<Self, UniquenessError> {
        Ok(Self {
            log: Mutex::new(CommitLog::open(deps.store)?),
            signer: deps.signer,
            time_source: deps.time_source,
        })
    }

    /// Run `f` against the underlying log.
    pub fn with_log<R>(&self, f: impl FnOnce(&CommitLog<S>) -> R) -> R {
        f(&self.log.lock())
    }
}

/// Reject requests that are malformed or addressed to a different key.
pub fn check_request(request: &CommitRequest, signer: &Ed25519KeyPair) -> Result<(), UniquenessError> {
    let result = request.validate().and_then(|()| {
        if request.notary.owning_key != *signer.public_key().as_bytes() {
            return Err(UniquenessError::Malformed(format!(
                "request is addressed to notary {}",
                request.notary
            )));
        }
        Ok(())
    });
    if let Err(e) = &result {
        warn!(tx_id = %request.tx_id, error = %e, "Rejecting commit request");
        metrics::record_malformed();
    }
    result
}

#[async_trait]
impl<S: KeyValueStore> UniquenessProvider for SingleNodeUniquenessProvider<S> {
    async fn commit(&self, request: CommitRequest) -> Result<CommitResult, UniquenessError> {
        check_request(&request, &self.signer)?;
        let tx_id = request.tx_id;
        let command = CommitCommand {
            request,
            submitted_at: self.time_source.now(),
        };
        let decision = self.log.lock().apply(&command)?;
        metrics::record_decision(&decision);
        match &decision {
            Ok(()) => info!(tx_id = %tx_id, "Transaction notarised"),
            Err(e) => info!(tx_id = %tx_id, reason = %e, "Notarisation refused"),
        }
        Ok(CommitResult::from_decision(decision, &tx_id, &self.signer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NotaryError;
    use shared_types::{
        InMemoryKVStore, ManualClock, Party, SecureHash, StateRef, TimeWindow,
    };

    struct Fixture {
        provider: Arc<SingleNodeUniquenessProvider<InMemoryKVStore>>,
        clock: ManualClock,
        notary: Party,
        alice: (Party, Ed25519KeyPair),
    }

    fn fixture() -> Fixture {
        let signer = Arc::new(Ed25519KeyPair::from_seed([42u8; 32]));
        let notary = Party::new("Notary", *signer.public_key().as_bytes());
        let clock = ManualClock::new(1_000);
        let provider = SingleNodeUniquenessProvider::new(UniquenessDependencies {
            store: InMemoryKVStore::new(),
            signer,
            time_source: Arc::new(clock.clone()),
        })
        .unwrap();
        let key = Ed25519KeyPair::from_seed([1u8; 32]);
        Fixture {
            provider: Arc::new(provider),
            clock,
            notary,
            alice: (Party::new("Alice", *key.public_key().as_bytes()), key),
        }
    }

    impl Fixture {
        fn request(&self, tx: &[u8], states: Vec<StateRef>, window: Option<TimeWindow>) -> CommitRequest {
            CommitRequest::signed(
                self.alice.0.clone(),
                &self.alice.1,
                SecureHash::sha256(tx),
                states,
                vec![],
                window,
                self.notary.clone(),
            )
        }
    }

    fn state(index: u32) -> StateRef {
        StateRef::new(SecureHash::sha256(b"issue"), index)
    }

    #[tokio::test]
    async fn test_success_is_signed_by_notary() {
        let f = fixture();
        let result = f.provider.commit(f.request(b"a", vec![state(0)], None)).await.unwrap();
        let signature = result.into_result().unwrap();
        assert_eq!(signature.by, f.notary.owning_key);
        assert!(signature.is_valid(SecureHash::sha256(b"a").as_bytes()));
    }

    #[tokio::test]
    async fn test_double_spend_names_first_consumer() {
        let f = fixture();
        f.provider.commit(f.request(b"a", vec![state(0)], None)).await.unwrap();
        let result = f.provider.commit(f.request(b"b", vec![state(0)], None)).await.unwrap();

        let err = result.into_result().unwrap_err();
        assert_eq!(err.conflicting_states(), vec![state(0)]);
        assert!(err.to_string().contains(&SecureHash::sha256(b"a").to_hex()));
    }

    #[tokio::test]
    async fn test_concurrent_spends_have_one_winner() {
        let f = fixture();
        let requests: Vec<_> = (0..16u8)
            .map(|i| f.request(&[b'x', i], vec![state(0), state(i as u32 + 1)], None))
            .collect();

        let results = futures::future::join_all(requests.into_iter().map(|request| {
            let provider = f.provider.clone();
            tokio::spawn(async move { provider.commit(request).await })
        }))
        .await;

        let winners = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(CommitResult::is_success)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(f.provider.with_log(|log| log.len()), 16);
    }

    #[tokio::test]
    async fn test_expired_window_is_refused() {
        let f = fixture();
        let window = TimeWindow::until_only(1_500);
        f.clock.advance_by(600);

        let result = f.provider.commit(f.request(b"a", vec![state(0)], Some(window))).await.unwrap();
        assert_eq!(
            result,
            CommitResult::Failure(NotaryError::TimeWindowInvalid {
                current_time: 1_600,
                window
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_request_is_not_logged() {
        let f = fixture();
        let err = f
            .provider
            .commit(f.request(b"a", vec![state(0), state(0)], None))
            .await
            .unwrap_err();
        assert!(matches!(err, UniquenessError::Malformed(_)));

        let mut elsewhere = f.request(b"a", vec![state(0)], None);
        elsewhere.notary = Party::new("Other", [5u8; 32]);
        assert!(f.provider.commit(elsewhere).await.is_err());
        assert!(f.provider.with_log(|log| log.is_empty()));
    }
}
