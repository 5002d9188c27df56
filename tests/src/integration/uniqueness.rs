//! # Uniqueness Scenarios
//!
//! Properties every uniqueness provider must hold, checked against the
//! single-node provider and against a three-replica cluster:
//!
//! - two requests sharing a state with different tx ids: exactly one wins
//! - resubmitting a committed request returns the original success
//! - a request with one conflicting state records none of its states

use std::sync::Arc;

use futures::future::join_all;
use lf_02_uniqueness::{
    CommitResult, ConsumedStateType, NotaryError, SingleNodeUniquenessProvider,
    UniquenessDependencies, UniquenessProvider,
};
use shared_types::{InMemoryKVStore, SecureHash, SystemTimeSource};

use super::support::{identity, request, state, wait_until, ReplicaCluster};

fn single_node() -> (Arc<dyn UniquenessProvider>, shared_types::Party) {
    let (notary, signer) = identity("Notary");
    let provider = SingleNodeUniquenessProvider::new(UniquenessDependencies {
        store: InMemoryKVStore::new(),
        signer,
        time_source: Arc::new(SystemTimeSource),
    })
    .unwrap();
    (Arc::new(provider), notary)
}

/// Race `contenders` spends of the same state and check there is one winner.
async fn assert_one_winner(providers: &[Arc<dyn UniquenessProvider>], notary: &shared_types::Party) {
    let alice = identity("Alice");
    let contenders = 8;
    let attempts = (0..contenders).map(|i| {
        let provider = providers[i % providers.len()].clone();
        let request = request(&alice, notary, &format!("spend-{i}"), vec![state(0), state(i as u32 + 1)]);
        tokio::spawn(async move { provider.commit(request).await })
    });
    let results: Vec<CommitResult> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let winners: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_success())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(winners.len(), 1, "results: {results:?}");
    let winner_tx = SecureHash::sha256(format!("spend-{}", winners[0]).as_bytes());

    for (i, result) in results.into_iter().enumerate() {
        if i == winners[0] {
            continue;
        }
        match result {
            CommitResult::Failure(NotaryError::Conflict { consumed, .. }) => {
                let details = &consumed[&state(0)];
                assert_eq!(details.consuming_tx, winner_tx);
                assert_eq!(details.kind, ConsumedStateType::Input);
                // The loser's private state was not the conflict.
                assert!(!consumed.contains_key(&state(i as u32 + 1)));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_concurrent_spends_single_node_have_one_winner() {
    let (provider, notary) = single_node();
    assert_one_winner(&[provider], &notary).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spends_across_replicas_have_one_winner() {
    let cluster = ReplicaCluster::start(3);
    cluster.wait_for_leader().await;
    let providers: Vec<Arc<dyn UniquenessProvider>> = cluster
        .providers
        .iter()
        .map(|p| p.clone() as Arc<dyn UniquenessProvider>)
        .collect();

    assert_one_winner(&providers, &cluster.notary).await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_resubmission_returns_original_success() {
    let (provider, notary) = single_node();
    let alice = identity("Alice");
    let first = request(&alice, &notary, "tx-1", vec![state(0), state(1)]);

    let original = provider.commit(first.clone()).await.unwrap();
    assert!(original.is_success());
    for _ in 0..3 {
        assert_eq!(provider.commit(first.clone()).await.unwrap(), original);
    }
}

#[tokio::test]
async fn test_conflicting_request_records_none_of_its_states() {
    let (provider, notary) = single_node();
    let alice = identity("Alice");
    let bob = identity("Bob");

    provider
        .commit(request(&alice, &notary, "tx-a", vec![state(0)]))
        .await
        .unwrap();
    let mixed = provider
        .commit(request(&bob, &notary, "tx-b", vec![state(1), state(0), state(2)]))
        .await
        .unwrap();
    assert!(!mixed.is_success());

    // States 1 and 2 are still free for anyone.
    let later = provider
        .commit(request(&bob, &notary, "tx-c", vec![state(1), state(2)]))
        .await
        .unwrap();
    assert!(later.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leader_loss_mid_commit_commits_once() {
    let cluster = ReplicaCluster::start(3);
    let leader = cluster.wait_for_leader().await;
    let alice = identity("Alice");
    let spend = request(&alice, &cluster.notary, "failover", vec![state(0)]);

    // Submit through a follower, then cut the leader off while it is in flight.
    let follower = (leader + 1) % 3;
    let provider = cluster.providers[follower].clone();
    let in_flight = {
        let spend = spend.clone();
        tokio::spawn(async move { provider.commit(spend).await })
    };
    cluster.transport.take_down(cluster.replicas[leader].id());
    let result = in_flight.await.unwrap().unwrap();
    assert!(result.is_success());

    // The identical command again: same answer, still one entry.
    let again = cluster.providers[follower].commit(spend.clone()).await.unwrap();
    assert_eq!(again, result);

    cluster.transport.bring_up(cluster.replicas[leader].id());
    wait_until("logs to converge", || cluster.converged()).await;

    // Every replica recorded the spend as the consumer, and no copy of the
    // command was ever decided any other way.
    let reference = cluster.replicas[0].request_log().unwrap();
    let attempts: Vec<_> = reference
        .iter()
        .filter(|entry| entry.tx_id == spend.tx_id)
        .collect();
    assert!(!attempts.is_empty());
    assert!(attempts.iter().all(|entry| entry.decision.is_ok()));
    for replica in &cluster.replicas {
        assert_eq!(replica.request_log().unwrap(), reference);
        assert_eq!(replica.consumed_by(&state(0)).unwrap(), Some(spend.tx_id));
    }
    cluster.shutdown().await;
}
