//! # Notarisation Scenarios
//!
//! Parties notarise through flows; the notary commits through the replica
//! cluster. Everything is assembled by `node-runtime` exactly as the binary
//! assembles it.

use futures::future::join_all;
use lf_01_flow_engine::FlowError;
use lf_02_uniqueness::NotaryError;
use lf_04_notary::{NotaryClientError, NotaryRejection};
use node_runtime::{NodeConfig, NodeContainer};
use shared_types::{LedgerTransaction, Party, SecureHash, StateRef};
use std::time::Duration;

use super::support::{fast_node_config, wait_until};

async fn network(config: NodeConfig) -> NodeContainer {
    let node = NodeContainer::assemble(config).unwrap();
    node.start().await.unwrap();
    node.notary()
        .wait_for_leader(Duration::from_secs(5))
        .await
        .unwrap();
    node
}

fn tx1() -> SecureHash {
    SecureHash::sha256(b"tx1")
}

fn spend(notary: &Party, inputs: Vec<StateRef>, memo: &str) -> LedgerTransaction {
    LedgerTransaction::new(
        inputs,
        vec![],
        vec![memo.as_bytes().to_vec()],
        notary.clone(),
        None,
    )
}

fn logs_identical(node: &NodeContainer) -> bool {
    let replicas = node.notary().replicas();
    let first = replicas[0].log();
    replicas
        .iter()
        .all(|r| r.log() == first && r.last_applied() == first.len() as u64)
}

#[tokio::test]
async fn test_second_consumer_is_told_who_spent_the_state() {
    let node = network(fast_node_config()).await;
    let notary = node.notary().party().clone();
    let alice = node.party("Alice").unwrap();
    let bob = node.party("Bob").unwrap();

    let a_tx = spend(&notary, vec![StateRef::new(tx1(), 0)], "alice pays carol");
    let signature = alice.notarise(a_tx.clone()).await.unwrap();
    assert!(signature.is_valid(a_tx.id.as_bytes()));

    let b_tx = spend(&notary, vec![StateRef::new(tx1(), 0)], "bob pays dave");
    match bob.notarise(b_tx.clone()).await {
        Err(NotaryClientError::Rejected(NotaryRejection::Commit(NotaryError::Conflict {
            tx_id,
            consumed,
        }))) => {
            assert_eq!(tx_id, b_tx.id);
            assert_eq!(consumed.len(), 1);
            assert_eq!(consumed[&StateRef::new(tx1(), 0)].consuming_tx, a_tx.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_parties_get_one_signature() {
    let node = network(fast_node_config()).await;
    let notary = node.notary().party().clone();
    let contested = StateRef::new(tx1(), 7);

    let attempts = node.parties().flat_map(|party| {
        let notary = notary.clone();
        (0..3).map(move |i| {
            let tx = spend(&notary, vec![contested], &format!("{} #{i}", party.party()));
            party.notarise(tx)
        })
    });
    let results = join_all(attempts).await;

    let signed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(signed, 1, "results: {results:?}");
    for result in results.into_iter().filter_map(Result::err) {
        assert!(matches!(
            result,
            NotaryClientError::Rejected(NotaryRejection::Commit(NotaryError::Conflict { .. }))
        ));
    }
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failover_leaves_identical_logs() {
    let node = network(fast_node_config()).await;
    let notary = node.notary().party().clone();
    let alice = node.party("Alice").unwrap();

    alice
        .notarise(spend(&notary, vec![StateRef::new(tx1(), 0)], "before"))
        .await
        .unwrap();

    let old_leader = node.notary().leader().unwrap().id().clone();
    node.notary().take_down(&old_leader);
    let during = spend(&notary, vec![StateRef::new(tx1(), 1)], "during");
    let signature = alice.notarise(during.clone()).await.unwrap();

    // Resubmitting after the failover is answered from the log, not refused.
    assert_eq!(alice.notarise(during).await.unwrap(), signature);

    node.notary().bring_up(&old_leader);
    alice
        .notarise(spend(&notary, vec![StateRef::new(tx1(), 2)], "after"))
        .await
        .unwrap();
    wait_until("replica logs to converge", || logs_identical(&node)).await;
    node.shutdown().await;
}

#[tokio::test]
async fn test_validating_notary_refuses_invalid_transaction() {
    let mut config = fast_node_config();
    config.notary.validating = true;
    let node = network(config).await;
    let notary = node.notary().party().clone();
    let alice = node.party("Alice").unwrap();

    let no_outputs = LedgerTransaction::new(
        vec![StateRef::new(tx1(), 0)],
        vec![],
        vec![],
        notary.clone(),
        None,
    );
    assert_eq!(
        alice.notarise(no_outputs).await,
        Err(NotaryClientError::Rejected(NotaryRejection::TransactionInvalid(
            "transaction has no outputs".into()
        )))
    );

    // Nothing was consumed by the refused transaction.
    alice
        .notarise(spend(&notary, vec![StateRef::new(tx1(), 0)], "valid"))
        .await
        .unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_party_without_notary_service_rejects_session() {
    let node = network(fast_node_config()).await;
    let alice = node.party("Alice").unwrap();
    let bob = node.party("Bob").unwrap().party().clone();

    let err = alice
        .notarise(spend(&bob, vec![StateRef::new(tx1(), 0)], "wrong notary"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NotaryClientError::Flow(FlowError::SessionRejected { .. })
    ));
    node.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_cluster_fails_notary_flow_without_details() {
    let node = network(fast_node_config()).await;
    let notary = node.notary().party().clone();
    for replica in node.notary().replicas() {
        node.notary().take_down(replica.id());
    }

    let err = node
        .party("Alice")
        .unwrap()
        .notarise(spend(&notary, vec![StateRef::new(tx1(), 0)], "no quorum"))
        .await
        .unwrap_err();
    match err {
        NotaryClientError::Flow(e @ FlowError::CounterpartyFailed(_)) => {
            assert!(!e.to_string().contains("replica"));
        }
        other => panic!("expected counterparty failure, got {other:?}"),
    }
    node.shutdown().await;
}
