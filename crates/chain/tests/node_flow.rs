//! A single-signer federation producing blocks from its own mempool.

use slotchain_chain::{MempoolSettings, Node, NodeConfig, NodeError};
use slotchain_consensus::poa::{BlockProposer, FederationConfig};
use slotchain_consensus::{ConsensusParams, FixedTimeSource};
use slotchain_core::{
    Amount, Block, Keypair, OutPoint, Script, Transaction, TxIn, TxOut, COIN,
};
use std::io::Write;
use std::sync::Arc;

/// On a slot boundary for spacing 16.
const T0: u64 = 1_700_000_000;
const SPACING: u64 = 16;

struct Signer {
    key: Keypair,
    config: NodeConfig,
    node: Node,
    proposer: BlockProposer,
}

fn config_for(key: &Keypair) -> NodeConfig {
    let mut config = NodeConfig {
        consensus: ConsensusParams::for_testing(),
        mempool: MempoolSettings::for_testing(),
        federation: FederationConfig {
            members: vec![key.public_key.to_hex()],
            slot_spacing_seconds: SPACING,
        },
        ..NodeConfig::default()
    };
    config.genesis.timestamp = T0;
    config
}

fn signer() -> Signer {
    let key = Keypair::generate();
    let config = config_for(&key);
    let node = Node::open(&config, Arc::new(FixedTimeSource::new(T0 + 1_000))).unwrap();
    let federation = Arc::new(config.federation.to_federation().unwrap());
    let proposer = BlockProposer::new(key.clone(), federation, config.consensus.clone());
    Signer {
        key,
        config,
        node,
        proposer,
    }
}

impl Signer {
    fn genesis_coin(&self) -> (OutPoint, TxOut) {
        let coinbase = &self.config.genesis_block().unwrap().transactions[0];
        (OutPoint::new(coinbase.txid(), 0), coinbase.outputs[0].clone())
    }

    fn pay(&self, (outpoint, prevout): (OutPoint, TxOut), fee: Amount, sequence: u32) -> Transaction {
        let mut tx = Transaction::new(
            2,
            vec![TxIn::new(outpoint, Script::new(), sequence)],
            vec![TxOut::new(
                prevout.value - fee,
                Script::pay_to_pubkey(&self.key.public_key),
            )],
            0,
        );
        tx.sign_input(0, &prevout, &self.key).unwrap();
        tx
    }
}

#[tokio::test]
async fn test_block_from_template_clears_mempool() {
    let s = signer();
    let tx = s.pay(s.genesis_coin(), 10_000, u32::MAX);
    s.node.try_admit_transaction(tx.clone()).await.unwrap();

    let template = s.node.block_template().await;
    assert_eq!(template.transactions, vec![tx.clone()]);
    assert_eq!(template.fees, 10_000);

    let block = s.node.propose_block(&s.proposer, T0 + SPACING).await.unwrap();
    assert_eq!(block.transactions[0].outputs[0].value, 50 * COIN + 10_000);

    let update = s.node.try_validate_block(block).await.unwrap();
    assert_eq!(update.height, 1);
    assert_eq!(update.fees, 10_000);
    assert_eq!(s.node.tip().await.hash, update.hash);
    assert!(!s.node.mempool_contains(&tx.txid()).await);
    assert_eq!(s.node.mempool_stats().await.count, 0);
}

#[tokio::test]
async fn test_block_evicts_conflicting_package() {
    let s = signer();
    let pooled = s.pay(s.genesis_coin(), 10_000, u32::MAX);
    let child = s.pay((OutPoint::new(pooled.txid(), 0), pooled.outputs[0].clone()), 10_000, u32::MAX);
    s.node.try_admit_transaction(pooled.clone()).await.unwrap();
    s.node.try_admit_transaction(child.clone()).await.unwrap();

    // a different spend of the same coin confirms instead
    let confirmed = s.pay(s.genesis_coin(), 20_000, u32::MAX);
    let tip = s.node.tip().await;
    let block = s
        .proposer
        .propose_block(&tip, T0 + SPACING, vec![confirmed], 20_000)
        .unwrap();
    s.node.try_validate_block(block).await.unwrap();

    assert!(!s.node.mempool_contains(&pooled.txid()).await);
    assert!(!s.node.mempool_contains(&child.txid()).await);
    assert_eq!(s.node.mempool_stats().await.count, 0);
}

#[tokio::test]
async fn test_rejected_block_leaves_mempool_alone() {
    let s = signer();
    let tx = s.pay(s.genesis_coin(), 10_000, u32::MAX);
    s.node.try_admit_transaction(tx.clone()).await.unwrap();

    let tip = s.node.tip().await;
    let greedy = Transaction::coinbase(
        1,
        vec![TxOut::new(51 * COIN, Script::pay_to_pubkey(&s.key.public_key))],
        b"greedy",
    );
    let block = Block::new(1, tip.hash, T0 + SPACING, s.config.consensus.poa_bits, vec![greedy])
        .signed(&s.key);
    let err = s.node.try_validate_block(block.clone()).await.unwrap_err();
    assert_eq!(err.code(), "bad-cb-amount");

    assert_eq!(s.node.tip().await.hash, tip.hash);
    assert!(s.node.mempool_contains(&tx.txid()).await);

    // neither the block nor its header is looked at again
    let again = s.node.try_validate_block(block.clone()).await.unwrap_err();
    assert_eq!(again.code(), "block-known-invalid");
    let header = s.node.accept_header(block.header).await.unwrap_err();
    assert_eq!(header.code(), "block-known-invalid");
}

#[tokio::test]
async fn test_proposing_outside_our_slot_fails() {
    let s = signer();
    let err = s.node.propose_block(&s.proposer, T0 + SPACING + 1).await.unwrap_err();
    assert!(matches!(err, NodeError::Proposer(_)));
}

#[tokio::test]
async fn test_headers_join_the_tree_before_their_body() {
    let s = signer();
    let block = s.node.propose_block(&s.proposer, T0 + SPACING).await.unwrap();
    let chained = s.node.accept_header(block.header.clone()).await.unwrap();
    assert_eq!(chained.height, 1);
    // the tip only moves once the body is connected
    assert_eq!(s.node.tip().await.height, 0);
    s.node.try_validate_block(block).await.unwrap();
    assert_eq!(s.node.tip().await.hash, chained.hash);
}

#[test]
fn test_config_file_round_trip() {
    let key = Keypair::generate();
    let config = config_for(&key);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string_pretty(&config).unwrap().as_bytes())
        .unwrap();

    let loaded = NodeConfig::from_json_file(file.path()).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(
        loaded.genesis_block().unwrap().hash(),
        config.genesis_block().unwrap().hash()
    );
}

#[test]
fn test_malformed_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();
    let err = NodeConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, NodeError::Config(_)));
}
