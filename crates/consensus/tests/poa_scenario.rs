//! Three-member federation driving the engine end to end.

use slotchain_consensus::poa::{self, BlockProposer, Federation};
use slotchain_consensus::{ConsensusParams, ConsensusRuleEngine, FixedTimeSource};
use slotchain_core::{Block, Interpreter, Keypair, OutPoint, Script, Transaction, TxIn, TxOut, COIN};
use slotchain_storage::Storage;
use std::sync::Arc;

/// A round boundary for spacing 16 and three members.
const ROUND_START: u64 = 1_699_999_968;

struct Network {
    keys: Vec<Keypair>,
    federation: Arc<Federation>,
    params: ConsensusParams,
    genesis: Block,
    engine: ConsensusRuleEngine,
}

fn network() -> Network {
    let keys: Vec<_> = (0..3).map(|_| Keypair::generate()).collect();
    let federation = Arc::new(
        Federation::new(keys.iter().map(|k| k.public_key).collect(), 16).unwrap(),
    );
    let params = ConsensusParams::for_testing();
    let coinbase = Transaction::coinbase(
        0,
        vec![TxOut::new(50 * COIN, Script::pay_to_pubkey(&keys[0].public_key))],
        b"genesis",
    );
    let genesis = Block::genesis(ROUND_START, params.poa_bits, coinbase);
    let engine = ConsensusRuleEngine::open(
        Storage::open_temporary().unwrap(),
        params.clone(),
        poa::rule_set(Arc::clone(&federation)),
        Arc::new(Interpreter),
        Arc::new(FixedTimeSource::new(ROUND_START + 10_000)),
        &genesis,
    )
    .unwrap();
    Network {
        keys,
        federation,
        params,
        genesis,
        engine,
    }
}

fn block_signed_by(net: &Network, timestamp: u64, signer: &Keypair) -> Block {
    let coinbase = Transaction::coinbase(
        1,
        vec![TxOut::new(COIN, Script::pay_to_pubkey(&signer.public_key))],
        b"manual",
    );
    Block::new(1, net.genesis.hash(), timestamp, net.params.poa_bits, vec![coinbase]).signed(signer)
}

#[tokio::test]
async fn test_third_slot_belongs_to_third_member() {
    let net = network();
    // the next round starts at ROUND_START + 48, C owns +32 within it
    let timestamp = ROUND_START + 48 + 32;
    assert_eq!(*net.federation.slot_owner(timestamp), net.keys[2].public_key);

    let by_a = block_signed_by(&net, timestamp, &net.keys[0]);
    let err = net.engine.validate_block(by_a).await.unwrap_err();
    assert_eq!(err.code(), "invalid-header-signature");

    let by_c = block_signed_by(&net, timestamp, &net.keys[2]);
    let update = net.engine.validate_block(by_c).await.unwrap();
    assert_eq!(update.height, 1);
}

#[tokio::test]
async fn test_off_slot_timestamp_fails_before_signature() {
    let net = network();
    let timestamp = ROUND_START + 48 + 33;
    // signed by the owner of the slot the timestamp falls in
    let owner = net
        .keys
        .iter()
        .find(|k| k.public_key == *net.federation.slot_owner(timestamp))
        .unwrap();
    let block = block_signed_by(&net, timestamp, owner);
    let mut unsigned = block.clone();
    unsigned.header.signature = None;

    let err = net.engine.validate_block(unsigned).await.unwrap_err();
    assert_eq!(err.code(), "invalid-header-timestamp");

    // the signature is not hashed, so the signed copy stays rejected
    assert_eq!(
        net.engine.validate_block(block).await.unwrap_err().code(),
        "block-known-invalid"
    );
}

#[tokio::test]
async fn test_wrong_bits_rejected() {
    let net = network();
    let timestamp = ROUND_START + 48 + 32;
    let coinbase = Transaction::coinbase(
        1,
        vec![TxOut::new(COIN, Script::pay_to_pubkey(&net.keys[2].public_key))],
        b"manual",
    );
    let block = Block::new(1, net.genesis.hash(), timestamp, 0x1d00_ffff, vec![coinbase])
        .signed(&net.keys[2]);
    assert_eq!(
        net.engine.validate_block(block).await.unwrap_err().code(),
        "invalid-header-bits"
    );
}

#[tokio::test]
async fn test_tampered_body_breaks_block_signature() {
    let net = network();
    let timestamp = ROUND_START + 48 + 32;
    let mut block = block_signed_by(&net, timestamp, &net.keys[2]);
    block.transactions[0].outputs[0].value = 2 * COIN;
    assert_eq!(
        net.engine.validate_block(block).await.unwrap_err().code(),
        "invalid-block-signature"
    );
}

#[tokio::test]
async fn test_proposed_chain_with_spend() {
    let net = network();
    let tip = net.engine.tip().await;

    let c = BlockProposer::new(net.keys[2].clone(), Arc::clone(&net.federation), net.params.clone());
    let first = c.propose_block(&tip, ROUND_START + 32, vec![], 0).unwrap();
    net.engine.validate_block(first).await.unwrap();
    let tip = net.engine.tip().await;

    // spend the genesis coinbase paid to A
    let funding = &net.genesis.transactions[0];
    let mut spend = Transaction::new(
        2,
        vec![TxIn::new(OutPoint::new(funding.txid(), 0), Script::new(), u32::MAX)],
        vec![TxOut::new(
            49 * COIN,
            Script::pay_to_address(&net.keys[1].public_key.to_address()),
        )],
        0,
    );
    spend.sign_input(0, &funding.outputs[0], &net.keys[0]).unwrap();

    let a = BlockProposer::new(net.keys[0].clone(), Arc::clone(&net.federation), net.params.clone());
    let second = a
        .propose_block(&tip, ROUND_START + 48, vec![spend.clone()], COIN)
        .unwrap();
    let update = net.engine.validate_block(second).await.unwrap();
    assert_eq!(update.height, 2);
    assert_eq!(update.fees, COIN);

    let coins = net.engine.coin_store().get_coins(&spend.txid()).unwrap().unwrap();
    assert_eq!(coins.height, 2);
    assert!(net.engine.coin_store().get_coins(&funding.txid()).unwrap().is_none());
}
