//! Admission scenarios against a node with a funded genesis.

use slotchain_chain::{FeeRate, MempoolError, MempoolSettings, Node};
use slotchain_consensus::{ConsensusParams, ConsensusRuleEngine, FixedTimeSource, RuleSet};
use slotchain_core::{
    Amount, Block, Interpreter, Keypair, OutPoint, Script, Transaction, TxIn, TxOut, COIN,
};
use slotchain_storage::Storage;
use std::sync::Arc;

const T0: u64 = 1_700_000_000;
const FUNDING_OUTPUTS: u32 = 8;
/// Index of the genesis output locked by a bare `OP_1`.
const ANYONE_CAN_SPEND: u32 = FUNDING_OUTPUTS;

const FINAL: u32 = u32::MAX;
const REPLACEABLE: u32 = 0xffff_fffd;

struct Harness {
    key: Keypair,
    funding: Transaction,
    node: Node,
}

impl Harness {
    fn new(settings: MempoolSettings) -> Self {
        let key = Keypair::generate();
        let mut outputs: Vec<TxOut> = (0..FUNDING_OUTPUTS)
            .map(|_| TxOut::new(10 * COIN, Script::pay_to_pubkey(&key.public_key)))
            .collect();
        outputs.push(TxOut::new(COIN, Script::new().push_int(1)));
        let funding = Transaction::coinbase(0, outputs, b"genesis");

        let params = ConsensusParams::for_testing();
        let genesis = Block::genesis(T0, params.poa_bits, funding.clone());
        let engine = ConsensusRuleEngine::open(
            Storage::open_temporary().unwrap(),
            params,
            RuleSet::standard(),
            Arc::new(Interpreter),
            Arc::new(FixedTimeSource::new(T0 + 1_000)),
            &genesis,
        )
        .unwrap();
        Self {
            key,
            funding,
            node: Node::new(engine, settings),
        }
    }

    fn coin(&self, vout: u32) -> (OutPoint, TxOut) {
        output_of(&self.funding, vout)
    }

    /// Spend `inputs` into one output back to our key, leaving `fee`.
    fn pay(&self, inputs: &[(OutPoint, TxOut)], fee: Amount, sequence: u32) -> Transaction {
        let total: Amount = inputs.iter().map(|(_, out)| out.value).sum();
        let output = TxOut::new(total - fee, Script::pay_to_pubkey(&self.key.public_key));
        self.sign(inputs, vec![output], sequence)
    }

    fn sign(&self, inputs: &[(OutPoint, TxOut)], outputs: Vec<TxOut>, sequence: u32) -> Transaction {
        let mut tx = Transaction::new(
            2,
            inputs
                .iter()
                .map(|(outpoint, _)| TxIn::new(*outpoint, Script::new(), sequence))
                .collect(),
            outputs,
            0,
        );
        for (index, (_, prevout)) in inputs.iter().enumerate() {
            tx.sign_input(index, prevout, &self.key).unwrap();
        }
        tx
    }

    async fn reject(&self, tx: Transaction) -> MempoolError {
        self.node.try_admit_transaction(tx).await.unwrap_err()
    }
}

fn output_of(tx: &Transaction, vout: u32) -> (OutPoint, TxOut) {
    (
        OutPoint::new(tx.txid(), vout),
        tx.outputs[vout as usize].clone(),
    )
}

fn harness() -> Harness {
    Harness::new(MempoolSettings::for_testing())
}

#[tokio::test]
async fn test_admits_and_refuses_duplicates() {
    let h = harness();
    let tx = h.pay(&[h.coin(0)], 10_000, FINAL);
    let admission = h.node.try_admit_transaction(tx.clone()).await.unwrap();
    assert_eq!(admission.entry.fee, 10_000);
    assert!(admission.replaced.is_empty());
    assert!(h.node.mempool_contains(&tx.txid()).await);

    assert_eq!(h.reject(tx).await.code(), "already-known");
    let stats = h.node.mempool_stats().await;
    assert_eq!(stats.count, 1);
    assert_eq!(stats.total_fees, 10_000);
}

#[tokio::test]
async fn test_fee_below_relay_floor() {
    let h = harness();
    let err = h.reject(h.pay(&[h.coin(0)], 100, FINAL)).await;
    assert_eq!(err.code(), "min-fee-not-met");
    assert_eq!(h.node.mempool_stats().await.count, 0);
}

#[tokio::test]
async fn test_free_transaction_needs_priority() {
    let h = Harness::new(MempoolSettings {
        relay_priority: true,
        ..MempoolSettings::for_testing()
    });
    // genesis coins have aged a single block
    let err = h.reject(h.pay(&[h.coin(0)], 0, FINAL)).await;
    assert_eq!(err.code(), "insufficient-priority");
}

#[tokio::test]
async fn test_prioritised_transaction_passes_fee_floor() {
    let h = harness();
    let tx = h.pay(&[h.coin(0)], 0, FINAL);
    assert_eq!(h.reject(tx.clone()).await.code(), "min-fee-not-met");

    h.node.prioritise_transaction(tx.txid(), 10_000).await;
    let admission = h.node.try_admit_transaction(tx).await.unwrap();
    assert_eq!(admission.entry.fee, 0);
    assert_eq!(admission.entry.modified_fee(), 10_000);
}

#[tokio::test]
async fn test_missing_and_spent_inputs() {
    let h = harness();
    let unknown = (
        OutPoint::new(slotchain_core::Hash([7; 32]), 0),
        TxOut::new(COIN, Script::pay_to_pubkey(&h.key.public_key)),
    );
    let err = h.reject(h.pay(&[unknown], 10_000, FINAL)).await;
    assert_eq!(err.code(), "missing-inputs");
    assert!(err.is_missing_inputs());

    let (funding_outpoint, funding_out) = h.coin(0);
    let past_end = (OutPoint::new(funding_outpoint.txid, 99), funding_out);
    let err = h.reject(h.pay(&[past_end], 10_000, FINAL)).await;
    assert_eq!(err.code(), "bad-inputs-spent");
    assert!(!err.is_missing_inputs());
}

#[tokio::test]
async fn test_non_signaling_spend_is_a_conflict() {
    let h = harness();
    let original = h.pay(&[h.coin(0)], 10_000, FINAL);
    h.node.try_admit_transaction(original.clone()).await.unwrap();

    let double_spend = h.pay(&[h.coin(0)], 50_000, FINAL);
    match h.reject(double_spend).await {
        MempoolError::Conflict(txid) => assert_eq!(txid, original.txid()),
        other => panic!("unexpected rejection: {other}"),
    }
}

#[tokio::test]
async fn test_replacement_disabled_by_settings() {
    let h = Harness::new(MempoolSettings {
        enable_replacement: false,
        ..MempoolSettings::for_testing()
    });
    h.node
        .try_admit_transaction(h.pay(&[h.coin(0)], 10_000, REPLACEABLE))
        .await
        .unwrap();
    let err = h.reject(h.pay(&[h.coin(0)], 50_000, REPLACEABLE)).await;
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
async fn test_replace_by_fee() {
    let h = harness();
    let original = h.pay(&[h.coin(0)], 10_000, REPLACEABLE);
    h.node.try_admit_transaction(original.clone()).await.unwrap();

    // same size and fee, different payee
    let other = Keypair::generate();
    let same_rate = h.sign(
        &[h.coin(0)],
        vec![TxOut::new(
            10 * COIN - 10_000,
            Script::pay_to_pubkey(&other.public_key),
        )],
        REPLACEABLE,
    );
    assert_eq!(h.reject(same_rate).await.code(), "insufficient-fee");

    // a higher rate, but the extra fee does not pay for its own relay
    let barely_more = h.pay(&[h.coin(0)], 10_050, REPLACEABLE);
    assert_eq!(h.reject(barely_more).await.code(), "insufficient-fee");

    let replacement = h.pay(&[h.coin(0)], 20_000, REPLACEABLE);
    let admission = h.node.try_admit_transaction(replacement.clone()).await.unwrap();
    assert_eq!(admission.replaced.len(), 1);
    assert_eq!(admission.replaced[0].txid, original.txid());
    assert!(!h.node.mempool_contains(&original.txid()).await);
    assert!(h.node.mempool_contains(&replacement.txid()).await);
    assert_eq!(h.node.mempool_stats().await.count, 1);
}

#[tokio::test]
async fn test_replacement_evicts_descendants() {
    let h = harness();
    let parent = h.pay(&[h.coin(0)], 10_000, REPLACEABLE);
    let child = h.pay(&[output_of(&parent, 0)], 10_000, FINAL);
    h.node.try_admit_transaction(parent.clone()).await.unwrap();
    h.node.try_admit_transaction(child.clone()).await.unwrap();

    // must outbid parent and child together
    let cheap = h.pay(&[h.coin(0)], 15_000, REPLACEABLE);
    assert_eq!(h.reject(cheap).await.code(), "insufficient-fee");

    let replacement = h.pay(&[h.coin(0)], 40_000, REPLACEABLE);
    let admission = h.node.try_admit_transaction(replacement).await.unwrap();
    let mut replaced: Vec<_> = admission.replaced.iter().map(|e| e.txid).collect();
    replaced.sort();
    let mut expected = vec![parent.txid(), child.txid()];
    expected.sort();
    assert_eq!(replaced, expected);
    assert_eq!(h.node.mempool_stats().await.count, 1);
}

#[tokio::test]
async fn test_replacement_candidate_limit() {
    let settings = MempoolSettings {
        max_replacement_candidates: 2,
        ..MempoolSettings::for_testing()
    };

    // parent plus one child is exactly at the limit
    let h = Harness::new(settings.clone());
    let parent = h.sign(
        &[h.coin(0)],
        vec![
            TxOut::new(5 * COIN, Script::pay_to_pubkey(&h.key.public_key)),
            TxOut::new(5 * COIN - 10_000, Script::pay_to_pubkey(&h.key.public_key)),
        ],
        REPLACEABLE,
    );
    h.node.try_admit_transaction(parent.clone()).await.unwrap();
    h.node
        .try_admit_transaction(h.pay(&[output_of(&parent, 0)], 10_000, FINAL))
        .await
        .unwrap();
    let admission = h
        .node
        .try_admit_transaction(h.pay(&[h.coin(0)], 100_000, REPLACEABLE))
        .await
        .unwrap();
    assert_eq!(admission.replaced.len(), 2);

    // a second child pushes it over
    let h = Harness::new(settings);
    let parent = h.sign(
        &[h.coin(0)],
        vec![
            TxOut::new(5 * COIN, Script::pay_to_pubkey(&h.key.public_key)),
            TxOut::new(5 * COIN - 10_000, Script::pay_to_pubkey(&h.key.public_key)),
        ],
        REPLACEABLE,
    );
    h.node.try_admit_transaction(parent.clone()).await.unwrap();
    for vout in 0..2 {
        h.node
            .try_admit_transaction(h.pay(&[output_of(&parent, vout)], 10_000, FINAL))
            .await
            .unwrap();
    }
    match h.reject(h.pay(&[h.coin(0)], 100_000, REPLACEABLE)).await {
        MempoolError::TooManyPotentialReplacements { count, max } => {
            assert_eq!((count, max), (3, 2));
        }
        other => panic!("unexpected rejection: {other}"),
    }
    assert_eq!(h.node.mempool_stats().await.count, 3);
}

#[tokio::test]
async fn test_replacement_may_not_add_unconfirmed_inputs() {
    let h = harness();
    h.node
        .try_admit_transaction(h.pay(&[h.coin(0)], 10_000, REPLACEABLE))
        .await
        .unwrap();
    let unrelated = h.pay(&[h.coin(1)], 10_000, FINAL);
    h.node.try_admit_transaction(unrelated.clone()).await.unwrap();

    let replacement = h.pay(&[h.coin(0), output_of(&unrelated, 0)], 100_000, REPLACEABLE);
    match h.reject(replacement).await {
        MempoolError::ReplacementAddsUnconfirmed(parent) => assert_eq!(parent, unrelated.txid()),
        other => panic!("unexpected rejection: {other}"),
    }
}

#[tokio::test]
async fn test_spending_the_conflict_it_replaces() {
    let h = harness();
    let original = h.pay(&[h.coin(0)], 10_000, REPLACEABLE);
    h.node.try_admit_transaction(original.clone()).await.unwrap();

    let tx = h.pay(&[h.coin(0), output_of(&original, 0)], 100_000, REPLACEABLE);
    assert_eq!(h.reject(tx).await.code(), "bad-txns-spends-conflicting-tx");
    assert!(h.node.mempool_contains(&original.txid()).await);
}

#[tokio::test]
async fn test_ancestor_limit_ignores_fee() {
    let h = Harness::new(MempoolSettings {
        max_ancestors: 3,
        ..MempoolSettings::for_testing()
    });
    let mut previous = h.coin(0);
    for _ in 0..3 {
        let tx = h.pay(&[previous], 10_000, FINAL);
        h.node.try_admit_transaction(tx.clone()).await.unwrap();
        previous = output_of(&tx, 0);
    }
    let err = h.reject(h.pay(&[previous], 5 * COIN, FINAL)).await;
    assert_eq!(err.code(), "too-long-mempool-chain");
    assert_eq!(h.node.mempool_stats().await.count, 3);
}

#[tokio::test]
async fn test_relative_lock_time_not_reached() {
    let h = harness();
    // five blocks after the genesis coin confirmed
    let err = h.reject(h.pay(&[h.coin(0)], 10_000, 5)).await;
    assert_eq!(err.code(), "non-bip68-final");
}

#[tokio::test]
async fn test_non_standard_input() {
    let h = harness();
    let (outpoint, prevout) = h.coin(ANYONE_CAN_SPEND);
    let tx = Transaction::new(
        2,
        vec![TxIn::new(outpoint, Script::new(), FINAL)],
        vec![TxOut::new(
            prevout.value - 10_000,
            Script::pay_to_pubkey(&h.key.public_key),
        )],
        0,
    );
    assert_eq!(h.reject(tx).await.code(), "nonstandard-inputs");
}

#[tokio::test]
async fn test_script_failures_are_classified() {
    let h = harness();

    // outputs changed after signing
    let mut tampered = h.pay(&[h.coin(0)], 10_000, FINAL);
    tampered.outputs[0].value -= 1;
    assert_eq!(
        h.reject(tampered).await.code(),
        "mandatory-script-verify-flag-failed"
    );

    // valid signature with an extra item left on the stack
    let mut unclean = h.pay(&[h.coin(1)], 10_000, FINAL);
    let signature = unclean.inputs[0].script_sig.first_push().unwrap();
    unclean.inputs[0].script_sig = Script::new().push_slice(&[0xaa]).push_slice(&signature);
    assert_eq!(
        h.reject(unclean).await.code(),
        "non-mandatory-script-verify-flag-failed"
    );
    assert_eq!(h.node.mempool_stats().await.count, 0);
}

#[tokio::test]
async fn test_dust_output() {
    let h = harness();
    let tx = h.sign(
        &[h.coin(0)],
        vec![TxOut::new(100, Script::pay_to_pubkey(&h.key.public_key))],
        FINAL,
    );
    match h.reject(tx).await {
        MempoolError::DustOutputs(index) => assert_eq!(index, 0),
        other => panic!("unexpected rejection: {other}"),
    }
}

#[tokio::test]
async fn test_oversized_witness_item() {
    let h = harness();
    let mut tx = h.pay(&[h.coin(0)], 10_000, FINAL);
    tx.inputs[0].witness = vec![vec![0u8; 81]];
    assert_eq!(h.reject(tx).await.code(), "nonstandard-witness");

    let mut crowded = h.pay(&[h.coin(1)], 10_000, FINAL);
    crowded.inputs[0].witness = vec![vec![1u8]; 101];
    assert_eq!(h.reject(crowded).await.code(), "nonstandard-witness");
}

#[tokio::test]
async fn test_absurd_fee_guard() {
    let h = Harness::new(MempoolSettings {
        absurd_fee_multiplier: Some(10),
        ..MempoolSettings::for_testing()
    });
    let vsize = h.pay(&[h.coin(0)], 0, FINAL).vsize();
    let relay_fee = FeeRate::new(1_000).fee(vsize);

    match h.reject(h.pay(&[h.coin(0)], COIN, FINAL)).await {
        MempoolError::AbsurdlyHighFee { fee, max } => {
            assert_eq!(fee, COIN);
            assert_eq!(max, relay_fee * 10);
        }
        other => panic!("unexpected rejection: {other}"),
    }

    let fair = h.pay(&[h.coin(0)], relay_fee * 5, FINAL);
    h.node.try_admit_transaction(fair).await.unwrap();
}

#[tokio::test]
async fn test_full_pool_raises_the_fee_floor() {
    // every transaction below has the same shape, so the pool holds one
    let sample = {
        let h = harness();
        h.pay(&[h.coin(0)], 0, FINAL).vsize()
    };
    let h = Harness::new(MempoolSettings {
        max_size_bytes: sample,
        ..MempoolSettings::for_testing()
    });

    let kept = h.pay(&[h.coin(0)], 10_000, FINAL);
    h.node.try_admit_transaction(kept.clone()).await.unwrap();

    // the cheaper package is evicted right after insertion
    let evicted = h.pay(&[h.coin(1)], 5_000, FINAL);
    assert_eq!(h.reject(evicted.clone()).await.code(), "mempool-full");
    assert!(!h.node.mempool_contains(&evicted.txid()).await);
    assert!(h.node.mempool_contains(&kept.txid()).await);
    assert!(h.node.mempool_stats().await.rolling_min_fee > FeeRate::ZERO);

    // well above the relay floor but below the raised minimum
    match h.reject(h.pay(&[h.coin(2)], 4_000, FINAL)).await {
        MempoolError::MinFeeNotMet { fee, required } => {
            assert_eq!(fee, 4_000);
            assert!(required > 5_000);
        }
        other => panic!("unexpected rejection: {other}"),
    }
    assert_eq!(h.node.mempool_stats().await.count, 1);
}

#[tokio::test]
async fn test_shutdown_cancels_admission() {
    let h = harness();
    h.node.shutdown();
    let err = h.reject(h.pay(&[h.coin(0)], 10_000, FINAL)).await;
    assert_eq!(err, MempoolError::Cancelled);
}
