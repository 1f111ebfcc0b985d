use slotchain_core::{BlockHeader, Hash, Script, Transaction, TxOut, COIN};
use slotchain_storage::{CoinStore, CoinView, CoinViewCache, HeaderStore, Storage, StoredHeader};

#[test]
fn test_coins_and_head_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let coinbase = Transaction::coinbase(0, vec![TxOut::new(50 * COIN, Script::new().push_int(1))], b"");
    let genesis = StoredHeader {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash::ZERO,
            merkle_root: coinbase.txid(),
            timestamp: 1_700_000_000,
            bits: 0x207f_ffff,
            signature: None,
        },
        height: 0,
        chain_work: 1,
    };

    let root = {
        let storage = Storage::open(dir.path()).unwrap();
        let coins = CoinStore::new(storage.clone());
        let headers = HeaderStore::new(storage.clone());

        let mut overlay = CoinViewCache::new(&coins);
        overlay.add_transaction(&coinbase, 0).unwrap();
        overlay.set_best_block(genesis.header.hash());
        coins
            .commit(overlay.into_changes(), headers.advance_ops(&genesis).unwrap())
            .unwrap();
        storage.flush().unwrap();
        coins.state_root().unwrap()
    };

    let storage = Storage::open(dir.path()).unwrap();
    let coins = CoinStore::new(storage.clone());
    let headers = HeaderStore::new(storage);

    assert_eq!(coins.state_root().unwrap(), root);
    assert_eq!(coins.best_block().unwrap(), genesis.header.hash());
    assert!(coins.get_coins(&coinbase.txid()).unwrap().unwrap().coinbase);
    assert_eq!(headers.get_head().unwrap(), Some(genesis.header.hash()));
    assert_eq!(headers.get_header_at(0).unwrap(), Some(genesis));
}

#[test]
fn test_failed_advance_writes_nothing() {
    let storage = Storage::open_temporary().unwrap();
    let coins = CoinStore::new(storage.clone());
    let headers = HeaderStore::new(storage);
    let before = coins.state_root().unwrap();

    let orphan = StoredHeader {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash([1; 32]),
            merkle_root: Hash::ZERO,
            timestamp: 16,
            bits: 1,
            signature: None,
        },
        height: 3,
        chain_work: 4,
    };

    let mut overlay = CoinViewCache::new(&coins);
    let coinbase = Transaction::coinbase(3, vec![TxOut::new(COIN, Script::new().push_int(1))], b"");
    overlay.add_transaction(&coinbase, 3).unwrap();

    // the header check fails before any batch is built
    assert!(headers.advance_ops(&orphan).is_err());
    drop(overlay);
    assert_eq!(coins.state_root().unwrap(), before);
    assert!(!headers.is_initialized().unwrap());
}
