//! End-to-end tests of the in-memory wallet against a simulated node:
//! connect -> mine -> spend -> confirm -> reorg.
//!
//! Notifications are delivered synchronously by the node, so the wallet has
//! processed every block by the time `generate` returns.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use chain_dcr::{Address, Hash, Network, TxOut};
use harness_core::rpc::RpcClient;
use harness_core::{
    HarnessWallet, InMemoryWallet, Lifecycle, Seed, TestWalletConfig, WalletError, WalletFactory,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use support::{rpc_config, SimFactory, SimNode, SUBSIDY};

fn config(instance: u32) -> TestWalletConfig {
    TestWalletConfig::new(Network::Simnet, Seed::for_instance(instance))
}

/// A started wallet whose node mines to the wallet's coinbase address.
fn harness(instance: u32) -> (Arc<SimNode>, InMemoryWallet) {
    let node = SimNode::new(Network::Simnet);
    let wallet = WalletFactory.new_wallet(&config(instance)).unwrap();
    node.set_mining_address(&wallet.coinbase_address().unwrap());
    let factory = SimFactory { node: node.clone() };
    wallet.connect(&factory, &rpc_config()).unwrap();
    (node, wallet)
}

fn foreign_address() -> Address {
    Address::new([0x99; 20], Network::Simnet)
}

// ─── Scenarios: mine -> send -> confirm -> reorg ───────────────────

#[test]
fn genesis_mine_matures_after_sixteen_blocks() {
    let (node, wallet) = harness(0);
    assert_eq!(wallet.lifecycle(), Lifecycle::Syncing);

    node.generate(1).unwrap();
    assert_eq!(wallet.current_height(), 1);
    assert_eq!(wallet.confirmed_balance(), 0);
    let unspent = wallet.list_unspent();
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].1.key_index, 0);
    assert_eq!(unspent[0].1.maturity_height, 17);

    node.generate(15).unwrap();
    assert_eq!(wallet.current_height(), 16);
    assert_eq!(wallet.confirmed_balance(), 0);

    node.generate(1).unwrap();
    assert_eq!(wallet.current_height(), 17);
    assert_eq!(wallet.confirmed_balance(), SUBSIDY);
}

#[test]
fn send_confirm_and_undo() {
    let (node, wallet) = harness(0);
    node.generate(17).unwrap();
    let mined = wallet.snapshot();
    assert_eq!(wallet.confirmed_balance(), SUBSIDY);

    // Send 500 atoms to a fresh address of our own at zero fee.
    let a1 = wallet.new_address("default").unwrap();
    assert_eq!(wallet.address_at(1), Some(a1));
    let hash = wallet
        .send_outputs(&[TxOut::new(500, a1.pk_script())], 0)
        .unwrap();
    assert_eq!(node.get_raw_mempool().unwrap(), vec![hash]);
    assert_eq!(wallet.confirmed_balance(), 0);

    node.generate(1).unwrap();
    assert_eq!(wallet.current_height(), 18);
    // The spent coinbase comes back as 500 + change, and the coinbase mined
    // at height 2 matures at 18.
    assert_eq!(wallet.confirmed_balance(), 2 * SUBSIDY);
    let unspent = wallet.list_unspent();
    let to_a1: Vec<_> = unspent
        .iter()
        .filter(|(op, _)| op.hash == hash)
        .filter(|(_, u)| u.pk_script == a1.pk_script())
        .collect();
    assert_eq!(to_a1.len(), 1);
    assert_eq!(to_a1[0].1.value, 500);
    assert_eq!(to_a1[0].1.key_index, 1);

    // Reorg the confirming block away.
    node.disconnect_tip().unwrap();
    assert_eq!(wallet.current_height(), 17);
    assert!(wallet.list_unspent().iter().all(|(op, _)| op.hash != hash));
    assert!(wallet.list_unspent().iter().all(|(_, u)| !u.is_locked));
    assert_eq!(wallet.confirmed_balance(), SUBSIDY);

    let undone = wallet.snapshot();
    assert_eq!(undone.utxos, mined.utxos);
    assert_eq!(undone.journal, mined.journal);
    assert_eq!(undone.synced_height, mined.synced_height);
}

#[test]
fn insufficient_funds_leaves_state_untouched() {
    let (_node, wallet) = harness(2);
    let before = wallet.snapshot();
    assert!(matches!(
        wallet.select_inputs(1),
        Err(WalletError::InsufficientFunds { needed: 1, available: 0 })
    ));
    assert!(matches!(
        wallet.send_outputs(&[TxOut::new(1, foreign_address().pk_script())], 1),
        Err(WalletError::InsufficientFunds { .. })
    ));
    assert_eq!(wallet.snapshot(), before);
}

#[test]
fn rejected_broadcast_leaks_no_reservations() {
    let (node, wallet) = harness(3);
    node.generate(20).unwrap();
    let balance = wallet.confirmed_balance();
    assert_eq!(balance, 4 * SUBSIDY);

    node.reject_broadcast.store(true, Ordering::SeqCst);
    let err = wallet
        .send_outputs(&[TxOut::new(SUBSIDY * 3, foreign_address().pk_script())], 10)
        .unwrap_err();
    assert!(matches!(err, WalletError::BroadcastRejected(_)));
    assert_eq!(wallet.confirmed_balance(), balance);
    assert!(wallet.list_unspent().iter().all(|(_, u)| !u.is_locked));
    assert_eq!(node.mempool_len(), 0);

    node.reject_broadcast.store(false, Ordering::SeqCst);
    wallet
        .send_outputs(&[TxOut::new(SUBSIDY * 3, foreign_address().pk_script())], 10)
        .unwrap();
    assert_eq!(node.mempool_len(), 1);
}

#[test]
fn same_seed_derives_same_addresses() {
    let (_n1, w1) = harness(7);
    let (_n2, w2) = harness(7);
    let (_n3, other) = harness(8);
    assert_eq!(w1.coinbase_address().unwrap(), w2.coinbase_address().unwrap());
    assert_ne!(w1.coinbase_address().unwrap(), other.coinbase_address().unwrap());
    for _ in 0..10 {
        let a = w1.new_address("default").unwrap().to_string();
        let b = w2.new_address("default").unwrap().to_string();
        assert!(a.starts_with("Ss"));
        assert_eq!(a, b);
    }
}

// ─── Properties ────────────────────────────────────────────────────

#[test]
fn coinbase_is_spendable_at_maturity_and_not_before() {
    let (node, wallet) = harness(4);
    let pay = [TxOut::new(1_000, foreign_address().pk_script())];

    node.generate(16).unwrap();
    assert!(matches!(
        wallet.send_outputs(&pay, 1),
        Err(WalletError::InsufficientFunds { .. })
    ));

    node.generate(1).unwrap();
    let hash = wallet.send_outputs(&pay, 1).unwrap();
    node.generate(1).unwrap();
    assert!(wallet.list_unspent().iter().any(|(op, _)| op.hash == hash));
}

#[test]
fn mined_spend_debits_outputs_and_fee() {
    let (node, wallet) = harness(5);
    node.generate(17).unwrap();
    let before = wallet.confirmed_balance();

    let created = wallet
        .create_transaction(&[TxOut::new(12_345, foreign_address().pk_script())], 10, None)
        .unwrap();
    let hash = node.send_raw_transaction(&created.tx, false).unwrap();
    assert_eq!(hash, created.hash);

    node.generate(1).unwrap();
    // One more coinbase matured with the new block.
    assert_eq!(wallet.confirmed_balance(), before - 12_345 - created.fee + SUBSIDY);
}

#[test]
fn every_output_belongs_to_an_issued_address() {
    let (node, wallet) = harness(6);
    node.generate(18).unwrap();
    let a1 = wallet.new_address("default").unwrap();
    wallet
        .send_outputs(&[TxOut::new(SUBSIDY / 3, a1.pk_script())], 1)
        .unwrap();
    node.generate(1).unwrap();

    let snapshot = wallet.snapshot();
    for (_, utxo) in wallet.list_unspent() {
        assert!(utxo.key_index < snapshot.hd_index);
        let address = wallet.address_at(utxo.key_index).unwrap();
        assert_eq!(utxo.pk_script, address.pk_script());
    }
}

#[test]
fn reorgs_leave_wallet_as_straight_replay_would() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (node, wallet) = harness(9);
    node.generate(20).unwrap();

    for _ in 0..80 {
        match rng.gen_range(0..4) {
            0 | 1 => {
                node.generate(rng.gen_range(1..=3)).unwrap();
            }
            2 => {
                if wallet.current_height() > 1 {
                    node.disconnect_tip().unwrap();
                }
            }
            _ => {
                let value = rng.gen_range(1_000..SUBSIDY / 2);
                let pay = [TxOut::new(value, foreign_address().pk_script())];
                match wallet.send_outputs(&pay, 10) {
                    Ok(_) => {
                        node.generate(1).unwrap();
                    }
                    Err(WalletError::InsufficientFunds { .. }) => {}
                    Err(e) => panic!("send failed: {e}"),
                }
            }
        }
    }

    let expected = wallet.snapshot();
    let replay = WalletFactory.new_wallet(&config(9)).unwrap();
    let replay_node = SimNode::new(Network::Simnet);
    replay.start(replay_node, 0).unwrap();
    for _ in 1..expected.hd_index {
        replay.new_address("default").unwrap();
    }
    let follower = replay.follower();
    for height in 1..=expected.synced_height {
        let block = node.block_at(height);
        follower
            .connect_block(&block.header, &block.transactions)
            .unwrap();
    }
    assert_eq!(replay.snapshot(), expected);
}

// ─── Concurrency & lifecycle ───────────────────────────────────────

#[test]
fn sync_waits_for_blocks_mined_on_another_thread() {
    let (node, wallet) = harness(10);
    let waiter = {
        let wallet = wallet.clone();
        thread::spawn(move || wallet.sync(10))
    };
    let miner = {
        let node = node.clone();
        thread::spawn(move || node.generate(10))
    };
    assert_eq!(miner.join().unwrap().unwrap().len(), 10);
    waiter.join().unwrap().unwrap();
    assert_eq!(wallet.current_height(), 10);
}

#[test]
fn stop_releases_waiters_and_ignores_later_blocks() {
    let (node, wallet) = harness(11);
    let waiter = {
        let wallet = wallet.clone();
        thread::spawn(move || wallet.sync(1_000))
    };
    wallet.stop();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(WalletError::InvalidState { .. })
    ));

    node.generate(2).unwrap();
    assert_eq!(wallet.current_height(), 0);
    assert_eq!(wallet.lifecycle(), Lifecycle::Stopped);
    wallet.stop();
}

#[test]
fn connect_twice_is_rejected() {
    let (node, wallet) = harness(12);
    let factory = SimFactory { node };
    assert!(matches!(
        wallet.connect(&factory, &rpc_config()),
        Err(WalletError::InvalidState { op: "connect", state: Lifecycle::Syncing })
    ));
}

#[test]
fn wallet_starts_at_node_tip() {
    let node = SimNode::new(Network::Simnet);
    node.generate(5).unwrap();
    let wallet = WalletFactory.new_wallet(&config(13)).unwrap();
    wallet
        .connect(&SimFactory { node: node.clone() }, &rpc_config())
        .unwrap();
    assert_eq!(wallet.current_height(), 5);
    node.generate(1).unwrap();
    assert_eq!(wallet.current_height(), 6);
}

// ─── Generic harness interface ─────────────────────────────────────

fn pay_from<W: HarnessWallet>(wallet: &W, outputs: &[W::Output]) -> Result<Hash, WalletError> {
    let before = wallet.confirmed_balance();
    let hash = wallet.send_outputs(outputs, 1)?;
    assert!(wallet.confirmed_balance() < before);
    Ok(hash)
}

#[test]
fn harness_wallet_trait_drives_the_decred_wallet() {
    let (node, wallet) = harness(14);
    node.generate(17).unwrap();
    HarnessWallet::sync(&wallet, 17).unwrap();
    let hash = pay_from(&wallet, &[TxOut::new(5_000, foreign_address().pk_script())]).unwrap();
    assert_eq!(node.get_raw_mempool().unwrap(), vec![hash]);
}
