use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bip32::ChildNumber;
use chain_dcr::wire::TREE_REGULAR;
use chain_dcr::{Address, MsgTx, Network, OutPoint};

use crate::error::WalletError;
use crate::hd_derivation::{key_to_address, ExtendedKey, PrivateKey};
use crate::journal::{ReorgJournal, UndoEntry};
use crate::rpc::RpcClient;
use crate::utxo::{Utxo, UtxoStore};

/// Key index reserved for the coinbase-receiving address.
pub const COINBASE_KEY_INDEX: u32 = 0;

/// Wallet lifecycle: Created, then Syncing after `start`, then Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Syncing,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifecycle::Created => "created",
            Lifecycle::Syncing => "syncing",
            Lifecycle::Stopped => "stopped",
        })
    }
}

/// Comparable view of the chain-derived part of the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub synced_height: i64,
    pub hd_index: u32,
    pub utxos: UtxoStore,
    pub journal: ReorgJournal,
}

/// Everything guarded by the wallet-wide lock.
pub(crate) struct WalletState {
    pub(crate) net: Network,
    hd_root: ExtendedKey,
    hd_index: u32,
    addrs: BTreeMap<u32, Address>,
    scripts: HashMap<Vec<u8>, u32>,
    pub(crate) utxos: UtxoStore,
    pub(crate) journal: ReorgJournal,
    pub(crate) synced_height: i64,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) rpc: Option<Arc<dyn RpcClient>>,
}

impl WalletState {
    /// Derive the root and the coinbase address. Any failure here means the
    /// test cannot run.
    pub(crate) fn new(net: Network, seed: &[u8]) -> Result<Self, WalletError> {
        let hd_root = ExtendedKey::new_master(seed).map_err(|e| {
            WalletError::SetupMalfunction(format!("deriving HD root: {e}"))
        })?;
        let mut state = Self {
            net,
            hd_root,
            hd_index: COINBASE_KEY_INDEX,
            addrs: BTreeMap::new(),
            scripts: HashMap::new(),
            utxos: UtxoStore::new(),
            journal: ReorgJournal::new(),
            synced_height: 0,
            lifecycle: Lifecycle::Created,
            rpc: None,
        };
        state.derive_next().map_err(|e| {
            WalletError::SetupMalfunction(format!("deriving coinbase address: {e}"))
        })?;
        Ok(state)
    }

    pub(crate) fn require(&self, op: &'static str, expected: Lifecycle) -> Result<(), WalletError> {
        if self.lifecycle != expected {
            return Err(WalletError::InvalidState {
                op,
                state: self.lifecycle,
            });
        }
        Ok(())
    }

    pub(crate) fn hd_index(&self) -> u32 {
        self.hd_index
    }

    /// Issue the next key index. The index is consumed even when derivation
    /// fails, so a retry moves on to the following one. Only non-hardened
    /// indices are ever issued.
    pub(crate) fn derive_next(&mut self) -> Result<(u32, Address), WalletError> {
        let index = self.hd_index;
        if index >= ChildNumber::HARDENED_FLAG {
            return Err(WalletError::SetupMalfunction(format!(
                "key index {index} is past the non-hardened range"
            )));
        }
        self.hd_index += 1;
        let address = key_to_address(&self.private_key(index)?, self.net);
        self.addrs.insert(index, address);
        self.scripts.insert(address.pk_script(), index);
        Ok((index, address))
    }

    pub(crate) fn private_key(&self, index: u32) -> Result<PrivateKey, WalletError> {
        Ok(self.hd_root.child(index)?.private_key())
    }

    pub(crate) fn address_at(&self, index: u32) -> Option<Address> {
        self.addrs.get(&index).copied()
    }

    pub(crate) fn addresses(&self) -> Vec<Address> {
        self.addrs.values().copied().collect()
    }

    pub(crate) fn balance(&self) -> i64 {
        self.utxos.balance(self.synced_height)
    }

    pub(crate) fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            synced_height: self.synced_height,
            hd_index: self.hd_index,
            utxos: self.utxos.clone(),
            journal: self.journal.clone(),
        }
    }

    /// Apply the wallet-relevant transactions of the block at `height`.
    ///
    /// Within a transaction inputs are processed before outputs. An output
    /// created and spent inside the same block leaves no trace in the
    /// journal entry.
    pub(crate) fn apply_block(&mut self, height: i64, txs: &[MsgTx]) -> Result<UndoEntry, WalletError> {
        if height != self.synced_height + 1 {
            return Err(WalletError::SetupMalfunction(format!(
                "block {height} connected out of order, wallet is synced to {}",
                self.synced_height
            )));
        }

        let maturity = self.net.coinbase_maturity();
        let mut entry = UndoEntry::default();
        for tx in txs {
            for input in &tx.tx_in {
                let spent = input.previous_out_point;
                if !self.utxos.contains(&spent) {
                    continue;
                }
                let utxo = self.utxos.remove(&spent)?;
                if let Some(pos) = entry.created.iter().position(|op| *op == spent) {
                    entry.created.remove(pos);
                } else {
                    // A reservation does not outlive the block that spent it.
                    entry.destroyed.insert(
                        spent,
                        Utxo {
                            is_locked: false,
                            ..utxo
                        },
                    );
                }
            }

            let tx_hash = tx.tx_hash();
            let maturity_height = if tx.is_coinbase() {
                height + maturity
            } else {
                height
            };
            for (index, output) in tx.tx_out.iter().enumerate() {
                let Some(&key_index) = self.scripts.get(&output.pk_script) else {
                    continue;
                };
                let outpoint = OutPoint::new(tx_hash, index as u32, TREE_REGULAR);
                self.utxos.insert(
                    outpoint,
                    Utxo {
                        pk_script: output.pk_script.clone(),
                        value: output.value,
                        maturity_height,
                        key_index,
                        is_locked: false,
                    },
                )?;
                entry.created.push(outpoint);
            }
        }

        self.journal.record_connect(height, entry.clone())?;
        self.synced_height = height;
        Ok(entry)
    }

    /// Reverse the block at the tip.
    pub(crate) fn undo_block(&mut self, height: i64) -> Result<UndoEntry, WalletError> {
        if height != self.synced_height {
            return Err(WalletError::SetupMalfunction(format!(
                "block {height} disconnected, but the wallet tip is {}",
                self.synced_height
            )));
        }
        let entry = self.journal.record_disconnect(height)?;
        for outpoint in &entry.created {
            self.utxos.remove(outpoint)?;
        }
        for (outpoint, utxo) in &entry.destroyed {
            self.utxos.insert(*outpoint, utxo.clone())?;
        }
        self.synced_height = height - 1;
        Ok(entry)
    }
}
