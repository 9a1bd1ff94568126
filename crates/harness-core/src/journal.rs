use std::collections::BTreeMap;

use chain_dcr::OutPoint;

use crate::error::WalletError;
use crate::utxo::Utxo;

/// What one connected block did to the wallet's outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoEntry {
    /// Our outputs the block spent, as they were before it.
    pub destroyed: BTreeMap<OutPoint, Utxo>,
    /// Outputs the block paid to us, in the order they were seen.
    pub created: Vec<OutPoint>,
}

/// Per-height undo log of connected blocks.
///
/// Heights are recorded in strictly increasing order and only the tip may be
/// removed, so the journal always describes a contiguous suffix of the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorgJournal {
    entries: BTreeMap<i64, UndoEntry>,
}

impl ReorgJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect(&mut self, height: i64, entry: UndoEntry) -> Result<(), WalletError> {
        if let Some(tip) = self.tip() {
            if height <= tip {
                return Err(WalletError::SetupMalfunction(format!(
                    "journal tip is {tip}, cannot record block {height}"
                )));
            }
        }
        self.entries.insert(height, entry);
        Ok(())
    }

    pub fn record_disconnect(&mut self, height: i64) -> Result<UndoEntry, WalletError> {
        match self.tip() {
            Some(tip) if tip == height => self.entries.remove(&height).ok_or_else(|| {
                WalletError::SetupMalfunction(format!("journal entry {height} vanished"))
            }),
            Some(tip) => Err(WalletError::SetupMalfunction(format!(
                "cannot undo block {height}: journal tip is {tip}"
            ))),
            None => Err(WalletError::SetupMalfunction(format!(
                "cannot undo block {height}: journal is empty"
            ))),
        }
    }

    pub fn tip(&self) -> Option<i64> {
        self.entries.keys().next_back().copied()
    }

    pub fn contains(&self, height: i64) -> bool {
        self.entries.contains_key(&height)
    }

    pub fn get(&self, height: i64) -> Option<&UndoEntry> {
        self.entries.get(&height)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
