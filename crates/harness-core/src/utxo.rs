use std::collections::BTreeMap;

use chain_dcr::transaction::{estimate_fee, SpendableOutput};
use chain_dcr::OutPoint;

use crate::error::WalletError;

/// An unspent output the wallet can sign for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// P2PKH script of the owning address.
    pub pk_script: Vec<u8>,
    /// Value in atoms.
    pub value: i64,
    /// First chain height at which the output may be spent.
    pub maturity_height: i64,
    /// Index of the owning key in the wallet's key tree.
    pub key_index: u32,
    /// Reserved by a pending transaction.
    pub is_locked: bool,
}

impl Utxo {
    pub fn is_mature(&self, height: i64) -> bool {
        height >= self.maturity_height
    }

    pub fn is_spendable(&self, height: i64) -> bool {
        !self.is_locked && self.is_mature(height)
    }

    pub fn to_spendable(&self, outpoint: OutPoint) -> SpendableOutput {
        SpendableOutput {
            outpoint,
            value: self.value,
            pk_script: self.pk_script.clone(),
        }
    }
}

/// Result of UTXO selection: the chosen outputs and their aggregate value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSelection {
    pub selected: Vec<(OutPoint, Utxo)>,
    pub total: i64,
}

impl UtxoSelection {
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.selected.iter().map(|(op, _)| *op).collect()
    }

    fn push(&mut self, outpoint: OutPoint, utxo: &Utxo) {
        self.total += utxo.value;
        self.selected.push((outpoint, utxo.clone()));
    }
}

/// Outpoint-ordered map of the wallet's unspent outputs.
///
/// Iteration and selection follow outpoint order (hash, index, tree), so
/// identical histories select identical inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoStore {
    utxos: BTreeMap<OutPoint, Utxo>,
}

impl UtxoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) -> Result<(), WalletError> {
        if self.utxos.contains_key(&outpoint) {
            return Err(WalletError::SetupMalfunction(format!(
                "utxo {outpoint} is already tracked"
            )));
        }
        self.utxos.insert(outpoint, utxo);
        Ok(())
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Result<Utxo, WalletError> {
        self.utxos.remove(outpoint).ok_or_else(|| {
            WalletError::SetupMalfunction(format!("utxo {outpoint} is not tracked"))
        })
    }

    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.utxos.iter()
    }

    /// Greedily pick spendable outputs until their total reaches `target`.
    ///
    /// Returns whatever was gathered even when it falls short; callers
    /// compare `total` against what they need.
    pub fn select_spendable(&self, target: i64, height: i64) -> UtxoSelection {
        let mut selection = UtxoSelection::default();
        for (outpoint, utxo) in self.spendable(height) {
            if selection.total >= target {
                break;
            }
            selection.push(*outpoint, utxo);
        }
        selection
    }

    /// Greedy selection covering `target` plus the fee of a transaction with
    /// the selected inputs, `num_outputs` outputs and a change output.
    pub fn select_with_fee(
        &self,
        target: i64,
        height: i64,
        fee_rate: i64,
        num_outputs: usize,
    ) -> UtxoSelection {
        let mut selection = UtxoSelection::default();
        for (outpoint, utxo) in self.spendable(height) {
            selection.push(*outpoint, utxo);
            let fee = estimate_fee(selection.selected.len(), num_outputs + 1, fee_rate);
            if selection.total >= target.saturating_add(fee) {
                break;
            }
        }
        selection
    }

    /// Mark outputs as reserved. Unknown outpoints are ignored.
    pub fn lock<'a>(&mut self, outpoints: impl IntoIterator<Item = &'a OutPoint>) {
        self.set_locked(outpoints, true);
    }

    /// Release reservations. Unknown outpoints are ignored.
    pub fn unlock<'a>(&mut self, outpoints: impl IntoIterator<Item = &'a OutPoint>) {
        self.set_locked(outpoints, false);
    }

    /// Sum of unlocked outputs mature at `height`.
    pub fn balance(&self, height: i64) -> i64 {
        self.spendable(height).map(|(_, utxo)| utxo.value).sum()
    }

    fn spendable(&self, height: i64) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.utxos
            .iter()
            .filter(move |(_, utxo)| utxo.is_spendable(height))
    }

    fn set_locked<'a>(&mut self, outpoints: impl IntoIterator<Item = &'a OutPoint>, locked: bool) {
        for outpoint in outpoints {
            if let Some(utxo) = self.utxos.get_mut(outpoint) {
                utxo.is_locked = locked;
            }
        }
    }
}
