use std::sync::Arc;

use chain_dcr::{BlockHeader, MsgTx};
use tracing::{debug, error};

use crate::error::WalletError;
use crate::rpc::NotificationHandler;
use crate::state::Lifecycle;
use crate::wallet::WalletShared;

/// Applies block notifications to the wallet it was created for.
///
/// Each block is applied or undone under the wallet's write lock, so readers
/// never observe a half-applied block. Waiters on the chain-update signal are
/// woken after the lock is released.
pub struct ChainFollower {
    shared: Arc<WalletShared>,
}

impl ChainFollower {
    pub(crate) fn new(shared: Arc<WalletShared>) -> Self {
        Self { shared }
    }

    /// Apply the block with `header`, given its wallet-relevant transactions.
    pub fn connect_block(&self, header: &BlockHeader, transactions: &[MsgTx]) -> Result<(), WalletError> {
        let height = i64::from(header.height);
        let entry = {
            let mut state = self.shared.state.write();
            state.require("connect_block", Lifecycle::Syncing)?;
            state.apply_block(height, transactions)?
        };
        debug!(
            height,
            hash = %header.block_hash(),
            created = entry.created.len(),
            destroyed = entry.destroyed.len(),
            "block connected"
        );
        self.shared.signal.pulse();
        Ok(())
    }

    /// Undo the block with `header`, which must be the wallet's tip.
    pub fn disconnect_block(&self, header: &BlockHeader) -> Result<(), WalletError> {
        let height = i64::from(header.height);
        let entry = {
            let mut state = self.shared.state.write();
            state.require("disconnect_block", Lifecycle::Syncing)?;
            state.undo_block(height)?
        };
        debug!(
            height,
            hash = %header.block_hash(),
            removed = entry.created.len(),
            restored = entry.destroyed.len(),
            "block disconnected"
        );
        self.shared.signal.pulse();
        Ok(())
    }

    fn decode_connected(
        header: &[u8],
        transactions: &[Vec<u8>],
    ) -> Result<(BlockHeader, Vec<MsgTx>), WalletError> {
        let header = BlockHeader::deserialize(header)?;
        let transactions = transactions
            .iter()
            .map(|raw| MsgTx::deserialize(raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((header, transactions))
    }

    /// Notifications have no caller to report to. Anything other than a
    /// notification arriving outside the Syncing state halts the test.
    fn settle(&self, event: &'static str, result: Result<(), WalletError>) {
        match result {
            Ok(()) => {}
            Err(WalletError::InvalidState { state, .. }) => {
                debug!(event, %state, "ignoring notification");
            }
            Err(e) => {
                error!(event, error = %e, "chain follower cannot continue");
                panic!("chain follower: {event}: {e}");
            }
        }
    }
}

impl NotificationHandler for ChainFollower {
    fn on_block_connected(&self, header: &[u8], transactions: &[Vec<u8>]) {
        let result = Self::decode_connected(header, transactions)
            .and_then(|(header, txs)| self.connect_block(&header, &txs));
        self.settle("block connected", result);
    }

    fn on_block_disconnected(&self, header: &[u8]) {
        let result = BlockHeader::deserialize(header)
            .map_err(WalletError::from)
            .and_then(|header| self.disconnect_block(&header));
        self.settle("block disconnected", result);
    }
}
