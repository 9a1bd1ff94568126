//! The in-memory wallet a test harness drives against a live node.
//!
//! All state lives behind one reader/writer lock. Operations that talk to the
//! node snapshot what they need, release the lock for the RPC call, and take
//! it again to integrate the result.

use std::fmt;
use std::sync::Arc;

use chain_dcr::transaction::{self, estimate_fee, SpendableOutput};
use chain_dcr::wire::TxOut;
use chain_dcr::{Address, DcrError, Hash, MsgTx, Network, OutPoint};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{RpcConnectionConfig, TestWalletConfig};
use crate::error::WalletError;
use crate::follower::ChainFollower;
use crate::rpc::{NotificationHandler, RpcClient, RpcClientFactory};
use crate::signal::{ChainUpdateSignal, Wakeup};
use crate::state::{Lifecycle, WalletSnapshot, WalletState, COINBASE_KEY_INDEX};
use crate::utxo::Utxo;

/// State shared between the wallet handle and its chain follower.
pub(crate) struct WalletShared {
    pub(crate) state: RwLock<WalletState>,
    pub(crate) signal: ChainUpdateSignal,
}

/// Inputs reserved by [`InMemoryWallet::select_inputs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSelection {
    pub inputs: Vec<(OutPoint, Utxo)>,
    pub total: i64,
    /// `total` minus the requested target.
    pub change: i64,
}

impl InputSelection {
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(|(op, _)| *op).collect()
    }
}

/// A signed transaction whose inputs are reserved until broadcast or unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTransaction {
    pub tx: MsgTx,
    pub hash: Hash,
    pub fee: i64,
    /// Position of the change output, if one was added.
    pub change_index: Option<usize>,
}

impl CreatedTransaction {
    pub fn serialize(&self) -> Vec<u8> {
        self.tx.serialize()
    }
}

/// Constructs wallets from harness configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalletFactory;

impl WalletFactory {
    pub fn new_wallet(&self, config: &TestWalletConfig) -> Result<InMemoryWallet, WalletError> {
        InMemoryWallet::new(config)
    }
}

/// Deterministic HD wallet that tracks its outputs from block notifications.
///
/// Cloning yields another handle to the same wallet.
#[derive(Clone)]
pub struct InMemoryWallet {
    shared: Arc<WalletShared>,
    follower: Arc<ChainFollower>,
}

impl fmt::Debug for InMemoryWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("InMemoryWallet")
            .field("net", &state.net)
            .field("lifecycle", &state.lifecycle)
            .field("synced_height", &state.synced_height)
            .field("hd_index", &state.hd_index())
            .finish()
    }
}

impl InMemoryWallet {
    pub fn new(config: &TestWalletConfig) -> Result<Self, WalletError> {
        let state = WalletState::new(config.active_net, config.seed.as_bytes())?;
        let shared = Arc::new(WalletShared {
            state: RwLock::new(state),
            signal: ChainUpdateSignal::new(),
        });
        let follower = Arc::new(ChainFollower::new(Arc::clone(&shared)));
        Ok(Self { shared, follower })
    }

    // ─── lifecycle ──────────────────────────────────────────────────────

    /// Attach to `rpc` with the wallet synced to `initial_tip`.
    ///
    /// Blocks are not replayed. If subscribing or installing the filter
    /// fails, the wallet returns to Created.
    pub fn start(&self, rpc: Arc<dyn RpcClient>, initial_tip: i64) -> Result<(), WalletError> {
        let (net, coinbase, (addresses, outpoints)) = {
            let mut state = self.shared.state.write();
            state.require("start", Lifecycle::Created)?;
            state.synced_height = initial_tip;
            state.rpc = Some(Arc::clone(&rpc));
            state.lifecycle = Lifecycle::Syncing;
            (state.net, state.address_at(COINBASE_KEY_INDEX), filter_of(&state))
        };

        let attached = rpc
            .notify_blocks()
            .and_then(|()| rpc.load_tx_filter(true, &addresses, &outpoints));
        if let Err(e) = attached {
            let mut state = self.shared.state.write();
            if state.lifecycle == Lifecycle::Syncing {
                state.lifecycle = Lifecycle::Created;
                state.rpc = None;
            }
            return Err(e.into());
        }

        info!(%net, height = initial_tip, coinbase = ?coinbase.map(|a| a.to_string()), "wallet started");
        self.shared.signal.pulse();
        Ok(())
    }

    /// Open a session through `factory`, with this wallet's follower as the
    /// notification handler, and start at the node's current tip.
    pub fn connect(
        &self,
        factory: &dyn RpcClientFactory,
        config: &RpcConnectionConfig,
    ) -> Result<(), WalletError> {
        self.shared.state.read().require("connect", Lifecycle::Created)?;
        let handler: Arc<dyn NotificationHandler> = self.follower.clone();
        let rpc = factory.new_rpc_connection(config, Some(handler))?;
        let (tip_hash, tip_height) = rpc.get_best_block()?;
        debug!(%tip_hash, tip_height, "node tip");
        self.start(rpc, tip_height)
    }

    /// Stop following the chain. Waiters in [`sync`](Self::sync) return, and
    /// the session's filter is cleared. Calling it again does nothing.
    pub fn stop(&self) {
        let rpc = {
            let mut state = self.shared.state.write();
            if state.lifecycle == Lifecycle::Stopped {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            state.rpc.clone()
        };
        self.shared.signal.stop();
        if let Some(rpc) = rpc {
            if let Err(e) = rpc.load_tx_filter(true, &[], &[]) {
                warn!(error = %e, "failed to clear tx filter");
            }
        }
        info!("wallet stopped");
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.state.read().lifecycle
    }

    /// Block until the wallet has processed `height`.
    pub fn sync(&self, height: i64) -> Result<(), WalletError> {
        self.shared.state.read().require("sync", Lifecycle::Syncing)?;
        let wakeup = self
            .shared
            .signal
            .wait_until(|| self.shared.state.read().synced_height >= height);
        match wakeup {
            Wakeup::ChainUpdate => Ok(()),
            Wakeup::Stop => Err(WalletError::InvalidState {
                op: "sync",
                state: Lifecycle::Stopped,
            }),
        }
    }

    // ─── addresses ──────────────────────────────────────────────────────

    /// Derive the next address and add it to the node's filter before
    /// handing it out. `account` is accepted for interface compatibility.
    pub fn new_address(&self, account: &str) -> Result<Address, WalletError> {
        let (index, address, rpc) = {
            let mut state = self.shared.state.write();
            state.require("new_address", Lifecycle::Syncing)?;
            let (index, address) = state.derive_next()?;
            (index, address, state.rpc.clone())
        };
        watch_address(rpc, &address)?;
        info!(key_index = index, %address, account, "new address");
        Ok(address)
    }

    pub fn network(&self) -> Network {
        self.shared.state.read().net
    }

    pub fn coinbase_address(&self) -> Result<Address, WalletError> {
        self.shared
            .state
            .read()
            .address_at(COINBASE_KEY_INDEX)
            .ok_or_else(|| WalletError::SetupMalfunction("coinbase address missing".into()))
    }

    /// Address issued at `index`, if it has been issued.
    pub fn address_at(&self, index: u32) -> Option<Address> {
        self.shared.state.read().address_at(index)
    }

    // ─── reads ──────────────────────────────────────────────────────────

    pub fn current_height(&self) -> i64 {
        self.shared.state.read().synced_height
    }

    /// Sum of unlocked outputs that are mature at the synced height.
    pub fn confirmed_balance(&self) -> i64 {
        self.shared.state.read().balance()
    }

    /// Every tracked output, locked or not, in outpoint order.
    pub fn list_unspent(&self) -> Vec<(OutPoint, Utxo)> {
        self.shared
            .state
            .read()
            .utxos
            .iter()
            .map(|(op, utxo)| (*op, utxo.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        self.shared.state.read().snapshot()
    }

    pub fn rpc_client(&self) -> Option<Arc<dyn RpcClient>> {
        self.shared.state.read().rpc.clone()
    }

    /// The handler that applies this wallet's block notifications.
    pub fn follower(&self) -> Arc<ChainFollower> {
        Arc::clone(&self.follower)
    }

    // ─── spending ───────────────────────────────────────────────────────

    /// Reserve spendable outputs worth at least `target`.
    pub fn select_inputs(&self, target: i64) -> Result<InputSelection, WalletError> {
        let mut state = self.shared.state.write();
        state.require("select_inputs", Lifecycle::Syncing)?;
        let height = state.synced_height;
        let selection = state.utxos.select_spendable(target, height);
        if selection.total < target {
            return Err(WalletError::InsufficientFunds {
                needed: target,
                available: selection.total,
            });
        }
        state.utxos.lock(selection.selected.iter().map(|(op, _)| op));
        debug!(target, total = selection.total, inputs = selection.selected.len(), "inputs reserved");
        Ok(InputSelection {
            change: selection.total - target,
            total: selection.total,
            inputs: selection.selected,
        })
    }

    /// Release reservations. Outpoints the wallet does not track are ignored.
    pub fn unlock_outputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError> {
        let mut state = self.shared.state.write();
        state.require("unlock_outputs", Lifecycle::Syncing)?;
        state.utxos.unlock(outpoints);
        Ok(())
    }

    /// Release the reservations held by the inputs of `tx`.
    pub fn unlock_inputs_of(&self, tx: &MsgTx) -> Result<(), WalletError> {
        let outpoints: Vec<OutPoint> = tx.tx_in.iter().map(|i| i.previous_out_point).collect();
        self.unlock_outputs(&outpoints)
    }

    /// Build and sign a transaction paying `outputs`, reserving its inputs.
    ///
    /// `fee_rate` is in atoms per byte. Change above the network's dust
    /// threshold goes to `change_address`, or to a freshly derived address
    /// whose filter entry is installed before returning.
    pub fn create_transaction(
        &self,
        outputs: &[TxOut],
        fee_rate: i64,
        change_address: Option<&Address>,
    ) -> Result<CreatedTransaction, WalletError> {
        let (created, derived_change, rpc) = {
            let mut state = self.shared.state.write();
            state.require("create_transaction", Lifecycle::Syncing)?;
            let (created, derived_change) =
                build_signed(&mut state, outputs, fee_rate, change_address)?;
            (created, derived_change, state.rpc.clone())
        };

        if let Some(change) = derived_change {
            if let Err(e) = watch_address(rpc, &change) {
                self.release_inputs(&created.tx);
                return Err(e);
            }
        }
        debug!(
            hash = %created.hash,
            inputs = created.tx.tx_in.len(),
            outputs = created.tx.tx_out.len(),
            fee = created.fee,
            "transaction created"
        );
        Ok(created)
    }

    /// Create a transaction and broadcast it. On any broadcast failure the
    /// inputs are released before the error is returned.
    pub fn send_outputs(&self, outputs: &[TxOut], fee_rate: i64) -> Result<Hash, WalletError> {
        let rpc = {
            let state = self.shared.state.read();
            state.require("send_outputs", Lifecycle::Syncing)?;
            state.rpc.clone().ok_or_else(|| {
                WalletError::SetupMalfunction("wallet has no rpc session".into())
            })?
        };
        let created = self.create_transaction(outputs, fee_rate, None)?;
        match rpc.send_raw_transaction(&created.tx, true) {
            Ok(hash) => {
                info!(%hash, fee = created.fee, "transaction sent");
                Ok(hash)
            }
            Err(e) => {
                let err = WalletError::from(e);
                warn!(hash = %created.hash, error = %err, "broadcast failed, releasing inputs");
                self.release_inputs(&created.tx);
                Err(err)
            }
        }
    }

    /// Unlock without a lifecycle check; used to roll back a reservation.
    fn release_inputs(&self, tx: &MsgTx) {
        let mut state = self.shared.state.write();
        state
            .utxos
            .unlock(tx.tx_in.iter().map(|input| &input.previous_out_point));
    }
}

/// Addresses and outpoints the node should report transactions for.
fn filter_of(state: &WalletState) -> (Vec<Address>, Vec<OutPoint>) {
    let outpoints = state.utxos.iter().map(|(op, _)| *op).collect();
    (state.addresses(), outpoints)
}

/// Append `address` to the session's filter. Appending never drops the
/// outpoints the node added on its own for blocks delivered meanwhile, and
/// concurrent appends cannot undo each other.
fn watch_address(rpc: Option<Arc<dyn RpcClient>>, address: &Address) -> Result<(), WalletError> {
    let rpc = rpc.ok_or_else(|| WalletError::SetupMalfunction("wallet has no rpc session".into()))?;
    rpc.load_tx_filter(false, &[*address], &[])?;
    Ok(())
}

/// Select, build, sign and lock. Returns the change address if one was derived.
fn build_signed(
    state: &mut WalletState,
    outputs: &[TxOut],
    fee_rate: i64,
    change_address: Option<&Address>,
) -> Result<(CreatedTransaction, Option<Address>), WalletError> {
    if outputs.is_empty() {
        return Err(DcrError::TransactionBuildError("no outputs".into()).into());
    }
    let target = transaction::total_output_value(outputs)?;
    if fee_rate < 0 {
        return Err(DcrError::TransactionBuildError(format!("negative fee rate {fee_rate}")).into());
    }
    if let Some(addr) = change_address {
        if !addr.is_for_net(state.net) {
            return Err(DcrError::InvalidAddress(format!("{addr} is not a {} address", state.net)).into());
        }
    }

    let height = state.synced_height;
    let selection = state
        .utxos
        .select_with_fee(target, height, fee_rate, outputs.len());
    let num_inputs = selection.selected.len();
    let fee_without_change = estimate_fee(num_inputs.max(1), outputs.len(), fee_rate);
    let needed = target.saturating_add(fee_without_change);
    if num_inputs == 0 || selection.total < needed {
        return Err(WalletError::InsufficientFunds {
            needed,
            available: state.balance(),
        });
    }

    let mut tx_out = outputs.to_vec();
    let mut change_index = None;
    let mut derived_change = None;
    let change = selection.total - target - estimate_fee(num_inputs, outputs.len() + 1, fee_rate);
    if change > state.net.dust_threshold() {
        let address = match change_address {
            Some(addr) => *addr,
            None => {
                let (_, address) = state.derive_next()?;
                derived_change = Some(address);
                address
            }
        };
        change_index = Some(tx_out.len());
        tx_out.push(TxOut::new(change, address.pk_script()));
    }

    let spendable: Vec<SpendableOutput> = selection
        .selected
        .iter()
        .map(|(op, utxo)| utxo.to_spendable(*op))
        .collect();
    let mut tx = transaction::build_unsigned(&spendable, tx_out);
    for (index, (_, utxo)) in selection.selected.iter().enumerate() {
        state
            .private_key(utxo.key_index)?
            .sign_input(&mut tx, index, &utxo.pk_script)?;
    }

    state.utxos.lock(selection.selected.iter().map(|(op, _)| op));
    let paid: i64 = tx.tx_out.iter().map(|o| o.value).sum();
    let created = CreatedTransaction {
        hash: tx.tx_hash(),
        fee: selection.total - paid,
        change_index,
        tx,
    };
    Ok((created, derived_change))
}

/// Harness-side view of a test wallet, independent of the coin behind it.
pub trait HarnessWallet: Send + Sync {
    type Address: Clone + fmt::Display;
    type OutPoint: Clone;
    type Output: Clone;
    type Transaction;

    fn start(&self, rpc: Arc<dyn RpcClient>, initial_tip: i64) -> Result<(), WalletError>;

    fn stop(&self);

    fn sync(&self, height: i64) -> Result<(), WalletError>;

    fn new_address(&self, account: &str) -> Result<Self::Address, WalletError>;

    fn current_height(&self) -> i64;

    fn confirmed_balance(&self) -> i64;

    fn create_transaction(
        &self,
        outputs: &[Self::Output],
        fee_rate: i64,
        change_address: Option<&Self::Address>,
    ) -> Result<Self::Transaction, WalletError>;

    fn send_outputs(&self, outputs: &[Self::Output], fee_rate: i64) -> Result<Hash, WalletError>;

    fn unlock_outputs(&self, outpoints: &[Self::OutPoint]) -> Result<(), WalletError>;
}

impl HarnessWallet for InMemoryWallet {
    type Address = Address;
    type OutPoint = OutPoint;
    type Output = TxOut;
    type Transaction = CreatedTransaction;

    fn start(&self, rpc: Arc<dyn RpcClient>, initial_tip: i64) -> Result<(), WalletError> {
        InMemoryWallet::start(self, rpc, initial_tip)
    }

    fn stop(&self) {
        InMemoryWallet::stop(self)
    }

    fn sync(&self, height: i64) -> Result<(), WalletError> {
        InMemoryWallet::sync(self, height)
    }

    fn new_address(&self, account: &str) -> Result<Address, WalletError> {
        InMemoryWallet::new_address(self, account)
    }

    fn current_height(&self) -> i64 {
        InMemoryWallet::current_height(self)
    }

    fn confirmed_balance(&self) -> i64 {
        InMemoryWallet::confirmed_balance(self)
    }

    fn create_transaction(
        &self,
        outputs: &[TxOut],
        fee_rate: i64,
        change_address: Option<&Address>,
    ) -> Result<CreatedTransaction, WalletError> {
        InMemoryWallet::create_transaction(self, outputs, fee_rate, change_address)
    }

    fn send_outputs(&self, outputs: &[TxOut], fee_rate: i64) -> Result<Hash, WalletError> {
        InMemoryWallet::send_outputs(self, outputs, fee_rate)
    }

    fn unlock_outputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError> {
        InMemoryWallet::unlock_outputs(self, outpoints)
    }
}
