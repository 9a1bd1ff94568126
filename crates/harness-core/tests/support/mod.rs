//! A single-process stand-in for a simnet node.
//!
//! Mines blocks on demand, validates P2PKH spends, keeps a per-session
//! transaction filter and delivers block notifications synchronously from
//! the thread that mined or disconnected the block.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chain_dcr::transaction::verify_p2pkh_input;
use chain_dcr::wire::TREE_REGULAR;
use chain_dcr::{Address, Block, BlockHeader, Hash, MsgTx, Network, OutPoint, TxIn, TxOut};
use harness_core::rpc::{NotificationHandler, RpcClient, RpcClientFactory};
use harness_core::{RpcConnectionConfig, RpcError, WalletError};
use parking_lot::Mutex;

/// Atoms paid by every coinbase.
pub const SUBSIDY: i64 = 300_000_000;

#[derive(Clone)]
struct Coin {
    output: TxOut,
    maturity_height: i64,
}

#[derive(Default)]
struct BlockUndo {
    spent: Vec<(OutPoint, Coin)>,
    created: Vec<OutPoint>,
}

struct NodeState {
    net: Network,
    chain: Vec<Block>,
    undo: Vec<BlockUndo>,
    coins: HashMap<OutPoint, Coin>,
    mempool: Vec<MsgTx>,
    filter_scripts: HashSet<Vec<u8>>,
    filter_outpoints: HashSet<OutPoint>,
    notify: bool,
    mining_script: Vec<u8>,
}

impl NodeState {
    fn tip_height(&self) -> i64 {
        self.chain.len() as i64 - 1
    }

    fn tip_hash(&self) -> Hash {
        self.chain
            .last()
            .map(|b| b.block_hash())
            .unwrap_or(Hash::ZERO)
    }

    fn spent_in_mempool(&self, outpoint: &OutPoint) -> bool {
        self.mempool
            .iter()
            .flat_map(|tx| tx.tx_in.iter())
            .any(|input| input.previous_out_point == *outpoint)
    }

    /// Whether `tx` touches the filter. Matching outputs are added to the
    /// watched outpoints so later spends of them are reported too.
    fn filter_match(&mut self, tx: &MsgTx) -> bool {
        let mut matched = tx
            .tx_in
            .iter()
            .any(|input| self.filter_outpoints.contains(&input.previous_out_point));
        let hash = tx.tx_hash();
        for (index, output) in tx.tx_out.iter().enumerate() {
            if self.filter_scripts.contains(&output.pk_script) {
                self.filter_outpoints
                    .insert(OutPoint::new(hash, index as u32, TREE_REGULAR));
                matched = true;
            }
        }
        matched
    }

    fn mine_one(&mut self) -> (Block, Vec<Vec<u8>>) {
        let height = self.tip_height() + 1;
        let mut coinbase = MsgTx::new();
        let mut input = TxIn::new(OutPoint::null(), SUBSIDY);
        input.signature_script = (height as u32).to_le_bytes().to_vec();
        coinbase.tx_in.push(input);
        coinbase.tx_out.push(TxOut::new(SUBSIDY, self.mining_script.clone()));
        // Signature scripts are not part of the tx hash; the height goes in a
        // null-data output so every coinbase is distinct.
        let mut null_data = vec![0x6a, 0x04];
        null_data.extend_from_slice(&(height as u32).to_le_bytes());
        coinbase.tx_out.push(TxOut::new(0, null_data));

        let mut transactions = vec![coinbase];
        transactions.append(&mut self.mempool);

        let maturity = self.net.coinbase_maturity();
        let mut undo = BlockUndo::default();
        for tx in &transactions {
            for input in &tx.tx_in {
                if let Some(coin) = self.coins.remove(&input.previous_out_point) {
                    undo.spent.push((input.previous_out_point, coin));
                }
            }
            let hash = tx.tx_hash();
            let maturity_height = if tx.is_coinbase() { height + maturity } else { height };
            for (index, output) in tx.tx_out.iter().enumerate() {
                let outpoint = OutPoint::new(hash, index as u32, TREE_REGULAR);
                self.coins.insert(
                    outpoint,
                    Coin {
                        output: output.clone(),
                        maturity_height,
                    },
                );
                undo.created.push(outpoint);
            }
        }

        let header = BlockHeader {
            prev_block: self.tip_hash(),
            height: height as u32,
            timestamp: 1_700_000_000 + height as u32,
            ..BlockHeader::default()
        };
        let block = Block {
            header,
            transactions,
            stake_transactions: Vec::new(),
        };
        let txs = block.transactions.clone();
        let relevant = txs
            .iter()
            .filter(|tx| self.filter_match(tx))
            .map(|tx| tx.serialize())
            .collect();
        self.chain.push(block.clone());
        self.undo.push(undo);
        (block, relevant)
    }
}

pub struct SimNode {
    state: Mutex<NodeState>,
    handler: Mutex<Option<Arc<dyn NotificationHandler>>>,
    /// When set, every broadcast is refused.
    pub reject_broadcast: AtomicBool,
    closed: AtomicBool,
}

impl SimNode {
    pub fn new(net: Network) -> Arc<Self> {
        let genesis = Block::default();
        Arc::new(Self {
            state: Mutex::new(NodeState {
                net,
                chain: vec![genesis],
                undo: vec![BlockUndo::default()],
                coins: HashMap::new(),
                mempool: Vec::new(),
                filter_scripts: HashSet::new(),
                filter_outpoints: HashSet::new(),
                notify: false,
                mining_script: vec![0x51],
            }),
            handler: Mutex::new(None),
            reject_broadcast: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_handler(&self, handler: Arc<dyn NotificationHandler>) {
        *self.handler.lock() = Some(handler);
    }

    pub fn set_mining_address(&self, address: &Address) {
        self.state.lock().mining_script = address.pk_script();
    }

    pub fn block_at(&self, height: i64) -> Block {
        self.state.lock().chain[height as usize].clone()
    }

    pub fn mempool_len(&self) -> usize {
        self.state.lock().mempool.len()
    }

    /// Drop the tip block and notify. Its transactions are discarded, not
    /// returned to the mempool.
    pub fn disconnect_tip(&self) -> Result<Hash, RpcError> {
        let (header, notify) = {
            let mut state = self.state.lock();
            if state.tip_height() == 0 {
                return Err(RpcError::Rejected("cannot disconnect genesis".into()));
            }
            let block = state.chain.pop().expect("non-empty chain");
            let undo = state.undo.pop().expect("undo for every block");
            for outpoint in &undo.created {
                state.coins.remove(outpoint);
            }
            for (outpoint, coin) in undo.spent {
                state.coins.insert(outpoint, coin);
            }
            (block.header, state.notify)
        };
        if notify {
            if let Some(handler) = self.handler.lock().clone() {
                handler.on_block_disconnected(&header.serialize());
            }
        }
        Ok(header.block_hash())
    }

    fn check_open(&self) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }
        Ok(())
    }
}

impl RpcClient for SimNode {
    fn notify_blocks(&self) -> Result<(), RpcError> {
        self.check_open()?;
        self.state.lock().notify = true;
        Ok(())
    }

    fn load_tx_filter(
        &self,
        reload: bool,
        addresses: &[Address],
        outpoints: &[OutPoint],
    ) -> Result<(), RpcError> {
        self.check_open()?;
        let mut state = self.state.lock();
        if reload {
            state.filter_scripts.clear();
            state.filter_outpoints.clear();
        }
        state
            .filter_scripts
            .extend(addresses.iter().map(|a| a.pk_script()));
        state.filter_outpoints.extend(outpoints.iter().copied());
        Ok(())
    }

    fn get_block(&self, hash: &Hash) -> Result<Block, RpcError> {
        self.check_open()?;
        self.state
            .lock()
            .chain
            .iter()
            .find(|b| b.block_hash() == *hash)
            .cloned()
            .ok_or_else(|| RpcError::Server {
                code: -5,
                message: format!("block {hash} not found"),
            })
    }

    fn get_block_count(&self) -> Result<i64, RpcError> {
        self.check_open()?;
        Ok(self.state.lock().tip_height())
    }

    fn get_best_block(&self) -> Result<(Hash, i64), RpcError> {
        self.check_open()?;
        let state = self.state.lock();
        Ok((state.tip_hash(), state.tip_height()))
    }

    fn send_raw_transaction(&self, tx: &MsgTx, _allow_high_fees: bool) -> Result<Hash, RpcError> {
        self.check_open()?;
        if self.reject_broadcast.load(Ordering::SeqCst) {
            return Err(RpcError::Rejected("transaction refused by test".into()));
        }
        let mut state = self.state.lock();
        let next_height = state.tip_height() + 1;
        let mut value_in = 0;
        for (index, input) in tx.tx_in.iter().enumerate() {
            let outpoint = input.previous_out_point;
            if state.spent_in_mempool(&outpoint) {
                return Err(RpcError::Rejected(format!("{outpoint} already spent in mempool")));
            }
            let coin = state
                .coins
                .get(&outpoint)
                .ok_or_else(|| RpcError::Rejected(format!("{outpoint} is not unspent")))?;
            if next_height < coin.maturity_height {
                return Err(RpcError::Rejected(format!("{outpoint} is immature")));
            }
            verify_p2pkh_input(tx, index, &coin.output.pk_script)
                .map_err(|e| RpcError::Rejected(e.to_string()))?;
            value_in += coin.output.value;
        }
        let value_out: i64 = tx.tx_out.iter().map(|o| o.value).sum();
        if value_out > value_in {
            return Err(RpcError::Rejected(format!(
                "outputs {value_out} exceed inputs {value_in}"
            )));
        }
        state.mempool.push(tx.clone());
        Ok(tx.tx_hash())
    }

    fn generate(&self, num_blocks: u32) -> Result<Vec<Hash>, RpcError> {
        self.check_open()?;
        let mut hashes = Vec::with_capacity(num_blocks as usize);
        for _ in 0..num_blocks {
            let (block, relevant, notify) = {
                let mut state = self.state.lock();
                let (block, relevant) = state.mine_one();
                (block, relevant, state.notify)
            };
            if notify {
                if let Some(handler) = self.handler.lock().clone() {
                    handler.on_block_connected(&block.header.serialize(), &relevant);
                }
            }
            hashes.push(block.block_hash());
        }
        Ok(hashes)
    }

    fn get_raw_mempool(&self) -> Result<Vec<Hash>, RpcError> {
        self.check_open()?;
        Ok(self.state.lock().mempool.iter().map(|tx| tx.tx_hash()).collect())
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out the one [`SimNode`] session, registering the caller's handler.
pub struct SimFactory {
    pub node: Arc<SimNode>,
}

impl RpcClientFactory for SimFactory {
    fn new_rpc_connection(
        &self,
        _config: &RpcConnectionConfig,
        handler: Option<Arc<dyn NotificationHandler>>,
    ) -> Result<Arc<dyn RpcClient>, WalletError> {
        if let Some(handler) = handler {
            self.node.set_handler(handler);
        }
        let client: Arc<dyn RpcClient> = self.node.clone();
        Ok(client)
    }
}

pub fn rpc_config() -> RpcConnectionConfig {
    RpcConnectionConfig {
        host: "127.0.0.1:19556".into(),
        endpoint: "ws".into(),
        user: "user".into(),
        pass: "pass".into(),
        certificate_file: "rpc.cert".into(),
    }
}
