//! Single-writer ordering service
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              OrdererHandle (Clone)                    │
//! │        Broadcast / CommitStatus / Flush               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              OrdererActor (Single Task)               │
//! │  Pending: Vec<OrderedTransaction>                     │
//! │  Cut: max_message_count or batch_timeout              │
//! │                       │                               │
//! │                       ▼                               │
//! │  StateStore::apply(merged write set of valid txs)     │
//! │  resolve commit-status waiters                        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Transactions are applied in arrival order. The only read-set check is on
//! keys a transaction read as absent: if such a key was written earlier in
//! the block, or is present in committed state by the time the block is cut,
//! the transaction fails with `MVCC_READ_CONFLICT`. This keeps Create unique
//! while conflicting Update and Transfer calls resolve as last-committed-wins.
//!
//! Outcomes stay queryable for `status_retention_blocks` blocks; older
//! transaction ids are forgotten, duplicates included.

use crate::{
    config::LocalNetworkConfig, error::Stage, metrics::OrdererMetrics, proto::TxValidationCode,
    Error, Result,
};
use cert_contract::{StateStore, WriteSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Validated transaction waiting for a block
#[derive(Debug, Clone)]
pub struct OrderedTransaction {
    /// Transaction id
    pub tx_id: String,
    /// Writes to apply if the transaction is valid
    pub writes: WriteSet,
    /// Keys that must still be absent at commit
    pub absent_keys: Vec<String>,
    /// Code assigned by the submitting peer
    pub code: TxValidationCode,
}

/// Final outcome of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStatus {
    /// Validation code
    pub code: TxValidationCode,
    /// Block the transaction landed in
    pub block_number: u64,
}

/// Message sent to the orderer actor
#[derive(Debug)]
pub enum OrdererMessage {
    /// Queue a transaction for the next block
    Broadcast {
        transaction: OrderedTransaction,
        response: oneshot::Sender<()>,
    },

    /// Resolve once the transaction is in a block
    CommitStatus {
        tx_id: String,
        response: oneshot::Sender<CommitStatus>,
    },

    /// Cut a block now
    Flush { response: oneshot::Sender<()> },

    /// Cut the pending block and stop
    Shutdown,
}

/// Actor that cuts and commits blocks
pub struct OrdererActor {
    store: Arc<dyn StateStore>,
    mailbox: mpsc::Receiver<OrdererMessage>,
    pending: Vec<OrderedTransaction>,
    max_message_count: usize,
    batch_timeout: Duration,
    next_block: u64,
    retention: usize,
    history: VecDeque<Vec<String>>,
    seen: HashSet<String>,
    committed: HashMap<String, CommitStatus>,
    waiters: HashMap<String, Vec<oneshot::Sender<CommitStatus>>>,
    metrics: OrdererMetrics,
}

impl OrdererActor {
    /// Create new actor
    pub fn new(
        store: Arc<dyn StateStore>,
        mailbox: mpsc::Receiver<OrdererMessage>,
        config: &LocalNetworkConfig,
        metrics: OrdererMetrics,
    ) -> Self {
        let retention = config.status_retention_blocks.max(1);
        Self {
            store,
            mailbox,
            pending: Vec::with_capacity(config.max_message_count),
            max_message_count: config.max_message_count.max(1),
            batch_timeout: config.batch_timeout(),
            next_block: 1,
            retention,
            history: VecDeque::with_capacity(retention),
            seen: HashSet::new(),
            committed: HashMap::new(),
            waiters: HashMap::new(),
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut batch_timer = interval_at(Instant::now() + self.batch_timeout, self.batch_timeout);
        batch_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.mailbox.recv() => {
                    if let OrdererMessage::Shutdown = msg {
                        self.cut_block();
                        break;
                    }
                    self.handle_message(msg);

                    if self.pending.len() >= self.max_message_count {
                        self.cut_block();
                    }
                }

                _ = batch_timer.tick(), if !self.pending.is_empty() => {
                    self.cut_block();
                }

                // Mailbox closed
                else => {
                    self.cut_block();
                    break;
                }
            }
        }

        tracing::info!(blocks = self.next_block - 1, "Orderer stopped");
    }

    fn handle_message(&mut self, msg: OrdererMessage) {
        match msg {
            OrdererMessage::Broadcast {
                transaction,
                response,
            } => {
                tracing::debug!(tx_id = %transaction.tx_id, "Transaction queued");
                self.pending.push(transaction);
                let _ = response.send(());
            }

            OrdererMessage::CommitStatus { tx_id, response } => {
                match self.committed.get(&tx_id) {
                    Some(status) => {
                        let _ = response.send(*status);
                    }
                    None => self.waiters.entry(tx_id).or_default().push(response),
                }
            }

            OrdererMessage::Flush { response } => {
                self.cut_block();
                let _ = response.send(());
            }

            OrdererMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    /// Commit every pending transaction as one block
    fn cut_block(&mut self) {
        self.prune_waiters();
        if self.pending.is_empty() {
            return;
        }

        let block_number = self.next_block;
        self.next_block += 1;

        let transactions = std::mem::take(&mut self.pending);
        let mut merged = WriteSet::new();
        let mut outcomes = Vec::with_capacity(transactions.len());

        for transaction in transactions {
            let code = if transaction.code != TxValidationCode::Valid {
                transaction.code
            } else if self.seen.contains(&transaction.tx_id) {
                TxValidationCode::DuplicateTxid
            } else if self.absent_key_written(&transaction.absent_keys, &merged) {
                TxValidationCode::MvccReadConflict
            } else {
                TxValidationCode::Valid
            };
            self.seen.insert(transaction.tx_id.clone());

            if code == TxValidationCode::Valid {
                merged.merge(&transaction.writes);
            }
            outcomes.push((transaction.tx_id, code));
        }

        // Atomic commit
        if let Err(e) = self.store.apply(&merged) {
            tracing::error!(block = block_number, error = %e, "Failed to apply block");
            for (_, code) in outcomes.iter_mut() {
                if *code == TxValidationCode::Valid {
                    *code = TxValidationCode::InvalidOtherReason;
                }
            }
        }

        self.metrics.record_block(outcomes.len());
        tracing::info!(
            block = block_number,
            transactions = outcomes.len(),
            keys = merged.len(),
            "Block committed"
        );

        let mut block_ids = Vec::with_capacity(outcomes.len());
        for (tx_id, code) in outcomes {
            self.metrics.record_transaction(code.as_str());

            // A duplicate never replaces the first outcome for its id
            let status = *self.committed.entry(tx_id.clone()).or_insert(CommitStatus {
                code,
                block_number,
            });
            if let Some(waiters) = self.waiters.remove(&tx_id) {
                for waiter in waiters {
                    let _ = waiter.send(status);
                }
            }
            block_ids.push(tx_id);
        }

        self.retain(block_ids);
    }

    /// Whether a key the transaction needs absent is now live
    fn absent_key_written(&self, absent_keys: &[String], merged: &WriteSet) -> bool {
        absent_keys.iter().any(|key| match merged.get(key) {
            Some(pending) => pending.map_or(false, |value| !value.is_empty()),
            None => match self.store.get(key) {
                Ok(value) => value.map_or(false, |value| !value.is_empty()),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Read-set check failed");
                    true
                }
            },
        })
    }

    /// Record a block's ids and forget blocks past the retention window
    fn retain(&mut self, block_ids: Vec<String>) {
        self.history.push_back(block_ids);
        while self.history.len() > self.retention {
            if let Some(expired) = self.history.pop_front() {
                for tx_id in expired {
                    self.seen.remove(&tx_id);
                    self.committed.remove(&tx_id);
                }
            }
        }
    }

    /// Drop waiters whose callers stopped listening
    fn prune_waiters(&mut self) {
        self.waiters.retain(|_, waiters| {
            waiters.retain(|waiter| !waiter.is_closed());
            !waiters.is_empty()
        });
    }
}

/// Handle to the orderer actor (cloneable)
#[derive(Clone, Debug)]
pub struct OrdererHandle {
    sender: mpsc::Sender<OrdererMessage>,
}

impl OrdererHandle {
    /// Spawn the actor on the current runtime
    pub fn spawn(
        store: Arc<dyn StateStore>,
        config: &LocalNetworkConfig,
        metrics: OrdererMetrics,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let actor = OrdererActor::new(store, mailbox, config, metrics);
        let task = tokio::spawn(actor.run());

        (Self { sender }, task)
    }

    /// Queue a transaction
    pub async fn broadcast(&self, transaction: OrderedTransaction) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.sender
            .send(OrdererMessage::Broadcast {
                transaction,
                response,
            })
            .await
            .map_err(|_| stopped(Stage::Submit))?;
        rx.await.map_err(|_| stopped(Stage::Submit))
    }

    /// Wait until the transaction is committed
    pub async fn commit_status(&self, tx_id: String) -> Result<CommitStatus> {
        let (response, rx) = oneshot::channel();
        self.sender
            .send(OrdererMessage::CommitStatus { tx_id, response })
            .await
            .map_err(|_| stopped(Stage::CommitStatus))?;
        rx.await.map_err(|_| stopped(Stage::CommitStatus))
    }

    /// Cut a block immediately
    pub async fn flush(&self) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.sender
            .send(OrdererMessage::Flush { response })
            .await
            .map_err(|_| stopped(Stage::Submit))?;
        rx.await.map_err(|_| stopped(Stage::Submit))
    }

    /// Ask the actor to stop after cutting its last block
    pub async fn shutdown(&self) {
        let _ = self.sender.send(OrdererMessage::Shutdown).await;
    }
}

fn stopped(stage: Stage) -> Error {
    Error::connection_refused(stage, "ordering service is not running")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cert_contract::MemoryStore;

    fn transaction(tx_id: &str, key: &str, value: &str) -> OrderedTransaction {
        let mut writes = WriteSet::new();
        writes.put(key, value.as_bytes().to_vec());
        OrderedTransaction {
            tx_id: tx_id.to_string(),
            writes,
            absent_keys: Vec::new(),
            code: TxValidationCode::Valid,
        }
    }

    /// A create: reads `key` as absent and writes it
    fn create(tx_id: &str, key: &str, value: &str) -> OrderedTransaction {
        OrderedTransaction {
            absent_keys: vec![key.to_string()],
            ..transaction(tx_id, key, value)
        }
    }

    /// Actor driven by hand, without a runtime task
    fn actor(status_retention_blocks: usize) -> (OrdererActor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (_sender, mailbox) = mpsc::channel(1);
        let config = LocalNetworkConfig {
            status_retention_blocks,
            ..Default::default()
        };
        let metrics = OrdererMetrics::new().unwrap();
        let actor = OrdererActor::new(store.clone(), mailbox, &config, metrics);
        (actor, store)
    }

    fn spawn(
        max_message_count: usize,
        batch_timeout_ms: u64,
    ) -> (OrdererHandle, Arc<MemoryStore>, JoinHandle<()>) {
        let store = Arc::new(MemoryStore::new());
        let config = LocalNetworkConfig {
            max_message_count,
            batch_timeout_ms,
            ..Default::default()
        };
        let (handle, task) = OrdererHandle::spawn(store.clone(), &config, OrdererMetrics::new().unwrap());
        (handle, store, task)
    }

    #[tokio::test]
    async fn test_block_cut_by_size() {
        let (orderer, store, _task) = spawn(2, 60_000);

        orderer.broadcast(transaction("tx-1", "a", "1")).await.unwrap();
        orderer.broadcast(transaction("tx-2", "b", "2")).await.unwrap();

        let first = orderer.commit_status("tx-1".into()).await.unwrap();
        let second = orderer.commit_status("tx-2".into()).await.unwrap();
        assert_eq!(first, CommitStatus { code: TxValidationCode::Valid, block_number: 1 });
        assert_eq!(second.block_number, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_block_cut_by_timeout() {
        let (orderer, store, _task) = spawn(100, 20);

        orderer.broadcast(transaction("tx-1", "a", "1")).await.unwrap();
        let status = orderer.commit_status("tx-1".into()).await.unwrap();

        assert_eq!(status.code, TxValidationCode::Valid);
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_duplicate_txid_not_applied() {
        let (orderer, store, _task) = spawn(100, 60_000);

        orderer.broadcast(transaction("tx-1", "a", "first")).await.unwrap();
        orderer.flush().await.unwrap();
        orderer.broadcast(transaction("tx-1", "a", "replayed")).await.unwrap();
        orderer.flush().await.unwrap();

        assert_eq!(store.get("a").unwrap(), Some(b"first".to_vec()));
        let status = orderer.commit_status("tx-1".into()).await.unwrap();
        assert_eq!(status, CommitStatus { code: TxValidationCode::Valid, block_number: 1 });
    }

    #[tokio::test]
    async fn test_invalid_transaction_skipped() {
        let (orderer, store, _task) = spawn(100, 60_000);

        let mut forged = transaction("tx-bad", "a", "forged");
        forged.code = TxValidationCode::BadCreatorSignature;
        orderer.broadcast(forged).await.unwrap();
        orderer.broadcast(transaction("tx-good", "b", "ok")).await.unwrap();
        orderer.flush().await.unwrap();

        let bad = orderer.commit_status("tx-bad".into()).await.unwrap();
        assert_eq!(bad.code, TxValidationCode::BadCreatorSignature);
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some(b"ok".to_vec()));
    }

    #[tokio::test]
    async fn test_last_write_in_block_wins() {
        let (orderer, store, _task) = spawn(100, 60_000);

        orderer.broadcast(transaction("tx-1", "a", "first")).await.unwrap();
        orderer.broadcast(transaction("tx-2", "a", "second")).await.unwrap();
        orderer.flush().await.unwrap();

        assert_eq!(store.get("a").unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let (orderer, store, task) = spawn(100, 60_000);

        orderer.broadcast(transaction("tx-1", "a", "1")).await.unwrap();
        orderer.shutdown().await;
        task.await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(orderer.commit_status("tx-1".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_second_create_in_block_conflicts() {
        let (orderer, store, _task) = spawn(100, 60_000);

        orderer.broadcast(create("tx-1", "R-1", "alice")).await.unwrap();
        orderer.broadcast(create("tx-2", "R-1", "mallory")).await.unwrap();
        orderer.flush().await.unwrap();

        let first = orderer.commit_status("tx-1".into()).await.unwrap();
        let second = orderer.commit_status("tx-2".into()).await.unwrap();
        assert_eq!(first.code, TxValidationCode::Valid);
        assert_eq!(second.code, TxValidationCode::MvccReadConflict);
        assert_eq!(store.get("R-1").unwrap(), Some(b"alice".to_vec()));
    }

    #[tokio::test]
    async fn test_create_conflicts_with_earlier_block() {
        let (orderer, store, _task) = spawn(100, 60_000);

        orderer.broadcast(create("tx-1", "R-1", "alice")).await.unwrap();
        orderer.flush().await.unwrap();
        // Endorsed before tx-1 committed, ordered after
        orderer.broadcast(create("tx-2", "R-1", "mallory")).await.unwrap();
        orderer.flush().await.unwrap();

        let second = orderer.commit_status("tx-2".into()).await.unwrap();
        assert_eq!(second, CommitStatus { code: TxValidationCode::MvccReadConflict, block_number: 2 });
        assert_eq!(store.get("R-1").unwrap(), Some(b"alice".to_vec()));
    }

    #[test]
    fn test_create_after_delete_in_block_is_valid() {
        let (mut actor, store) = actor(8);
        let mut seed = WriteSet::new();
        seed.put("R-1", b"old".to_vec());
        store.apply(&seed).unwrap();

        let mut delete = transaction("tx-del", "R-1", "");
        delete.writes = {
            let mut writes = WriteSet::new();
            writes.delete("R-1");
            writes
        };
        actor.pending.push(delete);
        actor.pending.push(create("tx-new", "R-1", "new"));
        actor.cut_block();

        // The delete landed first, so the create's absence read still holds
        assert_eq!(actor.committed["tx-new"].code, TxValidationCode::Valid);
        assert_eq!(store.get("R-1").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn test_outcomes_expire_after_retention() {
        let (mut actor, _store) = actor(2);

        for block in 1..=3 {
            let tx_id = format!("tx-{}", block);
            actor.pending.push(transaction(&tx_id, "a", "1"));
            actor.cut_block();
        }

        assert_eq!(actor.history.len(), 2);
        assert!(!actor.committed.contains_key("tx-1"));
        assert!(!actor.seen.contains("tx-1"));
        assert_eq!(actor.committed["tx-3"].block_number, 3);
        assert_eq!(actor.committed.len(), 2);
        assert_eq!(actor.seen.len(), 2);
    }

    #[test]
    fn test_abandoned_waiters_pruned_on_cut() {
        let (mut actor, _store) = actor(8);

        let (abandoned, rx) = oneshot::channel();
        drop(rx);
        let (live, mut live_rx) = oneshot::channel();
        actor.waiters.entry("tx-gone".into()).or_default().push(abandoned);
        actor.waiters.entry("tx-later".into()).or_default().push(live);

        // Even an empty cut sweeps abandoned waiters
        actor.cut_block();
        assert!(!actor.waiters.contains_key("tx-gone"));
        assert_eq!(actor.waiters["tx-later"].len(), 1);

        actor.pending.push(transaction("tx-later", "a", "1"));
        actor.cut_block();
        assert!(actor.waiters.is_empty());
        assert_eq!(live_rx.try_recv().unwrap().code, TxValidationCode::Valid);
    }
}
