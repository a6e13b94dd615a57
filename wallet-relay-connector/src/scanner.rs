//! # Scan Loop
//!
//! Once the daemon is synced, the service actor runs one [`ScanWorker::step`]
//! per scan tick. A step advances the persisted cursor by an adaptively sized
//! batch and publishes one `transaction` event per wallet-owned transfer leg.
//! A failed step leaves the cursor untouched, so the same range is retried.

use crate::events::{EventBus, ServiceEvent, TransactionRecord};
use crate::rpc::{BlockTransactions, RpcError, WalletRpc};
use crate::storage::CursorStore;
use std::collections::HashSet;
use std::sync::Arc;

/// A contiguous block range `[from, from + batch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub from: u64,
    pub batch: u64,
}

impl ScanRange {
    /// The cursor value after this range has been scanned.
    pub fn to(&self) -> u64 {
        self.from + self.batch
    }
}

/// Result of a single scan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing new to scan.
    Idle,
    Scanned { range: ScanRange, records: usize },
    Failed,
}

/// Step function from backlog size to batch size.
pub fn batch_size(backlog: u64) -> u64 {
    if backlog > 100 {
        1000
    } else if backlog > 10 {
        10
    } else {
        1
    }
}

/// Plans the next range, never reaching past the known tip.
pub fn plan(cursor: u64, known_block_count: u64) -> Option<ScanRange> {
    if cursor >= known_block_count {
        return None;
    }
    let backlog = known_block_count - cursor;
    Some(ScanRange {
        from: cursor,
        batch: batch_size(backlog).min(backlog),
    })
}

/// Splits daemon transactions into one record per transfer leg touching an owned address.
pub fn decompose(items: &[BlockTransactions], owned: &HashSet<String>) -> Vec<TransactionRecord> {
    let mut records = Vec::new();
    for item in items {
        for tx in &item.transactions {
            for transfer in &tx.transfers {
                if transfer.amount == 0.0 || !owned.contains(&transfer.address) {
                    continue;
                }
                records.push(TransactionRecord {
                    transaction_hash: tx.transaction_hash.clone(),
                    block_hash: item.block_hash.clone(),
                    block_index: tx.block_index,
                    amount: transfer.amount.abs(),
                    fee: tx.fee,
                    address: transfer.address.clone(),
                    payment_id: tx.payment_id.clone(),
                    unlock_time: tx.unlock_time,
                    timestamp: tx.timestamp,
                    inbound: transfer.amount > 0.0,
                    is_base: tx.is_base,
                });
            }
        }
    }
    records
}

pub(crate) struct ScanWorker {
    rpc: Arc<dyn WalletRpc>,
    store: Arc<dyn CursorStore>,
    bus: EventBus,
    app_name: String,
}

impl ScanWorker {
    pub(crate) fn new(
        rpc: Arc<dyn WalletRpc>,
        store: Arc<dyn CursorStore>,
        bus: EventBus,
        app_name: String,
    ) -> Self {
        Self {
            rpc,
            store,
            bus,
            app_name,
        }
    }

    /// Runs one scan step against the given known tip.
    pub(crate) async fn step(&self, known_block_count: u64) -> StepOutcome {
        let cursor = match self.store.get_cursor(&self.app_name).await {
            Ok(cursor) => cursor,
            Err(e) => {
                self.bus
                    .emit(ServiceEvent::Error(format!("Failed to read scan cursor: {:#}", e)));
                return StepOutcome::Failed;
            }
        };

        let Some(range) = plan(cursor, known_block_count) else {
            return StepOutcome::Idle;
        };

        self.bus.emit(ServiceEvent::Scan {
            from: range.from,
            to: range.to(),
        });

        let records = match self.fetch(range).await {
            Ok(records) => records,
            Err(e) => {
                self.bus.emit(ServiceEvent::Error(format!(
                    "Scan of blocks {}..{} failed: {}",
                    range.from,
                    range.to(),
                    e
                )));
                return StepOutcome::Failed;
            }
        };

        let count = records.len();
        for record in records {
            self.bus.emit(ServiceEvent::Transaction(record));
        }

        if let Err(e) = self.store.set_cursor(&self.app_name, range.to()).await {
            self.bus
                .emit(ServiceEvent::Error(format!("Failed to persist scan cursor: {:#}", e)));
            return StepOutcome::Failed;
        }

        tracing::debug!(from = range.from, to = range.to(), records = count, "Scan step complete");
        StepOutcome::Scanned {
            range,
            records: count,
        }
    }

    async fn fetch(&self, range: ScanRange) -> Result<Vec<TransactionRecord>, RpcError> {
        let owned: HashSet<String> = self.rpc.get_addresses().await?.into_iter().collect();
        let items = self.rpc.get_transactions(range.from, range.batch).await?;
        Ok(decompose(&items, &owned))
    }
}
