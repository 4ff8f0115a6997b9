use crate::model::{BreakerState, PerformanceRecord, PlanStatus, TradePlan};
use crate::persistence::redb_store::{RedbStore, StoreError};
use redb::{ReadableTable, TableDefinition};
use std::sync::Arc;

// Tables
const TRADE_PLANS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("trade_plans");
const PERFORMANCE_TABLE: TableDefinition<u64, Vec<u8>> =
    TableDefinition::new("performance_records");
const BREAKER_TABLE: TableDefinition<&str, Vec<u8>> =
    TableDefinition::new("circuit_breaker_state");

pub struct PersistenceStore {
    store: Arc<RedbStore>,
}

impl PersistenceStore {
    pub fn new(store: Arc<RedbStore>) -> Self {
        Self { store }
    }

    /// Create all tables up front so first reads never race first writes.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let _ = txn.open_table(TRADE_PLANS_TABLE)?;
            let _ = txn.open_table(PERFORMANCE_TABLE)?;
            let _ = txn.open_table(BREAKER_TABLE)?;
        }
        txn.commit()?;
        Ok(())
    }

    // --- Trade Plans ---

    pub fn save_plan(&self, plan: &TradePlan) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let mut table = txn.open_table(TRADE_PLANS_TABLE)?;
            let data = serde_json::to_vec(plan)?;
            table.insert(plan.plan_id.as_str(), data)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load_plan(&self, plan_id: &str) -> Result<Option<TradePlan>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(TRADE_PLANS_TABLE)?;
        let maybe = table
            .get(plan_id)?
            .map(|v| serde_json::from_slice::<TradePlan>(&v.value()))
            .transpose()?;
        Ok(maybe)
    }

    pub fn load_pending_plans(&self) -> Result<Vec<TradePlan>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(TRADE_PLANS_TABLE)?;
        let mut items = Vec::new();
        for res in table.range::<&str>(..)? {
            let (_, v) = res?;
            let plan: TradePlan = serde_json::from_slice(&v.value())?;
            if plan.status.is_pending() {
                items.push(plan);
            }
        }
        // Oldest first so long-waiting plans are evaluated before fresh ones.
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    /// The one mutation the auto-execution evaluator is allowed: update
    /// `status` and append `notes`. Every other field is rewritten from the
    /// stored copy, never from the caller's.
    pub fn update_plan_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
        new_notes: &[String],
    ) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let mut table = txn.open_table(TRADE_PLANS_TABLE)?;
            let stored = table
                .get(plan_id)?
                .map(|v| serde_json::from_slice::<TradePlan>(&v.value()))
                .transpose()?;
            let mut plan = stored.ok_or_else(|| {
                StoreError::Integrity(format!("plan {} not found for status update", plan_id))
            })?;
            plan.status = status;
            plan.notes.extend_from_slice(new_notes);
            let data = serde_json::to_vec(&plan)?;
            table.insert(plan_id, data)?;
        }
        txn.commit()?;
        Ok(())
    }

    // --- Performance Records ---

    /// Append-only: each record gets the next sequence number. Redb write
    /// transactions serialize concurrent appends, so metrics recomputation
    /// never observes a partial write.
    pub fn append_performance_record(&self, record: &PerformanceRecord) -> Result<u64, StoreError> {
        let txn = self.store.begin_write()?;
        let seq = {
            let mut table = txn.open_table(PERFORMANCE_TABLE)?;
            let last = table.last()?.map(|(k, _)| k.value()).unwrap_or(0);
            let seq = last + 1;
            let data = serde_json::to_vec(record)?;
            table.insert(seq, data)?;
            seq
        };
        txn.commit()?;
        Ok(seq)
    }

    pub fn load_performance_records(
        &self,
        strategy_name: &str,
    ) -> Result<Vec<PerformanceRecord>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(PERFORMANCE_TABLE)?;
        let mut items = Vec::new();
        for res in table.range::<u64>(..)? {
            let (_, v) = res?;
            let record: PerformanceRecord = serde_json::from_slice(&v.value())?;
            if record.strategy_name == strategy_name {
                items.push(record);
            }
        }
        Ok(items)
    }

    pub fn load_all_performance_records(&self) -> Result<Vec<PerformanceRecord>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(PERFORMANCE_TABLE)?;
        let mut items = Vec::new();
        for res in table.range::<u64>(..)? {
            let (_, v) = res?;
            items.push(serde_json::from_slice(&v.value())?);
        }
        Ok(items)
    }

    /// Operator reset: the only sanctioned deletion of performance history.
    pub fn delete_performance_records(&self, strategy_name: &str) -> Result<usize, StoreError> {
        let txn = self.store.begin_write()?;
        let removed = {
            let mut table = txn.open_table(PERFORMANCE_TABLE)?;
            let mut doomed = Vec::new();
            for res in table.range::<u64>(..)? {
                let (k, v) = res?;
                let record: PerformanceRecord = serde_json::from_slice(&v.value())?;
                if record.strategy_name == strategy_name {
                    doomed.push(k.value());
                }
            }
            for key in &doomed {
                table.remove(key)?;
            }
            doomed.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    // --- Circuit Breaker State ---

    pub fn save_breaker_state(
        &self,
        strategy_name: &str,
        state: &BreakerState,
    ) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let mut table = txn.open_table(BREAKER_TABLE)?;
            let data = serde_json::to_vec(state)?;
            table.insert(strategy_name, data)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load_breaker_state(
        &self,
        strategy_name: &str,
    ) -> Result<Option<BreakerState>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(BREAKER_TABLE)?;
        let maybe = table
            .get(strategy_name)?
            .map(|v| serde_json::from_slice::<BreakerState>(&v.value()))
            .transpose()?;
        Ok(maybe)
    }

    pub fn delete_breaker_state(&self, strategy_name: &str) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let mut table = txn.open_table(BREAKER_TABLE)?;
            table.remove(strategy_name)?;
        }
        txn.commit()?;
        Ok(())
    }

    // --- Idempotency (broker submissions) ---

    pub fn check_idempotency(&self, key: &str) -> Result<bool, StoreError> {
        self.store.check_idempotency(key)
    }

    pub fn set_idempotency(&self, key: &str, now_ms: i64) -> Result<(), StoreError> {
        self.store.set_idempotency(key, now_ms)
    }

    pub fn clear_idempotency(&self, key: &str) -> Result<(), StoreError> {
        self.store.clear_idempotency(key)
    }
}
