//! Append-only cost ledger.
//!
//! Records every billable call and answers filtered sums. The ledger is the
//! single source the budget guard reads from; phases append a record for
//! each external call before reporting success.
//!
//! Daily windows are anchored at UTC midnight so `daily_cost` and
//! `provider_daily_cost` always agree; the weekly window is rolling
//! (now − 7 days).

use std::sync::RwLock;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::model::CostRecord;
use crate::state_machine::Phase;

/// In-memory append-only record of billable calls.
///
/// Internally synchronized: appends and queries may come from the phase
/// executor, the budget guard, and the control surface concurrently. A query
/// observes every record appended before it.
#[derive(Debug, Default)]
pub struct CostLedger {
    records: RwLock<Vec<CostRecord>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. No deduplication, no ordering requirement.
    pub fn record(&self, rec: CostRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(rec);
    }

    fn sum_where<F>(&self, pred: F) -> f64
    where
        F: Fn(&CostRecord) -> bool,
    {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().filter(|r| pred(r)).map(|r| r.cost_usd).sum()
    }

    /// Sum of all records.
    pub fn total(&self) -> f64 {
        self.sum_where(|_| true)
    }

    /// Sum of records with `timestamp ≥ since`.
    pub fn cost_since(&self, since: DateTime<Utc>) -> f64 {
        self.sum_where(|r| r.timestamp >= since)
    }

    /// Sum of records charged to the given task. Records without a task id
    /// never contribute.
    pub fn cost_for_task(&self, task_id: &str) -> f64 {
        self.sum_where(|r| r.task_id.as_deref() == Some(task_id))
    }

    /// Sum of records charged by the given phase.
    pub fn cost_for_phase(&self, phase: Phase) -> f64 {
        self.sum_where(|r| r.phase == phase)
    }

    /// Sum of records for a provider with `timestamp ≥ since`.
    pub fn cost_for_provider(&self, provider: &str, since: DateTime<Utc>) -> f64 {
        self.sum_where(|r| r.provider == provider && r.timestamp >= since)
    }

    /// Spend since UTC midnight today.
    pub fn daily_cost(&self) -> f64 {
        self.cost_since(Self::utc_midnight())
    }

    /// Rolling seven-day spend.
    pub fn weekly_cost(&self) -> f64 {
        self.cost_since(Utc::now() - Duration::days(7))
    }

    /// A provider's spend since UTC midnight today. Shares its window anchor
    /// with [`daily_cost`](Self::daily_cost).
    pub fn provider_daily_cost(&self, provider: &str) -> f64 {
        self.cost_for_provider(provider, Self::utc_midnight())
    }

    /// Defensive copy of all records; the internal container is never
    /// exposed by reference.
    pub fn records(&self) -> Vec<CostRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace internal state wholesale (durable restore).
    pub fn load_records(&self, records: Vec<CostRecord>) {
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        *guard = records;
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start of the current UTC day.
    fn utc_midnight() -> DateTime<Utc> {
        Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc()
    }
}
