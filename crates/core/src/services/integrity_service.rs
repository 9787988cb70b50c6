use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::dividend::derive_account_ids;
use crate::models::ledger::LedgerData;
use crate::models::lot::BuyLot;
use crate::repository::traits::LedgerRepository;

/// One broken invariant found by an audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Violation {
    /// `unsoldAmount` disagrees with `buyAmount − Σ sellAmount`
    UnsoldMismatch {
        lot_id: Uuid,
        expected: f64,
        actual: f64,
    },
    /// `unsoldAmount` outside `[0, buyAmount]`
    UnsoldOutOfRange { lot_id: Uuid, unsold: f64 },
    /// `profitLoss` disagrees with `Σ sellAllocations.profitLoss`
    ProfitLossMismatch {
        lot_id: Uuid,
        expected: f64,
        actual: f64,
    },
    /// Lot points at an account that doesn't exist
    OrphanLot { lot_id: Uuid, account_id: Uuid },
    /// Batch `accountIds` is not the deduplicated allocation accounts
    AccountIdsMismatch {
        batch_id: Uuid,
        expected: Vec<Uuid>,
        actual: Vec<Uuid>,
    },
    /// Allocation references a lot that doesn't exist
    DanglingLot { batch_id: Uuid, lot_id: Uuid },
    /// Allocation's cached account differs from its lot's account
    StaleAccount {
        batch_id: Uuid,
        lot_id: Uuid,
        cached: Uuid,
        actual: Uuid,
    },
    /// Batch with no allocations left
    EmptyBatch { batch_id: Uuid },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub lots_checked: usize,
    pub batches_checked: usize,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check every document of a snapshot against the ledger invariants.
pub fn audit_data(data: &LedgerData, epsilon: f64) -> IntegrityReport {
    let accounts: HashSet<Uuid> = data.accounts.iter().map(|a| a.id).collect();
    let lots: HashMap<Uuid, &BuyLot> = data.lots.iter().map(|l| (l.id, l)).collect();
    let tolerance = epsilon.max(1e-9);
    let mut violations = Vec::new();

    for lot in &data.lots {
        let expected_unsold = lot.buy_amount - lot.sold_amount();
        if (lot.unsold_amount - expected_unsold).abs() > tolerance {
            violations.push(Violation::UnsoldMismatch {
                lot_id: lot.id,
                expected: expected_unsold,
                actual: lot.unsold_amount,
            });
        }
        if lot.unsold_amount < -tolerance || lot.unsold_amount > lot.buy_amount + tolerance {
            violations.push(Violation::UnsoldOutOfRange {
                lot_id: lot.id,
                unsold: lot.unsold_amount,
            });
        }
        let expected_pl: f64 = lot.sell_allocations.iter().map(|s| s.profit_loss).sum();
        if (lot.profit_loss - expected_pl).abs() > 0.001 + 1e-9 {
            violations.push(Violation::ProfitLossMismatch {
                lot_id: lot.id,
                expected: expected_pl,
                actual: lot.profit_loss,
            });
        }
        if !accounts.contains(&lot.account_id) {
            violations.push(Violation::OrphanLot {
                lot_id: lot.id,
                account_id: lot.account_id,
            });
        }
    }

    for batch in &data.batches {
        if batch.is_empty() {
            violations.push(Violation::EmptyBatch { batch_id: batch.id });
        }
        if !batch.is_consistent() {
            violations.push(Violation::AccountIdsMismatch {
                batch_id: batch.id,
                expected: derive_account_ids(&batch.div_records),
                actual: batch.account_ids.clone(),
            });
        }
        for record in &batch.div_records {
            match lots.get(&record.buy_record_id) {
                None => violations.push(Violation::DanglingLot {
                    batch_id: batch.id,
                    lot_id: record.buy_record_id,
                }),
                Some(lot) if lot.account_id != record.account_id => {
                    violations.push(Violation::StaleAccount {
                        batch_id: batch.id,
                        lot_id: lot.id,
                        cached: record.account_id,
                        actual: lot.account_id,
                    })
                }
                Some(_) => {}
            }
        }
    }

    IntegrityReport {
        lots_checked: data.lots.len(),
        batches_checked: data.batches.len(),
        violations,
    }
}

/// Runs [`audit_data`] against whatever the repository holds.
#[derive(Clone)]
pub struct IntegrityService {
    repo: Arc<dyn LedgerRepository>,
    epsilon: f64,
}

impl IntegrityService {
    pub fn new(repo: Arc<dyn LedgerRepository>, epsilon: f64) -> Self {
        Self { repo, epsilon }
    }

    pub async fn audit(&self) -> Result<IntegrityReport, CoreError> {
        let data = self.repo.export().await?;
        let report = audit_data(&data, self.epsilon);
        if !report.is_clean() {
            warn!(
                "Integrity audit found {} violations across {} lots and {} batches",
                report.violations.len(),
                report.lots_checked,
                report.batches_checked
            );
        }
        Ok(report)
    }
}
