//! Billing: the status / sub-status cascade, debounced write-back of the
//! selection, and bill total computation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::try_join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::db::HospitalStore;
use crate::error::{AppError, AppResult};
use crate::models::{Bill, BillDraft, BillLineItem, BillSection, BillingSelection, Visit};

// ===== Status cascade =====

/// Billing statuses and the sub-statuses each one allows, in display order.
pub const BILLING_STATUSES: &[(&str, &[&str])] = &[
    ("Pending", &["Documents Pending", "Approval Pending", "Bill Preparation"]),
    ("Submitted", &["Submitted to ESIC", "Submitted to CGHS", "Under Query"]),
    ("Approved", &["Partially Approved", "Fully Approved"]),
    ("Paid", &["Payment Received", "Partial Payment"]),
    ("Rejected", &["Query Raised", "Resubmission Required"]),
];

/// Status considered as a settled bill when issuing gate passes.
pub const PAID_STATUS: &str = "Paid";

pub fn sub_statuses(status: &str) -> Option<&'static [&'static str]> {
    BILLING_STATUSES
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, subs)| *subs)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOption {
    pub status: &'static str,
    pub sub_statuses: &'static [&'static str],
}

pub fn status_options() -> Vec<StatusOption> {
    BILLING_STATUSES
        .iter()
        .map(|&(status, sub_statuses)| StatusOption { status, sub_statuses })
        .collect()
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl BillingSelection {
    /// First dropdown. A sub-status that does not belong to the new status is
    /// cleared; an empty value clears both.
    pub fn select_status(&mut self, status: Option<&str>) -> AppResult<()> {
        match blank_to_none(status) {
            None => {
                self.status = None;
                self.sub_status = None;
            }
            Some(status) => {
                let allowed = sub_statuses(status)
                    .ok_or_else(|| AppError::Validation(format!("unknown billing status '{}'", status)))?;
                let keep = self
                    .sub_status
                    .as_deref()
                    .map_or(false, |sub| allowed.contains(&sub));
                if !keep {
                    self.sub_status = None;
                }
                self.status = Some(status.to_string());
            }
        }
        Ok(())
    }

    /// Second dropdown; only offered once a status is chosen.
    pub fn select_sub_status(&mut self, sub_status: Option<&str>) -> AppResult<()> {
        let sub_status = match blank_to_none(sub_status) {
            Some(sub) => sub,
            None => {
                self.sub_status = None;
                return Ok(());
            }
        };
        let status = self
            .status
            .as_deref()
            .ok_or_else(|| AppError::Validation("select a billing status first".into()))?;
        let allowed = sub_statuses(status).unwrap_or_default();
        if !allowed.contains(&sub_status) {
            return Err(AppError::Validation(format!(
                "'{}' is not a sub-status of '{}'",
                sub_status, status
            )));
        }
        self.sub_status = Some(sub_status.to_string());
        Ok(())
    }
}

// ===== Debounced write-back =====

#[derive(Debug, Clone)]
struct PendingWrite {
    generation: u64,
    selection: BillingSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Will be written once the debounce window passes quietly.
    Scheduled,
    /// Same as what is already stored; nothing to write.
    Unchanged,
}

struct SyncState {
    store: Arc<dyn HospitalStore>,
    debounce: Duration,
    generation: AtomicU64,
    pending: DashMap<Uuid, PendingWrite>,
    /// Latest selection handed to the store and not yet confirmed.
    inflight: DashMap<Uuid, BillingSelection>,
    persisted: DashMap<Uuid, BillingSelection>,
    write_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Collapses bursts of billing selections per visit into a single store
/// write, issued after `debounce` of quiet.
#[derive(Clone)]
pub struct BillingStatusSync {
    state: Arc<SyncState>,
}

impl BillingStatusSync {
    pub fn new(store: Arc<dyn HospitalStore>, debounce: Duration) -> Self {
        Self {
            state: Arc::new(SyncState {
                store,
                debounce,
                generation: AtomicU64::new(0),
                pending: DashMap::new(),
                inflight: DashMap::new(),
                persisted: DashMap::new(),
                write_locks: DashMap::new(),
            }),
        }
    }

    /// Record what the store holds for a visit, unless a newer write already
    /// went through this instance.
    pub fn seed(&self, visit_id: Uuid, stored: BillingSelection) {
        self.state.persisted.entry(visit_id).or_insert(stored);
    }

    /// The selection the user last made, written or not.
    pub fn current(&self, visit_id: Uuid) -> Option<BillingSelection> {
        if let Some(pending) = self.state.pending.get(&visit_id) {
            return Some(pending.selection.clone());
        }
        self.settled(visit_id)
    }

    /// What the store holds once writes already under way have landed.
    fn settled(&self, visit_id: Uuid) -> Option<BillingSelection> {
        if let Some(inflight) = self.state.inflight.get(&visit_id) {
            return Some(inflight.clone());
        }
        self.state.persisted.get(&visit_id).map(|s| s.clone())
    }

    pub fn has_pending(&self, visit_id: Uuid) -> bool {
        self.state.pending.contains_key(&visit_id)
    }

    /// Queue a selection. Supersedes any pending one for the same visit.
    #[instrument(skip(self, selection), fields(visit_id = %visit_id))]
    pub fn submit(&self, visit_id: Uuid, selection: BillingSelection) -> SyncOutcome {
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let unchanged = self.settled(visit_id).map_or(false, |settled| settled == selection);
        if unchanged {
            // Reverting inside the window cancels the pending write.
            self.state.pending.remove(&visit_id);
            debug!("selection matches stored value, skipping write");
            return SyncOutcome::Unchanged;
        }

        self.state
            .pending
            .insert(visit_id, PendingWrite { generation, selection });

        let sync = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(sync.state.debounce).await;
            if let Err(e) = sync.write_if_current(visit_id, generation).await {
                error!(%visit_id, error = %e, "failed to persist billing status");
            }
        });
        SyncOutcome::Scheduled
    }

    /// Write a pending selection now instead of waiting for the window.
    #[instrument(skip(self), fields(visit_id = %visit_id))]
    pub async fn flush(&self, visit_id: Uuid) -> AppResult<bool> {
        match self.state.pending.remove(&visit_id) {
            Some((_, pending)) => self.persist(visit_id, pending.selection).await,
            None => Ok(false),
        }
    }

    /// Flush every pending selection; used on shutdown.
    pub async fn flush_all(&self) -> AppResult<usize> {
        let visits: Vec<Uuid> = self.state.pending.iter().map(|e| *e.key()).collect();
        let written = try_join_all(visits.into_iter().map(|visit_id| self.flush(visit_id))).await?;
        Ok(written.into_iter().filter(|w| *w).count())
    }

    /// Drop all state about a visit (it was deleted).
    pub fn forget(&self, visit_id: Uuid) {
        self.state.pending.remove(&visit_id);
        self.state.inflight.remove(&visit_id);
        self.state.persisted.remove(&visit_id);
        self.state.write_locks.remove(&visit_id);
    }

    async fn write_if_current(&self, visit_id: Uuid, generation: u64) -> AppResult<bool> {
        let pending = self
            .state
            .pending
            .remove_if(&visit_id, |_, p| p.generation == generation);
        match pending {
            Some((_, pending)) => self.persist(visit_id, pending.selection).await,
            // Superseded, flushed or cancelled meanwhile.
            None => Ok(false),
        }
    }

    /// Writes for one visit reach the store one at a time, in the order they
    /// left the pending map.
    async fn persist(&self, visit_id: Uuid, selection: BillingSelection) -> AppResult<bool> {
        self.state.inflight.insert(visit_id, selection.clone());
        let lock = self.state.write_locks.entry(visit_id).or_default().clone();
        let _guard = lock.lock().await;

        let written = self.write(visit_id, &selection).await;
        self.state
            .inflight
            .remove_if(&visit_id, |_, inflight| *inflight == selection);
        written
    }

    async fn write(&self, visit_id: Uuid, selection: &BillingSelection) -> AppResult<bool> {
        let unchanged = self
            .state
            .persisted
            .get(&visit_id)
            .map_or(false, |persisted| *persisted == *selection);
        if unchanged {
            return Ok(false);
        }
        self.state.store.update_billing_status(visit_id, selection).await?;
        debug!(%visit_id, status = ?selection.status, sub_status = ?selection.sub_status, "billing status written");
        self.state.persisted.insert(visit_id, selection.clone());
        Ok(true)
    }
}

// ===== Bill totals =====

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn bill_number(visit: &Visit) -> String {
    format!("BL-{}", visit.visit_id)
}

/// Turn an editor draft into a bill with every amount recomputed. The bill id,
/// number and date survive from `existing` when there is one.
pub fn build_bill(visit: &Visit, existing: Option<&Bill>, draft: BillDraft) -> Bill {
    let sections: Vec<BillSection> = draft
        .sections
        .into_iter()
        .enumerate()
        .map(|(index, section)| {
            let items: Vec<BillLineItem> = section
                .items
                .into_iter()
                .map(|item| BillLineItem {
                    id: Uuid::new_v4(),
                    amount: round2(item.rate * item.quantity),
                    description: item.description.trim().to_string(),
                    code: item.code,
                    rate: item.rate,
                    quantity: item.quantity,
                })
                .collect();
            let subtotal = round2(items.iter().map(|i| i.amount).sum());
            BillSection {
                id: Uuid::new_v4(),
                title: section.title.trim().to_string(),
                position: index as i32,
                items,
                subtotal,
            }
        })
        .collect();
    let total_amount = round2(sections.iter().map(|s| s.subtotal).sum());

    Bill {
        id: existing.map_or_else(Uuid::new_v4, |b| b.id),
        visit_id: visit.id,
        bill_no: existing.map_or_else(|| bill_number(visit), |b| b.bill_no.clone()),
        category: draft.category.or_else(|| existing.and_then(|b| b.category.clone())),
        bill_date: draft
            .bill_date
            .or_else(|| existing.map(|b| b.bill_date))
            .unwrap_or_else(|| Utc::now().date_naive()),
        sections,
        total_amount,
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockHospitalStore;
    use crate::models::{LineItemDraft, NewVisit, SectionDraft, VisitType};
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use test_case::test_case;

    type Writes = Arc<Mutex<Vec<(Uuid, BillingSelection)>>>;

    fn recording_store() -> (Arc<dyn HospitalStore>, Arc<AtomicUsize>, Writes) {
        let calls = Arc::new(AtomicUsize::new(0));
        let writes: Writes = Arc::new(Mutex::new(Vec::new()));
        let mut store = MockHospitalStore::new();
        let (c, w) = (calls.clone(), writes.clone());
        store.expect_update_billing_status().returning(move |id, selection| {
            c.fetch_add(1, Ordering::SeqCst);
            w.lock().unwrap().push((id, selection.clone()));
            Ok(())
        });
        (Arc::new(store), calls, writes)
    }

    fn paid(sub: &str) -> BillingSelection {
        BillingSelection::new(Some("Paid"), Some(sub))
    }

    #[test]
    fn status_change_clears_foreign_sub_status() {
        let mut selection = paid("Partial Payment");
        selection.select_status(Some("Rejected")).unwrap();
        assert_eq!(selection, BillingSelection::new(Some("Rejected"), None));
    }

    #[test]
    fn status_change_keeps_matching_sub_status() {
        let mut selection = paid("Partial Payment");
        selection.select_status(Some("Paid")).unwrap();
        assert_eq!(selection, paid("Partial Payment"));
    }

    #[test_case(None, Some("Under Query") ; "sub status without status")]
    #[test_case(Some("Paid"), Some("Under Query") ; "sub status of another status")]
    fn invalid_sub_status_is_rejected(status: Option<&str>, sub: Option<&str>) {
        let mut selection = BillingSelection::new(status, None);
        assert!(matches!(selection.select_sub_status(sub), Err(AppError::Validation(_))));
    }

    #[test]
    fn empty_status_clears_everything() {
        let mut selection = paid("Payment Received");
        selection.select_status(Some("")).unwrap();
        assert_eq!(selection, BillingSelection::default());
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(BillingSelection::default().select_status(Some("Lost")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_last_selection() {
        let (store, calls, writes) = recording_store();
        let sync = BillingStatusSync::new(store, Duration::from_millis(2000));
        let visit = Uuid::new_v4();
        sync.seed(visit, BillingSelection::default());

        sync.submit(visit, BillingSelection::new(Some("Paid"), None));
        tokio::time::sleep(Duration::from_millis(500)).await;
        sync.submit(visit, paid("Payment Received"));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(writes.lock().unwrap()[0], (visit, paid("Payment Received")));
        assert!(!sync.has_pending(visit));
    }

    #[tokio::test(start_paused = true)]
    async fn selection_equal_to_stored_is_not_written() {
        let (store, calls, _) = recording_store();
        let sync = BillingStatusSync::new(store, Duration::from_millis(2000));
        let visit = Uuid::new_v4();
        sync.seed(visit, paid("Payment Received"));

        assert_eq!(sync.submit(visit, paid("Payment Received")), SyncOutcome::Unchanged);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reverting_inside_window_cancels_write() {
        let (store, calls, _) = recording_store();
        let sync = BillingStatusSync::new(store, Duration::from_millis(2000));
        let visit = Uuid::new_v4();
        sync.seed(visit, paid("Payment Received"));

        assert_eq!(sync.submit(visit, paid("Partial Payment")), SyncOutcome::Scheduled);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sync.submit(visit, paid("Payment Received")), SyncOutcome::Unchanged);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sync.current(visit), Some(paid("Payment Received")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn revert_during_slow_write_is_written_after_it() {
        let writes: Writes = Arc::new(Mutex::new(Vec::new()));
        let mut store = MockHospitalStore::new();
        let w = writes.clone();
        store.expect_update_billing_status().returning(move |id, selection| {
            let first = w.lock().unwrap().is_empty();
            w.lock().unwrap().push((id, selection.clone()));
            if first {
                std::thread::sleep(std::time::Duration::from_millis(400));
            }
            Ok(())
        });
        let sync = BillingStatusSync::new(Arc::new(store), Duration::from_millis(50));
        let visit = Uuid::new_v4();
        sync.seed(visit, paid("Payment Received"));

        assert_eq!(sync.submit(visit, paid("Partial Payment")), SyncOutcome::Scheduled);
        tokio::time::sleep(Duration::from_millis(200)).await;
        // The first write is still running; going back must not be dropped.
        assert_eq!(sync.submit(visit, paid("Payment Received")), SyncOutcome::Scheduled);
        assert_eq!(sync.current(visit), Some(paid("Payment Received")));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(
            *writes.lock().unwrap(),
            vec![(visit, paid("Partial Payment")), (visit, paid("Payment Received"))]
        );
        assert_eq!(sync.current(visit), Some(paid("Payment Received")));
        assert!(!sync.has_pending(visit));
    }

    #[tokio::test(start_paused = true)]
    async fn resubmitting_a_written_selection_is_unchanged() {
        let (store, calls, _) = recording_store();
        let sync = BillingStatusSync::new(store, Duration::from_millis(2000));
        let visit = Uuid::new_v4();
        sync.seed(visit, BillingSelection::default());

        sync.submit(visit, paid("Partial Payment"));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(sync.submit(visit, paid("Partial Payment")), SyncOutcome::Unchanged);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_immediately_once() {
        let (store, calls, _) = recording_store();
        let sync = BillingStatusSync::new(store, Duration::from_millis(2000));
        let visit = Uuid::new_v4();

        sync.submit(visit, paid("Partial Payment"));
        assert!(sync.flush(visit).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The timer fires later but finds nothing left to do.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!sync.flush(visit).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn visits_debounce_independently() {
        let (store, calls, _) = recording_store();
        let sync = BillingStatusSync::new(store, Duration::from_millis(2000));

        sync.submit(Uuid::new_v4(), paid("Partial Payment"));
        sync.submit(Uuid::new_v4(), BillingSelection::new(Some("Pending"), None));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn visit() -> Visit {
        NewVisit {
            patient_id: Uuid::new_v4(),
            visit_type: VisitType::Ipd,
            visit_date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            admission_date: None,
            surgery_date: None,
            reason_for_visit: None,
            appointment_with: None,
            referee_id: None,
            hope_surgeon_id: None,
            hope_consultant_id: None,
            esic_surgeon_id: None,
        }
        .into_visit("IH24061501".into())
    }

    fn item(description: &str, rate: f64, quantity: f64) -> LineItemDraft {
        LineItemDraft {
            description: description.into(),
            code: None,
            rate,
            quantity,
        }
    }

    #[test]
    fn bill_totals_are_recomputed() {
        let draft = BillDraft {
            category: Some("ESIC".into()),
            bill_date: NaiveDate::from_ymd_opt(2024, 6, 20),
            sections: vec![
                SectionDraft {
                    title: "Room charges".into(),
                    items: vec![item("General ward", 1500.0, 3.0), item("Nursing", 333.333, 3.0)],
                },
                SectionDraft {
                    title: "Surgery".into(),
                    items: vec![item("Lap cholecystectomy", 25000.0, 1.0)],
                },
            ],
        };
        let visit = visit();
        let bill = build_bill(&visit, None, draft);

        assert_eq!(bill.bill_no, "BL-IH24061501");
        assert_eq!(bill.sections[0].items[1].amount, 1000.0);
        assert_eq!(bill.sections[0].subtotal, 5500.0);
        assert_eq!(bill.sections[1].position, 1);
        assert_eq!(bill.total_amount, 30500.0);
    }

    #[test]
    fn resaving_keeps_bill_identity() {
        let visit = visit();
        let first = build_bill(
            &visit,
            None,
            BillDraft {
                category: Some("CGHS".into()),
                bill_date: NaiveDate::from_ymd_opt(2024, 6, 20),
                sections: Vec::new(),
            },
        );
        let second = build_bill(
            &visit,
            Some(&first),
            BillDraft {
                category: None,
                bill_date: None,
                sections: Vec::new(),
            },
        );
        assert_eq!(second.id, first.id);
        assert_eq!(second.bill_no, first.bill_no);
        assert_eq!(second.category.as_deref(), Some("CGHS"));
        assert_eq!(second.bill_date, first.bill_date);
        assert_eq!(second.total_amount, 0.0);
    }
}
