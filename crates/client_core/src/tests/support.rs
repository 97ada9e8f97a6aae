use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use shared::{
    domain::{
        InvoiceId, InvoiceKind, InvoiceLine, InvoiceLineId, InvoiceRow, InvoiceStatus, ItemId,
        ItemRef, LineDetail, RequisitionId, RequisitionRow, RequisitionStatus, StockLineId,
    },
    protocol::DeleteTarget,
};
use tokio::sync::{oneshot, Mutex};

use crate::{
    cache::{QueryKey, Row},
    error::SourceError,
    source::{DataSource, UpdateRows},
};

pub(crate) fn item(id: &str, name: &str) -> ItemRef {
    ItemRef {
        id: ItemId::from(id),
        code: id.to_uppercase(),
        name: name.to_string(),
    }
}

pub(crate) fn stock_in(id: &str, invoice: &str, item: &ItemRef, packs: f64) -> InvoiceLine {
    InvoiceLine {
        id: InvoiceLineId::from(id),
        invoice_id: InvoiceId::from(invoice),
        item: item.clone(),
        detail: LineDetail::StockIn {
            batch: Some(format!("B-{id}")),
            expiry_date: NaiveDate::from_ymd_opt(2027, 1, 1),
            pack_size: 10,
            number_of_packs: packs,
            cost_price_per_pack: 2.5,
        },
    }
}

pub(crate) fn stock_out(id: &str, invoice: &str, item: &ItemRef, packs: f64) -> InvoiceLine {
    InvoiceLine {
        id: InvoiceLineId::from(id),
        invoice_id: InvoiceId::from(invoice),
        item: item.clone(),
        detail: LineDetail::StockOut {
            stock_line_id: StockLineId::from(format!("stock-{id}").as_str()),
            batch: None,
            expiry_date: None,
            pack_size: 1,
            number_of_packs: packs,
            sell_price_per_pack: 4.0,
        },
    }
}

pub(crate) fn service(id: &str, invoice: &str) -> InvoiceLine {
    InvoiceLine {
        id: InvoiceLineId::from(id),
        invoice_id: InvoiceId::from(invoice),
        item: item("svc", "Service charge"),
        detail: LineDetail::Service {
            total_before_tax: 15.0,
            note: None,
        },
    }
}

pub(crate) fn invoice(id: &str, kind: InvoiceKind, number: i64, status: InvoiceStatus) -> InvoiceRow {
    InvoiceRow {
        id: InvoiceId::from(id),
        invoice_number: number,
        kind,
        status,
        other_party_name: "Central Store".to_string(),
        on_hold: false,
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    }
}

pub(crate) fn requisition(id: &str, number: i64, status: RequisitionStatus) -> RequisitionRow {
    RequisitionRow {
        id: RequisitionId::from(id),
        requisition_number: number,
        status,
        other_party_name: "Ward A".to_string(),
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    }
}

pub(crate) fn ids<R: Row>(rows: &[R]) -> Vec<&str> {
    rows.iter().map(Row::id).collect()
}

/// Test-side ends of a gate: `started` fires once the call reaches the
/// source, and the call waits until `release` is sent.
pub(crate) struct Gate {
    pub started: oneshot::Receiver<()>,
    pub release: oneshot::Sender<()>,
}

struct GateInner {
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

impl GateInner {
    fn pair() -> (Self, Gate) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        (
            Self {
                started: started_tx,
                release: release_rx,
            },
            Gate {
                started: started_rx,
                release: release_tx,
            },
        )
    }

    async fn pass(self) {
        let _ = self.started.send(());
        let _ = self.release.await;
    }
}

/// In-memory source that behaves like the server: removals and updates
/// change what later fetches return.
pub(crate) struct FakeSource<R> {
    rows: Mutex<Vec<R>>,
    fail_writes: AtomicBool,
    fail_fetches: AtomicBool,
    fetches: AtomicUsize,
    removals: Mutex<Vec<Vec<DeleteTarget>>>,
    updates: Mutex<Vec<Vec<R>>>,
    remove_gates: Mutex<VecDeque<GateInner>>,
    fetch_gates: Mutex<VecDeque<GateInner>>,
}

impl<R: Row> FakeSource<R> {
    pub(crate) fn new(rows: Vec<R>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            fail_writes: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            removals: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            remove_gates: Mutex::new(VecDeque::new()),
            fetch_gates: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) async fn rows(&self) -> Vec<R> {
        self.rows.lock().await.clone()
    }

    pub(crate) async fn set_rows(&self, rows: Vec<R>) {
        *self.rows.lock().await = rows;
    }

    pub(crate) async fn removals(&self) -> Vec<Vec<DeleteTarget>> {
        self.removals.lock().await.clone()
    }

    pub(crate) async fn updates(&self) -> Vec<Vec<R>> {
        self.updates.lock().await.clone()
    }

    /// Holds the next ungated removal. Gates queue up and are handed out
    /// to calls in arrival order.
    pub(crate) async fn gate_next_remove(&self) -> Gate {
        let (inner, gate) = GateInner::pair();
        self.remove_gates.lock().await.push_back(inner);
        gate
    }

    pub(crate) async fn gate_next_fetch(&self) -> Gate {
        let (inner, gate) = GateInner::pair();
        self.fetch_gates.lock().await.push_back(inner);
        gate
    }
}

#[async_trait]
impl<R: Row> DataSource<R> for FakeSource<R> {
    async fn fetch(&self, _key: &QueryKey) -> Result<Vec<R>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Snapshot before waiting so a gated fetch returns pre-write rows.
        let rows = self.rows.lock().await.clone();
        let gate = self.fetch_gates.lock().await.pop_front();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("fetch disabled".to_string()));
        }
        Ok(rows)
    }

    async fn remove(&self, targets: &[DeleteTarget]) -> Result<usize, SourceError> {
        self.removals.lock().await.push(targets.to_vec());
        let gate = self.remove_gates.lock().await.pop_front();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("remove rejected".to_string()));
        }
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| !targets.iter().any(|target| target.id == row.id()));
        Ok(before - rows.len())
    }
}

#[async_trait]
impl<R: Row> UpdateRows<R> for FakeSource<R> {
    async fn update_rows(&self, updated: &[R]) -> Result<usize, SourceError> {
        self.updates.lock().await.push(updated.to_vec());
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("update rejected".to_string()));
        }
        let mut rows = self.rows.lock().await;
        let mut saved = 0;
        for row in rows.iter_mut() {
            if let Some(replacement) = updated.iter().find(|candidate| candidate.id() == row.id()) {
                *row = replacement.clone();
                saved += 1;
            }
        }
        Ok(saved)
    }
}

/// Records every notification for later assertions.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    seen: std::sync::Mutex<Vec<crate::notify::Notification>>,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn seen(&self) -> Vec<crate::notify::Notification> {
        self.seen.lock().expect("notifier lock").clone()
    }
}

impl crate::notify::Notifier for RecordingNotifier {
    fn notify(&self, notification: crate::notify::Notification) {
        self.seen.lock().expect("notifier lock").push(notification);
    }
}
