use std::{collections::HashSet, sync::Arc};

use shared::domain::{
    InvoiceKind, InvoiceLine, InvoiceLineId, InvoiceRow, InvoiceStatus, ItemId, LineType,
    RequisitionRow, RequisitionStatus,
};

use crate::{
    cache::{QueryCache, QueryKey},
    error::SourceError,
    grouping::{group_by_item, next_item, sort_groups, sort_lines, ItemGroup, NextItem, SortBy},
    mutation::{
        Eligibility, MutationCoordinator, MutationOutcome, RemoveSelected, UpdateSelected,
    },
    notify::{Notifier, Subject},
    selection::{RowsView, SelectionState},
    source::{DataSource, UpdateRows},
};

/// Service lines and lines holding the shipment's own kind of stock can be
/// removed from its line list. A stock line of the opposite direction cannot.
pub fn deletable_lines_of(kind: InvoiceKind) -> Eligibility<InvoiceLine> {
    let line_type = kind.stock_line_type();
    let noun = match line_type {
        LineType::StockIn => "received stock",
        LineType::StockOut => "issued stock",
        LineType::Service => "service",
    };
    Eligibility::new(
        format!("only {noun} and service lines can be deleted here"),
        move |line: &InvoiceLine| {
            let kind_of_line = line.line_type();
            kind_of_line == LineType::Service || kind_of_line == line_type
        },
    )
}

pub fn new_invoices_only() -> Eligibility<InvoiceRow> {
    Eligibility::new("only new shipments can be deleted", |invoice: &InvoiceRow| {
        invoice.status == InvoiceStatus::New
    })
}

pub fn draft_requisitions_only() -> Eligibility<RequisitionRow> {
    Eligibility::new(
        "only draft requisitions can be deleted",
        |requisition: &RequisitionRow| requisition.status == RequisitionStatus::Draft,
    )
}

/// Line editor for one inbound or outbound shipment.
pub struct ShipmentScreen<S: ?Sized> {
    header: InvoiceRow,
    coordinator: MutationCoordinator<InvoiceLine>,
    source: Arc<S>,
    eligibility: Eligibility<InvoiceLine>,
    selection: SelectionState,
    grouped: bool,
    sort: SortBy,
}

impl<S> ShipmentScreen<S>
where
    S: DataSource<InvoiceLine> + UpdateRows<InvoiceLine> + ?Sized,
{
    pub fn new(
        header: InvoiceRow,
        cache: Arc<QueryCache<InvoiceLine>>,
        source: Arc<S>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            eligibility: deletable_lines_of(header.kind),
            header,
            coordinator: MutationCoordinator::new(cache, notifier),
            source,
            selection: SelectionState::new(),
            grouped: false,
            sort: SortBy::default(),
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::InvoiceDetail {
            kind: self.header.kind,
            invoice_number: self.header.invoice_number,
        }
    }

    pub fn header(&self) -> &InvoiceRow {
        &self.header
    }

    /// Swaps in a reloaded header. The selection is kept when the shipment
    /// is the same one.
    pub fn set_header(&mut self, header: InvoiceRow) {
        if header.id != self.header.id {
            self.selection.clear();
        }
        self.eligibility = deletable_lines_of(header.kind);
        self.header = header;
    }

    pub fn is_disabled(&self) -> bool {
        self.header.lines_locked()
    }

    pub fn is_grouped(&self) -> bool {
        self.grouped
    }

    /// Switching between line and item rows invalidates the selection keys.
    pub fn set_grouped(&mut self, grouped: bool) {
        if grouped != self.grouped {
            self.selection.clear();
            self.grouped = grouped;
        }
    }

    pub fn sort(&self) -> SortBy {
        self.sort
    }

    pub fn set_sort(&mut self, sort: SortBy) {
        self.sort = sort;
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionState {
        &mut self.selection
    }

    /// Every line of the shipment in the current sort order.
    pub async fn lines(&self) -> Result<Vec<InvoiceLine>, SourceError> {
        let collection = self.coordinator.cache().ensure(&self.key()).await?;
        let mut lines = collection.rows().to_vec();
        sort_lines(&mut lines, self.sort);
        Ok(lines)
    }

    pub async fn items(&self) -> Result<Vec<ItemGroup<InvoiceLine>>, SourceError> {
        let collection = self.coordinator.cache().ensure(&self.key()).await?;
        Ok(self.group(collection.rows()))
    }

    pub async fn service_lines(&self) -> Result<Vec<InvoiceLine>, SourceError> {
        Ok(self
            .lines()
            .await?
            .into_iter()
            .filter(|line| line.line_type() == LineType::Service)
            .collect())
    }

    /// The first line of the item after `current`, for stepping through
    /// items in the line editor.
    pub async fn next_item(&self, current: &ItemId) -> Result<NextItem<InvoiceLine>, SourceError> {
        Ok(next_item(&self.items().await?, current))
    }

    pub async fn reload(&self) -> Result<(), SourceError> {
        self.coordinator.cache().invalidate(&self.key()).await?;
        Ok(())
    }

    /// Deletes the selected lines, or every line of the selected items when
    /// the screen is grouped.
    pub async fn delete_selected_lines(&mut self) -> MutationOutcome {
        let key = self.key();
        let cached = self.coordinator.cache().get(&key).await.unwrap_or_default();
        let mut lines = cached.rows().to_vec();
        sort_lines(&mut lines, self.sort);
        let groups = self.group(&lines);

        let view = if self.grouped {
            RowsView::Grouped(&groups)
        } else {
            RowsView::Flat(&lines)
        };
        let outcome = self
            .coordinator
            .remove_selected(
                RemoveSelected {
                    key,
                    view,
                    selection: &self.selection,
                    disabled: self.is_disabled(),
                    eligibility: &self.eligibility,
                    subject: Subject::Lines,
                },
                self.source.as_ref(),
            )
            .await;

        if matches!(outcome, MutationOutcome::Committed { .. }) {
            self.prune_selection().await;
        }
        outcome
    }

    /// Saves new pack counts for the given lines. Ids that are not on the
    /// shipment and service lines, which carry no packs, are skipped.
    pub async fn save_line_packs(&self, updates: &[(InvoiceLineId, f64)]) -> MutationOutcome {
        let key = self.key();
        let cached = self.coordinator.cache().get(&key).await.unwrap_or_default();
        let rows: Vec<InvoiceLine> = updates
            .iter()
            .filter_map(|(id, packs)| {
                cached
                    .iter()
                    .find(|line| &line.id == id && line.line_type() != LineType::Service)
                    .map(|line| InvoiceLine {
                        detail: line.detail.with_number_of_packs(*packs),
                        ..line.clone()
                    })
            })
            .collect();

        self.coordinator
            .update_rows(
                UpdateSelected {
                    key,
                    rows,
                    disabled: self.is_disabled(),
                    subject: Subject::Lines,
                },
                self.source.as_ref(),
            )
            .await
    }

    fn group(&self, lines: &[InvoiceLine]) -> Vec<ItemGroup<InvoiceLine>> {
        let mut groups = group_by_item(lines);
        if self.sort != SortBy::default() {
            sort_groups(&mut groups, self.sort);
        }
        groups
    }

    async fn prune_selection(&mut self) {
        let Some(collection) = self.coordinator.cache().get(&self.key()).await else {
            self.selection.clear();
            return;
        };
        let present: HashSet<&str> = if self.grouped {
            collection.iter().map(|line| line.item.id.as_str()).collect()
        } else {
            collection.iter().map(|line| line.id.as_str()).collect()
        };
        self.selection.retain_present(&present);
    }
}

/// Shipment list for one direction of stock movement.
pub struct InvoiceListScreen<S: ?Sized> {
    kind: InvoiceKind,
    coordinator: MutationCoordinator<InvoiceRow>,
    source: Arc<S>,
    eligibility: Eligibility<InvoiceRow>,
    selection: SelectionState,
}

impl<S> InvoiceListScreen<S>
where
    S: DataSource<InvoiceRow> + ?Sized,
{
    pub fn new(
        kind: InvoiceKind,
        cache: Arc<QueryCache<InvoiceRow>>,
        source: Arc<S>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            kind,
            coordinator: MutationCoordinator::new(cache, notifier),
            source,
            eligibility: new_invoices_only(),
            selection: SelectionState::new(),
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::InvoiceList(self.kind)
    }

    pub fn selection_mut(&mut self) -> &mut SelectionState {
        &mut self.selection
    }

    pub async fn rows(&self) -> Result<Vec<InvoiceRow>, SourceError> {
        Ok(self
            .coordinator
            .cache()
            .ensure(&self.key())
            .await?
            .rows()
            .to_vec())
    }

    pub async fn delete_selected(&mut self) -> MutationOutcome {
        let key = self.key();
        let cached = self.coordinator.cache().get(&key).await.unwrap_or_default();
        let outcome = self
            .coordinator
            .remove_selected(
                RemoveSelected {
                    key,
                    view: RowsView::Flat(cached.rows()),
                    selection: &self.selection,
                    disabled: false,
                    eligibility: &self.eligibility,
                    subject: Subject::Invoices,
                },
                self.source.as_ref(),
            )
            .await;
        if matches!(outcome, MutationOutcome::Committed { .. }) {
            self.selection.clear();
        }
        outcome
    }
}

pub struct RequisitionListScreen<S: ?Sized> {
    coordinator: MutationCoordinator<RequisitionRow>,
    source: Arc<S>,
    eligibility: Eligibility<RequisitionRow>,
    selection: SelectionState,
}

impl<S> RequisitionListScreen<S>
where
    S: DataSource<RequisitionRow> + ?Sized,
{
    pub fn new(
        cache: Arc<QueryCache<RequisitionRow>>,
        source: Arc<S>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            coordinator: MutationCoordinator::new(cache, notifier),
            source,
            eligibility: draft_requisitions_only(),
            selection: SelectionState::new(),
        }
    }

    pub fn selection_mut(&mut self) -> &mut SelectionState {
        &mut self.selection
    }

    pub async fn rows(&self) -> Result<Vec<RequisitionRow>, SourceError> {
        Ok(self
            .coordinator
            .cache()
            .ensure(&QueryKey::RequisitionList)
            .await?
            .rows()
            .to_vec())
    }

    pub async fn delete_selected(&mut self) -> MutationOutcome {
        let cached = self
            .coordinator
            .cache()
            .get(&QueryKey::RequisitionList)
            .await
            .unwrap_or_default();
        let outcome = self
            .coordinator
            .remove_selected(
                RemoveSelected {
                    key: QueryKey::RequisitionList,
                    view: RowsView::Flat(cached.rows()),
                    selection: &self.selection,
                    disabled: false,
                    eligibility: &self.eligibility,
                    subject: Subject::Requisitions,
                },
                self.source.as_ref(),
            )
            .await;
        if matches!(outcome, MutationOutcome::Committed { .. }) {
            self.selection.clear();
        }
        outcome
    }
}

#[cfg(test)]
#[path = "tests/screens_tests.rs"]
mod tests;
