//! Client-side state for the stockroom screens: a keyed query cache, row
//! selection, and an optimistic mutation coordinator that removes or edits
//! rows before the server confirms and reconciles afterwards.

pub mod cache;
pub mod error;
pub mod grouping;
pub mod http;
pub mod mutation;
pub mod notify;
pub mod screens;
pub mod selection;
pub mod source;

pub use cache::{CacheChange, CacheEvent, Collection, QueryCache, QueryKey, QueryScope, Row};
pub use error::{MutationError, SourceError};
pub use grouping::{
    group_by_item, next_item, sort_groups, sort_lines, ItemGroup, LineSortKey, NextItem, SortBy,
};
pub use http::HttpDataSource;
pub use mutation::{
    Eligibility, MutationCoordinator, MutationOutcome, MutationState, OptimisticMutation,
    RemoveSelected, UpdateSelected,
};
pub use notify::{BroadcastNotifier, Notice, Notification, Notifier, Severity, Subject};
pub use screens::{InvoiceListScreen, RequisitionListScreen, ShipmentScreen};
pub use selection::{selected_rows, RowState, RowsView, SelectionState};
pub use source::{DataSource, RemoveRows, UpdateRows};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
