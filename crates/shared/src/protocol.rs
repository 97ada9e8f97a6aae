use serde::{Deserialize, Serialize};

use crate::domain::{InvoiceKind, InvoiceLine, InvoiceLineId, InvoiceRow};

/// One row named for deletion, with the parent record it hangs off when the
/// row is a child (a line's invoice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeleteTarget {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl DeleteTarget {
    pub fn new(id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            parent_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub targets: Vec<DeleteTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceListQuery {
    pub kind: InvoiceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub invoice: InvoiceRow,
    pub lines: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLinePacks {
    pub id: InvoiceLineId,
    pub invoice_id: String,
    pub number_of_packs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLinesRequest {
    pub lines: Vec<UpdateLinePacks>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub updated: usize,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
