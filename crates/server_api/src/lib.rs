use std::collections::HashSet;

use shared::{
    domain::{
        InvoiceId, InvoiceKind, InvoiceLine, InvoiceLineId, InvoiceRow, InvoiceStatus, LineType,
        RequisitionId, RequisitionRow, RequisitionStatus,
    },
    error::{ApiError, ErrorCode},
    protocol::{DeleteResponse, DeleteTarget, InvoiceDetail, UpdateLinePacks, UpdateResponse},
};
use storage::{BatchRejected, Storage};
use tracing::info;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn list_invoices(ctx: &ApiContext, kind: InvoiceKind) -> Result<Vec<InvoiceRow>, ApiError> {
    ctx.storage.list_invoices(kind).await.map_err(internal)
}

pub async fn invoice_detail(
    ctx: &ApiContext,
    kind: InvoiceKind,
    invoice_number: i64,
) -> Result<InvoiceDetail, ApiError> {
    let invoice = ctx
        .storage
        .invoice_by_number(kind, invoice_number)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::NotFound,
                format!("{kind} shipment {invoice_number} not found"),
            )
        })?;
    let lines = ctx
        .storage
        .lines_for_invoice(&invoice.id)
        .await
        .map_err(internal)?;
    Ok(InvoiceDetail { invoice, lines })
}

/// Deletes shipments as one batch. Every shipment must still be `New`; a
/// single ineligible target rejects the whole request.
pub async fn delete_invoices(
    ctx: &ApiContext,
    targets: &[DeleteTarget],
) -> Result<DeleteResponse, ApiError> {
    let ids = distinct_ids(targets)?;
    for id in &ids {
        let invoice = ctx
            .storage
            .invoice_by_id(&InvoiceId(id.clone()))
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("invoice {id} not found")))?;
        if invoice.status != InvoiceStatus::New {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!(
                    "cannot delete {} shipment {}: status is {}",
                    invoice.kind,
                    invoice.invoice_number,
                    invoice.status.as_str()
                ),
            ));
        }
    }

    let ids: Vec<InvoiceId> = ids.into_iter().map(InvoiceId).collect();
    let deleted = ctx.storage.delete_invoices(&ids).await.map_err(batch_error)?;
    info!(deleted, "api: deleted invoices");
    Ok(DeleteResponse { deleted })
}

pub async fn delete_invoice_lines(
    ctx: &ApiContext,
    targets: &[DeleteTarget],
) -> Result<DeleteResponse, ApiError> {
    let ids = distinct_ids(targets)?;
    for target in targets {
        let parent = target.parent_id.as_deref().ok_or_else(|| {
            ApiError::new(
                ErrorCode::Validation,
                format!("line {} is missing its invoice id", target.id),
            )
        })?;
        let line = editable_line(ctx, &InvoiceLineId(target.id.clone()), parent).await?;
        let invoice = ctx
            .storage
            .invoice_by_id(&line.invoice_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::new(
                    ErrorCode::NotFound,
                    format!("invoice {} not found", line.invoice_id),
                )
            })?;
        let line_type = line.line_type();
        if line_type != LineType::Service && line_type != invoice.kind.stock_line_type() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!(
                    "line {} is a {} line, not part of a {} shipment",
                    line.id,
                    line_type.as_str(),
                    invoice.kind
                ),
            ));
        }
    }

    let ids: Vec<InvoiceLineId> = ids.into_iter().map(InvoiceLineId).collect();
    let deleted = ctx.storage.delete_lines(&ids).await.map_err(batch_error)?;
    info!(deleted, "api: deleted invoice lines");
    Ok(DeleteResponse { deleted })
}

pub async fn update_invoice_lines(
    ctx: &ApiContext,
    updates: &[UpdateLinePacks],
) -> Result<UpdateResponse, ApiError> {
    if updates.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "no lines to update"));
    }

    let mut changes = Vec::with_capacity(updates.len());
    for update in updates {
        if !update.number_of_packs.is_finite() || update.number_of_packs < 0.0 {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!(
                    "line {} has an invalid number of packs {}",
                    update.id, update.number_of_packs
                ),
            ));
        }
        let line = editable_line(ctx, &update.id, &update.invoice_id).await?;
        if line.line_type() == LineType::Service {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("service line {} carries no packs", line.id),
            ));
        }
        changes.push((update.id.clone(), update.number_of_packs));
    }

    let updated = ctx
        .storage
        .update_line_packs(&changes)
        .await
        .map_err(internal)?;
    Ok(UpdateResponse { updated })
}

pub async fn list_requisitions(ctx: &ApiContext) -> Result<Vec<RequisitionRow>, ApiError> {
    ctx.storage.list_requisitions().await.map_err(internal)
}

pub async fn delete_requisitions(
    ctx: &ApiContext,
    targets: &[DeleteTarget],
) -> Result<DeleteResponse, ApiError> {
    let ids = distinct_ids(targets)?;
    for id in &ids {
        let requisition = ctx
            .storage
            .requisition_by_id(&RequisitionId(id.clone()))
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::new(ErrorCode::NotFound, format!("requisition {id} not found"))
            })?;
        if requisition.status != RequisitionStatus::Draft {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!(
                    "cannot delete requisition {}: status is {}",
                    requisition.requisition_number,
                    requisition.status.as_str()
                ),
            ));
        }
    }

    let ids: Vec<RequisitionId> = ids.into_iter().map(RequisitionId).collect();
    let deleted = ctx
        .storage
        .delete_requisitions(&ids)
        .await
        .map_err(batch_error)?;
    info!(deleted, "api: deleted requisitions");
    Ok(DeleteResponse { deleted })
}

/// Loads a line and checks that it belongs to `invoice_id` and that the
/// invoice still accepts line edits.
async fn editable_line(
    ctx: &ApiContext,
    line_id: &InvoiceLineId,
    invoice_id: &str,
) -> Result<InvoiceLine, ApiError> {
    let line = ctx
        .storage
        .line_by_id(line_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("line {line_id} not found")))?;
    if line.invoice_id.as_str() != invoice_id {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("line {line_id} does not belong to invoice {invoice_id}"),
        ));
    }

    let invoice = ctx
        .storage
        .invoice_by_id(&line.invoice_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("invoice {invoice_id} not found")))?;
    if invoice.lines_locked() {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            format!(
                "{} shipment {} can no longer be edited",
                invoice.kind, invoice.invoice_number
            ),
        ));
    }
    Ok(line)
}

fn distinct_ids(targets: &[DeleteTarget]) -> Result<Vec<String>, ApiError> {
    if targets.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "nothing to delete"));
    }
    let mut seen = HashSet::new();
    Ok(targets
        .iter()
        .filter(|target| seen.insert(target.id.as_str()))
        .map(|target| target.id.clone())
        .collect())
}

/// Maps a rejection raised inside a delete transaction to the code the
/// up-front checks would have produced.
fn batch_error(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<BatchRejected>() {
        Some(rejected @ BatchRejected::Missing { .. }) => {
            ApiError::new(ErrorCode::NotFound, rejected.to_string())
        }
        Some(rejected @ BatchRejected::Locked { entity, .. }) => {
            let code = if *entity == "invoice line" {
                ErrorCode::Forbidden
            } else {
                ErrorCode::Validation
            };
            ApiError::new(code, rejected.to_string())
        }
        None => internal(err),
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{ItemId, ItemRef, LineDetail, StockLineId};

    async fn setup() -> ApiContext {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        ApiContext { storage }
    }

    fn item(id: &str) -> ItemRef {
        ItemRef {
            id: ItemId::from(id),
            code: id.to_string(),
            name: format!("Item {id}"),
        }
    }

    fn stock_in() -> LineDetail {
        LineDetail::StockIn {
            batch: None,
            expiry_date: None,
            pack_size: 1,
            number_of_packs: 1.0,
            cost_price_per_pack: 1.0,
        }
    }

    fn target(line: &InvoiceLine) -> DeleteTarget {
        DeleteTarget::new(line.id.0.clone(), Some(line.invoice_id.0.clone()))
    }

    #[test]
    fn rejections_inside_the_delete_transaction_keep_their_codes() {
        let missing = batch_error(
            BatchRejected::Missing {
                entity: "requisition",
                id: "r-9".into(),
            }
            .into(),
        );
        assert_eq!(missing.code, ErrorCode::NotFound);
        assert_eq!(missing.message, "requisition r-9 does not exist");

        let locked = batch_error(
            BatchRejected::Locked {
                entity: "invoice",
                id: "i-1".into(),
            }
            .into(),
        );
        assert_eq!(locked.code, ErrorCode::Validation);

        let held = batch_error(
            BatchRejected::Locked {
                entity: "invoice line",
                id: "l-1".into(),
            }
            .into(),
        );
        assert_eq!(held.code, ErrorCode::Forbidden);

        let other = batch_error(anyhow::anyhow!("disk full"));
        assert_eq!(other.code, ErrorCode::Internal);
    }

    #[tokio::test]
    async fn invoice_detail_reports_missing_shipment() {
        let ctx = setup().await;
        let err = invoice_detail(&ctx, InvoiceKind::Inbound, 42)
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn one_non_new_invoice_blocks_the_batch() {
        let ctx = setup().await;
        let fresh = ctx
            .storage
            .create_invoice(InvoiceKind::Outbound, "Clinic")
            .await
            .expect("fresh");
        let picked = ctx
            .storage
            .create_invoice(InvoiceKind::Outbound, "Clinic")
            .await
            .expect("picked");
        ctx.storage
            .set_invoice_status(&picked.id, InvoiceStatus::Picked)
            .await
            .expect("status");

        let err = delete_invoices(
            &ctx,
            &[
                DeleteTarget::new(fresh.id.0.clone(), None),
                DeleteTarget::new(picked.id.0.clone(), None),
            ],
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(
            ctx.storage
                .list_invoices(InvoiceKind::Outbound)
                .await
                .expect("list")
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn deletes_lines_of_an_editable_inbound_shipment() {
        let ctx = setup().await;
        let invoice = ctx
            .storage
            .create_invoice(InvoiceKind::Inbound, "Central Store")
            .await
            .expect("invoice");
        let first = ctx
            .storage
            .insert_line(&invoice.id, &item("a"), &stock_in())
            .await
            .expect("first");
        let second = ctx
            .storage
            .insert_line(&invoice.id, &item("b"), &stock_in())
            .await
            .expect("second");

        let response = delete_invoice_lines(&ctx, &[target(&first), target(&second)])
            .await
            .expect("delete");
        assert_eq!(response.deleted, 2);
    }

    #[tokio::test]
    async fn verified_inbound_lines_cannot_be_deleted() {
        let ctx = setup().await;
        let invoice = ctx
            .storage
            .create_invoice(InvoiceKind::Inbound, "Central Store")
            .await
            .expect("invoice");
        let line = ctx
            .storage
            .insert_line(&invoice.id, &item("a"), &stock_in())
            .await
            .expect("line");
        ctx.storage
            .set_invoice_status(&invoice.id, InvoiceStatus::Verified)
            .await
            .expect("status");

        let err = delete_invoice_lines(&ctx, &[target(&line)])
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn line_must_belong_to_named_invoice() {
        let ctx = setup().await;
        let invoice = ctx
            .storage
            .create_invoice(InvoiceKind::Inbound, "Central Store")
            .await
            .expect("invoice");
        let line = ctx
            .storage
            .insert_line(&invoice.id, &item("a"), &stock_in())
            .await
            .expect("line");

        let err = delete_invoice_lines(
            &ctx,
            &[DeleteTarget::new(line.id.0.clone(), Some("other".into()))],
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn stock_out_line_is_rejected_on_inbound_shipment() {
        let ctx = setup().await;
        let invoice = ctx
            .storage
            .create_invoice(InvoiceKind::Inbound, "Central Store")
            .await
            .expect("invoice");
        let line = ctx
            .storage
            .insert_line(
                &invoice.id,
                &item("a"),
                &LineDetail::StockOut {
                    stock_line_id: StockLineId::from("s"),
                    batch: None,
                    expiry_date: None,
                    pack_size: 1,
                    number_of_packs: 1.0,
                    sell_price_per_pack: 1.0,
                },
            )
            .await
            .expect("line");

        let err = delete_invoice_lines(&ctx, &[target(&line)])
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn updates_pack_counts_and_rejects_negative_values() {
        let ctx = setup().await;
        let invoice = ctx
            .storage
            .create_invoice(InvoiceKind::Inbound, "Central Store")
            .await
            .expect("invoice");
        let line = ctx
            .storage
            .insert_line(&invoice.id, &item("a"), &stock_in())
            .await
            .expect("line");

        let err = update_invoice_lines(
            &ctx,
            &[UpdateLinePacks {
                id: line.id.clone(),
                invoice_id: invoice.id.0.clone(),
                number_of_packs: -1.0,
            }],
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);

        let response = update_invoice_lines(
            &ctx,
            &[UpdateLinePacks {
                id: line.id.clone(),
                invoice_id: invoice.id.0.clone(),
                number_of_packs: 12.0,
            }],
        )
        .await
        .expect("update");
        assert_eq!(response.updated, 1);
    }

    #[tokio::test]
    async fn only_draft_requisitions_are_deleted() {
        let ctx = setup().await;
        let draft = ctx.storage.create_requisition("Ward A").await.expect("draft");
        let sent = ctx.storage.create_requisition("Ward B").await.expect("sent");
        ctx.storage
            .set_requisition_status(&sent.id, RequisitionStatus::Sent)
            .await
            .expect("status");

        let err = delete_requisitions(
            &ctx,
            &[
                DeleteTarget::new(draft.id.0.clone(), None),
                DeleteTarget::new(sent.id.0.clone(), None),
            ],
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);

        let response = delete_requisitions(&ctx, &[DeleteTarget::new(draft.id.0.clone(), None)])
            .await
            .expect("delete");
        assert_eq!(response.deleted, 1);
    }

    #[tokio::test]
    async fn empty_batches_are_rejected() {
        let ctx = setup().await;
        let err = delete_invoice_lines(&ctx, &[]).await.expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }
}
