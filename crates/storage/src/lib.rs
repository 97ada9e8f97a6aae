use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::debug;

use shared::domain::{
    InvoiceId, InvoiceKind, InvoiceLine, InvoiceLineId, InvoiceRow, InvoiceStatus, ItemId,
    ItemRef, LineDetail, LineType, RequisitionId, RequisitionRow, RequisitionStatus, StockLineId,
};

const INVOICE_COLUMNS: &str =
    "id, invoice_number, kind, status, other_party_name, on_hold, created_at";
const LINE_COLUMNS: &str = "id, invoice_id, line_type, item_id, item_code, item_name, batch, \
     expiry_date, pack_size, number_of_packs, price_per_pack, stock_line_id, total_before_tax, note";
const REQUISITION_COLUMNS: &str =
    "id, requisition_number, status, other_party_name, created_at";

/// Why a batch delete was refused inside its transaction. Nothing in the
/// batch is deleted when this is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchRejected {
    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: String },
    #[error("{entity} {id} can no longer be deleted")]
    Locked { entity: &'static str, id: String },
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_invoice(
        &self,
        kind: InvoiceKind,
        other_party_name: &str,
    ) -> Result<InvoiceRow> {
        let id = InvoiceId::new();
        sqlx::query(
            r#"
            INSERT INTO invoices (id, invoice_number, kind, status, other_party_name, on_hold, created_at)
            SELECT ?, COALESCE(MAX(invoice_number), 0) + 1, ?, ?, ?, 0, ?
            FROM invoices WHERE kind = ?
            "#,
        )
        .bind(id.as_str())
        .bind(kind.as_str())
        .bind(InvoiceStatus::New.as_str())
        .bind(other_party_name)
        .bind(Utc::now())
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        self.invoice_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("invoice {id} missing after insert"))
    }

    pub async fn invoice_by_id(&self, id: &InvoiceId) -> Result<Option<InvoiceRow>> {
        let row = sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    pub async fn invoice_by_number(
        &self,
        kind: InvoiceKind,
        invoice_number: i64,
    ) -> Result<Option<InvoiceRow>> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE kind = ? AND invoice_number = ?"
        ))
        .bind(kind.as_str())
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    pub async fn list_invoices(&self, kind: InvoiceKind) -> Result<Vec<InvoiceRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE kind = ? ORDER BY invoice_number"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    pub async fn set_invoice_status(&self, id: &InvoiceId, status: InvoiceStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE invoices SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_invoice_on_hold(&self, id: &InvoiceId, on_hold: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE invoices SET on_hold = ? WHERE id = ?")
            .bind(on_hold)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes every listed invoice and its lines in one transaction. Only
    /// `New` invoices qualify; any unknown or advanced invoice fails the
    /// batch with [`BatchRejected`] and nothing is deleted.
    pub async fn delete_invoices(&self, ids: &[InvoiceId]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM invoices WHERE id = ? AND status = ?")
                .bind(id.as_str())
                .bind(InvoiceStatus::New.as_str())
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() != 1 {
                let exists: Option<String> =
                    sqlx::query_scalar("SELECT id FROM invoices WHERE id = ?")
                        .bind(id.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(rejection("invoice", id.as_str(), exists.is_some()).into());
            }
            sqlx::query("DELETE FROM invoice_lines WHERE invoice_id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(count = ids.len(), "storage: deleted invoices");
        Ok(ids.len())
    }

    pub async fn insert_line(
        &self,
        invoice_id: &InvoiceId,
        item: &ItemRef,
        detail: &LineDetail,
    ) -> Result<InvoiceLine> {
        let line = InvoiceLine {
            id: InvoiceLineId::new(),
            invoice_id: invoice_id.clone(),
            item: item.clone(),
            detail: detail.clone(),
        };
        let columns = LineColumns::from_detail(&line.detail);

        sqlx::query(&format!(
            "INSERT INTO invoice_lines ({LINE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(line.id.as_str())
        .bind(line.invoice_id.as_str())
        .bind(line.line_type().as_str())
        .bind(line.item.id.as_str())
        .bind(&line.item.code)
        .bind(&line.item.name)
        .bind(columns.batch)
        .bind(columns.expiry_date)
        .bind(columns.pack_size)
        .bind(columns.number_of_packs)
        .bind(columns.price_per_pack)
        .bind(columns.stock_line_id)
        .bind(columns.total_before_tax)
        .bind(columns.note)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert line for invoice {invoice_id}"))?;

        Ok(line)
    }

    pub async fn line_by_id(&self, id: &InvoiceLineId) -> Result<Option<InvoiceLine>> {
        let row = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM invoice_lines WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(line_from_row).transpose()
    }

    pub async fn lines_for_invoice(&self, invoice_id: &InvoiceId) -> Result<Vec<InvoiceLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM invoice_lines WHERE invoice_id = ? ORDER BY rowid"
        ))
        .bind(invoice_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(line_from_row).collect()
    }

    /// Deletes the listed lines in one transaction. The owning invoice is
    /// re-read inside the transaction; a missing line or a locked invoice
    /// fails the batch with [`BatchRejected`].
    pub async fn delete_lines(&self, ids: &[InvoiceLineId]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let owner = sqlx::query(
                "SELECT i.id, i.invoice_number, i.kind, i.status, i.other_party_name, \
                 i.on_hold, i.created_at \
                 FROM invoices i JOIN invoice_lines l ON l.invoice_id = i.id WHERE l.id = ?",
            )
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            let Some(owner) = owner.as_ref().map(invoice_from_row).transpose()? else {
                return Err(rejection("invoice line", id.as_str(), false).into());
            };
            if owner.lines_locked() {
                return Err(rejection("invoice line", id.as_str(), true).into());
            }
            sqlx::query("DELETE FROM invoice_lines WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(count = ids.len(), "storage: deleted invoice lines");
        Ok(ids.len())
    }

    pub async fn update_line_packs(&self, updates: &[(InvoiceLineId, f64)]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for (id, packs) in updates {
            let result = sqlx::query(
                "UPDATE invoice_lines SET number_of_packs = ? \
                 WHERE id = ? AND line_type IN ('stock_in', 'stock_out')",
            )
            .bind(packs)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() != 1 {
                bail!("invoice line {id} does not exist or carries no packs");
            }
        }
        tx.commit().await?;
        Ok(updates.len())
    }

    pub async fn create_requisition(&self, other_party_name: &str) -> Result<RequisitionRow> {
        let id = RequisitionId::new();
        sqlx::query(
            r#"
            INSERT INTO requisitions (id, requisition_number, status, other_party_name, created_at)
            SELECT ?, COALESCE(MAX(requisition_number), 0) + 1, ?, ?, ?
            FROM requisitions
            "#,
        )
        .bind(id.as_str())
        .bind(RequisitionStatus::Draft.as_str())
        .bind(other_party_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.requisition_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("requisition {id} missing after insert"))
    }

    pub async fn requisition_by_id(&self, id: &RequisitionId) -> Result<Option<RequisitionRow>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUISITION_COLUMNS} FROM requisitions WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(requisition_from_row).transpose()
    }

    pub async fn list_requisitions(&self) -> Result<Vec<RequisitionRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUISITION_COLUMNS} FROM requisitions ORDER BY requisition_number"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(requisition_from_row).collect()
    }

    pub async fn set_requisition_status(
        &self,
        id: &RequisitionId,
        status: RequisitionStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE requisitions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes draft requisitions in one transaction; anything else fails the
    /// batch with [`BatchRejected`].
    pub async fn delete_requisitions(&self, ids: &[RequisitionId]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM requisitions WHERE id = ? AND status = ?")
                .bind(id.as_str())
                .bind(RequisitionStatus::Draft.as_str())
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() != 1 {
                let exists: Option<String> =
                    sqlx::query_scalar("SELECT id FROM requisitions WHERE id = ?")
                        .bind(id.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(rejection("requisition", id.as_str(), exists.is_some()).into());
            }
        }
        tx.commit().await?;
        Ok(ids.len())
    }
}

/// Flat column values for one line, with the columns a line type does not
/// use left as NULL.
#[derive(Default)]
struct LineColumns {
    batch: Option<String>,
    expiry_date: Option<NaiveDate>,
    pack_size: Option<i64>,
    number_of_packs: Option<f64>,
    price_per_pack: Option<f64>,
    stock_line_id: Option<String>,
    total_before_tax: Option<f64>,
    note: Option<String>,
}

impl LineColumns {
    fn from_detail(detail: &LineDetail) -> Self {
        match detail {
            LineDetail::StockIn {
                batch,
                expiry_date,
                pack_size,
                number_of_packs,
                cost_price_per_pack,
            } => Self {
                batch: batch.clone(),
                expiry_date: *expiry_date,
                pack_size: Some(i64::from(*pack_size)),
                number_of_packs: Some(*number_of_packs),
                price_per_pack: Some(*cost_price_per_pack),
                ..Self::default()
            },
            LineDetail::StockOut {
                stock_line_id,
                batch,
                expiry_date,
                pack_size,
                number_of_packs,
                sell_price_per_pack,
            } => Self {
                batch: batch.clone(),
                expiry_date: *expiry_date,
                pack_size: Some(i64::from(*pack_size)),
                number_of_packs: Some(*number_of_packs),
                price_per_pack: Some(*sell_price_per_pack),
                stock_line_id: Some(stock_line_id.0.clone()),
                ..Self::default()
            },
            LineDetail::Service {
                total_before_tax,
                note,
            } => Self {
                total_before_tax: Some(*total_before_tax),
                note: note.clone(),
                ..Self::default()
            },
        }
    }
}

fn rejection(entity: &'static str, id: &str, exists: bool) -> BatchRejected {
    let id = id.to_string();
    if exists {
        BatchRejected::Locked { entity, id }
    } else {
        BatchRejected::Missing { entity, id }
    }
}

fn invoice_from_row(row: &SqliteRow) -> Result<InvoiceRow> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(InvoiceRow {
        id: InvoiceId(row.try_get("id")?),
        invoice_number: row.try_get("invoice_number")?,
        kind: InvoiceKind::parse(&kind).ok_or_else(|| anyhow!("unknown invoice kind '{kind}'"))?,
        status: InvoiceStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown invoice status '{status}'"))?,
        other_party_name: row.try_get("other_party_name")?,
        on_hold: row.try_get("on_hold")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<InvoiceLine> {
    let id: String = row.try_get("id")?;
    let line_type: String = row.try_get("line_type")?;
    let line_type = LineType::parse(&line_type)
        .ok_or_else(|| anyhow!("unknown line type '{line_type}' on line {id}"))?;

    let pack_size = || -> Result<u32> {
        let raw: Option<i64> = row.try_get("pack_size")?;
        let raw = raw.ok_or_else(|| anyhow!("line {id} is missing pack_size"))?;
        u32::try_from(raw).with_context(|| format!("line {id} has invalid pack_size {raw}"))
    };
    let required_f64 = |column: &str| -> Result<f64> {
        let raw: Option<f64> = row.try_get(column)?;
        raw.ok_or_else(|| anyhow!("line {id} is missing {column}"))
    };

    let detail = match line_type {
        LineType::StockIn => LineDetail::StockIn {
            batch: row.try_get("batch")?,
            expiry_date: row.try_get("expiry_date")?,
            pack_size: pack_size()?,
            number_of_packs: required_f64("number_of_packs")?,
            cost_price_per_pack: required_f64("price_per_pack")?,
        },
        LineType::StockOut => {
            let stock_line_id: Option<String> = row.try_get("stock_line_id")?;
            LineDetail::StockOut {
                stock_line_id: StockLineId(
                    stock_line_id.ok_or_else(|| anyhow!("line {id} is missing stock_line_id"))?,
                ),
                batch: row.try_get("batch")?,
                expiry_date: row.try_get("expiry_date")?,
                pack_size: pack_size()?,
                number_of_packs: required_f64("number_of_packs")?,
                sell_price_per_pack: required_f64("price_per_pack")?,
            }
        }
        LineType::Service => LineDetail::Service {
            total_before_tax: required_f64("total_before_tax")?,
            note: row.try_get("note")?,
        },
    };

    Ok(InvoiceLine {
        id: InvoiceLineId(id.clone()),
        invoice_id: InvoiceId(row.try_get("invoice_id")?),
        item: ItemRef {
            id: ItemId(row.try_get("item_id")?),
            code: row.try_get("item_code")?,
            name: row.try_get("item_name")?,
        },
        detail,
    })
}

fn requisition_from_row(row: &SqliteRow) -> Result<RequisitionRow> {
    let status: String = row.try_get("status")?;
    Ok(RequisitionRow {
        id: RequisitionId(row.try_get("id")?),
        requisition_number: row.try_get("requisition_number")?,
        status: RequisitionStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown requisition status '{status}'"))?,
        other_party_name: row.try_get("other_party_name")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
