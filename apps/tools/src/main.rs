use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use shared::domain::{
    InvoiceKind, InvoiceRow, InvoiceStatus, ItemId, ItemRef, LineDetail, RequisitionId,
    RequisitionStatus, StockLineId,
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://stockroom.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateInvoice {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        other_party_name: String,
    },
    AddLine {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
        #[arg(long, value_enum, default_value_t = LineArg::Stock)]
        line: LineArg,
        #[arg(long)]
        item_code: String,
        #[arg(long)]
        item_name: String,
        #[arg(long)]
        batch: Option<String>,
        #[arg(long)]
        expiry_date: Option<NaiveDate>,
        #[arg(long, default_value_t = 1)]
        pack_size: u32,
        #[arg(long, default_value_t = 1.0)]
        packs: f64,
        /// Cost or sell price per pack; the service total for service lines.
        #[arg(long, default_value_t = 0.0)]
        price: f64,
        #[arg(long)]
        note: Option<String>,
    },
    SetInvoiceStatus {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
        #[arg(value_parser = parse_invoice_status)]
        status: InvoiceStatus,
    },
    SetOnHold {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
        #[arg(action = clap::ArgAction::Set)]
        on_hold: bool,
    },
    CreateRequisition {
        other_party_name: String,
    },
    SetRequisitionStatus {
        requisition_id: String,
        #[arg(value_parser = parse_requisition_status)]
        status: RequisitionStatus,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LineArg {
    /// Stock received on inbound shipments, issued on outbound ones.
    Stock,
    Service,
}

fn parse_kind(raw: &str) -> Result<InvoiceKind, String> {
    InvoiceKind::parse(raw).ok_or_else(|| format!("unknown invoice kind '{raw}'"))
}

fn parse_invoice_status(raw: &str) -> Result<InvoiceStatus, String> {
    InvoiceStatus::parse(raw).ok_or_else(|| format!("unknown invoice status '{raw}'"))
}

fn parse_requisition_status(raw: &str) -> Result<RequisitionStatus, String> {
    RequisitionStatus::parse(raw).ok_or_else(|| format!("unknown requisition status '{raw}'"))
}

async fn find_invoice(storage: &Storage, kind: InvoiceKind, number: i64) -> Result<InvoiceRow> {
    storage
        .invoice_by_number(kind, number)
        .await?
        .ok_or_else(|| anyhow!("no {kind} invoice #{number}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateInvoice {
            kind,
            other_party_name,
        } => {
            let invoice = storage.create_invoice(kind, &other_party_name).await?;
            println!(
                "created {kind} invoice #{} id={}",
                invoice.invoice_number, invoice.id
            );
        }
        Command::AddLine {
            kind,
            invoice_number,
            line,
            item_code,
            item_name,
            batch,
            expiry_date,
            pack_size,
            packs,
            price,
            note,
        } => {
            let invoice = find_invoice(&storage, kind, invoice_number).await?;
            let item = ItemRef {
                id: ItemId(format!("item-{}", item_code.to_ascii_lowercase())),
                code: item_code,
                name: item_name,
            };
            let detail = match (line, kind) {
                (LineArg::Service, _) => LineDetail::Service {
                    total_before_tax: price,
                    note,
                },
                (LineArg::Stock, InvoiceKind::Inbound) => LineDetail::StockIn {
                    batch,
                    expiry_date,
                    pack_size,
                    number_of_packs: packs,
                    cost_price_per_pack: price,
                },
                (LineArg::Stock, InvoiceKind::Outbound) => LineDetail::StockOut {
                    stock_line_id: StockLineId::new(),
                    batch,
                    expiry_date,
                    pack_size,
                    number_of_packs: packs,
                    sell_price_per_pack: price,
                },
            };
            let line = storage.insert_line(&invoice.id, &item, &detail).await?;
            println!(
                "added {} line id={} to {kind} invoice #{invoice_number}",
                line.line_type().as_str(),
                line.id
            );
        }
        Command::SetInvoiceStatus {
            kind,
            invoice_number,
            status,
        } => {
            let invoice = find_invoice(&storage, kind, invoice_number).await?;
            storage.set_invoice_status(&invoice.id, status).await?;
            println!(
                "{kind} invoice #{invoice_number} is now {}",
                status.as_str()
            );
        }
        Command::SetOnHold {
            kind,
            invoice_number,
            on_hold,
        } => {
            let invoice = find_invoice(&storage, kind, invoice_number).await?;
            storage.set_invoice_on_hold(&invoice.id, on_hold).await?;
            println!("{kind} invoice #{invoice_number} on_hold={on_hold}");
        }
        Command::CreateRequisition { other_party_name } => {
            let requisition = storage.create_requisition(&other_party_name).await?;
            println!(
                "created requisition #{} id={}",
                requisition.requisition_number, requisition.id
            );
        }
        Command::SetRequisitionStatus {
            requisition_id,
            status,
        } => {
            let id = RequisitionId(requisition_id);
            if !storage.set_requisition_status(&id, status).await? {
                bail!("no requisition with id {id}");
            }
            println!("requisition {id} is now {}", status.as_str());
        }
    }

    Ok(())
}
