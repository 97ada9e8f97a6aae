use std::{process::ExitCode, sync::Arc};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{
    BroadcastNotifier, Collection, HttpDataSource, InvoiceListScreen, LineSortKey,
    MutationOutcome, Notification, QueryCache, QueryKey, RequisitionListScreen, Severity,
    ShipmentScreen, SortBy,
};
use shared::domain::{
    InvoiceKind, InvoiceLine, InvoiceLineId, InvoiceRow, ItemId, LineDetail, RequisitionRow,
};
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(
        long,
        env = "STOCKROOM_SERVER_URL",
        default_value = "http://127.0.0.1:8443"
    )]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the lines of a shipment.
    Lines {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
        #[arg(long, value_parser = parse_sort_key)]
        sort: Option<LineSortKey>,
        #[arg(long)]
        desc: bool,
    },
    /// Print a shipment's lines grouped by item.
    Items {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
    },
    NextItem {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
        item_id: String,
    },
    /// Delete lines by id, or whole items by item id with --grouped.
    DeleteLines {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
        #[arg(long)]
        grouped: bool,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    DeleteInvoices {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        #[arg(required = true)]
        invoice_numbers: Vec<i64>,
    },
    DeleteRequisitions {
        #[arg(required = true)]
        requisition_numbers: Vec<i64>,
    },
    /// Set pack counts, given as LINE_ID=PACKS.
    SetPacks {
        #[arg(value_parser = parse_kind)]
        kind: InvoiceKind,
        invoice_number: i64,
        #[arg(required = true, value_parser = parse_pack_update)]
        updates: Vec<(InvoiceLineId, f64)>,
    },
}

fn parse_kind(raw: &str) -> Result<InvoiceKind, String> {
    InvoiceKind::parse(raw).ok_or_else(|| format!("unknown invoice kind '{raw}'"))
}

fn parse_sort_key(raw: &str) -> Result<LineSortKey, String> {
    LineSortKey::parse(raw).ok_or_else(|| format!("unknown sort key '{raw}'"))
}

fn parse_pack_update(raw: &str) -> Result<(InvoiceLineId, f64), String> {
    let (id, packs) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected LINE_ID=PACKS, got '{raw}'"))?;
    let packs: f64 = packs
        .trim()
        .parse()
        .map_err(|_| format!("'{packs}' is not a number"))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("missing line id in '{raw}'"));
    }
    Ok((InvoiceLineId::from(id), packs))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    debug!(server_url = %args.server_url, "console starting");

    let source = Arc::new(HttpDataSource::new(args.server_url));
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut notices = notifier.subscribe();

    let outcome = match args.command {
        Command::Lines {
            kind,
            invoice_number,
            sort,
            desc,
        } => {
            let mut screen = open_shipment(&source, &notifier, kind, invoice_number).await?;
            if let Some(key) = sort {
                screen.set_sort(SortBy { key, desc });
            }
            print_header(&screen);
            for line in screen.lines().await? {
                println!("{}", describe_line(&line));
            }
            None
        }
        Command::Items {
            kind,
            invoice_number,
        } => {
            let screen = open_shipment(&source, &notifier, kind, invoice_number).await?;
            print_header(&screen);
            for group in screen.items().await? {
                println!(
                    "{}  {}  {}  ({} lines)",
                    group.item.id,
                    group.item.code,
                    group.item.name,
                    group.lines.len()
                );
            }
            None
        }
        Command::NextItem {
            kind,
            invoice_number,
            item_id,
        } => {
            let screen = open_shipment(&source, &notifier, kind, invoice_number).await?;
            let next = screen.next_item(&ItemId(item_id)).await?;
            match next.next {
                Some(line) => println!("{}", describe_line(&line)),
                None => println!("no next item"),
            }
            None
        }
        Command::DeleteLines {
            kind,
            invoice_number,
            grouped,
            ids,
        } => {
            let mut screen = open_shipment(&source, &notifier, kind, invoice_number).await?;
            screen.set_grouped(grouped);
            screen.selection_mut().select_all(ids);
            Some(screen.delete_selected_lines().await)
        }
        Command::DeleteInvoices {
            kind,
            invoice_numbers,
        } => {
            let cache = QueryCache::<InvoiceRow>::new(source.clone());
            let mut screen =
                InvoiceListScreen::new(kind, cache, source.clone(), notifier.clone());
            let rows = screen.rows().await?;
            let ids = invoice_numbers.iter().filter_map(|number| {
                rows.iter()
                    .find(|row| row.invoice_number == *number)
                    .map(|row| row.id.0.clone())
            });
            screen.selection_mut().select_all(ids);
            Some(screen.delete_selected().await)
        }
        Command::DeleteRequisitions {
            requisition_numbers,
        } => {
            let cache = QueryCache::<RequisitionRow>::new(source.clone());
            let mut screen = RequisitionListScreen::new(cache, source.clone(), notifier.clone());
            let rows = screen.rows().await?;
            let ids = requisition_numbers.iter().filter_map(|number| {
                rows.iter()
                    .find(|row| row.requisition_number == *number)
                    .map(|row| row.id.0.clone())
            });
            screen.selection_mut().select_all(ids);
            Some(screen.delete_selected().await)
        }
        Command::SetPacks {
            kind,
            invoice_number,
            updates,
        } => {
            let screen = open_shipment(&source, &notifier, kind, invoice_number).await?;
            Some(screen.save_line_packs(&updates).await)
        }
    };

    print_notices(&mut notices);
    Ok(match outcome {
        Some(MutationOutcome::Rejected(_) | MutationOutcome::RolledBack) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// Loads the shipment header and lines in one request and seeds the cache
/// with the lines.
async fn open_shipment(
    source: &Arc<HttpDataSource>,
    notifier: &Arc<BroadcastNotifier>,
    kind: InvoiceKind,
    invoice_number: i64,
) -> Result<ShipmentScreen<HttpDataSource>> {
    let detail = source
        .invoice_detail(kind, invoice_number)
        .await
        .map_err(|error| anyhow!("cannot open {kind} invoice #{invoice_number}: {error}"))?;
    let cache = QueryCache::<InvoiceLine>::new(source.clone());
    cache
        .set(
            QueryKey::InvoiceDetail {
                kind,
                invoice_number,
            },
            Collection::new(detail.lines),
        )
        .await;
    Ok(ShipmentScreen::new(
        detail.invoice,
        cache,
        source.clone(),
        notifier.clone(),
    ))
}

fn print_header(screen: &ShipmentScreen<HttpDataSource>) {
    let header = screen.header();
    println!(
        "{} invoice #{}  {}  status={}{}",
        header.kind,
        header.invoice_number,
        header.other_party_name,
        header.status.as_str(),
        if screen.is_disabled() { "  (read only)" } else { "" }
    );
}

fn describe_line(line: &InvoiceLine) -> String {
    let prefix = format!(
        "{}  {}  {}  {}",
        line.id,
        line.item.code,
        line.item.name,
        line.line_type().as_str()
    );
    match &line.detail {
        LineDetail::Service {
            total_before_tax, ..
        } => format!("{prefix}  total={total_before_tax:.2}"),
        detail => format!(
            "{prefix}  batch={}  expiry={}  pack_size={}  packs={}",
            detail.batch().unwrap_or("-"),
            detail
                .expiry_date()
                .map(|date| date.to_string())
                .unwrap_or_else(|| "-".to_string()),
            detail.pack_size().unwrap_or_default(),
            detail.number_of_packs().unwrap_or_default()
        ),
    }
}

fn print_notices(notices: &mut broadcast::Receiver<Notification>) {
    while let Ok(Notification { severity, notice }) = notices.try_recv() {
        match severity {
            Severity::Error => eprintln!("error: {notice}"),
            Severity::Info | Severity::Success => println!("{notice}"),
        }
    }
}
