use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(InvoiceId);
id_newtype!(InvoiceLineId);
id_newtype!(ItemId);
id_newtype!(StockLineId);
id_newtype!(RequisitionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Inbound,
    Outbound,
}

impl InvoiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }

    /// The line type a shipment of this kind holds stock in.
    pub fn stock_line_type(self) -> LineType {
        match self {
            Self::Inbound => LineType::StockIn,
            Self::Outbound => LineType::StockOut,
        }
    }
}

impl fmt::Display for InvoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    New,
    Allocated,
    Picked,
    Shipped,
    Delivered,
    Verified,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Allocated => "allocated",
            Self::Picked => "picked",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Verified => "verified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "allocated" => Some(Self::Allocated),
            "picked" => Some(Self::Picked),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Draft,
    Sent,
    Finalised,
}

impl RequisitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Finalised => "finalised",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "finalised" | "finalized" => Some(Self::Finalised),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRow {
    pub id: InvoiceId,
    pub invoice_number: i64,
    pub kind: InvoiceKind,
    pub status: InvoiceStatus,
    pub other_party_name: String,
    pub on_hold: bool,
    pub created_at: DateTime<Utc>,
}

impl InvoiceRow {
    /// Whether the shipment's lines can no longer be added, edited or
    /// deleted. Inbound shipments lock once verified; outbound shipments
    /// lock as soon as they leave the store.
    pub fn lines_locked(&self) -> bool {
        if self.on_hold {
            return true;
        }
        match self.kind {
            InvoiceKind::Inbound => self.status == InvoiceStatus::Verified,
            InvoiceKind::Outbound => matches!(
                self.status,
                InvoiceStatus::Shipped | InvoiceStatus::Delivered | InvoiceStatus::Verified
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequisitionRow {
    pub id: RequisitionId,
    pub requisition_number: i64,
    pub status: RequisitionStatus,
    pub other_party_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: ItemId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    StockIn,
    StockOut,
    Service,
}

impl LineType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StockIn => "stock_in",
            Self::StockOut => "stock_out",
            Self::Service => "service",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stock_in" => Some(Self::StockIn),
            "stock_out" => Some(Self::StockOut),
            "service" => Some(Self::Service),
            _ => None,
        }
    }
}

/// Per-type line payload. The discriminant is fixed when the line is built,
/// so callers match on it instead of probing optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineDetail {
    StockIn {
        batch: Option<String>,
        expiry_date: Option<NaiveDate>,
        pack_size: u32,
        number_of_packs: f64,
        cost_price_per_pack: f64,
    },
    StockOut {
        stock_line_id: StockLineId,
        batch: Option<String>,
        expiry_date: Option<NaiveDate>,
        pack_size: u32,
        number_of_packs: f64,
        sell_price_per_pack: f64,
    },
    Service {
        total_before_tax: f64,
        note: Option<String>,
    },
}

impl LineDetail {
    pub fn line_type(&self) -> LineType {
        match self {
            Self::StockIn { .. } => LineType::StockIn,
            Self::StockOut { .. } => LineType::StockOut,
            Self::Service { .. } => LineType::Service,
        }
    }

    pub fn batch(&self) -> Option<&str> {
        match self {
            Self::StockIn { batch, .. } | Self::StockOut { batch, .. } => batch.as_deref(),
            Self::Service { .. } => None,
        }
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        match self {
            Self::StockIn { expiry_date, .. } | Self::StockOut { expiry_date, .. } => *expiry_date,
            Self::Service { .. } => None,
        }
    }

    pub fn pack_size(&self) -> Option<u32> {
        match self {
            Self::StockIn { pack_size, .. } | Self::StockOut { pack_size, .. } => Some(*pack_size),
            Self::Service { .. } => None,
        }
    }

    pub fn number_of_packs(&self) -> Option<f64> {
        match self {
            Self::StockIn {
                number_of_packs, ..
            }
            | Self::StockOut {
                number_of_packs, ..
            } => Some(*number_of_packs),
            Self::Service { .. } => None,
        }
    }

    /// Returns a copy with the pack count replaced. Service lines carry no
    /// packs and come back unchanged.
    pub fn with_number_of_packs(&self, packs: f64) -> Self {
        let mut detail = self.clone();
        match &mut detail {
            Self::StockIn {
                number_of_packs, ..
            }
            | Self::StockOut {
                number_of_packs, ..
            } => *number_of_packs = packs,
            Self::Service { .. } => {}
        }
        detail
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: InvoiceLineId,
    pub invoice_id: InvoiceId,
    pub item: ItemRef,
    pub detail: LineDetail,
}

impl InvoiceLine {
    pub fn line_type(&self) -> LineType {
        self.detail.line_type()
    }
}
