use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

/// One row of the customer export exactly as it appears in the CSV.
///
/// Every field is optional text; typing happens in the loader so a single
/// bad timestamp never rejects the whole row.
#[derive(Debug, Deserialize)]
pub struct RawRow {
    #[serde(rename = "id_cliente")]
    pub customer_id: Option<String>,
    #[serde(rename = "classificacao")]
    pub classification: Option<String>,
    #[serde(rename = "pedidos_confirmados")]
    pub confirmed_orders: Option<String>,
    #[serde(rename = "pedidos_cancelados")]
    pub canceled_orders: Option<String>,
    #[serde(rename = "estado")]
    pub state: Option<String>,
    #[serde(rename = "cidade")]
    pub city: Option<String>,
    #[serde(rename = "atualizado_em")]
    pub updated_at: Option<String>,
    #[serde(rename = "ultimo_pedido_confirmado")]
    pub last_confirmed_order_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRecord {
    pub customer_id: Option<String>,
    /// Raw label; values outside [`PurchaseLevel::ALL`] are kept and only
    /// dropped when tabulating.
    pub classification: String,
    /// `None` when the cell was blank.
    pub confirmed_orders: Option<u32>,
    pub canceled_orders: Option<u32>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
    pub last_confirmed_order_at: Option<NaiveDateTime>,
}

impl CustomerRecord {
    pub fn level(&self) -> Option<PurchaseLevel> {
        self.classification.parse().ok()
    }
}

/// Ordinal purchase bucket of a customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PurchaseLevel {
    First,
    Second,
    Third,
    Fourth,
    FifthPlus,
}

impl PurchaseLevel {
    /// Fixed display order of the level chart.
    pub const ALL: [PurchaseLevel; 5] = [
        PurchaseLevel::First,
        PurchaseLevel::Second,
        PurchaseLevel::Third,
        PurchaseLevel::Fourth,
        PurchaseLevel::FifthPlus,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PurchaseLevel::First => "1ª Compra",
            PurchaseLevel::Second => "2ª Compra",
            PurchaseLevel::Third => "3ª Compra",
            PurchaseLevel::Fourth => "4ª Compra",
            PurchaseLevel::FifthPlus => "5ª Compra +",
        }
    }

    pub fn ordinal(self) -> usize {
        self as usize + 1
    }
}

impl fmt::Display for PurchaseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PurchaseLevel {
    type Err = UnknownLevel;

    /// Exact label match; the export is not normalized beyond this.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PurchaseLevel::ALL
            .into_iter()
            .find(|level| level.label() == s)
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown purchase level: {0:?}")]
pub struct UnknownLevel(pub String);

/// Which rows feed the metrics, geography and trend datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelSelection {
    #[default]
    All,
    Level(PurchaseLevel),
}

impl LevelSelection {
    pub fn label(&self) -> &'static str {
        match self {
            LevelSelection::All => "All",
            LevelSelection::Level(level) => level.label(),
        }
    }

    pub fn matches(&self, record: &CustomerRecord) -> bool {
        match self {
            LevelSelection::All => true,
            LevelSelection::Level(level) => record.classification == level.label(),
        }
    }
}

impl fmt::Display for LevelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LevelSelection {
    type Err = UnknownLevel;

    /// Accepts `All` (any case), a level label, or the ordinal `1`..`5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(LevelSelection::All);
        }
        if let Ok(n) = s.parse::<usize>() {
            return PurchaseLevel::ALL
                .into_iter()
                .find(|level| level.ordinal() == n)
                .map(LevelSelection::Level)
                .ok_or_else(|| UnknownLevel(s.to_string()));
        }
        s.parse().map(LevelSelection::Level)
    }
}

/// The four headline counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SummaryMetrics {
    pub total: usize,
    pub purchased: usize,
    pub recurring: usize,
    pub cancel_only: usize,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq, Eq)]
pub struct LevelCountRow {
    #[serde(rename = "Level")]
    #[tabled(rename = "Level")]
    pub level: String,
    #[serde(rename = "Customers")]
    #[tabled(rename = "Customers")]
    pub customers: usize,
    #[serde(rename = "Selected")]
    #[tabled(rename = "Selected")]
    pub selected: String,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq, Eq)]
pub struct PlaceCountRow {
    #[serde(rename = "Rank")]
    #[tabled(rename = "Rank")]
    pub rank: usize,
    #[serde(rename = "Place")]
    #[tabled(rename = "Place")]
    pub place: String,
    #[serde(rename = "Customers")]
    #[tabled(rename = "Customers")]
    pub customers: usize,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq, Eq)]
pub struct MonthCountRow {
    #[serde(rename = "Month")]
    #[tabled(rename = "Month")]
    pub month: String,
    #[serde(rename = "Customers")]
    #[tabled(rename = "Customers")]
    pub customers: usize,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct LevelShareRow {
    #[serde(rename = "Level")]
    #[tabled(rename = "Level")]
    pub level: String,
    #[serde(rename = "Customers")]
    #[tabled(rename = "Customers")]
    pub customers: usize,
    #[serde(rename = "SharePct")]
    #[tabled(rename = "SharePct")]
    pub share_pct: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryFile {
    pub generated_at: String,
    pub selection: String,
    pub metrics: SummaryMetrics,
    pub classified_customers: usize,
    pub months_in_trend: usize,
}
