use crate::types::{
    CustomerRecord, LevelCountRow, LevelSelection, LevelShareRow, MonthCountRow, PlaceCountRow,
    PurchaseLevel, SummaryMetrics,
};
use crate::util::{format_percent, month_key, month_of};
use std::collections::{BTreeMap, HashMap};

/// Rows kept in each geographic ranking.
pub const TOP_PLACES: usize = 15;
/// Most recent month buckets kept in the trend.
pub const TREND_MONTHS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceField {
    State,
    City,
}

impl PlaceField {
    fn value(self, record: &CustomerRecord) -> Option<&str> {
        match self {
            PlaceField::State => record.state.as_deref(),
            PlaceField::City => record.city.as_deref(),
        }
    }
}

/// Rows matching the selection, in their original order.
pub fn filter_by_level<'a>(
    data: &'a [CustomerRecord],
    selection: &LevelSelection,
) -> Vec<&'a CustomerRecord> {
    data.iter().filter(|r| selection.matches(r)).collect()
}

pub fn compute_metrics<'a, I>(data: I) -> SummaryMetrics
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let mut m = SummaryMetrics::default();
    for r in data {
        m.total += 1;
        match r.confirmed_orders {
            Some(n) if n > 0 => {
                m.purchased += 1;
                if n >= 2 {
                    m.recurring += 1;
                }
            }
            Some(0) if r.canceled_orders.is_some_and(|c| c > 0) => m.cancel_only += 1,
            _ => {}
        }
    }
    m
}

/// Count per known level, always in [`PurchaseLevel::ALL`] order.
///
/// Unknown labels are skipped. `highlight` marks the currently selected level.
pub fn tabulate_levels<'a, I>(data: I, highlight: &LevelSelection) -> Vec<LevelCountRow>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let mut counts = [0usize; PurchaseLevel::ALL.len()];
    for r in data {
        if let Some(level) = r.level() {
            counts[level as usize] += 1;
        }
    }
    PurchaseLevel::ALL
        .into_iter()
        .map(|level| LevelCountRow {
            level: level.label().to_string(),
            customers: counts[level as usize],
            selected: if *highlight == LevelSelection::Level(level) {
                "*".to_string()
            } else {
                String::new()
            },
        })
        .collect()
}

/// Ranked counts of a geographic field.
///
/// Blank values are excluded. Equal counts keep first-appearance order;
/// beyond that the tie order carries no meaning.
pub fn tabulate_places<'a, I>(data: I, field: PlaceField) -> Vec<PlaceCountRow>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for r in data {
        let Some(value) = field.value(r).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        match index.get(value) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(value, counts.len());
                counts.push((value, 1));
            }
        }
    }
    // `sort_by` is stable, which preserves first appearance among ties.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(TOP_PLACES)
        .enumerate()
        .map(|(idx, (place, customers))| PlaceCountRow {
            rank: idx + 1,
            place: place.to_string(),
            customers,
        })
        .collect()
}

/// Customers per `updated_at` month, chronological, last [`TREND_MONTHS`] only.
pub fn monthly_trend<'a, I>(data: I) -> Vec<MonthCountRow>
where
    I: IntoIterator<Item = &'a CustomerRecord>,
{
    let mut buckets: BTreeMap<(i32, u32), usize> = BTreeMap::new();
    for ts in data.into_iter().filter_map(|r| r.updated_at.as_ref()) {
        *buckets.entry(month_of(ts)).or_default() += 1;
    }
    let skip = buckets.len().saturating_sub(TREND_MONTHS);
    buckets
        .into_iter()
        .skip(skip)
        .map(|(month, customers)| MonthCountRow {
            month: month_key(month),
            customers,
        })
        .collect()
}

/// Percentage of classified customers per level (the pie dataset).
pub fn level_share(levels: &[LevelCountRow]) -> Vec<LevelShareRow> {
    let classified: usize = levels.iter().map(|r| r.customers).sum();
    levels
        .iter()
        .map(|r| {
            let pct = if classified == 0 {
                0.0
            } else {
                r.customers as f64 / classified as f64 * 100.0
            };
            LevelShareRow {
                level: r.level.clone(),
                customers: r.customers,
                share_pct: format_percent(pct, 1),
            }
        })
        .collect()
}

/// Every dataset the dashboard shows for one selection.
///
/// The level chart is always computed over the whole table so the selected
/// level can be highlighted among the others; everything else follows the
/// selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub selection: LevelSelection,
    pub metrics: SummaryMetrics,
    pub levels: Vec<LevelCountRow>,
    pub states: Vec<PlaceCountRow>,
    pub cities: Vec<PlaceCountRow>,
    pub monthly: Vec<MonthCountRow>,
}

impl Dashboard {
    pub fn build(all: &[CustomerRecord], selection: LevelSelection) -> Self {
        let levels = tabulate_levels(all, &selection);
        let mut dashboard = Dashboard {
            selection,
            metrics: SummaryMetrics::default(),
            levels,
            states: Vec::new(),
            cities: Vec::new(),
            monthly: Vec::new(),
        };
        dashboard.refresh_filtered(all);
        dashboard
    }

    /// Switch the selection, recomputing only the selection-dependent datasets.
    pub fn reselect(&mut self, all: &[CustomerRecord], selection: LevelSelection) {
        if self.selection == selection {
            return;
        }
        self.selection = selection;
        for row in &mut self.levels {
            row.selected = if selection.label() == row.level {
                "*".to_string()
            } else {
                String::new()
            };
        }
        self.refresh_filtered(all);
    }

    pub fn level_share(&self) -> Vec<LevelShareRow> {
        level_share(&self.levels)
    }

    pub fn classified_customers(&self) -> usize {
        self.levels.iter().map(|r| r.customers).sum()
    }

    fn refresh_filtered(&mut self, all: &[CustomerRecord]) {
        let filtered = filter_by_level(all, &self.selection);
        self.metrics = compute_metrics(filtered.iter().copied());
        self.states = tabulate_places(filtered.iter().copied(), PlaceField::State);
        self.cities = tabulate_places(filtered.iter().copied(), PlaceField::City);
        self.monthly = monthly_trend(filtered.iter().copied());
    }
}
