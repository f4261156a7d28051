use crate::reports::Dashboard;
use crate::types::SummaryFile;
use crate::util::format_int;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

/// Write `rows` with a header line, even when there are no rows.
pub fn write_csv<T: Serialize + Tabled>(path: &Path, rows: &[T]) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        // `serialize` derives the header from the first row.
        let headers: Vec<String> = T::headers().into_iter().map(|h| h.into_owned()).collect();
        wtr.write_record(&headers)?;
    }
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn preview_table<T>(title: &str, note: Option<&str>, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    print!("{}", render_preview(title, note, rows, max_rows));
}

/// Markdown preview of the first `max_rows` rows, with a count line when cut short.
pub fn render_preview<T>(title: &str, note: Option<&str>, rows: &[T], max_rows: usize) -> String
where
    T: Tabled + Clone,
{
    let mut out = format!("{}\n", title);
    if let Some(n) = note {
        out.push_str(&format!("({})\n", n));
    }
    out.push('\n');
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        out.push_str("(no rows)\n\n");
        return out;
    }
    let shown = slice.len();
    out.push_str(&Table::new(slice).with(Style::markdown()).to_string());
    out.push('\n');
    if shown < rows.len() {
        out.push_str(&format!(
            "(showing {} of {} rows)\n",
            format_int(shown),
            format_int(rows.len())
        ));
    }
    out.push('\n');
    out
}

pub fn print_metrics(dashboard: &Dashboard) {
    let m = &dashboard.metrics;
    println!("Customers ({})", dashboard.selection);
    println!("  Total customers:        {:>10}", format_int(m.total));
    println!("  Bought at least once:   {:>10}", format_int(m.purchased));
    println!("  Recurring customers:    {:>10}", format_int(m.recurring));
    println!("  Cancellations only:     {:>10}", format_int(m.cancel_only));
    println!();
}

/// Write every dataset of `dashboard` into `dir`; returns the files written.
pub fn export_dashboard(
    dir: &Path,
    dashboard: &Dashboard,
    with_level_share: bool,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    export_csv(dir, "report_levels.csv", &dashboard.levels, &mut written)?;
    export_csv(dir, "report_states.csv", &dashboard.states, &mut written)?;
    export_csv(dir, "report_cities.csv", &dashboard.cities, &mut written)?;
    export_csv(dir, "report_monthly.csv", &dashboard.monthly, &mut written)?;
    if with_level_share {
        export_csv(dir, "report_level_share.csv", &dashboard.level_share(), &mut written)?;
    }

    let summary = SummaryFile {
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        selection: dashboard.selection.to_string(),
        metrics: dashboard.metrics,
        classified_customers: dashboard.classified_customers(),
        months_in_trend: dashboard.monthly.len(),
    };
    let summary_path = dir.join("summary.json");
    write_json(&summary_path, &summary)?;
    written.push(summary_path);
    Ok(written)
}

fn export_csv<T: Serialize + Tabled>(
    dir: &Path,
    name: &str,
    rows: &[T],
    written: &mut Vec<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let path = dir.join(name);
    write_csv(&path, rows)?;
    written.push(path);
    Ok(())
}
