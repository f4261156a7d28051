// Entry point and high-level CLI flow.
//
// - Interactive mode asks for a login, then offers a menu to load the
//   customer export, pick a purchase level and generate the reports.
// - `--batch` loads, reports for `--level` and exits without prompting.
mod auth;
mod config;
mod error;
mod loader;
mod output;
mod reports;
mod types;
mod util;

use anyhow::{bail, Context};
use auth::{Credentials, Session};
use clap::Parser;
use config::AppConfig;
use error::LoadError;
use loader::{DatasetCache, Fetcher, HttpFetcher, Source};
use reports::Dashboard;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use types::{CustomerRecord, LevelSelection, PurchaseLevel};

/// Customer dashboard reports from an order-history export.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON config file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Local CSV path or shareable drive URL; overrides config and env.
    #[arg(long)]
    source: Option<String>,

    /// Purchase level filter: `All`, a level label, or 1-5.
    #[arg(long, default_value = "All", value_parser = parse_selection)]
    level: LevelSelection,

    /// Write the reports once and exit, without login or menu.
    #[arg(long)]
    batch: bool,
}

fn parse_selection(s: &str) -> Result<LevelSelection, String> {
    s.parse().map_err(|e: types::UnknownLevel| e.to_string())
}

/// What one login has loaded and computed so far.
struct Workspace {
    data: Option<Arc<Vec<CustomerRecord>>>,
    dashboard: Option<Dashboard>,
}

impl Workspace {
    fn new() -> Self {
        Self {
            data: None,
            dashboard: None,
        }
    }

    fn clear(&mut self) {
        self.data = None;
        self.dashboard = None;
    }
}

struct App<F: Fetcher> {
    config: AppConfig,
    cache: DatasetCache<F>,
}

impl<F: Fetcher> App<F> {
    fn source(&self) -> anyhow::Result<Source> {
        match self.config.source.as_deref() {
            Some(location) => Ok(Source::parse(location)),
            None => bail!(
                "no data source configured (set \"source\" in the config, {} or --source)",
                config::SOURCE_ENV
            ),
        }
    }

    fn load(&mut self) -> anyhow::Result<Arc<Vec<CustomerRecord>>> {
        let source = self.source()?;
        self.cache
            .load(&source)
            .with_context(|| format!("failed to load customers from {}", source))
    }

    fn report(&self, dashboard: &Dashboard) {
        let rows = self.config.preview_rows;
        output::print_metrics(dashboard);
        output::preview_table("Purchase level", Some("all customers"), &dashboard.levels, rows);
        output::preview_table("Customers by state", Some("top 15"), &dashboard.states, rows);
        output::preview_table("Customers by month", Some("last 24 months"), &dashboard.monthly, rows);
        output::preview_table("Top cities", Some("top 15"), &dashboard.cities, rows);
        if self.config.show_level_share {
            output::preview_table("Level share (%)", None, &dashboard.level_share(), rows);
        }
        match output::export_dashboard(&self.config.output_dir, dashboard, self.config.show_level_share) {
            Ok(files) => {
                log::info!("Wrote {} report files", files.len());
                println!("(Full tables exported to {})\n", self.config.output_dir.display());
            }
            Err(e) => eprintln!("Write error: {}", e),
        }
    }
}

/// One trimmed line of input; `None` once input is exhausted or unreadable.
fn read_answer<R: BufRead>(input: &mut R) -> Option<String> {
    let mut buf = String::new();
    match input.read_line(&mut buf) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(buf.trim().to_string()),
    }
}

fn prompt(label: &str) -> Option<String> {
    print!("{}", label);
    let _ = io::stdout().flush();
    read_answer(&mut io::stdin().lock())
}

/// Ask for credentials until they match; `None` when the user quits.
fn login(creds: &Credentials) -> Option<Session> {
    loop {
        println!("Customer Dashboard - restricted access");
        let user = prompt("Username (empty to quit): ")?;
        if user.is_empty() {
            return None;
        }
        let password = prompt("Password: ")?;
        match creds.login(&user, &password) {
            Ok(session) => return Some(session),
            Err(e) => println!("{}\n", e),
        }
    }
}

fn select_level() -> Option<LevelSelection> {
    println!("[0] All");
    for level in PurchaseLevel::ALL {
        println!("[{}] {}", level.ordinal(), level);
    }
    let choice = prompt("Enter choice: ")?;
    let choice = if choice == "0" { "All" } else { choice.as_str() };
    match choice.parse() {
        Ok(selection) => Some(selection),
        Err(e) => {
            println!("{}\n", e);
            None
        }
    }
}

/// Load (or reuse) the table and refresh the dashboard.
///
/// On failure the workspace is emptied so nothing from an earlier load can
/// be reported.
fn handle_load<F: Fetcher>(app: &mut App<F>, session: &Session, ws: &mut Workspace) -> bool {
    match app.load() {
        Ok(data) => {
            println!("Loaded {} customers.\n", util::format_int(data.len()));
            // A cache hit hands back the same table, so the level chart stays valid.
            let unchanged = ws.data.as_ref().is_some_and(|old| Arc::ptr_eq(old, &data));
            match ws.dashboard.as_mut() {
                Some(dashboard) if unchanged => dashboard.reselect(&data, session.selection),
                _ => ws.dashboard = Some(Dashboard::build(&data, session.selection)),
            }
            ws.data = Some(data);
            true
        }
        Err(e) => {
            ws.clear();
            log::error!("{:#}", e);
            let unavailable = e
                .chain()
                .filter_map(|cause| cause.downcast_ref::<LoadError>())
                .any(LoadError::is_unavailable);
            if unavailable {
                eprintln!("Data source is unavailable right now: {:#}\n", e);
            } else {
                eprintln!("Failed to load data: {:#}\n", e);
            }
            false
        }
    }
}

/// Reload then report; returns whether a report was produced.
fn generate_reports<F: Fetcher>(app: &mut App<F>, session: &Session, ws: &mut Workspace) -> bool {
    if !handle_load(app, session, ws) {
        return false;
    }
    let Some(dashboard) = ws.dashboard.as_ref() else {
        return false;
    };
    app.report(dashboard);
    true
}

/// Menu loop for one session; returns when the user logs out.
fn run_session<F: Fetcher>(app: &mut App<F>, mut session: Session) {
    println!("\nHello, {}!\n", session.user);
    let mut ws = Workspace::new();
    loop {
        println!("Selected level: {}", session.selection);
        println!("[1] Load the dataset (refresh)");
        println!("[2] Select purchase level");
        println!("[3] Generate reports");
        println!("[4] Log out\n");
        let Some(choice) = prompt("Enter choice: ") else {
            log::info!("Input closed, logging out {}", session.user);
            return;
        };
        match choice.as_str() {
            "1" => {
                app.cache.clear();
                handle_load(app, &session, &mut ws);
            }
            "2" => {
                if let Some(selection) = select_level() {
                    session.selection = selection;
                    println!();
                }
            }
            "3" => {
                println!();
                // Cached remote tables are reused; local files are re-read.
                generate_reports(app, &session, &mut ws);
            }
            "4" => {
                log::info!("User {} logged out", session.user);
                println!("Logged out.\n");
                return;
            }
            _ => println!("Invalid choice. Please enter 1-4.\n"),
        }
    }
}

fn main() {
    fn try_main() -> anyhow::Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        let args = Args::parse();
        let config = AppConfig::load(&args.config)?
            .with_source_overrides(std::env::var(config::SOURCE_ENV).ok(), args.source);
        let cache = DatasetCache::new(HttpFetcher::default(), config.cache_ttl());
        let mut app = App { config, cache };

        if args.batch {
            let data = app.load()?;
            let dashboard = Dashboard::build(&data, args.level);
            app.report(&dashboard);
            return Ok(());
        }

        let users = app.config.users.clone();
        let creds = Credentials::new(&users);
        if creds.is_empty() {
            bail!("no users configured in {}", args.config.display());
        }
        while let Some(mut session) = login(&creds) {
            session.selection = args.level;
            run_session(&mut app, session);
        }
        println!("Exiting the program.");
        Ok(())
    }

    if let Err(e) = try_main() {
        eprint!("error");
        e.chain().for_each(|cause| eprint!(": {}", cause));
        eprintln!();
        std::process::exit(1);
    }
}
