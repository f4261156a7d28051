use crate::error::LoadError;
use crate::types::{CustomerRecord, RawRow};
use crate::util::{parse_count, parse_timestamp_safe, strip_bom};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, Trim};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Columns the export must carry; the identifier column is optional.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "classificacao",
    "pedidos_confirmados",
    "pedidos_cancelados",
    "estado",
    "cidade",
    "atualizado_em",
    "ultimo_pedido_confirmado",
];

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Where the customer table comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Local(PathBuf),
    /// A shareable drive link, kept verbatim as the cache key.
    Drive(String),
}

impl Source {
    pub fn parse(location: &str) -> Source {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            Source::Drive(location.to_string())
        } else {
            Source::Local(PathBuf::from(location))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Drive(url) => f.write_str(url),
        }
    }
}

/// Extract `<id>` from `https://drive.google.com/file/d/<id>/view...`.
pub fn drive_file_id(url: &str) -> Result<&str, LoadError> {
    let (_, rest) = url
        .split_once("/d/")
        .ok_or_else(|| LoadError::InvalidDriveUrl(url.to_string()))?;
    let id = rest.split('/').next().unwrap_or_default();
    let id = id.split(['?', '#']).next().unwrap_or_default();
    if id.is_empty() {
        return Err(LoadError::InvalidDriveUrl(url.to_string()));
    }
    Ok(id)
}

pub fn direct_download_url(url: &str) -> Result<String, LoadError> {
    let id = drive_file_id(url)?;
    Ok(format!("https://drive.google.com/uc?export=download&id={}", id))
}

/// Fetches the raw bytes behind a direct-download URL.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

static HTTP_CLIENT: Lazy<reqwest::blocking::Client> = Lazy::new(reqwest::blocking::Client::new);

/// Blocking HTTP GET; no retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    /// Shares the process-wide client.
    fn default() -> Self {
        Self::with_client(HTTP_CLIENT.clone())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let transport = |source| LoadError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::SourceUnavailable {
                url: url.to_string(),
                status,
            });
        }
        let body = response.bytes().map_err(transport)?;
        Ok(body.to_vec())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub total_rows: usize,
    /// Empty timestamp cells, per column.
    pub blank_updated_at: usize,
    pub blank_last_order_at: usize,
    /// Non-empty timestamp cells that did not parse, per column.
    pub bad_updated_at: usize,
    pub bad_last_order_at: usize,
    pub unknown_levels: usize,
}

fn tally_timestamp(
    cell: Option<&str>,
    blank: &mut usize,
    bad: &mut usize,
) -> Option<NaiveDateTime> {
    let parsed = parse_timestamp_safe(cell);
    if parsed.is_none() {
        if cell.is_some_and(|v| !v.trim().is_empty()) {
            *bad += 1;
        } else {
            *blank += 1;
        }
    }
    parsed
}

/// Parse CSV bytes (BOM tolerant) into customer records.
///
/// Unparseable timestamps become `None` and are only counted in the report.
/// Missing columns and non-numeric order counts fail the load.
pub fn parse_records(bytes: &[u8]) -> Result<(Vec<CustomerRecord>, LoadReport), LoadError> {
    // Headers are trimmed so the column check and row mapping see the same names.
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::Headers)
        .from_reader(strip_bom(bytes));
    {
        let headers = rdr.headers()?;
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(LoadError::MissingColumn(column));
            }
        }
    }

    let mut report = LoadReport::default();
    let mut records = Vec::new();
    for (idx, result) in rdr.deserialize::<RawRow>().enumerate() {
        let row = result?;
        // Header is line 1.
        let line = idx + 2;
        report.total_rows += 1;

        let confirmed_orders = parse_count(row.confirmed_orders.as_deref()).map_err(|value| {
            LoadError::InvalidCount {
                row: line,
                column: "pedidos_confirmados",
                value,
            }
        })?;
        let canceled_orders = parse_count(row.canceled_orders.as_deref()).map_err(|value| {
            LoadError::InvalidCount {
                row: line,
                column: "pedidos_cancelados",
                value,
            }
        })?;

        let updated_at = tally_timestamp(
            row.updated_at.as_deref(),
            &mut report.blank_updated_at,
            &mut report.bad_updated_at,
        );
        let last_confirmed_order_at = tally_timestamp(
            row.last_confirmed_order_at.as_deref(),
            &mut report.blank_last_order_at,
            &mut report.bad_last_order_at,
        );

        let record = CustomerRecord {
            customer_id: row.customer_id,
            classification: row.classification.unwrap_or_default(),
            confirmed_orders,
            canceled_orders,
            state: row.state,
            city: row.city,
            updated_at,
            last_confirmed_order_at,
        };
        if record.level().is_none() {
            report.unknown_levels += 1;
        }
        records.push(record);
    }
    Ok((records, report))
}

pub fn load_local(path: &std::path::Path) -> Result<(Vec<CustomerRecord>, LoadReport), LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_records(&bytes)
}

pub fn load_drive<F: Fetcher>(
    fetcher: &F,
    url: &str,
) -> Result<(Vec<CustomerRecord>, LoadReport), LoadError> {
    let download = direct_download_url(url)?;
    info!("Fetching customer export from {}", download);
    let bytes = fetcher.fetch(&download)?;
    parse_records(&bytes)
}

struct CachedTable {
    loaded_at: Instant,
    records: Arc<Vec<CustomerRecord>>,
}

/// Keeps parsed remote tables for `ttl`; local files are re-read every call.
///
/// Cached tables are handed out behind `Arc` and never mutated; a reload
/// replaces the entry wholesale.
pub struct DatasetCache<F: Fetcher> {
    fetcher: F,
    ttl: Duration,
    entries: HashMap<Source, CachedTable>,
}

impl<F: Fetcher> DatasetCache<F> {
    pub fn new(fetcher: F, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn load(&mut self, source: &Source) -> Result<Arc<Vec<CustomerRecord>>, LoadError> {
        let url = match source {
            Source::Local(path) => {
                let (records, report) = load_local(path)?;
                log_report(source, &report);
                return Ok(Arc::new(records));
            }
            Source::Drive(url) => url,
        };

        if let Some(entry) = self.entries.get(source) {
            if entry.loaded_at.elapsed() < self.ttl {
                debug!("Cache hit for {}", source);
                return Ok(Arc::clone(&entry.records));
            }
            debug!("Cache entry for {} expired", source);
        }

        let (records, report) = load_drive(&self.fetcher, url).inspect_err(|e| {
            warn!("Loading {} failed: {}", source, e);
        })?;
        log_report(source, &report);
        let records = Arc::new(records);
        self.entries.insert(
            source.clone(),
            CachedTable {
                loaded_at: Instant::now(),
                records: Arc::clone(&records),
            },
        );
        Ok(records)
    }

    /// Forget every cached table so the next load re-fetches.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn log_report(source: &Source, report: &LoadReport) {
    info!("Loaded {} customer rows from {}", report.total_rows, source);
    if report.bad_updated_at > 0 || report.bad_last_order_at > 0 {
        debug!(
            "Malformed timestamps: {} atualizado_em, {} ultimo_pedido_confirmado",
            report.bad_updated_at, report.bad_last_order_at
        );
    }
    debug!(
        "Empty timestamps: {} atualizado_em, {} ultimo_pedido_confirmado",
        report.blank_updated_at, report.blank_last_order_at
    );
    if report.unknown_levels > 0 {
        debug!("{} rows carry an unknown classification", report.unknown_levels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use rstest::rstest;
    use std::cell::{Cell, RefCell};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    const SAMPLE: &str = indoc! {"
        id_cliente,classificacao,pedidos_confirmados,pedidos_cancelados,estado,cidade,atualizado_em,ultimo_pedido_confirmado
        c1,1ª Compra,1,0,SP,São Paulo,01/01/2024 10:00,01/01/2024 10:00
        c2,2ª Compra,2,1,RJ,Rio de Janeiro,15/01/2024 11:00,
        c3,VIP,0,3, ,,not a date,02/02/2024 09:00
    "};

    struct CountingFetcher {
        calls: Cell<usize>,
        urls: RefCell<Vec<String>>,
        body: Vec<u8>,
    }

    impl CountingFetcher {
        fn new(body: &str) -> Self {
            Self {
                calls: Cell::new(0),
                urls: RefCell::new(Vec::new()),
                body: body.as_bytes().to_vec(),
            }
        }
    }

    impl Fetcher for &CountingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
            self.calls.set(self.calls.get() + 1);
            self.urls.borrow_mut().push(url.to_string());
            Ok(self.body.clone())
        }
    }

    /// Answer a single HTTP request on a loopback port with `response`.
    fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = stream;
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        });
        format!("http://{}/uc?export=download&id=abc", addr)
    }

    fn loopback_fetcher() -> HttpFetcher {
        let client = reqwest::blocking::Client::builder().no_proxy().build().unwrap();
        HttpFetcher::with_client(client)
    }

    struct FailingFetcher;

    impl Fetcher for FailingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
            Err(LoadError::SourceUnavailable {
                url: url.to_string(),
                status: reqwest::StatusCode::NOT_FOUND,
            })
        }
    }

    const DRIVE_URL: &str = "https://drive.google.com/file/d/abc123XYZ/view?usp=sharing";

    #[rstest]
    #[case(DRIVE_URL, "abc123XYZ")]
    #[case("https://drive.google.com/file/d/abc123XYZ", "abc123XYZ")]
    #[case("https://drive.google.com/file/d/abc123XYZ?usp=sharing", "abc123XYZ")]
    fn extracts_drive_file_id(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(drive_file_id(url).unwrap(), expected);
    }

    #[rstest]
    #[case("https://drive.google.com/open?id=abc")]
    #[case("https://drive.google.com/file/d/")]
    fn rejects_url_without_id(#[case] url: &str) {
        assert!(matches!(drive_file_id(url), Err(LoadError::InvalidDriveUrl(_))));
    }

    #[test]
    fn builds_direct_download_url() {
        assert_eq!(
            direct_download_url(DRIVE_URL).unwrap(),
            "https://drive.google.com/uc?export=download&id=abc123XYZ"
        );
    }

    #[rstest]
    #[case("https://drive.google.com/file/d/x/view", Source::Drive("https://drive.google.com/file/d/x/view".into()))]
    #[case("data/clientes.csv", Source::Local(PathBuf::from("data/clientes.csv")))]
    fn parses_source_location(#[case] location: &str, #[case] expected: Source) {
        assert_eq!(Source::parse(location), expected);
    }

    #[test]
    fn parses_rows_and_tolerates_bad_timestamps() {
        let (records, report) = parse_records(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.bad_updated_at, 1);
        assert_eq!(report.blank_updated_at, 0);
        assert_eq!(report.bad_last_order_at, 0);
        assert_eq!(report.blank_last_order_at, 1);
        assert_eq!(report.unknown_levels, 1);

        assert_eq!(records[0].customer_id.as_deref(), Some("c1"));
        assert_eq!(records[1].confirmed_orders, Some(2));
        assert_eq!(records[1].canceled_orders, Some(1));
        assert!(records[1].last_confirmed_order_at.is_none());
        assert!(records[2].updated_at.is_none());
        assert!(records[2].last_confirmed_order_at.is_some());
        assert_eq!(records[2].classification, "VIP");
    }

    #[test]
    fn tolerates_byte_order_mark() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(SAMPLE.as_bytes());
        let (records, _) = parse_records(&bytes).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].customer_id.as_deref(), Some("c1"));
    }

    #[test]
    fn missing_column_fails_load() {
        let csv = indoc! {"
            classificacao,pedidos_confirmados,estado,cidade,atualizado_em,ultimo_pedido_confirmado
            1ª Compra,1,SP,Santos,01/01/2024 10:00,
        "};
        let err = parse_records(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn("pedidos_cancelados")));
    }

    #[test]
    fn non_numeric_count_fails_load() {
        let csv = indoc! {"
            classificacao,pedidos_confirmados,pedidos_cancelados,estado,cidade,atualizado_em,ultimo_pedido_confirmado
            1ª Compra,1,0,SP,Santos,01/01/2024 10:00,
            2ª Compra,many,0,SP,Santos,01/01/2024 10:00,
        "};
        let err = parse_records(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::InvalidCount { row: 3, column: "pedidos_confirmados", .. }
        ));
    }

    #[test]
    fn blank_count_is_missing_not_zero() {
        let csv = indoc! {"
            classificacao,pedidos_confirmados,pedidos_cancelados,estado,cidade,atualizado_em,ultimo_pedido_confirmado
            1ª Compra,,2,SP,Santos,01/01/2024 10:00,
        "};
        let (records, _) = parse_records(csv.as_bytes()).unwrap();
        assert_eq!(records[0].confirmed_orders, None);
        assert_eq!(records[0].canceled_orders, Some(2));
    }

    #[test]
    fn remote_source_is_served_from_cache_within_ttl() {
        let fetcher = CountingFetcher::new(SAMPLE);
        let mut cache = DatasetCache::new(&fetcher, DEFAULT_CACHE_TTL);
        let source = Source::parse(DRIVE_URL);

        let first = cache.load(&source).unwrap();
        let second = cache.load(&source).unwrap();

        assert_eq!(fetcher.calls.get(), 1);
        assert_eq!(
            *fetcher.urls.borrow(),
            ["https://drive.google.com/uc?export=download&id=abc123XYZ"]
        );
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn expired_entry_is_refetched() {
        let fetcher = CountingFetcher::new(SAMPLE);
        let mut cache = DatasetCache::new(&fetcher, Duration::ZERO);
        let source = Source::parse(DRIVE_URL);

        cache.load(&source).unwrap();
        cache.load(&source).unwrap();
        assert_eq!(fetcher.calls.get(), 2);
    }

    #[test]
    fn cache_is_keyed_by_location() {
        let fetcher = CountingFetcher::new(SAMPLE);
        let mut cache = DatasetCache::new(&fetcher, DEFAULT_CACHE_TTL);
        cache.load(&Source::parse(DRIVE_URL)).unwrap();
        cache
            .load(&Source::parse("https://drive.google.com/file/d/other/view"))
            .unwrap();
        assert_eq!(fetcher.calls.get(), 2);

        cache.clear();
        cache.load(&Source::parse(DRIVE_URL)).unwrap();
        assert_eq!(fetcher.calls.get(), 3);
    }

    #[test]
    fn unavailable_source_is_reported() {
        let mut cache = DatasetCache::new(FailingFetcher, DEFAULT_CACHE_TTL);
        let err = cache.load(&Source::parse(DRIVE_URL)).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn local_source_is_reread_every_call() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let fetcher = CountingFetcher::new("");
        let mut cache = DatasetCache::new(&fetcher, DEFAULT_CACHE_TTL);
        let source = Source::Local(file.path().to_path_buf());
        assert_eq!(cache.load(&source).unwrap().len(), 3);

        let extra = "c4,4ª Compra,4,0,MG,Belo Horizonte,03/03/2024 08:00,\n";
        file.write_all(extra.as_bytes()).unwrap();
        file.flush().unwrap();

        assert_eq!(cache.load(&source).unwrap().len(), 4);
        assert_eq!(fetcher.calls.get(), 0);
    }

    #[test]
    fn missing_local_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_local(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn padded_headers_still_map_to_fields() {
        let csv = indoc! {"
            classificacao , pedidos_confirmados,pedidos_cancelados, estado,cidade ,atualizado_em,ultimo_pedido_confirmado
            1ª Compra,1,0,SP,Santos,01/01/2024 10:00,
        "};
        let (records, _) = parse_records(csv.as_bytes()).unwrap();
        assert_eq!(records[0].classification, "1ª Compra");
        assert_eq!(records[0].confirmed_orders, Some(1));
        assert_eq!(records[0].state.as_deref(), Some("SP"));
        assert_eq!(records[0].city.as_deref(), Some("Santos"));
    }

    #[test]
    fn error_status_maps_to_source_unavailable() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
        );
        let err = loopback_fetcher().fetch(&url).unwrap_err();
        match err {
            LoadError::SourceUnavailable { status, url: failed } => {
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
                assert_eq!(failed, url);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn success_status_returns_body() {
        let body = "classificacao,pedidos_confirmados\n";
        let url = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ));
        let bytes = loopback_fetcher().fetch(&url).unwrap();
        assert_eq!(bytes, body.as_bytes());
    }
}
