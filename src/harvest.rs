use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::debug;

use crate::api::FetchPage;
use crate::db;
use crate::normalize::{extract_rows, LicenseRow};
use crate::pager::PageIter;

pub const ALL_PREFIXES: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

pub struct HarvestOptions {
    pub prefixes: Vec<char>,
    pub page_size: u32,
    pub page_delay: Duration,
    /// Scan every page of every prefix instead of stopping a prefix on the
    /// first page that brings no new license numbers. The early stop assumes
    /// the registry appends roughly in order; exhaustive mode trades API load
    /// for complete coverage.
    pub exhaustive: bool,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        HarvestOptions {
            prefixes: ALL_PREFIXES.to_vec(),
            page_size: 100,
            page_delay: Duration::from_millis(200),
            exhaustive: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct HarvestSummary {
    pub new_rows: usize,
    pub pages: usize,
    pub missing_identity: usize,
}

/// Drain every requested prefix, upserting each page as it arrives.
///
/// Every fetched page is persisted in full (known license numbers included,
/// so changed fields are never lost); the "new rows" count only feeds
/// progress lines and the early-stop decision.
pub fn run<F: FetchPage>(
    conn: &Connection,
    fetcher: &F,
    opts: &HarvestOptions,
) -> Result<HarvestSummary> {
    let mut summary = HarvestSummary::default();

    let pb = ProgressBar::new(opts.prefixes.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} prefixes")?
            .progress_chars("=> "),
    );

    for &prefix in &opts.prefixes {
        for page in PageIter::new(fetcher, prefix, opts.page_size, opts.page_delay) {
            summary.pages += 1;
            let rows = extract_rows(&page)?;

            let (keyed, unkeyed): (Vec<&LicenseRow>, Vec<&LicenseRow>) =
                rows.iter().partition(|r| r.license_number.is_some());
            if !unkeyed.is_empty() {
                debug!(prefix = %prefix, count = unkeyed.len(), "records without license number");
                summary.missing_identity += unkeyed.len();
            }

            let keys: Vec<&str> = keyed
                .iter()
                .filter_map(|r| r.license_number.as_deref())
                .collect();
            let existing = db::existing_licenses(conn, &keys)?;
            let new_count = keys.iter().filter(|k| !existing.contains(**k)).count();

            db::upsert_licenses(conn, &keyed)?;

            if new_count > 0 {
                summary.new_rows += new_count;
                pb.println(format!(
                    "{}: {} new | total {}",
                    prefix, new_count, summary.new_rows
                ));
            } else if !opts.exhaustive {
                pb.println(format!("{}: no new rows, moving on", prefix));
                break;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(summary)
}

/// Parse a CLI prefix list like "abc" into uppercase partition keys.
pub fn parse_prefixes(raw: &str) -> Result<Vec<char>> {
    let mut prefixes = Vec::new();
    for c in raw.chars() {
        if !c.is_ascii_alphabetic() {
            anyhow::bail!("invalid prefix {c:?}: prefixes are letters A-Z");
        }
        let upper = c.to_ascii_uppercase();
        if !prefixes.contains(&upper) {
            prefixes.push(upper);
        }
    }
    if prefixes.is_empty() {
        anyhow::bail!("prefix list is empty");
    }
    Ok(prefixes)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FetchError, Page};
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn record(license: &str, name: &str) -> Value {
        json!({
            "licenseNumber": {"value": license},
            "name": name,
            "profession": "REGISTERED PROFESSIONAL NURSE",
            "city": "Albany",
            "state": "NY",
            "dateOfLicensure": "January 5, 2020",
        })
    }

    /// Fake registry: fixed record lists per prefix, paged on demand.
    struct FakeRegistry {
        by_prefix: HashMap<char, Vec<Value>>,
        requests: RefCell<usize>,
    }

    impl FakeRegistry {
        fn new(by_prefix: HashMap<char, Vec<Value>>) -> Self {
            FakeRegistry {
                by_prefix,
                requests: RefCell::new(0),
            }
        }
    }

    impl FetchPage for FakeRegistry {
        fn fetch_page(
            &self,
            prefix: char,
            page_number: u32,
            page_size: u32,
        ) -> Result<Page, FetchError> {
            *self.requests.borrow_mut() += 1;
            let records = self.by_prefix.get(&prefix).cloned().unwrap_or_default();
            let start = (page_number * page_size) as usize;
            let content: Vec<Value> = records
                .into_iter()
                .skip(start)
                .take(page_size as usize)
                .collect();
            Ok(Page {
                content: Some(content),
                total_pages: None,
            })
        }
    }

    fn opts(prefixes: &str, page_size: u32) -> HarvestOptions {
        HarvestOptions {
            prefixes: prefixes.chars().collect(),
            page_size,
            page_delay: Duration::ZERO,
            exhaustive: false,
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    fn count(conn: &Connection) -> usize {
        conn.query_row("SELECT COUNT(*) FROM licenses", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn harvests_across_prefixes_and_pages() {
        let registry = FakeRegistry::new(HashMap::from([
            ('A', (0..5).map(|i| record(&format!("A{i:04}"), "ADAMS")).collect()),
            ('B', (0..3).map(|i| record(&format!("B{i:04}"), "BAKER")).collect()),
        ]));
        let conn = test_conn();

        let summary = run(&conn, &registry, &opts("AB", 2)).unwrap();
        assert_eq!(summary.new_rows, 8);
        assert_eq!(count(&conn), 8);
    }

    #[test]
    fn second_run_is_idempotent_and_stops_early() {
        let registry = FakeRegistry::new(HashMap::from([(
            'A',
            (0..6).map(|i| record(&format!("A{i:04}"), "ADAMS")).collect(),
        )]));
        let conn = test_conn();

        let first = run(&conn, &registry, &opts("A", 2)).unwrap();
        assert_eq!(first.new_rows, 6);

        let before_requests = *registry.requests.borrow();
        let second = run(&conn, &registry, &opts("A", 2)).unwrap();
        assert_eq!(second.new_rows, 0);
        assert_eq!(count(&conn), 6);
        // Early stop: the all-duplicate first page ends the prefix.
        assert_eq!(*registry.requests.borrow() - before_requests, 1);
    }

    #[test]
    fn duplicate_page_is_still_upserted_before_stopping() {
        let registry = FakeRegistry::new(HashMap::from([(
            'A',
            vec![record("A0001", "OLD NAME")],
        )]));
        let conn = test_conn();
        run(&conn, &registry, &opts("A", 100)).unwrap();

        // Same license re-observed with a changed name.
        let renamed = FakeRegistry::new(HashMap::from([(
            'A',
            vec![record("A0001", "NEW NAME")],
        )]));
        let summary = run(&conn, &renamed, &opts("A", 100)).unwrap();
        assert_eq!(summary.new_rows, 0);

        let name: String = conn
            .query_row(
                "SELECT name FROM licenses WHERE license_number = 'A0001'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(name, "NEW NAME");
    }

    #[test]
    fn exhaustive_mode_scans_every_page() {
        let registry = FakeRegistry::new(HashMap::from([(
            'A',
            (0..6).map(|i| record(&format!("A{i:04}"), "ADAMS")).collect(),
        )]));
        let conn = test_conn();
        run(&conn, &registry, &opts("A", 2)).unwrap();

        let mut exhaustive = opts("A", 2);
        exhaustive.exhaustive = true;
        let before_requests = *registry.requests.borrow();
        run(&conn, &registry, &exhaustive).unwrap();
        // All three data pages plus the terminating empty page.
        assert_eq!(*registry.requests.borrow() - before_requests, 4);
    }

    #[test]
    fn records_without_identity_are_counted_not_stored() {
        let registry = FakeRegistry::new(HashMap::from([(
            'A',
            vec![record("A0001", "ADAMS"), json!({"name": "NO LICENSE"})],
        )]));
        let conn = test_conn();

        let summary = run(&conn, &registry, &opts("A", 100)).unwrap();
        assert_eq!(summary.new_rows, 1);
        assert_eq!(summary.missing_identity, 1);
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn malformed_date_aborts_the_run() {
        let registry = FakeRegistry::new(HashMap::from([(
            'A',
            vec![json!({"licenseNumber": "A0001", "dateOfLicensure": "13/45/2020"})],
        )]));
        let conn = test_conn();
        assert!(run(&conn, &registry, &opts("A", 100)).is_err());
    }

    #[test]
    fn parse_prefixes_normalizes_and_validates() {
        assert_eq!(parse_prefixes("abC").unwrap(), vec!['A', 'B', 'C']);
        assert_eq!(parse_prefixes("AAB").unwrap(), vec!['A', 'B']);
        assert!(parse_prefixes("A1").is_err());
        assert!(parse_prefixes("").is_err());
    }
}
