use std::collections::HashSet;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::normalize::LicenseRow;

// SQLite caps bound parameters per statement; stay well under it.
const SELECT_CHUNK: usize = 500;

pub fn connect() -> Result<Connection> {
    let path = std::env::var("ROSA_DB_PATH")
        .context("ROSA_DB_PATH environment variable must be set")?;
    let conn = Connection::open(&path).with_context(|| format!("Failed to open {path}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS licenses (
            license_number    TEXT PRIMARY KEY,
            name              TEXT,
            profession        TEXT,
            address           TEXT,
            date_of_licensure TEXT
        );
        ",
    )?;
    Ok(())
}

/// Which of the given license numbers are already stored.
///
/// Used for progress reporting and the early-stop heuristic only — writes
/// always go through [`upsert_licenses`] regardless of this answer.
pub fn existing_licenses(conn: &Connection, keys: &[&str]) -> Result<HashSet<String>> {
    let mut existing = HashSet::new();
    for chunk in keys.chunks(SELECT_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT license_number FROM licenses WHERE license_number IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
            row.get::<_, String>(0)
        })?;
        for row in rows {
            existing.insert(row?);
        }
    }
    Ok(existing)
}

/// Upsert a batch of keyed rows in one transaction.
///
/// Re-writing an unchanged row is a no-op in effect; a known license number
/// with different field values gets all non-key columns overwritten. Callers
/// must filter out rows without a license number first.
pub fn upsert_licenses(conn: &Connection, rows: &[&LicenseRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO licenses (license_number, name, profession, address, date_of_licensure)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(license_number) DO UPDATE SET
                 name = excluded.name,
                 profession = excluded.profession,
                 address = excluded.address,
                 date_of_licensure = excluded.date_of_licensure",
        )?;
        for row in rows {
            stmt.execute(rusqlite::params![
                row.license_number,
                row.name,
                row.profession,
                row.address,
                row.date_of_licensure.map(|d| d.to_string()),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub with_address: usize,
    pub with_date: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM licenses", [], |r| r.get(0))?;
    let with_address: usize = conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE address IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let with_date: usize = conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE date_of_licensure IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        total,
        with_address,
        with_date,
    })
}

// ── Tests ──
