use chrono::NaiveDate;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::entities::Settings;
use crate::error::Result;

/// Bumped whenever `setup_database` changes the schema.
pub const SCHEMA_VERSION: i64 = 2;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Case-insensitive collation that folds the whole of Unicode, not just ASCII.
pub const UNICODE_NOCASE: &str = "UNICODE_NOCASE";

/// Scalar `unicode_lower(text)`; search predicates compare folded names with it.
pub const UNICODE_LOWER: &str = "unicode_lower";

/// Open (or create) the database file and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    // WAL for crash recovery; in-memory databases ignore it
    conn.pragma_update(None, "journal_mode", "WAL")?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database opened");
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(conn)
}

/// Install the collation and scalar function the schema and searches rely on.
///
/// Both live on the connection, not in the file, so every connection that
/// touches the tables has to go through this first.
pub fn register_text_functions(conn: &Connection) -> Result<()> {
    conn.create_collation(UNICODE_NOCASE, |a: &str, b: &str| {
        a.to_lowercase().cmp(&b.to_lowercase())
    })?;
    conn.create_scalar_function(
        UNICODE_LOWER,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )?;
    Ok(())
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    register_text_functions(conn)?;
    // Cascades below depend on this; SQLite leaves it off per connection
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Categories
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL COLLATE UNICODE_NOCASE
        )",
        [],
    )?;

    // ==========================================================================
    // Shops (one category each)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shops (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            name TEXT NOT NULL COLLATE UNICODE_NOCASE
        )",
        [],
    )?;

    // ==========================================================================
    // Cards
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            number TEXT NOT NULL DEFAULT '',
            payment_system TEXT,
            holder TEXT NOT NULL DEFAULT '',
            validity_period TEXT NOT NULL DEFAULT '',
            cvv TEXT NOT NULL DEFAULT '',
            pin TEXT NOT NULL DEFAULT '',
            max_cashbacks_number INTEGER
        )",
        [],
    )?;

    // ==========================================================================
    // Cashbacks (owned by exactly one of category / shop)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cashbacks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id INTEGER REFERENCES categories(id) ON DELETE CASCADE,
            shop_id INTEGER REFERENCES shops(id) ON DELETE CASCADE,
            bank_card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            amount REAL NOT NULL,
            measure_unit TEXT NOT NULL,
            start_date TEXT,
            expiration_date TEXT,
            comment TEXT NOT NULL DEFAULT '',
            CHECK ((category_id IS NULL) <> (shop_id IS NULL))
        )",
        [],
    )?;

    // ==========================================================================
    // Settings (single row, id = 1)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            color_theme TEXT NOT NULL,
            dynamic_color INTEGER NOT NULL,
            auto_delete_expired_cashbacks INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Background job bookkeeping
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS job_runs (
            job TEXT PRIMARY KEY,
            last_run TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name
         ON categories(name COLLATE UNICODE_NOCASE)",
        [],
    )?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_shops_category_name
         ON shops(category_id, name COLLATE UNICODE_NOCASE)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_shops_category ON shops(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cashbacks_card ON cashbacks(bank_card_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cashbacks_category ON cashbacks(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cashbacks_shop ON cashbacks(shop_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cashbacks_expiration ON cashbacks(expiration_date)",
        [],
    )?;

    let defaults = Settings::default();
    conn.execute(
        "INSERT OR IGNORE INTO settings (id, color_theme, dynamic_color, auto_delete_expired_cashbacks)
         VALUES (1, ?1, ?2, ?3)",
        rusqlite::params![
            defaults.color_theme.as_str(),
            defaults.dynamic_color,
            defaults.auto_delete_expired_cashbacks,
        ],
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    debug!(version = SCHEMA_VERSION, "schema ready");

    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i64> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

// ============================================================================
// Date columns (ISO text so comparisons are lexicographic)
// ============================================================================

pub fn date_to_sql(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

pub fn date_from_sql(column: usize, value: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    value
        .map(|text| {
            NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
            })
        })
        .transpose()
}
