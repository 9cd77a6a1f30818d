// CSV export
//
// Writes one CSV per table plus a manifest with row counts and SHA-256
// digests, so a copy of the directory can be checked later.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::entities::CashbackOwner;
use crate::error::Result;
use crate::repository::{card, cashback, category, shop};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub file: String,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub app_version: String,
    pub exported_at: DateTime<Utc>,
    pub files: Vec<ExportedFile>,
}

impl ExportManifest {
    pub fn file(&self, name: &str) -> Option<&ExportedFile> {
        self.files.iter().find(|f| f.file == name)
    }
}

#[derive(Serialize)]
struct CategoryRecord<'a> {
    id: i64,
    name: &'a str,
    shops_count: i64,
    cashbacks_count: i64,
}

#[derive(Serialize)]
struct ShopRecord<'a> {
    id: i64,
    name: &'a str,
    category_id: i64,
    category_name: &'a str,
}

/// Card columns; CVV and PIN are never exported.
#[derive(Serialize)]
struct CardRecord<'a> {
    id: i64,
    name: &'a str,
    number: &'a str,
    payment_system: Option<&'static str>,
    holder: &'a str,
    validity_period: &'a str,
    max_cashbacks_number: Option<u32>,
}

#[derive(Serialize)]
struct CashbackRecord<'a> {
    id: i64,
    owner_type: &'static str,
    owner_id: i64,
    owner_name: &'a str,
    bank_card_id: i64,
    card_name: &'a str,
    amount: f64,
    measure_unit: &'a str,
    start_date: Option<String>,
    expiration_date: Option<String>,
    comment: &'a str,
}

/// Export every table into `dir` (created if missing) and return the manifest.
pub fn export_to_dir(conn: &Connection, dir: &Path) -> Result<ExportManifest> {
    fs::create_dir_all(dir)?;
    let mut files = Vec::new();

    let categories = category::fetch_all(conn)?;
    files.push(write_csv(
        dir,
        "categories.csv",
        categories.iter().map(|c| CategoryRecord {
            id: c.id,
            name: &c.name,
            shops_count: c.shops_count,
            cashbacks_count: c.cashbacks_count,
        }),
    )?);

    let shops = shop::fetch_all(conn)?;
    files.push(write_csv(
        dir,
        "shops.csv",
        shops.iter().map(|s| ShopRecord {
            id: s.id,
            name: &s.name,
            category_id: s.category_id,
            category_name: &s.category_name,
        }),
    )?);

    let cards = card::fetch_all(conn)?;
    files.push(write_csv(
        dir,
        "cards.csv",
        cards.iter().map(|c| CardRecord {
            id: c.id,
            name: &c.name,
            number: &c.number,
            payment_system: c.payment_system.map(|p| p.as_str()),
            holder: &c.holder,
            validity_period: &c.validity_period,
            max_cashbacks_number: c.max_cashbacks_number,
        }),
    )?);

    let cashbacks = cashback::fetch_all(conn)?;
    files.push(write_csv(
        dir,
        "cashbacks.csv",
        cashbacks.iter().map(|details| {
            let cb = &details.cashback;
            CashbackRecord {
                id: cb.id,
                owner_type: match cb.owner {
                    CashbackOwner::Category(_) => "category",
                    CashbackOwner::Shop(_) => "shop",
                },
                owner_id: cb.owner.id(),
                owner_name: &details.owner_name,
                bank_card_id: cb.bank_card_id,
                card_name: &details.card_name,
                amount: cb.amount,
                measure_unit: cb.measure_unit.as_db_str(),
                start_date: cb.start_date.map(|d| d.to_string()),
                expiration_date: cb.expiration_date.map(|d| d.to_string()),
                comment: &cb.comment,
            }
        }),
    )?);

    let manifest = ExportManifest {
        app_version: crate::VERSION.to_string(),
        exported_at: Utc::now(),
        files,
    };
    fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;

    info!(
        dir = %dir.display(),
        categories = categories.len(),
        shops = shops.len(),
        cards = cards.len(),
        cashbacks = cashbacks.len(),
        "export written"
    );
    Ok(manifest)
}

fn write_csv<T, I>(dir: &Path, name: &str, records: I) -> Result<ExportedFile>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let path = dir.join(name);
    let mut writer = csv::Writer::from_path(&path)?;
    let mut rows = 0;
    for record in records {
        writer.serialize(record)?;
        rows += 1;
    }
    writer.flush()?;
    drop(writer);

    Ok(ExportedFile {
        file: name.to_string(),
        rows,
        sha256: file_digest(&path)?,
    })
}

/// Hex SHA-256 of a file's contents.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(fs::read(path)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recompute digests and return the names of files that no longer match.
pub fn verify_export(dir: &Path) -> Result<Vec<String>> {
    let manifest: ExportManifest = serde_json::from_str(&fs::read_to_string(dir.join(MANIFEST_FILE))?)?;
    let mut mismatched = Vec::new();
    for file in &manifest.files {
        let path = dir.join(&file.file);
        if !path.exists() || file_digest(&path)? != file.sha256 {
            mismatched.push(file.file.clone());
        }
    }
    Ok(mismatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::{BankCard, Cashback, MeasureUnit, Shop};
    use tempfile::tempdir;

    fn seeded() -> Connection {
        let conn = open_in_memory().unwrap();
        let category_id = category::insert(&conn, &crate::entities::Category::new("Food").unwrap()).unwrap();
        let shop_id = shop::insert(&conn, &Shop::new(category_id, "Bakery").unwrap()).unwrap();

        let mut secret = BankCard::new("Main").unwrap().with_number("4111111111111111");
        secret.cvv = "987".to_string();
        secret.pin = "4321".to_string();
        let card_id = card::insert(&conn, &secret).unwrap();

        cashback::insert(
            &conn,
            &Cashback::new(CashbackOwner::Shop(shop_id), card_id, 5.0, MeasureUnit::Percent)
                .with_comment("weekends only"),
        )
        .unwrap();
        cashback::insert(
            &conn,
            &Cashback::new(
                CashbackOwner::Category(category_id),
                card_id,
                100.0,
                MeasureUnit::currency("RUB").unwrap(),
            ),
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_export_writes_files_and_manifest() {
        let conn = seeded();
        let dir = tempdir().unwrap();

        let manifest = export_to_dir(&conn, dir.path()).unwrap();
        assert_eq!(manifest.files.len(), 4);
        assert_eq!(manifest.file("categories.csv").unwrap().rows, 1);
        assert_eq!(manifest.file("cashbacks.csv").unwrap().rows, 2);
        assert!(dir.path().join(MANIFEST_FILE).exists());

        let cashbacks = fs::read_to_string(dir.path().join("cashbacks.csv")).unwrap();
        assert!(cashbacks.starts_with("id,owner_type,owner_id"));
        assert!(cashbacks.contains("weekends only"));
        assert!(cashbacks.contains("RUB"));
    }

    #[test]
    fn test_card_secrets_not_exported() {
        let conn = seeded();
        let dir = tempdir().unwrap();
        export_to_dir(&conn, dir.path()).unwrap();

        let cards = fs::read_to_string(dir.path().join("cards.csv")).unwrap();
        let header = cards.lines().next().unwrap();
        assert!(!header.contains("cvv"));
        assert!(!header.contains("pin"));
        assert!(!cards.contains("987"));
        assert!(!cards.contains("4321"));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let conn = seeded();
        let dir = tempdir().unwrap();
        export_to_dir(&conn, dir.path()).unwrap();
        assert!(verify_export(dir.path()).unwrap().is_empty());

        fs::write(dir.path().join("shops.csv"), "id,name\n1,Changed\n").unwrap();
        assert_eq!(verify_export(dir.path()).unwrap(), vec!["shops.csv".to_string()]);
    }

    #[test]
    fn test_export_empty_database() {
        let conn = open_in_memory().unwrap();
        let dir = tempdir().unwrap();
        let manifest = export_to_dir(&conn, &dir.path().join("nested")).unwrap();
        assert!(manifest.files.iter().all(|f| f.rows == 0));
    }
}
