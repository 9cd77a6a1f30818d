use rusqlite::{params, Connection, Row};

use super::{like_pattern, map_lookup_error, map_write_error};
use crate::entities::{Shop, ShopPreview};
use crate::error::{CashbackError, Result};

const PREVIEW_SELECT: &str = "
    SELECT s.id, s.name, s.category_id, c.name,
           (SELECT COUNT(*) FROM cashbacks cb WHERE cb.shop_id = s.id)
    FROM shops s
    JOIN categories c ON c.id = s.category_id";

fn preview_from_row(row: &Row<'_>) -> rusqlite::Result<ShopPreview> {
    Ok(ShopPreview {
        id: row.get(0)?,
        name: row.get(1)?,
        category_id: row.get(2)?,
        category_name: row.get(3)?,
        cashbacks_count: row.get(4)?,
    })
}

pub fn insert(conn: &Connection, shop: &Shop) -> Result<i64> {
    conn.execute(
        "INSERT INTO shops (category_id, name) VALUES (?1, ?2)",
        params![shop.category_id, shop.name],
    )
    .map_err(|e| map_write_error(e, &format!("shop '{}'", shop.name)))?;
    Ok(conn.last_insert_rowid())
}

pub fn update(conn: &Connection, shop: &Shop) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE shops SET name = ?1, category_id = ?2 WHERE id = ?3",
            params![shop.name, shop.category_id, shop.id],
        )
        .map_err(|e| map_write_error(e, &format!("shop '{}'", shop.name)))?;

    if changed == 0 {
        return Err(CashbackError::not_found("Shop", shop.id));
    }
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM shops WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(CashbackError::not_found("Shop", id));
    }
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Shop> {
    conn.query_row(
        "SELECT id, name, category_id FROM shops WHERE id = ?1",
        params![id],
        |row| {
            Ok(Shop {
                id: row.get(0)?,
                name: row.get(1)?,
                category_id: row.get(2)?,
            })
        },
    )
    .map_err(|e| map_lookup_error(e, "Shop", id))
}

pub fn fetch_by_category(conn: &Connection, category_id: i64) -> Result<Vec<ShopPreview>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE s.category_id = ?1 ORDER BY s.name COLLATE UNICODE_NOCASE",
        PREVIEW_SELECT
    ))?;
    let shops = stmt
        .query_map(params![category_id], preview_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(shops)
}

pub fn fetch_all(conn: &Connection) -> Result<Vec<ShopPreview>> {
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY s.name COLLATE UNICODE_NOCASE, c.name COLLATE UNICODE_NOCASE",
        PREVIEW_SELECT
    ))?;
    let shops = stmt
        .query_map([], preview_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(shops)
}

pub fn search(conn: &Connection, query: &str) -> Result<Vec<ShopPreview>> {
    let Some(pattern) = like_pattern(query) else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(&format!(
        "{} WHERE unicode_lower(s.name) LIKE ?1 ESCAPE '\\' ORDER BY s.name COLLATE UNICODE_NOCASE",
        PREVIEW_SELECT
    ))?;
    let shops = stmt
        .query_map(params![pattern], preview_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(shops)
}
