use rusqlite::{params, Connection, Row};

use super::{like_pattern, map_lookup_error, map_write_error};
use crate::entities::{Category, CategoryPreview};
use crate::error::{CashbackError, Result};

const PREVIEW_SELECT: &str = "
    SELECT c.id, c.name,
           (SELECT COUNT(*) FROM shops s WHERE s.category_id = c.id),
           (SELECT COUNT(*) FROM cashbacks cb WHERE cb.category_id = c.id)
    FROM categories c";

fn preview_from_row(row: &Row<'_>) -> rusqlite::Result<CategoryPreview> {
    Ok(CategoryPreview {
        id: row.get(0)?,
        name: row.get(1)?,
        shops_count: row.get(2)?,
        cashbacks_count: row.get(3)?,
    })
}

/// Insert a category and return its new id.
pub fn insert(conn: &Connection, category: &Category) -> Result<i64> {
    conn.execute("INSERT INTO categories (name) VALUES (?1)", params![category.name])
        .map_err(|e| map_write_error(e, &format!("category '{}'", category.name)))?;
    Ok(conn.last_insert_rowid())
}

pub fn update(conn: &Connection, category: &Category) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE categories SET name = ?1 WHERE id = ?2",
            params![category.name, category.id],
        )
        .map_err(|e| map_write_error(e, &format!("category '{}'", category.name)))?;

    if changed == 0 {
        return Err(CashbackError::not_found("Category", category.id));
    }
    Ok(())
}

/// Delete a category; its shops and cashbacks go with it.
pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(CashbackError::not_found("Category", id));
    }
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Category> {
    conn.query_row(
        "SELECT id, name FROM categories WHERE id = ?1",
        params![id],
        |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )
    .map_err(|e| map_lookup_error(e, "Category", id))
}

pub fn fetch_all(conn: &Connection) -> Result<Vec<CategoryPreview>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY c.name COLLATE UNICODE_NOCASE", PREVIEW_SELECT))?;
    let categories = stmt
        .query_map([], preview_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

/// Categories that carry at least one cashback, directly or through a shop.
pub fn fetch_with_cashbacks(conn: &Connection) -> Result<Vec<CategoryPreview>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE EXISTS (SELECT 1 FROM cashbacks cb WHERE cb.category_id = c.id)
            OR EXISTS (SELECT 1 FROM cashbacks cb JOIN shops s ON s.id = cb.shop_id
                       WHERE s.category_id = c.id)
         ORDER BY c.name COLLATE UNICODE_NOCASE",
        PREVIEW_SELECT
    ))?;
    let categories = stmt
        .query_map([], preview_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

pub fn search(conn: &Connection, query: &str) -> Result<Vec<CategoryPreview>> {
    let Some(pattern) = like_pattern(query) else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(&format!(
        "{} WHERE unicode_lower(c.name) LIKE ?1 ESCAPE '\\' ORDER BY c.name COLLATE UNICODE_NOCASE",
        PREVIEW_SELECT
    ))?;
    let categories = stmt
        .query_map(params![pattern], preview_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

pub fn count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;
    Ok(count)
}
