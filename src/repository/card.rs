use rusqlite::{params, Connection, Row};

use super::{like_pattern, map_lookup_error, map_write_error};
use crate::entities::{BankCard, PaymentSystem};
use crate::error::{CashbackError, Result};

const CARD_SELECT: &str = "
    SELECT id, name, number, payment_system, holder, validity_period, cvv, pin,
           max_cashbacks_number
    FROM cards";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<BankCard> {
    let payment_system: Option<String> = row.get(3)?;
    Ok(BankCard {
        id: row.get(0)?,
        name: row.get(1)?,
        number: row.get(2)?,
        payment_system: payment_system.as_deref().and_then(PaymentSystem::parse),
        holder: row.get(4)?,
        validity_period: row.get(5)?,
        cvv: row.get(6)?,
        pin: row.get(7)?,
        max_cashbacks_number: row.get(8)?,
    })
}

pub fn insert(conn: &Connection, card: &BankCard) -> Result<i64> {
    conn.execute(
        "INSERT INTO cards (
            name, number, payment_system, holder, validity_period, cvv, pin, max_cashbacks_number
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            card.name,
            card.number,
            card.payment_system.map(|s| s.as_str()),
            card.holder,
            card.validity_period,
            card.cvv,
            card.pin,
            card.max_cashbacks_number,
        ],
    )
    .map_err(|e| map_write_error(e, &format!("card '{}'", card.name)))?;
    Ok(conn.last_insert_rowid())
}

pub fn update(conn: &Connection, card: &BankCard) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE cards SET
                name = ?1, number = ?2, payment_system = ?3, holder = ?4,
                validity_period = ?5, cvv = ?6, pin = ?7, max_cashbacks_number = ?8
             WHERE id = ?9",
            params![
                card.name,
                card.number,
                card.payment_system.map(|s| s.as_str()),
                card.holder,
                card.validity_period,
                card.cvv,
                card.pin,
                card.max_cashbacks_number,
                card.id,
            ],
        )
        .map_err(|e| map_write_error(e, &format!("card '{}'", card.name)))?;

    if changed == 0 {
        return Err(CashbackError::not_found("Card", card.id));
    }
    Ok(())
}

/// Delete a card together with every cashback recorded against it.
pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM cards WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(CashbackError::not_found("Card", id));
    }
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<BankCard> {
    conn.query_row(&format!("{} WHERE id = ?1", CARD_SELECT), params![id], card_from_row)
        .map_err(|e| map_lookup_error(e, "Card", id))
}

pub fn fetch_all(conn: &Connection) -> Result<Vec<BankCard>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY name COLLATE UNICODE_NOCASE, id", CARD_SELECT))?;
    let cards = stmt
        .query_map([], card_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cards)
}

/// Match on name, holder, payment system or the trailing digits of the number.
pub fn search(conn: &Connection, query: &str) -> Result<Vec<BankCard>> {
    let Some(pattern) = like_pattern(query) else {
        return Ok(Vec::new());
    };
    // Only an all-digit query (spaces aside) is treated as a number suffix
    let digits: String = query.chars().filter(|c| !c.is_whitespace()).collect();
    let number_suffix = if digits.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("%{}", digits))
    } else {
        None
    };

    let mut stmt = conn.prepare(&format!(
        "{} WHERE unicode_lower(name) LIKE ?1 ESCAPE '\\'
            OR unicode_lower(holder) LIKE ?1 ESCAPE '\\'
            OR unicode_lower(payment_system) LIKE ?1 ESCAPE '\\'
            OR (?2 IS NOT NULL AND number LIKE ?2)
         ORDER BY name COLLATE UNICODE_NOCASE, id",
        CARD_SELECT
    ))?;
    let cards = stmt
        .query_map(params![pattern, number_suffix], card_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cards)
}
