use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use super::{like_pattern, map_lookup_error, map_write_error};
use crate::db::{date_from_sql, date_to_sql};
use crate::entities::{Cashback, CashbackDetails, CashbackOwner, DateRange, MeasureUnit};
use crate::error::{CashbackError, Result};

const CASHBACK_COLUMNS: &str = "cb.id, cb.category_id, cb.shop_id, cb.bank_card_id, cb.amount,
    cb.measure_unit, cb.start_date, cb.expiration_date, cb.comment";

const DETAILS_FROM: &str = "
    FROM cashbacks cb
    LEFT JOIN categories c ON c.id = cb.category_id
    LEFT JOIN shops s ON s.id = cb.shop_id
    JOIN cards k ON k.id = cb.bank_card_id";

const DETAILS_ORDER: &str = "ORDER BY COALESCE(c.name, s.name) COLLATE UNICODE_NOCASE, cb.amount DESC, cb.id";

fn cashback_from_row(row: &Row<'_>) -> rusqlite::Result<Cashback> {
    let category_id: Option<i64> = row.get(1)?;
    let shop_id: Option<i64> = row.get(2)?;
    let owner = CashbackOwner::from_columns(category_id, shop_id).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Integer,
            Box::new(CashbackError::Validation(
                "cashback must belong to exactly one category or shop".to_string(),
            )),
        )
    })?;

    let unit: String = row.get(5)?;
    let measure_unit = MeasureUnit::parse(&unit)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Cashback {
        id: row.get(0)?,
        owner,
        bank_card_id: row.get(3)?,
        amount: row.get(4)?,
        measure_unit,
        start_date: date_from_sql(6, row.get(6)?)?,
        expiration_date: date_from_sql(7, row.get(7)?)?,
        comment: row.get(8)?,
    })
}

fn details_from_row(row: &Row<'_>) -> rusqlite::Result<CashbackDetails> {
    Ok(CashbackDetails {
        cashback: cashback_from_row(row)?,
        owner_name: row.get(9)?,
        card_name: row.get(10)?,
        card_number: row.get(11)?,
    })
}

fn query_details(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CashbackDetails>> {
    let sql = format!(
        "SELECT {}, COALESCE(c.name, s.name), k.name, k.number {} {} {}",
        CASHBACK_COLUMNS, DETAILS_FROM, filter, DETAILS_ORDER
    );
    let mut stmt = conn.prepare(&sql)?;
    let cashbacks = stmt
        .query_map(params, details_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cashbacks)
}

fn query_plain(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> Result<Vec<Cashback>> {
    let sql = format!("SELECT {} FROM cashbacks cb {} ORDER BY cb.id", CASHBACK_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let cashbacks = stmt
        .query_map(params, cashback_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cashbacks)
}

// ============================================================================
// WRITES
// ============================================================================

pub fn insert(conn: &Connection, cashback: &Cashback) -> Result<i64> {
    let (category_id, shop_id) = cashback.owner.columns();
    conn.execute(
        "INSERT INTO cashbacks (
            category_id, shop_id, bank_card_id, amount, measure_unit,
            start_date, expiration_date, comment
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            category_id,
            shop_id,
            cashback.bank_card_id,
            cashback.amount,
            cashback.measure_unit.as_db_str(),
            date_to_sql(cashback.start_date),
            date_to_sql(cashback.expiration_date),
            cashback.comment,
        ],
    )
    .map_err(|e| map_write_error(e, "cashback"))?;
    Ok(conn.last_insert_rowid())
}

pub fn update(conn: &Connection, cashback: &Cashback) -> Result<()> {
    let (category_id, shop_id) = cashback.owner.columns();
    let changed = conn
        .execute(
            "UPDATE cashbacks SET
                category_id = ?1, shop_id = ?2, bank_card_id = ?3, amount = ?4,
                measure_unit = ?5, start_date = ?6, expiration_date = ?7, comment = ?8
             WHERE id = ?9",
            params![
                category_id,
                shop_id,
                cashback.bank_card_id,
                cashback.amount,
                cashback.measure_unit.as_db_str(),
                date_to_sql(cashback.start_date),
                date_to_sql(cashback.expiration_date),
                cashback.comment,
                cashback.id,
            ],
        )
        .map_err(|e| map_write_error(e, "cashback"))?;

    if changed == 0 {
        return Err(CashbackError::not_found("Cashback", cashback.id));
    }
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM cashbacks WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(CashbackError::not_found("Cashback", id));
    }
    Ok(())
}

/// Delete every cashback whose expiration date is before `today`.
pub fn delete_expired(conn: &Connection, today: NaiveDate) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM cashbacks WHERE expiration_date IS NOT NULL AND expiration_date < ?1",
        params![date_to_sql(Some(today))],
    )?;
    Ok(deleted)
}

// ============================================================================
// READS
// ============================================================================

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Cashback> {
    conn.query_row(
        &format!("SELECT {} FROM cashbacks cb WHERE cb.id = ?1", CASHBACK_COLUMNS),
        params![id],
        cashback_from_row,
    )
    .map_err(|e| map_lookup_error(e, "Cashback", id))
}

pub fn get_details(conn: &Connection, id: i64) -> Result<CashbackDetails> {
    query_details(conn, "WHERE cb.id = ?1", params![id])?
        .into_iter()
        .next()
        .ok_or_else(|| CashbackError::not_found("Cashback", id))
}

/// Cashbacks attached directly to the category (not through its shops).
pub fn fetch_by_category(conn: &Connection, category_id: i64) -> Result<Vec<CashbackDetails>> {
    query_details(conn, "WHERE cb.category_id = ?1", params![category_id])
}

pub fn fetch_by_shop(conn: &Connection, shop_id: i64) -> Result<Vec<CashbackDetails>> {
    query_details(conn, "WHERE cb.shop_id = ?1", params![shop_id])
}

pub fn fetch_by_card(conn: &Connection, card_id: i64) -> Result<Vec<CashbackDetails>> {
    query_details(conn, "WHERE cb.bank_card_id = ?1", params![card_id])
}

pub fn fetch_all(conn: &Connection) -> Result<Vec<CashbackDetails>> {
    query_details(conn, "", [])
}

/// Match on owner name, card name or comment.
pub fn search(conn: &Connection, query: &str) -> Result<Vec<CashbackDetails>> {
    let Some(pattern) = like_pattern(query) else {
        return Ok(Vec::new());
    };
    query_details(
        conn,
        "WHERE unicode_lower(c.name) LIKE ?1 ESCAPE '\\'
            OR unicode_lower(s.name) LIKE ?1 ESCAPE '\\'
            OR unicode_lower(k.name) LIKE ?1 ESCAPE '\\'
            OR unicode_lower(cb.comment) LIKE ?1 ESCAPE '\\'",
        params![pattern],
    )
}

/// The card's cashbacks whose validity window intersects `range`,
/// excluding `exclude_id` (the row being edited).
pub fn fetch_intersecting(
    conn: &Connection,
    card_id: i64,
    range: DateRange,
    exclude_id: Option<i64>,
) -> Result<Vec<Cashback>> {
    query_plain(
        conn,
        "WHERE cb.bank_card_id = ?1
           AND (?2 IS NULL OR cb.id <> ?2)
           AND (?3 IS NULL OR cb.expiration_date IS NULL OR cb.expiration_date >= ?3)
           AND (?4 IS NULL OR cb.start_date IS NULL OR cb.start_date <= ?4)",
        params![
            card_id,
            exclude_id,
            date_to_sql(range.start),
            date_to_sql(range.end),
        ],
    )
}

/// Existing row describing the same offer, if any.
pub fn find_duplicate(conn: &Connection, cashback: &Cashback) -> Result<Option<Cashback>> {
    let (category_id, shop_id) = cashback.owner.columns();
    let candidates = query_plain(
        conn,
        "WHERE cb.bank_card_id = ?1 AND cb.category_id IS ?2 AND cb.shop_id IS ?3",
        params![cashback.bank_card_id, category_id, shop_id],
    )?;
    Ok(candidates.into_iter().find(|existing| cashback.is_duplicate_of(existing)))
}

pub fn count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM cashbacks", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::{BankCard, Category, Shop};
    use crate::repository::{card, category, shop};

    struct Fixture {
        conn: Connection,
        category_id: i64,
        shop_id: i64,
        card_id: i64,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixture() -> Fixture {
        let conn = open_in_memory().unwrap();
        let category_id = category::insert(&conn, &Category::new("Restaurants").unwrap()).unwrap();
        let shop_id = shop::insert(&conn, &Shop::new(category_id, "Teremok").unwrap()).unwrap();
        let card_id = card::insert(&conn, &BankCard::new("Tinkoff").unwrap()).unwrap();
        Fixture {
            conn,
            category_id,
            shop_id,
            card_id,
        }
    }

    #[test]
    fn test_insert_and_get_details() {
        let f = fixture();
        let cashback = Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 7.0, MeasureUnit::Percent)
            .with_dates(Some(date(2024, 3, 1)), Some(date(2024, 3, 31)))
            .with_comment("weekends only");
        let id = insert(&f.conn, &cashback).unwrap();

        let details = get_details(&f.conn, id).unwrap();
        assert_eq!(details.owner_name, "Teremok");
        assert_eq!(details.card_name, "Tinkoff");
        assert_eq!(details.cashback.start_date, Some(date(2024, 3, 1)));
        assert_eq!(details.cashback.comment, "weekends only");
        assert_eq!(get_by_id(&f.conn, id).unwrap().owner, CashbackOwner::Shop(f.shop_id));
    }

    #[test]
    fn test_fetch_by_owner_and_card() {
        let f = fixture();
        insert(
            &f.conn,
            &Cashback::new(CashbackOwner::Category(f.category_id), f.card_id, 5.0, MeasureUnit::Percent),
        )
        .unwrap();
        insert(
            &f.conn,
            &Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 10.0, MeasureUnit::Percent),
        )
        .unwrap();

        assert_eq!(fetch_by_category(&f.conn, f.category_id).unwrap().len(), 1);
        assert_eq!(fetch_by_shop(&f.conn, f.shop_id).unwrap().len(), 1);
        assert_eq!(fetch_by_card(&f.conn, f.card_id).unwrap().len(), 2);
        assert_eq!(fetch_all(&f.conn).unwrap().len(), 2);
    }

    #[test]
    fn test_card_delete_cascades() {
        let f = fixture();
        insert(
            &f.conn,
            &Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 3.0, MeasureUnit::Percent),
        )
        .unwrap();

        card::delete(&f.conn, f.card_id).unwrap();
        assert_eq!(count(&f.conn).unwrap(), 0);
    }

    #[test]
    fn test_category_delete_cascades_through_shops() {
        let f = fixture();
        insert(
            &f.conn,
            &Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 3.0, MeasureUnit::Percent),
        )
        .unwrap();
        insert(
            &f.conn,
            &Cashback::new(CashbackOwner::Category(f.category_id), f.card_id, 1.0, MeasureUnit::Percent),
        )
        .unwrap();

        category::delete(&f.conn, f.category_id).unwrap();
        assert_eq!(count(&f.conn).unwrap(), 0);
    }

    #[test]
    fn test_delete_expired() {
        let f = fixture();
        let owner = CashbackOwner::Category(f.category_id);
        insert(
            &f.conn,
            &Cashback::new(owner, f.card_id, 1.0, MeasureUnit::Percent)
                .with_dates(None, Some(date(2024, 1, 31))),
        )
        .unwrap();
        insert(
            &f.conn,
            &Cashback::new(owner, f.card_id, 2.0, MeasureUnit::Percent)
                .with_dates(None, Some(date(2024, 2, 1))),
        )
        .unwrap();
        insert(&f.conn, &Cashback::new(owner, f.card_id, 3.0, MeasureUnit::Percent)).unwrap();

        let deleted = delete_expired(&f.conn, date(2024, 2, 1)).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(count(&f.conn).unwrap(), 2);
    }

    #[test]
    fn test_fetch_intersecting() {
        let f = fixture();
        let owner = CashbackOwner::Category(f.category_id);
        let jan = insert(
            &f.conn,
            &Cashback::new(owner, f.card_id, 1.0, MeasureUnit::Percent)
                .with_dates(Some(date(2024, 1, 1)), Some(date(2024, 1, 31))),
        )
        .unwrap();
        let open = insert(&f.conn, &Cashback::new(owner, f.card_id, 2.0, MeasureUnit::Percent)).unwrap();
        insert(
            &f.conn,
            &Cashback::new(owner, f.card_id, 3.0, MeasureUnit::Percent)
                .with_dates(Some(date(2024, 3, 1)), None),
        )
        .unwrap();

        let feb = DateRange::new(Some(date(2024, 2, 1)), Some(date(2024, 2, 29)));
        let found = fetch_intersecting(&f.conn, f.card_id, feb, None).unwrap();
        let ids: Vec<i64> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![open]);

        let january = DateRange::new(Some(date(2024, 1, 15)), Some(date(2024, 1, 20)));
        let found = fetch_intersecting(&f.conn, f.card_id, january, Some(jan)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, open);
    }

    #[test]
    fn test_search_matches_owner_card_and_comment() {
        let f = fixture();
        insert(
            &f.conn,
            &Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 5.0, MeasureUnit::Percent)
                .with_comment("lunch menu"),
        )
        .unwrap();

        assert_eq!(search(&f.conn, "teremok").unwrap().len(), 1);
        assert_eq!(search(&f.conn, "tink").unwrap().len(), 1);
        assert_eq!(search(&f.conn, "LUNCH").unwrap().len(), 1);
        assert!(search(&f.conn, "sushi").unwrap().is_empty());
    }

    #[test]
    fn test_search_folds_cyrillic_comment() {
        let f = fixture();
        insert(
            &f.conn,
            &Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 5.0, MeasureUnit::Percent)
                .with_comment("Только по СБП"),
        )
        .unwrap();

        assert_eq!(search(&f.conn, "сбп").unwrap().len(), 1);
        assert_eq!(search(&f.conn, "ТОЛЬКО").unwrap().len(), 1);
    }

    #[test]
    fn test_find_duplicate() {
        let f = fixture();
        let cashback = Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 5.0, MeasureUnit::Percent);
        insert(&f.conn, &cashback).unwrap();

        assert!(find_duplicate(&f.conn, &cashback).unwrap().is_some());

        let different = Cashback::new(CashbackOwner::Shop(f.shop_id), f.card_id, 6.0, MeasureUnit::Percent);
        assert!(find_duplicate(&f.conn, &different).unwrap().is_none());
    }

    #[test]
    fn test_missing_card_is_insertion_failure() {
        let f = fixture();
        let cashback = Cashback::new(CashbackOwner::Shop(f.shop_id), 999, 5.0, MeasureUnit::Percent);
        assert!(matches!(
            insert(&f.conn, &cashback),
            Err(CashbackError::InsertionFailed(_))
        ));
    }
}
