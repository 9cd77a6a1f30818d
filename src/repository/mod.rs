// Repositories - one module per table
//
// Free functions over a borrowed `Connection` (or an open `Transaction`,
// which derefs to one). SQLite failures are translated into the
// `CashbackError` hierarchy here, so callers never match on rusqlite codes.

pub mod card;
pub mod cashback;
pub mod category;
pub mod job_runs;
pub mod settings;
pub mod shop;

use rusqlite::ffi;

use crate::error::CashbackError;

/// Lower-cased `LIKE` pattern for a substring search, or `None` for a blank
/// query. Match it against `unicode_lower(column)`, since `LIKE` alone only
/// folds ASCII.
pub(crate) fn like_pattern(query: &str) -> Option<String> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return None;
    }

    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

/// Map a failed INSERT/UPDATE onto the user-facing error kinds.
pub(crate) fn map_write_error(err: rusqlite::Error, what: &str) -> CashbackError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return CashbackError::EntryAlreadyExists(what.to_string());
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return CashbackError::InsertionFailed(format!("{}: referenced entry is missing", what));
            }
            ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => {
                return CashbackError::InsertionFailed(format!("{}: constraint violated", what));
            }
            _ => {}
        }
    }
    CashbackError::Database(err)
}

/// Turn `QueryReturnedNoRows` into `NotFound`.
pub(crate) fn map_lookup_error(err: rusqlite::Error, entity: &'static str, id: i64) -> CashbackError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => CashbackError::not_found(entity, id),
        other => CashbackError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ozon").as_deref(), Some("%ozon%"));
        assert_eq!(like_pattern(" 5% ").as_deref(), Some("%5\\%%"));
        assert_eq!(like_pattern("a_b").as_deref(), Some("%a\\_b%"));
        assert_eq!(like_pattern("   "), None);
        assert_eq!(like_pattern("ПЯТ").as_deref(), Some("%пят%"));
    }

    #[test]
    fn test_map_lookup_error() {
        let err = map_lookup_error(rusqlite::Error::QueryReturnedNoRows, "Shop", 3);
        assert!(matches!(err, CashbackError::NotFound { entity: "Shop", id: 3 }));
    }
}
