// Entity Models
//
// Plain value types for the domain's nouns. Identity is the SQLite rowid
// assigned on insert; a value with `id == 0` has not been persisted yet.

pub mod card;
pub mod cashback;
pub mod category;
pub mod settings;
pub mod shop;

pub use card::{BankCard, PaymentSystem};
pub use cashback::{Cashback, CashbackDetails, CashbackOwner, DateRange, MeasureUnit};
pub use category::{Category, CategoryPreview};
pub use settings::{ColorTheme, Settings};
pub use shop::{Shop, ShopPreview};

use crate::error::{CashbackError, Result};

/// Trim a user-supplied name and reject it when nothing is left.
pub fn normalize_name(kind: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CashbackError::Validation(format!("{} name must not be empty", kind)));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_trims() {
        assert_eq!(normalize_name("Shop", "  Ozon ").unwrap(), "Ozon");
    }

    #[test]
    fn test_normalize_name_rejects_blank() {
        let err = normalize_name("Category", "   ").unwrap_err();
        assert!(matches!(err, CashbackError::Validation(_)));
        assert!(err.to_string().contains("Category name"));
    }
}
