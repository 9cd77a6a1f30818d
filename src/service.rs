// Use-cases
//
// One method per operation. Each locks the shared connection, forwards to
// the repository layer and logs the outcome; callers get a `CashbackError`
// they can show to the user as-is.

use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::entities::{
    BankCard, Cashback, CashbackDetails, CashbackOwner, Category, CategoryPreview, Settings, Shop,
    ShopPreview,
};
use crate::error::{CashbackError, Result};
use crate::overflow;
use crate::repository::{card, cashback, category, job_runs, settings, shop};

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Everything matching one query, grouped by kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub categories: Vec<CategoryPreview>,
    pub shops: Vec<ShopPreview>,
    pub cards: Vec<BankCard>,
    pub cashbacks: Vec<CashbackDetails>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
            && self.shops.is_empty()
            && self.cards.is_empty()
            && self.cashbacks.is_empty()
    }

    pub fn total(&self) -> usize {
        self.categories.len() + self.shops.len() + self.cards.len() + self.cashbacks.len()
    }
}

#[derive(Clone)]
pub struct CashbackService {
    conn: Arc<Mutex<Connection>>,
    clock: Clock,
}

impl CashbackService {
    pub fn new(conn: Connection) -> Self {
        Self::from_shared(Arc::new(Mutex::new(conn)))
    }

    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        CashbackService {
            conn,
            clock: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Replace the source of "today" (used by the limit check and cleanup).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDate + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run<T>(&self, operation: &'static str, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let result = match self.conn.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(_) => Err(CashbackError::LockPoisoned),
        };

        if let Err(err) = &result {
            error!(operation, user_error = err.is_user_error(), error = %err, "operation failed");
        }
        result
    }

    // ========================================================================
    // CATEGORIES
    // ========================================================================

    pub fn add_category(&self, name: &str) -> Result<i64> {
        let category = Category::new(name)?;
        self.run("add_category", |conn| {
            let id = category::insert(conn, &category)?;
            debug!(id, name = %category.name, "category added");
            Ok(id)
        })
    }

    pub fn rename_category(&self, id: i64, name: &str) -> Result<()> {
        let mut category = Category::new(name)?;
        category.id = id;
        self.run("rename_category", |conn| category::update(conn, &category))
    }

    /// Deletes the category with all of its shops and cashbacks.
    pub fn delete_category(&self, id: i64) -> Result<()> {
        self.run("delete_category", |conn| {
            category::delete(conn, id)?;
            info!(id, "category deleted");
            Ok(())
        })
    }

    pub fn get_category(&self, id: i64) -> Result<Category> {
        self.run("get_category", |conn| category::get_by_id(conn, id))
    }

    pub fn fetch_categories(&self) -> Result<Vec<CategoryPreview>> {
        self.run("fetch_categories", |conn| category::fetch_all(conn))
    }

    pub fn fetch_categories_with_cashbacks(&self) -> Result<Vec<CategoryPreview>> {
        self.run("fetch_categories_with_cashbacks", |conn| {
            category::fetch_with_cashbacks(conn)
        })
    }

    pub fn search_categories(&self, query: &str) -> Result<Vec<CategoryPreview>> {
        self.run("search_categories", |conn| category::search(conn, query))
    }

    // ========================================================================
    // SHOPS
    // ========================================================================

    pub fn add_shop(&self, category_id: i64, name: &str) -> Result<i64> {
        let shop = Shop::new(category_id, name)?;
        self.run("add_shop", |conn| {
            // NotFound reads better than a foreign-key failure here
            category::get_by_id(conn, category_id)?;
            let id = shop::insert(conn, &shop)?;
            debug!(id, category_id, name = %shop.name, "shop added");
            Ok(id)
        })
    }

    pub fn rename_shop(&self, id: i64, name: &str) -> Result<()> {
        self.update_shop(id, Some(name), None)
    }

    pub fn move_shop(&self, id: i64, category_id: i64) -> Result<()> {
        self.update_shop(id, None, Some(category_id))
    }

    /// Rename and/or move a shop as a single write; nothing changes if
    /// either part is rejected.
    pub fn update_shop(&self, id: i64, name: Option<&str>, category_id: Option<i64>) -> Result<()> {
        let name = name
            .map(|name| crate::entities::normalize_name("Shop", name))
            .transpose()?;
        self.run("update_shop", |conn| {
            let mut shop = shop::get_by_id(conn, id)?;
            if let Some(category_id) = category_id {
                category::get_by_id(conn, category_id)?;
                shop.category_id = category_id;
            }
            if let Some(name) = name {
                shop.name = name;
            }
            shop::update(conn, &shop)?;
            debug!(id, category_id = shop.category_id, name = %shop.name, "shop updated");
            Ok(())
        })
    }

    pub fn delete_shop(&self, id: i64) -> Result<()> {
        self.run("delete_shop", |conn| {
            shop::delete(conn, id)?;
            info!(id, "shop deleted");
            Ok(())
        })
    }

    pub fn get_shop(&self, id: i64) -> Result<Shop> {
        self.run("get_shop", |conn| shop::get_by_id(conn, id))
    }

    pub fn fetch_shops_from_category(&self, category_id: i64) -> Result<Vec<ShopPreview>> {
        self.run("fetch_shops_from_category", |conn| {
            category::get_by_id(conn, category_id)?;
            shop::fetch_by_category(conn, category_id)
        })
    }

    pub fn fetch_all_shops(&self) -> Result<Vec<ShopPreview>> {
        self.run("fetch_all_shops", |conn| shop::fetch_all(conn))
    }

    pub fn search_shops(&self, query: &str) -> Result<Vec<ShopPreview>> {
        self.run("search_shops", |conn| shop::search(conn, query))
    }

    // ========================================================================
    // CARDS
    // ========================================================================

    pub fn add_card(&self, card: BankCard) -> Result<i64> {
        let card = card.validated()?;
        self.run("add_card", |conn| {
            let id = card::insert(conn, &card)?;
            debug!(id, name = %card.name, "card added");
            Ok(id)
        })
    }

    pub fn update_card(&self, card: BankCard) -> Result<()> {
        let card = card.validated()?;
        self.run("update_card", |conn| card::update(conn, &card))
    }

    /// Deletes the card and every cashback recorded against it.
    pub fn delete_card(&self, id: i64) -> Result<()> {
        self.run("delete_card", |conn| {
            card::delete(conn, id)?;
            info!(id, "card deleted");
            Ok(())
        })
    }

    pub fn get_card(&self, id: i64) -> Result<BankCard> {
        self.run("get_card", |conn| card::get_by_id(conn, id))
    }

    pub fn fetch_cards(&self) -> Result<Vec<BankCard>> {
        self.run("fetch_cards", |conn| card::fetch_all(conn))
    }

    pub fn search_cards(&self, query: &str) -> Result<Vec<BankCard>> {
        self.run("search_cards", |conn| card::search(conn, query))
    }

    // ========================================================================
    // CASHBACKS
    // ========================================================================

    /// Validate, reject duplicates, enforce the card's monthly limit, insert.
    pub fn add_cashback(&self, cashback: Cashback) -> Result<i64> {
        let mut cashback = cashback.validated()?;
        cashback.id = 0;
        let today = self.today();

        self.run("add_cashback", |conn| {
            let tx = conn.transaction()?;
            ensure_cashback_allowed(&tx, &cashback, today)?;
            let id = cashback::insert(&tx, &cashback)?;
            tx.commit()?;
            debug!(id, owner = cashback.owner.kind(), card = cashback.bank_card_id, "cashback added");
            Ok(id)
        })
    }

    pub fn update_cashback(&self, cashback: Cashback) -> Result<()> {
        let cashback = cashback.validated()?;
        let today = self.today();

        self.run("update_cashback", |conn| {
            let tx = conn.transaction()?;
            cashback::get_by_id(&tx, cashback.id)?;
            ensure_cashback_allowed(&tx, &cashback, today)?;
            cashback::update(&tx, &cashback)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn delete_cashback(&self, id: i64) -> Result<()> {
        self.run("delete_cashback", |conn| cashback::delete(conn, id))
    }

    pub fn get_cashback(&self, id: i64) -> Result<CashbackDetails> {
        self.run("get_cashback", |conn| cashback::get_details(conn, id))
    }

    pub fn fetch_cashbacks_from_category(&self, category_id: i64) -> Result<Vec<CashbackDetails>> {
        self.run("fetch_cashbacks_from_category", |conn| {
            category::get_by_id(conn, category_id)?;
            cashback::fetch_by_category(conn, category_id)
        })
    }

    pub fn fetch_cashbacks_from_shop(&self, shop_id: i64) -> Result<Vec<CashbackDetails>> {
        self.run("fetch_cashbacks_from_shop", |conn| {
            shop::get_by_id(conn, shop_id)?;
            cashback::fetch_by_shop(conn, shop_id)
        })
    }

    pub fn fetch_cashbacks_from_card(&self, card_id: i64) -> Result<Vec<CashbackDetails>> {
        self.run("fetch_cashbacks_from_card", |conn| {
            card::get_by_id(conn, card_id)?;
            cashback::fetch_by_card(conn, card_id)
        })
    }

    pub fn fetch_all_cashbacks(&self) -> Result<Vec<CashbackDetails>> {
        self.run("fetch_all_cashbacks", |conn| cashback::fetch_all(conn))
    }

    pub fn search_cashbacks(&self, query: &str) -> Result<Vec<CashbackDetails>> {
        self.run("search_cashbacks", |conn| cashback::search(conn, query))
    }

    /// Remove cashbacks that expired before `today`; returns how many.
    pub fn delete_expired_cashbacks(&self, today: NaiveDate) -> Result<usize> {
        self.run("delete_expired_cashbacks", |conn| {
            let deleted = cashback::delete_expired(conn, today)?;
            if deleted > 0 {
                info!(deleted, %today, "expired cashbacks deleted");
            }
            Ok(deleted)
        })
    }

    // ========================================================================
    // SEARCH / SETTINGS
    // ========================================================================

    pub fn search_all(&self, query: &str) -> Result<SearchResults> {
        self.run("search_all", |conn| {
            Ok(SearchResults {
                categories: category::search(conn, query)?,
                shops: shop::search(conn, query)?,
                cards: card::search(conn, query)?,
                cashbacks: cashback::search(conn, query)?,
            })
        })
    }

    pub fn get_settings(&self) -> Result<Settings> {
        self.run("get_settings", |conn| settings::get(conn))
    }

    pub fn update_settings(&self, new_settings: Settings) -> Result<()> {
        self.run("update_settings", |conn| {
            settings::update(conn, &new_settings)?;
            debug!(?new_settings, "settings updated");
            Ok(())
        })
    }

    // ========================================================================
    // JOB BOOKKEEPING
    // ========================================================================

    pub fn last_job_run(&self, job: &str) -> Result<Option<DateTime<Utc>>> {
        self.run("last_job_run", |conn| job_runs::last_run(conn, job))
    }

    pub fn record_job_run(&self, job: &str, at: DateTime<Utc>) -> Result<()> {
        self.run("record_job_run", |conn| job_runs::record_run(conn, job, at))
    }
}

/// Checks shared by insert and update: owner and card exist, no identical
/// offer is already stored, and the card's monthly limit holds.
fn ensure_cashback_allowed(conn: &Connection, new: &Cashback, today: NaiveDate) -> Result<()> {
    match new.owner {
        CashbackOwner::Category(id) => {
            category::get_by_id(conn, id)?;
        }
        CashbackOwner::Shop(id) => {
            shop::get_by_id(conn, id)?;
        }
    }
    let card = card::get_by_id(conn, new.bank_card_id)?;

    if cashback::find_duplicate(conn, new)?.is_some() {
        return Err(CashbackError::EntryAlreadyExists(format!(
            "{} cashback on card '{}'",
            new.display_amount(),
            card.name
        )));
    }

    if card.has_cashback_limit() {
        let range = overflow::effective_range(new, today);
        let exclude = if new.id == 0 { None } else { Some(new.id) };
        let existing = cashback::fetch_intersecting(conn, card.id, range, exclude)?;
        overflow::check_card_limit(&card, new, &existing, today)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::{ColorTheme, MeasureUnit};
    use crate::overflow::YearMonth;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service() -> CashbackService {
        CashbackService::new(open_in_memory().unwrap()).with_clock(|| date(2024, 3, 10))
    }

    #[test]
    fn test_add_category_trims_and_rejects_duplicates() {
        let service = service();
        let id = service.add_category("  Cafes ").unwrap();
        assert_eq!(service.get_category(id).unwrap().name, "Cafes");

        let err = service.add_category("cafes").unwrap_err();
        assert!(matches!(err, CashbackError::EntryAlreadyExists(_)));
    }

    #[test]
    fn test_add_shop_to_missing_category() {
        let service = service();
        let err = service.add_shop(77, "Ozon").unwrap_err();
        assert!(matches!(err, CashbackError::NotFound { entity: "Category", id: 77 }));
    }

    #[test]
    fn test_cashback_limit_enforced() {
        let service = service();
        let category_id = service.add_category("Fuel").unwrap();
        let card_id = service
            .add_card(BankCard::new("Limited").unwrap().with_max_cashbacks(1))
            .unwrap();

        let march = (Some(date(2024, 3, 1)), Some(date(2024, 3, 31)));
        service
            .add_cashback(
                Cashback::new(CashbackOwner::Category(category_id), card_id, 5.0, MeasureUnit::Percent)
                    .with_dates(march.0, march.1),
            )
            .unwrap();

        let err = service
            .add_cashback(
                Cashback::new(CashbackOwner::Category(category_id), card_id, 3.0, MeasureUnit::Percent)
                    .with_dates(march.0, march.1),
            )
            .unwrap_err();

        match err {
            CashbackError::CashbackOverflow { month } => assert_eq!(month, YearMonth::new(2024, 3)),
            other => panic!("expected overflow, got {other}"),
        }

        // April is still free
        service
            .add_cashback(
                Cashback::new(CashbackOwner::Category(category_id), card_id, 3.0, MeasureUnit::Percent)
                    .with_dates(Some(date(2024, 4, 1)), Some(date(2024, 4, 30))),
            )
            .unwrap();
    }

    #[test]
    fn test_update_cashback_does_not_count_itself() {
        let service = service();
        let category_id = service.add_category("Taxi").unwrap();
        let card_id = service
            .add_card(BankCard::new("One").unwrap().with_max_cashbacks(1))
            .unwrap();
        let id = service
            .add_cashback(Cashback::new(
                CashbackOwner::Category(category_id),
                card_id,
                5.0,
                MeasureUnit::Percent,
            ))
            .unwrap();

        let mut cashback = service.get_cashback(id).unwrap().cashback;
        cashback.amount = 7.0;
        service.update_cashback(cashback).unwrap();
        assert_eq!(service.get_cashback(id).unwrap().cashback.amount, 7.0);
    }

    #[test]
    fn test_duplicate_cashback_rejected() {
        let service = service();
        let category_id = service.add_category("Books").unwrap();
        let card_id = service.add_card(BankCard::new("Any").unwrap()).unwrap();
        let cashback = Cashback::new(CashbackOwner::Category(category_id), card_id, 5.0, MeasureUnit::Percent);

        service.add_cashback(cashback.clone()).unwrap();
        let err = service.add_cashback(cashback).unwrap_err();
        assert!(matches!(err, CashbackError::EntryAlreadyExists(_)));
    }

    #[test]
    fn test_cashback_for_missing_shop() {
        let service = service();
        let card_id = service.add_card(BankCard::new("Any").unwrap()).unwrap();
        let err = service
            .add_cashback(Cashback::new(CashbackOwner::Shop(5), card_id, 5.0, MeasureUnit::Percent))
            .unwrap_err();
        assert!(matches!(err, CashbackError::NotFound { entity: "Shop", .. }));
    }

    #[test]
    fn test_search_all() {
        let service = service();
        let category_id = service.add_category("Electronics").unwrap();
        service.add_shop(category_id, "Eldorado").unwrap();
        service.add_card(BankCard::new("Electro card").unwrap()).unwrap();

        let results = service.search_all("el").unwrap();
        assert_eq!(results.categories.len(), 1);
        assert_eq!(results.shops.len(), 1);
        assert_eq!(results.cards.len(), 1);
        assert_eq!(results.total(), 3);

        assert!(service.search_all("zzz").unwrap().is_empty());
    }

    #[test]
    fn test_settings_round_trip() {
        let service = service();
        let mut settings = service.get_settings().unwrap();
        settings.color_theme = ColorTheme::Light;
        settings.auto_delete_expired_cashbacks = true;
        service.update_settings(settings).unwrap();
        assert_eq!(service.get_settings().unwrap(), settings);
    }

    #[test]
    fn test_move_shop() {
        let service = service();
        let a = service.add_category("A").unwrap();
        let b = service.add_category("B").unwrap();
        let shop_id = service.add_shop(a, "Shop").unwrap();

        service.move_shop(shop_id, b).unwrap();
        assert_eq!(service.get_shop(shop_id).unwrap().category_id, b);
        assert!(service.move_shop(shop_id, 999).is_err());
    }

    #[test]
    fn test_update_shop_is_all_or_nothing() {
        let service = service();
        let groceries = service.add_category("Groceries").unwrap();
        let electronics = service.add_category("Electronics").unwrap();
        let shop_id = service.add_shop(groceries, "Ozon").unwrap();
        service.add_shop(electronics, "DNS").unwrap();

        // Blank name: the move is not applied either
        let err = service.update_shop(shop_id, Some("   "), Some(electronics)).unwrap_err();
        assert!(matches!(err, CashbackError::Validation(_)));
        assert_eq!(service.get_shop(shop_id).unwrap().category_id, groceries);

        // Name taken in the target category
        let err = service.update_shop(shop_id, Some("dns"), Some(electronics)).unwrap_err();
        assert!(matches!(err, CashbackError::EntryAlreadyExists(_)));
        let shop = service.get_shop(shop_id).unwrap();
        assert_eq!((shop.category_id, shop.name.as_str()), (groceries, "Ozon"));

        service.update_shop(shop_id, Some("Ozon Market"), Some(electronics)).unwrap();
        let shop = service.get_shop(shop_id).unwrap();
        assert_eq!((shop.category_id, shop.name.as_str()), (electronics, "Ozon Market"));
    }
}
