// Monthly cashback limit check
//
// A card may cap how many cashbacks are active on it per calendar month.
// Before a cashback is saved, the card's existing cashbacks that intersect
// the new one are bucketed by month; the first month where one more would
// exceed the cap is reported.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::{BankCard, Cashback, DateRange};
use crate::error::{CashbackError, Result};

// ============================================================================
// YEAR-MONTH
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        YearMonth { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        YearMonth {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn succ(self) -> Self {
        if self.month >= 12 {
            YearMonth::new(self.year + 1, 1)
        } else {
            YearMonth::new(self.year, self.month + 1)
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ============================================================================
// CHECK
// ============================================================================

/// Range the check runs over: a missing start date counts from `today`
/// (or from the expiration date when that is already in the past).
pub fn effective_range(cashback: &Cashback, today: NaiveDate) -> DateRange {
    let start = cashback
        .start_date
        .unwrap_or_else(|| cashback.expiration_date.map_or(today, |end| end.min(today)));
    DateRange::new(Some(start), cashback.expiration_date)
}

/// First month in which adding `new` would put more than `max` cashbacks on
/// the card, or `None` when every month stays within the limit.
///
/// `existing` should hold the card's other cashbacks; the row being edited
/// (same id as `new`) is ignored if present.
pub fn find_overflow_month(
    new: &Cashback,
    existing: &[Cashback],
    max: u32,
    today: NaiveDate,
) -> Option<YearMonth> {
    let range = effective_range(new, today);
    let first = YearMonth::of(range.start?);

    let spans: Vec<(Option<YearMonth>, Option<YearMonth>)> = existing
        .iter()
        .filter(|cashback| new.id == 0 || cashback.id != new.id)
        .filter(|cashback| cashback.range().intersects(&range))
        .map(|cashback| {
            (
                cashback.start_date.map(YearMonth::of),
                cashback.expiration_date.map(YearMonth::of),
            )
        })
        .collect();

    // An open-ended cashback only needs checking up to the last month where
    // an existing span begins or ends; counts cannot grow after that.
    let last = match range.end {
        Some(end) => YearMonth::of(end),
        None => spans
            .iter()
            .flat_map(|(start, end)| [*start, *end])
            .flatten()
            .max()
            .map_or(first, |month| month.max(first)),
    };

    let mut month = first;
    while month <= last {
        let active = spans
            .iter()
            .filter(|(start, end)| {
                start.map_or(true, |s| s <= month) && end.map_or(true, |e| month <= e)
            })
            .count();

        if active + 1 > max as usize {
            return Some(month);
        }
        month = month.succ();
    }

    None
}

/// Fail with `CashbackOverflow` when the card's limit would be exceeded.
pub fn check_card_limit(
    card: &BankCard,
    new: &Cashback,
    existing: &[Cashback],
    today: NaiveDate,
) -> Result<()> {
    let Some(max) = card.max_cashbacks_number else {
        return Ok(());
    };

    match find_overflow_month(new, existing, max, today) {
        Some(month) => Err(CashbackError::CashbackOverflow { month }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CashbackOwner, MeasureUnit};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cashback(id: i64, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Cashback {
        let mut cashback = Cashback::new(CashbackOwner::Category(id), 1, 5.0, MeasureUnit::Percent)
            .with_dates(start, end);
        cashback.id = id;
        cashback
    }

    fn month_of(y: i32, m: u32) -> (Option<NaiveDate>, Option<NaiveDate>) {
        let start = date(y, m, 1);
        let end = YearMonth::new(y, m).succ().first_day().unwrap().pred_opt().unwrap();
        (Some(start), Some(end))
    }

    #[test]
    fn test_year_month_succ_wraps() {
        assert_eq!(YearMonth::new(2024, 12).succ(), YearMonth::new(2025, 1));
        assert_eq!(YearMonth::new(2024, 1).succ(), YearMonth::new(2024, 2));
        assert_eq!(YearMonth::new(2024, 3).to_string(), "2024-03");
    }

    #[test]
    fn test_within_limit() {
        let today = date(2024, 3, 10);
        let (s, e) = month_of(2024, 3);
        let existing = vec![cashback(1, s, e)];
        let new = cashback(0, s, e);

        assert_eq!(find_overflow_month(&new, &existing, 2, today), None);
    }

    #[test]
    fn test_overflow_reports_month() {
        let today = date(2024, 3, 10);
        let (s, e) = month_of(2024, 3);
        let existing = vec![cashback(1, s, e), cashback(2, s, e)];
        let new = cashback(0, s, e);

        assert_eq!(
            find_overflow_month(&new, &existing, 2, today),
            Some(YearMonth::new(2024, 3))
        );
    }

    #[test]
    fn test_reports_first_overflowing_month() {
        let today = date(2024, 1, 1);
        // April and May are full, March is not
        let existing = vec![
            cashback(1, Some(date(2024, 4, 1)), Some(date(2024, 5, 31))),
            cashback(2, Some(date(2024, 4, 10)), Some(date(2024, 6, 15))),
        ];
        let new = cashback(0, Some(date(2024, 3, 1)), Some(date(2024, 6, 30)));

        assert_eq!(
            find_overflow_month(&new, &existing, 2, today),
            Some(YearMonth::new(2024, 4))
        );
    }

    #[test]
    fn test_non_intersecting_ignored() {
        let today = date(2024, 1, 1);
        let (s, e) = month_of(2024, 1);
        let existing = vec![cashback(1, s, e)];
        let (ns, ne) = month_of(2024, 2);
        let new = cashback(0, ns, ne);

        assert_eq!(find_overflow_month(&new, &existing, 1, today), None);
    }

    #[test]
    fn test_editing_excludes_itself() {
        let today = date(2024, 3, 1);
        let (s, e) = month_of(2024, 3);
        let existing = vec![cashback(7, s, e)];
        let edited = cashback(7, s, e);

        assert_eq!(find_overflow_month(&edited, &existing, 1, today), None);
    }

    #[test]
    fn test_open_ended_existing_counts_in_every_month() {
        let today = date(2024, 3, 1);
        let existing = vec![cashback(1, None, None)];
        let (s, e) = month_of(2030, 8);
        let new = cashback(0, s, e);

        assert_eq!(
            find_overflow_month(&new, &existing, 1, today),
            Some(YearMonth::new(2030, 8))
        );
    }

    #[test]
    fn test_open_ended_new_checks_later_months() {
        let today = date(2024, 1, 15);
        let existing = vec![cashback(1, Some(date(2024, 6, 1)), Some(date(2024, 6, 30)))];
        let new = cashback(0, None, None);

        assert_eq!(
            find_overflow_month(&new, &existing, 1, today),
            Some(YearMonth::new(2024, 6))
        );
        assert_eq!(find_overflow_month(&new, &existing, 2, today), None);
    }

    #[test]
    fn test_missing_start_uses_today() {
        let today = date(2024, 5, 20);
        // only active in January, before today
        let existing = vec![cashback(1, Some(date(2024, 1, 1)), Some(date(2024, 1, 31)))];
        let new = cashback(0, None, Some(date(2024, 12, 31)));

        assert_eq!(find_overflow_month(&new, &existing, 1, today), None);
    }

    #[test]
    fn test_check_card_limit() {
        let today = date(2024, 3, 1);
        let (s, e) = month_of(2024, 3);
        let existing = vec![cashback(1, s, e)];
        let new = cashback(0, s, e);

        let unlimited = BankCard::new("Unlimited").unwrap();
        assert!(check_card_limit(&unlimited, &new, &existing, today).is_ok());

        let capped = BankCard::new("Capped").unwrap().with_max_cashbacks(1);
        let err = check_card_limit(&capped, &new, &existing, today).unwrap_err();
        match err {
            CashbackError::CashbackOverflow { month } => assert_eq!(month, YearMonth::new(2024, 3)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
