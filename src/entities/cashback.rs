// Cashback Entity - a reward tied to one card and to either a shop or a category
//
// The owner is an enum, so "belongs to exactly one of {Category, Shop}" holds
// by construction; the database repeats it as a CHECK constraint.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CashbackError, Result};

// ============================================================================
// OWNER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum CashbackOwner {
    Category(i64),
    Shop(i64),
}

impl CashbackOwner {
    pub fn id(&self) -> i64 {
        match self {
            CashbackOwner::Category(id) | CashbackOwner::Shop(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CashbackOwner::Category(_) => "Category",
            CashbackOwner::Shop(_) => "Shop",
        }
    }

    /// (category_id, shop_id) columns
    pub fn columns(&self) -> (Option<i64>, Option<i64>) {
        match self {
            CashbackOwner::Category(id) => (Some(*id), None),
            CashbackOwner::Shop(id) => (None, Some(*id)),
        }
    }

    pub fn from_columns(category_id: Option<i64>, shop_id: Option<i64>) -> Option<Self> {
        match (category_id, shop_id) {
            (Some(id), None) => Some(CashbackOwner::Category(id)),
            (None, Some(id)) => Some(CashbackOwner::Shop(id)),
            _ => None,
        }
    }
}

// ============================================================================
// MEASURE UNIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MeasureUnit {
    Percent,
    /// ISO 4217 code, upper-case
    Currency(String),
}

impl MeasureUnit {
    pub fn currency(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CashbackError::Validation(format!(
                "'{}' is not a three-letter currency code",
                code
            )));
        }
        Ok(MeasureUnit::Currency(code.to_ascii_uppercase()))
    }

    pub fn as_db_str(&self) -> &str {
        match self {
            MeasureUnit::Percent => "%",
            MeasureUnit::Currency(code) => code,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "%" | "percent" | "PERCENT" => Ok(MeasureUnit::Percent),
            other => MeasureUnit::currency(other),
        }
    }
}

impl fmt::Display for MeasureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl TryFrom<String> for MeasureUnit {
    type Error = CashbackError;

    fn try_from(value: String) -> Result<Self> {
        MeasureUnit::parse(&value)
    }
}

impl From<MeasureUnit> for String {
    fn from(unit: MeasureUnit) -> Self {
        unit.as_db_str().to_string()
    }
}

// ============================================================================
// DATE RANGE
// ============================================================================

/// Validity window; a missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        DateRange { start, end }
    }

    pub fn intersects(&self, other: &DateRange) -> bool {
        let starts_before_other_ends = match (self.start, other.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        };
        let ends_after_other_starts = match (self.end, other.start) {
            (Some(end), Some(start)) => end >= start,
            _ => true,
        };
        starts_before_other_ends && ends_after_other_starts
    }
}

// ============================================================================
// CASHBACK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cashback {
    pub id: i64,
    pub owner: CashbackOwner,
    pub bank_card_id: i64,
    pub amount: f64,
    pub measure_unit: MeasureUnit,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub comment: String,
}

impl Cashback {
    pub fn new(owner: CashbackOwner, bank_card_id: i64, amount: f64, measure_unit: MeasureUnit) -> Self {
        Cashback {
            id: 0,
            owner,
            bank_card_id,
            amount,
            measure_unit,
            start_date: None,
            expiration_date: None,
            comment: String::new(),
        }
    }

    pub fn with_dates(mut self, start: Option<NaiveDate>, expiration: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.expiration_date = expiration;
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.expiration_date)
    }

    /// Expired once the expiration date is strictly before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date.map_or(false, |end| end < today)
    }

    /// Same offer on the same card for the same owner.
    pub fn is_duplicate_of(&self, other: &Cashback) -> bool {
        self.id != other.id
            && self.owner == other.owner
            && self.bank_card_id == other.bank_card_id
            && self.measure_unit == other.measure_unit
            && (self.amount - other.amount).abs() < f64::EPSILON
            && self.start_date == other.start_date
            && self.expiration_date == other.expiration_date
    }

    pub fn validated(mut self) -> Result<Self> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(CashbackError::Validation(
                "cashback amount must be greater than zero".to_string(),
            ));
        }
        if self.measure_unit == MeasureUnit::Percent && self.amount > 100.0 {
            return Err(CashbackError::Validation(
                "percent cashback cannot exceed 100".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.expiration_date) {
            if start > end {
                return Err(CashbackError::Validation(
                    "start date must not be after expiration date".to_string(),
                ));
            }
        }
        self.comment = self.comment.trim().to_string();
        Ok(self)
    }

    /// Human-readable amount, e.g. `5%` or `100 RUB`.
    pub fn display_amount(&self) -> String {
        let amount = if self.amount.fract() == 0.0 {
            format!("{}", self.amount as i64)
        } else {
            format!("{:.2}", self.amount)
        };
        match &self.measure_unit {
            MeasureUnit::Percent => format!("{}%", amount),
            MeasureUnit::Currency(code) => format!("{} {}", amount, code),
        }
    }
}

/// Read model joining a cashback with its owner and card names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashbackDetails {
    #[serde(flatten)]
    pub cashback: Cashback,
    pub owner_name: String,
    pub card_name: String,
    pub card_number: String,
}
