// Bank Card Entity
//
// Display fields only: the app never talks to a bank. The optional
// `max_cashbacks_number` caps how many cashbacks may be active on the card
// in one calendar month (see `overflow`).

use serde::{Deserialize, Serialize};

use super::normalize_name;
use crate::error::{CashbackError, Result};

const MAX_CARD_DIGITS: usize = 19;

// ============================================================================
// PAYMENT SYSTEM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentSystem {
    Visa,
    MasterCard,
    Mir,
    UnionPay,
    Jcb,
    AmericanExpress,
    DinersClub,
}

impl PaymentSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSystem::Visa => "Visa",
            PaymentSystem::MasterCard => "MasterCard",
            PaymentSystem::Mir => "Mir",
            PaymentSystem::UnionPay => "UnionPay",
            PaymentSystem::Jcb => "JCB",
            PaymentSystem::AmericanExpress => "AmericanExpress",
            PaymentSystem::DinersClub => "DinersClub",
        }
    }

    /// Parse the persisted name (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|system| system.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn all() -> &'static [PaymentSystem] {
        &[
            PaymentSystem::Visa,
            PaymentSystem::MasterCard,
            PaymentSystem::Mir,
            PaymentSystem::UnionPay,
            PaymentSystem::Jcb,
            PaymentSystem::AmericanExpress,
            PaymentSystem::DinersClub,
        ]
    }
}

// ============================================================================
// BANK CARD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankCard {
    pub id: i64,
    pub name: String,
    /// Digits only
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub payment_system: Option<PaymentSystem>,
    #[serde(default)]
    pub holder: String,
    /// `MM/YY` or empty
    #[serde(default)]
    pub validity_period: String,
    #[serde(default)]
    pub cvv: String,
    #[serde(default)]
    pub pin: String,
    /// Maximum number of cashbacks per calendar month, `None` = unlimited
    #[serde(default)]
    pub max_cashbacks_number: Option<u32>,
}

impl BankCard {
    pub fn new(name: &str) -> Result<Self> {
        Ok(BankCard {
            id: 0,
            name: normalize_name("Card", name)?,
            number: String::new(),
            payment_system: None,
            holder: String::new(),
            validity_period: String::new(),
            cvv: String::new(),
            pin: String::new(),
            max_cashbacks_number: None,
        })
    }

    pub fn with_number(mut self, number: &str) -> Self {
        self.number = number.to_string();
        self
    }

    pub fn with_payment_system(mut self, system: PaymentSystem) -> Self {
        self.payment_system = Some(system);
        self
    }

    pub fn with_max_cashbacks(mut self, max: u32) -> Self {
        self.max_cashbacks_number = Some(max);
        self
    }

    /// Normalize and check every field before a write.
    pub fn validated(mut self) -> Result<Self> {
        self.name = normalize_name("Card", &self.name)?;

        let number: String = self.number.chars().filter(|c| !c.is_whitespace()).collect();
        if !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(CashbackError::Validation(
                "card number must contain digits only".to_string(),
            ));
        }
        if number.len() > MAX_CARD_DIGITS {
            return Err(CashbackError::Validation(format!(
                "card number must have at most {} digits",
                MAX_CARD_DIGITS
            )));
        }
        self.number = number;

        self.holder = self.holder.trim().to_string();
        self.validity_period = self.validity_period.trim().to_string();
        if !self.validity_period.is_empty() && !is_valid_period(&self.validity_period) {
            return Err(CashbackError::Validation(
                "validity period must look like MM/YY".to_string(),
            ));
        }

        if self.max_cashbacks_number == Some(0) {
            return Err(CashbackError::Validation(
                "monthly cashback limit must be at least 1".to_string(),
            ));
        }

        Ok(self)
    }

    /// Last four digits behind dots, e.g. `•••• 1234`.
    pub fn masked_number(&self) -> String {
        if self.number.is_empty() {
            return String::new();
        }
        let digits: Vec<char> = self.number.chars().collect();
        let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
        format!("•••• {}", tail)
    }

    pub fn has_cashback_limit(&self) -> bool {
        self.max_cashbacks_number.is_some()
    }
}

fn is_valid_period(period: &str) -> bool {
    let Some((month, year)) = period.split_once('/') else {
        return false;
    };
    if month.len() != 2 || year.len() != 2 {
        return false;
    }
    match (month.parse::<u32>(), year.parse::<u32>()) {
        (Ok(m), Ok(_)) => (1..=12).contains(&m),
        _ => false,
    }
}
