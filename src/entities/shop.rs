use serde::{Deserialize, Serialize};

use super::normalize_name;
use crate::error::Result;

/// A shop always belongs to exactly one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
}

impl Shop {
    pub fn new(category_id: i64, name: &str) -> Result<Self> {
        Ok(Shop {
            id: 0,
            name: normalize_name("Shop", name)?,
            category_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopPreview {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
    pub category_name: String,
    pub cashbacks_count: i64,
}
