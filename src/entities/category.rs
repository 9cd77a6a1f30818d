// Category Entity - user-defined grouping of shops and cashbacks
//
// A category owns zero or more shops and may also carry cashbacks directly
// (e.g. "5% on all Restaurants" regardless of the shop).

use serde::{Deserialize, Serialize};

use super::normalize_name;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

impl Category {
    /// Create an unsaved category; the name is trimmed and must not be empty.
    pub fn new(name: &str) -> Result<Self> {
        Ok(Category {
            id: 0,
            name: normalize_name("Category", name)?,
        })
    }
}

/// Category row for list screens, with the number of things it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPreview {
    pub id: i64,
    pub name: String,
    pub shops_count: i64,
    pub cashbacks_count: i64,
}

impl CategoryPreview {
    pub fn is_empty(&self) -> bool {
        self.shops_count == 0 && self.cashbacks_count == 0
    }
}

impl From<CategoryPreview> for Category {
    fn from(preview: CategoryPreview) -> Self {
        Category {
            id: preview.id,
            name: preview.name,
        }
    }
}
