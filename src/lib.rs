// Cashbacks - Core Library
// Exposes all modules for use in the CLI, the TUI, the API server and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod export;
pub mod jobs;
pub mod overflow;
pub mod repository;
pub mod service;
pub mod store;
pub mod telemetry;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError};
pub use db::{open_database, open_in_memory, setup_database};
pub use entities::{
    BankCard, Cashback, CashbackDetails, CashbackOwner, Category, CategoryPreview, ColorTheme,
    DateRange, MeasureUnit, PaymentSystem, Settings, Shop, ShopPreview,
};
pub use error::{CashbackError, Result};
pub use export::{export_to_dir, verify_export, ExportManifest};
pub use jobs::{check_for_update, Job, JobOutcome, JobReport, JobScheduler, UpdateStatus};
pub use overflow::{check_card_limit, find_overflow_month, YearMonth};
pub use service::{CashbackService, SearchResults};
pub use store::{CashbacksStore, Intent, Label, Page, State};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
