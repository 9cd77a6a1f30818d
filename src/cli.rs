use anyhow::{bail, Context, Result};
use cashbacks::entities::{
    BankCard, Cashback, CashbackDetails, CashbackOwner, CategoryPreview, ColorTheme, MeasureUnit,
    PaymentSystem, ShopPreview,
};
use cashbacks::jobs::{check_for_update, JobOutcome, JobScheduler, UpdateStatus};
use cashbacks::{AppConfig, CashbackService};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cashbacks",
    about = "Keep track of bank card cashbacks by category and shop",
    version
)]
pub struct Cli {
    /// Database file (overrides CASHBACKS_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the terminal UI (default command)
    Ui,
    /// Manage categories
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
    /// Manage shops
    Shop {
        #[command(subcommand)]
        command: ShopCommand,
    },
    /// Manage bank cards
    Card {
        #[command(subcommand)]
        command: CardCommand,
    },
    /// Manage cashbacks
    Cashback {
        #[command(subcommand)]
        command: CashbackCommand,
    },
    /// Search categories, shops, cards and cashbacks at once
    Search { query: String },
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Run background jobs by hand
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Export all data to CSV files with a checksum manifest
    Export {
        /// Target directory
        dir: PathBuf,
    },
    /// Check an export directory against its manifest
    Verify { dir: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum CategoryCommand {
    Add { name: String },
    Rename { id: i64, name: String },
    Delete { id: i64 },
    Show { id: i64 },
    List {
        /// Only categories that have cashbacks
        #[arg(long)]
        with_cashbacks: bool,
    },
    Search { query: String },
}

#[derive(Subcommand, Debug)]
pub enum ShopCommand {
    Add {
        #[arg(long)]
        category: i64,
        name: String,
    },
    Rename { id: i64, name: String },
    /// Move a shop to another category
    Move {
        id: i64,
        #[arg(long)]
        category: i64,
    },
    Delete { id: i64 },
    Show { id: i64 },
    List {
        #[arg(long)]
        category: Option<i64>,
    },
    Search { query: String },
}

#[derive(Args, Debug, Default)]
pub struct CardArgs {
    #[arg(long)]
    pub number: Option<String>,
    /// Visa, MasterCard, Mir, UnionPay, JCB, AmericanExpress, DinersClub
    #[arg(long)]
    pub system: Option<String>,
    #[arg(long)]
    pub holder: Option<String>,
    /// MM/YY
    #[arg(long)]
    pub valid_thru: Option<String>,
    #[arg(long)]
    pub cvv: Option<String>,
    #[arg(long)]
    pub pin: Option<String>,
    /// Maximum cashbacks per month; 0 removes the limit
    #[arg(long)]
    pub max_cashbacks: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum CardCommand {
    Add {
        name: String,
        #[command(flatten)]
        fields: CardArgs,
    },
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        fields: CardArgs,
    },
    Delete { id: i64 },
    Show { id: i64 },
    List,
    Search { query: String },
}

#[derive(Args, Debug)]
pub struct CashbackArgs {
    /// Cashback size
    #[arg(long)]
    pub amount: Option<f64>,
    /// "%" or a currency code such as RUB
    #[arg(long)]
    pub unit: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub start: Option<NaiveDate>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub end: Option<NaiveDate>,
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum CashbackCommand {
    Add {
        #[arg(long, conflicts_with = "shop", required_unless_present = "shop")]
        category: Option<i64>,
        #[arg(long)]
        shop: Option<i64>,
        #[arg(long)]
        card: i64,
        #[command(flatten)]
        fields: CashbackArgs,
    },
    Update {
        id: i64,
        #[arg(long)]
        card: Option<i64>,
        #[command(flatten)]
        fields: CashbackArgs,
    },
    Delete { id: i64 },
    Show { id: i64 },
    List {
        #[arg(long, conflicts_with_all = ["shop", "card"])]
        category: Option<i64>,
        #[arg(long, conflicts_with = "card")]
        shop: Option<i64>,
        #[arg(long)]
        card: Option<i64>,
    },
    Search { query: String },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Set {
        /// Light, Dark or System
        #[arg(long)]
        theme: Option<String>,
        #[arg(long)]
        dynamic_color: Option<bool>,
        #[arg(long)]
        auto_delete_expired: Option<bool>,
    },
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// Run jobs that are due (all of them with --force)
    Run {
        #[arg(long)]
        force: bool,
    },
    /// Ask the update endpoint for a newer version
    CheckUpdate,
}

/// Runs one non-UI command against the service.
pub fn execute(command: Command, service: &CashbackService, config: &AppConfig, json: bool) -> Result<()> {
    let out = Output { json };

    match command {
        Command::Ui => bail!("the terminal UI is started from main"),

        Command::Category { command } => match command {
            CategoryCommand::Add { name } => out.created("category", service.add_category(&name)?),
            CategoryCommand::Rename { id, name } => {
                service.rename_category(id, &name)?;
                out.done(&format!("Category {} renamed", id))
            }
            CategoryCommand::Delete { id } => {
                service.delete_category(id)?;
                out.done(&format!("Category {} deleted with its shops and cashbacks", id))
            }
            CategoryCommand::Show { id } => {
                let category = service.get_category(id)?;
                out.print(&category, || format!("{:>4}  {}", category.id, category.name))
            }
            CategoryCommand::List { with_cashbacks } => {
                let categories = if with_cashbacks {
                    service.fetch_categories_with_cashbacks()?
                } else {
                    service.fetch_categories()?
                };
                out.list(&categories, category_line)
            }
            CategoryCommand::Search { query } => out.list(&service.search_categories(&query)?, category_line),
        },

        Command::Shop { command } => match command {
            ShopCommand::Add { category, name } => out.created("shop", service.add_shop(category, &name)?),
            ShopCommand::Rename { id, name } => {
                service.rename_shop(id, &name)?;
                out.done(&format!("Shop {} renamed", id))
            }
            ShopCommand::Move { id, category } => {
                service.move_shop(id, category)?;
                out.done(&format!("Shop {} moved to category {}", id, category))
            }
            ShopCommand::Delete { id } => {
                service.delete_shop(id)?;
                out.done(&format!("Shop {} deleted with its cashbacks", id))
            }
            ShopCommand::Show { id } => {
                let shop = service.get_shop(id)?;
                out.print(&shop, || format!("{:>4}  {}  (category {})", shop.id, shop.name, shop.category_id))
            }
            ShopCommand::List { category } => {
                let shops = match category {
                    Some(category_id) => service.fetch_shops_from_category(category_id)?,
                    None => service.fetch_all_shops()?,
                };
                out.list(&shops, shop_line)
            }
            ShopCommand::Search { query } => out.list(&service.search_shops(&query)?, shop_line),
        },

        Command::Card { command } => match command {
            CardCommand::Add { name, fields } => {
                let card = apply_card_fields(BankCard::new(&name)?, fields)?;
                out.created("card", service.add_card(card)?)
            }
            CardCommand::Update { id, name, fields } => {
                let mut card = service.get_card(id)?;
                if let Some(name) = name {
                    card.name = name;
                }
                service.update_card(apply_card_fields(card, fields)?)?;
                out.done(&format!("Card {} updated", id))
            }
            CardCommand::Delete { id } => {
                service.delete_card(id)?;
                out.done(&format!("Card {} deleted with its cashbacks", id))
            }
            CardCommand::Show { id } => {
                let card = service.get_card(id)?;
                out.print(&card, || card_line(&card))
            }
            CardCommand::List => out.list(&service.fetch_cards()?, card_line),
            CardCommand::Search { query } => out.list(&service.search_cards(&query)?, card_line),
        },

        Command::Cashback { command } => match command {
            CashbackCommand::Add {
                category,
                shop,
                card,
                fields,
            } => {
                let owner = match (category, shop) {
                    (Some(id), None) => CashbackOwner::Category(id),
                    (None, Some(id)) => CashbackOwner::Shop(id),
                    _ => bail!("pass exactly one of --category or --shop"),
                };
                let amount = fields.amount.context("--amount is required")?;
                let unit = MeasureUnit::parse(fields.unit.as_deref().unwrap_or("%"))?;
                let mut cashback = Cashback::new(owner, card, amount, unit)
                    .with_dates(fields.start, fields.end);
                if let Some(comment) = fields.comment {
                    cashback.comment = comment;
                }
                out.created("cashback", service.add_cashback(cashback)?)
            }
            CashbackCommand::Update { id, card, fields } => {
                let mut cashback = service.get_cashback(id)?.cashback;
                if let Some(card) = card {
                    cashback.bank_card_id = card;
                }
                if let Some(amount) = fields.amount {
                    cashback.amount = amount;
                }
                if let Some(unit) = fields.unit.as_deref() {
                    cashback.measure_unit = MeasureUnit::parse(unit)?;
                }
                if fields.start.is_some() {
                    cashback.start_date = fields.start;
                }
                if fields.end.is_some() {
                    cashback.expiration_date = fields.end;
                }
                if let Some(comment) = fields.comment {
                    cashback.comment = comment;
                }
                service.update_cashback(cashback)?;
                out.done(&format!("Cashback {} updated", id))
            }
            CashbackCommand::Delete { id } => {
                service.delete_cashback(id)?;
                out.done(&format!("Cashback {} deleted", id))
            }
            CashbackCommand::Show { id } => {
                let details = service.get_cashback(id)?;
                out.print(&details, || cashback_line(&details))
            }
            CashbackCommand::List { category, shop, card } => {
                let cashbacks = match (category, shop, card) {
                    (Some(id), _, _) => service.fetch_cashbacks_from_category(id)?,
                    (_, Some(id), _) => service.fetch_cashbacks_from_shop(id)?,
                    (_, _, Some(id)) => service.fetch_cashbacks_from_card(id)?,
                    _ => service.fetch_all_cashbacks()?,
                };
                out.list(&cashbacks, cashback_line)
            }
            CashbackCommand::Search { query } => out.list(&service.search_cashbacks(&query)?, cashback_line),
        },

        Command::Search { query } => {
            let results = service.search_all(&query)?;
            out.print(&results, || {
                let mut lines = Vec::new();
                lines.extend(results.categories.iter().map(|c| format!("[category] {}", category_line(c))));
                lines.extend(results.shops.iter().map(|s| format!("[shop]     {}", shop_line(s))));
                lines.extend(results.cards.iter().map(|c| format!("[card]     {}", card_line(c))));
                lines.extend(results.cashbacks.iter().map(|c| format!("[cashback] {}", cashback_line(c))));
                if lines.is_empty() {
                    "Nothing found".to_string()
                } else {
                    lines.join("\n")
                }
            })
        }

        Command::Settings { command } => match command {
            SettingsCommand::Show => {
                let settings = service.get_settings()?;
                out.print(&settings, || {
                    format!(
                        "Color theme:              {}\nDynamic color:            {}\nAuto-delete expired:      {}",
                        settings.color_theme.as_str(),
                        settings.dynamic_color,
                        settings.auto_delete_expired_cashbacks
                    )
                })
            }
            SettingsCommand::Set {
                theme,
                dynamic_color,
                auto_delete_expired,
            } => {
                let mut settings = service.get_settings()?;
                if let Some(theme) = theme {
                    settings.color_theme = ColorTheme::parse(&theme)
                        .with_context(|| format!("unknown theme '{}'", theme))?;
                }
                if let Some(flag) = dynamic_color {
                    settings.dynamic_color = flag;
                }
                if let Some(flag) = auto_delete_expired {
                    settings.auto_delete_expired_cashbacks = flag;
                }
                service.update_settings(settings)?;
                out.done("Settings saved")
            }
        },

        Command::Jobs { command } => match command {
            JobsCommand::Run { force } => {
                let scheduler = JobScheduler::new(service.clone(), config.update_url.clone());
                let report = if force {
                    scheduler.run_all(Utc::now())
                } else {
                    scheduler.run_due(Utc::now())
                };
                out.print(&report, || {
                    report
                        .entries
                        .iter()
                        .map(|(job, outcome)| format!("{:<26} {}", job.name(), outcome_text(outcome)))
                        .collect::<Vec<_>>()
                        .join("\n")
                })?;
                if report.has_failures() {
                    bail!("some jobs failed");
                }
                Ok(())
            }
            JobsCommand::CheckUpdate => {
                let endpoint = config
                    .update_url
                    .as_deref()
                    .context("CASHBACKS_UPDATE_URL is not set")?;
                let status = check_for_update(endpoint, cashbacks::VERSION)?;
                out.print(&status, || match &status {
                    UpdateStatus::UpToDate => format!("cashbacks {} is up to date", cashbacks::VERSION),
                    UpdateStatus::Available { version, link } => {
                        format!("Version {} is available: {}", version, link)
                    }
                })
            }
        },

        Command::Export { dir } => {
            let conn = service.connection();
            let conn = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("database connection lock poisoned"))?;
            let manifest = cashbacks::export_to_dir(&conn, &dir)?;
            out.print(&manifest, || {
                let mut lines = vec![format!("Exported to {}", dir.display())];
                lines.extend(
                    manifest
                        .files
                        .iter()
                        .map(|f| format!("  {:<16} {:>6} rows  {}", f.file, f.rows, &f.sha256[..12])),
                );
                lines.join("\n")
            })
        }

        Command::Verify { dir } => {
            let mismatched = cashbacks::verify_export(&dir)?;
            if mismatched.is_empty() {
                out.done("All files match the manifest")
            } else {
                bail!("files changed since export: {}", mismatched.join(", "))
            }
        }
    }
}

fn apply_card_fields(mut card: BankCard, fields: CardArgs) -> Result<BankCard> {
    if let Some(number) = fields.number {
        card.number = number;
    }
    if let Some(system) = fields.system {
        card.payment_system = Some(
            PaymentSystem::parse(&system).with_context(|| format!("unknown payment system '{}'", system))?,
        );
    }
    if let Some(holder) = fields.holder {
        card.holder = holder;
    }
    if let Some(valid_thru) = fields.valid_thru {
        card.validity_period = valid_thru;
    }
    if let Some(cvv) = fields.cvv {
        card.cvv = cvv;
    }
    if let Some(pin) = fields.pin {
        card.pin = pin;
    }
    if let Some(max) = fields.max_cashbacks {
        card.max_cashbacks_number = if max == 0 { None } else { Some(max) };
    }
    Ok(card)
}

struct Output {
    json: bool,
}

impl Output {
    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }

    fn list<T: Serialize>(&self, items: &[T], line: impl Fn(&T) -> String) -> Result<()> {
        self.print(&items, || {
            if items.is_empty() {
                "Nothing found".to_string()
            } else {
                items.iter().map(line).collect::<Vec<_>>().join("\n")
            }
        })
    }

    fn created(&self, what: &str, id: i64) -> Result<()> {
        self.print(&serde_json::json!({ "id": id }), || format!("Added {} {}", what, id))
    }

    fn done(&self, message: &str) -> Result<()> {
        self.print(&serde_json::json!({ "ok": true, "message": message }), || message.to_string())
    }
}

fn category_line(category: &CategoryPreview) -> String {
    format!(
        "{:>4}  {:<28} shops: {:<3} cashbacks: {}",
        category.id, category.name, category.shops_count, category.cashbacks_count
    )
}

fn shop_line(shop: &ShopPreview) -> String {
    format!(
        "{:>4}  {:<28} {:<20} cashbacks: {}",
        shop.id, shop.name, shop.category_name, shop.cashbacks_count
    )
}

fn card_line(card: &BankCard) -> String {
    format!(
        "{:>4}  {:<24} {:<10} {:<16} limit: {}",
        card.id,
        card.name,
        card.masked_number(),
        card.payment_system.map(|p| p.as_str()).unwrap_or("-"),
        card.max_cashbacks_number
            .map(|max| max.to_string())
            .unwrap_or_else(|| "none".to_string())
    )
}

fn cashback_line(details: &CashbackDetails) -> String {
    let cb = &details.cashback;
    let period = match (cb.start_date, cb.expiration_date) {
        (Some(s), Some(e)) => format!("{} .. {}", s, e),
        (Some(s), None) => format!("from {}", s),
        (None, Some(e)) => format!("until {}", e),
        (None, None) => "always".to_string(),
    };
    format!(
        "{:>4}  {:<8} {:<24} {:<20} {}",
        cb.id,
        cb.display_amount(),
        details.owner_name,
        details.card_name,
        period
    )
}

fn outcome_text(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::NotDue => "not due".to_string(),
        JobOutcome::Disabled(reason) => format!("skipped: {}", reason),
        JobOutcome::Completed(summary) => summary.clone(),
        JobOutcome::Failed(err) => format!("FAILED: {}", err),
    }
}
