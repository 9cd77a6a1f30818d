// Browsing view-model
//
// Screens send `Intent`s; the store applies them against the service,
// updates `State` and may emit a one-shot `Label`. Service errors are turned
// into snackbar labels here and never reach the screen as `Err`.

use crate::entities::{BankCard, CashbackDetails, CategoryPreview, Settings, ShopPreview};
use crate::error::Result;
use crate::service::CashbackService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Cashbacks,
    Cards,
    Categories,
    Shops,
    Settings,
}

impl Page {
    pub const ALL: [Page; 5] = [
        Page::Cashbacks,
        Page::Cards,
        Page::Categories,
        Page::Shops,
        Page::Settings,
    ];

    pub fn next(&self) -> Self {
        match self {
            Page::Cashbacks => Page::Cards,
            Page::Cards => Page::Categories,
            Page::Categories => Page::Shops,
            Page::Shops => Page::Settings,
            Page::Settings => Page::Cashbacks,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Cashbacks => Page::Settings,
            Page::Cards => Page::Cashbacks,
            Page::Categories => Page::Cards,
            Page::Shops => Page::Categories,
            Page::Settings => Page::Shops,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Page::Cashbacks => "Cashbacks",
            Page::Cards => "Cards",
            Page::Categories => "Categories",
            Page::Shops => "Shops",
            Page::Settings => "Settings",
        }
    }

    pub fn index(&self) -> usize {
        Page::ALL.iter().position(|page| page == self).unwrap_or(0)
    }
}

/// Rows on the settings page, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsRow {
    ColorTheme,
    DynamicColor,
    AutoDeleteExpired,
}

impl SettingsRow {
    pub const ALL: [SettingsRow; 3] = [
        SettingsRow::ColorTheme,
        SettingsRow::DynamicColor,
        SettingsRow::AutoDeleteExpired,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Refresh,
    NextPage,
    PreviousPage,
    SelectNext,
    SelectPrevious,
    ToggleDetail,
    StartSearch,
    SearchInput(char),
    SearchBackspace,
    SubmitSearch,
    ClearSearch,
    RequestDelete,
    ConfirmDelete,
    CancelDelete,
    CycleTheme,
    ToggleAutoDelete,
    ToggleDynamicColor,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Snackbar(String),
    Quit,
}

/// Row waiting for the user to confirm its deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelete {
    pub page: Page,
    pub id: i64,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub editing: bool,
    pub input: String,
    pub applied: Option<String>,
}

#[derive(Debug, Clone)]
pub struct State {
    pub page: Page,
    pub cashbacks: Vec<CashbackDetails>,
    pub cards: Vec<BankCard>,
    pub categories: Vec<CategoryPreview>,
    pub shops: Vec<ShopPreview>,
    pub settings: Settings,
    pub selected: usize,
    pub show_detail: bool,
    pub search: SearchState,
    pub pending_delete: Option<PendingDelete>,
    pub last_message: Option<String>,
}

impl Default for State {
    fn default() -> Self {
        State {
            page: Page::Cashbacks,
            cashbacks: Vec::new(),
            cards: Vec::new(),
            categories: Vec::new(),
            shops: Vec::new(),
            settings: Settings::default(),
            selected: 0,
            show_detail: false,
            search: SearchState::default(),
            pending_delete: None,
            last_message: None,
        }
    }
}

impl State {
    pub fn row_count(&self) -> usize {
        match self.page {
            Page::Cashbacks => self.cashbacks.len(),
            Page::Cards => self.cards.len(),
            Page::Categories => self.categories.len(),
            Page::Shops => self.shops.len(),
            Page::Settings => SettingsRow::ALL.len(),
        }
    }

    pub fn selected_cashback(&self) -> Option<&CashbackDetails> {
        self.cashbacks.get(self.selected)
    }

    pub fn selected_card(&self) -> Option<&BankCard> {
        self.cards.get(self.selected)
    }

    pub fn selected_category(&self) -> Option<&CategoryPreview> {
        self.categories.get(self.selected)
    }

    pub fn selected_shop(&self) -> Option<&ShopPreview> {
        self.shops.get(self.selected)
    }

    pub fn selected_setting(&self) -> Option<SettingsRow> {
        SettingsRow::ALL.get(self.selected).copied()
    }

    fn clamp_selection(&mut self) {
        let len = self.row_count();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    /// What would be deleted if the user asked now.
    fn delete_target(&self) -> Option<PendingDelete> {
        let (id, description) = match self.page {
            Page::Cashbacks => self.selected_cashback().map(|details| {
                (
                    details.cashback.id,
                    format!(
                        "cashback {} for '{}'",
                        details.cashback.display_amount(),
                        details.owner_name
                    ),
                )
            })?,
            Page::Cards => self
                .selected_card()
                .map(|card| (card.id, format!("card '{}'", card.name)))?,
            Page::Categories => self
                .selected_category()
                .map(|category| (category.id, format!("category '{}'", category.name)))?,
            Page::Shops => self
                .selected_shop()
                .map(|shop| (shop.id, format!("shop '{}'", shop.name)))?,
            Page::Settings => return None,
        };

        Some(PendingDelete {
            page: self.page,
            id,
            description,
        })
    }
}

#[derive(Debug, Default)]
pub struct CashbacksStore {
    state: State,
}

impl CashbacksStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn accept(&mut self, service: &CashbackService, intent: Intent) -> Option<Label> {
        let label = match self.reduce(service, intent) {
            Ok(label) => label,
            Err(err) => Some(Label::Snackbar(err.to_string())),
        };

        if let Some(Label::Snackbar(message)) = &label {
            self.state.last_message = Some(message.clone());
        }
        label
    }

    fn reduce(&mut self, service: &CashbackService, intent: Intent) -> Result<Option<Label>> {
        let state = &mut self.state;

        // A pending confirmation swallows everything except its answers
        if state.pending_delete.is_some()
            && !matches!(intent, Intent::ConfirmDelete | Intent::CancelDelete | Intent::Quit)
        {
            return Ok(None);
        }

        // While typing a query, characters belong to the search box
        if state.search.editing {
            match intent {
                Intent::SearchInput(c) => {
                    state.search.input.push(c);
                    return Ok(None);
                }
                Intent::SearchBackspace => {
                    state.search.input.pop();
                    return Ok(None);
                }
                Intent::SubmitSearch | Intent::ClearSearch | Intent::Quit => {}
                _ => return Ok(None),
            }
        }

        match intent {
            Intent::Refresh => {
                self.reload(service)?;
                Ok(None)
            }
            Intent::NextPage => {
                state.page = state.page.next();
                state.selected = 0;
                state.show_detail = false;
                Ok(None)
            }
            Intent::PreviousPage => {
                state.page = state.page.previous();
                state.selected = 0;
                state.show_detail = false;
                Ok(None)
            }
            Intent::SelectNext => {
                let len = state.row_count();
                if len > 0 {
                    state.selected = (state.selected + 1) % len;
                }
                Ok(None)
            }
            Intent::SelectPrevious => {
                let len = state.row_count();
                if len > 0 {
                    state.selected = if state.selected == 0 {
                        len - 1
                    } else {
                        state.selected - 1
                    };
                }
                Ok(None)
            }
            Intent::ToggleDetail => {
                state.show_detail = !state.show_detail;
                Ok(None)
            }
            Intent::StartSearch => {
                state.search.editing = true;
                state.search.input = state.search.applied.clone().unwrap_or_default();
                Ok(None)
            }
            Intent::SearchInput(_) | Intent::SearchBackspace => Ok(None),
            Intent::SubmitSearch => {
                let query = state.search.input.trim().to_string();
                state.search.editing = false;
                state.search.applied = if query.is_empty() { None } else { Some(query) };
                state.selected = 0;
                self.reload(service)?;
                Ok(None)
            }
            Intent::ClearSearch => {
                state.search = SearchState::default();
                state.selected = 0;
                self.reload(service)?;
                Ok(None)
            }
            Intent::RequestDelete => match state.delete_target() {
                Some(target) => {
                    let prompt = format!("Delete {}? (y/n)", target.description);
                    state.pending_delete = Some(target);
                    Ok(Some(Label::Snackbar(prompt)))
                }
                None => Ok(Some(Label::Snackbar("Nothing to delete".to_string()))),
            },
            Intent::ConfirmDelete => {
                let Some(target) = state.pending_delete.take() else {
                    return Ok(None);
                };
                match target.page {
                    Page::Cashbacks => service.delete_cashback(target.id)?,
                    Page::Cards => service.delete_card(target.id)?,
                    Page::Categories => service.delete_category(target.id)?,
                    Page::Shops => service.delete_shop(target.id)?,
                    Page::Settings => return Ok(None),
                }
                self.reload(service)?;
                Ok(Some(Label::Snackbar(format!("Deleted {}", target.description))))
            }
            Intent::CancelDelete => {
                state.pending_delete = None;
                Ok(None)
            }
            Intent::CycleTheme => {
                let mut settings = state.settings;
                settings.color_theme = settings.color_theme.next();
                self.save_settings(service, settings)
            }
            Intent::ToggleAutoDelete => {
                let mut settings = state.settings;
                settings.auto_delete_expired_cashbacks = !settings.auto_delete_expired_cashbacks;
                self.save_settings(service, settings)
            }
            Intent::ToggleDynamicColor => {
                let mut settings = state.settings;
                settings.dynamic_color = !settings.dynamic_color;
                self.save_settings(service, settings)
            }
            Intent::Quit => Ok(Some(Label::Quit)),
        }
    }

    fn save_settings(&mut self, service: &CashbackService, settings: Settings) -> Result<Option<Label>> {
        service.update_settings(settings)?;
        self.state.settings = settings;
        Ok(None)
    }

    /// Reload every list, filtered by the applied search query if any.
    fn reload(&mut self, service: &CashbackService) -> Result<()> {
        let state = &mut self.state;
        match state.search.applied.as_deref() {
            Some(query) => {
                let results = service.search_all(query)?;
                state.cashbacks = results.cashbacks;
                state.cards = results.cards;
                state.categories = results.categories;
                state.shops = results.shops;
            }
            None => {
                state.cashbacks = service.fetch_all_cashbacks()?;
                state.cards = service.fetch_cards()?;
                state.categories = service.fetch_categories()?;
                state.shops = service.fetch_all_shops()?;
            }
        }
        state.settings = service.get_settings()?;
        state.clamp_selection();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::{Cashback, CashbackOwner, ColorTheme, MeasureUnit};

    fn seeded() -> (CashbackService, CashbacksStore) {
        let service = CashbackService::new(open_in_memory().unwrap());
        let food = service.add_category("Food").unwrap();
        service.add_category("Travel").unwrap();
        let shop = service.add_shop(food, "Bakery").unwrap();
        let card = service.add_card(BankCard::new("Main").unwrap()).unwrap();
        service
            .add_cashback(Cashback::new(CashbackOwner::Shop(shop), card, 5.0, MeasureUnit::Percent))
            .unwrap();

        let mut store = CashbacksStore::new();
        assert_eq!(store.accept(&service, Intent::Refresh), None);
        (service, store)
    }

    #[test]
    fn test_refresh_loads_lists() {
        let (_service, store) = seeded();
        let state = store.state();
        assert_eq!(state.cashbacks.len(), 1);
        assert_eq!(state.categories.len(), 2);
        assert_eq!(state.shops.len(), 1);
        assert_eq!(state.cards.len(), 1);
    }

    #[test]
    fn test_page_navigation_wraps() {
        let (service, mut store) = seeded();
        store.accept(&service, Intent::PreviousPage);
        assert_eq!(store.state().page, Page::Settings);
        store.accept(&service, Intent::NextPage);
        assert_eq!(store.state().page, Page::Cashbacks);
    }

    #[test]
    fn test_selection_wraps() {
        let (service, mut store) = seeded();
        store.accept(&service, Intent::NextPage);
        store.accept(&service, Intent::NextPage);
        assert_eq!(store.state().page, Page::Categories);

        store.accept(&service, Intent::SelectNext);
        assert_eq!(store.state().selected, 1);
        store.accept(&service, Intent::SelectNext);
        assert_eq!(store.state().selected, 0);
        store.accept(&service, Intent::SelectPrevious);
        assert_eq!(store.state().selected, 1);
    }

    #[test]
    fn test_search_filters_and_clears() {
        let (service, mut store) = seeded();
        store.accept(&service, Intent::StartSearch);
        for c in "trav".chars() {
            store.accept(&service, Intent::SearchInput(c));
        }
        // Navigation keys are ignored while typing
        store.accept(&service, Intent::NextPage);
        assert_eq!(store.state().page, Page::Cashbacks);

        store.accept(&service, Intent::SubmitSearch);
        assert_eq!(store.state().categories.len(), 1);
        assert!(store.state().cashbacks.is_empty());

        store.accept(&service, Intent::ClearSearch);
        assert_eq!(store.state().categories.len(), 2);
        assert!(store.state().search.applied.is_none());
    }

    #[test]
    fn test_delete_category_needs_confirmation() {
        let (service, mut store) = seeded();
        store.accept(&service, Intent::NextPage);
        store.accept(&service, Intent::NextPage);

        let label = store.accept(&service, Intent::RequestDelete);
        assert!(matches!(label, Some(Label::Snackbar(ref msg)) if msg.contains("Food")));

        // Other intents are blocked until answered
        store.accept(&service, Intent::NextPage);
        assert_eq!(store.state().page, Page::Categories);

        store.accept(&service, Intent::ConfirmDelete);
        let state = store.state();
        assert_eq!(state.categories.len(), 1);
        // Shop and its cashback went with the category
        assert!(state.shops.is_empty());
        assert!(state.cashbacks.is_empty());
    }

    #[test]
    fn test_cancel_delete_keeps_row() {
        let (service, mut store) = seeded();
        store.accept(&service, Intent::RequestDelete);
        store.accept(&service, Intent::CancelDelete);
        assert!(store.state().pending_delete.is_none());
        assert_eq!(store.state().cashbacks.len(), 1);
    }

    #[test]
    fn test_settings_intents_persist() {
        let (service, mut store) = seeded();
        store.accept(&service, Intent::CycleTheme);
        store.accept(&service, Intent::ToggleAutoDelete);
        store.accept(&service, Intent::ToggleDynamicColor);

        let saved = service.get_settings().unwrap();
        assert_eq!(saved.color_theme, ColorTheme::Light);
        assert!(saved.auto_delete_expired_cashbacks);
        assert!(!saved.dynamic_color);
        assert_eq!(store.state().settings, saved);
    }

    #[test]
    fn test_service_error_becomes_snackbar() {
        let (service, mut store) = seeded();
        store.accept(&service, Intent::RequestDelete);
        // Row disappears behind the store's back
        let id = store.state().cashbacks[0].cashback.id;
        service.delete_cashback(id).unwrap();

        let label = store.accept(&service, Intent::ConfirmDelete);
        assert!(matches!(label, Some(Label::Snackbar(ref msg)) if msg.contains("not found")));
        assert!(store.state().last_message.is_some());
    }

    #[test]
    fn test_quit() {
        let (service, mut store) = seeded();
        assert_eq!(store.accept(&service, Intent::Quit), Some(Label::Quit));
    }
}
