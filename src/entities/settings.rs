use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColorTheme {
    Light,
    Dark,
    #[default]
    System,
}

impl ColorTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorTheme::Light => "Light",
            ColorTheme::Dark => "Dark",
            ColorTheme::System => "System",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Some(ColorTheme::Light),
            "dark" => Some(ColorTheme::Dark),
            "system" => Some(ColorTheme::System),
            _ => None,
        }
    }

    pub fn next(&self) -> Self {
        match self {
            ColorTheme::Light => ColorTheme::Dark,
            ColorTheme::Dark => ColorTheme::System,
            ColorTheme::System => ColorTheme::Light,
        }
    }
}

/// The singleton settings row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub color_theme: ColorTheme,

    #[serde(default = "default_dynamic_color")]
    pub dynamic_color: bool,

    #[serde(default)]
    pub auto_delete_expired_cashbacks: bool,
}

fn default_dynamic_color() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            color_theme: ColorTheme::default(),
            dynamic_color: default_dynamic_color(),
            auto_delete_expired_cashbacks: false,
        }
    }
}
