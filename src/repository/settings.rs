use rusqlite::{params, Connection};

use crate::entities::{ColorTheme, Settings};
use crate::error::Result;

/// Read the singleton row (seeded by `setup_database`).
pub fn get(conn: &Connection) -> Result<Settings> {
    let settings = conn.query_row(
        "SELECT color_theme, dynamic_color, auto_delete_expired_cashbacks FROM settings WHERE id = 1",
        [],
        |row| {
            let theme: String = row.get(0)?;
            Ok(Settings {
                color_theme: ColorTheme::parse(&theme).unwrap_or_default(),
                dynamic_color: row.get(1)?,
                auto_delete_expired_cashbacks: row.get(2)?,
            })
        },
    )?;
    Ok(settings)
}

pub fn update(conn: &Connection, settings: &Settings) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (id, color_theme, dynamic_color, auto_delete_expired_cashbacks)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            color_theme = excluded.color_theme,
            dynamic_color = excluded.dynamic_color,
            auto_delete_expired_cashbacks = excluded.auto_delete_expired_cashbacks",
        params![
            settings.color_theme.as_str(),
            settings.dynamic_color,
            settings.auto_delete_expired_cashbacks,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn test_defaults_seeded() {
        let conn = open_in_memory().unwrap();
        assert_eq!(get(&conn).unwrap(), Settings::default());
    }

    #[test]
    fn test_update_round_trip() {
        let conn = open_in_memory().unwrap();
        let settings = Settings {
            color_theme: ColorTheme::Dark,
            dynamic_color: false,
            auto_delete_expired_cashbacks: true,
        };
        update(&conn, &settings).unwrap();
        assert_eq!(get(&conn).unwrap(), settings);
    }
}
