#![forbid(unsafe_code)]

//! Persisted preferences. Loading and saving are both best-effort: a broken
//! or missing file falls back to defaults and is logged, never surfaced as a
//! failure.

use std::fs;
use std::path::PathBuf;

use eframe::egui;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ThemePref {
    #[default]
    System,
    Dark,
    Light,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Prefs {
    pub(crate) theme: ThemePref,
    /// Per-level heading colors in the source editor.
    pub(crate) heading_colors: bool,
    /// Idle seconds before unsaved edits autosave.
    pub(crate) autosave_secs: u64,
    pub(crate) zoom: f32,
}

impl Default for Prefs {
    fn default() -> Self {
        Self {
            theme: ThemePref::System,
            heading_colors: false,
            autosave_secs: 2,
            zoom: 1.0,
        }
    }
}

fn prefs_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("inkdown").join("prefs.toml"))
}

impl Prefs {
    pub(crate) fn load() -> Self {
        let Some(path) = prefs_path() else {
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(prefs) => prefs,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "ignoring malformed prefs");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub(crate) fn save(&self) {
        let Some(path) = prefs_path() else {
            return;
        };
        let Ok(contents) = toml::to_string(self) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&path, contents) {
            tracing::warn!(path = %path.display(), %err, "could not save prefs");
        }
    }

    pub(crate) fn apply(&self, ctx: &egui::Context) {
        match self.theme {
            // System keeps whatever the platform integration picked.
            ThemePref::System => {}
            ThemePref::Dark => ctx.set_visuals(egui::Visuals::dark()),
            ThemePref::Light => ctx.set_visuals(egui::Visuals::light()),
        }
        ctx.set_zoom_factor(self.zoom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let prefs = Prefs {
            theme: ThemePref::Dark,
            heading_colors: true,
            autosave_secs: 5,
            zoom: 1.2,
        };
        let encoded = toml::to_string(&prefs).unwrap_or_default();
        let decoded: Prefs = toml::from_str(&encoded).unwrap_or_default();
        assert_eq!(decoded, prefs);
    }

    #[test]
    fn unknown_or_missing_fields_fall_back_to_defaults() {
        let decoded: Prefs = toml::from_str("theme = \"dark\"\n").unwrap_or_default();
        assert_eq!(decoded.theme, ThemePref::Dark);
        assert_eq!(decoded.autosave_secs, Prefs::default().autosave_secs);
    }
}
