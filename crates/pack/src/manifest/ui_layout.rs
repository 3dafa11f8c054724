//! `[ui]` option screen layout hints

use crate::diagnostics::{Diagnostics, coerce_positive_int, first_present};
use crate::pipelines::segment::ordered_unique;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use toml::{Table, Value};

/// Screen shown when no screen key is given
pub const MAIN_SCREEN: &str = "main";

static PATH_LIST_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,\s]+").expect("valid regex"));

/// A profile preset value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Option screen layout consumed by host GUIs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiLayout {
    pub screens: BTreeMap<String, Vec<String>>,
    pub screen_columns: BTreeMap<String, u32>,
    pub sliders: BTreeSet<String>,
    pub profiles: BTreeMap<String, BTreeMap<String, ProfileValue>>,
}

impl UiLayout {
    /// Parses the `[ui]` table
    pub fn parse(table: Option<&Table>, diag: &mut Diagnostics) -> Self {
        let mut layout = Self::default();
        let Some(table) = table else {
            return layout;
        };

        match table.get("screen") {
            Some(value @ (Value::Array(_) | Value::String(_))) => {
                layout.put_screen(MAIN_SCREEN, read_path_list(Some(value), "ui.screen", diag));
            }
            Some(Value::Table(screens)) => layout.parse_screen_table(screens, diag),
            Some(_) => diag.error("Invalid value for ui.screen (expected array, string, or table)."),
            None => {}
        }

        match table.get("columns") {
            Some(Value::Integer(n)) if (1..=i64::from(i32::MAX)).contains(n) => {
                layout.screen_columns.insert(MAIN_SCREEN.to_string(), *n as u32);
            }
            Some(Value::Integer(_)) => {}
            Some(_) => diag.error("Invalid integer for ui.columns"),
            None => {}
        }
        if let Some(columns) = table.get("screen_columns").and_then(Value::as_table) {
            for (screen, value) in columns {
                if let Some(value) = coerce_positive_int(value, &format!("ui.screen_columns.{screen}"), diag) {
                    layout.screen_columns.insert(normalize_screen_key(screen), value);
                }
            }
        }

        let sliders = first_present(table, &["sliders", "slider"]).map(|(_, value)| value);
        layout.sliders.extend(read_path_list(sliders, "ui.sliders", diag));

        let profiles = table.get("profile").and_then(Value::as_table).or_else(|| table.get("profiles").and_then(Value::as_table));
        if let Some(profiles) = profiles {
            layout.parse_profiles(profiles, diag);
        }
        layout
    }

    fn put_screen(&mut self, screen: &str, paths: Vec<String>) {
        if !paths.is_empty() {
            self.screens.insert(normalize_screen_key(screen), paths);
        }
    }

    fn parse_screen_table(&mut self, screens: &Table, diag: &mut Diagnostics) {
        for (key, value) in screens {
            let context = format!("ui.screen.{key}");
            match value {
                Value::Array(_) | Value::String(_) => self.put_screen(key, read_path_list(Some(value), &context, diag)),
                Value::Table(screen) => {
                    let list = first_present(screen, &["options", "items", "entries", "list"]).map(|(_, value)| value);
                    self.put_screen(key, read_path_list(list, &format!("{context}.options"), diag));
                    if let Some(columns) = screen.get("columns") {
                        if let Some(columns) = coerce_positive_int(columns, &format!("{context}.columns"), diag) {
                            self.screen_columns.insert(normalize_screen_key(key), columns);
                        }
                    }
                }
                _ => diag.error(format!("Invalid value for {context} (expected array, string, or table).")),
            }
        }
    }

    fn parse_profiles(&mut self, profiles: &Table, diag: &mut Diagnostics) {
        for (name, raw) in profiles {
            let Value::Table(values) = raw else {
                diag.error(format!("Invalid table for ui.profile.{name}."));
                continue;
            };
            let mut parsed = BTreeMap::new();
            for (path, value) in values {
                let value = match value {
                    Value::Boolean(b) => ProfileValue::Bool(*b),
                    Value::Integer(n) => ProfileValue::Int(*n),
                    Value::Float(n) => ProfileValue::Float(*n),
                    Value::String(s) => ProfileValue::Text(s.clone()),
                    _ => {
                        diag.error(format!("Invalid scalar for ui.profile.{name}.{path} (expected string/number/bool)."));
                        continue;
                    }
                };
                if !path.trim().is_empty() {
                    parsed.insert(path.trim().to_string(), value);
                }
            }
            if !parsed.is_empty() && !name.trim().is_empty() {
                self.profiles.insert(name.trim().to_string(), parsed);
            }
        }
    }

    pub fn has_any_layout(&self) -> bool {
        !(self.screens.is_empty() && self.sliders.is_empty() && self.profiles.is_empty() && self.screen_columns.is_empty())
    }

    /// Option paths of `screen`, falling back to the main screen
    pub fn screen_order(&self, screen: &str) -> &[String] {
        self.screens
            .get(&normalize_screen_key(screen))
            .or_else(|| self.screens.get(MAIN_SCREEN))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Column count of `screen`, then of the main screen, then `fallback`
    pub fn screen_columns(&self, screen: &str, fallback: u32) -> u32 {
        self.screen_columns
            .get(&normalize_screen_key(screen))
            .or_else(|| self.screen_columns.get(MAIN_SCREEN))
            .copied()
            .unwrap_or(fallback)
    }

    pub fn is_slider(&self, option_path: &str) -> bool {
        !option_path.trim().is_empty() && self.sliders.contains(option_path.trim())
    }
}

/// Lowercased screen key, `main` when blank
pub fn normalize_screen_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() { MAIN_SCREEN.to_string() } else { trimmed.to_lowercase() }
}

/// Reads a path list from a separated string or a string array
fn read_path_list(raw: Option<&Value>, context: &str, diag: &mut Diagnostics) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(Value::String(text)) => ordered_unique(PATH_LIST_SEPARATOR.split(text).filter(|item| !item.trim().is_empty()).map(|item| item.trim().to_string())),
        Some(Value::Array(items)) => {
            let mut paths = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(text) if !text.trim().is_empty() => paths.push(text.trim().to_string()),
                    _ => diag.error(format!("Invalid string in {context} at index {i}.")),
                }
            }
            ordered_unique(paths)
        }
        Some(_) => {
            diag.error(format!("Invalid value for {context} (expected string or string array)."));
            Vec::new()
        }
    }
}
