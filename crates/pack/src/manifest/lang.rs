//! Translation files under `lang/`

use crate::diagnostics::Diagnostics;
use crate::storage::ShaderpackStorage;
use std::collections::HashMap;

/// Directory holding `<locale>.json` translation maps
pub const LANG_DIR: &str = "lang";

/// Locale used when the requested one has no translations
pub const DEFAULT_LOCALE: &str = "en_us";

/// Lowercased locale, [`DEFAULT_LOCALE`] when blank
pub fn normalize_locale(locale: &str) -> String {
    let trimmed = locale.trim();
    if trimmed.is_empty() { DEFAULT_LOCALE.to_string() } else { trimmed.to_lowercase() }
}

/// Loads the translation map for `locale`, falling back to `en_us`
pub fn load_translations(storage: &dyn ShaderpackStorage, locale: &str, diag: &mut Diagnostics) -> HashMap<String, String> {
    let locale = normalize_locale(locale);
    let translations = read_lang_file(storage, &locale, diag);
    if translations.is_empty() && locale != DEFAULT_LOCALE {
        return read_lang_file(storage, DEFAULT_LOCALE, diag);
    }
    translations
}

fn read_lang_file(storage: &dyn ShaderpackStorage, locale: &str, diag: &mut Diagnostics) -> HashMap<String, String> {
    let path = format!("{LANG_DIR}/{locale}.json");
    if !storage.exists(&path) {
        return HashMap::new();
    }
    match storage.read_string(&path).map_err(|e| e.to_string()).and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string())) {
        Ok(translations) => translations,
        Err(e) => {
            tracing::debug!("lang file {path}: {e}");
            diag.warn(format!("Failed to read lang file: {path}"));
            HashMap::new()
        }
    }
}
