//! Human-readable language names (as carried on the wire) to provider locale
//! codes. Unknown names default to English / `en-US`.

/// `(display name, BCP-47-ish locale code)`. Not exhaustive — extend as new
/// rooms need more languages; unknown names fall back to English.
const LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("English", "en-US"),
    ("Spanish", "es-ES"),
    ("French", "fr-FR"),
    ("German", "de-DE"),
    ("Italian", "it-IT"),
    ("Portuguese", "pt-BR"),
    ("Arabic", "ar-SA"),
    ("Mandarin", "zh-CN"),
    ("Japanese", "ja-JP"),
    ("Korean", "ko-KR"),
    ("Russian", "ru-RU"),
    ("Hindi", "hi-IN"),
    ("Dutch", "nl-NL"),
    ("Turkish", "tr-TR"),
    ("Vietnamese", "vi-VN"),
    ("Polish", "pl-PL"),
    ("Swedish", "sv-SE"),
    ("Greek", "el-GR"),
    ("Hebrew", "he-IL"),
];

pub const DEFAULT_LANGUAGE: &str = "English";
pub const DEFAULT_LOCALE: &str = "en-US";

/// Resolves a display name (`"English"`, `"Arabic"`) to a provider locale
/// code, defaulting to English for anything unrecognized.
pub fn resolve_locale(display_name: &str) -> &'static str {
    LANGUAGE_TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(display_name))
        .map(|(_, locale)| *locale)
        .unwrap_or(DEFAULT_LOCALE)
}

/// STT reports Arabic as `ar-SA`, but the TTS provider only ships cross-region
/// Arabic voices under `ar-XA`. Voice *selection* must use this mapping even
/// though transcription and translation keep using `ar-SA`.
pub fn tts_voice_locale(display_name: &str) -> &'static str {
    let locale = resolve_locale(display_name);
    if locale == "ar-SA" {
        "ar-XA"
    } else {
        locale
    }
}

/// Base language of a locale, e.g. `en-US` -> `en`.
pub fn base_language(locale: &str) -> &str {
    locale.split('-').next().unwrap_or(locale)
}

/// One placeholder default voice per known locale, for wiring a TTS provider
/// that hasn't been told the vendor's actual voice catalog yet.
pub fn default_known_voices() -> Vec<(&'static str, &'static str)> {
    LANGUAGE_TABLE
        .iter()
        .map(|(_, locale)| (*locale, "default"))
        .collect()
}

/// Every known locale sharing `base` (e.g. `"fr"` -> `["fr-FR"]`), searched
/// across the whole table rather than just the default locale — used by the
/// TTS client's base-language fallback tier.
pub fn locales_sharing_base(base: &str) -> Vec<&'static str> {
    LANGUAGE_TABLE
        .iter()
        .map(|(_, locale)| *locale)
        .filter(|locale| base_language(locale) == base)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_language() {
        assert_eq!(resolve_locale("English"), "en-US");
        assert_eq!(resolve_locale("Arabic"), "ar-SA");
    }

    #[test]
    fn unknown_language_defaults_to_english() {
        assert_eq!(resolve_locale("Klingon"), "en-US");
    }

    #[test]
    fn arabic_voice_selection_uses_cross_region_locale() {
        assert_eq!(tts_voice_locale("Arabic"), "ar-XA");
        assert_eq!(resolve_locale("Arabic"), "ar-SA");
    }

    #[test]
    fn base_language_strips_region() {
        assert_eq!(base_language("pt-BR"), "pt");
    }

    #[test]
    fn locales_sharing_base_finds_siblings_across_the_table() {
        assert_eq!(locales_sharing_base("fr"), vec!["fr-FR"]);
        assert_eq!(locales_sharing_base("xx"), Vec::<&str>::new());
    }
}
