//! # Localization Tests
//!
//! Message retrieval, language resolution and fallbacks for the bundled
//! English and Russian resources.

use std::collections::HashMap;
use zdravscan::localization::{t_args_lang, t_lang, init_localization, LocalizationManager};

fn setup_localization() -> LocalizationManager {
    LocalizationManager::new().expect("Failed to create localization manager")
}

#[test]
fn test_get_message_existing_key() {
    let manager = setup_localization();

    let message = manager.get_message_in_language("help", "en", None);
    assert!(message.contains("/history"));
    assert!(message.contains("/literature"));
}

#[test]
fn test_get_message_nonexistent_key() {
    let manager = setup_localization();

    let message = manager.get_message_in_language("nonexistent-key", "en", None);
    assert!(message.starts_with("Missing translation:"));
}

#[test]
fn test_unsupported_language_falls_back_to_english() {
    let manager = setup_localization();

    let fallback = manager.get_message_in_language("scan-started", "de", None);
    let english = manager.get_message_in_language("scan-started", "en", None);
    assert_eq!(fallback, english);
}

#[test]
fn test_russian_differs_from_english() {
    let manager = setup_localization();

    let russian = manager.get_message_in_language("scan-failed-timeout", "ru", None);
    let english = manager.get_message_in_language("scan-failed-timeout", "en", None);
    assert!(!russian.starts_with("Missing translation:"));
    assert_ne!(russian, english);
}

#[test]
fn test_get_message_with_args() {
    let manager = setup_localization();

    let mut args = HashMap::new();
    args.insert("percent", "87");

    let message = manager.get_message_in_language("scan-result-confidence", "en", Some(&args));
    assert_eq!(message, "Confidence: 87%");
}

#[test]
fn test_language_resolution() {
    let manager = setup_localization();

    assert_eq!(manager.resolve_language(Some("ru")), "ru");
    assert_eq!(manager.resolve_language(Some("ru-RU")), "ru");
    assert_eq!(manager.resolve_language(Some("EN_gb")), "en");
    assert_eq!(manager.resolve_language(Some("fr")), "en");
    assert_eq!(manager.resolve_language(None), "en");
}

#[test]
fn test_every_english_key_is_translated() {
    let manager = setup_localization();
    let english = include_str!("../locales/en/main.ftl");

    let keys = english
        .lines()
        .filter(|line| !line.starts_with(['#', ' ']) && line.contains(" = "))
        .filter_map(|line| line.split(" = ").next());

    for key in keys {
        let russian = manager.get_message_in_language(key, "ru", None);
        let fallback = manager.get_message_in_language(key, "en", None);
        assert!(!fallback.starts_with("Missing translation:"), "{key}");
        assert_ne!(russian, fallback, "{key} is not translated");
    }
}

#[test]
fn test_convenience_functions() {
    init_localization().expect("Failed to initialize localization");

    assert!(t_lang("history-empty", Some("ru-RU")).contains("пуста"));

    let message = t_args_lang("welcome", &[("name", "Ivan")], Some("en"));
    assert!(message.contains("Ivan"));
}
