//! UI Builder module for creating keyboards and formatting messages

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

// Import localization
use crate::localization::{t_args_lang, t_lang};

// Import domain types
use crate::models::{
    DiagnosisResult, HistoryPage, LiteraturePage, LiteratureSearchResults, SubscriptionPlan,
    SubscriptionStatus,
};
use crate::router::{FailureReason, Page};

pub const RETRY_SCAN: &str = "retry_scan";
pub const CATEGORY_PREFIX: &str = "category:";
pub const PLAN_PREFIX: &str = "plan:";
pub const LITERATURE_PREFIX: &str = "lit:";
pub const CANCEL_SUBSCRIPTION_PREFIX: &str = "cancel_sub:";

const MAX_BUTTON_CHARS: usize = 32;

/// Shorten button labels, counting characters rather than bytes
fn button_label(text: &str) -> String {
    if text.chars().count() > MAX_BUTTON_CHARS {
        let truncated: String = text.chars().take(MAX_BUTTON_CHARS - 3).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

/// Format a diagnosis for the result page
pub fn format_diagnosis(diagnosis: &DiagnosisResult, language_code: Option<&str>) -> String {
    let mut result = format!(
        "🩺 {}\n\n{}\n{}",
        t_lang("scan-result-title", language_code),
        diagnosis.condition_label,
        diagnosis.description
    );

    if let Some(confidence) = diagnosis.confidence {
        let percent = format!("{:.0}", confidence * 100.0);
        result.push_str("\n\n");
        result.push_str(&t_args_lang(
            "scan-result-confidence",
            &[("percent", percent.as_str())],
            language_code,
        ));
    }

    if !diagnosis.recommendations.is_empty() {
        result.push_str(&format!(
            "\n\n{}\n",
            t_lang("scan-result-recommendations", language_code)
        ));
        for recommendation in &diagnosis.recommendations {
            result.push_str(&format!("• {recommendation}\n"));
        }
    }

    result.push_str(&format!("\n\nℹ️ {}", t_lang("scan-result-disclaimer", language_code)));
    result
}

/// Message for the single failure page
pub fn format_failure(reason: &FailureReason, language_code: Option<&str>) -> String {
    match reason {
        FailureReason::Analysis => t_lang("scan-failed-analysis", language_code),
        FailureReason::Timeout => t_lang("scan-failed-timeout", language_code),
        FailureReason::Error(message) => {
            t_args_lang("scan-failed-error", &[("error", message.as_str())], language_code)
        }
    }
}

/// Text for a routed page; `None` for pages rendered by their own command
pub fn render_page(page: &Page, language_code: Option<&str>) -> Option<String> {
    match page {
        Page::Result(diagnosis) => Some(format_diagnosis(diagnosis, language_code)),
        Page::Failure(reason) => Some(format_failure(reason, language_code)),
        Page::Scanner => Some(t_lang("scan-started", language_code)),
        _ => None,
    }
}

pub fn create_retry_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        format!("🔄 {}", t_lang("scan-retry-button", language_code)),
        RETRY_SCAN,
    )]])
}

pub fn format_history(page: &HistoryPage, language_code: Option<&str>) -> String {
    if page.history.is_empty() {
        return t_lang("history-empty", language_code);
    }

    let total = page.total.to_string();
    let mut result = t_args_lang("history-title", &[("total", total.as_str())], language_code);
    result.push_str("\n\n");

    for (i, entry) in page.history.iter().enumerate() {
        let date = entry
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        result.push_str(&format!("{}. {} {}\n", i + 1, entry.query_text, date));
    }

    result
}

pub fn format_literature(page: &LiteraturePage, language_code: Option<&str>) -> String {
    if page.literature.is_empty() {
        return t_lang("literature-empty", language_code);
    }

    let mut result = format!("📚 {}\n\n", t_lang("literature-title", language_code));
    for item in &page.literature {
        result.push_str(&format!("▫️ {} ({})\n", item.title, item.category));
        if let Some(description) = item.description.as_deref().filter(|d| !d.is_empty()) {
            result.push_str(description);
            result.push('\n');
        }
        result.push('\n');
    }
    result
}

pub fn format_search_results(results: &LiteratureSearchResults, language_code: Option<&str>) -> String {
    if results.results.is_empty() {
        return t_args_lang(
            "literature-search-empty",
            &[("query", results.query.as_str())],
            language_code,
        );
    }

    let total = results.total.to_string();
    let mut result = t_args_lang(
        "literature-search-title",
        &[("query", results.query.as_str()), ("total", total.as_str())],
        language_code,
    );
    result.push_str("\n\n");
    for hit in &results.results {
        result.push_str(&format!("▫️ {} ({})\n", hit.title, hit.category));
        if let Some(snippet) = &hit.relevance_snippet {
            result.push_str(&format!("…{snippet}…\n"));
        }
        result.push('\n');
    }
    result
}

/// One button per literature item, opening its detail
pub fn create_literature_keyboard<'a>(
    items: impl IntoIterator<Item = (i64, &'a str)>,
) -> InlineKeyboardMarkup {
    let buttons = items
        .into_iter()
        .map(|(id, title)| {
            vec![InlineKeyboardButton::callback(
                button_label(title),
                format!("{LITERATURE_PREFIX}{id}"),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(buttons)
}

pub fn create_categories_keyboard(categories: &[String]) -> InlineKeyboardMarkup {
    let buttons = categories
        .chunks(2)
        .map(|row| {
            row.iter()
                .map(|category| {
                    InlineKeyboardButton::callback(
                        button_label(category),
                        format!("{CATEGORY_PREFIX}{category}"),
                    )
                })
                .collect()
        })
        .collect::<Vec<Vec<_>>>();
    InlineKeyboardMarkup::new(buttons)
}

pub fn format_subscription_status(status: &SubscriptionStatus, language_code: Option<&str>) -> String {
    match (&status.subscription, status.has_active_subscription) {
        (Some(subscription), true) => {
            let days = subscription.days_remaining.to_string();
            let mut result = t_args_lang(
                "subscription-active",
                &[
                    ("plan", subscription.subscription_type.as_str()),
                    ("days", days.as_str()),
                ],
                language_code,
            );
            if subscription.auto_renew {
                result.push('\n');
                result.push_str(&t_lang("subscription-auto-renew", language_code));
            }
            result
        }
        _ => t_lang("subscription-none", language_code),
    }
}

/// Offer to stop auto-renewal of an active subscription
pub fn create_subscription_keyboard(
    status: &SubscriptionStatus,
    language_code: Option<&str>,
) -> Option<InlineKeyboardMarkup> {
    let subscription = status.subscription.as_ref().filter(|s| s.auto_renew)?;
    Some(InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        t_lang("subscription-cancel-button", language_code),
        format!("{CANCEL_SUBSCRIPTION_PREFIX}{}", subscription.id),
    )]]))
}

pub fn format_plans(plans: &[SubscriptionPlan], language_code: Option<&str>) -> String {
    if plans.is_empty() {
        return t_lang("plans-empty", language_code);
    }

    let mut result = format!("💳 {}\n\n", t_lang("plans-title", language_code));
    for plan in plans {
        let price = plan.price.to_string();
        result.push_str(&format!(
            "▫️ {} ({})\n{}\n",
            plan.name,
            plan.duration,
            t_args_lang("plan-price", &[("price", price.as_str())], language_code)
        ));
        if let Some(description) = &plan.description {
            result.push_str(description);
            result.push('\n');
        }
        result.push('\n');
    }
    result
}

pub fn create_plans_keyboard(plans: &[SubscriptionPlan]) -> InlineKeyboardMarkup {
    let buttons = plans
        .iter()
        .map(|plan| {
            vec![InlineKeyboardButton::callback(
                button_label(&format!("{} · {}", plan.name, plan.price)),
                format!("{PLAN_PREFIX}{}", plan.plan_type.as_str()),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(buttons)
}
