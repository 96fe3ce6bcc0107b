// src/ingest/mod.rs
pub mod config;
pub mod coordinator;
pub mod fallback;
pub mod providers;
pub mod scheduler;
pub mod transport;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

/// One-time metrics registration (so series show up in the exposition).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregation_cycles_total", "Aggregation cycles run.");
        describe_counter!(
            "aggregation_source_live_total",
            "Sources that delivered live data in a cycle."
        );
        describe_counter!(
            "aggregation_source_fallback_total",
            "Sources substituted by their fallback set in a cycle."
        );
        describe_counter!(
            "aggregation_fields_dropped_total",
            "Fields dropped by the key normalizer (unmapped or non-numeric)."
        );
        describe_counter!(
            "aggregation_store_errors_total",
            "Snapshot persistence failures."
        );
        describe_histogram!(
            "aggregation_fetch_ms",
            "Per-source acquisition time in milliseconds."
        );
        describe_gauge!(
            "aggregation_last_cycle_ts",
            "Unix ts when the last aggregation cycle finished."
        );
    });
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|</?[^>]+>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
// A space-grouped integer part only continues across a space when exactly
// three digits follow, so "6,1 2023" stops before the year.
static RE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[-−–]?[ \u{00A0}\u{202F}]*(?:\d{1,3}(?:[ \u{00A0}\u{202F}]\d{3})+\b(?:[.,]\d+)?|\d+(?:[.,]\d+)*)",
    )
    .unwrap()
});

/// Reduce an HTML fragment to plain text: decode entities, strip tags,
/// collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // Strip tags first so encoded angle brackets survive as text.
    let out = RE_TAGS.replace_all(s, " ");
    let out = html_escape::decode_html_entities(&out).to_string();
    let out = out.replace('\u{00A0}', " ");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// How a page writes decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberLocale {
    /// Guess from the separators present. A lone comma followed by exactly
    /// three digits reads as a thousands separator.
    Auto,
    /// French formatting: the comma is always the decimal separator and
    /// dots or spaces group thousands.
    French,
}

/// Parse the first number in a human-formatted string, guessing separators.
///
/// Handles `"3.2 %"`, `"3,2%"`, `"1,234.5"`, `"1 234,5"`, and the unicode
/// minus. Returns `None` for anything without a finite number.
pub fn parse_number(s: &str) -> Option<f64> {
    parse_number_in(s, NumberLocale::Auto)
}

/// Parse the first number in `s` using the separators of `locale`.
pub fn parse_number_in(s: &str, locale: NumberLocale) -> Option<f64> {
    let m = RE_NUMBER.find(s)?;
    let raw: String = m
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '−' || c == '–' { '-' } else { c })
        .collect();

    let cleaned = match locale {
        NumberLocale::French => french_separators(&raw),
        NumberLocale::Auto => auto_separators(&raw),
    };
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn auto_separators(raw: &str) -> String {
    match (raw.rfind('.'), raw.rfind(',')) {
        // Both present: the later one is the decimal separator.
        (Some(d), Some(c)) if c > d => raw.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => raw.replace(',', ""),
        (None, Some(c)) => {
            let tail = raw.len() - c - 1;
            if raw.matches(',').count() == 1 && tail != 3 {
                raw.replace(',', ".")
            } else {
                raw.replace(',', "")
            }
        }
        _ => raw.to_string(),
    }
}

fn french_separators(raw: &str) -> String {
    if raw.contains(',') {
        return raw.replace('.', "").replace(',', ".");
    }
    // No comma: a single dot is still a decimal unless it groups three digits.
    match raw.rfind('.') {
        Some(d) if raw.matches('.').count() == 1 && raw.len() - d - 1 != 3 => raw.to_string(),
        Some(_) => raw.replace('.', ""),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "<div class=\"x\">Inflation&nbsp;:<b> 6,1&nbsp;%</b></div>\n<script>var a=1;</script>";
        assert_eq!(normalize_text(s), "Inflation : 6,1 %");
    }

    #[test]
    fn parse_number_handles_common_formats() {
        assert_eq!(parse_number("3.2 %"), Some(3.2));
        assert_eq!(parse_number("taux: 3,2%"), Some(3.2));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("1 234,5 MDH"), Some(1234.5));
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("−4.1"), Some(-4.1));
        assert_eq!(parse_number("37,500,000"), Some(37_500_000.0));
        assert_eq!(parse_number("10,8123"), Some(10.8123));
        assert_eq!(parse_number("37 500 000 habitants"), Some(37_500_000.0));
        assert_eq!(parse_number("n/a"), None);
    }

    #[test]
    fn trailing_year_is_not_merged_into_the_value() {
        assert_eq!(parse_number("6,1 2023"), Some(6.1));
        assert_eq!(parse_number("6.1 2023"), Some(6.1));
        assert_eq!(parse_number("12 2023"), Some(12.0));
        assert_eq!(parse_number("3,2 % (T2 2024)"), Some(3.2));
        assert_eq!(parse_number("1 234,5 en 2023"), Some(1234.5));
    }

    #[test]
    fn french_locale_reads_comma_as_decimal() {
        assert_eq!(parse_number("3,500"), Some(3500.0));
        assert_eq!(parse_number_in("3,500", NumberLocale::French), Some(3.5));
        assert_eq!(parse_number_in("1.580,2", NumberLocale::French), Some(1580.2));
        assert_eq!(parse_number_in("1 580,25 MDH", NumberLocale::French), Some(1580.25));
        assert_eq!(parse_number_in("2.75", NumberLocale::French), Some(2.75));
        assert_eq!(parse_number_in("37.500.000", NumberLocale::French), Some(37_500_000.0));
        assert_eq!(parse_number_in("-24,3", NumberLocale::French), Some(-24.3));
    }
}
