use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static RE_LOCALE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:\.\d{3})+(?:,\d+)?|\d+(?:,\d+)?").expect("invalid regex: locale number")
});

static RE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\.\s?(\d{1,2})\.\s?(\d{4})\b").expect("invalid regex: date")
});

static RE_POSTAL_CITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4,5})\s+([A-Za-zÄÖÜäöüß][^,;]*)").expect("invalid regex: postal city")
});

static RE_POSTAL_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4,5})\b").expect("invalid regex: postal code"));

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses the first number of an Austrian-formatted text such as
/// `"EUR 123.456,78"`, `"50.000,--"` or `"85,5 m²"`.
///
/// Dots are thousand separators and the comma is the decimal mark. Text
/// without any digits yields `None`, never zero.
pub fn parse_locale_number(text: &str) -> Option<f64> {
    let token = RE_LOCALE_NUMBER.find(text)?.as_str();
    token.replace('.', "").replace(',', ".").parse::<f64>().ok()
}

/// `50000.0` → `"50.000,00"`.
pub fn format_locale_number(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}{grouped},{:02}", cents % 100)
}

/// The first `dd.mm.yyyy` date in `text`.
pub fn parse_first_date(text: &str) -> Option<NaiveDate> {
    RE_DATE.captures_iter(text).find_map(|caps| {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

/// Splits `"1010 Wien"` or `"Hauptstraße 1, 1010 Wien"` into postal code and city.
pub fn split_postal_city(text: &str) -> (Option<u32>, Option<String>) {
    if let Some(caps) = RE_POSTAL_CITY.captures(text) {
        let code = caps[1].parse().ok();
        let city = normalize_whitespace(&caps[2]);
        return (code, Some(city).filter(|c| !c.is_empty()));
    }
    let code = RE_POSTAL_CODE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok());
    (code, None)
}

/// Canonical form of a street address used for equality matching.
///
/// Lowercases, folds `ß` to `ss`, drops punctuation other than `/` and `-`,
/// and expands the usual street abbreviations so that `"Hauptstr. 1"`,
/// `"Hauptstrasse 1"` and `"Hauptstraße 1"` compare equal.
pub fn normalize_address(address: &str) -> String {
    let folded = address.to_lowercase().replace('ß', "ss");

    folded
        .split_whitespace()
        .map(expand_abbreviation)
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '/' || *c == '-')
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn expand_abbreviation(token: &str) -> String {
    // Longer suffixes first: "weg." must not be read as "we" + "g.".
    const SUFFIXES: [(&str, &str); 5] = [
        ("hptstr.", "hauptstrasse"),
        ("str.", "strasse"),
        ("weg.", "weg"),
        ("pl.", "platz"),
        ("g.", "gasse"),
    ];

    let token = token.trim_end_matches(',');
    if token == "nr." {
        return String::new();
    }
    for (suffix, expansion) in SUFFIXES {
        if let Some(stem) = token.strip_suffix(suffix) {
            return format!("{stem}{expansion}");
        }
    }
    token.to_string()
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
