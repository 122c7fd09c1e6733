//! Anchor-then-pattern rules for appraisal documents.
//!
//! Each rule names the phrases that open its section, the phrases that close
//! it, how many lines it may span and the parser applied to that window.
//! Rules are tried in order and a rule only contributes to a fact group that
//! no earlier rule has filled. Supporting another document layout means
//! adding a rule, not touching the scan loop.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::AppraisalFacts;
use crate::utils::{normalize_whitespace, parse_locale_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactGroup {
    /// Owner name and delivery address.
    Owner,
    /// Creditor and claim amount.
    Claim,
}

impl FactGroup {
    pub fn is_filled(&self, facts: &AppraisalFacts) -> bool {
        match self {
            FactGroup::Owner => facts.has_owner(),
            FactGroup::Claim => facts.has_claim(),
        }
    }
}

impl std::fmt::Display for FactGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactGroup::Owner => write!(f, "owner"),
            FactGroup::Claim => write!(f, "creditor/claim"),
        }
    }
}

pub struct ExtractionRule {
    pub name: &'static str,
    pub group: FactGroup,
    /// Lowercase phrases that open the window.
    pub anchors: &'static [&'static str],
    /// Lowercase phrases that close the window (the closing line is excluded).
    pub terminators: &'static [&'static str],
    pub max_lines: usize,
    /// The anchor must start within this many characters of the document.
    pub within_chars: Option<usize>,
    pub parse: fn(&[&str]) -> Option<AppraisalFacts>,
}

pub const RULES: &[ExtractionRule] = &[
    ExtractionRule {
        name: "land register section B",
        group: FactGroup::Owner,
        anchors: &["** b **", "sektion b"],
        terminators: &["** c **", "sektion c", "** hinweis", "** d **"],
        max_lines: 150,
        within_chars: None,
        parse: parse_owner_section,
    },
    ExtractionRule {
        name: "land register section C",
        group: FactGroup::Claim,
        anchors: &["** c **", "sektion c"],
        terminators: &["** hinweis", "sektion d", "** d **"],
        max_lines: 400,
        within_chars: None,
        parse: parse_claim_section,
    },
    ExtractionRule {
        name: "title page obligated party",
        group: FactGroup::Owner,
        anchors: &["verpflichtete partei", "verpflichtete:"],
        terminators: &["betreibende", "auftraggeber"],
        max_lines: 4,
        within_chars: Some(3000),
        parse: parse_title_owner,
    },
    ExtractionRule {
        name: "title page pursuing party",
        group: FactGroup::Claim,
        anchors: &["betreibende partei", "betreibende:"],
        terminators: &["verpflichtete", "auftraggeber"],
        max_lines: 6,
        within_chars: Some(3000),
        parse: parse_title_claim,
    },
];

static RE_ADR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ADR:\s*(.+?)(?:,\s*|\s{2,})(\d{4,5})\s*$")
        .expect("invalid regex: ADR with postal code")
});

static RE_ADR_SIMPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ADR:\s*(.+)$").expect("invalid regex: ADR"));

static RE_INLINE_OWNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:eigentümer(?:in)?\s*:?\s*)?([^,\d][^,]*?),\s*([^,]*\d[^,]*?),\s*(\d{4,5}\s+\S.*)$",
    )
    .expect("invalid regex: inline owner")
});

static RE_STREET_PLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^,]*\d[^,]*?),\s*(\d{4,5}\s+\S.*)$").expect("invalid regex: street and place")
});

static RE_REGISTER_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d|[a-z]\s+\d|\*)").expect("invalid regex: register noise")
});

static RE_CREDITOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:(?:für|zugunsten(?:\s+von)?)\s+|(?:gläubiger(?:in)?|betreibende\s+partei)\s*:\s*)(.+)$",
    )
    .expect("invalid regex: creditor")
});

const AMOUNT: &str = r"(\d{1,3}(?:\.\d{3})+(?:,\d{1,2}|,-+)?|\d+(?:,\d{1,2}|,-+)?)";

static RE_MONEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:EUR|€)\s*{AMOUNT}")).expect("invalid regex: money")
});

static RE_MONEY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i){AMOUNT}\s*(?:EUR\b|€)")).expect("invalid regex: money suffix")
});

/// A claim label followed directly by a bare amount, e.g. `Forderung: 50.000,00`.
static RE_LABELED_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:höchstbetrag|betrag|forderung)\b\s*:?\s*(?:EUR|€)?\s*{AMOUNT}"
    ))
    .expect("invalid regex: labeled amount")
});

/// `Sektion B:` or a `*** B ***` banner opening a line.
static RE_SECTION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:sektion\s+[a-d]\b|\*+\s*[a-d]\s*\*+)\s*:?\s*")
        .expect("invalid regex: section prefix")
});

static RE_ENTRY_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+\s+[a-z]\s+\d+/\d{4}").expect("invalid regex: register entry")
});

static RE_COMPANY_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\(?\bFN\s*\d+\s*[a-z]?\)?\s*$").expect("invalid regex: company number")
});

const PROCEEDING_MARKERS: [&str; 4] = ["hereinbringung", "vollstreckbar", "exekution", "forderung"];

/// Index of the first line at or after `from` containing one of `phrases`
/// as a whole phrase.
pub(crate) fn find_phrase(lines: &[&str], phrases: &[&str], from: usize) -> Option<usize> {
    (from..lines.len()).find(|&i| {
        let line = lines[i].to_lowercase();
        phrases.iter().any(|p| contains_phrase(&line, p))
    })
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(pos, _)| {
        haystack[pos + phrase.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric())
    })
}

/// The bounded window a rule scans, or `None` when its anchor is absent.
pub(crate) fn rule_window<'a>(rule: &ExtractionRule, lines: &[&'a str]) -> Option<Vec<&'a str>> {
    let start = find_phrase(lines, rule.anchors, 0)?;

    if let Some(limit) = rule.within_chars {
        let offset: usize = lines[..start].iter().map(|l| l.len() + 1).sum();
        if offset > limit {
            return None;
        }
    }

    let hard_end = (start + rule.max_lines).min(lines.len());
    let end = find_phrase(&lines[..hard_end], rule.terminators, start + 1).unwrap_or(hard_end);

    let mut window = lines[start..end].to_vec();
    let anchor_line = window[0];
    if let Some(prefix) = RE_SECTION_PREFIX.find(anchor_line) {
        window[0] = &anchor_line[prefix.end()..];
    }
    Some(window)
}

struct Owner {
    name: String,
    address: Option<String>,
    postal_city: Option<String>,
}

fn owners_to_facts(owners: Vec<Owner>) -> Option<AppraisalFacts> {
    if owners.is_empty() {
        return None;
    }

    let mut names: Vec<&str> = Vec::new();
    for owner in &owners {
        if !names.contains(&owner.name.as_str()) {
            names.push(&owner.name);
        }
    }
    let with_address = owners.iter().find(|o| o.address.is_some());

    Some(AppraisalFacts {
        owner: Some(names.join(" und ")),
        delivery_address: with_address.and_then(|o| o.address.clone()),
        delivery_postal_city: with_address.and_then(|o| o.postal_city.clone()),
        ..Default::default()
    })
}

/// `"Hauptstraße 1, Wien"` + `"1010"` → (`"Hauptstraße 1"`, `"1010 Wien"`).
fn register_address(street_and_city: &str, postal_code: Option<&str>) -> (String, Option<String>) {
    let street_and_city = street_and_city.trim().trim_end_matches(',');
    let (street, city) = match street_and_city.rsplit_once(',') {
        Some((street, city)) => (street.trim(), Some(city.trim())),
        None => (street_and_city, None),
    };
    let postal_city = match (postal_code, city) {
        (Some(code), Some(city)) => Some(format!("{code} {city}")),
        (Some(code), None) => Some(code.to_string()),
        (None, Some(city)) => Some(city.to_string()),
        (None, None) => None,
    };
    (street.to_string(), postal_city)
}

fn parse_adr_line(line: &str) -> Option<(String, Option<String>)> {
    if let Some(caps) = RE_ADR.captures(line) {
        return Some(register_address(&caps[1], Some(&caps[2])));
    }
    let raw = RE_ADR_SIMPLE.captures(line)?[1].trim().to_string();
    match RE_STREET_PLACE.captures(&raw) {
        Some(caps) => Some((caps[1].trim().to_string(), Some(normalize_whitespace(&caps[2])))),
        None => Some((raw, None)),
    }
}

/// Owners listed in section B.
///
/// Land register layout: an `ANTEIL:` line, the owner's name on one of the
/// next lines and a `GEB: … ADR: …` line below it. Summaries written by the
/// appraiser instead use one line per owner: `Name, Street 1, 1010 City`.
fn parse_owner_section(lines: &[&str]) -> Option<AppraisalFacts> {
    let mut owners = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.to_uppercase().contains("ANTEIL:") {
            continue;
        }

        let Some((j, name)) = lines
            .iter()
            .enumerate()
            .take((i + 8).min(lines.len()))
            .skip(i + 1)
            .map(|(j, l)| (j, l.trim()))
            .find(|(_, l)| {
                let upper = l.to_uppercase();
                !l.is_empty()
                    && !RE_REGISTER_NOISE.is_match(l)
                    && !upper.contains("GEB:")
                    && !upper.contains("ADR:")
                    && !upper.contains("ANTEIL:")
            })
        else {
            continue;
        };

        let address = lines
            .iter()
            .take((j + 4).min(lines.len()))
            .skip(j + 1)
            .find_map(|l| parse_adr_line(l.trim()));

        owners.push(Owner {
            name: normalize_whitespace(name),
            address: address.as_ref().map(|(street, _)| street.clone()),
            postal_city: address.and_then(|(_, place)| place),
        });
    }

    if owners.is_empty() {
        owners = lines
            .iter()
            .filter_map(|l| RE_INLINE_OWNER.captures(l.trim()))
            .map(|caps| Owner {
                name: normalize_whitespace(&caps[1]),
                address: Some(normalize_whitespace(&caps[2])),
                postal_city: Some(normalize_whitespace(&caps[3])),
            })
            .collect();
    }

    owners_to_facts(owners)
}

/// Splits a party line into the cleaned name and the raw text after it,
/// which starts at the first currency sign or amount.
fn split_party(raw: &str) -> Option<(String, &str)> {
    let cut = [
        raw.find('€'),
        raw.find(" EUR"),
        RE_MONEY_SUFFIX.find(raw).map(|m| m.start()),
        RE_LABELED_AMOUNT.find(raw).map(|m| m.start()),
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(raw.len());

    let (head, tail) = raw.split_at(cut);
    let name = RE_COMPANY_NUMBER.replace(head, "");
    let name = normalize_whitespace(name.trim().trim_end_matches(['.', ',', ';']));
    (name.chars().count() >= 3).then_some((name, tail))
}

fn clean_party_name(raw: &str) -> Option<String> {
    split_party(raw).map(|(name, _)| name)
}

/// First amount in `text`: `EUR 1.000,00` before `1.000,00 EUR` before a
/// bare amount behind a claim label.
fn money_in(text: &str) -> Option<f64> {
    [&RE_MONEY, &RE_MONEY_SUFFIX, &RE_LABELED_AMOUNT]
        .into_iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| parse_locale_number(&caps[1]))
}

struct ClaimCandidate {
    creditor: String,
    amount: Option<f64>,
    proceeding: bool,
}

/// Creditors and amounts listed in section C.
///
/// The section is split into register entries (`3 a 1234/2010 …`). Each
/// creditor anchor is paired with the first amount after it in the same
/// entry, or the closest one before it when the entry states the amount
/// first. The pair belonging to the running proceeding wins.
fn parse_claim_section(lines: &[&str]) -> Option<AppraisalFacts> {
    let mut boundaries: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| RE_ENTRY_START.is_match(l))
        .map(|(i, _)| i)
        .collect();
    if boundaries.first() != Some(&0) {
        boundaries.insert(0, 0);
    }
    boundaries.push(lines.len());

    let mut candidates = Vec::new();

    for bounds in boundaries.windows(2) {
        let entry = &lines[bounds[0]..bounds[1]];
        let proceeding = entry.iter().any(|l| {
            let lower = l.to_lowercase();
            PROCEEDING_MARKERS.iter().any(|m| lower.contains(m))
        });

        for (k, line) in entry.iter().enumerate() {
            let Some(caps) = RE_CREDITOR.captures(line.trim()) else {
                continue;
            };
            let Some((creditor, tail)) = split_party(&caps[1]) else {
                continue;
            };

            let amount = money_in(tail)
                .or_else(|| entry[k + 1..].iter().find_map(|l| money_in(l)))
                .or_else(|| entry[..k].iter().rev().find_map(|l| money_in(l)));

            candidates.push(ClaimCandidate {
                creditor,
                amount,
                proceeding,
            });
        }
    }

    if candidates.is_empty() {
        let amount = lines
            .iter()
            .filter(|l| {
                let lower = l.to_lowercase();
                PROCEEDING_MARKERS.iter().any(|m| lower.contains(m))
            })
            .find_map(|l| money_in(l))
            .or_else(|| lines.iter().find_map(|l| money_in(l)))?;
        return Some(AppraisalFacts {
            claim_amount: Some(amount),
            ..Default::default()
        });
    }

    let chosen = candidates
        .iter()
        .position(|c| c.proceeding && c.amount.is_some())
        .or_else(|| candidates.iter().position(|c| c.proceeding))
        .unwrap_or(0);
    let chosen = candidates.swap_remove(chosen);

    Some(AppraisalFacts {
        creditor: Some(chosen.creditor),
        claim_amount: chosen.amount,
        ..Default::default()
    })
}

/// Text after `Label:` on the anchor line, or the next non-empty line.
fn party_after_label<'a>(lines: &[&'a str]) -> Option<(usize, String)> {
    let first = lines.first()?;
    if let Some((_, rest)) = first.split_once(':')
        && let Some(name) = clean_party_name(rest)
    {
        return Some((0, name));
    }
    lines
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(i, l)| clean_party_name(l).map(|name| (i, name)))
}

fn parse_title_owner(lines: &[&str]) -> Option<AppraisalFacts> {
    let (at, name) = party_after_label(lines)?;

    let place = lines
        .iter()
        .skip(at + 1)
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .and_then(|l| RE_STREET_PLACE.captures(l));

    Some(AppraisalFacts {
        owner: Some(name),
        delivery_address: place.as_ref().map(|caps| caps[1].trim().to_string()),
        delivery_postal_city: place.map(|caps| normalize_whitespace(&caps[2])),
        ..Default::default()
    })
}

fn parse_title_claim(lines: &[&str]) -> Option<AppraisalFacts> {
    let (_, creditor) = party_after_label(lines)?;
    let amount = lines.iter().find_map(|l| money_in(l));

    Some(AppraisalFacts {
        creditor: Some(creditor),
        claim_amount: amount,
        ..Default::default()
    })
}
