use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{Notice, NoticeSummary, NoticeType, Region};
use crate::utils::{
    normalize_whitespace, parse_first_date, parse_locale_number, split_postal_city,
};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to parse URL: {0}")]
    UrlParse(String),
    #[error("No labeled fields found on detail page {0}")]
    NoFields(String),
}

static RE_EDICT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)alldoc/([0-9a-f]+)!OpenDocument").expect("invalid regex: edict link")
});

static RE_ADDRESS_WITH_PLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?),?\s+(\d{4,5}\s+\S.*)$").expect("invalid regex: address with place")
});

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn join_url(base: &str, href: &str) -> Result<String, ParseError> {
    let base = Url::parse(base).map_err(|e| ParseError::UrlParse(format!("{base}: {e}")))?;
    base.join(href)
        .map(|u| u.to_string())
        .map_err(|e| ParseError::UrlParse(format!("{href}: {e}")))
}

/// Parses a region's search result page.
///
/// Every link of the form `alldoc/<hex>!OpenDocument` whose text starts with
/// a known notice label becomes a summary; other links are ignored. Each
/// edict id is reported once. A page without matching links is a valid,
/// empty result.
pub fn parse_listing(
    html: &str,
    region: Region,
    page_url: &str,
) -> Result<Vec<NoticeSummary>, ParseError> {
    let document = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").unwrap();

    let mut seen = HashSet::new();
    let mut summaries = Vec::new();

    for link in document.select(&link_sel) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(caps) = RE_EDICT_LINK.captures(href) else {
            continue;
        };
        let edict_id = caps[1].to_lowercase();

        let description = normalize_whitespace(&elem_text(link));
        let Some(notice_type) = NoticeType::from_link_text(&description) else {
            log::debug!("Skipping non-auction link '{}'", description);
            continue;
        };

        if !seen.insert(edict_id.clone()) {
            continue;
        }

        let link = match join_url(page_url, href) {
            Ok(link) => link,
            Err(e) => {
                log::warn!("Skipping edict {} with unusable link: {}", edict_id, e);
                continue;
            }
        };

        summaries.push(NoticeSummary {
            region,
            notice_type,
            link,
            date: parse_first_date(&description),
            edict_id,
            description,
        });
    }

    Ok(summaries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailField {
    Address,
    PostalCity,
    AuctionDate,
    AppraisedValue,
    MinimumBid,
    Area,
    ObjectType,
    FileNumber,
    Court,
}

struct FieldRule {
    field: DetailField,
    /// Lowercase label prefixes, in order of preference.
    labels: &'static [&'static str],
    /// Whether a missing value is worth a warning.
    expected: bool,
}

const DETAIL_RULES: &[FieldRule] = &[
    FieldRule {
        field: DetailField::Address,
        labels: &["liegenschaftsadresse", "objektadresse", "adresse", "lage"],
        expected: true,
    },
    FieldRule {
        field: DetailField::PostalCity,
        labels: &["plz/ort", "plz / ort", "postleitzahl", "plz"],
        expected: true,
    },
    FieldRule {
        field: DetailField::AuctionDate,
        labels: &[
            "versteigerungstermin",
            "termin der versteigerung",
            "versteigerungsdatum",
            "termin",
        ],
        expected: true,
    },
    FieldRule {
        field: DetailField::AppraisedValue,
        labels: &["schätzwert", "schätzungswert", "verkehrswert"],
        expected: true,
    },
    FieldRule {
        field: DetailField::MinimumBid,
        labels: &["geringstes gebot", "mindestgebot"],
        expected: false,
    },
    FieldRule {
        field: DetailField::Area,
        labels: &[
            "objektgröße",
            "nutzfläche",
            "wohnfläche",
            "grundstücksgröße",
            "fläche",
        ],
        expected: true,
    },
    FieldRule {
        field: DetailField::ObjectType,
        labels: &["kategorie", "objektart", "art des objekts"],
        expected: true,
    },
    FieldRule {
        field: DetailField::FileNumber,
        labels: &["aktenzeichen", "geschäftszahl"],
        expected: false,
    },
    FieldRule {
        field: DetailField::Court,
        labels: &["dienststelle", "gericht"],
        expected: false,
    },
];

fn normalize_label(label: &str) -> String {
    normalize_whitespace(label)
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
}

/// Collects `(label, value)` pairs from table rows and definition lists.
fn collect_labeled_pairs(document: &Html) -> Vec<(String, String)> {
    let row_sel = Selector::parse("tr").unwrap();
    let cell_sel = Selector::parse("th, td").unwrap();
    let dt_sel = Selector::parse("dt").unwrap();

    let mut pairs = Vec::new();

    for row in document.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| normalize_whitespace(&elem_text(c)))
            .collect();
        if cells.len() < 2 {
            continue;
        }
        let label = normalize_label(&cells[0]);
        let value = normalize_whitespace(&cells[1..].join(" "));
        if !label.is_empty() && !value.is_empty() {
            pairs.push((label, value));
        }
    }

    for dt in document.select(&dt_sel) {
        let Some(dd) = dt
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "dd")
        else {
            continue;
        };
        let label = normalize_label(&elem_text(dt));
        let value = normalize_whitespace(&elem_text(dd));
        if !label.is_empty() && !value.is_empty() {
            pairs.push((label, value));
        }
    }

    pairs
}

fn lookup<'a>(pairs: &'a [(String, String)], rule: &FieldRule) -> Option<&'a str> {
    rule.labels.iter().find_map(|wanted| {
        pairs
            .iter()
            .find(|(label, _)| label.starts_with(wanted))
            .map(|(_, value)| value.as_str())
    })
}

fn parse_number_field(value: &str, field: DetailField, case_id: &str) -> Option<f64> {
    let parsed = parse_locale_number(value);
    if parsed.is_none() {
        log::warn!(
            "Notice {}: unparsable number for {:?}: '{}'",
            case_id,
            field,
            value
        );
    }
    parsed
}

/// Builds a notice from a detail page, filling in what the page provides on
/// top of the listing summary.
///
/// A field the page does not carry stays `None` and is logged. Only a page
/// without any labeled fields is an error.
pub fn parse_notice_detail(
    html: &str,
    summary: &NoticeSummary,
) -> Result<Notice, ParseError> {
    let document = Html::parse_document(html);
    let pairs = collect_labeled_pairs(&document);
    if pairs.is_empty() {
        return Err(ParseError::NoFields(summary.link.clone()));
    }

    let mut notice = Notice::from_summary(summary);
    let case_id = summary.edict_id.as_str();

    for rule in DETAIL_RULES {
        let Some(value) = lookup(&pairs, rule) else {
            if rule.expected {
                log::warn!(
                    "Notice {}: no {:?} field on detail page {}",
                    case_id,
                    rule.field,
                    summary.link
                );
            }
            continue;
        };

        match rule.field {
            DetailField::Address => notice.address = Some(value.to_string()),
            DetailField::PostalCity => {
                let (code, city) = split_postal_city(value);
                notice.postal_code = code;
                notice.city = city;
            }
            DetailField::AuctionDate => match parse_first_date(value) {
                Some(date) => notice.auction_date = Some(date),
                None => log::warn!("Notice {}: unparsable date '{}'", case_id, value),
            },
            DetailField::AppraisedValue => {
                notice.appraised_value = parse_number_field(value, rule.field, case_id)
            }
            DetailField::MinimumBid => {
                notice.minimum_bid = parse_number_field(value, rule.field, case_id)
            }
            DetailField::Area => notice.area = parse_number_field(value, rule.field, case_id),
            DetailField::ObjectType => notice.object_type = Some(value.to_string()),
            DetailField::FileNumber => notice.file_number = Some(value.to_string()),
            DetailField::Court => notice.court = Some(value.to_string()),
        }
    }

    // "Hauptstraße 1, 1010 Wien" in the address field doubles as PLZ/Ort.
    if let Some(address) = notice.address.take() {
        match RE_ADDRESS_WITH_PLACE.captures(&address) {
            Some(caps) if !caps[1].trim().is_empty() => {
                if notice.postal_code.is_none() {
                    let (code, city) = split_postal_city(&caps[2]);
                    notice.postal_code = code;
                    notice.city = notice.city.take().or(city);
                }
                notice.address = Some(caps[1].trim().to_string());
            }
            _ => notice.address = Some(address),
        }
    }

    notice.appraisal_url = pick_appraisal(&parse_attachments(&document, &summary.link))
        .map(|a| a.url.clone());

    Ok(notice)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

impl Attachment {
    pub fn is_pdf(&self) -> bool {
        self.filename.to_lowercase().ends_with(".pdf")
    }
}

fn parse_attachments(document: &Html, page_url: &str) -> Vec<Attachment> {
    let link_sel = Selector::parse("a[href]").unwrap();

    document
        .select(&link_sel)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let pos = href.to_lowercase().find("$file/")?;
            let raw_name = href.get(pos + "$file/".len()..)?;
            let filename = urlencoding::decode(raw_name)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw_name.to_string());
            let url = join_url(page_url, href)
                .inspect_err(|e| log::warn!("Skipping attachment: {e}"))
                .ok()?;
            Some(Attachment { url, filename })
        })
        .collect()
}

/// Picks the PDF that most likely is the appraisal report.
pub fn pick_appraisal(attachments: &[Attachment]) -> Option<&Attachment> {
    const KEYWORDS: [&str; 3] = ["gutachten", "sachverst", "sv-"];

    let pdfs: Vec<&Attachment> = attachments.iter().filter(|a| a.is_pdf()).collect();

    let by_keyword = pdfs.iter().copied().find(|a| {
        let name = a.filename.to_lowercase();
        KEYWORDS.iter().any(|kw| name.contains(kw))
            || name
                .trim_end_matches(".pdf")
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| token == "g")
    });

    by_keyword
        .or_else(|| {
            pdfs.iter()
                .copied()
                .find(|a| !a.filename.to_lowercase().contains("anlage"))
        })
        .or_else(|| pdfs.first().copied())
}
