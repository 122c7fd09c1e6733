//! Owner, delivery address, creditor and claim amount from appraisal
//! documents (Gutachten) attached to a notice.

mod rules;

pub use rules::{ExtractionRule, FactGroup, RULES};

use serde::Serialize;

use crate::scraper::{FetchError, SourceSite};
use crate::types::AppraisalFacts;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Appraisal document unreachable: {0}")]
    Unreachable(#[from] FetchError),
    #[error("Appraisal document {url} is unreadable: {reason}")]
    Unreadable { url: String, reason: String },
}

/// Facts found in one document, plus the groups no rule could fill.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub facts: AppraisalFacts,
    pub missing: Vec<FactGroup>,
}

impl Extraction {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Applies [`RULES`] in order to the document text.
///
/// Never fails: facts that no rule locates stay unset and their group is
/// reported in [`Extraction::missing`]. The result is marked analyzed.
pub fn extract_facts(text: &str, document_url: Option<&str>) -> Extraction {
    let lines: Vec<&str> = text.lines().collect();
    let mut facts = AppraisalFacts {
        document_url: document_url.map(str::to_string),
        analyzed: true,
        ..Default::default()
    };

    for rule in RULES {
        if rule.group.is_filled(&facts) {
            continue;
        }
        let Some(window) = rules::rule_window(rule, &lines) else {
            continue;
        };
        match (rule.parse)(&window) {
            Some(found) => {
                log::debug!("Rule '{}' matched", rule.name);
                merge(&mut facts, found, rule.group);
            }
            None => log::debug!("Rule '{}' anchored but found nothing", rule.name),
        }
    }

    let missing = [FactGroup::Owner, FactGroup::Claim]
        .into_iter()
        .filter(|g| !g.is_filled(&facts))
        .collect();

    Extraction { facts, missing }
}

fn merge(facts: &mut AppraisalFacts, found: AppraisalFacts, group: FactGroup) {
    match group {
        FactGroup::Owner => {
            facts.owner = found.owner;
            facts.delivery_address = found.delivery_address;
            facts.delivery_postal_city = found.delivery_postal_city;
        }
        FactGroup::Claim => {
            facts.creditor = found.creditor;
            facts.claim_amount = found.claim_amount;
        }
    }
}

/// Plain text of a downloaded document.
///
/// PDFs go through the text layer on the blocking pool; anything else must
/// already be UTF-8 text. A document without any text (a scan) is unreadable.
pub async fn document_text(url: &str, bytes: Vec<u8>) -> Result<String, ExtractError> {
    let unreadable = |reason: String| ExtractError::Unreadable {
        url: url.to_string(),
        reason,
    };

    let text = if bytes.starts_with(b"%PDF") {
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| unreadable(format!("PDF extraction aborted: {e}")))?
            .map_err(|e| unreadable(format!("PDF extraction failed: {e}")))?
    } else {
        String::from_utf8(bytes).map_err(|_| unreadable("neither PDF nor UTF-8 text".to_string()))?
    };

    if text.trim().is_empty() {
        return Err(unreadable("no text layer".to_string()));
    }
    Ok(text)
}

/// Downloads the document through `source` and extracts its facts.
pub async fn extract_from<S>(source: &S, url: &str) -> Result<Extraction, ExtractError>
where
    S: SourceSite + ?Sized,
{
    let bytes = source.document(url).await?;
    let text = document_text(url, bytes).await?;
    let extraction = extract_facts(&text, Some(url));
    if !extraction.is_complete() {
        log::warn!(
            "Appraisal {}: could not locate {}",
            url,
            extraction
                .missing
                .iter()
                .map(|g| g.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture(name: &str) -> String {
        fs::read_to_string(format!("fixtures/appraisal/{name}"))
            .unwrap_or_else(|e| panic!("fixture {name}: {e}"))
    }

    #[test]
    fn test_sectioned_summary() {
        let extraction = extract_facts(&fixture("sections.txt"), None);
        let facts = extraction.facts;

        assert!(extraction.missing.is_empty());
        assert!(facts.analyzed);
        assert_eq!(facts.owner.as_deref(), Some("Maria Muster"));
        assert_eq!(facts.delivery_address.as_deref(), Some("Hauptstraße 1"));
        assert_eq!(facts.delivery_postal_city.as_deref(), Some("1010 Wien"));
        assert_eq!(facts.creditor.as_deref(), Some("Bank X"));
        assert_eq!(facts.claim_amount, Some(50000.0));
    }

    #[test]
    fn test_land_register_extract() {
        let extraction = extract_facts(&fixture("grundbuch.txt"), Some("https://x/g.pdf"));
        let facts = extraction.facts;

        assert!(extraction.missing.is_empty());
        assert_eq!(facts.owner.as_deref(), Some("Hans Berger und Anna Berger"));
        assert_eq!(facts.delivery_address.as_deref(), Some("Lindengasse 7/4"));
        assert_eq!(facts.delivery_postal_city.as_deref(), Some("8010 Graz"));
        assert_eq!(facts.creditor.as_deref(), Some("Steirische Sparkasse AG"));
        assert_eq!(facts.claim_amount, Some(84321.5));
        assert_eq!(facts.document_url.as_deref(), Some("https://x/g.pdf"));
    }

    #[test]
    fn test_missing_claims_block_reports_group() {
        let extraction = extract_facts(&fixture("no_claims.txt"), None);

        assert_eq!(extraction.missing, vec![FactGroup::Claim]);
        assert_eq!(extraction.facts.owner.as_deref(), Some("Muster Immobilien GmbH"));
        assert_eq!(extraction.facts.creditor, None);
        assert_eq!(extraction.facts.claim_amount, None);
        assert!(extraction.facts.analyzed);
    }

    #[test]
    fn test_claim_amount_without_currency_prefix() {
        let text = "Sektion C\nGläubiger: Bank X\nForderung: 50.000,00\n";
        let facts = extract_facts(text, None).facts;
        assert_eq!(facts.creditor.as_deref(), Some("Bank X"));
        assert_eq!(facts.claim_amount, Some(50000.0));

        let text = "Sektion C\nGläubiger: Bank X\nForderung 50.000,00 EUR\n";
        let facts = extract_facts(text, None).facts;
        assert_eq!(facts.creditor.as_deref(), Some("Bank X"));
        assert_eq!(facts.claim_amount, Some(50000.0));
    }

    #[test]
    fn test_section_label_on_the_data_line() {
        let text = "Sektion B: Maria Muster, Hauptstraße 1, 1010 Wien\n\
                    Sektion C: Gläubiger: Bank X, EUR 50.000,00";
        let extraction = extract_facts(text, None);
        let facts = extraction.facts;

        assert!(extraction.missing.is_empty());
        assert_eq!(facts.owner.as_deref(), Some("Maria Muster"));
        assert_eq!(facts.delivery_address.as_deref(), Some("Hauptstraße 1"));
        assert_eq!(facts.delivery_postal_city.as_deref(), Some("1010 Wien"));
        assert_eq!(facts.creditor.as_deref(), Some("Bank X"));
        assert_eq!(facts.claim_amount, Some(50000.0));
    }

    #[test]
    fn test_unrelated_text_yields_nothing() {
        let extraction = extract_facts("Befund\nDas Objekt ist in gutem Zustand.", None);
        assert_eq!(extraction.missing, vec![FactGroup::Owner, FactGroup::Claim]);
        assert!(!extraction.facts.has_owner());
    }

    #[tokio::test]
    async fn test_document_text_plain_and_unreadable() {
        let text = document_text("u", b"Sektion B\nMaria".to_vec()).await.unwrap();
        assert!(text.starts_with("Sektion B"));

        let empty = document_text("u", b"   \n".to_vec()).await;
        assert!(matches!(empty, Err(ExtractError::Unreadable { .. })));

        let binary = document_text("u", vec![0xff, 0xfe, 0x00]).await;
        assert!(matches!(binary, Err(ExtractError::Unreadable { .. })));

        let broken_pdf = document_text("u", b"%PDF-1.4 garbage".to_vec()).await;
        assert!(matches!(broken_pdf, Err(ExtractError::Unreadable { .. })));
    }
}
