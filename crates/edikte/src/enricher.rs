use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::record::{ExistingRecord, IdentityKey, RecordField};
use crate::types::{Notice, Region};
use crate::utils::normalize_address;

/// A detail link proposed for a manually entered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkProposal {
    pub record_id: String,
    pub link: String,
    pub case_id: String,
    pub region: Region,
}

/// Records that had more than one candidate notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousMatch {
    pub record_id: String,
    pub address: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Enrichment {
    pub proposals: Vec<LinkProposal>,
    pub ambiguous: Vec<AmbiguousMatch>,
}

/// Matches records that have an address but no link against the current
/// notices by normalized address (and region when the record names one).
///
/// A record gets a proposal only when every matching notice points to the
/// same link. Pure: the same inputs always give the same proposals.
pub fn propose_links(records: &[ExistingRecord], notices: &[Notice]) -> Enrichment {
    let mut enrichment = Enrichment::default();

    for record in records.iter().filter(|r| !r.has_link()) {
        let Some(address) = record.text(RecordField::Address) else {
            continue;
        };
        let wanted = normalize_address(address);
        if wanted.is_empty() {
            continue;
        }
        let region = record.region();

        let matches: Vec<&Notice> = notices
            .iter()
            .filter(|n| n.link.is_some())
            .filter(|n| region.is_none_or(|r| r == n.region))
            .filter(|n| {
                n.address
                    .as_deref()
                    .is_some_and(|a| normalize_address(a) == wanted)
            })
            .collect();

        let links: BTreeSet<&str> = matches.iter().filter_map(|n| n.link.as_deref()).collect();

        match (links.len(), matches.first()) {
            (1, Some(notice)) => {
                let link = links.into_iter().next().unwrap_or_default().to_string();
                log::info!("Found link for {}: {}", record, link);
                enrichment.proposals.push(LinkProposal {
                    record_id: record.id.clone(),
                    link,
                    case_id: notice.case_id.clone(),
                    region: notice.region,
                });
            }
            (0, _) => log::debug!("No notice matches {}", record),
            _ => {
                log::warn!(
                    "Ambiguous match for {}: {} candidate notices, skipping",
                    record,
                    links.len()
                );
                enrichment.ambiguous.push(AmbiguousMatch {
                    record_id: record.id.clone(),
                    address: address.to_string(),
                    candidates: links.into_iter().map(str::to_string).collect(),
                });
            }
        }
    }

    enrichment
}

/// Lets each matched record adopt its notice's case id and region for this
/// run, so the reconciler finds it by primary key and writes the case id,
/// region and link as changes.
///
/// A proposal is skipped when another record already owns that key. Returns
/// the number of records that adopted a key.
pub fn adopt_links(records: &mut [ExistingRecord], proposals: &[LinkProposal]) -> usize {
    let mut owned: HashSet<IdentityKey> = records
        .iter()
        .filter(|r| r.has_case_id() || r.adopted.is_some())
        .filter_map(ExistingRecord::identity_key)
        .collect();
    let mut adopted = 0;

    for proposal in proposals {
        let key = IdentityKey::case(&proposal.case_id, proposal.region);
        if owned.contains(&key) {
            log::warn!(
                "Not adopting {} for record {}: already owned by another record",
                key,
                proposal.record_id
            );
            continue;
        }
        let Some(record) = records
            .iter_mut()
            .find(|r| r.id == proposal.record_id && !r.has_case_id() && r.adopted.is_none())
        else {
            continue;
        };

        record.adopted = Some(key.clone());
        owned.insert(key);
        adopted += 1;
    }

    adopted
}
