use std::{fmt::Display, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error(
    "Invalid region '{0}'. Accepted values: a Bundesland name (e.g. 'wien', 'niederoesterreich') or its code 0-8"
)]
pub struct RegionParseError(String);

/// Austrian federal states as used by the `BL` form field of the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Wien,
    Niederoesterreich,
    Burgenland,
    Oberoesterreich,
    Salzburg,
    Steiermark,
    Kaernten,
    Tirol,
    Vorarlberg,
}

impl Region {
    pub const ALL: [Region; 9] = [
        Region::Wien,
        Region::Niederoesterreich,
        Region::Burgenland,
        Region::Oberoesterreich,
        Region::Salzburg,
        Region::Steiermark,
        Region::Kaernten,
        Region::Tirol,
        Region::Vorarlberg,
    ];

    pub fn code(&self) -> u8 {
        match self {
            Region::Wien => 0,
            Region::Niederoesterreich => 1,
            Region::Burgenland => 2,
            Region::Oberoesterreich => 3,
            Region::Salzburg => 4,
            Region::Steiermark => 5,
            Region::Kaernten => 6,
            Region::Tirol => 7,
            Region::Vorarlberg => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Region::Wien => "Wien",
            Region::Niederoesterreich => "Niederösterreich",
            Region::Burgenland => "Burgenland",
            Region::Oberoesterreich => "Oberösterreich",
            Region::Salzburg => "Salzburg",
            Region::Steiermark => "Steiermark",
            Region::Kaernten => "Kärnten",
            Region::Tirol => "Tirol",
            Region::Vorarlberg => "Vorarlberg",
        }
    }
}

impl FromStr for Region {
    type Err = RegionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = s
            .trim()
            .to_lowercase()
            .replace('ö', "oe")
            .replace('ä', "ae")
            .replace(['-', ' ', '_'], "");

        match folded.as_str() {
            "wien" | "0" => Ok(Region::Wien),
            "niederoesterreich" | "noe" | "1" => Ok(Region::Niederoesterreich),
            "burgenland" | "2" => Ok(Region::Burgenland),
            "oberoesterreich" | "ooe" | "3" => Ok(Region::Oberoesterreich),
            "salzburg" | "4" => Ok(Region::Salzburg),
            "steiermark" | "5" => Ok(Region::Steiermark),
            "kaernten" | "6" => Ok(Region::Kaernten),
            "tirol" | "7" => Ok(Region::Tirol),
            "vorarlberg" | "8" => Ok(Region::Vorarlberg),
            _ => Err(RegionParseError(s.to_string())),
        }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown notice type '{0}'")]
pub struct NoticeTypeParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeType {
    Auction,
    Cancelled,
    Postponed,
}

impl NoticeType {
    /// The label the source site uses, which is also the prefix of every listing link text.
    pub fn label(&self) -> &'static str {
        match self {
            NoticeType::Auction => "Versteigerung",
            NoticeType::Cancelled => "Entfall des Termins",
            NoticeType::Postponed => "Verschiebung",
        }
    }

    /// Classifies a listing link text by its leading label.
    pub fn from_link_text(text: &str) -> Option<NoticeType> {
        let text = text.trim_start();
        [
            NoticeType::Auction,
            NoticeType::Cancelled,
            NoticeType::Postponed,
        ]
        .into_iter()
        .find(|t| text.starts_with(t.label()))
    }
}

impl FromStr for NoticeType {
    type Err = NoticeTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NoticeType::from_link_text(s)
            .or_else(|| match s.trim().to_lowercase().as_str() {
                "auction" => Some(NoticeType::Auction),
                "cancelled" => Some(NoticeType::Cancelled),
                "postponed" => Some(NoticeType::Postponed),
                _ => None,
            })
            .ok_or_else(|| NoticeTypeParseError(s.to_string()))
    }
}

impl Display for NoticeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One row of a region's listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeSummary {
    pub region: Region,
    pub notice_type: NoticeType,
    pub edict_id: String,
    pub link: String,
    pub description: String,
    pub date: Option<NaiveDate>,
}

impl Display for NoticeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.region, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub region: Region,
    pub notice_type: NoticeType,
    pub case_id: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<u32>,
    pub city: Option<String>,
    pub auction_date: Option<NaiveDate>,
    pub appraised_value: Option<f64>,
    pub minimum_bid: Option<f64>,
    pub area: Option<f64>,
    pub object_type: Option<String>,
    pub file_number: Option<String>,
    pub court: Option<String>,
    pub appraisal_url: Option<String>,
}

impl Notice {
    /// A notice carrying only what the listing row itself reveals.
    pub fn from_summary(summary: &NoticeSummary) -> Notice {
        Notice {
            region: summary.region,
            notice_type: summary.notice_type,
            case_id: summary.edict_id.clone(),
            link: Some(summary.link.clone()),
            description: Some(summary.description.clone()).filter(|d| !d.is_empty()),
            address: None,
            postal_code: None,
            city: None,
            auction_date: summary.date,
            appraised_value: None,
            minimum_bid: None,
            area: None,
            object_type: None,
            file_number: None,
            court: None,
            appraisal_url: None,
        }
    }

    /// Address, falling back to the listing description.
    pub fn label(&self) -> String {
        let place = match (&self.address, self.postal_code, &self.city) {
            (Some(address), Some(plz), Some(city)) => format!("{address}, {plz} {city}"),
            (Some(address), _, _) => address.clone(),
            _ => self.description.clone().unwrap_or_else(|| self.case_id.clone()),
        };
        let preview: String = place.chars().take(80).collect();
        match self.auction_date {
            Some(date) => format!("{} ({})", preview, date.format("%d.%m.%Y")),
            None => preview,
        }
    }
}

impl Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} — {}", self.region, self.notice_type, self.label())?;
        if let Some(object_type) = &self.object_type {
            write!(f, "\n   Object: {}", object_type)?;
        }
        if let Some(value) = self.appraised_value {
            write!(f, "\n   Appraised: EUR {:.2}", value)?;
        }
        Ok(())
    }
}

/// Facts pulled from a notice's appraisal document. Facts that could not be
/// located stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppraisalFacts {
    pub owner: Option<String>,
    pub delivery_address: Option<String>,
    pub delivery_postal_city: Option<String>,
    pub creditor: Option<String>,
    pub claim_amount: Option<f64>,
    pub document_url: Option<String>,
    pub analyzed: bool,
}

impl AppraisalFacts {
    pub fn has_owner(&self) -> bool {
        self.owner.is_some() || self.delivery_address.is_some()
    }

    pub fn has_claim(&self) -> bool {
        self.creditor.is_some() || self.claim_amount.is_some()
    }
}

impl Display for AppraisalFacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unset = "(not found)";
        writeln!(f, "  Owner:     {}", self.owner.as_deref().unwrap_or(unset))?;
        writeln!(
            f,
            "  Address:   {}",
            self.delivery_address.as_deref().unwrap_or(unset)
        )?;
        writeln!(
            f,
            "  PLZ/Ort:   {}",
            self.delivery_postal_city.as_deref().unwrap_or(unset)
        )?;
        writeln!(f, "  Creditor:  {}", self.creditor.as_deref().unwrap_or(unset))?;
        match self.claim_amount {
            Some(amount) => writeln!(f, "  Claim:     EUR {:.2}", amount),
            None => writeln!(f, "  Claim:     {}", unset),
        }
    }
}
