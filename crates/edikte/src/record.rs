use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{AppraisalFacts, Notice, Region};
use crate::utils::{normalize_address, normalize_whitespace};

/// Every field the store knows about. The store is treated as a plain
/// key→fields map; adapters translate these into their own property names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    CaseId,
    Region,
    NoticeType,
    Link,
    Description,
    Address,
    PostalCode,
    City,
    AuctionDate,
    AppraisedValue,
    MinimumBid,
    Area,
    ObjectType,
    FileNumber,
    Court,
    Owner,
    DeliveryAddress,
    DeliveryPostalCity,
    Creditor,
    ClaimAmount,
    AppraisalUrl,
    AppraisalAnalyzed,
    /// Set by hand in the store to ask for the appraisal to be analyzed.
    AppraisalRequested,
}

impl RecordField {
    pub fn name(&self) -> &'static str {
        match self {
            RecordField::CaseId => "case_id",
            RecordField::Region => "region",
            RecordField::NoticeType => "notice_type",
            RecordField::Link => "link",
            RecordField::Description => "description",
            RecordField::Address => "address",
            RecordField::PostalCode => "postal_code",
            RecordField::City => "city",
            RecordField::AuctionDate => "auction_date",
            RecordField::AppraisedValue => "appraised_value",
            RecordField::MinimumBid => "minimum_bid",
            RecordField::Area => "area",
            RecordField::ObjectType => "object_type",
            RecordField::FileNumber => "file_number",
            RecordField::Court => "court",
            RecordField::Owner => "owner",
            RecordField::DeliveryAddress => "delivery_address",
            RecordField::DeliveryPostalCity => "delivery_postal_city",
            RecordField::Creditor => "creditor",
            RecordField::ClaimAmount => "claim_amount",
            RecordField::AppraisalUrl => "appraisal_url",
            RecordField::AppraisalAnalyzed => "appraisal_analyzed",
            RecordField::AppraisalRequested => "appraisal_requested",
        }
    }
}

impl Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Flag(bool),
}

impl FieldValue {
    /// Equality as the reconciler sees it: whitespace-insensitive text and
    /// numbers equal to the cent.
    pub fn same_as(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => {
                normalize_whitespace(a) == normalize_whitespace(b)
            }
            (FieldValue::Number(a), FieldValue::Number(b)) => (a - b).abs() < 0.005,
            (FieldValue::Date(a), FieldValue::Date(b)) => a == b,
            (FieldValue::Flag(a), FieldValue::Flag(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Number(n) => write!(f, "{:.2}", n),
            FieldValue::Date(d) => write!(f, "{}", d.format("%d.%m.%Y")),
            FieldValue::Flag(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
        }
    }
}

/// Only fields that are actually set. An absent key means "unknown".
pub type FieldMap = BTreeMap<RecordField, FieldValue>;

fn put_text(fields: &mut FieldMap, field: RecordField, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        fields.insert(field, FieldValue::Text(v.to_string()));
    }
}

fn put_number(fields: &mut FieldMap, field: RecordField, value: Option<f64>) {
    if let Some(v) = value {
        fields.insert(field, FieldValue::Number(v));
    }
}

/// Key that identifies the same auction across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    Case { case_id: String, region: Region },
    Address { address: String, date: NaiveDate },
}

impl IdentityKey {
    pub fn case(case_id: &str, region: Region) -> IdentityKey {
        IdentityKey::Case {
            case_id: case_id.trim().to_lowercase(),
            region,
        }
    }

    pub fn address(address: &str, date: NaiveDate) -> IdentityKey {
        IdentityKey::Address {
            address: normalize_address(address),
            date,
        }
    }

    /// Derives the key from a stored field set: case id and region, or
    /// address and auction date for records that never had a case id. A case
    /// id without a known region gives no key.
    pub fn from_fields(fields: &FieldMap) -> Option<IdentityKey> {
        if let Some(case_id) = fields.get(&RecordField::CaseId).and_then(FieldValue::as_text) {
            let region = fields
                .get(&RecordField::Region)
                .and_then(FieldValue::as_text)
                .and_then(|r| r.parse::<Region>().ok())?;
            return Some(IdentityKey::case(case_id, region));
        }

        let address = fields.get(&RecordField::Address).and_then(FieldValue::as_text)?;
        let date = fields
            .get(&RecordField::AuctionDate)
            .and_then(FieldValue::as_date)?;
        Some(IdentityKey::address(address, date))
    }
}

impl Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKey::Case { case_id, region } => write!(f, "{}/{}", region, case_id),
            IdentityKey::Address { address, date } => write!(f, "{}@{}", address, date),
        }
    }
}

impl Notice {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::case(&self.case_id, self.region)
    }

    /// The (address, date) key, used to find manually entered records that
    /// never carried a case id.
    pub fn fallback_key(&self) -> Option<IdentityKey> {
        match (&self.address, self.auction_date) {
            (Some(address), Some(date)) => Some(IdentityKey::address(address, date)),
            _ => None,
        }
    }

    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        put_text(&mut fields, RecordField::CaseId, Some(&self.case_id));
        put_text(&mut fields, RecordField::Region, Some(self.region.name()));
        put_text(
            &mut fields,
            RecordField::NoticeType,
            Some(self.notice_type.label()),
        );
        put_text(&mut fields, RecordField::Link, self.link.as_deref());
        put_text(
            &mut fields,
            RecordField::Description,
            self.description.as_deref(),
        );
        put_text(&mut fields, RecordField::Address, self.address.as_deref());
        put_number(
            &mut fields,
            RecordField::PostalCode,
            self.postal_code.map(f64::from),
        );
        put_text(&mut fields, RecordField::City, self.city.as_deref());
        if let Some(date) = self.auction_date {
            fields.insert(RecordField::AuctionDate, FieldValue::Date(date));
        }
        put_number(
            &mut fields,
            RecordField::AppraisedValue,
            self.appraised_value,
        );
        put_number(&mut fields, RecordField::MinimumBid, self.minimum_bid);
        put_number(&mut fields, RecordField::Area, self.area);
        put_text(
            &mut fields,
            RecordField::ObjectType,
            self.object_type.as_deref(),
        );
        put_text(
            &mut fields,
            RecordField::FileNumber,
            self.file_number.as_deref(),
        );
        put_text(&mut fields, RecordField::Court, self.court.as_deref());
        fields
    }
}

impl AppraisalFacts {
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        put_text(&mut fields, RecordField::Owner, self.owner.as_deref());
        put_text(
            &mut fields,
            RecordField::DeliveryAddress,
            self.delivery_address.as_deref(),
        );
        put_text(
            &mut fields,
            RecordField::DeliveryPostalCity,
            self.delivery_postal_city.as_deref(),
        );
        put_text(&mut fields, RecordField::Creditor, self.creditor.as_deref());
        put_number(&mut fields, RecordField::ClaimAmount, self.claim_amount);
        put_text(
            &mut fields,
            RecordField::AppraisalUrl,
            self.document_url.as_deref(),
        );
        if self.analyzed {
            fields.insert(RecordField::AppraisalAnalyzed, FieldValue::Flag(true));
        }
        fields
    }
}

/// A record already present in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingRecord {
    pub id: String,
    pub fields: FieldMap,
    /// Key taken over from a matching notice during this run. Never stored.
    #[serde(skip)]
    pub adopted: Option<IdentityKey>,
}

impl ExistingRecord {
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
            adopted: None,
        }
    }

    pub fn text(&self, field: RecordField) -> Option<&str> {
        self.fields.get(&field).and_then(FieldValue::as_text)
    }

    pub fn identity_key(&self) -> Option<IdentityKey> {
        self.adopted
            .clone()
            .or_else(|| IdentityKey::from_fields(&self.fields))
    }

    pub fn region(&self) -> Option<Region> {
        self.text(RecordField::Region)
            .and_then(|r| r.parse::<Region>().ok())
    }

    pub fn has_case_id(&self) -> bool {
        self.text(RecordField::CaseId).is_some()
    }

    pub fn has_link(&self) -> bool {
        self.text(RecordField::Link).is_some()
    }

    pub fn is_analyzed(&self) -> bool {
        self.flag(RecordField::AppraisalAnalyzed)
    }

    pub fn appraisal_requested(&self) -> bool {
        self.flag(RecordField::AppraisalRequested)
    }

    fn flag(&self, field: RecordField) -> bool {
        self.fields
            .get(&field)
            .and_then(FieldValue::as_flag)
            .unwrap_or(false)
    }

    /// Overwrites the given fields, leaving every other field untouched.
    pub fn apply(&mut self, changes: &FieldMap) {
        for (field, value) in changes {
            self.fields.insert(*field, value.clone());
        }
    }
}

impl Display for ExistingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = self
            .text(RecordField::Address)
            .or_else(|| self.text(RecordField::Description))
            .unwrap_or("(untitled)");
        write!(f, "{} [{}]", title, self.id)
    }
}
