use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Method};
use serde_json::{Map, Value, json};

use super::{RecordStore, StoreError};
use crate::record::{ExistingRecord, FieldMap, FieldValue, RecordField};
use crate::types::{NoticeType, Region};
use crate::utils::{format_locale_number, parse_locale_number};

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

const PHASE_NEW: &str = "🆕 Neu eingelangt";
const PHASE_ARCHIVED: &str = "🗄 Archiviert";

static RE_DATABASE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9a-fA-F]{32}$").expect("invalid regex: database id"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    Title,
    RichText,
    Url,
    Select,
    Checkbox,
}

/// Database column for each record field with a column of its own.
const COLUMNS: &[(RecordField, &str, Property)] = &[
    (RecordField::Address, "Liegenschaftsadresse", Property::Title),
    (RecordField::CaseId, "Hash-ID / Vergleichs-ID", Property::RichText),
    (RecordField::Link, "Link", Property::Url),
    (RecordField::NoticeType, "Art des Edikts", Property::Select),
    (RecordField::Region, "Bundesland", Property::Select),
    (RecordField::ObjectType, "Objektart", Property::RichText),
    (RecordField::Owner, "Verpflichtende Partei", Property::RichText),
    (RecordField::DeliveryAddress, "Zustell Adresse", Property::RichText),
    (RecordField::DeliveryPostalCity, "Zustell PLZ/Ort", Property::RichText),
    (RecordField::AppraisalAnalyzed, "Gutachten analysiert?", Property::Checkbox),
    (
        RecordField::AppraisalRequested,
        "Gutachten automatisch herunterladen?",
        Property::Checkbox,
    ),
];

/// Free-text column holding one `Label: value` line per field below.
const NOTES_COLUMN: &str = "Notizen";

const NOTE_LINES: &[(RecordField, &str)] = &[
    (RecordField::Creditor, "Gläubiger"),
    (RecordField::ClaimAmount, "Forderung"),
    (RecordField::AppraisalUrl, "Gutachten-PDF"),
];

fn is_note_field(field: RecordField) -> bool {
    NOTE_LINES.iter().any(|(f, _)| *f == field)
}

/// Fields written as lines of the notes column.
fn fields_from_notes(notes: &str) -> FieldMap {
    let mut fields = FieldMap::new();
    for line in notes.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some((field, _)) = NOTE_LINES.iter().find(|(_, l)| *l == label.trim()) else {
            continue;
        };
        let value = value.trim();
        let parsed = match field {
            RecordField::ClaimAmount => parse_locale_number(value).map(FieldValue::Number),
            _ => (!value.is_empty()).then(|| FieldValue::Text(value.to_string())),
        };
        if let Some(parsed) = parsed {
            fields.insert(*field, parsed);
        }
    }
    fields
}

/// Notes text with a line for every note field in `fields`.
///
/// Lines of `previous` for the same labels are replaced in place; other lines
/// (notes typed by hand, labels not being changed) are kept. `None` when
/// `fields` holds no note field.
fn compose_notes(fields: &FieldMap, previous: Option<&str>) -> Option<String> {
    let updates: Vec<(&str, String)> = NOTE_LINES
        .iter()
        .filter_map(|(field, label)| {
            let value = match fields.get(field)? {
                FieldValue::Number(n) => format_locale_number(*n),
                other => other.to_string(),
            };
            Some((*label, value))
        })
        .collect();
    if updates.is_empty() {
        return None;
    }

    let mut lines: Vec<String> = previous
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect();
    for (label, value) in updates {
        let line = format!("{label}: {value}");
        let existing = lines.iter().position(|l| {
            l.split_once(':')
                .is_some_and(|(head, _)| head.trim() == label)
        });
        match existing {
            Some(i) => lines[i] = line,
            None => lines.push(line),
        }
    }
    Some(lines.join("\n"))
}

/// Turns a database id or share URL into the dashed UUID form the API expects.
///
/// `https://www.notion.so/ws/1a2b…f0?v=…` and `1a2b…f0` both become
/// `1a2b3c4d-…`.
pub fn clean_notion_db_id(raw: &str) -> Result<String, StoreError> {
    let path = raw.trim().split(['?', '#']).next().unwrap_or_default();
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let compact = last.replace('-', "");
    let hex = RE_DATABASE_ID
        .find(&compact)
        .ok_or_else(|| StoreError::InvalidDatabaseId(raw.to_string()))?
        .as_str()
        .to_lowercase();
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

fn plain_text(items: &Value) -> Option<String> {
    let text: String = items
        .as_array()?
        .iter()
        .filter_map(|item| item.get("plain_text").and_then(Value::as_str))
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn read_property(value: &Value, kind: Property) -> Option<FieldValue> {
    match kind {
        Property::Title => plain_text(value.get("title")?).map(FieldValue::Text),
        Property::RichText => plain_text(value.get("rich_text")?).map(FieldValue::Text),
        Property::Url => value
            .get("url")?
            .as_str()
            .filter(|u| !u.is_empty())
            .map(|u| FieldValue::Text(u.to_string())),
        Property::Select => value
            .get("select")?
            .get("name")?
            .as_str()
            .map(|n| FieldValue::Text(n.to_string())),
        Property::Checkbox => value.get("checkbox")?.as_bool().map(FieldValue::Flag),
    }
}

/// Titles written by earlier automatic imports look like
/// `"Wien – Versteigerung – 12.03.2026 | …"` and are not addresses.
fn is_generated_title(title: &str) -> bool {
    title
        .split(" – ")
        .next()
        .is_some_and(|head| head.trim().parse::<Region>().is_ok())
}

/// Maps a database page to a record. Pages without an id are skipped.
pub(crate) fn record_from_page(page: &Value) -> Option<ExistingRecord> {
    let id = page.get("id")?.as_str()?;
    let properties = page.get("properties")?;

    let mut fields = properties
        .get(NOTES_COLUMN)
        .and_then(|p| read_property(p, Property::RichText))
        .and_then(|notes| notes.as_text().map(fields_from_notes))
        .unwrap_or_default();
    for (field, column, kind) in COLUMNS {
        let Some(value) = properties.get(*column).and_then(|p| read_property(p, *kind)) else {
            continue;
        };
        if *field == RecordField::Address
            && value.as_text().is_some_and(is_generated_title)
        {
            continue;
        }
        fields.insert(*field, value);
    }

    Some(ExistingRecord::new(id, fields))
}

fn truncated(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn write_property(value: &FieldValue, kind: Property) -> Option<Value> {
    Some(match kind {
        Property::Title => json!({ "title": [{ "text": { "content": truncated(value.as_text()?, 200) } }] }),
        Property::RichText => {
            json!({ "rich_text": [{ "text": { "content": truncated(value.as_text()?, 2000) } }] })
        }
        Property::Url => json!({ "url": value.as_text()? }),
        Property::Select => json!({ "select": { "name": value.as_text()?.replace(',', " ") } }),
        Property::Checkbox => json!({ "checkbox": value.as_flag()? }),
    })
}

fn select(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

fn checkbox(checked: bool) -> Value {
    json!({ "checkbox": checked })
}

/// Page properties for a create or an update. Fields without a column are
/// dropped; note fields are merged into the `previous_notes` text.
///
/// Creates are flagged as new automatic imports; a notice switching to a
/// cancelled date is archived.
pub(crate) fn properties_for(
    fields: &FieldMap,
    previous_notes: Option<&str>,
    create: bool,
) -> Map<String, Value> {
    let mut properties = Map::new();

    for (field, value) in fields {
        let Some((_, column, kind)) = COLUMNS.iter().find(|(f, _, _)| f == field) else {
            continue;
        };
        if let Some(property) = write_property(value, *kind) {
            properties.insert(column.to_string(), property);
        }
    }
    if let Some(notes) = compose_notes(fields, previous_notes) {
        properties.insert(
            NOTES_COLUMN.to_string(),
            json!({ "rich_text": [{ "text": { "content": truncated(&notes, 2000) } }] }),
        );
    }

    let cancelled = fields
        .get(&RecordField::NoticeType)
        .and_then(FieldValue::as_text)
        .is_some_and(|t| t == NoticeType::Cancelled.label());

    if create {
        let description = fields
            .get(&RecordField::Description)
            .and_then(FieldValue::as_text);
        if !fields.contains_key(&RecordField::Address) {
            let mut title = [RecordField::Region, RecordField::NoticeType]
                .iter()
                .filter_map(|f| fields.get(f).and_then(FieldValue::as_text))
                .map(str::to_string)
                .chain(
                    fields
                        .get(&RecordField::AuctionDate)
                        .and_then(FieldValue::as_date)
                        .map(|d| d.format("%d.%m.%Y").to_string()),
                )
                .collect::<Vec<_>>()
                .join(" – ");
            if let Some(description) = description {
                title = format!("{title} | {}", truncated(description, 50));
            }
            properties.insert(
                "Liegenschaftsadresse".to_string(),
                json!({ "title": [{ "text": { "content": truncated(&title, 200) } }] }),
            );
        }
        if !fields.contains_key(&RecordField::ObjectType)
            && let Some(description) = description
        {
            properties.insert(
                "Objektart".to_string(),
                json!({ "rich_text": [{ "text": { "content": truncated(description, 200) } }] }),
            );
        }
        properties.insert("Neu eingelangt".to_string(), checkbox(!cancelled));
        properties.insert("Automatisch importiert?".to_string(), checkbox(true));
        properties.insert("Workflow-Phase".to_string(), select(PHASE_NEW));
    }

    if cancelled {
        properties.insert("Archiviert".to_string(), checkbox(true));
        properties.insert("Workflow-Phase".to_string(), select(PHASE_ARCHIVED));
        properties.insert("Neu eingelangt".to_string(), checkbox(false));
    }

    properties
}

/// Records kept in a Notion database.
#[derive(Debug, Clone)]
pub struct NotionStore {
    client: Client,
    token: String,
    database_id: String,
    base_url: String,
}

impl NotionStore {
    pub fn new(token: impl Into<String>, database_id: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            token: token.into(),
            database_id: clean_notion_db_id(database_id)?,
            base_url: NOTION_API.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .inspect_err(|e| log::error!("Notion HTTP error: {e:?}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl RecordStore for NotionStore {
    async fn list_records(&self) -> Result<Vec<ExistingRecord>, StoreError> {
        let path = format!("/databases/{}/query", self.database_id);
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let page = self.request(Method::POST, &path, Some(&body)).await?;

            let results = page
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| StoreError::Unexpected("query without results".to_string()))?;
            records.extend(results.iter().filter_map(record_from_page));

            cursor = page
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            let has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            if !has_more || cursor.is_none() {
                break;
            }
        }

        log::info!("Loaded {} records from Notion", records.len());
        Ok(records)
    }

    async fn create_record(&self, fields: &FieldMap) -> Result<String, StoreError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": properties_for(fields, None, true),
        });
        let page = self.request(Method::POST, "/pages", Some(&body)).await?;
        page.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Unexpected("created page without id".to_string()))
    }

    /// Note fields share one column, so their update first reads the
    /// current notes to keep the lines that are not changing.
    async fn update_record(&self, id: &str, changes: &FieldMap) -> Result<(), StoreError> {
        let path = format!("/pages/{id}");
        let previous_notes = if changes.keys().any(|f| is_note_field(*f)) {
            let page = self.request(Method::GET, &path, None).await?;
            page.get("properties")
                .and_then(|p| p.get(NOTES_COLUMN))
                .and_then(|p| read_property(p, Property::RichText))
                .and_then(|notes| notes.as_text().map(str::to_string))
        } else {
            None
        };

        let body = json!({ "properties": properties_for(changes, previous_notes.as_deref(), false) });
        self.request(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }

    fn keeps(&self, field: RecordField) -> bool {
        COLUMNS.iter().any(|(f, _, _)| *f == field) || is_note_field(field)
    }
}
