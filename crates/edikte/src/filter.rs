use crate::types::Notice;

/// Source phrasings for agricultural, forestry, commercial, office,
/// warehouse, industrial and hospitality objects.
pub const DEFAULT_EXCLUSIONS: [&str; 10] = [
    "landwirtschaft",
    "land- und forst",
    "forstwirtschaft",
    "gewerb",
    "betriebsobjekt",
    "industrie",
    "lager",
    "büro",
    "hotel",
    "pension",
];

#[derive(Debug, Clone)]
pub struct ObjectTypeFilter {
    keywords: Vec<String>,
}

impl Default for ObjectTypeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUSIONS)
    }
}

impl ObjectTypeFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// The exclusion keyword found in `text`, if any.
    pub fn matching_keyword(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
            .map(String::as_str)
    }

    /// Whether the notice describes an excluded, non-residential object.
    /// Uses the object type, or the listing description when the type is unknown.
    pub fn is_excluded(&self, notice: &Notice) -> bool {
        notice
            .object_type
            .as_deref()
            .or(notice.description.as_deref())
            .and_then(|text| self.matching_keyword(text))
            .is_some()
    }

    /// Keeps residential notices. Dropped notices are logged and returned
    /// alongside so the run summary can count them.
    pub fn apply(&self, notices: Vec<Notice>) -> (Vec<Notice>, Vec<Notice>) {
        let (excluded, kept): (Vec<Notice>, Vec<Notice>) =
            notices.into_iter().partition(|n| self.is_excluded(n));
        for notice in &excluded {
            log::info!(
                "Excluded non-residential object {}: {}",
                notice.case_id,
                notice
                    .object_type
                    .as_deref()
                    .or(notice.description.as_deref())
                    .unwrap_or_default()
            );
        }
        (kept, excluded)
    }
}
