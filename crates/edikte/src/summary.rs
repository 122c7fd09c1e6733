use std::fmt::Display;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::reconciler::{Action, ActionPlan};
use crate::record::RecordField;
use crate::utils::truncate_chars;

/// Telegram's message size limit.
pub const MAX_DIGEST_CHARS: usize = 4096;

const MAX_CREATED_LINES: usize = 20;
const MAX_UPDATED_LINES: usize = 10;
const MAX_REVIEW_LINES: usize = 10;
const MAX_FAILURE_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A region's listing could not be fetched or parsed.
    Region,
    /// A notice's detail page could not be fetched or parsed.
    Notice,
    /// The appraisal document could not be downloaded or read.
    Appraisal,
    /// The appraisal was read but some facts were not found.
    Incomplete,
    /// More than one notice matched a manually entered record.
    Ambiguous,
    /// Writing an action to the store failed.
    Store,
}

impl FailureKind {
    fn is_extraction(&self) -> bool {
        matches!(self, FailureKind::Appraisal | FailureKind::Incomplete)
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Region => "region",
            FailureKind::Notice => "notice",
            FailureKind::Appraisal => "appraisal",
            FailureKind::Incomplete => "incomplete",
            FailureKind::Ambiguous => "ambiguous",
            FailureKind::Store => "store",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// Region name, notice link or record id.
    pub subject: String,
    pub message: String,
}

impl Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.subject, self.message)
    }
}

/// Per-item outcomes collected while a run progresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub regions_fetched: usize,
    pub notices_parsed: usize,
    pub excluded: usize,
    pub appraisals_analyzed: usize,
    pub links_proposed: usize,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn fail(&mut self, kind: FailureKind, subject: impl Into<String>, message: impl Display) {
        let failure = Failure {
            kind,
            subject: subject.into(),
            message: message.to_string(),
        };
        match kind {
            FailureKind::Incomplete | FailureKind::Ambiguous => log::warn!("{}", failure),
            _ => log::error!("{}", failure),
        }
        self.failures.push(failure);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub review: usize,
    pub excluded: usize,
    pub extraction_failures: usize,
    pub other_failures: usize,
    pub created_lines: Vec<String>,
    pub updated_lines: Vec<String>,
    pub review_lines: Vec<String>,
    pub failures: Vec<Failure>,
}

fn region_of(action: &Action) -> String {
    match action {
        Action::Create { notice, .. }
        | Action::UpdateFields { notice, .. }
        | Action::Review { notice, .. } => notice.region.to_string(),
        Action::NoOp { key, .. } => key.to_string(),
    }
}

impl RunSummary {
    pub fn new(plan: &ActionPlan, report: &RunReport) -> Self {
        let created_lines = plan
            .creates()
            .filter_map(|action| match action {
                Action::Create { notice, .. } => Some(format!(
                    "{} – {}{}",
                    region_of(action),
                    notice.label(),
                    notice
                        .link
                        .as_deref()
                        .map(|l| format!("\n  {l}"))
                        .unwrap_or_default()
                )),
                _ => None,
            })
            .collect::<Vec<_>>();

        let updated_lines = plan
            .updates()
            .filter_map(|action| match action {
                Action::UpdateFields {
                    notice, changes, ..
                } => {
                    let fields: Vec<&str> = changes.keys().map(RecordField::name).collect();
                    let prefix = if changes.contains_key(&RecordField::NoticeType) {
                        format!("{} – ", notice.notice_type)
                    } else {
                        String::new()
                    };
                    Some(format!(
                        "{} – {}{} ({})",
                        region_of(action),
                        prefix,
                        notice.label(),
                        fields.join(", ")
                    ))
                }
                _ => None,
            })
            .collect::<Vec<_>>();

        let review_lines = plan
            .reviews()
            .filter_map(|action| match action {
                Action::Review {
                    notice,
                    record_id,
                    reason,
                    ..
                } => Some(format!(
                    "{} – {} [{}]: {}",
                    region_of(action),
                    notice.label(),
                    record_id,
                    reason
                )),
                _ => None,
            })
            .collect::<Vec<_>>();

        let extraction_failures = report
            .failures
            .iter()
            .filter(|f| f.kind.is_extraction())
            .count();

        Self {
            created: created_lines.len(),
            updated: updated_lines.len(),
            skipped: plan.noop_count(),
            review: review_lines.len(),
            excluded: report.excluded,
            extraction_failures,
            other_failures: report.failures.len() - extraction_failures,
            created_lines,
            updated_lines,
            review_lines,
            failures: report.failures.clone(),
        }
    }

    /// Nothing worth telling anyone about. Ambiguous matches alone do not
    /// count: they repeat on every run until someone fixes the record.
    pub fn is_empty(&self) -> bool {
        self.created == 0
            && self.updated == 0
            && self.review == 0
            && self
                .failures
                .iter()
                .all(|f| f.kind == FailureKind::Ambiguous)
    }

    /// The plain-text message for the notifier, or `None` for an empty run.
    pub fn digest(&self, now: NaiveDateTime) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut lines = vec![
            "🏛 Edikte-Monitor".to_string(),
            now.format("%d.%m.%Y %H:%M").to_string(),
            String::new(),
        ];

        push_section(
            &mut lines,
            &format!("🟢 Neue Versteigerungen: {}", self.created),
            &self.created_lines,
            MAX_CREATED_LINES,
            200,
        );
        push_section(
            &mut lines,
            &format!("🔵 Aktualisiert: {}", self.updated),
            &self.updated_lines,
            MAX_UPDATED_LINES,
            120,
        );
        push_section(
            &mut lines,
            &format!("🟡 Zu prüfen: {}", self.review),
            &self.review_lines,
            MAX_REVIEW_LINES,
            160,
        );
        let failure_lines: Vec<String> = self.failures.iter().map(|f| f.to_string()).collect();
        push_section(
            &mut lines,
            &format!("⚠️ Fehler ({}):", failure_lines.len()),
            &failure_lines,
            MAX_FAILURE_LINES,
            100,
        );

        let message = lines.join("\n");
        Some(cap_message(message.trim_end()))
    }
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[String], max: usize, width: usize) {
    if items.is_empty() {
        return;
    }
    lines.push(title.to_string());
    for item in items.iter().take(max) {
        lines.push(format!("• {}", truncate_chars(item, width)));
    }
    if items.len() > max {
        lines.push(format!("  … und {} weitere", items.len() - max));
    }
    lines.push(String::new());
}

/// Cuts a message down to [`MAX_DIGEST_CHARS`], marking the cut.
pub fn cap_message(message: &str) -> String {
    const MARKER: &str = "\n[...]";
    if message.chars().count() <= MAX_DIGEST_CHARS {
        return message.to_string();
    }
    let keep = MAX_DIGEST_CHARS - MARKER.chars().count();
    let mut capped: String = message.chars().take(keep).collect();
    capped.push_str(MARKER);
    capped
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        writeln!(f, "  Created:             {}", self.created)?;
        writeln!(f, "  Updated:             {}", self.updated)?;
        writeln!(f, "  Unchanged:           {}", self.skipped)?;
        writeln!(f, "  Needs review:        {}", self.review)?;
        writeln!(f, "  Excluded:            {}", self.excluded)?;
        writeln!(f, "  Extraction failures: {}", self.extraction_failures)?;
        writeln!(f, "  Other failures:      {}", self.other_failures)?;
        for failure in &self.failures {
            writeln!(f, "  - {}", failure)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::{Observation, reconcile};
    use crate::types::{Notice, NoticeSummary, NoticeType, Region};
    use chrono::NaiveDate;

    fn notice(id: &str, region: Region) -> Notice {
        let summary = NoticeSummary {
            region,
            notice_type: NoticeType::Auction,
            edict_id: id.to_string(),
            link: format!("https://edikte.example/alldoc/{id}!OpenDocument"),
            description: format!("Versteigerung Objekt {id}"),
            date: NaiveDate::from_ymd_opt(2026, 3, 12),
        };
        Notice::from_summary(&summary)
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17)
            .and_then(|d| d.and_hms_opt(7, 30, 0))
            .unwrap()
    }

    #[test]
    fn test_counts() {
        let observations: Vec<Observation> = (0..3)
            .map(|i| Observation::new(notice(&format!("a{i}"), Region::Tirol)))
            .collect();
        let plan = reconcile(&observations, &[]);
        let mut report = RunReport {
            excluded: 2,
            ..Default::default()
        };
        report.fail(FailureKind::Region, "Wien", "status 503");
        report.fail(FailureKind::Incomplete, "https://x/doc.pdf", "creditor/claim");

        let summary = RunSummary::new(&plan, &report);

        assert_eq!(summary.created, 3);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.excluded, 2);
        assert_eq!(summary.extraction_failures, 1);
        assert_eq!(summary.other_failures, 1);
        assert!(summary.created_lines[0].starts_with("Tirol – "));
    }

    #[test]
    fn test_empty_run_has_no_digest() {
        let summary = RunSummary::new(&ActionPlan::default(), &RunReport::default());
        assert!(summary.is_empty());
        assert_eq!(summary.digest(now()), None);

        let mut report = RunReport::default();
        report.fail(FailureKind::Ambiguous, "rec-1", "2 candidates");
        assert_eq!(RunSummary::new(&ActionPlan::default(), &report).digest(now()), None);
    }

    #[test]
    fn test_digest_lists_failures_separately() {
        let mut report = RunReport::default();
        report.fail(FailureKind::Region, "Kärnten", "status 503");
        let summary = RunSummary::new(&ActionPlan::default(), &report);

        let digest = summary.digest(now()).expect("failures produce a digest");
        assert!(digest.starts_with("🏛 Edikte-Monitor\n17.10.2026 07:30"));
        assert!(digest.contains("⚠️ Fehler (1):\n• [region] Kärnten: status 503"));
        assert!(!digest.contains("Neue Versteigerungen"));
    }

    #[test]
    fn test_digest_caps_lines_and_length() {
        let observations: Vec<Observation> = (0..300)
            .map(|i| Observation::new(notice(&format!("{i:04x}"), Region::Wien)))
            .collect();
        let plan = reconcile(&observations, &[]);
        let summary = RunSummary::new(&plan, &RunReport::default());

        let digest = summary.digest(now()).unwrap();
        assert!(digest.contains("🟢 Neue Versteigerungen: 300"));
        assert!(digest.contains("… und 280 weitere"));
        assert_eq!(digest.matches("• ").count(), MAX_CREATED_LINES);
        assert!(digest.chars().count() <= MAX_DIGEST_CHARS);
    }

    #[test]
    fn test_cap_message_marks_cut() {
        let long = "x".repeat(5000);
        let capped = cap_message(&long);
        assert_eq!(capped.chars().count(), MAX_DIGEST_CHARS);
        assert!(capped.ends_with("\n[...]"));
    }
}
