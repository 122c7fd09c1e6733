//! One harvesting run: listings → details → filter → enrichment and
//! appraisals → reconciliation → store writes → digest.

use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::{StreamExt, stream};
use serde::Serialize;

use crate::appraisal;
use crate::config::{AppraisalMode, RunConfig};
use crate::enricher::{adopt_links, propose_links};
use crate::notify::Notifier;
use crate::parser::{parse_listing, parse_notice_detail};
use crate::reconciler::{Action, ActionPlan, Observation, reconcile_with};
use crate::record::ExistingRecord;
use crate::scraper::SourceSite;
use crate::store::{RecordStore, StoreError};
use crate::summary::{FailureKind, RunReport, RunSummary};
use crate::types::{Notice, NoticeSummary, Region};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Source site unreachable: all {0} regions failed")]
    SourceUnreachable(usize),
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub plan: ActionPlan,
    pub report: RunReport,
    pub summary: RunSummary,
    /// The digest handed to the notifier, if the run had anything to report.
    pub digest: Option<String>,
}

pub struct Pipeline {
    source: Arc<dyn SourceSite>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    config: RunConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn SourceSite>,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        config: RunConfig,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            config,
        }
    }

    pub async fn run(&self, now: NaiveDateTime) -> Result<RunOutcome, RunError> {
        self.config.validate().map_err(RunError::Config)?;
        let mut report = RunReport::default();

        let summaries = self.fetch_listings(&mut report).await?;
        let notices = self.fetch_details(summaries, &mut report).await;

        let (notices, excluded) = self.config.filter.apply(notices);
        report.excluded = excluded.len();

        let mut records = self.store.list_records().await?;
        log::info!("{} stored records", records.len());

        let enrichment = propose_links(&records, &notices);
        for ambiguous in &enrichment.ambiguous {
            report.fail(
                FailureKind::Ambiguous,
                ambiguous.record_id.clone(),
                format!(
                    "{} matches {} notices",
                    ambiguous.address,
                    ambiguous.candidates.len()
                ),
            );
        }
        report.links_proposed = adopt_links(&mut records, &enrichment.proposals);

        let observations = self.extract_appraisals(notices, &records, &mut report).await;
        let plan = reconcile_with(&observations, &records, |field| self.store.keeps(field));

        if self.config.dry_run {
            log::info!("Dry run: {} actions not applied", plan.actions.len());
        } else {
            self.apply_plan(&plan, &mut report).await;
        }

        let summary = RunSummary::new(&plan, &report);
        let digest = summary.digest(now);
        match &digest {
            Some(message) => {
                if let Err(e) = self.notifier.notify(message).await {
                    log::error!("Notification failed: {}", e);
                }
            }
            None => log::info!("Nothing new, no notification sent"),
        }

        Ok(RunOutcome {
            plan,
            report,
            summary,
            digest,
        })
    }

    async fn fetch_listings(&self, report: &mut RunReport) -> Result<Vec<NoticeSummary>, RunError> {
        let results: Vec<(Region, Result<Vec<NoticeSummary>, String>)> =
            stream::iter(self.config.regions.iter().copied())
                .map(|region| async move {
                    let result = match self.source.listing_page(region).await {
                        Ok(html) => parse_listing(&html, region, &self.source.listing_url(region))
                            .map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    (region, result)
                })
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;

        let mut summaries = Vec::new();
        let mut failed = 0;
        for (region, result) in results {
            match result {
                Ok(found) => {
                    log::info!("{}: {} notices", region, found.len());
                    report.regions_fetched += 1;
                    summaries.extend(found);
                }
                Err(e) => {
                    failed += 1;
                    report.fail(FailureKind::Region, region.name(), e);
                }
            }
        }

        if failed == self.config.regions.len() {
            return Err(RunError::SourceUnreachable(failed));
        }

        summaries.sort_by(|a, b| (a.region, &a.edict_id).cmp(&(b.region, &b.edict_id)));
        Ok(summaries)
    }

    /// Parses each notice's detail page. A notice whose page fails keeps
    /// what its listing row revealed, so cancellations still come through.
    async fn fetch_details(
        &self,
        summaries: Vec<NoticeSummary>,
        report: &mut RunReport,
    ) -> Vec<Notice> {
        let results: Vec<(NoticeSummary, Result<Notice, String>)> = stream::iter(summaries)
            .map(|summary| async move {
                let result = match self.source.detail_page(&summary.link).await {
                    Ok(html) => parse_notice_detail(&html, &summary).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                (summary, result)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut notices: Vec<Notice> = results
            .into_iter()
            .map(|(summary, result)| match result {
                Ok(notice) => {
                    report.notices_parsed += 1;
                    notice
                }
                Err(e) => {
                    report.fail(FailureKind::Notice, summary.link.clone(), e);
                    Notice::from_summary(&summary)
                }
            })
            .collect();

        notices.sort_by(|a, b| (a.region, &a.case_id).cmp(&(b.region, &b.case_id)));
        notices
    }

    async fn extract_appraisals(
        &self,
        notices: Vec<Notice>,
        records: &[ExistingRecord],
        report: &mut RunReport,
    ) -> Vec<Observation> {
        let mode = self.config.appraisals;
        let results: Vec<(Notice, Option<Result<appraisal::Extraction, appraisal::ExtractError>>)> =
            stream::iter(notices)
                .map(|notice| async move {
                    let url = notice
                        .appraisal_url
                        .clone()
                        .filter(|_| wants_appraisal(&notice, records, mode));
                    let result = match url {
                        Some(url) => Some(appraisal::extract_from(self.source.as_ref(), &url).await),
                        None => None,
                    };
                    (notice, result)
                })
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;

        let mut observations: Vec<Observation> = results
            .into_iter()
            .map(|(notice, result)| {
                let subject = notice.appraisal_url.clone().unwrap_or_default();
                match result {
                    None => Observation::new(notice),
                    Some(Ok(extraction)) => {
                        report.appraisals_analyzed += 1;
                        if !extraction.is_complete() {
                            let missing: Vec<String> =
                                extraction.missing.iter().map(|g| g.to_string()).collect();
                            report.fail(
                                FailureKind::Incomplete,
                                subject,
                                format!("not found: {}", missing.join(", ")),
                            );
                        }
                        Observation::new(notice).with_appraisal(extraction.facts)
                    }
                    Some(Err(e)) => {
                        report.fail(FailureKind::Appraisal, subject, e);
                        Observation::new(notice)
                    }
                }
            })
            .collect();

        observations.sort_by(|a, b| {
            (a.notice.region, &a.notice.case_id).cmp(&(b.notice.region, &b.notice.case_id))
        });
        observations
    }

    /// Writes creates and updates one at a time. A failed write is recorded
    /// and the remaining actions still run.
    async fn apply_plan(&self, plan: &ActionPlan, report: &mut RunReport) {
        for action in &plan.actions {
            let result = match action {
                Action::Create { fields, notice, .. } => {
                    self.store.create_record(fields).await.map(|id| {
                        log::info!("Created {}: {}", id, notice.label());
                    })
                }
                Action::UpdateFields {
                    record_id, changes, ..
                } => self.store.update_record(record_id, changes).await.map(|()| {
                    log::info!("Updated {}: {}", record_id, action);
                }),
                Action::NoOp { .. } => Ok(()),
                Action::Review { record_id, reason, .. } => {
                    log::warn!("Record {} needs review: {}", record_id, reason);
                    Ok(())
                }
            };
            if let Err(e) = result {
                report.fail(FailureKind::Store, action.key().to_string(), e);
            }
        }
    }
}

/// Whether the notice's appraisal should be analyzed this run.
///
/// A notice without a stored record is always eligible. A stored record
/// that is already analyzed never is. Otherwise `Flagged` waits for the
/// record's opt-in flag and `All` goes ahead.
fn wants_appraisal(notice: &Notice, records: &[ExistingRecord], mode: AppraisalMode) -> bool {
    let key = notice.identity_key();
    let fallback = notice.fallback_key();
    let stored = records.iter().find(|record| {
        record
            .identity_key()
            .is_some_and(|stored| stored == key || Some(&stored) == fallback.as_ref())
    });

    match (mode, stored) {
        (AppraisalMode::Off, _) => false,
        (_, None) => true,
        (_, Some(record)) if record.is_analyzed() => false,
        (AppraisalMode::All, Some(_)) => true,
        (AppraisalMode::Flagged, Some(record)) => {
            if !record.appraisal_requested() {
                log::debug!("{}: appraisal not requested, skipping", record);
            }
            record.appraisal_requested()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ObjectTypeFilter;
    use crate::record::RecordField;
    use crate::scraper::FetchError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "https://edikte.justiz.gv.at/edikte/ex/exedi3.nsf";

    struct FixtureSite {
        listings: HashMap<Region, String>,
        details: HashMap<String, String>,
        documents: HashMap<String, Vec<u8>>,
        downloads: AtomicUsize,
    }

    impl FixtureSite {
        fn vienna() -> Self {
            let read = |path: &str| {
                fs::read_to_string(format!("fixtures/{path}")).expect("Failed to read fixture")
            };
            let listings = HashMap::from([
                (Region::Wien, read("listing/wien.html")),
                (Region::Vorarlberg, read("listing/empty.html")),
            ]);
            let details = HashMap::from([
                (
                    format!("{BASE}/alldoc/a1b2c3d4e5f60718293a4b5c6d7e8f90!OpenDocument"),
                    read("detail/wohnung_wien.html"),
                ),
                (
                    format!("{BASE}/alldoc/b2c3d4e5f60718293a4b5c6d7e8f90a1!OpenDocument"),
                    read("detail/sparse.html"),
                ),
            ]);
            let documents = HashMap::from([(
                format!(
                    "{BASE}/0/a1b2c3d4e5f60718293a4b5c6d7e8f90/$file/Gutachten%20Hauptstrasse.pdf"
                ),
                read("appraisal/sections.txt").into_bytes(),
            )]);
            Self {
                listings,
                details,
                documents,
                downloads: AtomicUsize::new(0),
            }
        }
    }

    fn not_found(url: &str) -> FetchError {
        FetchError::Status {
            url: url.to_string(),
            status: 404,
        }
    }

    #[async_trait]
    impl SourceSite for FixtureSite {
        fn listing_url(&self, region: Region) -> String {
            format!("{BASE}/suchedi?SearchView&query=([BL]=({}))", region.code())
        }

        async fn listing_page(&self, region: Region) -> Result<String, FetchError> {
            self.listings.get(&region).cloned().ok_or(FetchError::Status {
                url: self.listing_url(region),
                status: 503,
            })
        }

        async fn detail_page(&self, url: &str) -> Result<String, FetchError> {
            self.details.get(url).cloned().ok_or_else(|| not_found(url))
        }

        async fn document(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.documents.get(url).cloned().ok_or_else(|| not_found(url))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) -> Result<(), crate::notify::NotifyError> {
            self.messages
                .lock()
                .expect("notifier lock")
                .push(message.to_string());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _message: &str) -> Result<(), crate::notify::NotifyError> {
            Err(crate::notify::NotifyError::Server {
                status: 502,
                body: "Bad Gateway".to_string(),
            })
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap()
    }

    fn config(regions: Vec<Region>) -> RunConfig {
        RunConfig {
            regions,
            ..Default::default()
        }
    }

    struct Harness {
        site: Arc<FixtureSite>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                site: Arc::new(FixtureSite::vienna()),
                store: Arc::new(MemoryStore::new()),
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn pipeline(&self, config: RunConfig) -> Pipeline {
            Pipeline::new(
                self.site.clone(),
                self.store.clone(),
                self.notifier.clone(),
                config,
            )
        }
    }

    #[tokio::test]
    async fn test_first_run_creates_and_isolates_failures() {
        let harness = Harness::new();
        let pipeline = harness.pipeline(config(vec![Region::Wien, Region::Tirol, Region::Vorarlberg]));

        let outcome = pipeline.run(now()).await.expect("run succeeds");

        assert_eq!(outcome.summary.created, 4);
        assert_eq!(outcome.report.regions_fetched, 2);
        let kinds: Vec<FailureKind> = outcome.report.failures.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds.iter().filter(|k| **k == FailureKind::Region).count(),
            1,
            "Tirol fails alone"
        );
        assert_eq!(
            kinds.iter().filter(|k| **k == FailureKind::Notice).count(),
            2,
            "two notices have no detail page"
        );

        let records = harness.store.records();
        assert_eq!(records.len(), 4);
        let flat = records
            .iter()
            .find(|r| r.text(RecordField::CaseId) == Some("a1b2c3d4e5f60718293a4b5c6d7e8f90"))
            .expect("record for the flat");
        assert_eq!(flat.text(RecordField::Owner), Some("Maria Muster"));
        assert_eq!(flat.text(RecordField::Creditor), Some("Bank X"));
        assert!(flat.is_analyzed());

        let messages = harness.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("🟢 Neue Versteigerungen: 4"));
        assert!(messages[0].contains("[region] Tirol"));
    }

    #[tokio::test]
    async fn test_second_run_is_all_noop() {
        let harness = Harness::new();
        let pipeline = harness.pipeline(config(vec![Region::Wien]));

        pipeline.run(now()).await.expect("first run");
        let downloads = harness.site.downloads.load(Ordering::SeqCst);
        let stored = harness.store.records();

        let outcome = pipeline.run(now()).await.expect("second run");

        assert!(outcome.plan.actions.iter().all(Action::is_noop));
        assert_eq!(outcome.summary.skipped, 4);
        assert_eq!(harness.store.records(), stored);
        assert_eq!(
            harness.site.downloads.load(Ordering::SeqCst),
            downloads,
            "analyzed appraisals are not fetched again"
        );
    }

    #[tokio::test]
    async fn test_excluded_objects_never_reach_the_store() {
        let harness = Harness::new();
        let pipeline = harness.pipeline(RunConfig {
            filter: ObjectTypeFilter::new(["reihenhaus"]),
            ..config(vec![Region::Wien])
        });

        let outcome = pipeline.run(now()).await.expect("run succeeds");

        assert_eq!(outcome.summary.excluded, 1);
        assert_eq!(outcome.summary.created, 3);
        assert!(
            harness
                .store
                .records()
                .iter()
                .all(|r| r.text(RecordField::CaseId) != Some("d4e5f60718293a4b5c6d7e8f90a1b2c3"))
        );
    }

    #[tokio::test]
    async fn test_manual_record_gets_link() {
        let harness = Harness::new();
        let mut fields = crate::record::FieldMap::new();
        fields.insert(
            RecordField::Address,
            crate::record::FieldValue::Text("Lindengasse 7".to_string()),
        );
        harness.store.create_record(&fields).await.unwrap();
        let pipeline = harness.pipeline(config(vec![Region::Wien]));

        let outcome = pipeline.run(now()).await.expect("run succeeds");

        assert_eq!(outcome.report.links_proposed, 1);
        assert_eq!(outcome.summary.created, 3);
        assert_eq!(outcome.summary.updated, 1);
        let manual = harness
            .store
            .records()
            .into_iter()
            .find(|r| r.id == "rec-1")
            .expect("manual record");
        assert_eq!(
            manual.text(RecordField::Link),
            Some(
                "https://edikte.justiz.gv.at/edikte/ex/exedi3.nsf/alldoc/b2c3d4e5f60718293a4b5c6d7e8f90a1!OpenDocument"
            )
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let harness = Harness::new();
        let pipeline = harness.pipeline(RunConfig {
            dry_run: true,
            appraisals: AppraisalMode::Off,
            ..config(vec![Region::Wien])
        });

        let outcome = pipeline.run(now()).await.expect("run succeeds");

        assert_eq!(outcome.plan.creates().count(), 4);
        assert!(harness.store.records().is_empty());
        assert_eq!(harness.site.downloads.load(Ordering::SeqCst), 0);
    }

    const FLAT: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90";

    /// A stored, not yet analyzed record for the flat.
    fn stored_flat(requested: bool) -> ExistingRecord {
        let mut fields = crate::record::FieldMap::new();
        let text = |s: &str| crate::record::FieldValue::Text(s.to_string());
        fields.insert(RecordField::CaseId, text(FLAT));
        fields.insert(RecordField::Region, text("Wien"));
        if requested {
            fields.insert(
                RecordField::AppraisalRequested,
                crate::record::FieldValue::Flag(true),
            );
        }
        ExistingRecord::new("flat", fields)
    }

    fn harness_with(record: ExistingRecord) -> Harness {
        Harness {
            store: Arc::new(MemoryStore::with_records(vec![record])),
            ..Harness::new()
        }
    }

    fn flat(store: &MemoryStore) -> ExistingRecord {
        store
            .records()
            .into_iter()
            .find(|r| r.id == "flat")
            .expect("stored flat")
    }

    #[tokio::test]
    async fn test_unflagged_record_skips_appraisal() {
        let harness = harness_with(stored_flat(false));
        let pipeline = harness.pipeline(config(vec![Region::Wien]));

        let outcome = pipeline.run(now()).await.expect("run succeeds");

        assert_eq!(outcome.report.appraisals_analyzed, 0);
        assert_eq!(harness.site.downloads.load(Ordering::SeqCst), 0);
        let flat = flat(&harness.store);
        assert!(!flat.is_analyzed());
        assert_eq!(flat.text(RecordField::Owner), None);
    }

    #[tokio::test]
    async fn test_flagged_record_gets_appraisal() {
        let harness = harness_with(stored_flat(true));
        let pipeline = harness.pipeline(config(vec![Region::Wien]));

        pipeline.run(now()).await.expect("run succeeds");

        let flat = flat(&harness.store);
        assert!(flat.is_analyzed());
        assert_eq!(flat.text(RecordField::Owner), Some("Maria Muster"));
    }

    #[tokio::test]
    async fn test_all_mode_overrides_missing_flag() {
        let harness = harness_with(stored_flat(false));
        let pipeline = harness.pipeline(RunConfig {
            appraisals: AppraisalMode::All,
            ..config(vec![Region::Wien])
        });

        pipeline.run(now()).await.expect("run succeeds");

        let flat = flat(&harness.store);
        assert!(flat.is_analyzed());
        assert_eq!(flat.text(RecordField::Creditor), Some("Bank X"));
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_run_successful() {
        let harness = Harness::new();
        let pipeline = Pipeline::new(
            harness.site.clone(),
            harness.store.clone(),
            Arc::new(FailingNotifier),
            config(vec![Region::Wien]),
        );

        let outcome = pipeline.run(now()).await.expect("run succeeds");

        assert!(outcome.digest.is_some());
        assert_eq!(outcome.summary.created, 4);
        assert_eq!(harness.store.records().len(), 4);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_fatal() {
        let harness = Harness::new();
        let pipeline = harness.pipeline(config(vec![Region::Tirol, Region::Salzburg]));

        let result = pipeline.run(now()).await;

        assert!(matches!(result, Err(RunError::SourceUnreachable(2))));
        assert!(harness.store.records().is_empty());
        assert!(harness.notifier.messages.lock().unwrap().is_empty());
    }
}
