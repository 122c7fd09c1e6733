use crate::filter::ObjectTypeFilter;
use crate::retry::RetryPolicy;
use crate::types::Region;

/// Which notices get their appraisal document downloaded and analyzed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppraisalMode {
    /// New notices and stored records flagged for analysis.
    #[default]
    Flagged,
    /// Every notice whose record is not analyzed yet.
    All,
    Off,
}

/// Settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub regions: Vec<Region>,
    pub filter: ObjectTypeFilter,
    /// Upper bound on concurrent fetches and extractions.
    pub concurrency: usize,
    pub appraisals: AppraisalMode,
    /// Plan and summarize, but write nothing to the store.
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            regions: Region::ALL.to_vec(),
            filter: ObjectTypeFilter::default(),
            concurrency: 4,
            appraisals: AppraisalMode::default(),
            dry_run: false,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.regions.is_empty() {
            return Err("at least one region is required".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Retry settings for the source client.
#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    pub pages: RetryPolicy,
    pub documents: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            pages: RetryPolicy::default(),
            documents: RetryPolicy::for_documents(),
        }
    }
}
