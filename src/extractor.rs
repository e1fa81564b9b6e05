use crate::errors::AppError;
use crate::models::{LeadForm, LeadRecord, Selection};
use crate::staging;
use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;

/// Ad-platform operations the extractor depends on.
#[async_trait]
pub trait LeadSource: Send + Sync {
    /// Every lead form visible to the held token.
    async fn list_forms(&self) -> Result<Vec<LeadForm>, AppError>;

    /// Leads of the selected forms and ads created within the lookback window.
    async fn fetch_leads(
        &self,
        selection: &Selection,
        lookback_days: u32,
    ) -> Result<Vec<LeadRecord>, AppError>;
}

/// Result of one extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Published staging file; `None` when nothing was extracted.
    pub staging_file: Option<PathBuf>,
    pub count: usize,
}

impl Extraction {
    fn empty() -> Self {
        Self {
            staging_file: None,
            count: 0,
        }
    }
}

/// Credential errors pass through untouched so setup can be re-run; anything
/// else becomes an extraction error.
fn extraction_error(step: &str, err: AppError) -> AppError {
    match err {
        credential @ AppError::Credential { .. } => credential,
        other => AppError::Extraction(format!("{}: {}", step, other)),
    }
}

/// Pulls leads from the ad platform into a staging file.
pub struct LeadExtractor {
    source: Arc<dyn LeadSource>,
    staging_dir: PathBuf,
}

impl LeadExtractor {
    pub fn new(source: Arc<dyn LeadSource>, staging_dir: PathBuf) -> Self {
        Self {
            source,
            staging_dir,
        }
    }

    /// Turns an empty selection into "every form on the account".
    pub async fn resolve_selection(&self, selection: &Selection) -> Result<Selection, AppError> {
        if !selection.is_empty() {
            return Ok(selection.clone());
        }

        tracing::info!("No form or ad ids configured, listing available forms");
        let forms = self
            .source
            .list_forms()
            .await
            .map_err(|e| extraction_error("listing forms", e))?;
        let form_ids: Vec<String> = forms.into_iter().map(|form| form.id).collect();
        tracing::info!("Found {} forms for extraction", form_ids.len());

        Ok(Selection::new(form_ids, Vec::new()))
    }

    /// Extracts leads and publishes them as one staging file.
    ///
    /// Zero leads is not an error: no file is written and `staging_file` is
    /// `None`. Any transport or auth failure aborts before anything is
    /// published.
    pub async fn extract(
        &self,
        selection: &Selection,
        lookback_days: u32,
    ) -> Result<Extraction, AppError> {
        let selection = self.resolve_selection(selection).await?;
        if selection.is_empty() {
            tracing::warn!("No forms available, nothing to extract");
            return Ok(Extraction::empty());
        }

        tracing::info!(
            forms = selection.form_ids.len(),
            ads = selection.ad_ids.len(),
            lookback_days,
            "Extracting leads"
        );
        let fetched = self
            .source
            .fetch_leads(&selection, lookback_days)
            .await
            .map_err(|e| extraction_error("fetching leads", e))?;

        let fetched_count = fetched.len();
        let leads: Vec<LeadRecord> = fetched
            .into_iter()
            .filter(|lead| lead.has_identifier())
            .collect();
        if leads.len() < fetched_count {
            tracing::warn!(
                "Dropped {} leads without identifier",
                fetched_count - leads.len()
            );
        }

        if leads.is_empty() {
            tracing::warn!("No leads extracted");
            return Ok(Extraction::empty());
        }

        let path = staging::publish(&self.staging_dir, Local::now().naive_local(), &leads)?;
        tracing::info!("Extracted {} leads to {}", leads.len(), path.display());

        Ok(Extraction {
            staging_file: Some(path),
            count: leads.len(),
        })
    }
}
