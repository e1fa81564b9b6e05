//! Wires credentials, extractor, sender, sweeper and scheduler into the
//! operations exposed by the command line.

use crate::b2cor_client::{B2CorClient, B2CorDefaults, B2CorKeyVerifier};
use crate::config::{Config, Settings};
use crate::credentials::{Credential, Secret, SecretPrompt, StoredCredential, TokenFile};
use crate::delivery_ledger::DeliveryLedger;
use crate::errors::{AppError, PipelineStage};
use crate::extractor::{Extraction, LeadExtractor, LeadSource};
use crate::facebook_client::{FacebookLeadsClient, FacebookTokenVerifier};
use crate::models::{DeliveryOptions, DeliveryTally, Selection};
use crate::prompts::{self, Prompter};
use crate::retention::{RetentionSweeper, SweepReport};
use crate::scheduler::{Clock, RunSummary, ScheduleDescriptor, Scheduler, SystemClock};
use crate::sender::{LeadSender, LeadSink};
use chrono::NaiveDateTime;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Builds API clients once credentials are known to be valid.
pub trait ClientFactory: Send + Sync {
    fn lead_source(&self, token: &Secret) -> Result<Arc<dyn LeadSource>, AppError>;
    /// `lookback_days` bounds how long delivered lead ids must be remembered.
    fn lead_sink(
        &self,
        api_key: &Secret,
        lookback_days: u32,
    ) -> Result<Arc<dyn LeadSink>, AppError>;
}

/// Real Graph API / B2Cor clients configured from [`Settings`].
pub struct HttpClientFactory {
    settings: Settings,
}

impl HttpClientFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl ClientFactory for HttpClientFactory {
    fn lead_source(&self, token: &Secret) -> Result<Arc<dyn LeadSource>, AppError> {
        let client = FacebookLeadsClient::new(
            self.settings.facebook_graph_url.clone(),
            token.clone(),
            self.settings.facebook_page_id.clone(),
            self.settings.http_timeout,
        )?;
        Ok(Arc::new(client))
    }

    fn lead_sink(
        &self,
        api_key: &Secret,
        lookback_days: u32,
    ) -> Result<Arc<dyn LeadSink>, AppError> {
        let ledger = DeliveryLedger::open(
            self.settings.credentials_dir.join("b2cor_delivered.json"),
            DeliveryLedger::retention_for(lookback_days),
        );
        let defaults = B2CorDefaults {
            funnel_id: self.settings.b2cor_funnel_id.clone(),
            owner_id: self.settings.b2cor_owner_id.clone(),
            history_text: self.settings.b2cor_history_text.clone(),
        };
        let client = B2CorClient::new(
            self.settings.b2cor_base_url.clone(),
            api_key.clone(),
            defaults,
            Arc::new(ledger),
            self.settings.http_timeout,
        )?;
        Ok(Arc::new(client))
    }
}

/// Result of one successful `process()` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Extraction produced nothing; the sender was not called.
    NoLeads { swept: usize },
    Completed {
        staging_file: PathBuf,
        extracted: usize,
        tally: DeliveryTally,
        swept: usize,
    },
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::NoLeads { .. } => write!(f, "No leads to send"),
            ProcessOutcome::Completed {
                staging_file,
                extracted,
                tally,
                ..
            } => write!(
                f,
                "{} leads extracted to {}. {}",
                extracted,
                staging_file.display(),
                tally
            ),
        }
    }
}

/// The Facebook Ads → B2Cor integration.
///
/// Configuration and credentials are loaded once and read by every stage.
/// Extractor and sender only exist after a successful [`Integration::setup`].
pub struct Integration {
    config: Config,
    config_path: PathBuf,
    staging_dir: PathBuf,
    poll_interval: Duration,
    ad_credential: Box<dyn Credential>,
    crm_credential: Box<dyn Credential>,
    factory: Arc<dyn ClientFactory>,
    extractor: Option<LeadExtractor>,
    sender: Option<LeadSender>,
    sweeper: RetentionSweeper,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
}

impl Integration {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        staging_dir: PathBuf,
        ad_credential: Box<dyn Credential>,
        crm_credential: Box<dyn Credential>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            config,
            config_path,
            sweeper: RetentionSweeper::new(staging_dir.clone()),
            staging_dir,
            poll_interval: Duration::from_secs(60),
            ad_credential,
            crm_credential,
            factory,
            extractor: None,
            sender: None,
            scheduler: Scheduler::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Production wiring: file/env backed credentials, HTTP clients, wall clock.
    pub fn from_settings(
        settings: Settings,
        prompt: Arc<dyn SecretPrompt>,
    ) -> Result<Self, AppError> {
        let config = Config::load(&settings.config_path);
        std::fs::create_dir_all(&settings.staging_dir)?;

        let facebook = StoredCredential::new(
            "facebook",
            TokenFile::new(settings.credentials_dir.join("facebook_token.json")),
            Some("FACEBOOK_ACCESS_TOKEN"),
            FacebookTokenVerifier::new(
                settings.facebook_graph_url.clone(),
                settings.facebook_app_id.clone(),
                settings.facebook_app_secret.clone(),
                settings.http_timeout,
            )?,
            Arc::clone(&prompt),
        );
        let b2cor = StoredCredential::new(
            "b2cor",
            TokenFile::new(settings.credentials_dir.join("b2cor_api_key.json")),
            Some("B2COR_API_KEY"),
            B2CorKeyVerifier::new(settings.b2cor_base_url.clone(), settings.http_timeout)?,
            prompt,
        );

        let poll_interval = settings.poll_interval;
        let integration = Self::new(
            config,
            settings.config_path.clone(),
            settings.staging_dir.clone(),
            Box::new(facebook),
            Box::new(b2cor),
            Arc::new(HttpClientFactory::new(settings)),
        )
        .with_poll_interval(poll_interval);
        Ok(integration)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_set_up(&self) -> bool {
        self.extractor.is_some() && self.sender.is_some()
    }

    /// Brings one credential to the valid state: stored value first, then a
    /// single interactive attempt.
    async fn ensure_valid(credential: &mut Box<dyn Credential>) -> Result<Secret, AppError> {
        let label = credential.label();
        if !credential.verify().await {
            tracing::info!(credential = label, "Credential missing or invalid, starting interactive setup");
            if !credential.interactive_obtain().await {
                tracing::error!(credential = label, "Credential setup failed");
                return Err(AppError::credential(label, "could not obtain a valid credential"));
            }
        }
        credential
            .secret()
            .ok_or_else(|| AppError::credential(label, "credential verified but not held"))
    }

    /// Validates (or obtains) both credentials, then builds extractor and sender.
    ///
    /// Fails fast: if the ad-platform credential cannot be made valid the CRM
    /// credential is not even looked at.
    pub async fn setup(&mut self) -> Result<(), AppError> {
        tracing::info!("Setting up Facebook Ads authentication");
        let token = Self::ensure_valid(&mut self.ad_credential).await?;
        let source = self.factory.lead_source(&token)?;
        self.extractor = Some(LeadExtractor::new(source, self.staging_dir.clone()));

        tracing::info!("Setting up B2Cor authentication");
        let api_key = Self::ensure_valid(&mut self.crm_credential).await?;
        let sink = self
            .factory
            .lead_sink(&api_key, self.config.extraction.lookback_days)?;
        self.sender = Some(LeadSender::new(sink));

        tracing::info!("Setup completed");
        Ok(())
    }

    /// Extracts leads for the configured selection.
    pub async fn extract_leads(&self) -> Result<Extraction, AppError> {
        let extractor = self.extractor.as_ref().ok_or_else(|| {
            AppError::Configuration("lead extractor not configured; run setup first".to_string())
        })?;
        let extraction = &self.config.extraction;
        let selection = Selection::new(extraction.form_ids.clone(), extraction.ad_ids.clone());

        extractor
            .extract(&selection, extraction.lookback_days)
            .await
            .map_err(|e| {
                tracing::error!(stage = "extract", error = %e, "Lead extraction failed");
                e
            })
    }

    /// Sends one staging file with the configured delivery options.
    pub async fn send_leads(&self, staging_file: &Path) -> Result<DeliveryTally, AppError> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            AppError::Configuration("lead sender not configured; run setup first".to_string())
        })?;
        let options = DeliveryOptions::from(&self.config.delivery);

        sender.send(staging_file, options).await.map_err(|e| {
            tracing::error!(stage = "send", path = %staging_file.display(), error = %e, "Lead delivery failed");
            e
        })
    }

    /// Deletes staging files older than the configured retention.
    pub fn sweep(&self) -> Result<SweepReport, AppError> {
        self.sweeper.sweep(self.config.retention.keep_days)
    }

    /// extract → send (when a file was produced) → sweep.
    ///
    /// One invocation is one attempt. The first failing stage stops the chain
    /// and is reported as [`AppError::Pipeline`].
    pub async fn process(&self) -> Result<ProcessOutcome, AppError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("process", %run_id);
        self.process_inner().instrument(span).await
    }

    async fn process_inner(&self) -> Result<ProcessOutcome, AppError> {
        if !self.is_set_up() {
            tracing::error!("Components not configured; run setup first");
            return Err(AppError::Configuration("components not configured".to_string())
                .at_stage(PipelineStage::Setup, None));
        }

        let extraction = self
            .extract_leads()
            .await
            .map_err(|e| e.at_stage(PipelineStage::Extract, None))?;

        let Some(staging_file) = extraction.staging_file else {
            tracing::warn!("No leads extracted, nothing to send");
            let report = self
                .sweep()
                .map_err(|e| e.at_stage(PipelineStage::Sweep, Some(0)))?;
            return Ok(ProcessOutcome::NoLeads {
                swept: report.deleted.len(),
            });
        };

        let tally = self
            .send_leads(&staging_file)
            .await
            .map_err(|e| e.at_stage(PipelineStage::Send, Some(extraction.count)))?;

        let report = self
            .sweep()
            .map_err(|e| e.at_stage(PipelineStage::Sweep, Some(extraction.count)))?;

        tracing::info!("Processing completed. {}", tally);
        Ok(ProcessOutcome::Completed {
            staging_file,
            extracted: extraction.count,
            tally,
            swept: report.deleted.len(),
        })
    }

    /// Arms the recurring job from the persisted schedule.
    ///
    /// A disabled schedule or an unknown cadence is refused and leaves the
    /// scheduler in whatever state it was.
    pub fn schedule_job(&mut self) -> Result<NaiveDateTime, AppError> {
        let schedule = &self.config.extraction.schedule;
        if !schedule.enabled {
            tracing::info!("Scheduling disabled in configuration");
            return Err(AppError::Scheduling("scheduling is disabled in configuration".to_string()));
        }

        let descriptor = ScheduleDescriptor::from_config(schedule).map_err(|e| {
            tracing::error!(error = %e, "Schedule rejected");
            e
        })?;
        let next_run = self.scheduler.arm(descriptor, self.clock.now())?;

        match descriptor.time_of_day {
            Some(time) => tracing::info!(
                "Integration scheduled {} at {} (next run {})",
                descriptor.cadence,
                time.format("%H:%M"),
                next_run
            ),
            None => tracing::info!("Integration scheduled {} (next run {})", descriptor.cadence, next_run),
        }
        Ok(next_run)
    }

    /// Runs the polling loop until `shutdown` resolves.
    pub async fn run_scheduled_jobs<S>(&mut self, shutdown: S) -> Result<RunSummary, AppError>
    where
        S: Future<Output = ()>,
    {
        tracing::info!("Starting scheduled jobs");
        let clock = Arc::clone(&self.clock);
        let poll = self.poll_interval;
        let mut scheduler = std::mem::take(&mut self.scheduler);

        let this: &Integration = self;
        let result = scheduler
            .run(clock.as_ref(), poll, move || this.process(), shutdown)
            .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Scheduled job loop stopped");
        }
        self.scheduler = scheduler;
        result
    }

    /// Runs the configuration wizard and saves the result.
    pub fn interactive_config(&mut self, prompter: &dyn Prompter) -> Result<(), AppError> {
        prompts::interactive_config(prompter, &mut self.config);
        self.config.save(&self.config_path)
    }
}
