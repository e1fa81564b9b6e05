use crate::errors::AppError;
use crate::models::{DeliveryOptions, DeliveryStatus, DeliveryTally, LeadRecord, RecordOutcome};
use crate::staging;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// CRM operation the sender depends on: one write attempt for one lead.
#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn deliver(
        &self,
        lead: &LeadRecord,
        options: DeliveryOptions,
    ) -> Result<DeliveryStatus, AppError>;
}

/// Pushes the records of a staging file to the CRM.
pub struct LeadSender {
    sink: Arc<dyn LeadSink>,
}

impl LeadSender {
    pub fn new(sink: Arc<dyn LeadSink>) -> Self {
        Self { sink }
    }

    /// Delivers one record and folds every result into an outcome.
    async fn deliver_one(&self, lead: &LeadRecord, options: DeliveryOptions) -> RecordOutcome {
        match self.sink.deliver(lead, options).await {
            Ok(DeliveryStatus::Delivered { crm_id }) => {
                tracing::debug!(lead_id = %lead.id, crm_id = %crm_id, "Lead delivered");
                RecordOutcome::Success
            }
            Ok(DeliveryStatus::Skipped { reason }) => {
                tracing::info!(lead_id = %lead.id, reason = %reason, "Lead skipped");
                RecordOutcome::Skipped
            }
            Err(e) => {
                tracing::error!(lead_id = %lead.id, error = %e, "Lead delivery failed");
                RecordOutcome::Failed
            }
        }
    }

    /// Sends every record of `staging_file`, one at a time, in file order.
    ///
    /// A missing or unreadable file is an error. Per-record failures are not:
    /// they are counted and the batch moves on.
    pub async fn send(
        &self,
        staging_file: &Path,
        options: DeliveryOptions,
    ) -> Result<DeliveryTally, AppError> {
        let leads = staging::read(staging_file)?;
        tracing::info!(
            "Sending {} leads to B2Cor from {}",
            leads.len(),
            staging_file.display()
        );

        let mut tally = DeliveryTally::default();
        for lead in &leads {
            let outcome = self.deliver_one(lead, options).await;
            tally.record(outcome);
        }

        debug_assert!(tally.is_consistent());
        tracing::info!("Delivery finished. {}", tally);
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeadRecord;
    use std::sync::Mutex;

    struct SeenOptions(Mutex<Vec<DeliveryOptions>>);

    #[async_trait]
    impl LeadSink for SeenOptions {
        async fn deliver(&self, lead: &LeadRecord, options: DeliveryOptions) -> Result<DeliveryStatus, AppError> {
            self.0.lock().unwrap().push(options);
            Ok(DeliveryStatus::Delivered {
                crm_id: format!("crm-{}", lead.id),
            })
        }
    }

    #[tokio::test]
    async fn test_options_passed_to_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let leads: Vec<_> = (0..4).map(|i| LeadRecord::new(i.to_string(), &[])).collect();
        let path = staging::publish(dir.path(), chrono::Local::now().naive_local(), &leads).unwrap();

        let sink = Arc::new(SeenOptions(Mutex::new(Vec::new())));
        let options = DeliveryOptions {
            add_to_funnel: false,
            change_owner: true,
            add_history: false,
        };
        let tally = LeadSender::new(sink.clone()).send(&path, options).await.unwrap();

        assert_eq!(tally.success, 4);
        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|o| *o == options));
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SeenOptions(Mutex::new(Vec::new())));
        let err = LeadSender::new(sink.clone())
            .send(&dir.path().join("facebook_leads_x.json"), DeliveryOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Staging { .. }));
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
