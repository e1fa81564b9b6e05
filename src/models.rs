use crate::config::DeliveryConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One lead captured by an ad-platform lead form.
///
/// The pipeline only relies on `id`; every other field is ferried to the CRM
/// client untouched. Unknown keys returned by the Graph API are kept in
/// `extra` so a staging file preserves the full payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Lead identifier (used for CRM correlation and deduplication)
    pub id: String,

    /// Creation time as reported by the ad platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_name: Option<String>,

    /// Answers submitted in the form
    #[serde(default)]
    pub field_data: Vec<FieldData>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single form answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldData {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LeadRecord {
    /// Builds a record with only an identifier and the given answers.
    pub fn new(id: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            id: id.into(),
            created_time: None,
            form_id: None,
            ad_id: None,
            ad_name: None,
            campaign_id: None,
            campaign_name: None,
            field_data: fields
                .iter()
                .map(|(name, value)| FieldData {
                    name: (*name).to_string(),
                    values: vec![(*value).to_string()],
                })
                .collect(),
            extra: Map::new(),
        }
    }

    /// Whether the record carries a usable identifier.
    pub fn has_identifier(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// First value of the answer named `name` (case-insensitive).
    pub fn field(&self, name: &str) -> Option<String> {
        self.field_data
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
            .and_then(|field| field.values.first())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn first_field(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.field(name))
    }

    /// Extract full name from form data
    pub fn get_name(&self) -> Option<String> {
        self.first_field(&["full_name", "name", "nome", "nome_completo"])
            .or_else(|| {
                let first = self.field("first_name")?;
                match self.field("last_name") {
                    Some(last) => Some(format!("{} {}", first, last)),
                    None => Some(first),
                }
            })
    }

    /// Extract email from form data
    pub fn get_email(&self) -> Option<String> {
        self.first_field(&["email", "e-mail", "work_email"])
            .map(|email| email.to_lowercase())
    }

    /// Extract phone number from form data
    pub fn get_phone(&self) -> Option<String> {
        self.first_field(&["phone_number", "phone", "telefone", "celular", "work_phone_number"])
    }

    /// Extract city from form data
    pub fn get_city(&self) -> Option<String> {
        self.first_field(&["city", "cidade"])
    }

    /// Human-readable description used for the CRM history note.
    pub fn format_description(&self) -> String {
        let mut desc = String::new();

        desc.push_str("Lead do Facebook Ads\n\n");
        if let Some(campaign) = self.campaign_name.as_ref().or(self.campaign_id.as_ref()) {
            desc.push_str(&format!("Campanha: {}\n", campaign));
        }
        if let Some(ad) = self.ad_name.as_ref().or(self.ad_id.as_ref()) {
            desc.push_str(&format!("Anúncio: {}\n", ad));
        }
        if let Some(form_id) = &self.form_id {
            desc.push_str(&format!("Formulário ID: {}\n", form_id));
        }
        if let Some(created) = &self.created_time {
            desc.push_str(&format!("Capturado em: {}\n", created));
        }

        if !self.field_data.is_empty() {
            desc.push_str("\nInformações do Formulário:\n");
            for field in &self.field_data {
                desc.push_str(&format!("   • {}: {}\n", field.name, field.values.join(", ")));
            }
        }

        desc
    }
}

/// A lead form as listed by the ad platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadForm {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Which forms and ads to pull leads from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub form_ids: Vec<String>,
    pub ad_ids: Vec<String>,
}

impl Selection {
    pub fn new(form_ids: Vec<String>, ad_ids: Vec<String>) -> Self {
        Self { form_ids, ad_ids }
    }

    pub fn is_empty(&self) -> bool {
        self.form_ids.is_empty() && self.ad_ids.is_empty()
    }
}

/// CRM-side side effects applied uniformly to every record of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub add_to_funnel: bool,
    pub change_owner: bool,
    pub add_history: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        DeliveryOptions::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for DeliveryOptions {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            add_to_funnel: config.add_to_funnel,
            change_owner: config.change_owner,
            add_history: config.add_history,
        }
    }
}

/// What the CRM client did with one record that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Record written; carries the CRM-side identifier.
    Delivered { crm_id: String },
    /// Record deliberately not written.
    Skipped { reason: String },
}

/// Per-record result fed to the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Success,
    Failed,
    Skipped,
}

/// Counters accumulated across one staging file.
///
/// `total == success + failed + skipped` holds after every `record` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTally {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DeliveryTally {
    pub fn record(&mut self, outcome: RecordOutcome) {
        self.total += 1;
        match outcome {
            RecordOutcome::Success => self.success += 1,
            RecordOutcome::Failed => self.failed += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.success + self.failed + self.skipped
    }
}

impl std::fmt::Display for DeliveryTally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total: {}, Success: {}, Failed: {}, Skipped: {}",
            self.total, self.success, self.failed, self.skipped
        )
    }
}
