use phonenumber::{country::Id as CountryId, Mode};
use regex::Regex;
use std::sync::OnceLock;

static EMAIL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

/// Validate email format and reject common fake patterns.
pub fn is_valid_email(email: &str) -> bool {
    // Basic checks
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    // Detect fake patterns (repeated digits)
    let fake_patterns = [
        "999999",    // Common fake: 1199999999333@gmail.com
        "111111",    // Common fake: 1111111111@
        "000000",    // Common fake: 000000@
        "123456789", // Sequential fake
    ];

    for pattern in &fake_patterns {
        if email.contains(pattern) {
            tracing::warn!(
                "❌ Invalid email detected (fake pattern '{}'): {}",
                pattern,
                email
            );
            return false;
        }
    }

    // RFC 5322 simplified: local@domain.tld
    let email_regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .ok()
    });

    match email_regex {
        Some(re) if re.is_match(email) => true,
        _ => {
            tracing::warn!("❌ Invalid email format: {}", email);
            false
        }
    }
}

/// Validate and normalize a Brazilian phone number to E.164.
///
/// Returns `(true, "+5511987654321")` on success, `(false, reason)` otherwise.
pub fn validate_br_phone(raw: &str) -> (bool, String) {
    // Skip empty or very short strings
    if raw.trim().is_empty() || raw.len() < 8 {
        return (false, "Phone too short".to_string());
    }

    match phonenumber::parse(Some(CountryId::BR), raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let formatted = number.format().mode(Mode::E164).to_string();
                tracing::debug!("✓ Valid BR phone: {} → {}", raw, formatted);
                (true, formatted)
            } else {
                tracing::warn!("❌ Invalid BR phone number: {}", raw);
                (false, "Invalid Brazilian phone number".to_string())
            }
        }
        Err(e) => {
            tracing::warn!("❌ Failed to parse BR phone '{}': {:?}", raw, e);
            (false, format!("Parse error: {:?}", e))
        }
    }
}

/// Normalized contact details of a lead, as sent to the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    pub fn from_raw(email: Option<&str>, phone: Option<&str>) -> Self {
        let email = email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| is_valid_email(e));
        let phone = phone.and_then(|p| {
            let (valid, normalized) = validate_br_phone(p);
            valid.then_some(normalized)
        });
        Self { email, phone }
    }

    pub fn is_reachable(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }
}
