//! Interactive terminal prompts: configuration wizard and secret entry.

use crate::config::{Config, DEFAULT_KEEP_DAYS, DEFAULT_LOOKBACK_DAYS};
use crate::credentials::SecretPrompt;
use crate::scheduler::{parse_time_of_day, Cadence};

/// Minimal question/answer surface used by the configuration wizard.
pub trait Prompter {
    fn confirm(&self, message: &str, default: bool) -> bool;
    fn text(&self, message: &str, default: &str) -> String;
    /// Section heading shown before a group of questions.
    fn section(&self, _title: &str) {}
}

/// `inquire`-backed prompts on the controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, message: &str, default: bool) -> bool {
        inquire::Confirm::new(message)
            .with_default(default)
            .prompt()
            .unwrap_or(default)
    }

    fn text(&self, message: &str, default: &str) -> String {
        inquire::Text::new(message)
            .with_default(default)
            .prompt()
            .unwrap_or_else(|_| default.to_string())
    }

    fn section(&self, title: &str) {
        println!("\n== {} ==", title);
    }
}

impl SecretPrompt for TerminalPrompter {
    fn ask_secret(&self, label: &str) -> Option<String> {
        let message = match label {
            "facebook" => "Facebook Ads access token:",
            "b2cor" => "B2Cor API key:",
            _ => "Credential:",
        };
        inquire::Password::new(message)
            .without_confirmation()
            .with_display_mode(inquire::PasswordDisplayMode::Masked)
            .prompt()
            .ok()
    }
}

fn id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn days_or(raw: &str, default: u32) -> u32 {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        raw.parse().unwrap_or(default)
    } else {
        default
    }
}

/// Walks the operator through every configurable field and updates `config`.
///
/// Unusable answers fall back to defaults: lookback and keep days to 30, an
/// unknown cadence to daily, an unparsable time to 00:00.
pub fn interactive_config(prompter: &dyn Prompter, config: &mut Config) {
    prompter.section("Facebook Ads");

    config.extraction.form_ids = if prompter.confirm("Specify lead form ids?", false) {
        id_list(&prompter.text("Form ids (comma separated):", ""))
    } else {
        Vec::new()
    };

    config.extraction.ad_ids = if prompter.confirm("Specify ad ids?", false) {
        id_list(&prompter.text("Ad ids (comma separated):", ""))
    } else {
        Vec::new()
    };

    config.extraction.lookback_days = days_or(
        &prompter.text(
            "Days back to fetch leads:",
            &DEFAULT_LOOKBACK_DAYS.to_string(),
        ),
        DEFAULT_LOOKBACK_DAYS,
    );

    let schedule = &mut config.extraction.schedule;
    schedule.enabled = prompter.confirm("Schedule automatic runs?", false);
    if schedule.enabled {
        let answer = prompter.text("Cadence (daily, hourly, weekly):", "daily");
        let cadence = answer.parse::<Cadence>().unwrap_or(Cadence::Daily);
        schedule.cadence = cadence.to_string();

        if cadence != Cadence::Hourly {
            let time = prompter.text("Time of day (HH:MM):", "00:00");
            schedule.time = match parse_time_of_day(&time) {
                Ok(_) => time.trim().to_string(),
                Err(e) => {
                    tracing::warn!("{}; using 00:00", e);
                    "00:00".to_string()
                }
            };
        }
    }

    prompter.section("B2Cor");
    config.delivery.add_to_funnel = prompter.confirm("Add leads to the default funnel?", true);
    config.delivery.change_owner = prompter.confirm("Assign leads to the default owner?", true);
    config.delivery.add_history = prompter.confirm("Add the default history note?", true);

    prompter.section("General");
    config.retention.auto_process = prompter.confirm("Process right after configuring?", true);
    config.retention.keep_days = days_or(
        &prompter.text(
            "Days to keep staging files:",
            &DEFAULT_KEEP_DAYS.to_string(),
        ),
        DEFAULT_KEEP_DAYS,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    enum Answer {
        Yes,
        No,
        Text(&'static str),
    }

    struct Scripted(RefCell<VecDeque<Answer>>);

    impl Scripted {
        fn new(answers: Vec<Answer>) -> Self {
            Self(RefCell::new(answers.into()))
        }
    }

    impl Prompter for Scripted {
        fn confirm(&self, _: &str, default: bool) -> bool {
            match self.0.borrow_mut().pop_front() {
                Some(Answer::Yes) => true,
                Some(Answer::No) => false,
                _ => default,
            }
        }

        fn text(&self, _: &str, default: &str) -> String {
            match self.0.borrow_mut().pop_front() {
                Some(Answer::Text(t)) => t.to_string(),
                _ => default.to_string(),
            }
        }
    }

    #[test]
    fn test_full_wizard() {
        use Answer::*;
        let prompter = Scripted::new(vec![
            Yes,
            Text(" 111, ,222 "),
            No,
            Text("7"),
            Yes,
            Text("WEEKLY"),
            Text("06:45"),
            No,
            Yes,
            No,
            No,
            Text("abc"),
        ]);
        let mut config = Config::default();
        interactive_config(&prompter, &mut config);

        assert_eq!(config.extraction.form_ids, vec!["111".to_string(), "222".to_string()]);
        assert!(config.extraction.ad_ids.is_empty());
        assert_eq!(config.extraction.lookback_days, 7);
        assert!(config.extraction.schedule.enabled);
        assert_eq!(config.extraction.schedule.cadence, "weekly");
        assert_eq!(config.extraction.schedule.time, "06:45");
        assert!(!config.delivery.add_to_funnel);
        assert!(config.delivery.change_owner);
        assert!(!config.delivery.add_history);
        assert!(!config.retention.auto_process);
        assert_eq!(config.retention.keep_days, 30);
    }

    #[test]
    fn test_hourly_does_not_ask_time() {
        use Answer::*;
        let prompter = Scripted::new(vec![
            No,
            No,
            Text(""),
            Yes,
            Text("hourly"),
            Yes,
            Yes,
            Yes,
            Yes,
            Text("15"),
        ]);
        let mut config = Config::default();
        interactive_config(&prompter, &mut config);

        assert_eq!(config.extraction.schedule.cadence, "hourly");
        assert_eq!(config.extraction.schedule.time, "00:00");
        assert_eq!(config.extraction.lookback_days, 30);
        assert_eq!(config.retention.keep_days, 15);
    }

    #[test]
    fn test_bad_cadence_and_time_fall_back() {
        use Answer::*;
        let prompter = Scripted::new(vec![No, No, Text("3"), Yes, Text("monthly"), Text("9am")]);
        let mut config = Config::default();
        interactive_config(&prompter, &mut config);

        assert_eq!(config.extraction.schedule.cadence, "daily");
        assert_eq!(config.extraction.schedule.time, "00:00");
    }
}
