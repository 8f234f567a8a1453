//! Per-subject daily dispatch: load, compose, generate, translate, deliver, record.
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::compose::{self, StatusContext, DAILY_UPDATE_LABEL};
use crate::config::Config;
use crate::llm::Generator;
use crate::model::Reading;
use crate::readings::format_readings;
use crate::store::Store;
use crate::whatsapp::Messenger;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no subject with contact {0}")]
    SubjectNotFound(String),
    #[error("store read failed: {0}")]
    DataUnavailable(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("translation failed, sent untranslated text: {0}")]
    Translation(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("conversation record not persisted: {0}")]
    Record(String),
}

impl DispatchError {
    /// Fatal errors abort the run; the rest degrade it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::SubjectNotFound(_)
                | DispatchError::DataUnavailable(_)
                | DispatchError::Generation(_)
        )
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub contact: String,
    pub subject_id: Option<i64>,
    pub prompt_label: &'static str,
    /// Final text sent (post-translation when it succeeded).
    pub text: Option<String>,
    pub readings: Vec<Reading>,
    pub failure: Option<DispatchError>,
    pub degraded: Vec<DispatchError>,
}

impl DispatchOutcome {
    fn new(contact: &str) -> Self {
        Self {
            contact: contact.to_string(),
            subject_id: None,
            prompt_label: DAILY_UPDATE_LABEL,
            text: None,
            readings: Vec::new(),
            failure: None,
            degraded: Vec::new(),
        }
    }

    fn fail(mut self, err: DispatchError) -> Self {
        self.failure = Some(err);
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn delivered(&self) -> bool {
        self.is_success()
            && !self
                .degraded
                .iter()
                .any(|e| matches!(e, DispatchError::Delivery(_)))
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub default_language: String,
    pub timezone: Tz,
    pub readings_limit: i64,
}

impl DispatchSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            default_language: cfg.app.default_language.clone(),
            timezone: cfg.timezone()?,
            readings_limit: cfg.app.readings_limit,
        })
    }

    fn needs_translation(&self, language: &str) -> bool {
        let language = language.trim();
        !language.is_empty() && !language.eq_ignore_ascii_case(self.default_language.trim())
    }
}

pub struct DispatchPipeline {
    store: Arc<dyn Store>,
    generator: Arc<dyn Generator>,
    messenger: Arc<dyn Messenger>,
    settings: DispatchSettings,
}

impl DispatchPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        generator: Arc<dyn Generator>,
        messenger: Arc<dyn Messenger>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            generator,
            messenger,
            settings,
        }
    }

    /// Run once for `contact` with today's date in the configured zone.
    pub async fn run(&self, contact: &str) -> DispatchOutcome {
        let today = Utc::now().with_timezone(&self.settings.timezone).date_naive();
        self.run_on(contact, today).await
    }

    /// Single attempt per step; retries only happen on the next scheduled firing.
    #[instrument(skip_all, fields(contact = %contact, today = %today))]
    pub async fn run_on(&self, contact: &str, today: NaiveDate) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::new(contact);

        let subject = match self.store.get_subject_by_contact(contact).await {
            Ok(Some(subject)) => subject,
            Ok(None) => return outcome.fail(DispatchError::SubjectNotFound(contact.to_string())),
            Err(err) => return outcome.fail(DispatchError::DataUnavailable(format!("{err:#}"))),
        };
        outcome.subject_id = Some(subject.id);

        let readings = match self
            .store
            .get_recent_readings(subject.id, self.settings.readings_limit)
            .await
        {
            Ok(readings) => readings,
            Err(err) => return outcome.fail(DispatchError::DataUnavailable(format!("{err:#}"))),
        };
        let formatted = format_readings(&readings);
        outcome.readings = readings;

        let prompt = compose::status_prompt(&StatusContext {
            date: today,
            crop: &subject.crop,
            profile: subject.profile.as_deref(),
            readings: &formatted,
        });
        let draft = match self.generator.generate(&prompt).await {
            Ok(text) => text,
            Err(err) => return outcome.fail(DispatchError::Generation(format!("{err:#}"))),
        };

        let text = if self.settings.needs_translation(&subject.language) {
            let prompt = compose::translation_prompt(&subject.language, &draft);
            match self.generator.generate(&prompt).await {
                Ok(translated) => translated,
                Err(err) => {
                    warn!(?err, language = %subject.language, "translation failed; sending draft");
                    outcome
                        .degraded
                        .push(DispatchError::Translation(format!("{err:#}")));
                    draft
                }
            }
        } else {
            draft
        };

        if let Err(err) = self.messenger.deliver(contact, &text).await {
            warn!(?err, "delivery failed; recording conversation anyway");
            outcome
                .degraded
                .push(DispatchError::Delivery(format!("{err:#}")));
        }

        if let Err(err) = self
            .store
            .append_conversation_record(subject.id, DAILY_UPDATE_LABEL, &text, false)
            .await
        {
            warn!(?err, "failed to persist conversation record");
            outcome.degraded.push(DispatchError::Record(format!("{err:#}")));
        }

        info!(
            subject_id = subject.id,
            readings = outcome.readings.len(),
            degraded = outcome.degraded.len(),
            "daily update dispatched"
        );
        outcome.text = Some(text);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(lang: &str) -> DispatchSettings {
        DispatchSettings {
            default_language: lang.into(),
            timezone: chrono_tz::Asia::Karachi,
            readings_limit: 10,
        }
    }

    #[test]
    fn translation_decision_ignores_case_and_blank() {
        let s = settings("English");
        assert!(!s.needs_translation("English"));
        assert!(!s.needs_translation(" english "));
        assert!(!s.needs_translation(""));
        assert!(s.needs_translation("Urdu"));
    }

    #[test]
    fn fatal_classification() {
        assert!(DispatchError::SubjectNotFound("1".into()).is_fatal());
        assert!(DispatchError::DataUnavailable("x".into()).is_fatal());
        assert!(DispatchError::Generation("x".into()).is_fatal());
        assert!(!DispatchError::Translation("x".into()).is_fatal());
        assert!(!DispatchError::Delivery("x".into()).is_fatal());
        assert!(!DispatchError::Record("x".into()).is_fatal());
    }

    #[test]
    fn delivered_requires_no_delivery_error() {
        let mut outcome = DispatchOutcome::new("1");
        assert!(outcome.delivered());
        outcome.degraded.push(DispatchError::Translation("x".into()));
        assert!(outcome.delivered());
        outcome.degraded.push(DispatchError::Delivery("x".into()));
        assert!(outcome.is_success());
        assert!(!outcome.delivered());
    }
}
