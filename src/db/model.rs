//! Input structs used by repositories.
//!
//! Domain entities live in `crate::model`; these only describe rows that are
//! about to be written.

use crate::model::TimeOfDay;

/// Subject registration payload.
#[derive(Debug, Clone)]
pub struct NewSubject {
    pub name: Option<String>,
    pub phone: String,
    pub language: String,
    pub crop: String,
    pub profile: Option<String>,
    pub thread_id: Option<String>,
    pub notify_at: Option<TimeOfDay>,
}

impl NewSubject {
    pub fn new(phone: impl Into<String>, language: impl Into<String>, crop: impl Into<String>) -> Self {
        Self {
            name: None,
            phone: phone.into(),
            language: language.into(),
            crop: crop.into(),
            profile: None,
            thread_id: None,
            notify_at: None,
        }
    }
}
