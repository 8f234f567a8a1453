use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wall-clock time of day (hour:minute), compared structurally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeOfDayError {
    #[error("hour {0} out of range 0..=23")]
    Hour(i64),
    #[error("minute {0} out of range 0..=59")]
    Minute(i64),
    #[error("expected HH:MM, got {0:?}")]
    Format(String),
}

impl TimeOfDay {
    pub fn new(hour: i64, minute: i64) -> Result<Self, TimeOfDayError> {
        if !(0..=23).contains(&hour) {
            return Err(TimeOfDayError::Hour(hour));
        }
        if !(0..=59).contains(&minute) {
            return Err(TimeOfDayError::Minute(minute));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(&self) -> u32 {
        u32::from(self.hour)
    }

    pub fn minute(&self) -> u32 {
        u32::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeOfDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimeOfDayError::Format(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        let hour: i64 = h.parse().map_err(|_| bad())?;
        let minute: i64 = m.parse().map_err(|_| bad())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = TimeOfDayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// A registered notification recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    pub id: i64,
    pub name: Option<String>,
    pub contact: String,
    pub language: String,
    pub crop: String,
    pub profile: Option<String>,
    pub thread_id: Option<String>,
    pub notify_at: Option<TimeOfDay>,
}

/// One timestamped sensor sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub id: i64,
    pub subject_id: i64,
    pub ph: f64,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub temperature: f64,
    pub moisture: f64,
    pub conductivity: f64,
    pub battery: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Measured values for a reading that has not been stored yet.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NewReading {
    pub ph: f64,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub temperature: f64,
    pub moisture: f64,
    pub conductivity: f64,
    pub battery: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: i64,
    pub subject_id: i64,
    pub prompt_label: String,
    pub response: String,
    pub follow_up: bool,
    pub created_at: DateTime<Utc>,
}

/// Desired daily notification slot for one subject, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredTime {
    pub subject_id: i64,
    pub contact: String,
    pub time: TimeOfDay,
}
