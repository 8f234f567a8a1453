//! Plain-text rendering of sensor readings for prompts.
use crate::model::Reading;
use chrono::SecondsFormat;

/// One line per reading, in the given order, joined by `\n`.
pub fn format_readings(readings: &[Reading]) -> String {
    readings
        .iter()
        .map(format_reading)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_reading(r: &Reading) -> String {
    format!(
        "ID: {}, pH: {} pH, Nitrogen: {} mg/kg, Phosphorus: {} mg/kg, Potassium: {} mg/kg, \
         Temperature: {} ℃, Moisture: {}%, Conductivity: {} us/cm, Battery: {}%, \
         Created At: {}, Updated At: {}",
        r.id,
        r.ph,
        r.nitrogen,
        r.phosphorus,
        r.potassium,
        r.temperature,
        r.moisture,
        r.conductivity,
        r.battery,
        r.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        r.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}
