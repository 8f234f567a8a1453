//! Prompt assembly for the daily status message and its translation.
//!
//! Pure text building: nothing here talks to the generation service.
use chrono::NaiveDate;
use serde::Serialize;

/// Label stored alongside every daily conversation record.
pub const DAILY_UPDATE_LABEL: &str = "daily update";

/// The fixed question sent as the user turn of the status prompt.
pub const STATUS_QUESTION: &str = "What is the status of my plant?";

const STATUS_INSTRUCTIONS: &str = "\
You are an agricultural assistant that helps farmers keep an eye on their crops. \
You receive recent soil sensor readings (moisture, temperature, electrical conductivity, pH, \
nitrogen, phosphorus and potassium) together with the crop being grown.

When asked about the status of the crop:
1. Identify the crop.
2. Compare the readings with the optimal ranges for that crop.
3. Answer in a warm, conversational tone without bullet points, lists or other technical formatting.

Start with an overall summary, then briefly mention the points that need attention and what to do about them. \
Keep the whole answer to 3-5 sentences.";

/// A system/user message pair for one chat-completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Everything the status prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct StatusContext<'a> {
    pub date: NaiveDate,
    pub crop: &'a str,
    pub profile: Option<&'a str>,
    pub readings: &'a str,
}

pub fn status_prompt(ctx: &StatusContext<'_>) -> PromptPair {
    let mut system = String::from(STATUS_INSTRUCTIONS);
    system.push_str(&format!("\n\nThe date today is {}.", ctx.date.format("%Y-%m-%d")));
    match ctx.profile.map(str::trim).filter(|p| !p.is_empty()) {
        Some(profile) => system.push_str(&format!("\nUser profile: {profile}")),
        None => system.push_str(&format!("\nThe user is growing {}.", ctx.crop.trim())),
    }
    system.push_str(&format!(
        "\nThe user's farmland has the following records:\n{}",
        ctx.readings
    ));
    PromptPair {
        system,
        user: STATUS_QUESTION.to_string(),
    }
}

pub fn translation_prompt(language: &str, text: &str) -> PromptPair {
    PromptPair {
        system: format!(
            "Translate the following message to {}. Translate it verbatim and reply with the translation only, without any added commentary.",
            language.trim()
        ),
        user: text.to_string(),
    }
}
