//! Experience records emitted by the scoring endpoint
//!
//! Each record is serialized as one JSON object tagged with a `type` field,
//! `actions` for decisions and `rewards` for observed feedback.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Identifier linking a decision to its later reward
pub type EventId = u64;

/// Generate a fresh random event id
pub fn new_event_id() -> EventId {
    Uuid::new_v4().as_u64_pair().0
}

/// A decision made for one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringEvent {
    pub actions: Vec<usize>,
    pub action_probs: Vec<f64>,
    pub event_id: EventId,
    pub shared_context: Vec<f64>,
    pub actions_context: Option<Vec<Vec<f64>>>,
    pub timestamp: i64,
    pub model_id: String,
    pub sample_prob: f64,
}

/// Feedback observed for an earlier decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEvent {
    #[serde(deserialize_with = "event_id_from_number_or_string")]
    pub event_id: EventId,
    pub reward: f64,
}

/// Any record written to the delivery stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExperienceEvent {
    #[serde(rename = "actions")]
    Actions(ScoringEvent),
    #[serde(rename = "rewards")]
    Rewards(RewardEvent),
}

impl ExperienceEvent {
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Actions(e) => e.event_id,
            Self::Rewards(e) => e.event_id,
        }
    }

    /// Encode as a single JSON document
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl From<ScoringEvent> for ExperienceEvent {
    fn from(event: ScoringEvent) -> Self {
        Self::Actions(event)
    }
}

impl From<RewardEvent> for ExperienceEvent {
    fn from(event: RewardEvent) -> Self {
        Self::Rewards(event)
    }
}

/// Accept event ids echoed back either as JSON numbers or numeric strings
pub fn event_id_from_number_or_string<'de, D>(deserializer: D) -> Result<EventId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid event_id '{s}'"))),
    }
}
