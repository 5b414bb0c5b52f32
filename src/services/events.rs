//! Typed backend events and the tag based router that decodes raw frames
//! into them.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::db::{Phase, Project, Votes};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectNew {
    pub id: String,
    pub data: Project,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectVotesUpdate {
    pub id: String,
    pub data: Votes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectStatusUpdate {
    pub id: String,
    pub old: u8,
    pub new: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhaseNew {
    pub id: String,
    pub data: Phase,
}

/// A phase was replaced by its owner; `old` identifies the previous version.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhaseUpdate {
    pub id: String,
    pub old: Value,
    pub data: Phase,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhaseVotesUpdate {
    pub id: String,
    pub pid: String,
    pub data: Votes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhaseStatusUpdate {
    pub id: String,
    pub pid: String,
    pub old: u8,
    pub new: u8,
}

/// Voting participation of one pillar, as fractions in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PillarRate {
    pub name: String,
    pub rate: f64,
    pub active_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManualSend {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    ProjectNew(ProjectNew),
    ProjectVotesUpdate(ProjectVotesUpdate),
    ProjectStatusUpdate(ProjectStatusUpdate),
    PhaseNew(PhaseNew),
    PhaseUpdate(PhaseUpdate),
    PhaseVotesUpdate(PhaseVotesUpdate),
    PhaseStatusUpdate(PhaseStatusUpdate),
    PillarStats(Vec<PillarRate>),
    ManualSend(ManualSend),
}

impl RelayEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            RelayEvent::ProjectNew(_) => "project:new",
            RelayEvent::ProjectVotesUpdate(_) => "project:votes-update",
            RelayEvent::ProjectStatusUpdate(_) => "project:status-update",
            RelayEvent::PhaseNew(_) => "phase:new",
            RelayEvent::PhaseUpdate(_) => "phase:update",
            RelayEvent::PhaseVotesUpdate(_) => "phase:votes-update",
            RelayEvent::PhaseStatusUpdate(_) => "phase:status-update",
            RelayEvent::PillarStats(_) => "pillar-stats",
            RelayEvent::ManualSend(_) => "send",
        }
    }
}

/// Business logic reacting to decoded events.
#[async_trait]
pub trait HandleEvent: Send + Sync + 'static {
    async fn handle(&self, event: RelayEvent) -> AppResult<()>;
}

type Decoder = fn(Value) -> Result<RelayEvent, serde_json::Error>;

struct Route {
    tag: &'static str,
    decode: Decoder,
}

const ROUTES: &[Route] = &[
    Route {
        tag: "project:new",
        decode: |v| decode(v).map(RelayEvent::ProjectNew),
    },
    Route {
        tag: "project:votes-update",
        decode: |v| decode(v).map(RelayEvent::ProjectVotesUpdate),
    },
    Route {
        tag: "project:status-update",
        decode: |v| decode(v).map(RelayEvent::ProjectStatusUpdate),
    },
    Route {
        tag: "phase:new",
        decode: |v| decode(v).map(RelayEvent::PhaseNew),
    },
    Route {
        tag: "phase:update",
        decode: |v| decode(v).map(RelayEvent::PhaseUpdate),
    },
    Route {
        tag: "phase:votes-update",
        decode: |v| decode(v).map(RelayEvent::PhaseVotesUpdate),
    },
    Route {
        tag: "phase:status-update",
        decode: |v| decode(v).map(RelayEvent::PhaseStatusUpdate),
    },
    Route {
        tag: "pillar-stats",
        decode: |v| decode_many(v).map(RelayEvent::PillarStats),
    },
    Route {
        tag: "send",
        decode: |v| decode(v).map(RelayEvent::ManualSend),
    },
];

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload)
}

/// Collections may arrive either as an array or as a lone object.
fn decode_many<T: DeserializeOwned>(payload: Value) -> Result<Vec<T>, serde_json::Error> {
    match payload {
        Value::Array(_) => serde_json::from_value(payload),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}

/// Split raw frames into `(tag, payload)`.
///
/// A single frame is a JSON object whose `type` field is the tag; the other
/// fields form the payload. Two or more frames carry the tag in the first
/// frame and the JSON payload in the second.
pub fn parse_envelope(frames: &[Bytes]) -> AppResult<(String, Value)> {
    match frames {
        [] => Err(AppError::MalformedEvent("empty message".to_string())),
        [single] => {
            let mut object = match serde_json::from_slice::<Value>(single) {
                Ok(Value::Object(object)) => object,
                Ok(_) => {
                    return Err(AppError::MalformedEvent(
                        "single-frame event is not a JSON object".to_string(),
                    ))
                }
                Err(e) => return Err(AppError::MalformedEvent(e.to_string())),
            };
            let tag = match object.remove("type") {
                Some(Value::String(tag)) => tag,
                _ => {
                    return Err(AppError::MalformedEvent(
                        "missing string field `type`".to_string(),
                    ))
                }
            };
            Ok((tag, Value::Object(object)))
        }
        [tag, payload, ..] => {
            let tag = std::str::from_utf8(tag)
                .map_err(|e| AppError::MalformedEvent(format!("tag is not utf-8: {}", e)))?;
            let payload = serde_json::from_slice(payload)
                .map_err(|e| AppError::MalformedEvent(e.to_string()))?;
            Ok((tag.to_string(), payload))
        }
    }
}

pub struct EventRouter<H> {
    handler: Arc<H>,
}

impl<H> Clone for EventRouter<H> {
    fn clone(&self) -> Self {
        EventRouter {
            handler: self.handler.clone(),
        }
    }
}

impl<H: HandleEvent> EventRouter<H> {
    pub fn new(handler: Arc<H>) -> Self {
        EventRouter { handler }
    }

    pub fn decode(&self, frames: &[Bytes]) -> AppResult<RelayEvent> {
        let (tag, payload) = parse_envelope(frames)?;
        let route = ROUTES
            .iter()
            .find(|route| route.tag == tag)
            .ok_or(AppError::UnknownEvent(tag))?;

        (route.decode)(payload)
            .map_err(|e| AppError::MalformedEvent(format!("{}: {}", route.tag, e)))
    }

    /// Decode and handle one message. Failures are logged and swallowed so a
    /// bad event never stops the listener.
    pub async fn dispatch(&self, frames: &[Bytes]) {
        let event = match self.decode(frames) {
            Ok(event) => event,
            Err(AppError::UnknownEvent(tag)) => {
                tracing::error!("No handler defined for event type {:?}", tag);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to decode event: {}", e);
                return;
            }
        };

        let tag = event.tag();
        tracing::info!("Running {}-handler", tag);
        if let Err(e) = self.handler.handle(event).await {
            tracing::error!("Handler for {} failed: {}", tag, e);
        }
    }
}
