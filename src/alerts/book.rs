use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub camera_id: String,
    pub message: Option<String>,
    pub confidence: Option<f32>,
    pub detected_objects: Vec<serde_json::Value>,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AlertMessage {
    Ping,
    AlertTriggered {
        alert_id: String,
        rule_id: String,
        rule_name: String,
        camera_id: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        confidence: Option<f32>,
        #[serde(default)]
        detected_objects: Option<Vec<serde_json::Value>>,
    },
    AlertEnded {
        alert_id: String,
    },
}

/// Active alerts plus a bounded, newest-first history.
///
/// History is independent of the active set: ending an alert never removes
/// it from history, and history only forgets entries past its limit.
#[derive(Debug, Clone)]
pub struct AlertBook {
    active: Vec<AlertEvent>,
    history: VecDeque<AlertEvent>,
    history_limit: usize,
}

impl AlertBook {
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: Vec::new(),
            history: VecDeque::with_capacity(history_limit),
            history_limit,
        }
    }

    /// Applies one decoded message and returns the alert it created, if any.
    pub(crate) fn apply(&mut self, message: AlertMessage, now: DateTime<Utc>) -> Option<AlertEvent> {
        match message {
            AlertMessage::Ping => None,
            AlertMessage::AlertTriggered {
                alert_id,
                rule_id,
                rule_name,
                camera_id,
                message,
                confidence,
                detected_objects,
            } => {
                let alert = AlertEvent {
                    id: alert_id,
                    rule_id,
                    rule_name,
                    camera_id,
                    message,
                    confidence,
                    detected_objects: detected_objects.unwrap_or_default(),
                    triggered_at: now,
                };
                // a repeated id is appended, not merged
                self.active.push(alert.clone());
                self.history.push_front(alert.clone());
                self.history.truncate(self.history_limit);
                Some(alert)
            }
            AlertMessage::AlertEnded { alert_id } => {
                self.active.retain(|a| a.id != alert_id);
                None
            }
        }
    }

    pub fn active(&self) -> &[AlertEvent] {
        &self.active
    }

    pub fn active_for_camera<'a>(
        &'a self,
        camera_id: &'a str,
    ) -> impl Iterator<Item = &'a AlertEvent> + 'a {
        self.active.iter().filter(move |a| a.camera_id == camera_id)
    }

    pub fn is_active(&self, alert_id: &str) -> bool {
        self.active.iter().any(|a| a.id == alert_id)
    }

    /// Most recent first.
    pub fn history(&self) -> impl Iterator<Item = &AlertEvent> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn latest(&self) -> Option<&AlertEvent> {
        self.history.front()
    }
}
