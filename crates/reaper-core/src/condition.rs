//! Status conditions shared by all resource kinds
//!
//! Every setter only touches `lastUpdateTime` when a field value actually
//! changes, and `lastTransitionTime` only when the status flips. Recomputing a
//! condition that already holds the same values therefore leaves the owning
//! status structurally equal, which lets reconcilers skip redundant writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A single status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Implemented by status records that carry a condition list
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// A named condition type with helpers to read and mutate it on a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionType(&'static str);

impl ConditionType {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }

    /// Look up this condition on a status
    pub fn get<'a, S: HasConditions>(&self, status: &'a S) -> Option<&'a Condition> {
        status.conditions().iter().find(|c| c.type_ == self.0)
    }

    pub fn is_true<S: HasConditions>(&self, status: &S) -> bool {
        self.get(status)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    pub fn is_false<S: HasConditions>(&self, status: &S) -> bool {
        self.get(status)
            .is_some_and(|c| c.status == ConditionStatus::False)
    }

    pub fn is_unknown<S: HasConditions>(&self, status: &S) -> bool {
        self.get(status)
            .is_some_and(|c| c.status == ConditionStatus::Unknown)
    }

    pub fn get_reason<'a, S: HasConditions>(&self, status: &'a S) -> Option<&'a str> {
        self.get(status).and_then(|c| c.reason.as_deref())
    }

    pub fn get_message<'a, S: HasConditions>(&self, status: &'a S) -> Option<&'a str> {
        self.get(status).and_then(|c| c.message.as_deref())
    }

    /// Set the condition status, creating the condition if needed
    pub fn set_status<S: HasConditions>(&self, status: &mut S, value: ConditionStatus) {
        let cond = self.find_or_create(status);
        if cond.status != value {
            let now = Utc::now();
            cond.status = value;
            cond.last_transition_time = Some(now);
            cond.last_update_time = Some(now);
        }
    }

    pub fn set_status_bool<S: HasConditions>(&self, status: &mut S, value: bool) {
        self.set_status(status, value.into());
    }

    pub fn true_<S: HasConditions>(&self, status: &mut S) {
        self.set_status(status, ConditionStatus::True);
    }

    pub fn false_<S: HasConditions>(&self, status: &mut S) {
        self.set_status(status, ConditionStatus::False);
    }

    pub fn unknown<S: HasConditions>(&self, status: &mut S) {
        self.set_status(status, ConditionStatus::Unknown);
    }

    /// Set the reason; an empty string clears it
    pub fn reason<S: HasConditions>(&self, status: &mut S, reason: &str) {
        let cond = self.find_or_create(status);
        set_text(&mut cond.reason, reason, &mut cond.last_update_time);
    }

    /// Set the message; an empty string clears it
    pub fn message<S: HasConditions>(&self, status: &mut S, message: &str) {
        let cond = self.find_or_create(status);
        set_text(&mut cond.message, message, &mut cond.last_update_time);
    }

    /// Record a failure: status False, reason (defaults to "Error"), error text as message
    pub fn set_error<S, E>(&self, status: &mut S, reason: &str, err: &E)
    where
        S: HasConditions,
        E: fmt::Display + ?Sized,
    {
        let reason = if reason.is_empty() { "Error" } else { reason };
        self.false_(status);
        self.reason(status, reason);
        self.message(status, &err.to_string());
    }

    fn find_or_create<'a, S: HasConditions>(&self, status: &'a mut S) -> &'a mut Condition {
        let conditions = status.conditions_mut();
        let idx = match conditions.iter().position(|c| c.type_ == self.0) {
            Some(idx) => idx,
            None => {
                let now = Utc::now();
                conditions.push(Condition {
                    type_: self.0.to_string(),
                    status: ConditionStatus::Unknown,
                    reason: None,
                    message: None,
                    last_update_time: Some(now),
                    last_transition_time: Some(now),
                });
                conditions.len() - 1
            }
        };
        &mut conditions[idx]
    }
}

fn set_text(field: &mut Option<String>, value: &str, touched: &mut Option<DateTime<Utc>>) {
    let next = (!value.is_empty()).then(|| value.to_string());
    if *field != next {
        *field = next;
        *touched = Some(Utc::now());
    }
}
