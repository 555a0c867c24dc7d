//! Condition State Machine
//!
//! Each application instance holds exactly one condition per pipeline stage.
//! Conditions are overwritten on every pass, never appended, and downstream
//! stages read them to decide whether to proceed.

use crate::crd::{AppCondition, AppInstanceStatus, ConditionType};
use crate::error::Error;
use chrono::Utc;

/// Stages that must succeed before volumes are materialized
pub const VOLUME_PREREQUISITES: &[ConditionType] = &[
    ConditionType::Parsed,
    ConditionType::Defaults,
    ConditionType::Defined,
];

/// Stages that must succeed before scheduling specs are handed out
pub const SCHEDULING_PREREQUISITES: &[ConditionType] = VOLUME_PREREQUISITES;

impl AppCondition {
    /// A successful condition
    pub fn success(r#type: ConditionType, generation: Option<i64>) -> Self {
        Self {
            r#type,
            success: true,
            error: false,
            message: None,
            reason: None,
            observed_generation: generation,
            last_transition_time: Some(Utc::now()),
        }
    }

    /// A failed condition
    pub fn failure(
        r#type: ConditionType,
        generation: Option<i64>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type,
            success: false,
            error: true,
            message: Some(message.into()),
            reason: Some(reason.into()),
            observed_generation: generation,
            last_transition_time: Some(Utc::now()),
        }
    }

    /// A failed condition carrying an error's message
    pub fn from_error(r#type: ConditionType, generation: Option<i64>, err: &Error) -> Self {
        Self::failure(r#type, generation, err.reason(), err.to_string())
    }

    fn same_state(&self, other: &AppCondition) -> bool {
        self.success == other.success && self.error == other.error
    }
}

impl AppInstanceStatus {
    /// Get the condition for a stage
    pub fn condition(&self, r#type: ConditionType) -> Option<&AppCondition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Set a condition, replacing the existing one of the same type
    ///
    /// The transition time only moves when success/error actually flips.
    pub fn set_condition(&mut self, mut condition: AppCondition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.same_state(&condition) {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    pub fn set_success(&mut self, r#type: ConditionType, generation: Option<i64>) {
        self.set_condition(AppCondition::success(r#type, generation));
    }

    pub fn set_error(&mut self, r#type: ConditionType, generation: Option<i64>, err: &Error) {
        self.set_condition(AppCondition::from_error(r#type, generation, err));
    }

    /// Check if a stage has succeeded
    pub fn is_success(&self, r#type: ConditionType) -> bool {
        self.condition(r#type).is_some_and(|c| c.success)
    }

    /// Check if a stage has failed
    pub fn is_error(&self, r#type: ConditionType) -> bool {
        self.condition(r#type).is_some_and(|c| c.error)
    }

    /// Check that every listed stage has succeeded
    pub fn prerequisites_met(&self, required: &[ConditionType]) -> bool {
        required.iter().all(|t| self.is_success(*t))
    }

    /// First failing stage among the listed ones
    pub fn first_failure(&self, required: &[ConditionType]) -> Option<&AppCondition> {
        required
            .iter()
            .filter_map(|t| self.condition(*t))
            .find(|c| c.error)
    }
}
