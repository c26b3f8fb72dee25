use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicabilityStatus {
    Applicable,
    NotApplicable,
    Unknown,
    PolicyNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicabilityDecision {
    pub status: ApplicabilityStatus,
    pub reason: String,
}

impl ApplicabilityDecision {
    pub fn applicable(reason: impl Into<String>) -> Self {
        Self {
            status: ApplicabilityStatus::Applicable,
            reason: reason.into(),
        }
    }

    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            status: ApplicabilityStatus::NotApplicable,
            reason: reason.into(),
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            status: ApplicabilityStatus::Unknown,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            status: ApplicabilityStatus::PolicyNotFound,
            reason: reason.into(),
        }
    }

    pub fn is_applicable(&self) -> bool {
        self.status == ApplicabilityStatus::Applicable
    }
}
