use crate::model::Id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity kind ("instances", "containers", ...) to affected resource URLs
pub type OperationResources = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Background work tracked until completion
    Task,
    /// Work driven over a websocket connection
    Websocket,
    /// One-shot credential handed to another member
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    InstanceCreate,
    InstanceUpdate,
    InstanceRename,
    InstanceDelete,
    InstanceStateUpdate,
    SnapshotCreate,
    SnapshotRestore,
    SnapshotDelete,
    ProfileUpdate,
    ProjectUpdate,
}

impl OperationType {
    pub fn description(&self) -> &'static str {
        match self {
            OperationType::InstanceCreate => "Creating instance",
            OperationType::InstanceUpdate => "Updating instance",
            OperationType::InstanceRename => "Renaming instance",
            OperationType::InstanceDelete => "Deleting instance",
            OperationType::InstanceStateUpdate => "Updating instance state",
            OperationType::SnapshotCreate => "Snapshotting instance",
            OperationType::SnapshotRestore => "Restoring snapshot",
            OperationType::SnapshotDelete => "Deleting snapshot",
            OperationType::ProfileUpdate => "Updating profile",
            OperationType::ProjectUpdate => "Updating project",
        }
    }

    /// Stable numeric code persisted in the cluster operations table
    pub fn code(&self) -> i32 {
        match self {
            OperationType::InstanceCreate => 1,
            OperationType::InstanceUpdate => 2,
            OperationType::InstanceRename => 3,
            OperationType::InstanceDelete => 4,
            OperationType::InstanceStateUpdate => 5,
            OperationType::SnapshotCreate => 6,
            OperationType::SnapshotRestore => 7,
            OperationType::SnapshotDelete => 8,
            OperationType::ProfileUpdate => 9,
            OperationType::ProjectUpdate => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        [
            OperationType::InstanceCreate,
            OperationType::InstanceUpdate,
            OperationType::InstanceRename,
            OperationType::InstanceDelete,
            OperationType::InstanceStateUpdate,
            OperationType::SnapshotCreate,
            OperationType::SnapshotRestore,
            OperationType::SnapshotDelete,
            OperationType::ProfileUpdate,
            OperationType::ProjectUpdate,
        ]
        .into_iter()
        .find(|t| t.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl OperationStatus {
    pub fn code(&self) -> u16 {
        match self {
            OperationStatus::Running => 103,
            OperationStatus::Pending => 105,
            OperationStatus::Success => 200,
            OperationStatus::Failure => 400,
            OperationStatus::Cancelled => 401,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Failure | OperationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationStatus::Pending => "Pending",
            OperationStatus::Running => "Running",
            OperationStatus::Success => "Success",
            OperationStatus::Failure => "Failure",
            OperationStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Operation as reported over the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub id: Id,
    pub class: OperationClass,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
    pub status: String,
    pub status_code: u16,
    pub resources: OperationResources,
    pub metadata: Option<serde_json::Value>,
    pub may_cancel: bool,
    pub err: String,
    pub location: String,
}

/// Cluster-wide row announcing an in-flight operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Id,
    pub project: String,
    pub location: String,
    pub operation_type: OperationType,
    pub resources: OperationResources,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_codes_round_trip() {
        for t in [OperationType::InstanceUpdate, OperationType::SnapshotRestore] {
            assert_eq!(OperationType::from_code(t.code()), Some(t));
        }
        assert_eq!(OperationType::from_code(0), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(OperationStatus::Pending.code(), 105);
        assert_eq!(OperationStatus::Success.code(), 200);
        assert!(OperationStatus::Failure.is_final());
        assert!(!OperationStatus::Running.is_final());
    }
}
