//! Search request and snapshot types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Boolean combinator for grouped conditions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperator {
    And,
    Or,
}

/// Comparison applied by simple and lifecycle conditions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    StartsWith,
    IsNull,
    NotNull,
}

/// Query condition tree sent with a search submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryCondition {
    Group {
        operator: GroupOperator,
        conditions: Vec<QueryCondition>,
    },
    /// Compare the value at a JSON path inside the entity payload
    Simple {
        #[serde(rename = "jsonPath")]
        json_path: String,
        #[serde(rename = "operatorType")]
        operator: Operator,
        value: Value,
    },
    /// Compare an entity metadata field (state, creationDate, ...)
    Lifecycle {
        field: String,
        #[serde(rename = "operatorType")]
        operator: Operator,
        value: Value,
    },
}

impl QueryCondition {
    pub fn and(conditions: Vec<QueryCondition>) -> Self {
        Self::Group {
            operator: GroupOperator::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<QueryCondition>) -> Self {
        Self::Group {
            operator: GroupOperator::Or,
            conditions,
        }
    }

    pub fn simple(json_path: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Simple {
            json_path: json_path.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(json_path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(json_path, Operator::Equals, value)
    }

    pub fn lifecycle(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Lifecycle {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub model: String,
    pub version: u32,
    pub condition: QueryCondition,
    /// Ask the platform to evaluate immediately instead of building a snapshot
    pub in_memory: bool,
}

impl SearchRequest {
    pub fn new(model: impl Into<String>, version: u32, condition: QueryCondition) -> Self {
        Self {
            model: model.into(),
            version,
            condition,
            in_memory: false,
        }
    }

    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }
}

/// Snapshot progress as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SnapshotStatus {
    Running,
    Successful,
    Failed,
    /// Any status this client does not know; treated as a failure
    Other(String),
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for SnapshotStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "SUCCESSFUL" => Self::Successful,
            "FAILED" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<SnapshotStatus> for String {
    fn from(s: SnapshotStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot id and status returned by a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotState {
    pub snapshot_id: String,
    pub status: SnapshotStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: u32,
    pub page_number: u32,
}

impl PageRequest {
    pub fn new(page_size: u32, page_number: u32) -> Self {
        Self {
            page_size,
            page_number,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(100, 0)
    }
}
