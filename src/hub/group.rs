use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GatewayError;

pub type BatchId = i64;
pub type StudentId = i64;

/// A named fan-out target.
///
/// Groups are not stored entities, only keys into the registry. The wire
/// form (`batch_7`, `monitor_batch_7`, `student_12`) is what producers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupName {
    /// Every student connection of a batch
    Batch(BatchId),
    /// Every faculty monitor watching a batch
    MonitorBatch(BatchId),
    /// One student's personal channel
    Student(StudentId),
}

impl GroupName {
    pub fn batch(batch_id: BatchId) -> Self {
        GroupName::Batch(batch_id)
    }

    pub fn monitor_batch(batch_id: BatchId) -> Self {
        GroupName::MonitorBatch(batch_id)
    }

    pub fn student(student_id: StudentId) -> Self {
        GroupName::Student(student_id)
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupName::Batch(id) => write!(f, "batch_{}", id),
            GroupName::MonitorBatch(id) => write!(f, "monitor_batch_{}", id),
            GroupName::Student(id) => write!(f, "student_{}", id),
        }
    }
}

impl FromStr for GroupName {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // monitor_batch_ must be tried before batch_
        let (ctor, rest): (fn(i64) -> GroupName, &str) =
            if let Some(rest) = s.strip_prefix("monitor_batch_") {
                (GroupName::MonitorBatch, rest)
            } else if let Some(rest) = s.strip_prefix("batch_") {
                (GroupName::Batch, rest)
            } else if let Some(rest) = s.strip_prefix("student_") {
                (GroupName::Student, rest)
            } else {
                return Err(GatewayError::InvalidGroup(s.to_string()));
            };

        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GatewayError::InvalidGroup(s.to_string()));
        }

        rest.parse::<i64>()
            .map(ctor)
            .map_err(|_| GatewayError::InvalidGroup(s.to_string()))
    }
}

impl Serialize for GroupName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
