#[cfg(feature = "testing")]
use proptest_derive::Arbitrary;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoEnumIterator};

#[cfg_attr(feature = "testing", derive(Arbitrary))]
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "execution_status",
    rename_all = "PascalCase"
)]
#[strum(serialize_all = "PascalCase")]
pub enum ExecutionStatus {
    #[default]
    #[sea_orm(rename = "PascalCase")]
    Initialized, // Row was inserted on submission
    #[sea_orm(rename = "PascalCase")]
    Delivered, // An executor was assembled for the row
    #[sea_orm(rename = "PascalCase")]
    Running,   // The first statement was handed to the engine
    #[sea_orm(rename = "PascalCase")]
    Done,      // Every statement finished
    #[sea_orm(rename = "PascalCase")]
    Error,     // A fault terminated the execution
    #[sea_orm(rename = "PascalCase")]
    Cancel,    // Cancelled from the outside
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Done | ExecutionStatus::Error | ExecutionStatus::Cancel
        )
    }

    pub fn transitions(&self) -> Vec<ExecutionStatus> {
        match self {
            ExecutionStatus::Initialized => vec![
                ExecutionStatus::Delivered,
                ExecutionStatus::Error,
                ExecutionStatus::Cancel,
            ],
            ExecutionStatus::Delivered => vec![
                ExecutionStatus::Running,
                ExecutionStatus::Error,
                ExecutionStatus::Cancel,
            ],
            ExecutionStatus::Running => vec![
                ExecutionStatus::Done,
                ExecutionStatus::Error,
                ExecutionStatus::Cancel,
            ],
            // Terminal states have no valid next states
            ExecutionStatus::Done | ExecutionStatus::Error | ExecutionStatus::Cancel => vec![],
        }
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        self.transitions().contains(&next)
    }

    pub fn invalid_transitions(&self) -> Vec<ExecutionStatus> {
        let valid = self.transitions();
        ExecutionStatus::iter()
            .filter(|s| *s != *self && !valid.contains(s))
            .collect()
    }

    /// States from which `next` may be entered. Used as a guard in conditional updates.
    pub fn predecessors(next: ExecutionStatus) -> Vec<ExecutionStatus> {
        ExecutionStatus::iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}
