/*!
Change data capture over the transaction log: the stream of per-version
change records used to compute incremental diffs. Write commits replay
their added files as inserts; optimize commits are rewrites, not data
changes, and are skipped.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};
use crate::model::statement::Statement;
use crate::storage::parquet::log::{Action, LogOperation};
use crate::storage::parquet::StatementTable;

/// The kind of change a CDC record describes. Only [ChangeType::Insert]
/// and [ChangeType::UpdatePostimage] are relevant to diff consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A statement became part of the table.
    Insert,
    /// The previous image of an updated statement.
    UpdatePreimage,
    /// The new image of an updated statement.
    UpdatePostimage,
    /// A statement left the table.
    Delete,
}

impl ChangeType {
    /// True for the change types diff exporters consume.
    pub fn is_effective(&self) -> bool {
        matches!(self, ChangeType::Insert | ChangeType::UpdatePostimage)
    }
}

/// One change record.
#[derive(Debug, Clone)]
pub struct Change {
    /// Commit timestamp of the version that produced the change.
    pub timestamp: DateTime<Utc>,
    /// Change kind.
    pub change_type: ChangeType,
    /// The affected statement.
    pub statement: Statement,
}

impl StatementTable {
    /// The statement changes committed in the inclusive version range
    /// `from..=to`, in version order.
    pub async fn get_changes(&self, from: i64, to: i64) -> Result<Vec<Change>> {
        if from > to {
            return Err(LakeError::BadInput(format!(
                "invalid change range {from}..{to}"
            )));
        }
        let mut changes = Vec::new();
        for entry in self.log().entries(from, to).await? {
            if entry.operation != LogOperation::Write {
                continue;
            }
            for action in &entry.actions {
                if let Action::AddFile(file) = action {
                    for statement in self.read_file(file).await? {
                        changes.push(Change {
                            timestamp: entry.timestamp,
                            change_type: ChangeType::Insert,
                            statement,
                        });
                    }
                }
            }
        }
        Ok(changes)
    }
}
