//! Tree diff entries and `git diff-tree --name-status -z` parsing.

use anyhow::{Result, anyhow};

/// What happened to a path between two tree snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Insert,
    Modify,
    Delete,
    Rename,
}

/// One entry of a tree diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub action: ChangeAction,
    /// Path in the "after" tree (the removed path for deletes).
    pub path: String,
    /// Previous path for renames.
    pub from: Option<String>,
}

impl Change {
    pub fn new(action: ChangeAction, path: impl Into<String>) -> Self {
        Self {
            action,
            path: path.into(),
            from: None,
        }
    }
}

/// Parse NUL-separated `--name-status -z` output into changes, preserving order.
///
/// Records are `<status>\0<path>\0`, or `<status>\0<old>\0<new>\0` for renames
/// and copies. Copies create a new path and are reported as inserts.
pub fn parse_name_status(raw: &[u8]) -> Result<Vec<Change>> {
    let text = String::from_utf8_lossy(raw);
    let mut fields = text.split('\0').filter(|field| !field.is_empty());
    let mut changes = Vec::new();

    while let Some(status) = fields.next() {
        let code = status
            .chars()
            .next()
            .ok_or_else(|| anyhow!("empty status field"))?;
        let mut next_path = || {
            fields
                .next()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("missing path after status '{status}'"))
        };
        let change = match code {
            'A' => Change::new(ChangeAction::Insert, next_path()?),
            'M' | 'T' => Change::new(ChangeAction::Modify, next_path()?),
            'D' => Change::new(ChangeAction::Delete, next_path()?),
            'R' => {
                let from = next_path()?;
                Change {
                    action: ChangeAction::Rename,
                    path: next_path()?,
                    from: Some(from),
                }
            }
            'C' => {
                let _source = next_path()?;
                Change::new(ChangeAction::Insert, next_path()?)
            }
            other => return Err(anyhow!("unsupported diff status '{other}'")),
        };
        changes.push(change);
    }

    Ok(changes)
}
