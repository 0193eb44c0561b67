//! The bidirectional, lazy cursor abstraction used for search results and
//! index scans, plus the `And` cursor composition rule from §4.4.

use crate::error::{DirResult, DirectoryError, DirectoryErrorKind};
use std::collections::HashSet;
use std::hash::Hash;

/// A stateful iterator with explicit positioning and lifecycle. `available`
/// reports `true` exactly when a current element exists; `get` is only
/// defined then.
pub trait Cursor {
    type Item;

    fn before_first(&mut self) -> DirResult<()>;
    fn after_last(&mut self) -> DirResult<()>;
    fn first(&mut self) -> DirResult<bool>;
    fn last(&mut self) -> DirResult<bool>;
    fn next(&mut self) -> DirResult<bool>;
    fn previous(&mut self) -> DirResult<bool>;
    fn get(&self) -> DirResult<&Self::Item>;
    fn available(&self) -> bool;
    fn close(&mut self) -> DirResult<()>;

    /// Closes the cursor, recording `cause` as the reason. The default
    /// implementation just closes; callers that want the cause surfaced
    /// elsewhere (logging, a stored last-error) override this.
    fn close_with_err(&mut self, _cause: DirectoryError) -> DirResult<()> {
        self.close()
    }

    /// Ancillary predicates are optional; sources that cannot answer cheaply
    /// report `unsupported-operation` rather than pay for an answer nobody
    /// asked for.
    fn is_before_first(&self) -> DirResult<bool> {
        Err(unsupported())
    }
    fn is_after_last(&self) -> DirResult<bool> {
        Err(unsupported())
    }
    fn is_first(&self) -> DirResult<bool> {
        Err(unsupported())
    }
    fn is_last(&self) -> DirResult<bool> {
        Err(unsupported())
    }
}

fn unsupported() -> DirectoryError {
    DirectoryError::new(DirectoryErrorKind::UnsupportedOperation, "unsupported-operation")
}

fn invalid_position() -> DirectoryError {
    DirectoryError::new(
        DirectoryErrorKind::InvalidCursorPosition,
        "no current element",
    )
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// A cursor over a fully materialized, in-memory sequence. The reference
/// implementation every other cursor in this crate is built from, and the
/// one returned directly by the in-memory test partition.
pub struct VecCursor<T> {
    items: Vec<T>,
    position: Position,
    closed: bool,
}

impl<T> VecCursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            position: Position::BeforeFirst,
            closed: false,
        }
    }

    fn check_open(&self) -> DirResult<()> {
        if self.closed {
            Err(DirectoryError::new(DirectoryErrorKind::Closed, "cursor is closed"))
        } else {
            Ok(())
        }
    }
}

impl<T> Cursor for VecCursor<T> {
    type Item = T;

    fn before_first(&mut self) -> DirResult<()> {
        self.check_open()?;
        self.position = Position::BeforeFirst;
        Ok(())
    }

    fn after_last(&mut self) -> DirResult<()> {
        self.check_open()?;
        self.position = Position::AfterLast;
        Ok(())
    }

    fn first(&mut self) -> DirResult<bool> {
        self.check_open()?;
        if self.items.is_empty() {
            self.position = Position::BeforeFirst;
            Ok(false)
        } else {
            self.position = Position::At(0);
            Ok(true)
        }
    }

    fn last(&mut self) -> DirResult<bool> {
        self.check_open()?;
        if self.items.is_empty() {
            self.position = Position::AfterLast;
            Ok(false)
        } else {
            self.position = Position::At(self.items.len() - 1);
            Ok(true)
        }
    }

    fn next(&mut self) -> DirResult<bool> {
        self.check_open()?;
        let next_index = match self.position {
            Position::BeforeFirst => 0,
            Position::At(i) => i + 1,
            Position::AfterLast => return Ok(false),
        };
        if next_index < self.items.len() {
            self.position = Position::At(next_index);
            Ok(true)
        } else {
            self.position = Position::AfterLast;
            Ok(false)
        }
    }

    fn previous(&mut self) -> DirResult<bool> {
        self.check_open()?;
        match self.position {
            Position::BeforeFirst => Ok(false),
            Position::At(0) => {
                self.position = Position::BeforeFirst;
                Ok(false)
            }
            Position::At(i) => {
                self.position = Position::At(i - 1);
                Ok(true)
            }
            Position::AfterLast => {
                if self.items.is_empty() {
                    Ok(false)
                } else {
                    self.position = Position::At(self.items.len() - 1);
                    Ok(true)
                }
            }
        }
    }

    fn get(&self) -> DirResult<&T> {
        self.check_open()?;
        match self.position {
            Position::At(i) => Ok(&self.items[i]),
            _ => Err(invalid_position()),
        }
    }

    fn available(&self) -> bool {
        !self.closed && matches!(self.position, Position::At(_))
    }

    fn close(&mut self) -> DirResult<()> {
        self.closed = true;
        Ok(())
    }

    fn is_before_first(&self) -> DirResult<bool> {
        self.check_open()?;
        Ok(matches!(self.position, Position::BeforeFirst))
    }

    fn is_after_last(&self) -> DirResult<bool> {
        self.check_open()?;
        Ok(matches!(self.position, Position::AfterLast))
    }

    fn is_first(&self) -> DirResult<bool> {
        self.check_open()?;
        Ok(matches!(self.position, Position::At(0)))
    }

    fn is_last(&self) -> DirResult<bool> {
        self.check_open()?;
        Ok(matches!(self.position, Position::At(i) if i + 1 == self.items.len()))
    }
}

/// Builds the `And` composition of several candidate sets, per §4.4: the
/// driver is the branch with the smallest candidate count, evaluated against
/// membership in every other branch. The result preserves the driver's
/// order, so reversing the resulting cursor reverses the driver's order.
pub fn and_cursor<T>(mut branches: Vec<Vec<T>>) -> VecCursor<T>
where
    T: Eq + Hash + Clone,
{
    if branches.is_empty() {
        return VecCursor::new(Vec::new());
    }
    let driver_index = branches
        .iter()
        .enumerate()
        .min_by_key(|(_, b)| b.len())
        .map(|(i, _)| i)
        .unwrap();
    let driver = branches.swap_remove(driver_index);
    let evaluators: Vec<HashSet<T>> = branches.into_iter().map(|b| b.into_iter().collect()).collect();
    let filtered: Vec<T> = driver
        .into_iter()
        .filter(|item| evaluators.iter().all(|set| set.contains(item)))
        .collect();
    VecCursor::new(filtered)
}
