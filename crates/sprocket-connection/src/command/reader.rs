//! Callback-scoped access to the rows of a reader call

use sprocket_core::{ColumnMeta, ReaderBehavior, Result, Row, RowCursor, SprocketError, Value};

/// Forward-only view over the result sets of one reader call.
///
/// Call [`read`](Self::read) to move to each row, then fetch columns by
/// ordinal or name. In sequential mode each row's columns must be fetched
/// in strictly increasing ordinal order; fetched values are moved out of
/// the row rather than copied.
pub struct ProcedureReader<'r> {
    cursor: &'r mut dyn RowCursor,
    behavior: ReaderBehavior,
    row: Option<Row>,
    last_ordinal: Option<usize>,
}

impl<'r> ProcedureReader<'r> {
    pub(crate) fn new(cursor: &'r mut dyn RowCursor, behavior: ReaderBehavior) -> Self {
        Self {
            cursor,
            behavior,
            row: None,
            last_ordinal: None,
        }
    }

    pub fn behavior(&self) -> ReaderBehavior {
        self.behavior
    }

    /// Columns of the current result set.
    pub fn columns(&self) -> &[ColumnMeta] {
        self.cursor.columns()
    }

    pub fn field_count(&self) -> usize {
        self.cursor.columns().len()
    }

    /// Ordinal of a column of the current result set (case-insensitive).
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.cursor
            .columns()
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Advance to the next row; false once the result set is exhausted.
    pub fn read(&mut self) -> Result<bool> {
        self.row = self.cursor.next_row()?;
        self.last_ordinal = None;
        Ok(self.row.is_some())
    }

    /// Move to the next result set; false when there are no more.
    pub fn next_result(&mut self) -> Result<bool> {
        self.row = None;
        self.last_ordinal = None;
        self.cursor.next_result()
    }

    /// Value of column `ordinal` in the current row.
    pub fn get(&mut self, ordinal: usize) -> Result<Value> {
        let sequential = self.behavior == ReaderBehavior::SequentialAccess;
        if sequential {
            if let Some(last) = self.last_ordinal {
                if ordinal <= last {
                    return Err(SprocketError::Reader(format!(
                        "sequential access requires increasing column ordinals; \
                         column {} requested after column {}",
                        ordinal, last
                    )));
                }
            }
        }

        let row = self
            .row
            .as_mut()
            .ok_or_else(|| SprocketError::Reader("no current row; call read() first".into()))?;
        let width = row.values.len();
        let slot = row.values.get_mut(ordinal).ok_or_else(|| {
            SprocketError::Reader(format!(
                "column ordinal {} out of range for {} columns",
                ordinal, width
            ))
        })?;

        if sequential {
            self.last_ordinal = Some(ordinal);
            Ok(std::mem::replace(slot, Value::Null))
        } else {
            Ok(slot.clone())
        }
    }

    /// Value of the named column in the current row.
    pub fn get_by_name(&mut self, name: &str) -> Result<Value> {
        let ordinal = self
            .ordinal(name)
            .ok_or_else(|| SprocketError::Reader(format!("no column named '{}'", name)))?;
        self.get(ordinal)
    }

    /// Whether column `ordinal` of the current row is NULL.
    ///
    /// Does not consume the column in sequential mode.
    pub fn is_null(&self, ordinal: usize) -> bool {
        self.row
            .as_ref()
            .and_then(|row| row.get(ordinal))
            .is_none_or(Value::is_null)
    }

    /// The current row, whole. Only available in default mode.
    pub fn row(&self) -> Option<&Row> {
        match self.behavior {
            ReaderBehavior::Default => self.row.as_ref(),
            ReaderBehavior::SequentialAccess => None,
        }
    }
}
