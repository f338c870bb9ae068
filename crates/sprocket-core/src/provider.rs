//! Execution provider boundary
//!
//! An execution provider is the database driver seen from the engine: it
//! opens connections, derives procedure signatures from metadata and runs
//! bound commands. Everything above this boundary is backend-agnostic.

use async_trait::async_trait;

use crate::{
    ColumnMeta, IsolationLevel, ParameterDescriptor, PreparedCommand, ReaderBehavior, Result,
    ResultSet, Row, Value,
};

/// Opens connections for a backend.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Get the provider name (e.g., "mssql", "mock")
    fn name(&self) -> &str;

    /// Open a new connection from a provider-specific connection string.
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn ProviderConnection>>;
}

/// A single open connection to the backend.
///
/// Connections are single-owner; the engine never shares one between
/// concurrent calls.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    /// Derive the parameter signature of `procedure` (in `schema.[name]` form)
    /// from database metadata, in ordinal order.
    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<ParameterDescriptor>>;

    /// Run a command that returns no rows; yields the rows-affected count,
    /// or -1 when the backend does not report one.
    async fn execute_non_query(&mut self, command: &mut PreparedCommand) -> Result<i64>;

    /// Run a command and return the first column of its first row.
    async fn execute_scalar(&mut self, command: &mut PreparedCommand) -> Result<Value>;

    /// Run a command and return a cursor over its result sets.
    async fn execute_reader(
        &mut self,
        command: &mut PreparedCommand,
        behavior: ReaderBehavior,
    ) -> Result<Box<dyn RowCursor>>;

    /// Start a transaction; subsequent commands on this connection join it.
    async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// Forward-only cursor over the result sets of a reader call.
pub trait RowCursor: Send {
    /// Columns of the current result set
    fn columns(&self) -> &[ColumnMeta];

    /// Advance to the next row of the current result set.
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Move to the next result set; false when there are no more.
    fn next_result(&mut self) -> Result<bool>;
}

/// A cursor over result sets that were fully read from the backend.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    sets: std::collections::VecDeque<ResultSet>,
    current: Option<std::vec::IntoIter<Row>>,
    columns: Vec<ColumnMeta>,
}

impl BufferedCursor {
    pub fn new(sets: Vec<ResultSet>) -> Self {
        let mut cursor = Self {
            sets: sets.into(),
            current: None,
            columns: Vec::new(),
        };
        cursor.advance();
        cursor
    }

    fn advance(&mut self) -> bool {
        match self.sets.pop_front() {
            Some(set) => {
                self.columns = set.columns;
                self.current = Some(set.rows.into_iter());
                true
            }
            None => {
                self.columns.clear();
                self.current = None;
                false
            }
        }
    }
}

impl RowCursor for BufferedCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.current.as_mut().and_then(Iterator::next))
    }

    fn next_result(&mut self) -> Result<bool> {
        Ok(self.advance())
    }
}
