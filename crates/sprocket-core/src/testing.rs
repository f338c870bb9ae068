//! Scripted in-memory execution provider for tests
//!
//! `MockProvider` answers discovery from registered signatures, replays
//! canned responses keyed by command text, injects failures on demand and
//! records everything it was asked to do so tests can assert on it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    BufferedCursor, DriverError, ExecutionProvider, IsolationLevel, ParameterDescriptor,
    ParameterDirection, PreparedCommand, ProviderConnection, ReaderBehavior, Result, ResultSet, RowCursor,
    SprocketError, Value,
};

/// What a scripted command produces.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub rows_affected: i64,
    pub return_value: Value,
    pub scalar: Value,
    /// Values written back to output parameters, by name
    pub outputs: Vec<(String, Value)>,
    pub result_sets: Vec<ResultSet>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            rows_affected: 0,
            return_value: Value::Int32(0),
            scalar: Value::Null,
            outputs: Vec::new(),
            result_sets: Vec::new(),
        }
    }
}

impl MockResponse {
    pub fn rows_affected(mut self, rows: i64) -> Self {
        self.rows_affected = rows;
        self
    }

    pub fn return_value(mut self, value: impl Into<Value>) -> Self {
        self.return_value = value.into();
        self
    }

    pub fn scalar(mut self, value: impl Into<Value>) -> Self {
        self.scalar = value.into();
        self
    }

    pub fn output(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.outputs.push((name.to_string(), value.into()));
        self
    }

    pub fn result_set(mut self, set: ResultSet) -> Self {
        self.result_sets.push(set);
        self
    }
}

/// One command as the provider saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCommand {
    /// Id of the connection the command ran on
    pub connection_id: usize,
    pub in_transaction: bool,
    pub command: PreparedCommand,
}

#[derive(Default)]
struct MockState {
    procedures: Mutex<HashMap<String, Vec<ParameterDescriptor>>>,
    responses: Mutex<HashMap<String, MockResponse>>,
    failures: Mutex<VecDeque<DriverError>>,
    discovery_failures: Mutex<VecDeque<DriverError>>,
    connect_failures: Mutex<VecDeque<DriverError>>,
    latency: Mutex<Option<Duration>>,
    executed: Mutex<Vec<ExecutedCommand>>,
    isolation_levels: Mutex<Vec<IsolationLevel>>,
    next_connection_id: AtomicUsize,
    discoveries: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    open_connections: AtomicI64,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Scripted provider; clones share state.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the signature returned when `procedure` is discovered.
    ///
    /// `procedure` is matched against `schema.[name]` ignoring brackets and case.
    pub fn with_procedure(self, procedure: &str, parameters: Vec<ParameterDescriptor>) -> Self {
        self.state
            .procedures
            .lock()
            .insert(lookup_key(procedure), parameters);
        self
    }

    /// Register the response for a procedure or SQL text.
    pub fn with_response(self, text: &str, response: MockResponse) -> Self {
        self.state
            .responses
            .lock()
            .insert(lookup_key(text), response);
        self
    }

    /// Delay every execution by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.state.latency.lock() = Some(latency);
        self
    }

    /// Fail the next `count` executions with `error`.
    pub fn fail_next(&self, count: usize, error: DriverError) {
        let mut failures = self.state.failures.lock();
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Fail the next discovery with `error`.
    pub fn fail_discovery(&self, error: DriverError) {
        self.state.discovery_failures.lock().push_back(error);
    }

    /// Fail the next connection attempt with `error`.
    pub fn fail_connect(&self, error: DriverError) {
        self.state.connect_failures.lock().push_back(error);
    }

    pub fn discovery_count(&self) -> usize {
        self.state.discoveries.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> i64 {
        self.state.open_connections.load(Ordering::SeqCst)
    }

    /// Isolation levels of every transaction begun, in order.
    pub fn isolation_levels(&self) -> Vec<IsolationLevel> {
        self.state.isolation_levels.lock().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    /// Every command that reached execution, in order.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.state.executed.lock().clone()
    }

    /// Number of execution attempts, including failed ones.
    pub fn execution_count(&self) -> usize {
        self.state.executed.lock().len()
    }
}

#[async_trait]
impl ExecutionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, _connection_string: &str) -> Result<Box<dyn ProviderConnection>> {
        if let Some(err) = self.state.connect_failures.lock().pop_front() {
            return Err(SprocketError::Driver(err));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.open_connections.fetch_add(1, Ordering::SeqCst);
        let id = self.state.next_connection_id.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            id,
            state: self.state.clone(),
            closed: AtomicBool::new(false),
            in_transaction: false,
        }))
    }
}

struct MockConnection {
    id: usize,
    state: Arc<MockState>,
    closed: AtomicBool,
    in_transaction: bool,
}

impl MockConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SprocketError::Connection("Connection is closed".into()));
        }
        Ok(())
    }

    /// Record the command, apply latency/failures and write back outputs.
    async fn run(&mut self, command: &mut PreparedCommand) -> Result<MockResponse> {
        self.ensure_open()?;
        if let Some(param) = command
            .parameters
            .iter()
            .find(|p| p.direction().requires_value() && p.value.is_none())
        {
            return Err(SprocketError::Driver(DriverError::fatal(format!(
                "output parameter {} has no value",
                param.name()
            ))));
        }
        self.state.executed.lock().push(ExecutedCommand {
            connection_id: self.id,
            in_transaction: self.in_transaction,
            command: command.clone(),
        });

        let latency = *self.state.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.state.failures.lock().pop_front();
        if let Some(err) = failure {
            return Err(SprocketError::Driver(err));
        }

        let response = self
            .state
            .responses
            .lock()
            .get(&lookup_key(&command.text))
            .cloned()
            .unwrap_or_default();

        for param in command.parameters.iter_mut() {
            if param.direction() == ParameterDirection::ReturnValue {
                param.value = Some(response.return_value.clone());
            }
        }
        for (name, value) in &response.outputs {
            command.set_returned_value(name, value.clone());
        }

        Ok(response)
    }
}

#[async_trait]
impl ProviderConnection for MockConnection {
    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<ParameterDescriptor>> {
        self.ensure_open()?;
        self.state.discoveries.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.discovery_failures.lock().pop_front() {
            return Err(SprocketError::Driver(err));
        }
        self.state
            .procedures
            .lock()
            .get(&lookup_key(procedure))
            .cloned()
            .ok_or_else(|| {
                SprocketError::Driver(
                    DriverError::fatal(format!(
                        "Could not find stored procedure '{}'.",
                        procedure
                    ))
                    .with_code(2812),
                )
            })
    }

    async fn execute_non_query(&mut self, command: &mut PreparedCommand) -> Result<i64> {
        Ok(self.run(command).await?.rows_affected)
    }

    async fn execute_scalar(&mut self, command: &mut PreparedCommand) -> Result<Value> {
        Ok(self.run(command).await?.scalar)
    }

    async fn execute_reader(
        &mut self,
        command: &mut PreparedCommand,
        _behavior: ReaderBehavior,
    ) -> Result<Box<dyn RowCursor>> {
        let response = self.run(command).await?;
        Ok(Box::new(BufferedCursor::new(response.result_sets)))
    }

    async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.ensure_open()?;
        if self.in_transaction {
            return Err(SprocketError::TransactionState(
                "transaction already active".into(),
            ));
        }
        self.in_transaction = true;
        self.state.isolation_levels.lock().push(isolation);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = false;
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = false;
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn lookup_key(text: &str) -> String {
    text.replace(['[', ']'], "").to_lowercase()
}
