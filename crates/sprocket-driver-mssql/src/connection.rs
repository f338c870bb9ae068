//! MS SQL Server connection implementation using tiberius

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::{Client, ColumnData, ColumnType, Config, QueryItem, QueryStream, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use sprocket_core::{
    BoundParameter, BufferedCursor, ColumnMeta, DataType, DriverError, IsolationLevel,
    ParameterDescriptor, ParameterDirection, PreparedCommand, ProviderConnection, ReaderBehavior,
    Result, ResultSet, Row, RowCursor, SprocketError, Value,
};

use crate::batch::{self, Batch, data_type_from_sql, parameter_size};
use crate::error::{MssqlConnectionError, driver_failure};

type MssqlClient = Client<Compat<TcpStream>>;

/// Error number SQL Server reports for a missing procedure.
const PROCEDURE_NOT_FOUND: i32 = 2812;

const DISCOVERY_SQL: &str = "SELECT OBJECT_ID(@P1) AS object_id;
SELECT p.name, TYPE_NAME(p.system_type_id) AS type_name, p.max_length, p.precision, p.scale, p.is_output, p.parameter_id
FROM sys.parameters AS p
WHERE p.object_id = OBJECT_ID(@P1)
ORDER BY p.parameter_id;";

/// MS SQL Server connection using tiberius
pub struct MssqlConnection {
    client: Mutex<Option<MssqlClient>>,
    closed: AtomicBool,
    in_transaction: bool,
    /// Set while a request is on the wire; still set afterwards means the
    /// request future was dropped and the stream holds unread tokens.
    busy: bool,
}

impl MssqlConnection {
    /// Open a connection from an ADO.NET-style connection string
    /// (`Server=tcp:host,1433;Database=app;User Id=sa;Password=...`).
    ///
    /// A routing redirect from the server (Azure SQL gateways) is followed
    /// once.
    #[tracing::instrument(skip_all)]
    pub async fn connect(connection_string: &str) -> std::result::Result<Self, MssqlConnectionError> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| MssqlConnectionError::InvalidConnectionString(e.to_string()))?;
        tracing::debug!(addr = %config.get_addr(), "connecting to MS SQL Server");

        let client = match open(config.clone()).await {
            Err(MssqlConnectionError::Tiberius(tiberius::error::Error::Routing { host, port })) => {
                tracing::debug!(%host, port, "following server redirect");
                let mut config = config;
                config.host(&host);
                config.port(port);
                open(config).await?
            }
            other => other?,
        };

        tracing::debug!("successfully connected to MS SQL Server");
        Ok(Self {
            client: Mutex::new(Some(client)),
            closed: AtomicBool::new(false),
            in_transaction: false,
            busy: false,
        })
    }

    /// A connection without a client, as left behind by a dropped request
    /// when `busy` is set.
    #[cfg(test)]
    pub(crate) fn detached(busy: bool) -> Self {
        Self {
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
            in_transaction: true,
            busy,
        }
    }

    /// Client for the next request, marking the connection busy until the
    /// caller clears the flag.
    fn begin_request(&mut self) -> std::result::Result<&mut MssqlClient, MssqlConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MssqlConnectionError::ConnectionClosed);
        }
        if self.busy {
            tracing::warn!("connection abandoned mid-request, refusing reuse");
            return Err(MssqlConnectionError::ConnectionClosed);
        }
        let client = self
            .client
            .get_mut()
            .as_mut()
            .ok_or(MssqlConnectionError::ConnectionClosed)?;
        self.busy = true;
        Ok(client)
    }

    /// Run a batch and buffer every result set it produces.
    async fn query_batch(&mut self, batch: &Batch) -> Result<Vec<ResultSet>> {
        let params: Vec<&dyn ToSql> = batch.params.iter().map(|p| p as &dyn ToSql).collect();
        let client = self.begin_request()?;
        let result = match client.query(batch.sql.as_str(), &params).await {
            Ok(stream) => collect_result_sets(stream).await,
            Err(e) => Err(driver_failure(e)),
        };
        self.busy = false;
        result
    }

    /// Run a batch that returns no rows; yields the summed row counts.
    async fn execute_batch(&mut self, batch: &Batch) -> Result<i64> {
        let params: Vec<&dyn ToSql> = batch.params.iter().map(|p| p as &dyn ToSql).collect();
        let client = self.begin_request()?;
        let result = client
            .execute(batch.sql.as_str(), &params)
            .await
            .map(|done| done.rows_affected().iter().sum::<u64>() as i64)
            .map_err(driver_failure);
        self.busy = false;
        result
    }

    async fn simple(&mut self, sql: &str) -> Result<()> {
        let client = self.begin_request()?;
        let result = match client.simple_query(sql).await {
            Ok(stream) => stream.into_results().await.map(drop).map_err(driver_failure),
            Err(e) => Err(driver_failure(e)),
        };
        self.busy = false;
        result
    }

    /// Drop a client left mid-request; the server rolls back any open
    /// transaction when the session ends.
    fn discard_interrupted(&mut self) -> bool {
        if !self.busy {
            return false;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.in_transaction = false;
        drop(self.client.get_mut().take());
        tracing::debug!("discarded interrupted MS SQL Server connection");
        true
    }
}

async fn open(config: Config) -> std::result::Result<MssqlClient, MssqlConnectionError> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;
    tcp.set_nodelay(true)?;
    Ok(Client::connect(config, tcp.compat_write()).await?)
}

#[async_trait]
impl ProviderConnection for MssqlConnection {
    #[tracing::instrument(skip(self))]
    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<ParameterDescriptor>> {
        let batch = Batch {
            sql: DISCOVERY_SQL.to_string(),
            params: vec![TiberiusParam::String(procedure.to_string())],
            returned: Vec::new(),
        };
        let mut sets = self.query_batch(&batch).await?.into_iter();

        let exists = sets
            .next()
            .and_then(|set| set.rows.into_iter().next())
            .and_then(|row| row.get(0).and_then(Value::as_i64))
            .is_some();
        if !exists {
            return Err(SprocketError::Driver(
                DriverError::fatal(format!("Could not find stored procedure '{}'.", procedure))
                    .with_code(PROCEDURE_NOT_FOUND),
            ));
        }

        let rows = sets.next().map(|set| set.rows).unwrap_or_default();
        let descriptors = rows
            .iter()
            .map(descriptor_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tracing::debug!(count = descriptors.len(), "derived parameters");
        Ok(descriptors)
    }

    async fn execute_non_query(&mut self, command: &mut PreparedCommand) -> Result<i64> {
        let batch = batch::build(command);
        if !batch.has_trailer() {
            return self.execute_batch(&batch).await;
        }
        let mut sets = self.query_batch(&batch).await?;
        apply_trailer(&batch, &mut sets, command)
    }

    async fn execute_scalar(&mut self, command: &mut PreparedCommand) -> Result<Value> {
        let batch = batch::build(command);
        let mut sets = self.query_batch(&batch).await?;
        if batch.has_trailer() {
            apply_trailer(&batch, &mut sets, command)?;
        }
        Ok(sets
            .into_iter()
            .next()
            .and_then(|set| set.rows.into_iter().next())
            .and_then(|row| row.values.into_iter().next())
            .unwrap_or(Value::Null))
    }

    async fn execute_reader(
        &mut self,
        command: &mut PreparedCommand,
        _behavior: ReaderBehavior,
    ) -> Result<Box<dyn RowCursor>> {
        let batch = batch::build(command);
        let mut sets = self.query_batch(&batch).await?;
        if batch.has_trailer() {
            apply_trailer(&batch, &mut sets, command)?;
        }
        Ok(Box::new(BufferedCursor::new(sets)))
    }

    async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.in_transaction {
            return Err(SprocketError::TransactionState(
                "transaction already active".into(),
            ));
        }
        let level = match isolation {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
        };
        self.simple(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}; BEGIN TRANSACTION;",
            level
        ))
        .await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.simple("COMMIT TRANSACTION;").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.discard_interrupted() {
            return Ok(());
        }
        self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.discard_interrupted() {
            return Ok(());
        }
        self.closed.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.get_mut().take() {
            client.close().await.map_err(driver_failure)?;
        }
        tracing::debug!("MS SQL Server connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("in_transaction", &self.in_transaction)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("busy", &self.busy)
            .finish()
    }
}

async fn collect_result_sets(mut stream: QueryStream<'_>) -> Result<Vec<ResultSet>> {
    let mut sets: Vec<ResultSet> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    while let Some(item) = stream.try_next().await.map_err(driver_failure)? {
        match item {
            QueryItem::Metadata(meta) => {
                let columns: Vec<ColumnMeta> = meta
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(ordinal, col)| tiberius_column_to_meta(col, ordinal))
                    .collect();
                names = columns.iter().map(|c| c.name.clone()).collect();
                sets.push(ResultSet::new(columns, Vec::new()));
            }
            QueryItem::Row(row) => {
                let values = row
                    .into_iter()
                    .map(column_data_to_value)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                if let Some(set) = sets.last_mut() {
                    set.rows.push(Row::new(names.clone(), values));
                }
            }
        }
    }

    Ok(sets)
}

/// Take the trailing row off `sets`, write returned values into `command`
/// and yield the row count it carries.
pub(crate) fn apply_trailer(
    batch: &Batch,
    sets: &mut Vec<ResultSet>,
    command: &mut PreparedCommand,
) -> Result<i64> {
    let row = sets
        .pop()
        .and_then(|set| set.rows.into_iter().next())
        .ok_or_else(|| {
            SprocketError::from(MssqlConnectionError::TypeConversion(
                "batch did not return its output row".into(),
            ))
        })?;

    let mut values = row.values.into_iter();
    let rows = values.next().and_then(|v| v.as_i64()).unwrap_or(-1);
    for (name, value) in batch.returned.iter().zip(values) {
        command.set_returned_value(name, value);
    }
    Ok(rows)
}

pub(crate) fn descriptor_from_row(row: &Row) -> std::result::Result<ParameterDescriptor, MssqlConnectionError> {
    let text = |index: usize| row.get(index).and_then(Value::as_str).unwrap_or_default();
    let number = |index: usize| row.get(index).and_then(Value::as_i64).unwrap_or_default();

    let name = text(0);
    if name.is_empty() {
        return Err(MssqlConnectionError::Discovery(
            "parameter row without a name".into(),
        ));
    }
    let type_name = text(1);
    let data_type = data_type_from_sql(type_name);
    let is_output = row.get(5).and_then(Value::as_bool).unwrap_or(false);
    let parameter_id = number(6);

    // the server cannot tell OUTPUT from INPUT/OUTPUT parameters
    let direction = match (parameter_id, is_output) {
        (0, _) => ParameterDirection::ReturnValue,
        (_, true) => ParameterDirection::InputOutput,
        (_, false) => ParameterDirection::Input,
    };

    Ok(ParameterDescriptor::new(name, direction, data_type)
        .with_size(parameter_size(data_type, type_name, number(2) as i16))
        .with_precision(number(3) as u8, number(4) as u8)
        .with_ordinal(parameter_id.max(0) as usize))
}

/// Convert a tiberius column to ColumnMeta
fn tiberius_column_to_meta(col: &tiberius::Column, ordinal: usize) -> ColumnMeta {
    ColumnMeta::new(col.name(), column_type_to_data_type(col.column_type()), ordinal)
}

pub(crate) fn column_type_to_data_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Bit | ColumnType::Bitn => DataType::Boolean,
        ColumnType::Int1 | ColumnType::Int2 => DataType::Int16,
        ColumnType::Int4 => DataType::Int32,
        ColumnType::Int8 | ColumnType::Intn => DataType::Int64,
        ColumnType::Float4 => DataType::Float32,
        ColumnType::Float8 | ColumnType::Floatn => DataType::Float64,
        ColumnType::Decimaln | ColumnType::Numericn => DataType::Decimal,
        ColumnType::Money | ColumnType::Money4 => DataType::Money,
        ColumnType::Guid => DataType::Guid,
        ColumnType::Daten => DataType::Date,
        ColumnType::Timen => DataType::Time,
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => DataType::DateTime,
        ColumnType::DatetimeOffsetn => DataType::DateTimeOffset,
        ColumnType::NVarchar | ColumnType::NChar | ColumnType::NText => DataType::String,
        ColumnType::BigVarChar | ColumnType::BigChar | ColumnType::Text => DataType::AnsiString,
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => DataType::Binary,
        ColumnType::Xml => DataType::Xml,
        _ => DataType::Variant,
    }
}

fn date_from_days(base_year: i32, days: i64) -> std::result::Result<chrono::NaiveDate, MssqlConnectionError> {
    chrono::NaiveDate::from_ymd_opt(base_year, 1, 1)
        .and_then(|base| base.checked_add_signed(chrono::Duration::days(days)))
        .ok_or_else(|| MssqlConnectionError::TypeConversion(format!("date out of range: {} days", days)))
}

fn time_from_increments(increments: u64, scale: u8) -> chrono::NaiveTime {
    let nanos = u128::from(increments) * 10u128.pow(9 - u32::from(scale.min(9)));
    chrono::NaiveTime::from_num_seconds_from_midnight_opt(
        (nanos / 1_000_000_000) as u32,
        (nanos % 1_000_000_000) as u32,
    )
    .unwrap_or_default()
}

/// Convert tiberius ColumnData to a Sprocket Value
pub(crate) fn column_data_to_value(
    col_data: ColumnData<'static>,
) -> std::result::Result<Value, MssqlConnectionError> {
    let value = match col_data {
        ColumnData::Bit(v) => v.map(Value::Bool).into(),
        ColumnData::U8(v) => v.map(|v| Value::Int16(i16::from(v))).into(),
        ColumnData::I16(v) => v.map(Value::Int16).into(),
        ColumnData::I32(v) => v.map(Value::Int32).into(),
        ColumnData::I64(v) => v.map(Value::Int64).into(),
        ColumnData::F32(v) => v.map(Value::Float32).into(),
        ColumnData::F64(v) => v.map(Value::Float64).into(),
        ColumnData::String(v) => v.map(|v| Value::String(v.into_owned())).into(),
        ColumnData::Guid(v) => v.map(Value::Uuid).into(),
        ColumnData::Binary(v) => v.map(|v| Value::Bytes(v.into_owned())).into(),
        ColumnData::Numeric(v) => v.map(|v| Value::Decimal(v.to_string())).into(),
        ColumnData::Xml(v) => v.map(|v| Value::String(v.into_owned().into_string())).into(),
        ColumnData::DateTime(None)
        | ColumnData::SmallDateTime(None)
        | ColumnData::DateTime2(None)
        | ColumnData::DateTimeOffset(None)
        | ColumnData::Date(None)
        | ColumnData::Time(None) => Value::Null,
        ColumnData::DateTime(Some(v)) => {
            // seconds fragments are 1/300 s
            let date = date_from_days(1900, i64::from(v.days()))?;
            let nanos = u64::from(v.seconds_fragments()) * 1_000_000_000 / 300;
            Value::DateTime(date.and_time(time_from_increments(nanos, 9)))
        }
        ColumnData::SmallDateTime(Some(v)) => {
            // seconds fragments are minutes
            let date = date_from_days(1900, i64::from(v.days()))?;
            let seconds = u64::from(v.seconds_fragments()) * 60;
            Value::DateTime(date.and_time(time_from_increments(seconds, 0)))
        }
        ColumnData::DateTime2(Some(v)) => {
            let date = date_from_days(1, i64::from(v.date().days()))?;
            let time = time_from_increments(v.time().increments(), v.time().scale());
            Value::DateTime(date.and_time(time))
        }
        ColumnData::DateTimeOffset(Some(v)) => {
            let dt2 = v.datetime2();
            let date = date_from_days(1, i64::from(dt2.date().days()))?;
            let time = time_from_increments(dt2.time().increments(), dt2.time().scale());
            let utc = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(
                date.and_time(time),
                chrono::Utc,
            );
            Value::DateTimeUtc(utc)
        }
        ColumnData::Date(Some(v)) => Value::Date(date_from_days(1, i64::from(v.days()))?),
        ColumnData::Time(Some(v)) => Value::Time(time_from_increments(v.increments(), v.scale())),
    };
    Ok(value)
}

/// Container for tiberius parameter values
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TiberiusParam {
    /// NULL typed after the parameter, so the server can convert it
    Null(DataType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
}

impl TiberiusParam {
    /// Parameter for a bound value; unset and NULL values become typed NULLs.
    pub(crate) fn from_bound(param: &BoundParameter) -> Self {
        match &param.value {
            None | Some(Value::Null) => TiberiusParam::Null(param.descriptor.data_type),
            Some(value) => TiberiusParam::from_value(value),
        }
    }

    pub(crate) fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => TiberiusParam::Null(DataType::String),
            Value::Bool(b) => TiberiusParam::Bool(*b),
            Value::Int8(i) => TiberiusParam::I16(i16::from(*i)),
            Value::Int16(i) => TiberiusParam::I16(*i),
            Value::Int32(i) => TiberiusParam::I32(*i),
            Value::Int64(i) => TiberiusParam::I64(*i),
            Value::Float32(f) => TiberiusParam::F32(*f),
            Value::Float64(f) => TiberiusParam::F64(*f),
            Value::Decimal(d) => TiberiusParam::String(d.clone()),
            Value::String(s) => TiberiusParam::String(s.clone()),
            Value::Bytes(b) => TiberiusParam::Bytes(b.clone()),
            Value::Uuid(u) => TiberiusParam::Uuid(*u),
            Value::Date(d) => TiberiusParam::Date(*d),
            Value::Time(t) => TiberiusParam::Time(*t),
            Value::DateTime(dt) => TiberiusParam::DateTime(*dt),
            Value::DateTimeUtc(dt) => TiberiusParam::DateTimeUtc(*dt),
            Value::Json(j) => TiberiusParam::String(j.to_string()),
        }
    }
}

impl ToSql for TiberiusParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            TiberiusParam::Null(data_type) => typed_null(*data_type),
            TiberiusParam::Bool(v) => ColumnData::Bit(Some(*v)),
            TiberiusParam::I16(v) => ColumnData::I16(Some(*v)),
            TiberiusParam::I32(v) => ColumnData::I32(Some(*v)),
            TiberiusParam::I64(v) => ColumnData::I64(Some(*v)),
            TiberiusParam::F32(v) => ColumnData::F32(Some(*v)),
            TiberiusParam::F64(v) => ColumnData::F64(Some(*v)),
            TiberiusParam::String(v) => {
                ColumnData::String(Some(std::borrow::Cow::Borrowed(v.as_str())))
            }
            TiberiusParam::Bytes(v) => {
                ColumnData::Binary(Some(std::borrow::Cow::Borrowed(v.as_slice())))
            }
            TiberiusParam::Uuid(v) => ColumnData::Guid(Some(*v)),
            TiberiusParam::Date(v) => v.to_sql(),
            TiberiusParam::Time(v) => v.to_sql(),
            TiberiusParam::DateTime(v) => v.to_sql(),
            TiberiusParam::DateTimeUtc(v) => v.to_sql(),
        }
    }
}

fn typed_null(data_type: DataType) -> ColumnData<'static> {
    match data_type {
        DataType::Boolean => ColumnData::Bit(None),
        DataType::Int8 | DataType::Int16 => ColumnData::I16(None),
        DataType::Int32 => ColumnData::I32(None),
        DataType::Int64 => ColumnData::I64(None),
        DataType::Float32 => ColumnData::F32(None),
        DataType::Float64 => ColumnData::F64(None),
        DataType::Binary => ColumnData::Binary(None),
        DataType::Guid => ColumnData::Guid(None),
        _ => ColumnData::String(None),
    }
}
