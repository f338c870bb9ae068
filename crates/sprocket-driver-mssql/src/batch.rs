//! T-SQL batches for bound commands
//!
//! A procedure call becomes one batch that declares a local variable per
//! output-capable parameter, runs the procedure and selects the returned
//! values back as a trailing single-row result set:
//!
//! ```sql
//! DECLARE @__rows int;
//! DECLARE @__rv int;
//! DECLARE @__out4 decimal(18, 2) = @P2;
//! EXEC @__rv = dbo.[SaveOrder] @orderId = @P1, @total = @__out4 OUTPUT;
//! SET @__rows = @@ROWCOUNT;
//! SELECT @__rows AS [__rows], @__rv AS [@RETURN_VALUE], @__out4 AS [@total];
//! ```
//!
//! Text commands are wrapped in `sp_executesql` so their SQL can refer to
//! parameters by their own names.

use sprocket_core::{
    CommandKind, DataType, ParameterDescriptor, ParameterDirection, PreparedCommand,
};

use crate::connection::TiberiusParam;

const ROWS_VARIABLE: &str = "@__rows";
const RETURN_VARIABLE: &str = "@__rv";

/// A batch ready to send, with its positional parameters.
#[derive(Debug)]
pub(crate) struct Batch {
    pub sql: String,
    pub params: Vec<TiberiusParam>,
    /// Parameters read back from the trailing row, after the row count
    pub returned: Vec<String>,
}

impl Batch {
    /// Whether the last result set carries row count and returned values.
    pub fn has_trailer(&self) -> bool {
        !self.returned.is_empty()
    }

    /// Bind `param` as the next positional parameter; yields its placeholder.
    fn push(&mut self, param: TiberiusParam) -> String {
        self.params.push(param);
        format!("@P{}", self.params.len())
    }
}

pub(crate) fn build(command: &PreparedCommand) -> Batch {
    match command.kind {
        CommandKind::StoredProcedure => procedure_batch(command),
        CommandKind::Text => text_batch(command),
    }
}

fn procedure_batch(command: &PreparedCommand) -> Batch {
    let mut batch = Batch {
        sql: String::new(),
        params: Vec::new(),
        returned: Vec::new(),
    };
    let mut prologue = Vec::new();
    let mut arguments = Vec::new();
    let mut selected = Vec::new();
    let mut has_return = false;

    for (index, param) in command.parameters.iter().enumerate() {
        match param.direction() {
            ParameterDirection::ReturnValue => {
                has_return = true;
                prologue.push(format!("DECLARE {} int;", RETURN_VARIABLE));
                selected.push(format!("{} AS {}", RETURN_VARIABLE, quote_name(param.name())));
                batch.returned.push(param.name().to_string());
            }
            ParameterDirection::Output | ParameterDirection::InputOutput => {
                let variable = format!("@__out{}", index + 1);
                let placeholder = batch.push(TiberiusParam::from_bound(param));
                prologue.push(format!(
                    "DECLARE {} {} = {};",
                    variable,
                    sql_type_name(&param.descriptor),
                    placeholder
                ));
                arguments.push(format!("{} = {} OUTPUT", param.name(), variable));
                selected.push(format!("{} AS {}", variable, quote_name(param.name())));
                batch.returned.push(param.name().to_string());
            }
            ParameterDirection::Input => {
                // an unset input is sent as a typed NULL, never omitted
                let placeholder = batch.push(TiberiusParam::from_bound(param));
                arguments.push(format!("{} = {}", param.name(), placeholder));
            }
        }
    }

    let exec = if has_return {
        format!("EXEC {} = {}", RETURN_VARIABLE, command.text)
    } else {
        format!("EXEC {}", command.text)
    };
    let call = if arguments.is_empty() {
        format!("{};", exec)
    } else {
        format!("{} {};", exec, arguments.join(", "))
    };

    batch.sql = with_trailer(prologue, call, selected);
    batch
}

fn text_batch(command: &PreparedCommand) -> Batch {
    let mut batch = Batch {
        sql: String::new(),
        params: Vec::new(),
        returned: Vec::new(),
    };
    if command.parameters.is_empty() {
        batch.sql = command.text.clone();
        return batch;
    }

    let mut prologue = Vec::new();
    let mut declarations = Vec::new();
    let mut arguments = Vec::new();
    let mut selected = Vec::new();

    for (index, param) in command.parameters.iter().enumerate() {
        let name = format!("@{}", param.name().trim_start_matches('@'));
        let type_name = sql_type_name(&param.descriptor);
        if param.direction().is_returned() {
            let variable = format!("@__out{}", index + 1);
            let placeholder = batch.push(TiberiusParam::from_bound(param));
            prologue.push(format!("DECLARE {} {} = {};", variable, type_name, placeholder));
            declarations.push(format!("{} {} OUTPUT", name, type_name));
            arguments.push(format!("{} = {} OUTPUT", name, variable));
            selected.push(format!("{} AS {}", variable, quote_name(param.name())));
            batch.returned.push(param.name().to_string());
        } else {
            let placeholder = batch.push(TiberiusParam::from_bound(param));
            declarations.push(format!("{} {}", name, type_name));
            arguments.push(format!("{} = {}", name, placeholder));
        }
    }

    let call = format!(
        "EXEC sp_executesql {}, {}, {};",
        unicode_literal(&command.text),
        unicode_literal(&declarations.join(", ")),
        arguments.join(", ")
    );
    batch.sql = with_trailer(prologue, call, selected);
    batch
}

fn with_trailer(mut prologue: Vec<String>, call: String, selected: Vec<String>) -> String {
    if selected.is_empty() {
        prologue.push(call);
        return prologue.join("\n");
    }
    prologue.insert(0, format!("DECLARE {} int;", ROWS_VARIABLE));
    prologue.push(call);
    prologue.push(format!("SET {} = @@ROWCOUNT;", ROWS_VARIABLE));
    let mut columns = vec![format!("{} AS [__rows]", ROWS_VARIABLE)];
    columns.extend(selected);
    prologue.push(format!("SELECT {};", columns.join(", ")));
    prologue.join("\n")
}

/// T-SQL type of a parameter, for variable and `sp_executesql` declarations.
pub(crate) fn sql_type_name(descriptor: &ParameterDescriptor) -> String {
    let size = descriptor.size;
    match descriptor.data_type {
        DataType::Boolean => "bit".into(),
        DataType::Int8 => "tinyint".into(),
        DataType::Int16 => "smallint".into(),
        DataType::Int32 => "int".into(),
        DataType::Int64 => "bigint".into(),
        DataType::Float32 => "real".into(),
        DataType::Float64 => "float".into(),
        DataType::Decimal if descriptor.precision == 0 => "decimal(38, 10)".into(),
        DataType::Decimal => format!("decimal({}, {})", descriptor.precision, descriptor.scale),
        DataType::Money => "money".into(),
        DataType::String => sized("nvarchar", size, 4000),
        DataType::AnsiString => sized("varchar", size, 8000),
        DataType::Binary => sized("varbinary", size, 8000),
        DataType::Guid => "uniqueidentifier".into(),
        DataType::Date => "date".into(),
        DataType::Time => "time".into(),
        DataType::DateTime => "datetime2".into(),
        DataType::DateTimeOffset => "datetimeoffset".into(),
        DataType::Xml => "xml".into(),
        DataType::Variant => "sql_variant".into(),
    }
}

fn sized(base: &str, size: i32, limit: i32) -> String {
    if size <= 0 || size > limit {
        format!("{}(max)", base)
    } else {
        format!("{}({})", base, size)
    }
}

/// Logical type of a `sys.parameters` type name.
pub(crate) fn data_type_from_sql(type_name: &str) -> DataType {
    match type_name.to_ascii_lowercase().as_str() {
        "bit" => DataType::Boolean,
        "tinyint" | "smallint" => DataType::Int16,
        "int" => DataType::Int32,
        "bigint" => DataType::Int64,
        "real" => DataType::Float32,
        "float" => DataType::Float64,
        "decimal" | "numeric" => DataType::Decimal,
        "money" | "smallmoney" => DataType::Money,
        "nvarchar" | "nchar" | "ntext" | "sysname" => DataType::String,
        "varchar" | "char" | "text" => DataType::AnsiString,
        "varbinary" | "binary" | "image" | "timestamp" | "rowversion" => DataType::Binary,
        "uniqueidentifier" => DataType::Guid,
        "date" => DataType::Date,
        "time" => DataType::Time,
        "datetime" | "datetime2" | "smalldatetime" => DataType::DateTime,
        "datetimeoffset" => DataType::DateTimeOffset,
        "xml" => DataType::Xml,
        _ => DataType::Variant,
    }
}

/// Character count of a `sys.parameters.max_length` byte length; -1 is `max`.
pub(crate) fn parameter_size(data_type: DataType, type_name: &str, max_length: i16) -> i32 {
    if max_length < 0 {
        return -1;
    }
    let unicode = data_type == DataType::String && !type_name.eq_ignore_ascii_case("ntext");
    if unicode {
        i32::from(max_length) / 2
    } else {
        i32::from(max_length)
    }
}

pub(crate) fn quote_name(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

pub(crate) fn unicode_literal(text: &str) -> String {
    format!("N'{}'", text.replace('\'', "''"))
}

