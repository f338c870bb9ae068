//! Procedure identity and identifier normalization

use std::hash::{Hash, Hasher};

/// Catalog key for a stored procedure: `{ database code, schema, name }`.
///
/// Equality and hashing ignore ASCII case and bracket quoting, so
/// `dbo.[GetOrder]` and `DBO.getorder` identify the same procedure.
#[derive(Debug, Clone)]
pub struct ProcedureIdentity {
    database_code: String,
    schema: String,
    procedure_name: String,
}

impl ProcedureIdentity {
    pub fn new(
        database_code: impl Into<String>,
        schema: impl Into<String>,
        procedure_name: impl Into<String>,
    ) -> Self {
        let schema = schema.into();
        let procedure_name = procedure_name.into();
        Self {
            database_code: database_code.into(),
            schema: unquote(schema.trim()).to_string(),
            procedure_name: unquote(procedure_name.trim()).to_string(),
        }
    }

    /// Build an identity from a possibly schema-qualified procedure name.
    ///
    /// `sales.GetOrder` keeps its own schema; a bare `GetOrder` takes
    /// `default_schema`. Only the first two dot-separated segments count.
    pub fn resolve(database_code: &str, default_schema: &str, procedure: &str) -> Self {
        let mut parts = procedure.split('.');
        match (parts.next(), parts.next()) {
            (Some(schema), Some(name)) => Self::new(database_code, schema, name),
            _ => Self::new(database_code, default_schema, procedure),
        }
    }

    pub fn database_code(&self) -> &str {
        &self.database_code
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn procedure_name(&self) -> &str {
        &self.procedure_name
    }

    /// Command text sent to the provider: `schema.[name]`.
    ///
    /// The name segment is bracket-quoted so reserved words resolve.
    pub fn command_text(&self) -> String {
        format!("{}.[{}]", self.schema, self.procedure_name.replace(']', "]]"))
    }

    /// Unquoted `schema.name`, as shown in diagnostic traces.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.schema, self.procedure_name)
    }
}

impl PartialEq for ProcedureIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.database_code.eq_ignore_ascii_case(&other.database_code)
            && self.schema.eq_ignore_ascii_case(&other.schema)
            && self.procedure_name.eq_ignore_ascii_case(&other.procedure_name)
    }
}

impl Eq for ProcedureIdentity {}

impl Hash for ProcedureIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for part in [&self.database_code, &self.schema, &self.procedure_name] {
            for byte in part.bytes() {
                state.write_u8(byte.to_ascii_lowercase());
            }
            state.write_u8(0xff);
        }
    }
}

impl std::fmt::Display for ProcedureIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.database_code, self.display_name())
    }
}

/// Normalize a procedure name into `schema.[name]` form.
pub fn qualify_procedure_name(schema: &str, procedure: &str) -> String {
    ProcedureIdentity::resolve("", schema, procedure).command_text()
}

fn unquote(segment: &str) -> &str {
    segment
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(segment)
}
