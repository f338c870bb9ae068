//! Tests for the core types

use super::*;
use pretty_assertions::assert_eq;
use std::collections::HashSet;

mod identity_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identity_ignores_case_and_brackets() {
        let a = ProcedureIdentity::new("crm", "dbo", "[GetOrder]");
        let b = ProcedureIdentity::new("CRM", "DBO", "getorder");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_identity_distinguishes_database_code() {
        let a = ProcedureIdentity::new("crm", "dbo", "GetOrder");
        let b = ProcedureIdentity::new("billing", "dbo", "GetOrder");
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_uses_default_schema() {
        let id = ProcedureIdentity::resolve("crm", "dbo", "GetOrder");
        assert_eq!(id.schema(), "dbo");
        assert_eq!(id.procedure_name(), "GetOrder");
    }

    #[test]
    fn test_resolve_keeps_explicit_schema() {
        let id = ProcedureIdentity::resolve("crm", "dbo", "sales.[GetOrder]");
        assert_eq!(id.schema(), "sales");
        assert_eq!(id.procedure_name(), "GetOrder");
        assert_eq!(id.command_text(), "sales.[GetOrder]");
        assert_eq!(id.display_name(), "sales.GetOrder");
    }

    #[test]
    fn test_command_text_escapes_closing_bracket() {
        let id = ProcedureIdentity::new("crm", "dbo", "odd]name");
        assert_eq!(id.command_text(), "dbo.[odd]]name]");
    }

    #[test]
    fn test_qualify_procedure_name() {
        assert_eq!(qualify_procedure_name("dbo", "GetUser"), "dbo.[GetUser]");
        assert_eq!(qualify_procedure_name("dbo", "hr.GetUser"), "hr.[GetUser]");
    }

    #[test]
    fn test_identity_display() {
        let id = ProcedureIdentity::new("crm", "dbo", "GetOrder");
        assert_eq!(id.to_string(), "crm:dbo.GetOrder");
    }
}

mod parameter_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parameter_names_are_prefixed() {
        assert_eq!(normalize_parameter_name("id"), "@id");
        assert_eq!(normalize_parameter_name(" @id "), "@id");
        assert_eq!(parameter_key("@UserId"), parameter_key("userid"));
    }

    #[test]
    fn test_supplied_null_is_normalized_to_absent() {
        let supplied = SuppliedParameter::input("name", Value::Null);
        assert_eq!(supplied.value, None);
        assert_eq!(supplied.data_type, DataType::String);
    }

    #[test]
    fn test_supplied_type_is_inferred() {
        let supplied = SuppliedParameter::input("id", 5i32);
        assert_eq!(supplied.data_type, DataType::Int32);
        assert_eq!(supplied.name, "@id");

        let typed = SuppliedParameter::input("id", "5").with_data_type(DataType::Int32);
        assert_eq!(typed.data_type, DataType::Int32);
    }

    #[test]
    fn test_direction_flags() {
        assert!(!ParameterDirection::Input.requires_value());
        assert!(ParameterDirection::Output.requires_value());
        assert!(ParameterDirection::InputOutput.requires_value());
        assert!(!ParameterDirection::ReturnValue.requires_value());
        assert!(ParameterDirection::ReturnValue.is_returned());
        assert!(!ParameterDirection::Input.is_returned());
    }

    #[test]
    fn test_set_returned_value_skips_inputs() {
        let mut command = PreparedCommand::new(
            CommandKind::StoredProcedure,
            "dbo.[GetUser]",
            vec![
                BoundParameter::new(ParameterDescriptor::input("@id", DataType::Int32), 5.into()),
                BoundParameter::unset(ParameterDescriptor::new(
                    "@total",
                    ParameterDirection::Output,
                    DataType::Int32,
                )),
            ],
        );

        assert!(!command.set_returned_value("@id", Value::Int32(9)));
        assert!(command.set_returned_value("TOTAL", Value::Int32(9)));
        assert_eq!(command.parameter("@id").map(|p| p.value_or_null()), Some(&Value::Int32(5)));
        assert_eq!(
            command.parameter("@total").map(|p| p.value_or_null()),
            Some(&Value::Int32(9))
        );
        assert!(command.return_parameter().is_none());
    }
}

mod error_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_driver_error_classification_flows_through_wrappers() {
        let err = SprocketError::execution(
            "exec dbo.GetUser\n",
            "dbo.[GetUser]",
            DriverError::transient("deadlock").with_code(1205).into(),
        );
        assert!(err.is_transient());
        assert_eq!(err.driver_error().and_then(|d| d.code), Some(1205));
        assert_eq!(err.statement(), Some("exec dbo.GetUser\n"));
    }

    #[test]
    fn test_local_errors_are_fatal() {
        assert!(!SprocketError::Configuration("missing".into()).is_transient());
        assert!(!SprocketError::Cancelled.is_transient());
        assert!(
            !SprocketError::Bind {
                parameter: "@id".into(),
                message: "bad".into()
            }
            .is_transient()
        );
        assert!(SprocketError::Timeout("30s".into()).is_transient());
    }

    #[test]
    fn test_execution_error_message_carries_statement() {
        let err = SprocketError::execution(
            "exec dbo.GetUser\n",
            "dbo.[GetUser]",
            DriverError::fatal("boom").into(),
        );
        let message = err.to_string();
        assert!(message.starts_with("Database layer exception"));
        assert!(message.ends_with(":exec dbo.GetUser\n"));
    }

    #[test]
    fn test_driver_error_display() {
        assert_eq!(
            DriverError::fatal("missing").with_code(2812).to_string(),
            "[2812] missing"
        );
        assert_eq!(DriverError::fatal("plain").to_string(), "plain");
    }
}

mod value_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int32(42).to_string(), "42");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "0xDEAD");
    }

    #[test]
    fn test_value_from_option() {
        let none: Option<i32> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Int64(3));
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = Row::new(
            vec!["Id".into(), "Name".into()],
            vec![Value::Int32(1), Value::from("ann")],
        );
        assert_eq!(row.get_by_name("name"), Some(&Value::from("ann")));
        assert_eq!(row.ordinal("ID"), Some(0));
        assert_eq!(row.get_by_name("missing"), None);
    }
}

mod cursor_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_buffered_cursor_walks_all_sets() {
        let first = ResultSet::from_values(&["id"], vec![vec![1i32.into()], vec![2i32.into()]]);
        let second = ResultSet::from_values(&["name"], vec![vec!["x".into()]]);
        let mut cursor = BufferedCursor::new(vec![first, second]);

        assert_eq!(cursor.columns()[0].name, "id");
        assert_eq!(cursor.next_row().unwrap().unwrap().values, vec![Value::Int32(1)]);
        assert_eq!(cursor.next_row().unwrap().unwrap().values, vec![Value::Int32(2)]);
        assert!(cursor.next_row().unwrap().is_none());

        assert!(cursor.next_result().unwrap());
        assert_eq!(cursor.columns()[0].name, "name");
        assert!(cursor.next_row().unwrap().is_some());

        assert!(!cursor.next_result().unwrap());
        assert!(cursor.columns().is_empty());
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn test_empty_cursor() {
        let mut cursor = BufferedCursor::new(Vec::new());
        assert!(cursor.columns().is_empty());
        assert!(cursor.next_row().unwrap().is_none());
        assert!(!cursor.next_result().unwrap());
    }
}
