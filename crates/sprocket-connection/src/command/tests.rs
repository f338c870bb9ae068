//! Tests for procedure and text commands

use super::*;
use pretty_assertions::assert_eq;
use sprocket_core::testing::{MockProvider, MockResponse};
use sprocket_core::{
    CommandKind, DataType, DriverError, ParameterDescriptor, ParameterDirection, RETURN_VALUE_NAME,
    ResultSet, SprocketError, Value,
};
use sprocket_query::ParameterCatalog;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::DbConnection;
use crate::failure::{FailureDecision, LogAndSwallow};

fn order_signature() -> Vec<ParameterDescriptor> {
    vec![
        ParameterDescriptor::input("@orderId", DataType::Int32).with_ordinal(1),
        ParameterDescriptor::input("@note", DataType::String)
            .with_size(200)
            .with_ordinal(2),
        ParameterDescriptor::new("@total", ParameterDirection::InputOutput, DataType::Decimal)
            .with_precision(18, 2)
            .with_ordinal(3),
    ]
}

fn connection(provider: &MockProvider) -> DbConnection {
    DbConnection::without_defaults(
        Arc::new(provider.clone()),
        ParameterCatalog::shared(),
        "Server=test",
    )
    .with_db_code("orders")
}

fn provider() -> MockProvider {
    MockProvider::new()
        .with_procedure("dbo.GetOrder", vec![ParameterDescriptor::input("@orderId", DataType::Int32)])
        .with_procedure("dbo.SaveOrder", order_signature())
}

mod non_query_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_procedure_call_carries_return_value_after_discovered_parameters() {
        let provider = provider().with_response(
            "dbo.GetOrder",
            MockResponse::default().rows_affected(1).return_value(7),
        );
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("GetOrder");
        cmd.add_in_parameter("@orderId", 42);
        let rows = cmd.execute_non_query().await.unwrap();

        assert_eq!(rows, 1);
        assert_eq!(cmd.return_value(), Some(&Value::Int32(7)));

        let executed = provider.executed();
        assert_eq!(executed.len(), 1);
        let sent = &executed[0].command;
        assert_eq!(sent.kind, CommandKind::StoredProcedure);
        assert_eq!(sent.text, "dbo.[GetOrder]");
        let names: Vec<&str> = sent.parameters.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["@orderId", RETURN_VALUE_NAME]);
        assert_eq!(sent.parameters[0].value, Some(Value::Int32(42)));
        assert_eq!(sent.parameters[1].value, Some(Value::Int32(0)));
    }

    #[tokio::test]
    async fn test_last_sql_holds_rendered_call() {
        let provider = provider();
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("SaveOrder");
        cmd.add_in_parameter("@orderId", 42);
        cmd.execute_non_query().await.unwrap();
        drop(cmd);

        assert_eq!(
            conn.last_sql(),
            "exec dbo.SaveOrder\n\t@orderId=42\n\t,@note=NULL\n\t,@total=NULL\n"
        );
    }

    #[tokio::test]
    async fn test_get_user_trace_renders_unsupplied_name_as_null() {
        let provider = MockProvider::new().with_procedure(
            "dbo.GetUser",
            vec![
                ParameterDescriptor::input("@id", DataType::Int32),
                ParameterDescriptor::input("@name", DataType::String),
            ],
        );
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("GetUser");
        cmd.add_in_parameter("@id", 5);
        cmd.execute_non_query().await.unwrap();
        drop(cmd);

        assert_eq!(conn.last_sql(), "exec dbo.GetUser\n\t@id=5\n\t,@name=NULL\n");
        let sent = &provider.executed()[0].command;
        assert_eq!(sent.parameter("@name").unwrap().value, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_provider_rejects_unset_output() {
        use sprocket_core::{ExecutionProvider, ProviderConnection};

        let provider = provider();
        let mut connection = provider.connect("Server=test").await.unwrap();
        let mut command = PreparedCommand::new(
            CommandKind::StoredProcedure,
            "dbo.SaveOrder",
            vec![BoundParameter::unset(ParameterDescriptor::new(
                "@total",
                ParameterDirection::InputOutput,
                DataType::Decimal,
            ))],
        );

        let err = connection.execute_non_query(&mut command).await.unwrap_err();
        assert!(err.to_string().contains("@total"));
        assert_eq!(provider.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupplied_parameters_are_sent_as_null() {
        let provider = provider();
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("SaveOrder");
        cmd.add_in_parameter("@orderId", 1);
        cmd.execute_non_query().await.unwrap();

        let sent = &provider.executed()[0].command;
        assert_eq!(sent.parameter("@total").unwrap().value, Some(Value::Null));
        assert_eq!(sent.parameter("@note").unwrap().value, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_output_values_are_readable_after_execution() {
        let provider = provider().with_response(
            "dbo.SaveOrder",
            MockResponse::default().output("@total", Value::Decimal("12.50".into())),
        );
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("SaveOrder");
        cmd.add_in_parameter("@orderId", 1)
            .add_in_out_parameter("@total", Value::Decimal("0".into()));
        cmd.execute_non_query().await.unwrap();

        assert_eq!(
            cmd.out_parameter("@total"),
            Some(&Value::Decimal("12.50".into()))
        );
        assert_eq!(cmd.out_parameter("total"), cmd.out_parameter("@TOTAL"));
        assert_eq!(cmd.out_parameter("@orderId"), None);
    }

    #[tokio::test]
    async fn test_later_parameter_replaces_earlier_one() {
        let provider = provider();
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("GetOrder");
        cmd.add_in_parameter("@orderId", 1).add_in_parameter("@ORDERID", 2);
        assert_eq!(cmd.parameters().len(), 1);
        cmd.execute_non_query().await.unwrap();

        let sent = &provider.executed()[0].command;
        assert_eq!(sent.parameters[0].value, Some(Value::Int32(2)));
    }

    #[tokio::test]
    async fn test_owned_connections_are_closed() {
        let provider = provider();
        let mut conn = connection(&provider);

        for id in 0..2 {
            let mut cmd = conn.stored_procedure("GetOrder");
            cmd.add_in_parameter("@orderId", id);
            cmd.execute_non_query().await.unwrap();
        }

        // one connection for discovery, one per call
        assert_eq!(provider.connect_count(), 3);
        assert_eq!(provider.discovery_count(), 1);
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_schema_qualified_procedure_name() {
        let provider = MockProvider::new().with_procedure("sales.GetOrder", vec![]);
        let mut conn = connection(&provider);

        conn.stored_procedure("sales.GetOrder")
            .execute_non_query()
            .await
            .unwrap();

        assert_eq!(provider.executed()[0].command.text, "sales.[GetOrder]");
        assert_eq!(conn.last_sql(), "exec sales.GetOrder\n");
    }
}

mod scalar_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_scalar_returns_first_value() {
        let provider = provider().with_response(
            "dbo.GetOrder",
            MockResponse::default().scalar("shipped"),
        );
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("GetOrder");
        cmd.add_in_parameter("@orderId", 42);
        let value = cmd.execute_scalar().await.unwrap();

        assert_eq!(value, Value::String("shipped".into()));
        assert!(provider.executed()[0].command.return_parameter().is_some());
    }

    #[tokio::test]
    async fn test_scalar_without_rows_is_null() {
        let provider = provider();
        let mut conn = connection(&provider);

        let value = conn.stored_procedure("GetOrder").execute_scalar().await.unwrap();
        assert_eq!(value, Value::Null);
    }
}

mod reader_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn orders() -> ResultSet {
        ResultSet::from_values(
            &["id", "name", "notes"],
            vec![
                vec![Value::Int32(1), "first".into(), Value::Null],
                vec![Value::Int32(2), "second".into(), "rush".into()],
            ],
        )
    }

    #[tokio::test]
    async fn test_reader_walks_rows() {
        let provider = provider().with_response(
            "dbo.GetOrder",
            MockResponse::default().result_set(orders()),
        );
        let mut conn = connection(&provider);

        let mut names = Vec::new();
        conn.stored_procedure("GetOrder")
            .execute_reader(|reader| {
                assert_eq!(reader.field_count(), 3);
                while reader.read()? {
                    names.push(reader.get_by_name("NAME")?);
                    // default mode allows going back
                    reader.get(0)?;
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(names, vec![Value::from("first"), Value::from("second")]);
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_reader_call_has_no_return_value() {
        let provider = provider();
        let mut conn = connection(&provider);

        conn.stored_procedure("GetOrder")
            .execute_reader(|_| Ok(()))
            .await
            .unwrap();

        let sent = &provider.executed()[0].command;
        assert!(sent.return_parameter().is_none());
    }

    #[tokio::test]
    async fn test_sequential_reader_requires_increasing_ordinals() {
        let provider = provider().with_response(
            "dbo.GetOrder",
            MockResponse::default().result_set(orders()),
        );
        let mut conn = connection(&provider);

        let err = conn
            .stored_procedure("GetOrder")
            .execute_sequential_reader(|reader| {
                reader.read()?;
                assert_eq!(reader.get(0)?, Value::Int32(1));
                assert_eq!(reader.get(2)?, Value::Null);
                reader.get(1)?;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SprocketError::Reader(_)));
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_sequential_reader_resets_per_row() {
        let provider = provider().with_response(
            "dbo.GetOrder",
            MockResponse::default().result_set(orders()),
        );
        let mut conn = connection(&provider);

        let mut ids = Vec::new();
        conn.stored_procedure("GetOrder")
            .execute_sequential_reader(|reader| {
                assert!(reader.row().is_none());
                while reader.read()? {
                    ids.push(reader.get(0)?);
                    reader.get(1)?;
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(ids, vec![Value::Int32(1), Value::Int32(2)]);
    }

    #[tokio::test]
    async fn test_get_without_read_is_an_error() {
        let provider = provider().with_response(
            "dbo.GetOrder",
            MockResponse::default().result_set(orders()),
        );
        let mut conn = connection(&provider);

        let err = conn
            .stored_procedure("GetOrder")
            .execute_reader(|reader| reader.get(0).map(|_| ()))
            .await
            .unwrap_err();
        assert!(matches!(err, SprocketError::Reader(_)));
    }

    #[tokio::test]
    async fn test_reader_moves_between_result_sets() {
        let provider = provider().with_response(
            "dbo.GetOrder",
            MockResponse::default()
                .result_set(orders())
                .result_set(ResultSet::from_values(&["total"], vec![vec![Value::Int64(2)]])),
        );
        let mut conn = connection(&provider);

        let mut total = Value::Null;
        conn.stored_procedure("GetOrder")
            .execute_reader(|reader| {
                assert!(reader.next_result()?);
                assert_eq!(reader.ordinal("total"), Some(0));
                if reader.read()? {
                    total = reader.get(0)?;
                }
                assert!(!reader.next_result()?);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(total, Value::Int64(2));
    }
}

mod text_command_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_text_command_binds_by_name() {
        let provider = MockProvider::new().with_response(
            "update orders set note = @note where id = @id",
            MockResponse::default().rows_affected(3),
        );
        let mut conn = connection(&provider);

        let sql = "update orders set note = @note where id = @id";
        let mut cmd = conn.text_command(sql);
        cmd.add_in_parameter("@note", Value::Null)
            .add_in_parameter("@id", 9);
        let rows = cmd.execute_non_query().await.unwrap();
        drop(cmd);

        assert_eq!(rows, 3);
        assert_eq!(conn.last_sql(), sql);
        assert_eq!(provider.discovery_count(), 0);

        let sent = &provider.executed()[0].command;
        assert_eq!(sent.kind, CommandKind::Text);
        let names: Vec<&str> = sent.parameters.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["note", "id"]);
        assert_eq!(sent.parameters[0].value, Some(Value::Null));
        assert!(sent.return_parameter().is_none());
    }

    #[tokio::test]
    async fn test_execute_command_shortcut() {
        let provider = MockProvider::new()
            .with_response("delete from carts", MockResponse::default().rows_affected(5));
        let mut conn = connection(&provider);

        let rows = conn.execute_command("delete from carts", []).await.unwrap();
        assert_eq!(rows, 5);
    }
}

mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_driver_failure_carries_statement() {
        let provider = provider();
        provider.fail_next(1, DriverError::fatal("Violation of PRIMARY KEY constraint").with_code(2627));
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("GetOrder");
        cmd.add_in_parameter("@orderId", 42);
        let err = cmd.execute_non_query().await.unwrap_err();

        assert_eq!(err.statement(), Some("exec dbo.GetOrder\n\t@orderId=42\n"));
        assert_eq!(err.driver_error().and_then(|e| e.code), Some(2627));
        assert!(!err.is_transient());
        assert!(cmd.return_value().is_none());
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_not_an_execution_error() {
        let provider = MockProvider::new();
        let mut conn = connection(&provider);

        let err = conn
            .stored_procedure("Missing")
            .execute_non_query()
            .await
            .unwrap_err();

        assert!(matches!(err, SprocketError::ParameterDiscovery { .. }));
        assert_eq!(provider.execution_count(), 0);
        assert_eq!(conn.last_sql(), "");
    }

    #[tokio::test]
    async fn test_bad_guid_is_a_bind_error() {
        let provider = MockProvider::new().with_procedure(
            "dbo.GetUser",
            vec![ParameterDescriptor::input("@userId", DataType::Guid)],
        );
        let mut conn = connection(&provider);

        let mut cmd = conn.stored_procedure("GetUser");
        cmd.add_in_parameter("@userId", "not-a-guid");
        let err = cmd.execute_non_query().await.unwrap_err();

        assert!(matches!(err, SprocketError::Bind { .. }));
        assert_eq!(provider.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_swallowing_handler_yields_neutral_results() {
        let provider = provider();
        provider.fail_next(2, DriverError::fatal("boom"));
        let mut conn = connection(&provider).with_failure_handler(Arc::new(LogAndSwallow));

        let rows = conn.stored_procedure("GetOrder").execute_non_query().await;
        assert_eq!(rows.unwrap(), -1);

        let value = conn.stored_procedure("GetOrder").execute_scalar().await;
        assert_eq!(value.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_closure_handler_decides_per_error() {
        let provider = provider();
        provider.fail_next(1, DriverError::transient("deadlocked").with_code(1205));
        provider.fail_next(1, DriverError::fatal("bad"));
        let handler = |err: &SprocketError| {
            if err.is_transient() {
                FailureDecision::Swallow
            } else {
                FailureDecision::Propagate
            }
        };
        let mut conn = connection(&provider).with_failure_handler(Arc::new(handler));

        assert_eq!(
            conn.stored_procedure("GetOrder").execute_non_query().await.unwrap(),
            -1
        );
        assert!(conn.stored_procedure("GetOrder").execute_non_query().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let provider = provider().with_latency(Duration::from_secs(5));
        let mut conn = connection(&provider).with_command_timeout(Duration::from_secs(1));

        let err = conn
            .stored_procedure("GetOrder")
            .execute_non_query()
            .await
            .unwrap_err();

        match &err {
            SprocketError::Execution { source, .. } => {
                assert!(matches!(**source, SprocketError::Timeout(_)));
            }
            other => panic!("expected execution error, got {:?}", other),
        }
        assert!(err.is_transient());
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_waits_indefinitely() {
        let provider = provider().with_latency(Duration::from_secs(600));
        let mut conn = connection(&provider);

        let rows = conn
            .stored_procedure("GetOrder")
            .with_timeout(Duration::ZERO)
            .execute_non_query()
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
