//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use sprocket_connection::{DataConfig, DatabaseFactory};
use sprocket_core::testing::{MockProvider, MockResponse};
use sprocket_core::{DataType, ParameterDescriptor, ParameterDirection};

pub const ORDERS_CONNECTION: &str = "Server=tcp:orders.test,1433;Database=orders";

/// Provider knowing `dbo.SaveOrder(@orderId int, @modifiedBy int, @total decimal output)`
/// and `dbo.AuditEvent(@event nvarchar, @computerName nvarchar, @wasError bit)`.
pub fn orders_provider() -> MockProvider {
    initialize_logging();
    MockProvider::new()
        .with_procedure(
            "dbo.SaveOrder",
            vec![
                ParameterDescriptor::input("@orderId", DataType::Int32).with_ordinal(1),
                ParameterDescriptor::input("@modifiedBy", DataType::Int32).with_ordinal(2),
                ParameterDescriptor::new("@total", ParameterDirection::InputOutput, DataType::Decimal)
                    .with_precision(18, 2)
                    .with_ordinal(3),
            ],
        )
        .with_procedure(
            "dbo.AuditEvent",
            vec![
                ParameterDescriptor::input("@event", DataType::String).with_ordinal(1),
                ParameterDescriptor::input("@computerName", DataType::String).with_ordinal(2),
                ParameterDescriptor::input("@wasError", DataType::Boolean).with_ordinal(3),
            ],
        )
        .with_response("dbo.SaveOrder", MockResponse::default().rows_affected(1))
}

pub fn orders_config() -> DataConfig {
    DataConfig::default()
        .with_connection_string("orders", ORDERS_CONNECTION)
        .with_alias("sales", "orders")
}

pub fn orders_factory(provider: &MockProvider) -> DatabaseFactory {
    DatabaseFactory::new(orders_config(), Arc::new(provider.clone()))
}

/// Route tracing output to the test harness; filter with `RUST_LOG`.
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("sprocket=debug".parse().expect("valid directive")),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
