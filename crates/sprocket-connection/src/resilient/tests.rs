//! Tests for the resilient module

use super::*;
use std::time::Duration;

mod backoff_tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_100ms() {
        let backoff = BackoffStrategy::default();
        for retry in 0..5 {
            assert_eq!(backoff.calculate_delay(retry), Duration::from_millis(100));
        }
        assert_eq!(backoff.multiplier(), 1.0);
        assert!(!backoff.has_jitter());
    }

    #[test]
    fn test_exponential_growth() {
        let backoff = BackoffStrategy::new(100, 30_000);

        assert_eq!(backoff.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(backoff.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(backoff.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(backoff.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_growth_is_capped() {
        let backoff = BackoffStrategy::new(100, 1000);
        assert_eq!(backoff.calculate_delay(10), Duration::from_millis(1000));
        assert_eq!(backoff.calculate_delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_custom_multiplier() {
        let backoff = BackoffStrategy::new(100, 30_000).with_multiplier(3.0);
        assert_eq!(backoff.calculate_delay(1), Duration::from_millis(300));
        assert_eq!(backoff.calculate_delay(2), Duration::from_millis(900));
    }

    #[test]
    fn test_multiplier_minimum() {
        let backoff = BackoffStrategy::new(100, 1000).with_multiplier(0.5);
        assert_eq!(backoff.multiplier(), 1.0);
    }

    #[test]
    fn test_max_at_least_initial() {
        let backoff = BackoffStrategy::new(1000, 100);
        assert_eq!(backoff.max_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let backoff = BackoffStrategy::fixed(1000).with_jitter(true);
        for _ in 0..50 {
            let delay = backoff.calculate_delay(0);
            assert!(
                delay >= Duration::from_millis(750) && delay <= Duration::from_millis(1250),
                "Delay {:?} should be between 750ms and 1250ms",
                delay
            );
        }
    }

    #[test]
    fn test_none_never_waits() {
        let backoff = BackoffStrategy::none().with_jitter(true);
        assert_eq!(backoff.calculate_delay(3), Duration::ZERO);
    }
}

mod policy_tests {
    use super::*;
    use sprocket_core::{DriverError, SprocketError};

    fn transient() -> SprocketError {
        SprocketError::Driver(DriverError::transient("deadlocked").with_code(1205))
    }

    fn fatal() -> SprocketError {
        SprocketError::Driver(DriverError::fatal("constraint").with_code(547))
    }

    #[test]
    fn test_transient_only() {
        let policy = RetryPolicy::TransientOnly;
        assert!(policy.should_retry(&transient()));
        assert!(policy.should_retry(&SprocketError::Timeout("slow".into())));
        assert!(!policy.should_retry(&fatal()));
        assert!(!policy.should_retry(&SprocketError::Bind {
            parameter: "@id".into(),
            message: "bad".into(),
        }));
    }

    #[test]
    fn test_classification_follows_wrapped_source() {
        let policy = RetryPolicy::TransientOnly;
        assert!(policy.should_retry(&SprocketError::execution("exec dbo.X\n", "dbo.[X]", transient())));
        assert!(!policy.should_retry(&SprocketError::execution("exec dbo.X\n", "dbo.[X]", fatal())));
    }

    #[test]
    fn test_all_retries_fatal_failures() {
        assert!(RetryPolicy::All.should_retry(&fatal()));
    }

    #[test]
    fn test_cancellation_is_never_retried() {
        assert!(!RetryPolicy::All.should_retry(&SprocketError::Cancelled));
        assert!(!RetryPolicy::TransientOnly.should_retry(&SprocketError::Cancelled));
    }

    #[test]
    fn test_policy_names_in_config() {
        #[derive(serde::Deserialize)]
        struct Section {
            policy: RetryPolicy,
        }
        let section: Section = toml::from_str("policy = \"all\"").unwrap();
        assert_eq!(section.policy, RetryPolicy::All);
        let section: Section = toml::from_str("policy = \"transient_only\"").unwrap();
        assert_eq!(section.policy, RetryPolicy::TransientOnly);
    }
}

mod executor_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sprocket_core::testing::{MockProvider, MockResponse};
    use sprocket_core::{DataType, DriverError, ParameterDescriptor, ResultSet, SprocketError, Value};
    use sprocket_query::ParameterCatalog;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    use crate::connection::DbConnection;
    use crate::failure::{FailureDecision, FailureHandler};

    fn provider() -> MockProvider {
        MockProvider::new()
            .with_procedure(
                "dbo.SaveOrder",
                vec![ParameterDescriptor::input("@orderId", DataType::Int32)],
            )
            .with_response("dbo.SaveOrder", MockResponse::default().rows_affected(1))
    }

    fn template(provider: &MockProvider) -> DbConnection {
        DbConnection::without_defaults(
            Arc::new(provider.clone()),
            ParameterCatalog::shared(),
            "Server=test",
        )
    }

    /// Counts the failures it is shown and answers with `decision`.
    struct CountingHandler {
        seen: AtomicUsize,
        decision: FailureDecision,
    }

    impl CountingHandler {
        fn new(decision: FailureDecision) -> Arc<Self> {
            Arc::new(Self {
                seen: AtomicUsize::new(0),
                decision,
            })
        }

        fn seen(&self) -> usize {
            self.seen.load(Ordering::SeqCst)
        }
    }

    impl FailureHandler for CountingHandler {
        fn on_failure(&self, _error: &SprocketError) -> FailureDecision {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.decision
        }
    }

    fn deadlock() -> DriverError {
        DriverError::transient("Transaction was deadlocked").with_code(1205)
    }

    #[test]
    fn test_attempts_are_at_least_one() {
        assert_eq!(ResilientExecutor::new(0, BackoffStrategy::none()).max_attempts(), 1);
        let executor = ResilientExecutor::default();
        assert_eq!(executor.max_attempts(), 3);
        assert_eq!(executor.policy(), RetryPolicy::TransientOnly);
        assert_eq!(executor.backoff(), &BackoffStrategy::fixed(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let provider = provider();
        let executor = ResilientExecutor::default();

        let mut inspected = 0;
        let rows = executor
            .execute_non_query(
                &template(&provider),
                "",
                "SaveOrder",
                |cmd| {
                    cmd.add_in_parameter("@orderId", 42);
                },
                |cmd| {
                    inspected += 1;
                    assert_eq!(cmd.return_value(), Some(&Value::Int32(0)));
                },
            )
            .await
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(inspected, 1);
        assert_eq!(provider.execution_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let provider = provider();
        provider.fail_next(1, deadlock());
        let executor = ResilientExecutor::default();

        let mut builds = 0;
        let rows = executor
            .execute_non_query(
                &template(&provider),
                "dbo",
                "SaveOrder",
                |cmd| {
                    builds += 1;
                    cmd.add_in_parameter("@orderId", 42);
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(builds, 2);
        assert_eq!(provider.execution_count(), 2);
        assert_eq!(provider.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_bounded() {
        let provider = provider();
        provider.fail_next(10, deadlock());
        let executor = ResilientExecutor::default();

        let err = executor
            .execute_non_query(&template(&provider), "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap_err();

        match &err {
            SprocketError::RetriesExhausted { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert_eq!(last.driver_error().and_then(|e| e.code), Some(1205));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
        assert_eq!(provider.execution_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let provider = provider();
        provider.fail_next(2, deadlock());
        let executor = ResilientExecutor::new(3, BackoffStrategy::fixed(250));

        let started = tokio::time::Instant::now();
        executor
            .execute_non_query(&template(&provider), "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(600),
            "two waits of 250ms took {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let provider = provider();
        provider.fail_next(1, DriverError::fatal("constraint").with_code(547));
        let executor = ResilientExecutor::default();

        let err = executor
            .execute_non_query(&template(&provider), "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, SprocketError::Execution { .. }));
        assert_eq!(provider.execution_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_everything_policy() {
        let provider = provider();
        provider.fail_next(1, DriverError::fatal("constraint").with_code(547));
        let executor = ResilientExecutor::default().with_policy(RetryPolicy::All);

        let rows = executor
            .execute_non_query(&template(&provider), "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(provider.execution_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let provider = provider();
        let token = CancellationToken::new();
        token.cancel();
        let executor = ResilientExecutor::default().with_cancellation(token);

        let err = executor
            .execute_scalar(&template(&provider), "", "SaveOrder", |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, SprocketError::Cancelled));
        assert_eq!(provider.execution_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let provider = provider();
        provider.fail_next(10, deadlock());
        let token = CancellationToken::new();
        let executor =
            ResilientExecutor::new(5, BackoffStrategy::fixed(60_000)).with_cancellation(token.clone());

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = executor
            .execute_non_query(&template(&provider), "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap_err();
        cancel.await.unwrap();

        assert!(matches!(err, SprocketError::Cancelled));
        assert_eq!(provider.execution_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_callback_runs_per_successful_attempt() {
        let provider = provider().with_response(
            "dbo.SaveOrder",
            MockResponse::default().result_set(ResultSet::from_values(
                &["id"],
                vec![vec![Value::Int32(1)], vec![Value::Int32(2)]],
            )),
        );
        provider.fail_next(1, deadlock());
        let executor = ResilientExecutor::default();

        let mut ids = Vec::new();
        executor
            .execute_reader(
                &template(&provider),
                "",
                "SaveOrder",
                |_| {},
                |reader| {
                    ids.clear();
                    while reader.read()? {
                        ids.push(reader.get(0)?);
                    }
                    Ok(())
                },
            )
            .await
            .unwrap();

        assert_eq!(ids, vec![Value::Int32(1), Value::Int32(2)]);
        assert_eq!(provider.execution_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_run_on_clones_of_the_template() {
        let provider = provider();
        provider.fail_next(1, deadlock());
        let mut template = template(&provider);
        template
            .add_persistent_default_parameter("@orderId", 7)
            .add_default_parameter("@ignored", 1);
        let executor = ResilientExecutor::default();

        executor
            .execute_non_query(&template, "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap();

        for executed in provider.executed() {
            assert!(!executed.in_transaction);
            let param = executed.command.parameter("@orderId").unwrap();
            assert_eq!(param.value, Some(Value::Int32(7)));
        }
        assert_eq!(template.last_sql(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_only_sees_the_final_failure() {
        let provider = provider();
        provider.fail_next(10, deadlock());
        let handler = CountingHandler::new(FailureDecision::Propagate);
        let template = template(&provider).with_failure_handler(handler.clone());

        let err = ResilientExecutor::default()
            .execute_non_query(&template, "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, SprocketError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(provider.execution_count(), 3);
        assert_eq!(handler.seen(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_is_silent_when_a_retry_succeeds() {
        let provider = provider();
        provider.fail_next(2, deadlock());
        let handler = CountingHandler::new(FailureDecision::Propagate);
        let template = template(&provider).with_failure_handler(handler.clone());

        let rows = ResilientExecutor::default()
            .execute_non_query(&template, "", "SaveOrder", |_| {}, |_| {})
            .await
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(handler.seen(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swallowing_handler_applies_after_the_budget() {
        let provider = provider();
        provider.fail_next(10, deadlock());
        let handler = CountingHandler::new(FailureDecision::Swallow);
        let template = template(&provider).with_failure_handler(handler.clone());

        let value = ResilientExecutor::default()
            .execute_scalar(&template, "", "SaveOrder", |_| {})
            .await
            .unwrap();

        assert_eq!(value, Value::Null);
        assert_eq!(provider.execution_count(), 3);
        assert_eq!(handler.seen(), 1);
    }
}
