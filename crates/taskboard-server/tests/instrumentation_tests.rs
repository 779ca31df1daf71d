//! Integration tests for the instrumentation chain
//!
//! These tests verify:
//! - Every instrumented call produces exactly one audit record
//! - Business results and failures reach the caller unchanged
//! - Recording failures never leak into business calls
//! - TOML and code declarations resolve identically

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::{sync::Arc, time::Duration};

use taskboard_server::{
    arguments,
    audit::{
        AuditEntry, AuditRecord, AuditSink, AuditSinkConfig, AuditStatistics, AuditStore,
        AuditWorker, MemoryAuditStore, OperationResult,
    },
    instrument::{
        AuditSettings, ConfigRegistry, ConfigResolver, Declaration, Instrumented, InterceptorChain,
        Invocation, PerformanceSettings, RequestMeta, Session, UnitDeclaration,
    },
    InstrumentError,
};

// ============================================================================
// Helper Functions
// ============================================================================

const TASK_SERVICE: &str = "TaskService";

#[derive(Debug, thiserror::Error)]
enum TaskError {
    #[error("Task title must not be empty")]
    EmptyTitle,
}

/// A business service with no knowledge of instrumentation
#[derive(Debug, Default)]
struct TaskService;

impl TaskService {
    async fn create_task(
        &self,
        title: &str,
        _description: Option<&str>,
        _due: DateTime<Utc>,
        _group_id: i64,
    ) -> Result<u64, TaskError> {
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        Ok(7)
    }

    async fn summary(&self) -> Result<String, TaskError> {
        Ok("3 open tasks".to_string())
    }
}

fn task_registry() -> ConfigRegistry {
    ConfigRegistry::builder()
        .unit(
            TASK_SERVICE,
            UnitDeclaration::new()
                .performance(PerformanceSettings::with_threshold(1500))
                .operation(
                    "createTask",
                    Declaration::new().audit(AuditSettings::described("Create Task").with_parameters()),
                )
                .operation(
                    "summary",
                    Declaration::new().audit(AuditSettings::default().with_return_value()),
                ),
        )
        .build()
}

struct Harness {
    service: Instrumented<TaskService>,
    worker: AuditWorker,
}

fn harness(store: Arc<dyn AuditStore>) -> Harness {
    let (sink, worker) = AuditSink::spawn(AuditSinkConfig::default(), Some(store));
    let chain = InterceptorChain::standard(Arc::new(ConfigResolver::new(task_registry())), sink);
    Harness {
        service: Instrumented::new(TASK_SERVICE, TaskService, chain),
        worker,
    }
}

/// Poll until the store holds `count` entries or the timeout expires
async fn wait_for(store: &MemoryAuditStore, count: usize) -> Vec<AuditEntry> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.len() < count && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    store.snapshot().unwrap()
}

fn due_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 5, 1, 10, 0, 0).unwrap()
}

fn signed_in_request() -> Arc<RequestMeta> {
    let mut meta = RequestMeta {
        peer_addr: Some("192.168.1.20:40000".parse().unwrap()),
        session: Some(Session {
            id: "sess-42".to_string(),
            user_id: Some(42),
            username: Some("alice".to_string()),
        }),
        ..Default::default()
    };
    meta.headers
        .insert("user-agent", "taskboard-web/2.1".parse().unwrap());
    Arc::new(meta)
}

/// Store whose inserts always fail
struct BrokenStore;

#[async_trait]
impl AuditStore for BrokenStore {
    async fn insert(&self, _record: AuditRecord) -> Result<AuditEntry, InstrumentError> {
        Err(InstrumentError::Store("connection refused".to_string()))
    }

    async fn recent(&self, _limit: i64, _offset: i64) -> Result<Vec<AuditEntry>, InstrumentError> {
        Ok(Vec::new())
    }

    async fn by_user(&self, _user_id: i64) -> Result<Vec<AuditEntry>, InstrumentError> {
        Ok(Vec::new())
    }

    async fn by_result(&self, _result: OperationResult) -> Result<Vec<AuditEntry>, InstrumentError> {
        Ok(Vec::new())
    }

    async fn between(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, InstrumentError> {
        Ok(Vec::new())
    }

    async fn slow_operations(&self, _threshold_ms: i64) -> Result<Vec<AuditEntry>, InstrumentError> {
        Ok(Vec::new())
    }

    async fn count_user_operations_since(
        &self,
        _user_id: i64,
        _since: DateTime<Utc>,
    ) -> Result<i64, InstrumentError> {
        Ok(0)
    }

    async fn statistics(&self, _now: DateTime<Utc>) -> Result<AuditStatistics, InstrumentError> {
        Ok(AuditStatistics::from_counts(0, 0, 0, 0, 0))
    }
}

// ============================================================================
// Audit Records
// ============================================================================

#[tokio::test]
async fn test_create_task_is_audited_with_parameters() {
    let store = Arc::new(MemoryAuditStore::new());
    let h = harness(store.clone());

    let id = h
        .service
        .call(
            "createTask",
            arguments!["Buy milk", Option::<String>::None, due_date(), 42],
            Some(signed_in_request()),
            |svc| svc.create_task("Buy milk", None, due_date(), 42),
        )
        .await
        .unwrap();
    assert_eq!(id, 7);

    let entries = wait_for(&store, 1).await;
    assert_eq!(entries.len(), 1);

    let entry = &entries[0];
    assert_eq!(entry.unit_name, "TaskService");
    assert_eq!(entry.operation_name, "createTask");
    assert_eq!(entry.description, "Create Task");
    assert_eq!(
        entry.parameters.as_deref(),
        Some(r#"["Buy milk",null,"2031-05-01T10:00:00Z",42]"#)
    );
    assert_eq!(entry.return_value, None);
    assert_eq!(entry.result, "SUCCESS");
    assert_eq!(entry.error_message, None);
    assert_eq!(entry.user_id, Some(42));
    assert_eq!(entry.username, "alice");
    assert_eq!(entry.user_roles, "USER");
    assert_eq!(entry.ip_address, "192.168.1.20");
    assert_eq!(entry.session_id.as_deref(), Some("sess-42"));
    assert_eq!(entry.user_agent.as_deref(), Some("taskboard-web/2.1"));
    assert!(entry.execution_time_ms >= 0);

    h.worker.shutdown().await;
}

#[tokio::test]
async fn test_failure_reaches_caller_and_is_recorded() {
    let store = Arc::new(MemoryAuditStore::new());
    let h = harness(store.clone());

    let result = h
        .service
        .call(
            "createTask",
            arguments!["", Option::<String>::None, due_date(), 42],
            None,
            |svc| svc.create_task("", None, due_date(), 42),
        )
        .await;
    assert!(matches!(result, Err(TaskError::EmptyTitle)));

    h.worker.shutdown().await;

    let entries = store.snapshot().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result, "FAILURE");
    assert_eq!(
        entries[0].error_message.as_deref(),
        Some("TaskError: Task title must not be empty")
    );
    assert_eq!(entries[0].username, "SYSTEM");
    assert_eq!(entries[0].ip_address, "0.0.0.0");
}

#[tokio::test]
async fn test_return_value_recorded_when_configured() {
    let store = Arc::new(MemoryAuditStore::new());
    let h = harness(store.clone());

    let summary = h
        .service
        .call("summary", arguments![], None, |svc| svc.summary())
        .await
        .unwrap();
    assert_eq!(summary, "3 open tasks");

    h.worker.shutdown().await;

    let entries = store.snapshot().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].return_value.as_deref(), Some("3 open tasks"));
    assert_eq!(entries[0].parameters, None);
    // No description declared: derived from the names
    assert_eq!(entries[0].description, "TaskService Operation");
}

#[tokio::test]
async fn test_one_record_per_call() {
    let store = Arc::new(MemoryAuditStore::new());
    let h = harness(store.clone());

    for _ in 0..5 {
        h.service
            .call("summary", arguments![], None, |svc| svc.summary())
            .await
            .unwrap();
    }

    h.worker.shutdown().await;
    assert_eq!(store.len(), 5);
}

#[tokio::test]
async fn test_passwords_never_reach_the_store() {
    let store = Arc::new(MemoryAuditStore::new());
    let (sink, worker) = AuditSink::spawn(AuditSinkConfig::default(), Some(store.clone()));
    let registry = ConfigRegistry::builder()
        .unit(
            "UserService",
            UnitDeclaration::new().audit(AuditSettings::described("User Login").with_parameters()),
        )
        .build();
    let chain = InterceptorChain::standard(Arc::new(ConfigResolver::new(registry)), sink);

    let invocation = Invocation::new("UserService", "login")
        .with_arguments(arguments!["alice", "password=hunter2"]);
    let signed_in: Result<bool, TaskError> = chain.invoke(invocation, async { Ok(true) }).await;
    assert!(signed_in.unwrap());

    worker.shutdown().await;

    let entries = store.snapshot().unwrap();
    assert_eq!(entries[0].parameters.as_deref(), Some(r#"["alice","[HIDDEN]"]"#));
    assert!(!entries[0].parameters.as_deref().unwrap_or_default().contains("hunter2"));
}

// ============================================================================
// Containment
// ============================================================================

#[tokio::test]
async fn test_broken_store_does_not_affect_business_result() {
    let h = harness(Arc::new(BrokenStore));

    let id = h
        .service
        .call(
            "createTask",
            arguments!["Buy milk", Option::<String>::None, due_date(), 42],
            None,
            |svc| svc.create_task("Buy milk", None, due_date(), 42),
        )
        .await
        .unwrap();
    assert_eq!(id, 7);

    h.worker.shutdown().await;
}

#[tokio::test]
async fn test_stopped_sink_does_not_affect_business_result() {
    let store = Arc::new(MemoryAuditStore::new());
    let h = harness(store.clone());
    h.worker.shutdown().await;

    let summary = h
        .service
        .call("summary", arguments![], None, |svc| svc.summary())
        .await
        .unwrap();

    assert_eq!(summary, "3 open tasks");
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_disabled_audit_still_runs_operation() {
    let store = Arc::new(MemoryAuditStore::new());
    let config = AuditSinkConfig {
        enabled: false,
        ..Default::default()
    };
    let (sink, worker) = AuditSink::spawn(config, Some(store.clone()));
    let chain = InterceptorChain::standard(Arc::new(ConfigResolver::new(task_registry())), sink);
    let service = Instrumented::new(TASK_SERVICE, TaskService, chain);

    let summary = service
        .call("summary", arguments![], None, |svc| svc.summary())
        .await
        .unwrap();

    worker.shutdown().await;
    assert_eq!(summary, "3 open tasks");
    assert!(store.is_empty());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_toml_declarations_match_builder() {
    let from_toml = ConfigRegistry::from_toml_str(
        r#"
        [units.TaskService.performance]
        slow_threshold_ms = 1500

        [units.TaskService.operations.createTask.audit]
        description = "Create Task"
        log_parameters = true

        [units.TaskService.operations.summary.audit]
        log_return_value = true
        "#,
    )
    .unwrap();

    let from_code = task_registry();
    for operation in ["createTask", "summary", "deleteTask"] {
        assert_eq!(
            from_toml.resolve(TASK_SERVICE, operation),
            from_code.resolve(TASK_SERVICE, operation),
            "{} resolved differently",
            operation
        );
    }

    let resolved = from_toml.resolve(TASK_SERVICE, "createTask");
    assert_eq!(resolved.performance.slow_threshold_ms, 1500);
    assert!(!resolved.performance.always_log);
}
