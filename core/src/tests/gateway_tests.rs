use super::*;
use shared::api::SqlRequest;
use tempfile::TempDir;

fn spawn_test_gateway() -> (TempDir, GatewayHandle) {
    let temp_dir = TempDir::new().unwrap();
    let (handle, _join) = spawn(temp_dir.path().join("zubot.db"), 5_000, 100).unwrap();
    (temp_dir, handle)
}

#[tokio::test]
async fn execute_sql_runs_select_against_initialized_schema() {
    let (_dir, handle) = spawn_test_gateway();

    let response = handle
        .execute_sql(SqlRequest {
            sql: "SELECT COUNT(*) FROM task_profiles".to_string(),
            params: vec![],
            read_only: true,
            max_rows: None,
        })
        .await
        .unwrap();

    assert_eq!(response.columns.len(), 1);
    assert_eq!(response.rows, vec![vec![serde_json::json!(0)]]);
    assert!(!response.truncated);
}

#[tokio::test]
async fn execute_sql_rejects_write_statement_when_read_only() {
    let (_dir, handle) = spawn_test_gateway();

    let result = handle
        .execute_sql(SqlRequest {
            sql: "DELETE FROM task_profiles".to_string(),
            params: vec![],
            read_only: true,
            max_rows: None,
        })
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn execute_sql_allows_write_when_not_read_only() {
    let (_dir, handle) = spawn_test_gateway();

    let response = handle
        .execute_sql(SqlRequest {
            sql: "INSERT INTO task_profiles (task_id, kind, entrypoint, timeout_sec) VALUES ('t1', 'script', 'run.sh', 30)".to_string(),
            params: vec![],
            read_only: false,
            max_rows: None,
        })
        .await
        .unwrap();

    assert_eq!(response.row_count, 1);
    assert!(response.columns.is_empty());
}

#[tokio::test]
async fn execute_sql_truncates_at_max_rows() {
    let (_dir, handle) = spawn_test_gateway();

    for i in 0..5 {
        handle
            .execute_sql(SqlRequest {
                sql: format!(
                    "INSERT INTO task_profiles (task_id, kind, entrypoint, timeout_sec) VALUES ('t{i}', 'script', 'run.sh', 30)"
                ),
                params: vec![],
                read_only: false,
                max_rows: None,
            })
            .await
            .unwrap();
    }

    let response = handle
        .execute_sql(SqlRequest {
            sql: "SELECT task_id FROM task_profiles ORDER BY task_id".to_string(),
            params: vec![],
            read_only: true,
            max_rows: Some(2),
        })
        .await
        .unwrap();

    assert_eq!(response.row_count, 2);
    assert!(response.truncated);
}

#[tokio::test]
async fn execute_sql_supports_bound_parameters() {
    let (_dir, handle) = spawn_test_gateway();

    handle
        .execute_sql(SqlRequest {
            sql: "INSERT INTO task_profiles (task_id, kind, entrypoint, timeout_sec) VALUES (?1, 'script', 'run.sh', ?2)".to_string(),
            params: vec![serde_json::json!("t1"), serde_json::json!(45)],
            read_only: false,
            max_rows: None,
        })
        .await
        .unwrap();

    let response = handle
        .execute_sql(SqlRequest {
            sql: "SELECT timeout_sec FROM task_profiles WHERE task_id = ?1".to_string(),
            params: vec![serde_json::json!("t1")],
            read_only: true,
            max_rows: None,
        })
        .await
        .unwrap();

    assert_eq!(response.rows, vec![vec![serde_json::json!(45)]]);
}

#[tokio::test]
async fn execute_sql_rejects_invalid_sql() {
    let (_dir, handle) = spawn_test_gateway();

    let result = handle
        .execute_sql(SqlRequest {
            sql: "NOT VALID SQL".to_string(),
            params: vec![],
            read_only: true,
            max_rows: None,
        })
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn with_connection_runs_typed_store_operation_on_writer() {
    let (_dir, handle) = spawn_test_gateway();

    let task_id = handle
        .with_connection(|conn| {
            crate::store::profiles::upsert(
                conn,
                &shared::model::TaskProfile {
                    task_id: "t1".to_string(),
                    kind: shared::model::TaskKind::Script,
                    entrypoint: "run.sh".to_string(),
                    queue_group: None,
                    timeout_sec: 30,
                    retry_policy: shared::model::RetryPolicy { max_attempts: 1 },
                    enabled: true,
                },
            )?;
            Ok("t1".to_string())
        })
        .await
        .unwrap();

    assert_eq!(task_id, "t1");

    let response = handle
        .execute_sql(SqlRequest {
            sql: "SELECT task_id FROM task_profiles".to_string(),
            params: vec![],
            read_only: true,
            max_rows: None,
        })
        .await
        .unwrap();
    assert_eq!(response.rows, vec![vec![serde_json::json!("t1")]]);
}
