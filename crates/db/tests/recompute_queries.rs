//! Database-backed tests for the queries the recompute pipeline relies on.
//!
//! Need a PostgreSQL server: `DATABASE_URL=... cargo test -p annotally-db -- --ignored`.

use annotally_core::labeling::{TaskCounts, TaskLabelState};
use annotally_core::types::DbId;
use annotally_db::bulk_update::{bulk_update, BulkUpdateError, TASK_STATE_FIELDS};
use annotally_db::models::annotation::CreateAnnotation;
use annotally_db::models::prediction::CreatePrediction;
use annotally_db::models::project::CreateProject;
use annotally_db::models::task::CreateTask;
use annotally_db::repositories::{
    AnnotationRepo, PredictionRepo, ProjectRepo, TaskCounterRepo, TaskRepo,
};
use serde_json::json;
use sqlx::PgPool;

async fn project(pool: &PgPool) -> DbId {
    ProjectRepo::create(
        pool,
        &CreateProject {
            title: "Counters".to_string(),
            maximum_annotations: Some(2),
            overlap_cohort_percentage: Some(100),
            use_overlap: Some(true),
        },
    )
    .await
    .unwrap()
    .id
}

async fn tasks(pool: &PgPool, project_id: DbId, data: &[serde_json::Value]) -> Vec<DbId> {
    let inputs: Vec<CreateTask> = data
        .iter()
        .map(|d| CreateTask { data: d.clone() })
        .collect();
    TaskRepo::create_batch(pool, project_id, &inputs)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect()
}

/// `count` tasks with distinct payloads.
async fn numbered(pool: &PgPool, project_id: DbId, count: usize) -> Vec<DbId> {
    let data: Vec<_> = (1..=count).map(|n| json!({ "n": n })).collect();
    tasks(pool, project_id, &data).await
}

async fn annotate(pool: &PgPool, task_id: DbId, was_cancelled: bool) -> DbId {
    AnnotationRepo::create(
        pool,
        &CreateAnnotation {
            task_id,
            result: json!([]),
            was_cancelled,
            ground_truth: false,
            completed_by: None,
        },
    )
    .await
    .unwrap()
    .id
}

async fn predict(pool: &PgPool, task_id: DbId, result: serde_json::Value) {
    PredictionRepo::create(
        pool,
        &CreatePrediction {
            task_id,
            result,
            model_version: "v1".to_string(),
            score: None,
        },
    )
    .await
    .unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn aggregate_counts_active_cancelled_and_predictions(pool: PgPool) {
    let p = project(&pool).await;
    let ids = tasks(&pool, p, &[json!({"n": 1}), json!({"n": 2})]).await;
    annotate(&pool, ids[0], false).await;
    annotate(&pool, ids[0], true).await;
    predict(&pool, ids[0], json!([])).await;

    let rows = TaskCounterRepo::aggregate(&pool, &ids).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].counts(),
        TaskCounts {
            total_annotations: 1,
            cancelled_annotations: 1,
            total_predictions: 1,
        }
    );
    assert_eq!(rows[1].counts(), TaskCounts::default());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn find_stale_reports_only_disagreeing_tasks(pool: PgPool) {
    let p = project(&pool).await;
    let ids = numbered(&pool, p, 3).await;
    annotate(&pool, ids[2], false).await;

    let stale = TaskCounterRepo::find_stale(&pool, &ids).await.unwrap();
    assert_eq!(stale, vec![ids[2]]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn find_stale_reports_label_disagreeing_with_cohort(pool: PgPool) {
    let p = project(&pool).await;
    let ids = tasks(&pool, p, &[json!({"n": 1})]).await;
    annotate(&pool, ids[0], false).await;
    let labeled = TaskLabelState {
        task_id: ids[0],
        overlap: 1,
        counts: TaskCounts {
            total_annotations: 1,
            cancelled_annotations: 0,
            total_predictions: 0,
        },
        is_labeled: true,
    };
    bulk_update(&pool, &[labeled], TASK_STATE_FIELDS, 10)
        .await
        .unwrap();
    let stale = TaskCounterRepo::find_stale(&pool, &ids).await.unwrap();
    assert!(stale.is_empty());

    // Cohort members need `maximum_annotations` (2) active annotations.
    TaskRepo::set_overlap(&pool, p, &ids, 2).await.unwrap();

    let stale = TaskCounterRepo::find_stale(&pool, &ids).await.unwrap();
    assert_eq!(stale, ids);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn bulk_update_writes_states_across_batches(pool: PgPool) {
    let p = project(&pool).await;
    let ids = numbered(&pool, p, 3).await;

    let states: Vec<TaskLabelState> = ids
        .iter()
        .enumerate()
        .map(|(i, &task_id)| TaskLabelState {
            task_id,
            overlap: 1,
            counts: TaskCounts {
                total_annotations: i as i32,
                cancelled_annotations: 0,
                total_predictions: 0,
            },
            is_labeled: i > 0,
        })
        .collect();

    let updated = bulk_update(&pool, &states, TASK_STATE_FIELDS, 2)
        .await
        .unwrap();
    assert_eq!(updated, 3);

    let stored = TaskRepo::list_states(&pool, &ids).await.unwrap();
    let stored: Vec<TaskLabelState> = stored.into_iter().map(TaskLabelState::from).collect();
    assert_eq!(stored, states);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn bulk_update_rejects_unknown_field(pool: PgPool) {
    let p = project(&pool).await;
    let ids = tasks(&pool, p, &[json!({})]).await;
    let states: Vec<TaskLabelState> = TaskRepo::list_states(&pool, &ids)
        .await
        .unwrap()
        .into_iter()
        .map(TaskLabelState::from)
        .collect();

    let err = bulk_update(&pool, &states, &["labeled"], 10)
        .await
        .unwrap_err();
    assert!(matches!(err, BulkUpdateError::UnknownField { .. }));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn overlap_changes_move_tasks_between_partitions(pool: PgPool) {
    let p = project(&pool).await;
    let ids = numbered(&pool, p, 3).await;

    let changed = TaskRepo::set_overlap(&pool, p, &ids[..2], 3).await.unwrap();
    assert_eq!(changed, 2);
    // Setting the same value again touches nothing.
    let unchanged = TaskRepo::set_overlap(&pool, p, &ids[..2], 3).await.unwrap();
    assert_eq!(unchanged, 0);

    let (cohort, others) = TaskRepo::cohort_partition(&pool, p).await.unwrap();
    assert_eq!(cohort, ids[..2].to_vec());
    assert_eq!(others, vec![ids[2]]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn merge_moves_rows_onto_lowest_duplicate(pool: PgPool) {
    let p = project(&pool).await;
    let ids = tasks(
        &pool,
        p,
        &[json!({"t": "a"}), json!({"t": "b"}), json!({"t": "a"})],
    )
    .await;
    let annotation = annotate(&pool, ids[2], false).await;
    predict(&pool, ids[2], json!([])).await;

    let groups = TaskRepo::find_duplicate_groups(&pool, p).await.unwrap();
    assert_eq!(groups, vec![vec![ids[0], ids[2]]]);

    let deleted = TaskRepo::merge_into(&pool, p, ids[0], &[ids[2]])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    let remaining = TaskRepo::list_ids_by_project(&pool, p).await.unwrap();
    assert_eq!(remaining, ids[..2].to_vec());

    let moved = AnnotationRepo::find_by_id(&pool, annotation)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.task_id, ids[0]);
    let predictions = PredictionRepo::list_by_task(&pool, ids[0]).await.unwrap();
    assert_eq!(predictions.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn predictions_copy_newest_result(pool: PgPool) {
    let p = project(&pool).await;
    let ids = tasks(&pool, p, &[json!({"n": 1}), json!({"n": 2})]).await;
    predict(&pool, ids[0], json!(["old"])).await;
    predict(&pool, ids[0], json!(["new"])).await;

    let created = AnnotationRepo::create_from_predictions(&pool, p, &ids, Some(5))
        .await
        .unwrap();
    assert_eq!(created, 1);

    let annotations = AnnotationRepo::list_by_task(&pool, ids[0]).await.unwrap();
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].result, json!(["new"]));
    assert_eq!(annotations[0].completed_by, Some(5));
    assert!(!annotations[0].was_cancelled);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn deleting_tasks_cascades(pool: PgPool) {
    let p = project(&pool).await;
    let ids = tasks(&pool, p, &[json!({"n": 1})]).await;
    let annotation = annotate(&pool, ids[0], false).await;

    let deleted = TaskRepo::delete_by_ids(&pool, p, &ids).await.unwrap();
    assert_eq!(deleted, 1);
    let orphan = AnnotationRepo::find_by_id(&pool, annotation).await.unwrap();
    assert!(orphan.is_none());
}
