use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use routeslip_core::domain::{ApproverId, DocumentTypeKey, OverallStatus, StudentId};
use routeslip_core::errors::ApprovalError;
use routeslip_core::flows::ApproverAction;
use routeslip_core::gateway::DocumentGateway;
use routeslip_core::round_log::ManualClock;
use routeslip_core::service::ApprovalService;
use routeslip_db::{connect_with_settings, migrations, SqlChainSource, SqlDocumentGateway};

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("routeslip.db").display())
}

async fn service_on(
    url: &str,
    clock: Arc<ManualClock>,
) -> ApprovalService<SqlDocumentGateway, SqlChainSource> {
    let pool = connect_with_settings(url, 4, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    let chains = SqlChainSource::new(pool.clone());
    chains
        .put_chain(
            &DocumentTypeKey("Bonafide Certificate".to_string()),
            &["faculty@dts.com".to_string(), "dtshod@dts.com".to_string()],
        )
        .await
        .expect("seed chain");
    ApprovalService::new(SqlDocumentGateway::new(pool), chains).with_clock(clock)
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_decisions_on_a_shared_file_commit_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    let service = Arc::new(service_on(&url, clock()).await);
    let id = service
        .submit(
            &StudentId("stu-1".to_string()),
            &DocumentTypeKey("Bonafide Certificate".to_string()),
        )
        .await
        .expect("submit")
        .document_id;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            let id = id.clone();
            tokio::spawn(async move {
                service
                    .act(&ApproverId::new("faculty@dts.com"), &id, ApproverAction::Approve, "")
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.expect("task joins"));
    }

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().err())
        .all(|error| matches!(error, ApprovalError::AlreadyActed { .. })));

    let document = service.gateway().get(&id).await.expect("get").expect("exists");
    assert_eq!(document.current_index, 1);
    assert_eq!(document.log.len(), 2);
}

#[tokio::test]
async fn documents_survive_reopening_the_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    let clock = clock();

    let id = {
        let service = service_on(&url, clock.clone()).await;
        let id = service
            .submit(
                &StudentId("stu-1".to_string()),
                &DocumentTypeKey("Bonafide Certificate".to_string()),
            )
            .await
            .expect("submit")
            .document_id;
        clock.advance(Duration::minutes(2));
        service
            .act(
                &ApproverId::new("faculty@dts.com"),
                &id,
                ApproverAction::Reject,
                "Wrong semester",
            )
            .await
            .expect("reject");
        service.gateway().pool().close().await;
        id
    };

    let reopened = service_on(&url, clock).await;
    let document = reopened.gateway().get(&id).await.expect("get").expect("exists");

    assert_eq!(document.overall_status, OverallStatus::Rejected);
    assert_eq!(document.log.len(), 2);
    assert_eq!(document.log[1].comment, "Wrong semester");
}
