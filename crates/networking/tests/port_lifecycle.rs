//! Single-pass behaviour of the port controller against the fake network.

mod common;

use std::time::Duration;

use common::{condition, key, managed, with_credentials, Harness, SECRET};
use serde_json::json;
use stratus_cluster::Reconcile;
use stratus_core::{ConditionReason, ConditionStatus, ConditionType, Error, HasStatus, Requeue};
use stratus_networking::client::NetworkClient;
use stratus_networking::port::PORT_FINALIZER;
use stratus_networking::Port;
use stratus_progress::{Wait, WaitingReason};

#[tokio::test]
async fn creates_port_records_id_and_becomes_available() {
    let h = Harness::with_credentials().await;
    h.create_port("web", json!({ "description": "frontend", "tags": ["b", "a"] }))
        .await;

    let status = h.port.reconcile_object(&key("web")).await;
    assert!(status.is_ok(), "{status}");

    let port = h.get::<Port>("web").await;
    let id = port.as_ref().and_then(|p| p.status_id().map(ToString::to_string));
    assert!(id.is_some());
    assert!(port.as_ref().is_some_and(HasStatus::is_available));

    let remote = h.network.port(&id.unwrap_or_default()).await;
    assert!(remote.as_ref().is_some_and(|r| r.name == "web" && r.description == "frontend"));
    assert!(remote.is_some_and(|r| r.tags == vec!["a".to_string(), "b".to_string()]));

    assert!(h.finalizers("Port", "web").await.contains(&PORT_FINALIZER.to_string()));
    assert!(h.finalizers("Secret", SECRET).await.contains(&PORT_FINALIZER.to_string()));
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let h = Harness::with_credentials().await;
    h.create_port("web", json!({})).await;

    let _ = h.port.reconcile_object(&key("web")).await;
    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status.is_ok());
    assert_eq!(h.network.calls("create_port").await, 1);
    assert_eq!(h.network.calls("update_port").await, 0);
    assert_eq!(h.network.calls("replace_all_tags").await, 0);
}

#[tokio::test]
async fn missing_credentials_secret_waits_without_remote_calls() {
    let h = Harness::new().await;
    h.create_port("web", json!({})).await;

    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status.waits().any(|w| matches!(
        w,
        Wait::Object { kind, reason: WaitingReason::Creation, .. } if kind == "Secret"
    )));
    assert_eq!(h.network.calls("create_port").await, 0);

    let port = h.get::<Port>("web").await;
    let progressing = port.and_then(|p| condition(&p, ConditionType::Progressing));
    assert!(progressing.is_some_and(|c| c.status == ConditionStatus::True
        && c.reason == ConditionReason::Progressing));
}

#[tokio::test]
async fn secret_without_clouds_yaml_is_terminal_and_not_retried() {
    let h = Harness::new().await;
    h.create_secret(SECRET, false).await;
    h.create_port("web", json!({})).await;

    let requeue = h.port.reconcile(&key("web")).await;
    assert_eq!(requeue, Requeue::Done);

    let port = h.get::<Port>("web").await;
    let progressing = port.and_then(|p| condition(&p, ConditionType::Progressing));
    assert!(progressing.is_some_and(|c| c.status == ConditionStatus::False
        && c.reason == ConditionReason::InvalidConfiguration));

    // The terminal condition holds until the generation changes.
    let status = h.port.reconcile_object(&key("web")).await;
    assert!(status.is_ok());
    assert_eq!(h.network.calls("create_port").await, 0);
}

#[tokio::test]
async fn resource_and_import_together_is_terminal() {
    let h = Harness::with_credentials().await;
    h.create(
        "Port",
        managed("web", json!({ "resource": {}, "import": { "id": "abc" } })),
    )
    .await;

    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status
        .terminal_error()
        .is_some_and(|e| e.terminal_reason() == Some(ConditionReason::InvalidConfiguration)));
}

#[tokio::test]
async fn adopts_a_port_created_in_an_earlier_pass() {
    let h = Harness::with_credentials().await;
    let existing = h.network.seed_port("web", &[]).await;
    h.create_port("web", json!({})).await;

    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status.is_ok(), "{status}");
    assert_eq!(h.network.calls("create_port").await, 0);
    let port = h.get::<Port>("web").await;
    assert_eq!(
        port.and_then(|p| p.status.id),
        Some(existing.id)
    );
}

#[tokio::test]
async fn ambiguous_adoption_is_terminal() {
    let h = Harness::with_credentials().await;
    h.network.seed_port("web", &[]).await;
    h.network.seed_port("web", &[]).await;
    h.create_port("web", json!({})).await;

    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status.terminal_error().is_some());
    assert_eq!(h.network.calls("create_port").await, 0);
}

#[tokio::test]
async fn imports_by_filter_without_modifying_the_remote() {
    let h = Harness::with_credentials().await;
    let shared = h.network.seed_port("shared", &["team-a"]).await;
    h.network.seed_port("other", &["team-a"]).await;
    h.create(
        "Port",
        managed(
            "shared",
            json!({ "import": { "filter": { "name": "shared", "tags": ["team-a"] } } }),
        ),
    )
    .await;

    let requeue = h.port.reconcile(&key("shared")).await;

    assert_eq!(requeue, Requeue::After(h.ctx.config.resync_period));
    let port = h.get::<Port>("shared").await;
    assert!(port.as_ref().is_some_and(HasStatus::is_available));
    assert_eq!(port.and_then(|p| p.status.id), Some(shared.id));
    assert_eq!(h.network.calls("replace_all_tags").await, 0);
    assert_eq!(h.network.calls("update_port").await, 0);
}

#[tokio::test]
async fn ambiguous_import_filter_is_terminal() {
    let h = Harness::with_credentials().await;
    h.network.seed_port("a", &["team-a"]).await;
    h.network.seed_port("b", &["team-a"]).await;
    h.create(
        "Port",
        managed("shared", json!({ "import": { "filter": { "tags": ["team-a"] } } })),
    )
    .await;

    let status = h.port.reconcile_object(&key("shared")).await;

    assert!(status
        .terminal_error()
        .is_some_and(|e| e.terminal_reason() == Some(ConditionReason::InvalidConfiguration)));
}

#[tokio::test]
async fn import_by_unknown_id_polls_until_it_appears() {
    let h = Harness::with_credentials().await;
    h.create("Port", managed("shared", json!({ "import": { "id": "not-yet" } })))
        .await;

    let status = h.port.reconcile_object(&key("shared")).await;

    assert!(status
        .waits()
        .any(|w| matches!(w, Wait::Remote { poll, .. } if *poll == Duration::from_millis(20))));
    assert!(status.error().is_none());
}

#[tokio::test]
async fn remote_deleted_out_of_band_is_unrecoverable() {
    let h = Harness::with_credentials().await;
    h.create_port("web", json!({})).await;
    let _ = h.port.reconcile_object(&key("web")).await;
    let id = h
        .get::<Port>("web")
        .await
        .and_then(|p| p.status.id)
        .unwrap_or_default();
    assert!(h.network.delete_port(&id).await.is_ok());

    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status
        .terminal_error()
        .is_some_and(|e| e.terminal_reason() == Some(ConditionReason::UnrecoverableError)));
    assert_eq!(h.network.calls("create_port").await, 1);
}

#[tokio::test]
async fn spec_change_updates_remote_attributes() {
    let h = Harness::with_credentials().await;
    h.create_port("web", json!({})).await;
    let _ = h.port.reconcile_object(&key("web")).await;

    h.update_spec(
        "Port",
        "web",
        with_credentials(json!({ "resource": { "description": "new", "adminStateUp": false } })),
    )
    .await;
    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status.is_ok(), "{status}");
    let remote = h.network.ports().await;
    assert!(remote
        .first()
        .is_some_and(|p| p.description == "new" && !p.admin_state_up));
    let port = h.get::<Port>("web").await;
    assert!(port
        .and_then(|p| p.status.resource)
        .is_some_and(|r| r.description == "new"));
}

#[tokio::test]
async fn update_conflict_is_terminal_until_the_spec_changes() {
    let h = Harness::with_credentials().await;
    h.create_port("web", json!({})).await;
    let _ = h.port.reconcile_object(&key("web")).await;

    h.network
        .fail_next("update_port", Error::conflict("name already in use"))
        .await;
    h.update_spec("Port", "web", with_credentials(json!({ "resource": { "name": "taken" } })))
        .await;

    let status = h.port.reconcile_object(&key("web")).await;
    assert!(status
        .terminal_error()
        .is_some_and(|e| e.terminal_reason() == Some(ConditionReason::InvalidConfiguration)));

    let _ = h.port.reconcile_object(&key("web")).await;
    assert_eq!(h.network.calls("update_port").await, 1);

    h.update_spec("Port", "web", with_credentials(json!({ "resource": { "name": "free" } })))
        .await;
    let status = h.port.reconcile_object(&key("web")).await;
    assert!(status.is_ok(), "{status}");
    assert_eq!(h.network.calls("update_port").await, 2);
}

#[tokio::test]
async fn transient_create_failure_backs_off() {
    let h = Harness::with_credentials().await;
    h.network
        .fail_next("create_port", Error::remote("create_port", "503 service unavailable"))
        .await;
    h.create_port("web", json!({})).await;

    let requeue = h.port.reconcile(&key("web")).await;
    assert_eq!(requeue, Requeue::Backoff);

    let port = h.get::<Port>("web").await;
    let progressing = port.and_then(|p| condition(&p, ConditionType::Progressing));
    assert!(progressing.is_some_and(|c| c.reason == ConditionReason::TransientError));

    let status = h.port.reconcile_object(&key("web")).await;
    assert!(status.is_ok(), "{status}");
}

#[tokio::test]
async fn deletion_removes_remote_once_then_finalizer() {
    let h = Harness::with_credentials().await;
    h.create_port("web", json!({})).await;
    let _ = h.port.reconcile_object(&key("web")).await;

    h.delete("Port", "web").await;
    let status = h.port.reconcile_object(&key("web")).await;

    assert!(status.is_ok(), "{status}");
    assert_eq!(h.network.calls("delete_port").await, 1);
    assert!(h.network.ports().await.is_empty());
    assert!(h.get::<Port>("web").await.is_none());
}

#[tokio::test]
async fn deleting_an_imported_port_leaves_the_remote() {
    let h = Harness::with_credentials().await;
    h.network.seed_port("shared", &[]).await;
    h.create(
        "Port",
        managed("shared", json!({ "import": { "filter": { "name": "shared" } } })),
    )
    .await;
    let _ = h.port.reconcile_object(&key("shared")).await;

    h.delete("Port", "shared").await;
    let status = h.port.reconcile_object(&key("shared")).await;

    assert!(status.is_ok());
    assert_eq!(h.network.calls("delete_port").await, 0);
    assert_eq!(h.network.ports().await.len(), 1);
    assert!(h.get::<Port>("shared").await.is_none());
}

#[tokio::test]
async fn project_named_after_creation_is_guarded() {
    let h = Harness::with_credentials().await;
    h.ready_project("proj").await;
    h.create_port("web", json!({})).await;
    let status = h.port.reconcile_object(&key("web")).await;
    assert!(status.is_ok(), "{status}");

    h.update_spec("Port", "web", with_credentials(json!({ "resource": { "projectRef": "proj" } })))
        .await;
    let status = h.port.reconcile_object(&key("web")).await;
    assert!(status.is_ok(), "{status}");
    assert!(h.finalizers("Project", "proj").await.contains(&PORT_FINALIZER.to_string()));

    h.delete("Project", "proj").await;
    let blocked = h.project.reconcile_object(&key("proj")).await;
    assert!(blocked.waits().any(|w| matches!(
        w,
        Wait::Object { reason: WaitingReason::Released, .. }
    )));
    assert_eq!(h.network.calls("delete_project").await, 0);

    h.update_spec("Port", "web", with_credentials(json!({ "resource": {} })))
        .await;
    let status = h.project.reconcile_object(&key("proj")).await;
    assert!(status.is_ok(), "{status}");
    assert_eq!(h.network.calls("delete_project").await, 1);
}
