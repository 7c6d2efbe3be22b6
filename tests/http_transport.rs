//! End-to-end tests of the task API over the real `reqwest` transport,
//! against a `mockito` server.

use std::rc::Rc;
use std::sync::Arc;

use mockito::{Matcher, Server, ServerGuard};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use taskbadger::{
    create_task, create_task_safe, get_task, list_tasks, update_task, update_task_safe,
    with_scope, Action, Badger, ContextGuard, CreateTask, Error, Settings, TaskStatus, TaskUpdate,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn install(base_url: &str) -> ContextGuard {
    let settings = Settings::new(base_url, "token", "org", "proj");
    Badger::install(Rc::new(Badger::new(Some(Arc::new(settings)))))
}

fn task_body(id: &str, name: &str, status: &str, extra: Value) -> String {
    let mut body = json!({
        "id": id,
        "organization": "org",
        "project": "proj",
        "name": name,
        "status": status,
        "value": null,
        "value_max": 100,
        "value_percent": null,
        "data": null,
        "tags": {},
        "max_runtime": null,
        "stale_timeout": null,
        "created": "2024-03-01T10:00:00Z",
        "updated": "2024-03-01T10:00:00Z",
        "start_time": null,
        "end_time": null,
        "url": format!("https://taskbadger.net/a/org/tasks/{id}/"),
        "public_url": null
    });
    if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
        body.extend(extra);
    }
    body.to_string()
}

fn json_mock(
    server: &mut ServerGuard,
    method: &str,
    path: &str,
    status: usize,
    body: String,
) -> mockito::Mock {
    server
        .mock(method, path)
        .match_header("authorization", "Bearer token")
        .match_header("accept", "application/json")
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
}

// ─── Create / Update Wire Format ────────────────────────────────────────────

#[test]
fn scoped_create_then_minimal_update() {
    let mut server = Server::new();
    let create = json_mock(
        &mut server,
        "POST",
        "/api/org/proj/tasks/",
        201,
        task_body("t1", "t", "pending", json!({"data": {"b": 2, "a": 1}})),
    )
    .match_body(Matcher::Json(json!({
        "name": "t",
        "status": "pending",
        "data": {"b": 2, "a": 1}
    })))
    .create();
    let update = json_mock(
        &mut server,
        "PATCH",
        "/api/org/proj/tasks/t1/",
        200,
        task_body("t1", "t", "success", json!({"value": 100})),
    )
    .match_body(Matcher::Json(json!({"status": "success", "value": 100})))
    .create();
    let _guard = install(&server.url());

    let task = with_scope(|scope| {
        scope.set("b", 2);
        create_task("t", CreateTask::new().data_entry("a", json!(1))).unwrap()
    });
    let task = update_task(
        task.id(),
        TaskUpdate::new().status(TaskStatus::Success).value(100),
    )
    .unwrap();

    create.assert();
    update.assert();
    assert_eq!(task.status(), TaskStatus::Success);
    assert_eq!(task.value(), Some(100));
}

#[test]
fn create_with_actions_tags_and_monitor() {
    let mut server = Server::new();
    let create = json_mock(
        &mut server,
        "POST",
        "/api/org/proj/tasks/",
        201,
        task_body("t2", "backup", "processing", json!({})),
    )
    .match_query(Matcher::UrlEncoded("monitor_id".into(), "mon-1".into()))
    .match_body(Matcher::Json(json!({
        "name": "backup",
        "status": "processing",
        "value_max": 100,
        "stale_timeout": 60,
        "actions": [
            {"trigger": "error", "integration": "email", "config": {"to": "ops@example.com"}},
            {"trigger": "success", "integration": "webhook:wh_1", "config": {}}
        ],
        "tags": {"env": "prod"}
    })))
    .create();
    let _guard = install(&server.url());

    let task = create_task(
        "backup",
        CreateTask::new()
            .status(TaskStatus::Processing)
            .value_max(100)
            .stale_timeout(60)
            .action(Action::email("error", "ops@example.com"))
            .action(Action::webhook("success", "wh_1"))
            .monitor_id("mon-1")
            .tag("env", "prod"),
    )
    .unwrap();

    create.assert();
    assert_eq!(task.id(), "t2");
    assert_eq!(
        task.record().url.as_deref(),
        Some("https://taskbadger.net/a/org/tasks/t2/")
    );
}

#[test]
fn task_handle_methods_replace_record() {
    let mut server = Server::new();
    let get = json_mock(
        &mut server,
        "GET",
        "/api/org/proj/tasks/t3/",
        200,
        task_body("t3", "sync", "pending", json!({"value": 5})),
    )
    .create();
    let increment = json_mock(
        &mut server,
        "PATCH",
        "/api/org/proj/tasks/t3/",
        200,
        task_body("t3", "sync", "pending", json!({"value": 15})),
    )
    .match_body(Matcher::Json(json!({"value": 15})))
    .create();
    let _guard = install(&server.url());

    let mut task = get_task("t3").unwrap();
    task.increment_value(10).unwrap();

    get.assert();
    increment.assert();
    assert_eq!(task.value(), Some(15));
}

// ─── Error Mapping ──────────────────────────────────────────────────────────

#[test]
fn status_codes_map_to_errors() {
    let mut server = Server::new();
    let _unauthorized = json_mock(
        &mut server,
        "GET",
        "/api/org/proj/tasks/a/",
        401,
        "{}".into(),
    )
    .create();
    let _server_error = json_mock(
        &mut server,
        "GET",
        "/api/org/proj/tasks/b/",
        503,
        "maintenance".into(),
    )
    .create();
    let _not_found = json_mock(
        &mut server,
        "GET",
        "/api/org/proj/tasks/c/",
        404,
        r#"{"detail": "Not found."}"#.into(),
    )
    .create();
    let _guard = install(&server.url());

    assert!(matches!(get_task("a"), Err(Error::Unauthorized)));
    match get_task("b") {
        Err(Error::ServerError { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, b"maintenance");
        },
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(matches!(
        get_task("c"),
        Err(Error::UnexpectedStatus { status: 404, .. })
    ));
}

#[test]
fn safe_wrappers_swallow_failures() {
    let mut server = Server::new();
    let create = json_mock(
        &mut server,
        "POST",
        "/api/org/proj/tasks/",
        500,
        "boom".into(),
    )
    .create();
    let update = json_mock(
        &mut server,
        "PATCH",
        "/api/org/proj/tasks/x/",
        400,
        "{}".into(),
    )
    .create();
    let _guard = install(&server.url());

    assert_eq!(create_task_safe("t", CreateTask::new()), None);
    update_task_safe("x", TaskUpdate::new().value(1));

    create.assert();
    update.assert();
}

#[test]
fn unreachable_server_is_a_transport_error() {
    let _guard = install("http://127.0.0.1:9");
    assert!(matches!(
        create_task("t", CreateTask::new()),
        Err(Error::Transport(_))
    ));
    assert_eq!(create_task_safe("t", CreateTask::new()), None);
}

// ─── Listing ────────────────────────────────────────────────────────────────

#[test]
fn list_pages_with_cursor() {
    let mut server = Server::new();
    let next = format!("{}/api/org/proj/tasks/?cursor=cD0y&page_size=2", server.url());
    let results: Vec<Value> = ["a", "b"]
        .iter()
        .map(|id| serde_json::from_str(&task_body(id, "t", "success", json!({}))).unwrap())
        .collect();
    let list = json_mock(
        &mut server,
        "GET",
        "/api/org/proj/tasks/",
        200,
        json!({"next": next, "previous": null, "results": results}).to_string(),
    )
    .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("page_size".into(), "2".into()),
        Matcher::UrlEncoded("cursor".into(), "cD0x".into()),
    ]))
    .create();
    let _guard = install(&server.url());

    let page = list_tasks(Some(2), Some("cD0x")).unwrap();

    list.assert();
    assert_eq!(page.results.len(), 2);
    assert_eq!(page.next_cursor().as_deref(), Some("cD0y"));
}

// ─── Session ────────────────────────────────────────────────────────────────

#[test]
fn outer_session_spans_calls() {
    let mut server = Server::new();
    let patch = json_mock(
        &mut server,
        "PATCH",
        "/api/org/proj/tasks/t4/",
        200,
        task_body("t4", "t", "processing", json!({})),
    )
    .expect(3)
    .create();
    let _guard = install(&server.url());

    let badger = Badger::current();
    let settings = badger.settings().unwrap();
    {
        let _session = badger.session().enter(&settings).unwrap();
        for _ in 0..3 {
            update_task("t4", TaskUpdate::new().status(TaskStatus::Processing)).unwrap();
            assert_eq!(badger.session().depth(), 1);
        }
    }
    assert!(!badger.session().is_open());
    patch.assert();
}
