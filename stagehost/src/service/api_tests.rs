//! Router tests driven through `oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use super::{build_router, AppState};
use crate::config::ServiceConfig;
use crate::plugins::ModuleLoader;
use crate::registry::StageRegistry;

struct Fixture {
    router: Router,
    state: Arc<AppState>,
    _sessions: TempDir,
    docroot: TempDir,
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with(adjust: impl FnOnce(&mut ServiceConfig)) -> Fixture {
    let sessions = tempfile::tempdir().unwrap();
    let docroot = tempfile::tempdir().unwrap();
    std::fs::write(docroot.path().join("index.html"), "<h1>stagehost</h1>").unwrap();

    let mut config = ServiceConfig::default();
    config.sessions.root = sessions.path().to_path_buf();
    config.docroot.path = Some(docroot.path().to_path_buf());
    adjust(&mut config);

    let loader = Arc::new(ModuleLoader::new(Arc::new(StageRegistry::new())));
    loader.register_builtin().unwrap();
    let state = Arc::new(AppState::new(config, loader));
    Fixture {
        router: build_router(Arc::clone(&state)),
        state,
        _sessions: sessions,
        docroot,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn write_pipeline(file: &str, text: &str) -> Value {
    json!({
        "PipelineBuilder": {"Name": "Writer", "Number_Filters": 1, "Version": 6},
        "0": {"Filter_Name": "WriteTextFile", "OutputFile": file, "Text": text}
    })
}

#[tokio::test]
async fn test_empty_text_body_rejected() {
    let f = fixture();
    for prefix in ["/api/v1", "/api/v2"] {
        let request = Request::builder()
            .method("POST")
            .uri(format!("{prefix}/ExecutePipeline"))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(&f.router, request).await;
        assert!(body["ErrorCode"].as_i64().unwrap() < 0);
        assert!(body.get("Completed").is_none());
    }
}

#[tokio::test]
async fn test_invalid_json_body() {
    let f = fixture();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v2/ExecutePipeline")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"Pipeline\": "))
        .unwrap();
    let (status, body) = send(&f.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ErrorCode"], json!(-30));
}

#[tokio::test]
async fn test_zero_stage_pipeline_completes() {
    let f = fixture();
    let request = post_json(
        "/api/v1/ExecutePipeline",
        &json!({"Pipeline": {"PipelineBuilder": {"Name": "Empty", "Number_Filters": 0, "Version": 6}}}),
    );
    let (status, body) = send(&f.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Completed"], json!(true));
    assert_eq!(body["Errors"], json!([]));
    assert_eq!(body["Warnings"], json!([]));
    assert!(body["SessionID"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn test_list_parameters_unknown_class() {
    let f = fixture();
    let (status, body) = send(
        &f.router,
        post_json("/api/v2/ListFilterParameters", &json!({"ClassName": "NoSuchStage"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ErrorCode"], json!(-70));
    assert!(body.get("FilterParameters").is_none());

    let (status, body) = send(
        &f.router,
        post_json("/api/v1/ListFilterParameters", &json!({"ClassName": "NoSuchStage"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ErrorCode"], json!(-70));
}

#[tokio::test]
async fn test_list_parameters_known_class() {
    let f = fixture();
    let (_, body) = send(
        &f.router,
        post_json("/api/v2/ListFilterParameters", &json!({"ClassName": "WriteTextFile"})),
    )
    .await;
    assert_eq!(body["ClassName"], json!("WriteTextFile"));
    assert_eq!(body["ErrorCode"], json!(0));
    assert_eq!(
        body["FilterParameters"][0],
        json!({
            "FilterParameterName": "OutputFileParameter",
            "Widget": "OutputFileWidget",
            "Category": "Parameter",
            "GroupIndex": -1,
            "HumanLabel": "Output File",
            "PropertyName": "OutputFile",
            "ReadOnly": false
        })
    );
}

#[tokio::test]
async fn test_field_errors() {
    let f = fixture();
    let (status, body) = send(&f.router, post_json("/api/v2/ExecutePipeline", &json!({}))).await;
    assert_eq!((status, body["ErrorCode"].clone()), (StatusCode::BAD_REQUEST, json!(-40)));

    let (_, body) = send(&f.router, post_json("/api/v2/ExecutePipeline", &json!({"Pipeline": 5}))).await;
    assert_eq!(body["ErrorCode"], json!(-50));

    let (_, body) = send(&f.router, post_json("/api/v2/PluginInfo", &json!({"PluginName": ""}))).await;
    assert_eq!(body["ErrorCode"], json!(-60));

    let (status, body) = send(
        &f.router,
        post_json(
            "/api/v2/ExecutePipeline",
            &json!({"Pipeline": {"PipelineBuilder": {"Number_Filters": 1}, "0": {"Filter_Name": "Nope"}}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["ErrorCode"], json!(-85));
}

#[tokio::test]
async fn test_discovery_endpoints() {
    let f = fixture();
    let stage_count = f.state.registry.len();

    let (_, body) = send(&f.router, post_json("/api/v1/NumFilters", &json!({}))).await;
    assert_eq!(body["NumFilters"], json!(stage_count));

    let request = Request::get("/api/v2/NamesOfFilters").body(Body::empty()).unwrap();
    let (_, body) = send(&f.router, request).await;
    let names = body["Filters"].as_array().unwrap();
    assert_eq!(names.len(), stage_count);
    assert!(names.contains(&json!("WriteTextFile")));

    let request = Request::get("/api/v2/AvailableFilters").body(Body::empty()).unwrap();
    let (_, body) = send(&f.router, request).await;
    assert_eq!(body["Filters"].as_array().unwrap().len(), stage_count);
    assert!(body["Filters"][0]["ClassName"].is_string());

    let request = Request::get("/api/v2/LoadedPlugins").body(Body::empty()).unwrap();
    let (_, body) = send(&f.router, request).await;
    assert_eq!(body["Plugins"][0]["PluginName"], json!("Core"));

    let (_, body) = send(&f.router, post_json("/api/v2/PluginInfo", &json!({"PluginName": "Core"}))).await;
    assert_eq!(body["PluginName"], json!("Core"));
    let (status, body) = send(&f.router, post_json("/api/v2/PluginInfo", &json!({"PluginName": "Ghost"}))).await;
    assert_eq!((status, body["ErrorCode"].clone()), (StatusCode::NOT_FOUND, json!(-70)));

    let request = Request::get("/api/v1/ServiceVersion").body(Body::empty()).unwrap();
    let (_, body) = send(&f.router, request).await;
    assert_eq!(body["Version"], json!(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn test_execute_writes_into_session_and_links() {
    let f = fixture();
    let request = post_json(
        "/api/v2/ExecutePipeline",
        &json!({"Pipeline": write_pipeline("out/result.txt", "hello"), "StatusLog": true}),
    );
    let (status, body) = send(&f.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Completed"], json!(true));
    assert_eq!(body["PipelineErrors"], json!([]));
    assert!(body.get("Errors").is_none());

    let session = body["SessionID"].as_str().unwrap().to_string();
    let links: Vec<String> = serde_json::from_value(body["OutputLinks"].clone()).unwrap();
    assert_eq!(
        links,
        vec![format!("/{session}/out/result.txt"), format!("/{session}/Writer-status.log")]
    );

    let dir = f.state.sessions.directory(&session).unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("out/result.txt")).unwrap(), "hello");
    let status_log = std::fs::read_to_string(dir.join("Writer-status.log")).unwrap();
    assert!(status_log.contains("Pipeline Complete"));

    let response = f
        .router
        .clone()
        .oneshot(Request::get(format!("/{session}/out/result.txt")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello");
}

fn delayed_write_pipeline(millis: u64, file: &str) -> Value {
    json!({
        "PipelineBuilder": {"Name": "Slow", "Number_Filters": 2, "Version": 6},
        "0": {"Filter_Name": "Delay", "Milliseconds": millis},
        "1": {"Filter_Name": "WriteTextFile", "OutputFile": file, "Text": "late"}
    })
}

#[tokio::test]
async fn test_long_run_outlasts_read_timeout() {
    let f = fixture_with(|config| config.listener.read_timeout_ms = 200);
    for (prefix, errors_key) in [("/api/v1", "Errors"), ("/api/v2", "PipelineErrors")] {
        let request = post_json(
            &format!("{prefix}/ExecutePipeline"),
            &json!({"Pipeline": delayed_write_pipeline(800, "slow.txt")}),
        );
        let (status, body) = send(&f.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Completed"], json!(true));
        assert_eq!(body[errors_key], json!([]));
    }
}

#[tokio::test]
async fn test_session_survives_sweeps_during_run() {
    let f = fixture_with(|config| {
        config.sessions.expiration_time_ms = 100;
        config.sessions.sweep_interval_ms = 20;
    });
    let sweeper = f.state.sessions.spawn_sweeper(f.state.config.sessions.sweep_interval());

    let (status, body) = send(
        &f.router,
        post_json(
            "/api/v2/ExecutePipeline",
            &json!({"Pipeline": delayed_write_pipeline(400, "after.txt")}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Completed"], json!(true));

    let session = body["SessionID"].as_str().unwrap().to_string();
    let dir = f.state.sessions.directory(&session).unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("after.txt")).unwrap(), "late");

    let response = f
        .router
        .clone()
        .oneshot(Request::get(format!("/{session}/after.txt")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (_, again) = send(
        &f.router,
        post_json(
            "/api/v2/ExecutePipeline",
            &json!({"Pipeline": write_pipeline("second.txt", "x"), "SessionID": session.clone()}),
        ),
    )
    .await;
    assert_eq!(again["SessionID"], json!(session));
    sweeper.abort();
}

#[tokio::test]
async fn test_session_reused_and_isolated() {
    let f = fixture();
    let (_, first) = send(
        &f.router,
        post_json("/api/v1/ExecutePipeline", &json!({"Pipeline": write_pipeline("out.txt", "a")})),
    )
    .await;
    let (_, second) = send(
        &f.router,
        post_json("/api/v1/ExecutePipeline", &json!({"Pipeline": write_pipeline("out.txt", "b")})),
    )
    .await;
    let a = first["SessionID"].as_str().unwrap();
    let b = second["SessionID"].as_str().unwrap();
    assert_ne!(a, b);

    let dir_a = f.state.sessions.directory(a).unwrap();
    let dir_b = f.state.sessions.directory(b).unwrap();
    assert_eq!(std::fs::read_to_string(dir_a.join("out.txt")).unwrap(), "a");
    assert_eq!(std::fs::read_to_string(dir_b.join("out.txt")).unwrap(), "b");

    let (_, again) = send(
        &f.router,
        post_json(
            "/api/v1/ExecutePipeline",
            &json!({"Pipeline": write_pipeline("out.txt", "c"), "SessionID": a}),
        ),
    )
    .await;
    assert_eq!(again["SessionID"], json!(a));
    assert_eq!(std::fs::read_to_string(dir_a.join("out.txt")).unwrap(), "c");
}

#[tokio::test]
async fn test_concurrent_sessions_distinct_paths() {
    let f = fixture();
    let requests = (0..4).map(|i| {
        let router = f.router.clone();
        tokio::spawn(async move {
            let request = post_json(
                "/api/v2/ExecutePipeline",
                &json!({"Pipeline": write_pipeline("same.txt", &i.to_string())}),
            );
            send(&router, request).await.1
        })
    });
    let mut dirs: Vec<PathBuf> = Vec::new();
    for handle in requests.collect::<Vec<_>>() {
        let body = handle.await.unwrap();
        let session = body["SessionID"].as_str().unwrap();
        let dir = f.state.sessions.directory(session).unwrap();
        assert!(dir.ends_with(session));
        dirs.push(dir);
    }
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 4);
}

#[tokio::test]
async fn test_preflight_reports_without_running() {
    let f = fixture();
    let pipeline = json!({
        "PipelineBuilder": {"Name": "Checks", "Number_Filters": 2, "Version": 6},
        "0": {"Filter_Name": "ErrorWarningStage", "PreflightError": true},
        "1": {"Filter_Name": "WriteTextFile", "OutputFile": "never.txt"}
    });
    let (status, body) = send(
        &f.router,
        post_json("/api/v2/PreflightPipeline", &json!({"Pipeline": pipeline})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Completed"], json!(false));
    assert_eq!(body["PipelineErrors"][0]["Code"], json!(-666_001));
    assert_eq!(body["PipelineErrors"][0]["FilterIndex"], json!(0));

    let dir = f.state.sessions.directory(body["SessionID"].as_str().unwrap()).unwrap();
    assert!(!dir.join("never.txt").exists());
}

#[tokio::test]
async fn test_execute_failure_is_reported() {
    let f = fixture();
    let pipeline = json!({
        "PipelineBuilder": {"Name": "Fails", "Number_Filters": 2, "Version": 6},
        "0": {"Filter_Name": "ErrorWarningStage", "ExecuteError": true},
        "1": {"Filter_Name": "WriteTextFile", "OutputFile": "never.txt"}
    });
    let (_, body) = send(
        &f.router,
        post_json("/api/v1/ExecutePipeline", &json!({"Pipeline": pipeline, "ErrorLog": true})),
    )
    .await;
    assert_eq!(body["Completed"], json!(false));
    assert!(!body["Errors"].as_array().unwrap().is_empty());

    let session = body["SessionID"].as_str().unwrap();
    let dir = f.state.sessions.directory(session).unwrap();
    assert!(!dir.join("never.txt").exists());
    assert!(std::fs::read_to_string(dir.join("Fails-err.log")).unwrap().contains("-666001"));
}

#[tokio::test]
async fn test_archive_outputs() {
    let f = fixture();
    let (_, body) = send(
        &f.router,
        post_json(
            "/api/v2/ExecutePipeline",
            &json!({"Pipeline": write_pipeline("out.txt", "x"), "ArchiveOutputs": true}),
        ),
    )
    .await;
    let session = body["SessionID"].as_str().unwrap();
    let links = body["OutputLinks"].as_array().unwrap();
    assert_eq!(links.last().unwrap(), &json!(format!("/{session}/{session}.tar.gz")));
    let dir = f.state.sessions.directory(session).unwrap();
    assert!(dir.join(format!("{session}.tar.gz")).is_file());
}

#[tokio::test]
async fn test_multipart_upload_feeds_input() {
    let f = fixture();
    let pipeline = json!({
        "PipelineBuilder": {"Name": "Copy", "Number_Filters": 1, "Version": 6},
        "0": {"Filter_Name": "CopyFile", "InputFile": "data/in.txt", "OutputFile": "copy.txt"}
    });
    let boundary = "STAGEHOSTBOUNDARY";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"Pipeline\"\r\n\r\n{pipeline}\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"data/in.txt\"; filename=\"in.txt\"\r\n\r\nuploaded\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/v2/ExecutePipeline")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&f.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Completed"], json!(true), "{body}");

    let dir = f.state.sessions.directory(body["SessionID"].as_str().unwrap()).unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("copy.txt")).unwrap(), "uploaded");
}

#[tokio::test]
async fn test_static_fallback() {
    let f = fixture();
    let response = f.router.clone().oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    let etag = response.headers()[header::ETAG].clone();

    let response = f
        .router
        .clone()
        .oneshot(
            Request::get("/index.html")
                .header(header::IF_NONE_MATCH, etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let outside = f.docroot.path().parent().unwrap().join("outside.txt");
    std::fs::write(&outside, "secret").ok();
    let response = f
        .router
        .clone()
        .oneshot(Request::get("/../outside.txt").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    std::fs::remove_file(outside).ok();
}
