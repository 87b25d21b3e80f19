//! End-to-end tests of the HTTP surface against the fake engine.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use pocket_tts_web::{
    server::GENERATION_STATUS,
    testing::{wav_bytes, FakeSpeechModel, FAKE_SAMPLE_RATE, FAKE_VOICES},
    voices::VoiceResolver,
    AppState, ModelSlot, SpeechModel,
};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "pocket-tts-test-boundary";

enum Part<'a> {
    Text(&'a str),
    File { filename: &'a str, bytes: &'a [u8] },
}

fn multipart_body(fields: &[(&str, Part<'_>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, part) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File { filename, bytes } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn generate_request(fields: &[(&str, Part<'_>)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/generate")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(fields)))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

struct TestApp {
    router: Router,
    slot: ModelSlot,
    _static_dir: tempfile::TempDir,
}

impl TestApp {
    fn with_timeout(timeout: Duration) -> Self {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), "<html>pocket tts</html>").unwrap();
        std::fs::write(static_dir.path().join("app.js"), "console.log('ui');").unwrap();

        let slot = ModelSlot::new();
        let resolver = VoiceResolver::new("alba", timeout).unwrap();
        let router = pocket_tts_web::router(AppState::new(slot.clone(), resolver), static_dir.path());
        Self { router, slot, _static_dir: static_dir }
    }

    fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    fn loaded(model: FakeSpeechModel) -> (Self, Arc<FakeSpeechModel>) {
        let app = Self::new();
        let model = Arc::new(model);
        app.slot.install(model.clone()).unwrap();
        (app, model)
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'a>(response: &'a Response, name: impl header::AsHeaderName) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

/// Local HTTP server for URL voice prompts.
async fn prompt_server() -> String {
    let app = Router::new()
        .route(
            "/voice.wav",
            get(|| async { ([(header::CONTENT_TYPE, "audio/wav")], wav_bytes(16_000, 1_600)) }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                wav_bytes(16_000, 160)
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Prompt server whose `/voice.wav` announces each request, then stalls.
async fn stalled_prompt_server() -> (String, tokio::sync::mpsc::UnboundedReceiver<()>) {
    let (requested_tx, requested_rx) = tokio::sync::mpsc::unbounded_channel();
    let app = Router::new().route(
        "/voice.wav",
        get(move || {
            let requested_tx = requested_tx.clone();
            async move {
                let _ = requested_tx.send(());
                tokio::time::sleep(Duration::from_secs(5)).await;
                wav_bytes(16_000, 160)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), requested_rx)
}

fn stop_request() -> Request<Body> {
    Request::builder().method("POST").uri("/api/stop").body(Body::empty()).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Status and voices
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status_before_and_after_load() {
    let app = TestApp::new();

    let body = body_json(app.send(get_request("/api/status")).await).await;
    assert_eq!(body["status"], "model_not_loaded");
    assert_eq!(body["has_voice_cloning"], false);

    app.slot.install(Arc::new(FakeSpeechModel::new())).unwrap();
    let body = body_json(app.send(get_request("/api/status")).await).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["has_voice_cloning"], true);
}

#[tokio::test]
async fn test_status_without_voice_cloning() {
    let (app, _) = TestApp::loaded(FakeSpeechModel::new().without_voice_cloning());
    let body = body_json(app.send(get_request("/api/status")).await).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["has_voice_cloning"], false);
}

#[tokio::test]
async fn test_list_voices() {
    let (app, _) = TestApp::loaded(FakeSpeechModel::new());
    let response = app.send(get_request("/api/voices")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let voices: Vec<&str> =
        body["voices"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(voices, FAKE_VOICES);
}

#[tokio::test]
async fn test_list_voices_before_load() {
    let app = TestApp::new();
    let body = body_json(app.send(get_request("/api/voices")).await).await;
    assert_eq!(body["voices"], serde_json::json!([]));
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generate_predefined_voice() {
    let (app, _) = TestApp::loaded(FakeSpeechModel::new());
    let response = app
        .send(generate_request(&[("text", Part::Text("Hello world")), ("voice", Part::Text("marius"))]))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "audio/wav");
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=output.wav"
    );
    assert_eq!(header_str(&response, GENERATION_STATUS), "completed");
    let declared: usize = header_str(&response, header::CONTENT_LENGTH).parse().unwrap();

    let bytes = body_bytes(response).await;
    assert_eq!(declared, bytes.len());
    assert_eq!(&bytes[..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");

    let reader = hound::WavReader::new(std::io::Cursor::new(&bytes)).unwrap();
    assert_eq!(reader.spec().sample_rate, FAKE_SAMPLE_RATE);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert!(reader.len() > 0);
}

#[tokio::test]
async fn test_generate_default_voice_and_empty_fields() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let response = app
        .send(generate_request(&[
            ("text", Part::Text("Hello there")),
            ("voice", Part::Text("")),
            ("url", Part::Text("")),
            ("seed", Part::Text("")),
            ("temperature", Part::Text("")),
            ("lsd_steps", Part::Text("")),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(model.last_options(), Some(Default::default()));
    assert!(model.seen_files().is_empty());
}

#[tokio::test]
async fn test_generate_passes_options() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let response = app
        .send(generate_request(&[
            ("text", Part::Text("Hello there")),
            ("seed", Part::Text("42")),
            ("temperature", Part::Text("0.0")),
            ("lsd_steps", Part::Text("4")),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let options = model.last_options().unwrap();
    assert_eq!(options.seed, Some(42));
    assert_eq!(options.temperature, Some(0.0));
    assert_eq!(options.decode_steps, Some(4));
}

#[tokio::test]
async fn test_seeded_requests_are_identical() {
    let (app, _) = TestApp::loaded(FakeSpeechModel::new());
    let fields = || {
        generate_request(&[
            ("text", Part::Text("Same text every time")),
            ("voice", Part::Text("cosette")),
            ("seed", Part::Text("7")),
        ])
    };
    let first = body_bytes(app.send(fields()).await).await;
    let second = body_bytes(app.send(fields()).await).await;
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_negative_seed_is_accepted_and_deterministic() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let fields = || {
        generate_request(&[
            ("text", Part::Text("Negative seeds are integers too")),
            ("seed", Part::Text("-3")),
        ])
    };
    let first = app.send(fields()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(model.last_options().unwrap().seed, Some(-3));
    let first = body_bytes(first).await;

    let second = body_bytes(app.send(fields()).await).await;
    assert!(!first.is_empty());
    assert_eq!(first, second);

    let other = generate_request(&[
        ("text", Part::Text("Negative seeds are integers too")),
        ("seed", Part::Text("3")),
    ]);
    assert_ne!(body_bytes(app.send(other).await).await, first);
}

#[tokio::test]
async fn test_generate_without_model() {
    let app = TestApp::new();
    let response = app.send(generate_request(&[("text", Part::Text("Hello"))])).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["detail"], "Model not loaded");
}

#[tokio::test]
async fn test_generate_unknown_voice() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let response = app
        .send(generate_request(&[("text", Part::Text("Hello")), ("voice", Part::Text("nobody"))]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("nobody"), "{detail}");
    assert_eq!(model.chunks_produced(), 0);
}

#[tokio::test]
async fn test_generate_requires_text() {
    let (app, _) = TestApp::loaded(FakeSpeechModel::new());
    let response = app.send(generate_request(&[("voice", Part::Text("alba"))])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generate_rejects_bad_numbers() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let cases = [
        ("seed", "abc"),
        ("seed", "1.5"),
        ("temperature", "warm"),
        ("temperature", "NaN"),
        ("temperature", "inf"),
        ("temperature", "-inf"),
        ("lsd_steps", "1.5"),
        ("lsd_steps", "-1"),
    ];
    for (field, value) in cases {
        let response = app
            .send(generate_request(&[("text", Part::Text("Hello")), (field, Part::Text(value))]))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{field}={value}");
        let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
        assert!(detail.contains(field), "{detail}");
    }
    assert_eq!(model.chunks_produced(), 0);
}

#[tokio::test]
async fn test_engine_failure_is_500() {
    let (app, _) = TestApp::loaded(FakeSpeechModel::new().failing_at_chunk(0));
    let response = app.send(generate_request(&[("text", Part::Text("Hello world"))])).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["detail"], "Audio generation failed");
}

// ─────────────────────────────────────────────────────────────────────────────
// Voice cloning
// ─────────────────────────────────────────────────────────────────────────────

fn assert_cleaned_up(path: &Path) {
    assert!(!path.exists(), "prompt {} was left behind", path.display());
    assert!(!path.with_extension("trunc.wav").exists(), "truncated prompt was left behind");
}

#[tokio::test]
async fn test_generate_with_uploaded_prompt() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let prompt = wav_bytes(16_000, 8_000);
    let response = app
        .send(generate_request(&[
            ("text", Part::Text("Cloned voice speaking")),
            ("voice", Part::Text("alba")),
            ("file", Part::File { filename: "me.wav", bytes: &prompt }),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, GENERATION_STATUS), "completed");

    let seen = model.seen_files();
    assert_eq!(seen.len(), 1, "upload must win over the voice name");
    assert_eq!(seen[0].extension().and_then(|e| e.to_str()), Some("wav"));
    assert_cleaned_up(&seen[0]);
}

#[tokio::test]
async fn test_invalid_upload_is_400_and_cleaned_up() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let response = app
        .send(generate_request(&[
            ("text", Part::Text("Hello")),
            ("file", Part::File { filename: "notes.txt", bytes: b"not audio" }),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Error processing voice file"), "{detail}");

    let seen = model.seen_files();
    assert_eq!(seen.len(), 1);
    assert_cleaned_up(&seen[0]);
    assert_eq!(model.chunks_produced(), 0);
}

#[tokio::test]
async fn test_upload_without_voice_cloning() {
    let (app, model) = TestApp::loaded(FakeSpeechModel::new().without_voice_cloning());
    let prompt = wav_bytes(16_000, 1_600);
    let response = app
        .send(generate_request(&[
            ("text", Part::Text("Hello")),
            ("file", Part::File { filename: "me.wav", bytes: &prompt }),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(model.seen_files().is_empty());
}

#[tokio::test]
async fn test_generate_with_prompt_url() {
    let base = prompt_server().await;
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let url = format!("{base}/voice.wav");
    let response = app
        .send(generate_request(&[
            ("text", Part::Text("Voice from the web")),
            ("voice", Part::Text("javert")),
            ("url", Part::Text(&url)),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let seen = model.seen_files();
    assert_eq!(seen.len(), 1, "url must win over the voice name");
    assert_eq!(seen[0].extension().and_then(|e| e.to_str()), Some("wav"));
    assert_cleaned_up(&seen[0]);
}

#[tokio::test]
async fn test_prompt_url_not_found() {
    let base = prompt_server().await;
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let url = format!("{base}/missing.wav");
    let response = app
        .send(generate_request(&[("text", Part::Text("Hello")), ("url", Part::Text(&url))]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Failed to download audio from URL"), "{detail}");
    assert!(model.seen_files().is_empty());
}

#[tokio::test]
async fn test_prompt_url_timeout() {
    let base = prompt_server().await;
    let app = TestApp::with_timeout(Duration::from_millis(200));
    let model = Arc::new(FakeSpeechModel::new());
    app.slot.install(model.clone()).unwrap();

    let url = format!("{base}/slow");
    let response = app
        .send(generate_request(&[("text", Part::Text("Hello")), ("url", Part::Text(&url))]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Failed to download audio from URL"), "{detail}");
    assert!(model.seen_files().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Stop
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_when_idle() {
    let app = TestApp::new();
    let response = app.send(stop_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "stopped");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_aborts_running_generation() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let resume_rx = Mutex::new(resume_rx);

    // Park the worker after the second chunk until the stop has been sent.
    let model = FakeSpeechModel::new().on_chunk(move |index| {
        if index == 1 {
            started_tx.lock().unwrap().send(()).unwrap();
            resume_rx.lock().unwrap().recv().unwrap();
        }
    });
    let (app, model) = TestApp::loaded(model);
    let text = "one two three four five six seven eight nine ten";

    let pending = tokio::spawn({
        let router = app.router.clone();
        let request = generate_request(&[("text", Part::Text(text))]);
        async move { router.oneshot(request).await.unwrap() }
    });

    tokio::task::spawn_blocking(move || started_rx.recv().unwrap()).await.unwrap();
    let stop = app.send(stop_request()).await;
    assert_eq!(body_json(stop).await["status"], "stopped");
    resume_tx.send(()).unwrap();

    let response = pending.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, GENERATION_STATUS), "aborted");
    assert!(body_bytes(response).await.is_empty());
    assert!(model.chunks_produced() < text.split_whitespace().count());

    // The next generation starts with a fresh token.  One word keeps it clear
    // of the parking hook.
    let response = app.send(generate_request(&[("text", Part::Text("again"))])).await;
    assert_eq!(header_str(&response, GENERATION_STATUS), "completed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_while_downloading_prompt_aborts() {
    let (base, mut requested) = stalled_prompt_server().await;
    let (app, model) = TestApp::loaded(FakeSpeechModel::new());
    let url = format!("{base}/voice.wav");

    let pending = tokio::spawn({
        let router = app.router.clone();
        let request = generate_request(&[("text", Part::Text("Never spoken")), ("url", Part::Text(&url))]);
        async move { router.oneshot(request).await.unwrap() }
    });

    requested.recv().await.unwrap();
    let stop = app.send(stop_request()).await;
    assert_eq!(body_json(stop).await["status"], "stopped");

    // Well before the prompt server would answer.
    let response = tokio::time::timeout(Duration::from_secs(2), pending).await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, GENERATION_STATUS), "aborted");
    assert!(body_bytes(response).await.is_empty());
    assert_eq!(model.chunks_produced(), 0);
    assert!(model.seen_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_while_queued_aborts() {
    let (parked_tx, parked_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let parked_tx = Mutex::new(parked_tx);
    let resume_rx = Mutex::new(resume_rx);
    let parked = AtomicBool::new(false);

    let model = FakeSpeechModel::new().on_chunk(move |_| {
        if !parked.swap(true, Ordering::SeqCst) {
            parked_tx.lock().unwrap().send(()).unwrap();
            resume_rx.lock().unwrap().recv().unwrap();
        }
    });
    let (app, model) = TestApp::loaded(model);

    let running = tokio::spawn({
        let router = app.router.clone();
        let request = generate_request(&[("text", Part::Text("first in line"))]);
        async move { router.oneshot(request).await.unwrap() }
    });
    tokio::task::spawn_blocking(move || parked_rx.recv().unwrap()).await.unwrap();

    let queued = tokio::spawn({
        let router = app.router.clone();
        let request = generate_request(&[("text", Part::Text("second in line"))]);
        async move { router.oneshot(request).await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!queued.is_finished());

    app.send(stop_request()).await;
    let response = tokio::time::timeout(Duration::from_secs(2), queued).await.unwrap().unwrap();
    assert_eq!(header_str(&response, GENERATION_STATUS), "aborted");

    resume_tx.send(()).unwrap();
    let response = running.await.unwrap();
    assert_eq!(header_str(&response, GENERATION_STATUS), "aborted");
    assert_eq!(model.chunks_produced(), 1, "the queued request never reached the engine");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_keeps_generations_serialised() {
    let (parked_tx, parked_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let parked_tx = Mutex::new(parked_tx);
    let resume_rx = Mutex::new(resume_rx);
    let parked = AtomicBool::new(false);

    let model = FakeSpeechModel::new().on_chunk(move |_| {
        if !parked.swap(true, Ordering::SeqCst) {
            parked_tx.lock().unwrap().send(()).unwrap();
            resume_rx.lock().unwrap().recv().unwrap();
        }
    });
    let (app, model) = TestApp::loaded(model);
    let text = "one two three four five six seven eight";

    let abandoned = tokio::spawn({
        let router = app.router.clone();
        let request = generate_request(&[("text", Part::Text(text))]);
        async move { router.oneshot(request).await.unwrap() }
    });
    tokio::task::spawn_blocking(move || parked_rx.recv().unwrap()).await.unwrap();

    // The client goes away while its generation is still on the worker.
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    let next = tokio::spawn({
        let router = app.router.clone();
        let request = generate_request(&[("text", Part::Text("next"))]);
        async move { router.oneshot(request).await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!next.is_finished(), "the next generation must wait for the abandoned worker");

    resume_tx.send(()).unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), next).await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, GENERATION_STATUS), "completed");

    assert_eq!(model.peak_concurrent_streams(), 1);
    assert_eq!(model.chunks_produced(), 2, "the abandoned generation stops at the next chunk");
}

// ─────────────────────────────────────────────────────────────────────────────
// Static files and CORS
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_serves_ui() {
    let app = TestApp::new();

    let index = app.send(get_request("/")).await;
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(body_bytes(index).await, b"<html>pocket tts</html>");

    let script = app.send(get_request("/static/app.js")).await;
    assert_eq!(script.status(), StatusCode::OK);
    assert_eq!(body_bytes(script).await, b"console.log('ui');");
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let app = TestApp::new();
    let request = Request::builder()
        .uri("/api/status")
        .header(header::ORIGIN, "http://example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
}

#[test]
fn test_fake_model_is_a_speech_model() {
    fn assert_model<M: SpeechModel>() {}
    assert_model::<FakeSpeechModel>();
}
