//! The Gradio backend against a stand-in Gradio server.

mod common;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::Path,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use color_eyre::Result;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use vton::{
    actions::TryOn,
    error::Error,
    try_on::{ClothType, Gradio, ShowType, TryOnBackend, TryOnParams, TryOnService},
};

use common::*;

const OUTPUT: &[u8] = b"generated image";

#[derive(Debug, Default)]
struct Seen {
    uploads: Vec<Bytes>,
    calls: Vec<Value>,
}

type Shared = Arc<Mutex<Seen>>;

async fn upload(Extension(seen): Extension<Shared>, body: Bytes) -> impl IntoResponse {
    let mut seen = seen.lock();
    seen.uploads.push(body);

    Json(json!([format!("/tmp/gradio/upload-{}", seen.uploads.len())]))
}

async fn call(
    Extension(seen): Extension<Shared>,
    Path(api): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    seen.lock().calls.push(body);

    Json(json!({ "event_id": format!("{api}-event") }))
}

async fn result(Path((api, _event)): Path<(String, String)>) -> impl IntoResponse {
    match api.as_str() {
        "submit_function" => concat!(
            "event: generating\ndata: null\n\n",
            "event: heartbeat\ndata: null\n\n",
            "event: complete\ndata: [{\"path\": \"/tmp/out.png\", \"meta\": {\"_type\": \"gradio.FileData\"}}]\n\n",
        ),
        _ => "event: error\ndata: \"GPU on fire\"\n\n",
    }
}

async fn output() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], OUTPUT)
}

async fn start_fake_gradio() -> (String, Shared) {
    let seen = Shared::default();

    let app = Router::new()
        .route("/upload", post(upload))
        .route("/call/:api", post(call))
        .route("/call/:api/:event", get(result))
        .route("/file=/tmp/out.png", get(output))
        .layer(Extension(seen.clone()));

    let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0)))
        .serve(app.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);

    (format!("http://{addr}/"), seen)
}

async fn images(dir: &tempfile::TempDir) -> Result<(std::path::PathBuf, std::path::PathBuf)> {
    let model = dir.path().join("me.jpg");
    let garment = dir.path().join("shirt.png");
    tokio::fs::write(&model, b"model photo").await?;
    tokio::fs::write(&garment, b"garment photo").await?;

    Ok((model, garment))
}

#[tokio::test]
async fn gradio_round_trip() -> Result<()> {
    let (url, seen) = start_fake_gradio().await;
    let dir = tempfile::tempdir()?;
    let (model, garment) = images(&dir).await?;

    let gradio = Gradio::new(
        &url,
        "/submit_function",
        Some("http://masks/layer_0.png".into()),
    )?;

    let params = TryOnParams {
        cloth_type: ClothType::Lower,
        show_type: ShowType::InputResult,
        num_inference_steps: 50,
        guidance_scale: 3.5,
        seed: 7,
    };
    let image = gradio.try_on(&model, &garment, &params).await?;

    assert_eq!(image.content_type, "image/png");
    assert_eq!(&image.bytes[..], OUTPUT);

    let seen = seen.lock();
    assert_eq!(seen.uploads.len(), 2);

    let data = &seen.calls[0]["data"];
    assert_eq!(data[0]["background"]["path"], "/tmp/gradio/upload-1");
    assert_eq!(data[0]["composite"]["path"], "/tmp/gradio/upload-1");
    assert_eq!(data[0]["layers"][0]["url"], "http://masks/layer_0.png");
    assert_eq!(data[1]["path"], "/tmp/gradio/upload-2");
    assert_eq!(data[2], "lower");
    assert_eq!(data[3], 50);
    assert_eq!(data[4], 3.5);
    assert_eq!(data[5], 7);
    assert_eq!(data[6], "input & result");

    Ok(())
}

#[tokio::test]
async fn gradio_error_is_passed_on() -> Result<()> {
    let (url, _) = start_fake_gradio().await;
    let dir = tempfile::tempdir()?;
    let (model, garment) = images(&dir).await?;

    let gradio = Gradio::new(&url, "/broken", None)?;

    assert_eq!(
        gradio
            .try_on(&model, &garment, &TryOnParams::default())
            .await,
        Err(Error::TryOn("GPU on fire".into()))
    );

    Ok(())
}

#[tokio::test]
async fn gradio_unreachable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (model, garment) = images(&dir).await?;

    // Nothing listens on port 9 (discard) on a test machine.
    let gradio = Gradio::new("http://127.0.0.1:9/", "/submit_function", None)?;

    let response = gradio
        .try_on(&model, &garment, &TryOnParams::default())
        .await;

    assert!(matches!(response, Err(Error::TryOn(_))));

    Ok(())
}

#[tokio::test]
async fn server_uses_gradio_backend() -> Result<()> {
    let (url, seen) = start_fake_gradio().await;

    let dir = tempfile::tempdir()?;
    let mut config = test_config(&dir);
    config.try_on = TryOnBackend::Gradio {
        url,
        api_name: "/submit_function".into(),
        mask_layer: None,
    };

    let server = start_server_with_config(config, dir).await;
    let client = server.client()?;
    client
        .register(&registration("Alice", "alice1", "pw123"))
        .await?;
    client.login("alice1", "pw123").await?;

    client
        .upload_model("me.jpg", Bytes::from_static(b"me"))
        .await?;
    client
        .upload_garment("shirt.png", Bytes::from_static(b"shirt"))
        .await?;

    let image = client.try_on(&TryOn {
        model_image: Some("me.jpg".into()),
        garment_image: Some("shirt.png".into()),
        params: TryOnParams::default(),
    })
    .await?;

    assert_eq!(&image.bytes[..], OUTPUT);
    assert_eq!(seen.lock().calls.len(), 1);

    Ok(())
}

#[tokio::test]
async fn server_reports_gradio_failure() -> Result<()> {
    let (url, _) = start_fake_gradio().await;

    let dir = tempfile::tempdir()?;
    let mut config = test_config(&dir);
    config.try_on = TryOnBackend::Gradio {
        url,
        api_name: "/broken".into(),
        mask_layer: None,
    };

    let server = start_server_with_config(config, dir).await;
    let client = server.client()?;
    client
        .register(&registration("Alice", "alice1", "pw123"))
        .await?;
    client.login("alice1", "pw123").await?;
    client
        .upload_model("me.jpg", Bytes::from_static(b"me"))
        .await?;
    client
        .upload_garment("shirt.png", Bytes::from_static(b"shirt"))
        .await?;

    let response = client
        .try_on(&TryOn {
            model_image: Some("me.jpg".into()),
            garment_image: Some("shirt.png".into()),
            params: TryOnParams::default(),
        })
        .await;

    assert_eq!(response, Err(Error::TryOn("GPU on fire".into())));

    Ok(())
}
