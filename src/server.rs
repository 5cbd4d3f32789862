use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, ContentLengthLimitRejection},
        ContentLengthLimit, Path,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, get_service, post, put},
    Extension, Json, Router, TypedHeader,
};
use headers::Cookie;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, info};

use crate::{
    actions::{Garments, Login, Message, TryOn, Whoami},
    config::Config,
    credentials,
    error::Error,
    session::{Registration, Session, SessionGate, SessionToken, Sessions, REGISTERED},
    try_on::{self, TryOnService},
    user::Identity,
    wardrobe::ImageDir,
};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 8501;

/// The largest image upload accepted, in bytes.
pub const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// An upload body, refused up front when its `Content-Length` is too big.
type UploadBody =
    Result<ContentLengthLimit<Bytes, MAX_UPLOAD_BYTES>, ContentLengthLimitRejection<BytesRejection>>;

fn upload_body(body: UploadBody) -> Result<Bytes, Error> {
    match body {
        Ok(ContentLengthLimit(bytes)) => Ok(bytes),
        Err(ContentLengthLimitRejection::PayloadTooLarge(_)) => Err(Error::UploadTooLarge {
            limit: MAX_UPLOAD_BYTES,
        }),
        Err(e) => Err(Error::BadUsage(format!("Could not read the upload: {e}"))),
    }
}

/// Everything handlers need, shared by all requests.
#[derive(Clone)]
struct AppState {
    gate: SessionGate,
    sessions: Sessions,
    wardrobe: ImageDir,
    uploads: ImageDir,
    try_on: Arc<dyn TryOnService>,
}

/// Run blocking work (database access, password hashing) off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(Error::storage)?
}

/// Deserialize a request body.
/// Only the request kind goes in the error, bodies may hold passwords.
fn parse<T: DeserializeOwned>(request: &str, body: &Bytes) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::BadJson {
        request: request.into(),
        problem: e.to_string(),
    })
}

fn token(cookie: Option<TypedHeader<Cookie>>) -> Option<SessionToken> {
    cookie.and_then(|TypedHeader(cookie)| {
        cookie
            .get(SessionToken::COOKIE)
            .and_then(SessionToken::parse)
    })
}

fn require(state: &AppState, cookie: Option<TypedHeader<Cookie>>) -> Result<Identity, Error> {
    state.sessions.get(token(cookie)).require().cloned()
}

async fn build_state(config: &Config) -> Result<AppState, Error> {
    let storage = config.storage.clone();
    let cost = config.password_cost;
    let store = blocking(move || credentials::open(&storage, cost)).await?;

    Ok(AppState {
        gate: SessionGate::new(store),
        sessions: Sessions::new(config.session_idle_timeout()),
        wardrobe: ImageDir::create(&config.wardrobe_dir).await?,
        uploads: ImageDir::create(&config.uploads_dir).await?,
        try_on: try_on::service(&config.try_on)?,
    })
}

async fn run(
    config: Config,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;

    let state = build_state(&config).await?;

    let files = get_service(ServeDir::new(state.wardrobe.root())).handle_error(
        |e: std::io::Error| async move {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Unhandled internal error: {e}"),
            )
        },
    );

    let app = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(whoami))
        .route("/wardrobe", get(list_garments))
        .route("/wardrobe/:name", put(upload_garment))
        .route("/uploads/:name", put(upload_model))
        .route("/try-on", post(try_on))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .nest("/files/wardrobe", files)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Handlers reach storage and sessions through this
                .layer(Extension(state))
                // The config should be known to the web server
                .layer(Extension(config.clone())),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Serve(format!("Could not listen on {addr}: {e}")))?
        .serve(app.into_make_service());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        // Nobody waiting for the port is fine.
        let _ = port_reply.send(addr.port());
    }

    info!("listening on {}", addr);

    server.await.map_err(|e| Error::Serve(e.to_string()))
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(config: Config, allocated_port: oneshot::Sender<u16>) -> Result<(), Error> {
    run(config, None, Some(allocated_port)).await
}

/// Start the server on the given port.
pub async fn run_on_port(config: Config, port: u16) -> Result<(), Error> {
    run(config, Some(port), None).await
}

async fn register(
    Extension(state): Extension<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    let registration: Registration = parse("register", &body)?;
    let gate = state.gate.clone();

    blocking(move || gate.register(&registration)).await?;

    Ok((StatusCode::CREATED, Json(Message::new(REGISTERED))))
}

async fn login(
    Extension(state): Extension<AppState>,
    cookie: Option<TypedHeader<Cookie>>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    let Login { username, password } = parse("login", &body)?;
    let gate = state.gate.clone();

    let session = blocking(move || {
        let mut session = Session::default();
        gate.login(&mut session, &username, &password)?;

        Ok(session)
    })
    .await?;
    let identity = session.require()?.clone();

    // A new login replaces whatever session the browser held before.
    if let Some(previous) = token(cookie) {
        state
            .sessions
            .update(previous, |session| state.gate.logout(session));
    }

    let token = state.sessions.insert(session);
    debug!(sessions = state.sessions.len(), "Session issued");

    Ok((
        [(header::SET_COOKIE, token.set_cookie())],
        Json(Whoami::from(identity)),
    ))
}

async fn logout(
    Extension(state): Extension<AppState>,
    cookie: Option<TypedHeader<Cookie>>,
) -> impl IntoResponse {
    if let Some(token) = token(cookie) {
        state
            .sessions
            .update(token, |session| state.gate.logout(session));
    }

    (
        [(header::SET_COOKIE, SessionToken::clear_cookie())],
        Json(Message::new("Logged out")),
    )
}

async fn whoami(
    Extension(state): Extension<AppState>,
    cookie: Option<TypedHeader<Cookie>>,
) -> Result<Json<Whoami>, Error> {
    let identity = require(&state, cookie)?;

    Ok(Json(identity.into()))
}

async fn list_garments(
    Extension(state): Extension<AppState>,
    cookie: Option<TypedHeader<Cookie>>,
) -> Result<Json<Garments>, Error> {
    require(&state, cookie)?;

    Ok(Json(Garments {
        garments: state.wardrobe.list().await?,
    }))
}

async fn upload_garment(
    Extension(state): Extension<AppState>,
    cookie: Option<TypedHeader<Cookie>>,
    Path(name): Path<String>,
    body: UploadBody,
) -> Result<impl IntoResponse, Error> {
    let identity = require(&state, cookie)?;
    let body = upload_body(body)?;

    state.wardrobe.save(&name, body).await?;
    info!(%identity, %name, "Garment added to wardrobe");

    Ok((StatusCode::CREATED, Json(Message::new("Uploaded successfully!"))))
}

async fn upload_model(
    Extension(state): Extension<AppState>,
    cookie: Option<TypedHeader<Cookie>>,
    Path(name): Path<String>,
    body: UploadBody,
) -> Result<impl IntoResponse, Error> {
    let identity = require(&state, cookie)?;
    let body = upload_body(body)?;

    state.uploads.save(&name, body).await?;
    info!(%identity, %name, "Model image uploaded");

    Ok((StatusCode::CREATED, Json(Message::new("Uploaded successfully!"))))
}

async fn try_on(
    Extension(state): Extension<AppState>,
    cookie: Option<TypedHeader<Cookie>>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    let identity = require(&state, cookie)?;
    let TryOn {
        model_image,
        garment_image,
        params,
    } = parse("try-on", &body)?;

    let non_empty = |name: Option<String>| name.filter(|name| !name.is_empty());
    let (model_image, garment_image) = match (non_empty(model_image), non_empty(garment_image)) {
        (Some(model), Some(garment)) => (model, garment),
        _ => return Err(Error::MissingImages),
    };

    params.validate()?;

    let model = state.uploads.path(&model_image).await?;
    let garment = state.wardrobe.path(&garment_image).await?;

    info!(%identity, %model_image, %garment_image, %params, "Trying on");
    let image = state.try_on.try_on(&model, &garment, &params).await?;

    Ok(([(header::CONTENT_TYPE, image.content_type)], image.bytes))
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Vton v{}\n", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;

    fn upload_app() -> Router {
        Router::new().route(
            "/",
            put(|body: UploadBody| async move {
                upload_body(body).map(|bytes| bytes.len().to_string())
            }),
        )
    }

    fn upload(length: u64, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/")
            .header(header::CONTENT_LENGTH, length)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn oversized_uploads_are_refused_unread() {
        let response = upload_app()
            .oneshot(upload(MAX_UPLOAD_BYTES + 1, ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn uploads_within_the_limit_pass() {
        let response = upload_app().oneshot(upload(5, "hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
