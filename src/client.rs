use bytes::Bytes;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    actions::{Garments, Login, Message, TryOn, Whoami},
    error::{Error, ErrorBody},
    session::Registration,
    try_on::GeneratedImage,
};

/// Talks to a running server over HTTP.
///
/// Keeps the session cookie, so logging in once covers later calls.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    http: reqwest::Client,
    base: Url,
}

fn transport(e: reqwest::Error) -> Error {
    Error::Serve(e.to_string())
}

/// Turn a response into its body, or into the error the server sent.
async fn checked(response: Response) -> Result<Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.bytes().await.map_err(transport)?;

    match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(ErrorBody { error, .. }) => Err(error),
        Err(_) => Err(Error::Serve(format!(
            "{status}: {}",
            String::from_utf8_lossy(&body)
        ))),
    }
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    checked(response).await?.json().await.map_err(transport)
}

impl ClientHandle {
    /// A client for the server at the given address and port.
    pub fn new(address: &str, port: u16) -> Result<Self, Error> {
        let base = Url::parse(&format!("http://{address}:{port}/"))
            .map_err(|e| Error::BadUsage(e.to_string()))?;
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(transport)?;

        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base
            .join(path)
            .map_err(|e| Error::BadUsage(e.to_string()))
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, registration: &Registration) -> Result<Message, Error> {
        debug!(username = %registration.username, "Registering");

        let response = self
            .http
            .post(self.url("register")?)
            .json(registration)
            .send()
            .await
            .map_err(transport)?;

        json(response).await
    }

    /// Log in, keeping the session for later calls.
    pub async fn login(&self, username: &str, password: &str) -> Result<Whoami, Error> {
        let response = self
            .http
            .post(self.url("login")?)
            .json(&Login {
                username: username.into(),
                password: password.into(),
            })
            .send()
            .await
            .map_err(transport)?;

        json(response).await
    }

    /// End the session.
    pub async fn logout(&self) -> Result<Message, Error> {
        let response = self
            .http
            .post(self.url("logout")?)
            .send()
            .await
            .map_err(transport)?;

        json(response).await
    }

    /// Who the session belongs to.
    pub async fn whoami(&self) -> Result<Whoami, Error> {
        let response = self
            .http
            .get(self.url("me")?)
            .send()
            .await
            .map_err(transport)?;

        json(response).await
    }

    /// Names of garments in the wardrobe.
    pub async fn garments(&self) -> Result<Vec<String>, Error> {
        let response = self
            .http
            .get(self.url("wardrobe")?)
            .send()
            .await
            .map_err(transport)?;

        json::<Garments>(response).await.map(|g| g.garments)
    }

    async fn put_image(&self, path: &str, contents: Bytes) -> Result<Message, Error> {
        let response = self
            .http
            .put(self.url(path)?)
            .body(contents)
            .send()
            .await
            .map_err(transport)?;

        json(response).await
    }

    /// Add a garment to the wardrobe.
    pub async fn upload_garment(&self, name: &str, contents: Bytes) -> Result<Message, Error> {
        self.put_image(&format!("wardrobe/{name}"), contents).await
    }

    /// Upload a model photo.
    pub async fn upload_model(&self, name: &str, contents: Bytes) -> Result<Message, Error> {
        self.put_image(&format!("uploads/{name}"), contents).await
    }

    /// Fetch a wardrobe garment file.
    pub async fn garment_file(&self, name: &str) -> Result<Bytes, Error> {
        let response = self
            .http
            .get(self.url(&format!("files/wardrobe/{name}"))?)
            .send()
            .await
            .map_err(transport)?;

        checked(response).await?.bytes().await.map_err(transport)
    }

    /// Ask for a try-on image.
    pub async fn try_on(&self, request: &TryOn) -> Result<GeneratedImage, Error> {
        let response = self
            .http
            .post(self.url("try-on")?)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let response = checked(response).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_owned();
        let bytes = response.bytes().await.map_err(transport)?;

        Ok(GeneratedImage {
            content_type,
            bytes,
        })
    }

    /// Send a raw request body to an endpoint, for poking at error handling.
    pub async fn post_raw(&self, path: &str, body: &'static str) -> Result<Message, Error> {
        let response = self
            .http
            .post(self.url(path)?)
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        json(response).await
    }
}
