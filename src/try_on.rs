use std::{fmt::Display, path::Path, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Error;

/// Which part of the body the garment covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClothType {
    /// Tops.
    #[default]
    Upper,

    /// Trousers, skirts.
    Lower,

    /// Dresses, overalls.
    Overall,
}

impl ClothType {
    /// The value the synthesis service expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClothType::Upper => "upper",
            ClothType::Lower => "lower",
            ClothType::Overall => "overall",
        }
    }
}

/// What the synthesis service should put in the returned image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShowType {
    /// The inputs, the mask used and the result side by side.
    #[default]
    #[serde(rename = "input & mask & result")]
    InputMaskResult,

    /// The inputs and the result side by side.
    #[serde(rename = "input & result")]
    InputResult,
}

impl ShowType {
    /// The value the synthesis service expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShowType::InputMaskResult => "input & mask & result",
            ShowType::InputResult => "input & result",
        }
    }
}

/// Knobs for a single generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TryOnParams {
    /// See [`ClothType`].
    pub cloth_type: ClothType,

    /// See [`ShowType`].
    pub show_type: ShowType,

    /// Denoising steps. More is slower and finer.
    pub num_inference_steps: u32,

    /// How strongly the garment conditions the result.
    pub guidance_scale: f64,

    /// Fixes the randomness of a generation.
    pub seed: u32,
}

impl TryOnParams {
    /// Allowed inference steps.
    pub const STEPS: std::ops::RangeInclusive<u32> = 50..=200;

    /// Allowed guidance scales.
    pub const GUIDANCE: std::ops::RangeInclusive<f64> = 1.0..=10.0;

    /// Allowed seeds.
    pub const SEEDS: std::ops::RangeInclusive<u32> = 1..=100;

    /// Check all values are in range.
    pub fn validate(&self) -> Result<(), Error> {
        if !Self::STEPS.contains(&self.num_inference_steps) {
            return Err(Error::BadUsage(format!(
                "Number of inference steps must be within {:?}, got {}",
                Self::STEPS,
                self.num_inference_steps
            )));
        }

        if !Self::GUIDANCE.contains(&self.guidance_scale) {
            return Err(Error::BadUsage(format!(
                "Guidance scale must be within {:?}, got {}",
                Self::GUIDANCE,
                self.guidance_scale
            )));
        }

        if !Self::SEEDS.contains(&self.seed) {
            return Err(Error::BadUsage(format!(
                "Seed must be within {:?}, got {}",
                Self::SEEDS,
                self.seed
            )));
        }

        Ok(())
    }
}

impl Default for TryOnParams {
    fn default() -> Self {
        Self {
            cloth_type: ClothType::default(),
            show_type: ShowType::default(),
            num_inference_steps: 100,
            guidance_scale: 2.5,
            seed: 42,
        }
    }
}

impl Display for TryOnParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, steps: {}, guidance: {}, seed: {}, show: {}",
            self.cloth_type.as_str(),
            self.num_inference_steps,
            self.guidance_scale,
            self.seed,
            self.show_type.as_str()
        )
    }
}

/// An image produced by the synthesis service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// MIME type, e.g. `image/png`.
    pub content_type: String,

    /// Encoded image data.
    pub bytes: Bytes,
}

/// Guess an image MIME type from a file name or URL.
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit('.')
        .next()
        .map(|extension| extension.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Something able to dress a model in a garment.
#[async_trait]
pub trait TryOnService: Send + Sync {
    /// Generate an image of the model wearing the garment.
    ///
    /// Failures are reported once, no retries.
    async fn try_on(
        &self,
        model_image: &Path,
        garment_image: &Path,
        params: &TryOnParams,
    ) -> Result<GeneratedImage, Error>;
}

/// Which try-on service to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TryOnBackend {
    /// A remote service speaking the Gradio HTTP API.
    Gradio {
        /// Where the service lives, e.g. `http://127.0.0.1:7860/`.
        url: String,

        /// The endpoint to call, e.g. `/submit_function`.
        api_name: String,

        /// URL of an image used as the sole mask layer of the person image.
        mask_layer: Option<String>,
    },

    /// Hands the garment image back. No network involved.
    Mock,
}

impl Default for TryOnBackend {
    fn default() -> Self {
        Self::Gradio {
            url: "http://127.0.0.1:7860/".into(),
            api_name: "/submit_function".into(),
            mask_layer: None,
        }
    }
}

/// Build the configured service.
pub fn service(backend: &TryOnBackend) -> Result<Arc<dyn TryOnService>, Error> {
    let service: Arc<dyn TryOnService> = match backend {
        TryOnBackend::Gradio {
            url,
            api_name,
            mask_layer,
        } => Arc::new(Gradio::new(url, api_name, mask_layer.clone())?),
        TryOnBackend::Mock => Arc::new(Mock),
    };
    info!(?backend, "Try-on service ready");

    Ok(service)
}

/// See [`TryOnBackend::Mock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Mock;

#[async_trait]
impl TryOnService for Mock {
    async fn try_on(
        &self,
        model_image: &Path,
        garment_image: &Path,
        params: &TryOnParams,
    ) -> Result<GeneratedImage, Error> {
        debug!(?model_image, ?garment_image, %params, "Mock try-on");

        let bytes = tokio::fs::read(garment_image)
            .await
            .map_err(|e| Error::TryOn(e.to_string()))?;

        Ok(GeneratedImage {
            content_type: content_type_for(&garment_image.to_string_lossy()).into(),
            bytes: bytes.into(),
        })
    }
}

/// See [`TryOnBackend::Gradio`].
#[derive(Debug, Clone)]
pub struct Gradio {
    http: reqwest::Client,
    base: Url,
    api_name: String,
    mask_layer: Option<String>,
}

fn remote(e: impl Display) -> Error {
    Error::TryOn(e.to_string())
}

#[derive(Debug, Deserialize)]
struct Submitted {
    event_id: String,
}

/// Find the result in a Gradio server-sent event stream.
///
/// The stream ends with either a `complete` event carrying the output values,
/// or an `error` event.
pub fn parse_event_stream(stream: &str) -> Result<Value, Error> {
    let normalized = stream.replace("\r\n", "\n");

    for block in normalized.split("\n\n") {
        let mut event = None;
        let mut data = vec![];

        for line in block.lines() {
            if let Some(name) = line.strip_prefix("event:") {
                event = Some(name.trim());
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push(value.trim_start());
            }
        }

        let data = data.join("\n");

        match event {
            Some("complete") => {
                return serde_json::from_str(&data)
                    .map_err(|e| Error::TryOn(format!("unreadable result `{data}`: {e}")));
            }
            Some("error") => {
                let message = match serde_json::from_str::<Value>(&data) {
                    Ok(Value::String(message)) => message,
                    Ok(Value::Null) | Err(_) if data.is_empty() || data == "null" => {
                        "the service reported an error".into()
                    }
                    _ => data,
                };
                return Err(Error::TryOn(message));
            }
            _ => continue,
        }
    }

    Err(Error::TryOn(
        "the service closed the stream without a result".into(),
    ))
}

fn file_data(path: &str, orig_name: Option<&str>) -> Value {
    json!({
        "path": path,
        "orig_name": orig_name,
        "meta": { "_type": "gradio.FileData" },
    })
}

fn remote_file_data(url: &str) -> Value {
    json!({
        "path": url,
        "url": url,
        "meta": { "_type": "gradio.FileData" },
    })
}

impl Gradio {
    /// A client for the service at `url`.
    pub fn new(url: &str, api_name: &str, mask_layer: Option<String>) -> Result<Self, Error> {
        let mut base = Url::parse(url)
            .map_err(|e| Error::BadConfig(format!("Bad try-on service url `{url}`: {e}")))?;

        // Joining relative paths onto the base needs the trailing slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_name: api_name.trim_start_matches('/').to_owned(),
            mask_layer,
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base.join(path).map_err(remote)
    }

    async fn upload(&self, path: &Path) -> Result<Value, Error> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".into());
        let contents = tokio::fs::read(path).await.map_err(remote)?;

        let form = multipart::Form::new().part(
            "files",
            multipart::Part::bytes(contents).file_name(name.clone()),
        );

        let uploaded: Vec<String> = self
            .http
            .post(self.url("upload")?)
            .multipart(form)
            .send()
            .await
            .map_err(remote)?
            .error_for_status()
            .map_err(remote)?
            .json()
            .await
            .map_err(remote)?;

        let remote_path = uploaded
            .into_iter()
            .next()
            .ok_or_else(|| Error::TryOn(format!("upload of `{name}` returned no path")))?;
        debug!(%name, %remote_path, "Uploaded");

        Ok(file_data(&remote_path, Some(&name)))
    }

    async fn submit(&self, data: Vec<Value>) -> Result<Value, Error> {
        let submitted: Submitted = self
            .http
            .post(self.url(&format!("call/{}", self.api_name))?)
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(remote)?
            .error_for_status()
            .map_err(remote)?
            .json()
            .await
            .map_err(remote)?;
        debug!(event_id = %submitted.event_id, "Submitted");

        let stream = self
            .http
            .get(self.url(&format!(
                "call/{}/{}",
                self.api_name, submitted.event_id
            ))?)
            .send()
            .await
            .map_err(remote)?
            .error_for_status()
            .map_err(remote)?
            .text()
            .await
            .map_err(remote)?;

        parse_event_stream(&stream)
    }

    async fn download(&self, output: &Value) -> Result<GeneratedImage, Error> {
        let url = match (
            output.get("url").and_then(Value::as_str),
            output.get("path").and_then(Value::as_str),
        ) {
            (Some(url), _) => Url::parse(url).map_err(remote)?,
            (None, Some(path)) => self.url(&format!("file={path}"))?,
            (None, None) => {
                return Err(Error::TryOn(format!(
                    "the result holds no image: {output}"
                )))
            }
        };

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(remote)?
            .error_for_status()
            .map_err(remote)?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("image/"))
            .map(str::to_owned)
            .unwrap_or_else(|| content_type_for(url.path()).into());

        let bytes = response.bytes().await.map_err(remote)?;

        Ok(GeneratedImage {
            content_type,
            bytes,
        })
    }
}

#[async_trait]
impl TryOnService for Gradio {
    async fn try_on(
        &self,
        model_image: &Path,
        garment_image: &Path,
        params: &TryOnParams,
    ) -> Result<GeneratedImage, Error> {
        info!(base = %self.base, api = %self.api_name, %params, "Requesting try-on");

        let person = self.upload(model_image).await?;
        let cloth = self.upload(garment_image).await?;

        let layers = self
            .mask_layer
            .iter()
            .map(|url| remote_file_data(url))
            .collect::<Vec<_>>();

        let person_image = json!({
            "background": person,
            "layers": layers,
            "composite": person,
        });

        let outputs = self
            .submit(vec![
                person_image,
                cloth,
                json!(params.cloth_type.as_str()),
                json!(params.num_inference_steps),
                json!(params.guidance_scale),
                json!(params.seed),
                json!(params.show_type.as_str()),
            ])
            .await
            .map_err(|e| {
                warn!(%e, "Try-on failed");
                e
            })?;

        let output = match &outputs {
            Value::Array(values) => values.first().cloned(),
            other => Some(other.clone()),
        }
        .ok_or_else(|| Error::TryOn("the service returned no outputs".into()))?;

        self.download(&output).await
    }
}
