use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{ StreamExt, TryStreamExt };
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, Response };
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Value };
use url::Url;

use super::error::TransportError;
use super::ndjson::NdjsonStream;
use super::shape::RequestBody;
use crate::config::ClientConfig;

pub const TAGS_ROUTE: &str = "/api/tags";
pub const SHOW_ROUTE: &str = "/api/show";
pub const PULL_ROUTE: &str = "/api/pull";

/// Raw body of a streaming reply, read by read.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// HTTP access to one Ollama host. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OllamaTransport {
    http: HttpClient,
    base_url: String,
}

impl OllamaTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut builder = HttpClient::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(|source| TransportError::Request {
            url: config.host.clone(),
            source,
        })?;
        Self::with_client(http, &config.host)
    }

    pub fn with_client(http: HttpClient, host: &str) -> Result<Self, TransportError> {
        Url::parse(host).map_err(|source| TransportError::InvalidHost {
            host: host.to_string(),
            source,
        })?;
        info!("Ollama transport configured for {}", host);
        Ok(Self {
            http,
            base_url: host.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    /// Lightweight check of `/api/tags`. Any failure reads as "unavailable".
    pub async fn check_availability(&self) -> bool {
        let url = self.endpoint(TAGS_ROUTE);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("Ollama availability check returned {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Ollama unavailable at {}: {}", self.base_url, e);
                false
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, TransportError> {
        let url = self.endpoint(TAGS_ROUTE);
        let resp = self.http
            .get(&url)
            .send().await
            .map_err(|source| TransportError::Request { url: url.clone(), source })?;
        let resp = ensure_success(url.clone(), resp).await?;
        let tags = resp
            .json::<TagsResponse>().await
            .map_err(|source| TransportError::Body { url, source })?;
        Ok(tags.models)
    }

    /// Modelfile, parameters, template and details of one installed model.
    pub async fn show_model(&self, name: &str) -> Result<Value, TransportError> {
        let url = self.endpoint(SHOW_ROUTE);
        let resp = self.post(&url, &json!({ "name": name })).await?;
        resp.json::<Value>().await.map_err(|source| TransportError::Body { url, source })
    }

    /// Starts downloading a model. Yields the server's progress objects
    /// (`{"status", "digest", "total", "completed"}`) as they arrive.
    pub async fn pull_model(&self, name: &str) -> Result<NdjsonStream<ByteStream>, TransportError> {
        let url = self.endpoint(PULL_ROUTE);
        info!("Pulling model {} from {}", name, self.base_url);
        let resp = self.post(&url, &json!({ "name": name, "stream": true })).await?;
        Ok(NdjsonStream::new(body_stream(url, resp)))
    }

    /// Sends a non-streaming request and returns the whole JSON body.
    pub async fn send(&self, body: &RequestBody) -> Result<Value, TransportError> {
        let url = self.endpoint(body.shape().route());
        debug!("POST {} (stream={})", url, body.is_streaming());
        let resp = self.post(&url, body).await?;
        resp.json::<Value>().await.map_err(|source| TransportError::Body { url, source })
    }

    /// Sends a streaming request and hands back the live response body.
    ///
    /// Dropping the returned stream closes the connection.
    pub async fn send_streaming(&self, body: &RequestBody) -> Result<ByteStream, TransportError> {
        let url = self.endpoint(body.shape().route());
        debug!("POST {} (stream={})", url, body.is_streaming());
        let resp = self.post(&url, body).await?;
        Ok(body_stream(url, resp))
    }

    async fn post<T>(&self, url: &str, body: &T) -> Result<Response, TransportError>
        where T: Serialize + ?Sized
    {
        let resp = self.http
            .post(url)
            .json(body)
            .send().await
            .map_err(|source| TransportError::Request { url: url.to_string(), source })?;
        ensure_success(url.to_string(), resp).await
    }
}

fn body_stream(url: String, resp: Response) -> ByteStream {
    resp
        .bytes_stream()
        .map_err(move |source| TransportError::Stream { url: url.clone(), source })
        .boxed()
}

async fn ensure_success(url: String, resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status { url, status, body })
}
