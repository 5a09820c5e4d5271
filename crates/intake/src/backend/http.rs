use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use super::{
    decode_event_stream, AgentEventStream, BackendError, CreateRecordRequest, EventSource,
    IngestBackend, RecordHandle, RemoteRecord, TriggerReceipt, UploadReceipt,
};
use crate::config::ApiConfig;
use crate::error::IntakeError;
use crate::queue::item::{FileId, SourceFile};
use crate::sanitize::{redact_url, truncate_body};

/// HTTP implementation of both collaborator traits.
///
/// Request/response calls use a client with an overall timeout. The event
/// stream gets its own client with only a connect timeout, since a
/// subscription stays open for as long as the backend keeps working.
pub struct HttpBackend {
    client: Client,
    stream_client: Client,
    base_url: String,
    events_url: String,
    token: Option<SecretString>,
}

impl HttpBackend {
    /// Builds a backend from config, resolving the bearer token.
    pub fn new(api: &ApiConfig) -> Result<Self, IntakeError> {
        let token = api.resolve_token()?;
        Ok(Self::with_token(api, token)?)
    }

    pub fn with_token(api: &ApiConfig, token: Option<SecretString>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(api.connect_timeout())
            .timeout(api.request_timeout())
            .build()?;
        let stream_client = Client::builder()
            .connect_timeout(api.connect_timeout())
            .build()?;

        if token.is_none() {
            warn!("No API token configured, requests will be sent unauthenticated");
        }

        Ok(Self {
            client,
            stream_client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            events_url: api.events_base_url().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = redact_url(response.url().as_str());
        let body = response.text().await.unwrap_or_default();
        debug!("{} returned {}", url, status);
        Err(BackendError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

#[async_trait]
impl IngestBackend for HttpBackend {
    async fn upload_blob(&self, file: &SourceFile) -> Result<UploadReceipt, BackendError> {
        let bytes = file
            .read_bytes()
            .await
            .map_err(|e| BackendError::Source(e.to_string()))?;

        let part = Part::bytes(bytes)
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        let form = Form::new().part("file", part);

        debug!("Uploading {} ({} bytes)", file.log_name(), file.size);
        let response = self
            .authorize(self.client.post(self.url("storage/upload")))
            .multipart(form)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_record(
        &self,
        request: &CreateRecordRequest,
    ) -> Result<RecordHandle, BackendError> {
        let response = self
            .authorize(self.client.post(self.url("files")))
            .json(request)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn trigger_processing(&self, file_id: FileId) -> Result<TriggerReceipt, BackendError> {
        let response = self
            .authorize(self.client.post(self.url(&format!("files/{}/process", file_id))))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_record(&self, file_id: FileId) -> Result<RemoteRecord, BackendError> {
        let response = self
            .authorize(self.client.get(self.url(&format!("files/{}", file_id))))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl EventSource for HttpBackend {
    async fn subscribe(&self, file_id: FileId) -> Result<AgentEventStream, BackendError> {
        let url = format!("{}/files/{}/events", self.events_url, file_id);
        debug!("Subscribing to {}", redact_url(&url));

        let response = self
            .authorize(self.stream_client.get(url))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check(response).await?;

        Ok(decode_event_stream(response.bytes_stream()))
    }
}
