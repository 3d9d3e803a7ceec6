//! Typed HTTP client for the registry API.
//!
//! One method per endpoint. Every request carries the stored bearer token
//! when there is one; every non-success response becomes an [`ApiError`].
//!
//! # Endpoints
//!
//! | Method | Path | Client call |
//! |--------|------|-------------|
//! | `POST` | `/token/` | [`RegistryClient::login`] |
//! | `POST` | `/auth/register/` | [`RegistryClient::register`] |
//! | `GET` / `PATCH` | `/auth/me/` | [`RegistryClient::profile`], [`RegistryClient::update_profile`] |
//! | `GET` | `/registry/elements/` | [`RegistryClient::list_elements`] |
//! | `GET` | `/registry/elements/suggest/` | [`RegistryClient::suggest`] |
//! | `GET` | `/registry/elements/facets/` | [`RegistryClient::facets`] |
//! | `GET` | `/registry/config/` | [`RegistryClient::registry_columns`] |
//! | `GET` / `POST` / `PATCH` | `/registry/elements/{id}/` | element read and writes |
//! | `POST` | `/registry/import/upload/` | [`RegistryClient::upload_import`] |
//! | `GET` | `/registry/tasks/{id}/` | [`RegistryClient::task_status`] |
//! | `GET` | `/registry/import/template/` | [`RegistryClient::download_template`] |
//! | `GET` | `/registry/elements/{id}/pdf/` | [`RegistryClient::download_passport`] |
//! | `POST` / `DELETE` | `/registry/elements/{id}/…attachment…` | attachments |
//! | `POST` | `/registry/elements/{id}/upload_structure/` | [`RegistryClient::upload_structure`] |
//! | `GET` | `/registry/stats/` | [`RegistryClient::statistics`] |
//! | `POST` | `/support/tickets/` | [`RegistryClient::submit_ticket`] |

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, UnauthorizedPolicy};
use crate::error::ApiError;
use crate::models::{
    facet_groups_from_value, Attachment, Credentials, DocType, Download, FacetGroup,
    ImportTask, Paginated, Profile, ProfileUpdate, Registration, RegistryColumn, RegistryStats,
    SuggestionItem, SupportTicket, TokenPair, UploadAccepted, UploadFile,
};
use crate::query::{FacetQuery, RowQuery};
use crate::record::{submission_payload, SubstanceRecord};
use crate::session::TokenStore;
use crate::traits::{ImportApi, SearchApi};

#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    on_unauthorized: UnauthorizedPolicy,
    suggest_min_chars: usize,
}

impl RegistryClient {
    pub fn new(config: &Config, tokens: Arc<TokenStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            tokens,
            on_unauthorized: config.auth.on_unauthorized,
            suggest_min_chars: config.search.suggest_min_chars,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match self.tokens.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and turn non-success statuses into errors.
    async fn send(&self, path: &str, builder: RequestBuilder) -> Result<Response, ApiError> {
        let resp = builder.send().await.map_err(|e| {
            tracing::debug!(path, error = %e, "request failed");
            ApiError::Transport(e)
        })?;
        let status = resp.status();
        tracing::debug!(path, status = status.as_u16(), "response");

        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let err = ApiError::from_status(status.as_u16(), path, &body);
        if err.is_unauthorized() && self.on_unauthorized == UnauthorizedPolicy::Logout {
            tracing::warn!(path, "unauthorized, clearing stored session");
            if let Err(e) = self.tokens.clear() {
                tracing::warn!(error = %e, "failed to clear session");
            }
        }
        Err(err)
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(path, self.request(Method::GET, path)).await?;
        Self::json(resp).await
    }

    async fn download(&self, path: &str) -> Result<Download, ApiError> {
        let resp = self.send(path, self.request(Method::GET, path)).await?;
        let file_name = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename);
        let bytes = resp.bytes().await?.to_vec();
        Ok(Download { file_name, bytes })
    }

    // ============ Auth & profile ============

    pub async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
        let path = "/token/";
        let resp = self
            .send(path, self.http.post(format!("{}{}", self.base_url, path)).json(credentials))
            .await?;
        Self::json(resp).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<Value, ApiError> {
        let path = "/auth/register/";
        let resp = self
            .send(path, self.request(Method::POST, path).json(registration))
            .await?;
        Self::json(resp).await
    }

    pub async fn profile(&self) -> Result<Profile, ApiError> {
        self.get_json("/auth/me/").await
    }

    /// Update the profile. With a logo the request goes out as multipart,
    /// with the company fields JSON-encoded in a `company` part.
    pub async fn update_profile(
        &self,
        update: &ProfileUpdate,
        logo: Option<&UploadFile>,
    ) -> Result<Profile, ApiError> {
        let path = "/auth/me/";
        let builder = self.request(Method::PATCH, path);
        let builder = match logo {
            None => builder.json(update),
            Some(file) => {
                let mut form = Form::new().part("logo", file_part(file)?);
                if let Some(email) = &update.email {
                    form = form.text("email", email.clone());
                }
                if !update.company.is_empty() {
                    form = form.text("company", serde_json::to_string(&update.company)?);
                }
                builder.multipart(form)
            }
        };
        let resp = self.send(path, builder).await?;
        Self::json(resp).await
    }

    // ============ Registry ============

    pub async fn list_elements(
        &self,
        query: &RowQuery,
    ) -> Result<Paginated<SubstanceRecord>, ApiError> {
        let path = "/registry/elements/";
        let resp = self
            .send(path, self.request(Method::GET, path).query(&query.to_params()))
            .await?;
        Self::json(resp).await
    }

    /// Name suggestions. Short inputs return nothing without a request.
    pub async fn suggest(&self, text: &str) -> Result<Vec<SuggestionItem>, ApiError> {
        let text = text.trim();
        if text.chars().count() < self.suggest_min_chars {
            return Ok(Vec::new());
        }
        let path = "/registry/elements/suggest/";
        let resp = self
            .send(path, self.request(Method::GET, path).query(&[("search", text)]))
            .await?;
        Self::json(resp).await
    }

    pub async fn facets(&self, query: &FacetQuery) -> Result<Vec<FacetGroup>, ApiError> {
        let path = "/registry/elements/facets/";
        let resp = self
            .send(path, self.request(Method::GET, path).query(&query.to_params()))
            .await?;
        let value: Value = Self::json(resp).await?;
        Ok(facet_groups_from_value(value)?)
    }

    pub async fn registry_columns(&self) -> Result<Vec<RegistryColumn>, ApiError> {
        let mut columns: Vec<RegistryColumn> = self.get_json("/registry/config/").await?;
        // The primary name column always leads.
        if let Some(pos) = columns.iter().position(|c| c.field == "primary_name_ru") {
            let name = columns.remove(pos);
            columns.insert(0, name);
        }
        Ok(columns)
    }

    pub async fn element(&self, id: i64) -> Result<SubstanceRecord, ApiError> {
        self.get_json(&format!("/registry/elements/{}/", id)).await
    }

    pub async fn create_element(
        &self,
        record: &SubstanceRecord,
    ) -> Result<SubstanceRecord, ApiError> {
        let path = "/registry/elements/";
        let resp = self
            .send(
                path,
                self.request(Method::POST, path).json(&submission_payload(record)),
            )
            .await?;
        Self::json(resp).await
    }

    pub async fn update_element(
        &self,
        id: i64,
        record: &SubstanceRecord,
    ) -> Result<SubstanceRecord, ApiError> {
        let path = format!("/registry/elements/{}/", id);
        let resp = self
            .send(
                &path,
                self.request(Method::PATCH, &path)
                    .json(&submission_payload(record)),
            )
            .await?;
        Self::json(resp).await
    }

    // ============ Import ============

    pub async fn upload_import(&self, file: &UploadFile) -> Result<String, ApiError> {
        let path = "/registry/import/upload/";
        let form = Form::new().part("file", file_part(file)?);
        let resp = self
            .send(path, self.request(Method::POST, path).multipart(form))
            .await?;
        let accepted: UploadAccepted = Self::json(resp).await?;
        Ok(accepted.task_id)
    }

    pub async fn task_status(&self, task_id: &str) -> Result<ImportTask, ApiError> {
        let mut task: ImportTask = self
            .get_json(&format!("/registry/tasks/{}/", task_id))
            .await?;
        task.task_id = task_id.to_string();
        Ok(task)
    }

    // ============ Files ============

    pub async fn download_template(&self) -> Result<Download, ApiError> {
        self.download("/registry/import/template/").await
    }

    pub async fn download_passport(&self, id: i64) -> Result<Download, ApiError> {
        self.download(&format!("/registry/elements/{}/pdf/", id))
            .await
    }

    pub async fn upload_attachment(
        &self,
        id: i64,
        file: &UploadFile,
        description: &str,
        doc_type: DocType,
    ) -> Result<Attachment, ApiError> {
        let path = format!("/registry/elements/{}/upload_attachment/", id);
        let form = Form::new()
            .part("file", file_part(file)?)
            .text("description", description.to_string())
            .text("doc_type", doc_type.as_str());
        let resp = self
            .send(&path, self.request(Method::POST, &path).multipart(form))
            .await?;
        Self::json(resp).await
    }

    pub async fn delete_attachment(&self, id: i64, attachment_id: i64) -> Result<(), ApiError> {
        let path = format!(
            "/registry/elements/{}/delete_attachment/{}/",
            id, attachment_id
        );
        self.send(&path, self.request(Method::DELETE, &path))
            .await?;
        Ok(())
    }

    pub async fn upload_structure(
        &self,
        id: i64,
        image: &UploadFile,
    ) -> Result<SubstanceRecord, ApiError> {
        let path = format!("/registry/elements/{}/upload_structure/", id);
        let form = Form::new().part("image", file_part(image)?);
        let resp = self
            .send(&path, self.request(Method::POST, &path).multipart(form))
            .await?;
        Self::json(resp).await
    }

    // ============ Stats & support ============

    pub async fn statistics(&self) -> Result<RegistryStats, ApiError> {
        self.get_json("/registry/stats/").await
    }

    pub async fn submit_ticket(&self, ticket: &SupportTicket) -> Result<Value, ApiError> {
        let path = "/support/tickets/";
        let mut form = Form::new()
            .text("subject", ticket.subject.clone())
            .text("message", ticket.message.clone());
        if let Some(email) = ticket.contact_email.as_ref().filter(|e| !e.trim().is_empty()) {
            form = form.text("contact_email", email.clone());
        }
        if let Some(file) = &ticket.file {
            form = form.part("file", file_part(file)?);
        }
        let resp = self
            .send(path, self.request(Method::POST, path).multipart(form))
            .await?;
        Self::json(resp).await
    }
}

fn file_part(file: &UploadFile) -> Result<Part, ApiError> {
    Ok(Part::bytes(file.content.clone())
        .file_name(file.file_name.clone())
        .mime_str(file.mime())?)
}

/// Pull `filename` out of a `Content-Disposition` header.
fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("filename=")?;
        let value = value.trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[async_trait]
impl ImportApi for RegistryClient {
    async fn upload(&self, file: &UploadFile) -> Result<String, ApiError> {
        self.upload_import(file).await
    }

    async fn task_status(&self, task_id: &str) -> Result<ImportTask, ApiError> {
        RegistryClient::task_status(self, task_id).await
    }
}

#[async_trait]
impl SearchApi for RegistryClient {
    async fn rows(&self, query: &RowQuery) -> Result<Paginated<SubstanceRecord>, ApiError> {
        self.list_elements(query).await
    }

    async fn facets(&self, query: &FacetQuery) -> Result<Vec<FacetGroup>, ApiError> {
        RegistryClient::facets(self, query).await
    }
}
