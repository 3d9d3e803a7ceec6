//! Wire types exchanged with the registry API.
//!
//! Field names follow the JSON the server sends; Rust names are the same
//! snake_case keys except where a `serde(rename)` says otherwise.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

// ============ Auth & profile ============

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Access/refresh pair returned by `POST /token/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Company {
    pub company_name: String,
    #[serde(default)]
    pub inn: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub is_manufacturer: bool,
    #[serde(default)]
    pub is_importer: bool,
    #[serde(default)]
    pub is_exporter: bool,
    #[serde(default, skip_serializing)]
    pub logo: Option<String>,
}

impl Company {
    /// Roles the organization has declared, in display order.
    pub fn roles(&self) -> Vec<&'static str> {
        let mut roles = Vec::new();
        if self.is_manufacturer {
            roles.push("manufacturer");
        }
        if self.is_importer {
            roles.push("importer");
        }
        if self.is_exporter {
            roles.push("exporter");
        }
        roles
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub company: Company,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub company: Option<Company>,
}

/// Partial profile update. Only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub company: BTreeMap<String, Value>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.company.is_empty()
    }
}

// ============ Registry listing ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementStatus {
    Draft,
    Pending,
    Published,
    Rejected,
}

impl ElementStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ElementStatus::Draft => "Draft",
            ElementStatus::Pending => "Under review",
            ElementStatus::Published => "Published",
            ElementStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paginated<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionItem {
    pub id: i64,
    #[serde(default)]
    pub primary_name_ru: String,
    #[serde(default)]
    pub cas_number: Option<String>,
}

/// One column of the public registry table (`GET /registry/config/`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegistryColumn {
    pub field: String,
    #[serde(rename = "headerName")]
    pub header_name: String,
    #[serde(rename = "minWidth", default = "default_min_width")]
    pub min_width: u32,
}

fn default_min_width() -> u32 {
    150
}

/// Categorical filter value: a string code or a boolean flag.
///
/// Two values are equal when their canonical string forms are equal, so
/// `Flag(true)` and `Text("true")` select the same filter option.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Flag(bool),
    Text(String),
}

impl FilterValue {
    pub fn canonical(&self) -> String {
        match self {
            FilterValue::Flag(b) => b.to_string(),
            FilterValue::Text(s) => s.clone(),
        }
    }

    /// Parse a CLI-style value: `true`/`false` become flags.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => FilterValue::Flag(true),
            "false" => FilterValue::Flag(false),
            other => FilterValue::Text(other.to_string()),
        }
    }
}

impl PartialEq for FilterValue {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for FilterValue {}

impl std::hash::Hash for FilterValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Flag(b)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FacetOption {
    pub value: FilterValue,
    pub label: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FacetGroup {
    /// Filter key; filled in from the response map key.
    #[serde(default)]
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub options: Vec<FacetOption>,
}

/// Parse the facets response (`filterKey → group`), keeping server order.
pub fn facet_groups_from_value(value: Value) -> Result<Vec<FacetGroup>, serde_json::Error> {
    let map: serde_json::Map<String, Value> = serde_json::from_value(value)?;
    map.into_iter()
        .map(|(key, v)| {
            let mut group: FacetGroup = serde_json::from_value(v)?;
            group.key = key;
            Ok(group)
        })
        .collect()
}

// ============ Import tasks ============

#[derive(Debug, Clone, Deserialize)]
pub struct UploadAccepted {
    pub task_id: String,
}

/// Server-side status of an asynchronous import task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Progress,
    Success,
    Done,
    Failure,
    Error,
    /// Anything else the task backend reports (e.g. `STARTED`, `RETRY`).
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Done | TaskStatus::Failure | TaskStatus::Error
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Progress => "PROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Done => "DONE",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Error => "ERROR",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskResult {
    #[serde(default, alias = "importedCount")]
    pub imported: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Task as returned by `GET /registry/tasks/{id}/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportTask {
    /// The status endpoint does not echo the id; the poller fills it in.
    #[serde(default)]
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "lenient_result")]
    pub result: Option<TaskResult>,
}

/// A failed task may carry an exception string instead of a result object.
fn lenient_result<'de, D>(deserializer: D) -> Result<Option<TaskResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(v @ Value::Object(_)) => serde_json::from_value(v).ok(),
        Some(Value::String(message)) => Some(TaskResult {
            imported: 0,
            errors: vec![message],
        }),
        _ => None,
    })
}

// ============ Attachments, stats, support ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    Passport,
    Certificate,
    LabProtocol,
    Declaration,
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Passport => "PASSPORT",
            DocType::Certificate => "CERTIFICATE",
            DocType::LabProtocol => "LAB_PROTOCOL",
            DocType::Declaration => "DECLARATION",
            DocType::Other => "OTHER",
        }
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "PASSPORT" => Ok(DocType::Passport),
            "CERTIFICATE" => Ok(DocType::Certificate),
            "LAB_PROTOCOL" => Ok(DocType::LabProtocol),
            "DECLARATION" => Ok(DocType::Declaration),
            "OTHER" => Ok(DocType::Other),
            other => Err(format!(
                "unknown document type '{}'. Use passport, certificate, lab_protocol, declaration, or other.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub file: String,
    #[serde(default)]
    pub description: String,
    pub doc_type: DocType,
    #[serde(default)]
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HazardCount {
    #[serde(alias = "sec11_class__sanpin_class")]
    pub sanpin_class: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryStats {
    pub total_elements: u64,
    #[serde(default)]
    pub hazard_distribution: Vec<HazardCount>,
}

#[derive(Debug, Clone)]
pub struct SupportTicket {
    pub subject: String,
    pub message: String,
    pub contact_email: Option<String>,
    pub file: Option<UploadFile>,
}

// ============ Files ============

/// A file to send as a multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { file_name, content })
    }

    /// MIME type guessed from the extension.
    pub fn mime(&self) -> &'static str {
        let ext = self
            .file_name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "pdf" => "application/pdf",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "svg" => "image/svg+xml",
            _ => "application/octet-stream",
        }
    }
}

/// A binary download with the server-suggested name, if any.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}
