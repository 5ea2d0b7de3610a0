use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::sync::ProgressCallback;

use super::errors::Result;

/// A record as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    /// Stable record identifier.
    pub id: String,
    /// Creation timestamp reported by the remote.
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<String>,
    /// Field name to value.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a record from an identifier and a JSON object of fields.
    ///
    /// Non-object values produce a record with no fields.
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            created_time: None,
            fields,
        }
    }

    /// Look up a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// One page of a list-records response.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<Record>,
    /// Continuation token; absent on the last page.
    #[serde(default)]
    pub offset: Option<String>,
}

/// A file attached to a record field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub filename: String,
    /// Declared MIME type.
    #[serde(rename = "type", default)]
    pub mime_type: Option<String>,
    /// Declared size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Preview renditions; only their presence matters here.
    #[serde(default)]
    pub thumbnails: Option<Value>,
}

impl Attachment {
    /// Whether the remote generated preview thumbnails for this file.
    #[must_use]
    pub fn has_preview(&self) -> bool {
        match &self.thumbnails {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

/// Whether a list value is an attachment list: non-empty, every item an
/// object carrying a `url` key.
#[must_use]
pub fn is_attachment_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| item.as_object().is_some_and(|obj| obj.contains_key("url")))
}

/// Decode an attachment list; items that fail to decode are dropped.
#[must_use]
pub fn parse_attachments(items: &[Value]) -> Vec<Attachment> {
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<Attachment>(item.clone()).ok())
        .collect()
}

/// What to fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Dataset name, for progress reporting.
    pub dataset: &'a str,
    /// Remote table identifier.
    pub table_id: &'a str,
    /// Remote view identifier.
    pub view_id: &'a str,
    /// Optional server-side filter formula.
    pub filter: Option<&'a str>,
}

/// A source of remote records.
///
/// Implementations page through the whole result set. A filter naming a field
/// the remote does not know must surface as [`super::RemoteError::UnknownField`].
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch every record matching the request.
    async fn fetch_all(
        &self,
        request: FetchRequest<'_>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Vec<Record>>;
}
