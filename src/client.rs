//! Remote drive service seam and the HTTP client for the drive gateway.
//! The gateway speaks a JSON-RPC style API over HTTPS.

use crate::error::DriveError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Declared kind of a remote item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    /// Parse the gateway's `type` tag. App libraries behave like folders.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "FILE" => Some(Self::File),
            "FOLDER" | "APP_LIBRARY" => Some(Self::Folder),
            _ => None,
        }
    }
}

/// A resolved node in the remote tree.
///
/// Valid only for the call that obtained it; nothing caches these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub kind: Option<ItemKind>,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    /// Whether the item can list children.
    pub listable: bool,
}

impl DriveItem {
    /// Kind from the declared type, falling back to the listing capability.
    pub fn path_type(&self) -> ItemKind {
        match self.kind {
            Some(kind) => kind,
            None if self.listable => ItemKind::Folder,
            None => ItemKind::File,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.path_type() == ItemKind::Folder
    }
}

/// Operations the filesystem needs from the remote drive.
///
/// Every call is blocking and fallible. Implementations must be shareable
/// across the bridge's worker threads.
pub trait DriveService: Send + Sync {
    /// The root of the item tree.
    fn root(&self) -> Result<DriveItem, DriveError>;

    /// Immediate children of a folder, in the order the service returns them.
    fn children(&self, folder: &DriveItem) -> Result<Vec<DriveItem>, DriveError>;

    /// First child of `folder` whose name equals `name` exactly.
    fn child(&self, folder: &DriveItem, name: &str) -> Result<Option<DriveItem>, DriveError> {
        Ok(self.children(folder)?.into_iter().find(|c| c.name == name))
    }

    /// Full content of a file item.
    fn download(&self, item: &DriveItem) -> Result<Vec<u8>, DriveError>;

    /// Create a folder named `name` under `parent`.
    fn create_folder(&self, parent: &DriveItem, name: &str) -> Result<(), DriveError>;

    /// Create or replace the file `name` under `parent` with `content`.
    fn upload(&self, parent: &DriveItem, name: &str, content: &[u8]) -> Result<(), DriveError>;

    /// Delete a file or folder.
    fn delete(&self, item: &DriveItem) -> Result<(), DriveError>;
}

/// Session information returned by the session endpoint.
#[derive(Debug, Deserialize)]
pub struct SessionInfo {
    #[serde(alias = "apple_id", alias = "user_id", default)]
    pub account: Option<String>,
    #[serde(default)]
    pub trusted: bool,
}

/// Item as the gateway serializes it.
#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(alias = "docwsid", alias = "drivewsid")]
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    item_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "dateModified", default)]
    date_modified: Option<String>,
    #[serde(rename = "hasChildren", default)]
    has_children: bool,
}

impl From<WireItem> for DriveItem {
    fn from(w: WireItem) -> Self {
        let kind = w.item_type.as_deref().and_then(ItemKind::from_type_tag);
        let modified = w.date_modified.as_deref().and_then(parse_modified);
        DriveItem {
            listable: w.has_children || kind == Some(ItemKind::Folder),
            id: w.id,
            name: w.name,
            kind,
            size: w.size,
            modified,
        }
    }
}

/// Parse `dateModified`, which the drive reports as `%Y-%m-%dT%H:%M:%SZ`.
fn parse_modified(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// JSON-RPC response wrapper.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// HTTP client for the drive gateway.
pub struct DriveClient {
    client: Client,
    base_url: String,
    token: String,
}

impl DriveClient {
    /// Request timeout for every gateway call.
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new drive client.
    pub fn new(base_url: &str, token: &str) -> Result<Self, DriveError> {
        let client = Client::builder()
            .timeout(Self::TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Map HTTP status code to DriveError.
    fn status_to_error(status: reqwest::StatusCode, body: String) -> DriveError {
        match status.as_u16() {
            404 => DriveError::NotFound(body),
            429 => DriveError::RateLimited,
            code => DriveError::ServerError {
                status: code,
                message: body,
            },
        }
    }

    /// Classify transport failures so timeouts and refused connections keep their errno.
    fn send_error(e: reqwest::Error) -> DriveError {
        if e.is_timeout() {
            DriveError::Timeout {
                duration: Self::TIMEOUT,
                source: e,
            }
        } else if e.is_connect() {
            DriveError::ConnectionRefused(e.to_string())
        } else {
            DriveError::HttpError(e)
        }
    }

    /// Build headers for requests.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        // Tokens are expected to be ASCII; a token that is not simply gets no header
        if let Ok(auth_value) = HeaderValue::from_str(&format!("Bearer {}", self.token)) {
            headers.insert(AUTHORIZATION, auth_value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    /// Call a JSON-RPC method.
    fn rpc_call<T: for<'de> Deserialize<'de>>(&self, method: &str, params: Value) -> Result<T, DriveError> {
        let url = format!("{}/api/drive/{}", self.base_url, method);

        let rpc_request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });
        debug!("POST {} method={}", url, method);

        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&rpc_request)
            .send()
            .map_err(Self::send_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(Self::status_to_error(status, text));
        }

        let rpc_resp: JsonRpcResponse<T> = serde_json::from_slice(&resp.bytes()?)?;

        if let Some(err) = rpc_resp.error {
            if err.message.to_ascii_lowercase().contains("not found") {
                return Err(DriveError::NotFound(err.message));
            }
            return Err(DriveError::InvalidResponse(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        rpc_resp
            .result
            .ok_or_else(|| DriveError::InvalidResponse("no result in response".to_string()))
    }

    /// Validate the session token.
    pub fn session(&self) -> Result<SessionInfo, DriveError> {
        let url = format!("{}/api/auth/session", self.base_url);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .map_err(Self::send_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(Self::status_to_error(status, text));
        }

        Ok(resp.json()?)
    }
}

/// Bytes travel as `{"__type__": "bytes", "data": "<base64>"}`.
#[derive(Deserialize)]
struct BytesResult {
    #[serde(rename = "__type__")]
    #[allow(dead_code)]
    type_tag: String,
    data: String,
}

impl DriveService for DriveClient {
    fn root(&self) -> Result<DriveItem, DriveError> {
        let item: WireItem = self.rpc_call("root", json!({}))?;
        Ok(item.into())
    }

    fn children(&self, folder: &DriveItem) -> Result<Vec<DriveItem>, DriveError> {
        #[derive(Deserialize)]
        struct ChildrenResult {
            #[serde(default)]
            items: Vec<WireItem>,
        }

        let result: ChildrenResult = self.rpc_call("children", json!({"id": folder.id}))?;
        Ok(result.items.into_iter().map(DriveItem::from).collect())
    }

    fn download(&self, item: &DriveItem) -> Result<Vec<u8>, DriveError> {
        let result: BytesResult = self.rpc_call("download", json!({"id": item.id}))?;
        Ok(STANDARD.decode(&result.data)?)
    }

    fn create_folder(&self, parent: &DriveItem, name: &str) -> Result<(), DriveError> {
        let _: Value = self.rpc_call("mkdir", json!({"parent_id": parent.id, "name": name}))?;
        Ok(())
    }

    fn upload(&self, parent: &DriveItem, name: &str, content: &[u8]) -> Result<(), DriveError> {
        let _: Value = self.rpc_call("upload", json!({
            "parent_id": parent.id,
            "name": name,
            "content": {
                "__type__": "bytes",
                "data": STANDARD.encode(content)
            }
        }))?;
        Ok(())
    }

    fn delete(&self, item: &DriveItem) -> Result<(), DriveError> {
        let _: Value = self.rpc_call("delete", json!({"id": item.id}))?;
        Ok(())
    }
}
