use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::agent::ResultSink;
use crate::guardrails::{sanitize_filename, validate_task_id};
use crate::types::TicketInfo;

pub const DEFAULT_BASE_URL: &str = "https://app.asana.com/api/1.0";

const TASK_FIELDS: &str =
    "name,notes,custom_fields,due_on,assignee.email,assignee.name,tags.name,permalink_url";
const API_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

static TASK_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"https://app\.asana\.com/(?:0/\d+|(?:\d+/\d+/(?:project/\d+/)?task))/(\d+)").ok()
});

/// Task id from an Asana task URL, if it has one and it is a valid id.
pub fn extract_task_id(url: &str) -> Option<String> {
    let id = TASK_URL.as_ref()?.captures(url)?.get(1)?.as_str();
    validate_task_id(id).then(|| id.to_string())
}

/// Build a ticket from the `data` object of a task response.
pub fn parse_task(task_id: &str, data: &Value) -> TicketInfo {
    let text = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

    let assignee = &data["assignee"];
    let assignee = text(&assignee["name"]).or_else(|| text(&assignee["email"]));

    let tags = data["tags"]
        .as_array()
        .map(|tags| tags.iter().filter_map(|t| text(&t["name"])).collect())
        .unwrap_or_default();

    let custom_fields = data["custom_fields"]
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| Some((text(&f["name"])?, text(&f["display_value"])?)))
                .collect()
        })
        .unwrap_or_default();

    TicketInfo {
        id: task_id.to_string(),
        title: text(&data["name"]).unwrap_or_default(),
        description: text(&data["notes"]).unwrap_or_default(),
        url: text(&data["permalink_url"])
            .unwrap_or_else(|| format!("https://app.asana.com/0/0/{task_id}")),
        due_date: text(&data["due_on"]),
        assignee,
        tags,
        custom_fields,
    }
}

/// Local path for a downloaded attachment; the tracker's name is untrusted.
pub fn attachment_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(sanitize_filename(name))
}

pub struct AsanaClient {
    token: String,
    base_url: String,
    client: Client,
}

impl AsanaClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_data(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let mut resp: Value = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .timeout(API_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?
            .error_for_status()
            .with_context(|| format!("GET {path}"))?
            .json()
            .await
            .with_context(|| format!("parse {path}"))?;
        Ok(resp.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    pub async fn fetch_task(&self, task_id: &str) -> Result<TicketInfo> {
        let data = self
            .get_data(&format!("tasks/{task_id}"), &[("opt_fields", TASK_FIELDS)])
            .await?;
        Ok(parse_task(task_id, &data))
    }

    /// Download every attachment of the task into `dir`. One attachment
    /// failing does not stop the others.
    pub async fn fetch_attachments(&self, task_id: &str, dir: &Path) -> Result<Vec<PathBuf>> {
        let list = self
            .get_data(&format!("tasks/{task_id}/attachments"), &[])
            .await?;
        let Some(entries) = list.as_array().filter(|a| !a.is_empty()) else {
            return Ok(Vec::new());
        };
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let Some(gid) = entry["gid"].as_str() else { continue };
            match self.download_attachment(gid, dir).await {
                Ok(Some(path)) => paths.push(path),
                Ok(None) => warn!(task_id, attachment = gid, "attachment has no download url"),
                Err(e) => warn!(task_id, attachment = gid, "attachment download failed: {e:#}"),
            }
        }
        info!(task_id, count = paths.len(), "attachments downloaded");
        Ok(paths)
    }

    async fn download_attachment(&self, gid: &str, dir: &Path) -> Result<Option<PathBuf>> {
        let detail = self.get_data(&format!("attachments/{gid}"), &[]).await?;
        let Some(url) = detail["download_url"]
            .as_str()
            .or_else(|| detail["permanent_url"].as_str())
        else {
            return Ok(None);
        };
        let name = detail["name"].as_str().unwrap_or(gid);
        let dest = attachment_path(dir, name);

        // Download urls are pre-signed; the bearer token is not sent along.
        let mut resp = self
            .client
            .get(url)
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let mut file = tokio::fs::File::create(&dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(Some(dest))
    }

    pub async fn post_story(&self, task_id: &str, text: &str) -> Result<()> {
        self.client
            .post(self.url(&format!("tasks/{task_id}/stories")))
            .bearer_auth(&self.token)
            .json(&json!({ "data": { "text": text } }))
            .timeout(API_TIMEOUT)
            .send()
            .await
            .context("post story")?
            .error_for_status()
            .context("post story")?;
        Ok(())
    }

    pub async fn upload_attachment(&self, task_id: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".into());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name)
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        self.client
            .post(self.url(&format!("tasks/{task_id}/attachments")))
            .bearer_auth(&self.token)
            .multipart(form)
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await
            .context("upload attachment")?
            .error_for_status()
            .context("upload attachment")?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for AsanaClient {
    async fn post_comment(&self, task_id: &str, text: &str) -> Result<()> {
        self.post_story(task_id, text).await
    }

    async fn attach_file(&self, task_id: &str, path: &Path) -> Result<()> {
        self.upload_attachment(task_id, path).await
    }
}
