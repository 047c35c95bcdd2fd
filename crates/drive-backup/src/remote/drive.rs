use std::time::Duration;

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{NewObject, ObjectQuery, RemoteObject, RemoteStore};
use crate::config::DriveConfig;
use crate::credentials::Credential;
use crate::error::{Error, Result};

const OBJECT_FIELDS: &str = "id,name,mimeType,parents,trashed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(default)]
    files: Vec<RemoteObject>,
    next_page_token: Option<String>,
}

/// `RemoteStore` backed by the Drive v3 REST API.
pub struct DriveClient {
    client: Client,
    base_url: String,
    upload_url: String,
    page_size: u32,
    credential: Credential,
}

impl DriveClient {
    pub fn new(cfg: &DriveConfig, credential: Credential) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::remote("client", e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            upload_url: cfg.upload_url.trim_end_matches('/').to_string(),
            page_size: cfg.page_size.clamp(1, 1000),
            credential,
        })
    }

    fn files_url(&self, base: &str, id: Option<&str>, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse_with_params(&format!("{base}/files"), params)
            .map_err(|e| Error::config(format!("invalid drive url '{base}': {e}")))?;
        if let Some(id) = id {
            url.path_segments_mut()
                .map_err(|_| Error::config(format!("drive url '{base}' cannot take a path")))?
                .push(id);
        }
        Ok(url)
    }

    fn send(&self, op: &'static str, req: RequestBuilder) -> Result<Response> {
        let res = req
            .bearer_auth(self.credential.access_token())
            .send()
            .map_err(|e| Error::remote(op, e.to_string()))?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Credential {
                user: self.credential.user().to_string(),
            });
        }
        let body = res.text().unwrap_or_default();
        Err(Error::remote(op, format!("status {status}: {}", snippet(&body))))
    }

    fn upload(
        &self,
        op: &'static str,
        req: RequestBuilder,
        metadata: &serde_json::Value,
        mime_type: &str,
        media: &[u8],
    ) -> Result<RemoteObject> {
        let boundary = multipart_boundary(media);
        let body = multipart_related(&boundary, metadata, mime_type, media)?;
        let res = self.send(
            op,
            req.header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body),
        )?;
        res.json::<RemoteObject>()
            .map_err(|e| Error::remote(op, format!("invalid response: {e}")))
    }
}

impl RemoteStore for DriveClient {
    fn list(&self, query: &ObjectQuery) -> Result<Vec<RemoteObject>> {
        let q = drive_query(query);
        let fields = format!("nextPageToken,files({OBJECT_FIELDS})");
        let page_size = self.page_size.to_string();
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", page_size.as_str()),
            ];
            if let Some(t) = page_token.as_deref() {
                params.push(("pageToken", t));
            }
            let url = self.files_url(&self.base_url, None, &params)?;
            let page: FileListPage = self
                .send("list", self.client.get(url))?
                .json()
                .map_err(|e| Error::remote("list", format!("invalid response: {e}")))?;
            out.extend(page.files);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        debug!(query = %q, count = out.len(), "listed drive files");
        Ok(out)
    }

    fn create(&self, object: &NewObject, media: Option<&[u8]>) -> Result<RemoteObject> {
        let metadata = serde_json::json!({
            "name": object.name,
            "mimeType": object.mime_type,
            "parents": object.parents,
        });
        let Some(media) = media else {
            let url = self.files_url(&self.base_url, None, &[("fields", OBJECT_FIELDS)])?;
            return self
                .send("create", self.client.post(url).json(&metadata))?
                .json::<RemoteObject>()
                .map_err(|e| Error::remote("create", format!("invalid response: {e}")));
        };
        let url = self.files_url(
            &self.upload_url,
            None,
            &[("uploadType", "multipart"), ("fields", OBJECT_FIELDS)],
        )?;
        self.upload("create", self.client.post(url), &metadata, &object.mime_type, media)
    }

    fn update(&self, id: &str, name: &str, mime_type: &str, media: &[u8]) -> Result<RemoteObject> {
        // Parents cannot be changed through the metadata body of an update.
        let metadata = serde_json::json!({ "name": name, "mimeType": mime_type });
        let url = self.files_url(
            &self.upload_url,
            Some(id),
            &[("uploadType", "multipart"), ("fields", OBJECT_FIELDS)],
        )?;
        self.upload("update", self.client.patch(url), &metadata, mime_type, media)
    }

    fn download(&self, id: &str) -> Result<Vec<u8>> {
        let url = self.files_url(&self.base_url, Some(id), &[("alt", "media")])?;
        let bytes = self
            .send("download", self.client.get(url))?
            .bytes()
            .map_err(|e| Error::remote("download", e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub(crate) fn drive_query(query: &ObjectQuery) -> String {
    let mut clauses = Vec::new();
    if let Some(m) = &query.mime_type {
        clauses.push(format!("mimeType={}", quote_literal(m)));
    }
    if let Some(n) = &query.name {
        clauses.push(format!("name={}", quote_literal(n)));
    }
    if let Some(p) = &query.parent {
        clauses.push(format!("{} in parents", quote_literal(p)));
    }
    if !query.include_trashed {
        clauses.push("trashed=false".to_string());
    }
    clauses.join(" and ")
}

fn multipart_boundary(media: &[u8]) -> String {
    let digest = Sha256::digest(media);
    format!("drive_backup_{}", hex::encode(&digest[..12]))
}

pub(crate) fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    media: &[u8],
) -> Result<Vec<u8>> {
    let meta =
        serde_json::to_vec(metadata).map_err(|e| Error::remote("encode", e.to_string()))?;
    let mut body = Vec::with_capacity(meta.len() + media.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(&meta);
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Ok(body)
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_escapes_quotes_and_defaults_to_live_objects() {
        let q = ObjectQuery::live()
            .mime_type("application/zip")
            .name("Bob's \\ app.aia")
            .parent("folder-1");
        assert_eq!(
            drive_query(&q),
            "mimeType='application/zip' and name='Bob\\'s \\\\ app.aia' and 'folder-1' in parents and trashed=false"
        );

        let all = ObjectQuery {
            include_trashed: true,
            ..ObjectQuery::default()
        };
        assert_eq!(drive_query(&all), "");
    }

    #[test]
    fn multipart_body_has_metadata_then_media() {
        let meta = serde_json::json!({ "name": "Foo.aia" });
        let body = multipart_related("b0", &meta, "application/zip", b"PK-data").expect("body");
        let text = String::from_utf8(body).expect("utf8");
        assert_eq!(
            text,
            "--b0\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"Foo.aia\"}\r\n--b0\r\nContent-Type: application/zip\r\n\r\nPK-data\r\n--b0--\r\n"
        );
    }

    #[test]
    fn boundary_depends_on_content() {
        assert_ne!(multipart_boundary(b"a"), multipart_boundary(b"b"));
        assert!(multipart_boundary(b"a").starts_with("drive_backup_"));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let long = "x".repeat(500);
        let s = snippet(&long);
        assert_eq!(s.len(), 203);
        assert!(s.ends_with("..."));
    }
}
