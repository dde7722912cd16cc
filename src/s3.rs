//! Unsigned object-store client for the FEC public bucket
//!
//! The disclosure bucket is public, so requests are plain unsigned HTTPS
//! against the S3 REST surface: paginated `list-type=2` listing and GET
//! downloads streamed to disk. The ListBucketResult payload for a public
//! bucket has a fixed, flat shape, so the `<Contents>` entries are mined
//! with the crate's regex stack rather than pulling in an XML parser. The
//! client is constructed explicitly and passed in wherever it is needed;
//! there is no process-global session.

use crate::error::{IngestError, Result};
use crate::window::{ObjectStore, RemoteObject};
use async_trait::async_trait;
use futures_util::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use std::io::Write;
use std::path::Path;
use tracing::debug;

lazy_static! {
    static ref CONTENTS_BLOCK: Regex = Regex::new(r"(?s)<Contents>(.*?)</Contents>").unwrap();
    static ref KEY_TAG: Regex = Regex::new(r"<Key>([^<]+)</Key>").unwrap();
    static ref SIZE_TAG: Regex = Regex::new(r"<Size>(\d+)</Size>").unwrap();
    static ref NEXT_TOKEN_TAG: Regex =
        Regex::new(r"<NextContinuationToken>([^<]+)</NextContinuationToken>").unwrap();
}

pub struct S3Client {
    http: reqwest::Client,
    endpoint: String,
}

impl S3Client {
    pub fn new(http: reqwest::Client, bucket: &str, region: &str) -> Self {
        Self {
            http,
            endpoint: format!("https://{}.s3.{}.amazonaws.com", bucket, region),
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<(Vec<RemoteObject>, Option<String>)> {
        let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = continuation {
            query.push(("continuation-token", token));
        }

        let body = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transfer_err)?
            .text()
            .await
            .map_err(transfer_err)?;

        let mut objects = Vec::new();
        for block in CONTENTS_BLOCK.captures_iter(&body) {
            let entry = &block[1];
            let key = KEY_TAG.captures(entry).map(|c| c[1].to_string());
            let size = SIZE_TAG
                .captures(entry)
                .and_then(|c| c[1].parse::<u64>().ok());
            if let (Some(key), Some(size)) = (key, size) {
                objects.push(RemoteObject { key, size });
            }
        }
        let next = NEXT_TOKEN_TAG.captures(&body).map(|c| c[1].to_string());
        Ok((objects, next))
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let (mut page, next) = self.list_page(prefix, continuation.as_deref()).await?;
            debug!("Listed {} object(s) under '{}'", page.len(), prefix);
            objects.append(&mut page);
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn fetch(&self, key: &str, local_path: &Path) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, key);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transfer_err)?;

        let mut file = std::fs::File::create(local_path)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transfer_err)?;
            file.write_all(&chunk)?;
        }
        file.flush()?;
        Ok(())
    }
}

fn transfer_err(e: reqwest::Error) -> IngestError {
    IngestError::Transfer(e.to_string())
}
