//! Canonical request construction for blob store calls. The secret lives on
//! the backend: we build the string, the backend returns the
//! `Authorization` value.

use crate::drive_service::blob_client::BlobRequest;
use crate::drive_service::drive_client::DriveBackend;
use crate::error::{DriveError, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

pub const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
/// SHA-256 of an empty body
pub const EMPTY_BODY_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub fn body_hash(body: &[u8]) -> String {
    if body.is_empty() {
        EMPTY_BODY_SHA256.to_string()
    } else {
        hex::encode(Sha256::digest(body))
    }
}

fn host_of(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| DriveError::invalid(format!("blob url without host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Build the string submitted to the backend for signing.
///
/// Only `host` and the `x-` extension headers are signed; they are listed
/// lowercased and sorted by name.
pub fn canonical_request(request: &BlobRequest, region: &str, timestamp: &DateTime<Utc>) -> Result<String> {
    let url = Url::parse(&request.url)
        .map_err(|e| DriveError::invalid(format!("bad blob url {}: {}", request.url, e)))?;
    let host = host_of(&url)?;

    let mut signed: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .filter(|(name, _)| name.starts_with("x-"))
        .collect();
    signed.sort();

    let content_hash = request
        .get_header("x-amz-content-sha256")
        .map(str::to_string)
        .unwrap_or_else(|| body_hash(&request.body));

    let mut lines = vec![
        SIGNING_ALGORITHM.to_string(),
        timestamp.format(AMZ_DATE_FORMAT).to_string(),
        format!("{}/{}/s3/aws4_request", timestamp.format("%Y%m%d"), region),
        request.method.as_str().to_string(),
        url.path().to_string(),
        url.query().unwrap_or("").to_string(),
        format!("host:{}", host),
    ];
    lines.extend(signed.iter().map(|(name, value)| format!("{}:{}", name, value)));
    lines.push(String::new());

    let mut header_list = vec!["host".to_string()];
    header_list.extend(signed.into_iter().map(|(name, _)| name));
    lines.push(header_list.join(";"));
    lines.push(content_hash);

    Ok(lines.join("\n"))
}

/// Stamp the request with date and content hash, then attach the
/// signature obtained from the backend.
pub async fn sign(
    backend: &dyn DriveBackend,
    upload_id: &str,
    region: &str,
    request: &mut BlobRequest,
    now: DateTime<Utc>,
) -> Result<()> {
    request.set_header("X-Amz-Content-Sha256", body_hash(&request.body));
    request.set_header("X-Amz-Date", now.format(AMZ_DATE_FORMAT).to_string());
    let canonical = canonical_request(request, region, &now)?;
    let authorization = backend.sign_request(upload_id, &canonical).await?;
    request.set_header("Authorization", authorization);
    Ok(())
}
