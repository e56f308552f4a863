use crate::error::{DriveError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};

/// Envelope wrapping every REST response.
#[derive(Debug, Deserialize)]
pub struct RestEnvelope {
    /// "success", "error" or "redirect"
    pub result: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub redirect_code: Option<u16>,
}

impl RestEnvelope {
    /// Check the discriminant, then decode `data` into the expected schema.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        match self.result.as_str() {
            "success" => serde_json::from_value(self.data).map_err(|e| DriveError::Decode(e.to_string())),
            "redirect" => Err(DriveError::RedirectRequired {
                url: self.redirect_url.unwrap_or_default(),
                code: self.redirect_code.filter(|c| (300..400).contains(c)).unwrap_or(302),
            }),
            "error" => Err(DriveError::Backend(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            other => Err(DriveError::Decode(format!("unexpected result {:?}", other))),
        }
    }

    /// Same as [`into_data`](Self::into_data) when the payload is irrelevant.
    pub fn into_unit(self) -> Result<()> {
        self.into_data::<serde_json::Value>().map(|_| ())
    }
}

/// Item kind as reported in the `Type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    File,
    #[serde(other)]
    Special,
}

/// Drive item descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveItemInfo {
    #[serde(rename = "Drive_Item__")]
    pub id: String,
    #[serde(rename = "Type")]
    pub kind: ItemKind,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size", default, deserialize_with = "de_size")]
    pub size: u64,
    #[serde(rename = "Last_Modified", default, deserialize_with = "de_timestamp")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Content fingerprint, files only
    #[serde(rename = "Blob__", default)]
    pub blob: Option<String>,
    #[serde(rename = "Download_Url", default)]
    pub download_url: Option<String>,
    #[serde(rename = "Mime", default)]
    pub mime: Option<String>,
}

/// Top-level collection ("drive") with its root folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveInfo {
    #[serde(rename = "Drive__")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Root")]
    pub root: DriveItemInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketEndpoint {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Region")]
    pub region: String,
}

/// Server-issued upload handle returned by the upload/overwrite calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTarget {
    #[serde(rename = "Cloud_Aws_Bucket_Upload__")]
    pub upload_id: String,
    /// Pre-signed URL for the single-shot PUT
    #[serde(rename = "PUT")]
    pub put_url: String,
    /// REST path registering the finished object
    #[serde(rename = "Complete")]
    pub complete: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Bucket_Endpoint")]
    pub bucket: BucketEndpoint,
}

impl UploadTarget {
    /// Path-style object URL on the blob store.
    pub fn object_url(&self) -> String {
        format!(
            "https://{}/{}/{}",
            self.bucket.host,
            self.bucket.name,
            self.key.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignResponse {
    pub authorization: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Int(i64),
    Float(f64),
    Text(String),
}

impl NumberRepr {
    fn as_i64(&self) -> std::result::Result<i64, String> {
        match self {
            NumberRepr::Int(n) => Ok(*n),
            NumberRepr::Float(f) => Ok(*f as i64),
            NumberRepr::Text(s) if s.trim().is_empty() => Ok(0),
            NumberRepr::Text(s) => s.trim().parse::<i64>().map_err(|e| e.to_string()),
        }
    }
}

/// Sizes come back as strings from the API, accept numbers as well.
fn de_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberRepr>::deserialize(deserializer)? {
        None => Ok(0),
        Some(n) => {
            let value = n.as_i64().map_err(de::Error::custom)?;
            u64::try_from(value).map_err(de::Error::custom)
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Object { unix: NumberRepr },
    Plain(NumberRepr),
}

/// Timestamps are either a unix number or an object carrying `unix`.
fn de_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = match Option::<TimestampRepr>::deserialize(deserializer)? {
        Some(repr) => repr,
        None => return Ok(None),
    };
    let secs = match repr {
        TimestampRepr::Object { unix } => unix,
        TimestampRepr::Plain(n) => n,
    }
    .as_i64()
    .map_err(de::Error::custom)?;
    Ok(Utc.timestamp_opt(secs, 0).single())
}
