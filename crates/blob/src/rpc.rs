//! Request/response DTOs for the blob RPC surface and the
//! byte-stream resource-name parser.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use corelib::Digest;

use crate::error::{Error, Result};

static RESOURCE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:uploads/[0-9a-fA-F-]+/)?blobs/([0-9a-fA-F]+)/([0-9]+)$")
        .expect("static resource-name pattern is valid")
});

/// Parse a byte-stream resource name of the form
/// `(?:uploads/<uuid>/)?blobs/<hex-hash>/<size>` into its digest.
pub fn parse_resource_name(name: &str) -> Result<Digest> {
    let captures = RESOURCE_NAME
        .captures(name)
        .ok_or_else(|| Error::InvalidArgument(format!("malformed resource name: {name}")))?;
    Digest::parse(&captures[1], &captures[2]).map_err(|e| Error::InvalidArgument(e.to_string()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExistsRequest {
    pub digests: Vec<Digest>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExistsResponse {
    /// The subset of the request not found anywhere in the cluster.
    pub missing: Vec<Digest>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub digest: Digest,
    pub offset: u64,
    pub length: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub digest: Digest,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub committed_size: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    NotFound,
    InvalidArgument,
    Unavailable,
    Internal,
    Canceled,
}

impl From<&Error> for Status {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotFound(_) => Status::NotFound,
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::Unavailable(_) => Status::Unavailable,
            Error::Internal(_) => Status::Internal,
            Error::Canceled => Status::Canceled,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchGetEntry {
    pub digest: Digest,
    pub status: Status,
    pub bytes: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchPutEntry {
    pub digest: Digest,
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_blob_resource_name() {
        let digest = parse_resource_name("blobs/abcdef0123456789/42").unwrap();
        assert_eq!(digest.hash, "abcdef0123456789");
        assert_eq!(digest.size, 42);
    }

    #[test]
    fn parses_upload_prefixed_resource_name() {
        let digest = parse_resource_name(
            "uploads/7b1f1f0e-0000-0000-0000-000000000000/blobs/abcdef0123456789/7",
        )
        .unwrap();
        assert_eq!(digest.hash, "abcdef0123456789");
        assert_eq!(digest.size, 7);
    }

    #[test]
    fn rejects_malformed_resource_name() {
        assert!(parse_resource_name("not-a-resource-name").is_err());
        assert!(parse_resource_name("blobs/ab12/not-a-number").is_err());
    }
}
