//! AWS Signature Version 4 request signing.
//!
//! Supports both header-based signing (for API calls made directly by this
//! process) and query-string presigning (for requests handed to a third party,
//! such as the EKS bearer token).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

use super::credentials::AwsCredentials;
use crate::error::AwsError;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Inputs shared by every signing operation.
#[derive(Debug, Clone, Copy)]
pub struct SigningParams<'a> {
    pub credentials: &'a AwsCredentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl SigningParams<'_> {
    fn date_stamp(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date_stamp(),
            self.region,
            self.service
        )
    }
}

/// Signs a request and returns the headers to attach to it.
///
/// `headers` are the caller's headers that must be covered by the signature
/// (for example `content-type` and `x-amz-target`). The returned map contains
/// `x-amz-date`, `authorization` and, for temporary credentials,
/// `x-amz-security-token`.
pub fn sign_headers(
    params: &SigningParams<'_>,
    method: &str,
    url: &Url,
    headers: &BTreeMap<String, String>,
    body: &[u8],
) -> Result<BTreeMap<String, String>, AwsError> {
    let amz_date = params.amz_date();

    let mut signed: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    signed.insert("host".to_string(), host_header(url)?);
    signed.insert("x-amz-date".to_string(), amz_date.clone());
    if let Some(token) = &params.credentials.session_token {
        signed.insert("x-amz-security-token".to_string(), token.clone());
    }

    let query = canonical_query(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));
    let signed_header_names = signed_header_list(&signed);
    let canonical_request = canonical_request(
        method,
        url,
        &query,
        &signed,
        &signed_header_names,
        &hex_sha256(body),
    );
    let signature = signature(params, &canonical_request);

    let mut out = BTreeMap::new();
    out.insert("x-amz-date".to_string(), amz_date);
    if let Some(token) = &params.credentials.session_token {
        out.insert("x-amz-security-token".to_string(), token.clone());
    }
    out.insert(
        "authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={}",
            params.credentials.access_key_id,
            params.credential_scope(),
            signed_header_names,
            signature
        ),
    );
    Ok(out)
}

/// Builds a presigned URL whose signature covers `host` plus `headers`.
///
/// The holder of the URL must send exactly those headers when replaying it.
pub fn presign_url(
    params: &SigningParams<'_>,
    method: &str,
    url: &Url,
    headers: &BTreeMap<String, String>,
    expires_seconds: u64,
) -> Result<String, AwsError> {
    let mut signed: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    signed.insert("host".to_string(), host_header(url)?);
    let signed_header_names = signed_header_list(&signed);

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    query.push(("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()));
    query.push((
        "X-Amz-Credential".to_string(),
        format!(
            "{}/{}",
            params.credentials.access_key_id,
            params.credential_scope()
        ),
    ));
    query.push(("X-Amz-Date".to_string(), params.amz_date()));
    query.push(("X-Amz-Expires".to_string(), expires_seconds.to_string()));
    query.push(("X-Amz-SignedHeaders".to_string(), signed_header_names.clone()));
    if let Some(token) = &params.credentials.session_token {
        query.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }

    let query = canonical_query(query);
    let canonical_request = canonical_request(
        method,
        url,
        &query,
        &signed,
        &signed_header_names,
        &hex_sha256(b""),
    );
    let signature = signature(params, &canonical_request);

    Ok(format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        url.scheme(),
        host_header(url)?,
        canonical_path(url),
        query,
        signature
    ))
}

fn canonical_request(
    method: &str,
    url: &Url,
    query: &str,
    headers: &BTreeMap<String, String>,
    signed_header_names: &str,
    payload_hash: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_path(url),
        query,
        canonical_headers,
        signed_header_names,
        payload_hash
    )
}

fn signature(params: &SigningParams<'_>, canonical_request: &str) -> String {
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{}\n{}",
        params.amz_date(),
        params.credential_scope(),
        hex_sha256(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(
        format!("AWS4{}", params.credentials.secret_access_key).as_bytes(),
        params.date_stamp().as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, params.region.as_bytes());
    let k_service = hmac_sha256(&k_region, params.service.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
}

fn canonical_path(url: &Url) -> &str {
    match url.path() {
        "" => "/",
        path => path,
    }
}

fn canonical_query(pairs: impl IntoIterator<Item = (String, String)>) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| (urlencoding::encode(&k).into_owned(), urlencoding::encode(&v).into_owned()))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn signed_header_list(headers: &BTreeMap<String, String>) -> String {
    headers.keys().cloned().collect::<Vec<_>>().join(";")
}

fn host_header(url: &Url) -> Result<String, AwsError> {
    let host = url
        .host_str()
        .ok_or_else(|| AwsError::InvalidEndpoint(url.to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Hex-encoded SHA-256 digest.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_credentials() -> AwsCredentials {
        AwsCredentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
    }

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    #[test]
    fn test_sign_headers_matches_aws_reference() {
        let credentials = example_credentials();
        let params = SigningParams {
            credentials: &credentials,
            region: "us-east-1",
            service: "iam",
            time: example_time(),
        };
        let url = Url::parse("https://iam.amazonaws.com/?Action=ListUsers&Version=2010-05-08").unwrap();
        let mut headers = BTreeMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        );

        let signed = sign_headers(&params, "GET", &url, &headers, b"").unwrap();

        assert_eq!(signed["x-amz-date"], "20150830T123600Z");
        assert_eq!(
            signed["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
        assert!(!signed.contains_key("x-amz-security-token"));
    }

    #[test]
    fn test_session_token_is_signed() {
        let credentials = example_credentials().with_session_token("session");
        let params = SigningParams {
            credentials: &credentials,
            region: "us-east-1",
            service: "ecs",
            time: example_time(),
        };
        let url = Url::parse("https://ecs.us-east-1.amazonaws.com/").unwrap();

        let signed = sign_headers(&params, "POST", &url, &BTreeMap::new(), b"{}").unwrap();
        assert_eq!(signed["x-amz-security-token"], "session");
        assert!(signed["authorization"].contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_presign_url_layout() {
        let credentials = example_credentials();
        let params = SigningParams {
            credentials: &credentials,
            region: "us-west-2",
            service: "sts",
            time: example_time(),
        };
        let url = Url::parse(
            "https://sts.us-west-2.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15",
        )
        .unwrap();
        let mut headers = BTreeMap::new();
        headers.insert("x-k8s-aws-id".to_string(), "prod".to_string());

        let presigned = presign_url(&params, "GET", &url, &headers, 60).unwrap();

        assert!(presigned.starts_with(
            "https://sts.us-west-2.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15&X-Amz-Algorithm=AWS4-HMAC-SHA256"
        ));
        assert!(presigned.contains(
            "X-Amz-Credential=AKIDEXAMPLE%2F20150830%2Fus-west-2%2Fsts%2Faws4_request"
        ));
        assert!(presigned.contains("X-Amz-Expires=60"));
        assert!(presigned.contains("X-Amz-SignedHeaders=host%3Bx-k8s-aws-id"));

        let signature = presigned.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);

        // Same inputs, same signature.
        let again = presign_url(&params, "GET", &url, &headers, 60).unwrap();
        assert_eq!(presigned, again);
    }

    #[test]
    fn test_canonical_query_sorting_and_encoding() {
        let query = canonical_query(vec![
            ("b".to_string(), "two words".to_string()),
            ("a".to_string(), "x/y".to_string()),
        ]);
        assert_eq!(query, "a=x%2Fy&b=two%20words");
    }
}
