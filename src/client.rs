//! XRPC client for the protocol lookups the board pages depend on
//!
//! - `app.bsky.feed.getPosts`: resolve up to 25 post URIs per call
//! - `com.atproto.repo.listRecords`: enumerate a repository collection by cursor
//! - `app.bsky.actor.getProfile`: one actor's profile
//!
//! Session handling and DID-to-PDS resolution happen elsewhere; the client
//! talks to whichever service URL it is configured with.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

use crate::config::{ClientConfig, MAX_LOOKUP_BATCH};
use crate::error::{Error, Result};
use crate::models::{PostView, ProfileView};

/// Protocol operations used to resolve board contents
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Resolve post URIs to post views. At most 25 URIs per call; posts that
    /// no longer exist are simply absent from the result.
    async fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>>;

    /// One page of a repository collection
    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<RecordPage>;

    /// Profile of an actor (DID or handle)
    async fn get_profile(&self, actor: &str) -> Result<ProfileView>;
}

/// A page of `listRecords` output
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub cursor: Option<String>,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GetPostsResponse {
    posts: Vec<PostView>,
}

/// XRPC error body
#[derive(Debug, Deserialize)]
struct XrpcError {
    error: Option<String>,
    message: Option<String>,
}

/// reqwest-backed [`PostSource`]
#[derive(Debug, Clone)]
pub struct XrpcClient {
    http: Client,
    service_url: String,
}

impl XrpcClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(http, &config.service_url))
    }

    pub fn with_client(http: Client, service_url: &str) -> Self {
        Self {
            http,
            service_url: service_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    fn endpoint(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.service_url, nsid)
    }
}

#[async_trait]
impl PostSource for XrpcClient {
    async fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        if uris.len() > MAX_LOOKUP_BATCH {
            return Err(Error::Api {
                status: 400,
                message: format!(
                    "getPosts accepts at most {} uris, got {}",
                    MAX_LOOKUP_BATCH,
                    uris.len()
                ),
            });
        }

        let query: Vec<(&str, &str)> = uris.iter().map(|u| ("uris", u.as_str())).collect();
        let response = self
            .http
            .get(self.endpoint("app.bsky.feed.getPosts"))
            .query(&query)
            .send()
            .await?;

        let body: GetPostsResponse = check_status(response).await?.json().await?;
        Ok(body.posts)
    }

    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<RecordPage> {
        let limit = limit.to_string();
        let mut query = vec![("repo", repo), ("collection", collection), ("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let response = self
            .http
            .get(self.endpoint("com.atproto.repo.listRecords"))
            .query(&query)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn get_profile(&self, actor: &str) -> Result<ProfileView> {
        let response = self
            .http
            .get(self.endpoint("app.bsky.actor.getProfile"))
            .query(&[("actor", actor)])
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }
}

/// Turn a non-2xx XRPC response into [`Error::Api`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        message: xrpc_error_message(&text),
    })
}

fn xrpc_error_message(body: &str) -> String {
    match serde_json::from_str::<XrpcError>(body) {
        Ok(XrpcError { error: Some(error), message: Some(message) }) => {
            format!("{}: {}", error, message)
        }
        Ok(XrpcError { error: Some(error), message: None }) => error,
        Ok(XrpcError { error: None, message: Some(message) }) => message,
        _ => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xrpc_error_message() {
        assert_eq!(
            xrpc_error_message(r#"{"error":"InvalidRequest","message":"Could not find repo"}"#),
            "InvalidRequest: Could not find repo"
        );
        assert_eq!(xrpc_error_message(r#"{"error":"RateLimitExceeded"}"#), "RateLimitExceeded");
        assert_eq!(xrpc_error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = XrpcClient::with_client(Client::new(), "https://pds.example.com/");
        assert_eq!(
            client.endpoint("app.bsky.feed.getPosts"),
            "https://pds.example.com/xrpc/app.bsky.feed.getPosts"
        );
    }

    #[tokio::test]
    async fn test_get_posts_rejects_oversized_batch() {
        let client = XrpcClient::with_client(Client::new(), "http://127.0.0.1:9");
        let uris: Vec<String> = (0..26).map(|i| format!("at://did:plc:a/app.bsky.feed.post/{}", i)).collect();
        let err = client.get_posts(&uris).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 400, .. }));

        assert!(client.get_posts(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_record_page_shape() {
        let page: RecordPage = serde_json::from_value(serde_json::json!({
            "records": [{
                "uri": "at://did:plc:a/app.skyboards.list/b1",
                "cid": "bafy",
                "value": { "name": "Cats", "description": "" }
            }]
        }))
        .unwrap();
        assert!(page.cursor.is_none());
        assert_eq!(page.records.len(), 1);
    }
}
