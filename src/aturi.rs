//! AT-URI parsing for repository record references
//!
//! Board items reference posts as `at://<did>/app.bsky.feed.post/<rkey>` with an
//! optional `?image=<n>` suffix selecting one image of a multi-image post.

use std::fmt;

use crate::error::{Error, Result};

const SCHEME: &str = "at://";

/// A parsed `at://host/collection/rkey` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    /// Repository DID or handle
    pub host: String,
    pub collection: Option<String>,
    pub rkey: Option<String>,
}

impl AtUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidUri(uri.to_string()))?;
        // Query and fragment are not part of the record path
        let path = rest.split(['?', '#']).next().unwrap_or_default();

        let mut parts = path.split('/');
        let host = parts.next().unwrap_or_default();
        if host.is_empty() {
            return Err(Error::InvalidUri(uri.to_string()));
        }

        let collection = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let rkey = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        if parts.next().is_some() || (rkey.is_some() && collection.is_none()) {
            return Err(Error::InvalidUri(uri.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            collection,
            rkey,
        })
    }

    pub fn make(host: &str, collection: &str, rkey: &str) -> Self {
        Self {
            host: host.to_string(),
            collection: Some(collection.to_string()),
            rkey: Some(rkey.to_string()),
        }
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SCHEME, self.host)?;
        if let Some(collection) = &self.collection {
            write!(f, "/{}", collection)?;
            if let Some(rkey) = &self.rkey {
                write!(f, "/{}", rkey)?;
            }
        }
        Ok(())
    }
}

/// Strip the query suffix from a saved board item URL
pub fn canonical_post_uri(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Image index from the `image` query parameter of a saved URL.
/// Missing or unparsable values select the first image.
pub fn image_index(url: &str) -> u32 {
    let Some((_, query)) = url.split_once('?') else {
        return 0;
    };

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == "image")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Record key of a record URI, if it names a record
pub fn rkey_of(uri: &str) -> Option<String> {
    AtUri::parse(uri).ok().and_then(|u| u.rkey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_uri() {
        let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.post/3kxyz").unwrap();
        assert_eq!(uri.host, "did:plc:abc123");
        assert_eq!(uri.collection.as_deref(), Some("app.bsky.feed.post"));
        assert_eq!(uri.rkey.as_deref(), Some("3kxyz"));
        assert_eq!(uri.to_string(), "at://did:plc:abc123/app.bsky.feed.post/3kxyz");
    }

    #[test]
    fn test_make_board_uri() {
        let uri = AtUri::make("did:plc:alice", "app.skyboards.list", "3kb1");
        assert_eq!(uri.to_string(), "at://did:plc:alice/app.skyboards.list/3kb1");
        assert_eq!(AtUri::parse(&uri.to_string()).unwrap(), uri);
    }

    #[test]
    fn test_parse_ignores_query() {
        let uri = AtUri::parse("at://did:plc:abc/app.bsky.feed.post/1?image=2").unwrap();
        assert_eq!(uri.rkey.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(AtUri::parse("https://bsky.app/profile/x").is_err());
        assert!(AtUri::parse("at://").is_err());
        assert!(AtUri::parse("at://did:plc:a/c/r/extra").is_err());
    }

    #[test]
    fn test_image_index() {
        assert_eq!(image_index("at://did:plc:a/app.bsky.feed.post/1?image=2"), 2);
        assert_eq!(image_index("at://did:plc:a/app.bsky.feed.post/1?x=1&image=3"), 3);
        assert_eq!(image_index("at://did:plc:a/app.bsky.feed.post/1"), 0);
        assert_eq!(image_index("at://did:plc:a/app.bsky.feed.post/1?image=abc"), 0);
    }

    #[test]
    fn test_canonical_post_uri() {
        let saved = "at://did:plc:a/app.bsky.feed.post/1?image=1";
        assert_eq!(canonical_post_uri(saved), "at://did:plc:a/app.bsky.feed.post/1");
        assert_eq!(canonical_post_uri("at://did:plc:a/app.bsky.feed.post/2"), "at://did:plc:a/app.bsky.feed.post/2");
        assert_eq!(rkey_of(saved).as_deref(), Some("1"));
    }
}
