use serde::{Deserialize, Serialize};

use crate::aturi::AtUri;

/// A board (named collection of saved posts) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// AT-URI of the board this one was forked from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A saved-post reference inside a board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardItem {
    /// Post AT-URI, optionally suffixed with `?image=<n>`
    pub url: String,
    /// AT-URI of the owning board
    pub list: String,
    #[serde(rename = "$type", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl BoardItem {
    /// Whether this item belongs to the board `owner`/`board_rkey`
    pub fn is_in_board(&self, owner: &str, board_rkey: &str) -> bool {
        AtUri::parse(&self.list)
            .map(|list| list.host == owner && list.rkey.as_deref() == Some(board_rkey))
            .unwrap_or(false)
    }
}

/// Cache key for a board's posts
pub fn board_key(owner: &str, board_rkey: &str) -> String {
    format!("{}:{}", owner, board_rkey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_item_membership() {
        let item = BoardItem {
            url: "at://did:plc:bob/app.bsky.feed.post/p1?image=1".to_string(),
            list: "at://did:plc:alice/app.skyboards.list/b1".to_string(),
            record_type: None,
            created_at: None,
        };
        assert!(item.is_in_board("did:plc:alice", "b1"));
        assert!(!item.is_in_board("did:plc:alice", "b2"));
        assert!(!item.is_in_board("did:plc:bob", "b1"));
    }

    #[test]
    fn test_board_item_record_shape() {
        let json = serde_json::json!({
            "$type": "app.skyboards.list.item",
            "url": "at://did:plc:bob/app.bsky.feed.post/p1",
            "list": "at://did:plc:alice/app.skyboards.list/b1",
            "createdAt": "2025-01-01T00:00:00.000Z",
            "extra": true
        });
        let item: BoardItem = serde_json::from_value(json).unwrap();
        assert_eq!(item.record_type.as_deref(), Some("app.skyboards.list.item"));
        assert_eq!(item.created_at.as_deref(), Some("2025-01-01T00:00:00.000Z"));
        assert_eq!(board_key("did:plc:alice", "b1"), "did:plc:alice:b1");
    }
}
