use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A resolved post as returned by `app.bsky.feed.getPosts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: PostAuthor,
    /// The post record itself (text, facets, createdAt, ...)
    #[serde(default)]
    pub record: serde_json::Value,
    /// Rendered embed (images, external link, quote)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub indexed_at: String,
    /// Moderation labels, passed through uninterpreted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostAuthor {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PostView {
    /// Number of images in the post's embed (0 for non-image posts)
    pub fn image_count(&self) -> usize {
        let Some(embed) = &self.embed else {
            return 0;
        };
        // Images may be nested under `media` for record-with-media embeds
        embed
            .get("images")
            .or_else(|| embed.get("media").and_then(|m| m.get("images")))
            .and_then(|images| images.as_array())
            .map(|images| images.len())
            .unwrap_or(0)
    }
}

/// A post paired with the image index to render.
/// `index` selects an image, it is not a sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostWithIndex {
    pub post: PostView,
    pub index: u32,
}

impl PostWithIndex {
    /// Identity used for de-duplication
    pub fn key(&self) -> (&str, u32) {
        (self.post.uri.as_str(), self.index)
    }
}

impl From<(u32, PostView)> for PostWithIndex {
    fn from((index, post): (u32, PostView)) -> Self {
        Self { post, index }
    }
}

impl From<PostWithIndex> for (u32, PostView) {
    fn from(p: PostWithIndex) -> Self {
        (p.index, p.post)
    }
}

/// Paginated posts of one board
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPostsData {
    pub posts: Vec<PostWithIndex>,
    pub total_items: usize,
    pub loaded_pages: BTreeSet<usize>,
}
