//! Repository record enumeration for boards and board items

use serde::de::DeserializeOwned;

use crate::aturi::rkey_of;
use crate::client::{PostSource, Record};
use crate::config::RecordsConfig;
use crate::error::Result;
use crate::models::{Board, BoardItem};

/// Fetch every record of a collection, following cursors until exhausted
pub async fn get_all_records(
    source: &dyn PostSource,
    repo: &str,
    collection: &str,
    limit: u32,
) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = source
            .list_records(repo, collection, limit, cursor.as_deref())
            .await?;
        records.extend(page.records);

        match page.cursor {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                tracing::warn!("listRecords for {} returned the same cursor twice, stopping", collection);
                break;
            }
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(records)
}

/// All board items in `owner`'s repository, keyed by rkey
pub async fn load_board_items(
    source: &dyn PostSource,
    owner: &str,
    config: &RecordsConfig,
) -> Result<Vec<(String, BoardItem)>> {
    let records = get_all_records(
        source,
        owner,
        &config.list_item_collection,
        config.list_records_limit,
    )
    .await?;
    Ok(parse_records(records))
}

/// All boards in `owner`'s repository, keyed by rkey
pub async fn load_boards(
    source: &dyn PostSource,
    owner: &str,
    config: &RecordsConfig,
) -> Result<Vec<(String, Board)>> {
    let records = get_all_records(
        source,
        owner,
        &config.list_collection,
        config.list_records_limit,
    )
    .await?;
    Ok(parse_records(records))
}

/// Parse record values, skipping records that do not match the expected shape
fn parse_records<T: DeserializeOwned>(records: Vec<Record>) -> Vec<(String, T)> {
    records
        .into_iter()
        .filter_map(|record| {
            let Some(rkey) = rkey_of(&record.uri) else {
                tracing::warn!("{} is not a record URI, skipping", record.uri);
                return None;
            };
            match serde_json::from_value(record.value) {
                Ok(value) => Some((rkey, value)),
                Err(e) => {
                    tracing::warn!("{} could not be parsed: {}", record.uri, e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RecordPage;
    use crate::config::Config;
    use crate::error::Error;
    use crate::models::{PostView, ProfileView};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves fixed record pages, recording the cursors it was asked for
    struct PagedRecords {
        pages: Vec<RecordPage>,
        cursors: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl PostSource for PagedRecords {
        async fn get_posts(&self, _uris: &[String]) -> Result<Vec<PostView>> {
            Ok(Vec::new())
        }

        async fn list_records(
            &self,
            _repo: &str,
            _collection: &str,
            _limit: u32,
            cursor: Option<&str>,
        ) -> Result<RecordPage> {
            self.cursors.lock().unwrap().push(cursor.map(str::to_string));
            let index = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
            Ok(self.pages[index].clone())
        }

        async fn get_profile(&self, actor: &str) -> Result<ProfileView> {
            Err(Error::Api {
                status: 400,
                message: format!("Profile not found: {}", actor),
            })
        }
    }

    fn item_record(rkey: &str, value: serde_json::Value) -> Record {
        Record {
            uri: format!("at://did:plc:alice/app.skyboards.list.item/{}", rkey),
            cid: String::new(),
            value,
        }
    }

    fn item_value(post: &str) -> serde_json::Value {
        json!({
            "$type": "app.skyboards.list.item",
            "url": format!("at://did:plc:bob/app.bsky.feed.post/{}?image=0", post),
            "list": "at://did:plc:alice/app.skyboards.list/b1"
        })
    }

    #[tokio::test]
    async fn test_follows_cursor_until_absent() {
        let source = PagedRecords {
            pages: vec![
                RecordPage {
                    cursor: Some("1".to_string()),
                    records: vec![item_record("i1", item_value("p1"))],
                },
                RecordPage {
                    cursor: Some("2".to_string()),
                    records: vec![item_record("i2", item_value("p2"))],
                },
                RecordPage {
                    cursor: None,
                    records: vec![
                        item_record("i3", item_value("p3")),
                        item_record("bad", json!({ "list": 42 })),
                    ],
                },
            ],
            cursors: Mutex::new(Vec::new()),
        };

        let items = load_board_items(&source, "did:plc:alice", &Config::default().records)
            .await
            .unwrap();

        let rkeys: Vec<&str> = items.iter().map(|(rkey, _)| rkey.as_str()).collect();
        assert_eq!(rkeys, vec!["i1", "i2", "i3"]);
        assert_eq!(
            *source.cursors.lock().unwrap(),
            vec![None, Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_stops_on_repeated_cursor() {
        let source = PagedRecords {
            pages: vec![
                RecordPage { cursor: Some("1".to_string()), records: vec![] },
                RecordPage { cursor: Some("1".to_string()), records: vec![] },
            ],
            cursors: Mutex::new(Vec::new()),
        };

        let records = get_all_records(&source, "did:plc:alice", "c", 100).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(source.cursors.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_boards() {
        let source = PagedRecords {
            pages: vec![RecordPage {
                cursor: None,
                records: vec![Record {
                    uri: "at://did:plc:alice/app.skyboards.list/b1".to_string(),
                    cid: String::new(),
                    value: json!({ "name": "Cats", "description": "cat pics" }),
                }],
            }],
            cursors: Mutex::new(Vec::new()),
        };

        let boards = load_boards(&source, "did:plc:alice", &Config::default().records)
            .await
            .unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].0, "b1");
        assert_eq!(boards[0].1.name, "Cats");
    }
}
