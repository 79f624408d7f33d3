pub(crate) mod hacker_news;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::FetchError;

/// Point-in-time snapshot of one remote item.
///
/// `parent`, `poll`, `kids` and `parts` are weak references: the targets may not be
/// mirrored (yet), and nothing here checks that they are.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct Item {
    pub id: i64,
    pub deleted: Option<bool>,
    #[serde(rename = "type")]
    pub type_: Option<ItemType>,
    pub by: Option<String>,
    pub time: Option<i64>,
    pub text: Option<String>,
    pub dead: Option<bool>,
    pub parent: Option<i64>,
    pub poll: Option<i64>,
    pub kids: Option<Vec<i64>>,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub title: Option<String>,
    pub parts: Option<Vec<i64>>,
    pub descendants: Option<i64>,
}

impl Item {
    #[cfg(test)]
    pub(crate) fn story(id: i64, title: &str) -> Self {
        Self {
            id,
            deleted: None,
            type_: Some(ItemType::Story),
            by: Some("pg".to_string()),
            time: Some(1_160_418_111 + id),
            text: None,
            dead: None,
            parent: None,
            poll: None,
            kids: None,
            url: Some(format!("https://example.com/{id}")),
            score: Some(1),
            title: Some(title.to_string()),
            parts: None,
            descendants: Some(0),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String")]
pub(crate) enum ItemType {
    Job,
    Story,
    Comment,
    Poll,
    Pollopt,
    // Kept verbatim so that a type added upstream survives the round trip through storage.
    Unknown(String),
}

impl ItemType {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            ItemType::Job => "job",
            ItemType::Story => "story",
            ItemType::Comment => "comment",
            ItemType::Poll => "poll",
            ItemType::Pollopt => "pollopt",
            ItemType::Unknown(value) => value,
        }
    }
}

impl From<String> for ItemType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "job" => ItemType::Job,
            "story" => ItemType::Story,
            "comment" => ItemType::Comment,
            "poll" => ItemType::Poll,
            "pollopt" => ItemType::Pollopt,
            _ => ItemType::Unknown(value),
        }
    }
}

/// The remote, monotonically growing item store.
#[async_trait]
pub(crate) trait ItemSource: Send + Sync {
    /// Current remote high water mark.
    async fn max_item_id(&self) -> Result<i64, FetchError>;

    /// `Ok(None)` means the remote has nothing to save for `id` (deleted or not yet assigned).
    async fn item(&self, id: i64) -> Result<Option<Item>, FetchError>;
}
