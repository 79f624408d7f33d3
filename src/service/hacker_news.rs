use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};

use super::{Item, ItemSource};
use crate::error::FetchError;

pub(crate) struct HackerNews {
    client: Client,
    base_url: String,
}

impl HackerNews {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        return Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        });
    }

    async fn get(&self, path: &str) -> Result<String, FetchError> {
        let response = self.client.get(format!("{}/{}", self.base_url, path)).send().await?;
        Ok(check_status(response)?.text().await?)
    }
}

#[async_trait]
impl ItemSource for HackerNews {
    // See: https://github.com/HackerNews/API/tree/38154ba#max-item-id
    async fn max_item_id(&self) -> Result<i64, FetchError> {
        let body = self.get("maxitem.json").await?;
        parse_max_item(&body)
    }

    // See: https://github.com/HackerNews/API/tree/38154ba#items
    async fn item(&self, id: i64) -> Result<Option<Item>, FetchError> {
        let body = self.get(&format!("item/{}.json", id)).await?;
        parse_item(&body)
    }
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    Ok(response)
}

pub(crate) fn parse_max_item(body: &str) -> Result<i64, FetchError> {
    body.trim().parse().map_err(|_| FetchError::MalformedMaxItem {
        body: body.to_string(),
    })
}

pub(crate) fn parse_item(body: &str) -> Result<Option<Item>, FetchError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_str::<Option<Item>>(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ItemType;

    #[test]
    fn parses_story() {
        let body = r#"{
            "by": "dhouston", "descendants": 71, "id": 8863,
            "kids": [9224, 8917, 8884], "score": 104, "time": 1175714200,
            "title": "My YC app: Dropbox - Throw away your USB drive",
            "type": "story", "url": "http://www.getdropbox.com/u/2/screencast.html"
        }"#;
        let item = parse_item(body).unwrap().unwrap();
        assert_eq!(item.id, 8863);
        assert_eq!(item.type_, Some(ItemType::Story));
        assert_eq!(item.kids, Some(vec![9224, 8917, 8884]));
        assert_eq!(item.descendants, Some(71));
        assert_eq!(item.parent, None);
        assert_eq!(item.dead, None);
    }

    #[test]
    fn null_and_empty_bodies_are_not_items() {
        assert_eq!(parse_item("null").unwrap(), None);
        assert_eq!(parse_item("null\n").unwrap(), None);
        assert_eq!(parse_item("").unwrap(), None);
    }

    #[test]
    fn keeps_unknown_types_verbatim() {
        let item = parse_item(r#"{"id": 1, "type": "event"}"#).unwrap().unwrap();
        assert_eq!(item.type_, Some(ItemType::Unknown("event".to_string())));
        assert_eq!(item.type_.unwrap().as_str(), "event");
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(matches!(parse_item("<html>"), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_item(r#"{"type": "story"}"#), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn parses_max_item() {
        assert_eq!(parse_max_item("38123456\n").unwrap(), 38123456);
        assert!(matches!(
            parse_max_item("oops"),
            Err(FetchError::MalformedMaxItem { .. })
        ));
    }
}
