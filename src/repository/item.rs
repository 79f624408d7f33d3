use diesel::{prelude::*, sql_types::*, sqlite::Sqlite};

use super::Repository;
use crate::{
    error::StoreError,
    schema::items,
    service::{Item, ItemType},
};

impl Repository {
    pub(crate) fn find_max_item_id(&mut self) -> Result<Option<i64>, StoreError> {
        let max_item_id = diesel::sql_query("SELECT max(id) AS id FROM items")
            .get_result::<MaxItemIdRecord>(&mut self.connection)?
            .id;
        return Ok(max_item_id);
    }

    pub(crate) fn find_item_ids(&mut self, from: i64, bound: i64, limit: usize) -> Result<Vec<i64>, StoreError> {
        let item_ids = diesel::sql_query(
            "SELECT id \
            FROM items \
            WHERE id >= ? AND id < ? \
            ORDER BY id ASC LIMIT ?",
        )
        .bind::<BigInt, _>(from)
        .bind::<BigInt, _>(bound)
        .bind::<BigInt, _>(limit as i64)
        .get_results::<ItemIdRecord>(&mut self.connection)?
        .into_iter()
        .map(|r| r.id)
        .collect();
        return Ok(item_ids);
    }

    #[cfg(test)]
    pub(crate) fn find_item(&mut self, id: i64) -> Result<Option<Item>, StoreError> {
        let item = items::table
            .find(id)
            .select(ItemRecord::as_select())
            .first::<ItemRecord>(&mut self.connection)
            .optional()?
            .map(Item::from);
        return Ok(item);
    }

    pub(crate) fn count_items(&mut self) -> Result<i64, StoreError> {
        Ok(items::table.count().get_result::<i64>(&mut self.connection)?)
    }

    pub(crate) fn save_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
        let item_records = items.iter().map(ItemRecord::from).collect::<Vec<ItemRecord>>();
        self.connection.transaction::<_, diesel::result::Error, _>(|connection| {
            for item_record in &item_records {
                diesel::replace_into(items::table)
                    .values(item_record)
                    .execute(connection)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

/// `kids` and `parts` are flattened to a comma-joined string, keeping the remote order.
pub(crate) fn serialize_ids(ids: Option<&[i64]>) -> Option<String> {
    match ids {
        Some(ids) if !ids.is_empty() => Some(ids.iter().map(|i| i.to_string()).collect::<Vec<String>>().join(",")),
        _ => None,
    }
}

pub(crate) fn deserialize_ids(value: Option<&str>) -> Option<Vec<i64>> {
    let ids = value?
        .split(',')
        .filter_map(|i| i.trim().parse().ok())
        .collect::<Vec<i64>>();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

#[derive(QueryableByName)]
struct MaxItemIdRecord {
    #[diesel(sql_type = Nullable<BigInt>)]
    id: Option<i64>,
}

#[derive(QueryableByName)]
struct ItemIdRecord {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = items)]
#[diesel(check_for_backend(Sqlite))]
struct ItemRecord {
    id: i64,
    deleted: Option<bool>,
    type_: Option<String>,
    by: Option<String>,
    time: Option<i64>,
    text: Option<String>,
    dead: Option<bool>,
    parent: Option<i64>,
    poll: Option<i64>,
    kids: Option<String>,
    url: Option<String>,
    score: Option<i64>,
    title: Option<String>,
    parts: Option<String>,
    descendants: Option<i64>,
}

impl From<&Item> for ItemRecord {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            deleted: item.deleted,
            type_: item.type_.as_ref().map(|t| t.as_str().to_string()),
            by: item.by.clone(),
            time: item.time,
            text: item.text.clone(),
            dead: item.dead,
            parent: item.parent,
            poll: item.poll,
            kids: serialize_ids(item.kids.as_deref()),
            url: item.url.clone(),
            score: item.score,
            title: item.title.clone(),
            parts: serialize_ids(item.parts.as_deref()),
            descendants: item.descendants,
        }
    }
}

impl From<ItemRecord> for Item {
    fn from(record: ItemRecord) -> Self {
        Self {
            id: record.id,
            deleted: record.deleted,
            type_: record.type_.map(ItemType::from),
            by: record.by,
            time: record.time,
            text: record.text,
            dead: record.dead,
            parent: record.parent,
            poll: record.poll,
            kids: deserialize_ids(record.kids.as_deref()),
            url: record.url,
            score: record.score,
            title: record.title,
            parts: deserialize_ids(record.parts.as_deref()),
            descendants: record.descendants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> Repository {
        Repository::new(":memory:").unwrap()
    }

    #[test]
    fn empty_table_has_no_max_id() {
        let mut repo = repository();
        assert_eq!(repo.find_max_item_id().unwrap(), None);
        assert_eq!(repo.count_items().unwrap(), 0);
    }

    #[test]
    fn saves_and_reads_back_items() {
        let mut repo = repository();
        let mut comment = Item::story(7, "ignored");
        comment.type_ = Some(ItemType::Comment);
        comment.title = None;
        comment.parent = Some(3);
        comment.kids = Some(vec![12, 9, 10]);
        comment.text = Some("<p>hello</p>".to_string());
        let story = Item::story(3, "Ask HN: anything?");
        repo.save_items(&[comment.clone(), story.clone()]).unwrap();

        assert_eq!(repo.find_item(7).unwrap(), Some(comment));
        assert_eq!(repo.find_item(3).unwrap(), Some(story));
        assert_eq!(repo.find_item(4).unwrap(), None);
        assert_eq!(repo.find_max_item_id().unwrap(), Some(7));
    }

    #[test]
    fn saving_same_id_twice_keeps_latest_fields() {
        let mut repo = repository();
        let mut first = Item::story(42, "first title");
        first.score = Some(5);
        repo.save_items(&[first]).unwrap();
        let mut second = Item::story(42, "second title");
        second.score = Some(90);
        second.url = None;
        repo.save_items(&[second.clone()]).unwrap();

        assert_eq!(repo.count_items().unwrap(), 1);
        assert_eq!(repo.find_item(42).unwrap(), Some(second));
    }

    #[test]
    fn finds_item_ids_in_pages() {
        let mut repo = repository();
        let items = [2, 3, 5, 8, 13, 21].map(|id| Item::story(id, "t"));
        repo.save_items(&items).unwrap();

        assert_eq!(repo.find_item_ids(3, 21, 3).unwrap(), vec![3, 5, 8]);
        assert_eq!(repo.find_item_ids(9, 21, 3).unwrap(), vec![13]);
        assert_eq!(repo.find_item_ids(22, 100, 3).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn keeps_unknown_types() {
        let mut repo = repository();
        let mut item = Item::story(1, "t");
        item.type_ = Some(ItemType::Unknown("event".to_string()));
        repo.save_items(&[item.clone()]).unwrap();
        assert_eq!(repo.find_item(1).unwrap(), Some(item));
    }

    #[test]
    fn serializes_id_lists() {
        assert_eq!(serialize_ids(Some(&[3, 1, 2][..])), Some("3,1,2".to_string()));
        assert_eq!(serialize_ids(Some(&[][..])), None);
        assert_eq!(serialize_ids(None), None);
        assert_eq!(deserialize_ids(Some("3,1,2")), Some(vec![3, 1, 2]));
        assert_eq!(deserialize_ids(Some("")), None);
        assert_eq!(deserialize_ids(None), None);
    }
}
