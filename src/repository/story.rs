use diesel::{prelude::*, sql_types::*};

use super::Repository;
use crate::error::StoreError;

impl Repository {
    /// Live stories grouped by their UTC day, best scored first within a day.
    ///
    /// Only the `max_days` oldest days are read when a limit is given.
    pub(crate) fn find_stories(&mut self, max_days: Option<usize>) -> Result<Vec<Story>, StoreError> {
        // SQLite treats a negative LIMIT as no limit.
        let max_days = max_days.map_or(-1, |days| days as i64);
        let stories = diesel::sql_query(
            "WITH stories AS ( \
                SELECT strftime('%Y-%m-%d', time, 'unixepoch') AS day, id, title, url, \"by\", score, descendants \
                FROM items \
                WHERE \"type\" = 'story' AND time > 0 AND title IS NOT NULL AND (dead IS NULL OR NOT dead) \
            ) \
            SELECT day, id, title, url, \"by\", score, descendants \
            FROM stories \
            WHERE day IN (SELECT DISTINCT day FROM stories ORDER BY day ASC LIMIT ?) \
            ORDER BY day ASC, score DESC, id ASC",
        )
        .bind::<BigInt, _>(max_days)
        .get_results::<Story>(&mut self.connection)?;
        return Ok(stories);
    }
}

#[derive(QueryableByName, Debug, Clone, PartialEq)]
pub(crate) struct Story {
    #[diesel(sql_type = Text)]
    pub day: String,
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub title: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub url: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub by: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub score: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub descendants: Option<i64>,
}
