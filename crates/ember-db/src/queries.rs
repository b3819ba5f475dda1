use crate::Database;
use crate::error::StoreError;
use crate::models::{AccountRow, PostRow, VoteRow};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

/// Hard cap on feed page size regardless of what the caller asks for.
pub const FEED_MAX_LIMIT: i64 = 50;

impl Database {
    // -- Accounts --

    pub fn create_account(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, username, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, username, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_account_by_username(&self, username: &str) -> Result<Option<AccountRow>, StoreError> {
        self.with_conn(|conn| query_account_by_username(conn, username))
    }

    pub fn get_account_by_id(&self, id: &str) -> Result<Option<AccountRow>, StoreError> {
        self.with_conn(|conn| query_account_by_id(conn, id))
    }

    /// Batch-fetch accounts for a set of ids. Backs the account loader; one
    /// round trip regardless of how many ids the response needs.
    pub fn accounts_by_ids(&self, ids: &[String]) -> Result<Vec<AccountRow>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username, email, password, created_at, updated_at
                 FROM accounts WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), account_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Posts --

    pub fn create_post(
        &self,
        id: &str,
        author_id: &str,
        title: &str,
        body: &str,
    ) -> Result<PostRow, StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, title, body) VALUES (?1, ?2, ?3, ?4)",
                (id, author_id, title, body),
            )?;
            let row = conn.query_row(
                "SELECT id, author_id, title, body, score, created_at, updated_at
                 FROM posts WHERE id = ?1",
                [id],
                post_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>, StoreError> {
        self.with_conn(|conn| query_post_by_id(conn, id))
    }

    pub fn update_post(
        &self,
        id: &str,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<PostRow, StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE posts
                 SET title = COALESCE(?2, title),
                     body = COALESCE(?3, body),
                     updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![id, title, body],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            let row = conn.query_row(
                "SELECT id, author_id, title, body, score, created_at, updated_at
                 FROM posts WHERE id = ?1",
                [id],
                post_from_row,
            )?;
            Ok(row)
        })
    }

    /// Delete a post and its votes together; the score lives on the post row,
    /// so the ledger rows must not outlive it.
    pub fn delete_post(&self, id: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM votes WHERE post_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            if removed == 0 {
                return Err(StoreError::NotFound);
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Keyset page over the feed, newest first.
    ///
    /// `limit` is clamped to `[0, FEED_MAX_LIMIT]`. Fetches one row beyond the
    /// page to detect whether more remain. When `before` is given, only rows
    /// strictly older than that timestamp are returned; rows sharing the
    /// boundary timestamp are excluded.
    pub fn posts_page(
        &self,
        limit: i64,
        before: Option<&str>,
    ) -> Result<(Vec<PostRow>, bool), StoreError> {
        let page_size = limit.clamp(0, FEED_MAX_LIMIT);
        let fetch = page_size + 1;

        self.with_conn(|conn| {
            let mut rows = match before {
                Some(cursor) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, author_id, title, body, score, created_at, updated_at
                         FROM posts
                         WHERE created_at < ?1
                         ORDER BY created_at DESC
                         LIMIT ?2",
                    )?;
                    stmt.query_map(params![cursor, fetch], post_from_row)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, author_id, title, body, score, created_at, updated_at
                         FROM posts
                         ORDER BY created_at DESC
                         LIMIT ?1",
                    )?;
                    stmt.query_map(params![fetch], post_from_row)?
                        .collect::<Result<Vec<_>, _>>()?
                }
            };

            let has_more = rows.len() as i64 == fetch;
            rows.truncate(page_size as usize);
            Ok((rows, has_more))
        })
    }

    // -- Votes --

    /// Apply a vote from one account on one post. Only the sign of `value`
    /// matters; it is normalized to +1/-1.
    ///
    /// The ledger row and the denormalized score move together inside one
    /// IMMEDIATE transaction:
    ///   - no existing vote: insert the row, score += sign
    ///   - same sign again: no-op (repeat votes are idempotent)
    ///   - opposite sign: flip the row, score += 2 * sign
    pub fn apply_vote(
        &self,
        account_id: &str,
        post_id: &str,
        value: i64,
    ) -> Result<(), StoreError> {
        let sign: i64 = if value > 0 { 1 } else { -1 };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let post_exists = tx
                .query_row("SELECT 1 FROM posts WHERE id = ?1", [post_id], |_| Ok(()))
                .optional()?
                .is_some();
            if !post_exists {
                return Err(StoreError::NotFound);
            }

            let account_exists = tx
                .query_row("SELECT 1 FROM accounts WHERE id = ?1", [account_id], |_| Ok(()))
                .optional()?
                .is_some();
            if !account_exists {
                return Err(StoreError::NotFound);
            }

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT value FROM votes WHERE account_id = ?1 AND post_id = ?2",
                    [account_id, post_id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                None => {
                    tx.execute(
                        "INSERT INTO votes (account_id, post_id, value) VALUES (?1, ?2, ?3)",
                        params![account_id, post_id, sign],
                    )?;
                    tx.execute(
                        "UPDATE posts SET score = score + ?1 WHERE id = ?2",
                        params![sign, post_id],
                    )?;
                }
                Some(current) if current == sign => {
                    // already voted this way; nothing to apply
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE votes SET value = ?1 WHERE account_id = ?2 AND post_id = ?3",
                        params![sign, account_id, post_id],
                    )?;
                    // remove the old contribution and add the new one in a
                    // single delta so the score never holds a half-applied state
                    tx.execute(
                        "UPDATE posts SET score = score + ?1 WHERE id = ?2",
                        params![2 * sign, post_id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Batch-fetch vote rows for a set of (account_id, post_id) pairs. Backs
    /// the vote loader. Pairs with no row are simply missing from the result.
    pub fn votes_for_keys(
        &self,
        keys: &[(String, String)],
    ) -> Result<Vec<VoteRow>, StoreError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let clauses: Vec<String> = (0..keys.len())
                .map(|i| format!("(account_id = ?{} AND post_id = ?{})", 2 * i + 1, 2 * i + 2))
                .collect();
            let sql = format!(
                "SELECT account_id, post_id, value FROM votes WHERE {}",
                clauses.join(" OR ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(keys.len() * 2);
            for (account_id, post_id) in keys {
                params.push(account_id as &dyn rusqlite::types::ToSql);
                params.push(post_id as &dyn rusqlite::types::ToSql);
            }

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(VoteRow {
                        account_id: row.get(0)?,
                        post_id: row.get(1)?,
                        value: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_account_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<AccountRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, username, email, password, created_at, updated_at
         FROM accounts WHERE username = ?1",
    )?;

    let row = stmt.query_row([username], account_from_row).optional()?;
    Ok(row)
}

fn query_account_by_id(conn: &Connection, id: &str) -> Result<Option<AccountRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, username, email, password, created_at, updated_at
         FROM accounts WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], account_from_row).optional()?;
    Ok(row)
}

fn query_post_by_id(conn: &Connection, id: &str) -> Result<Option<PostRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, author_id, title, body, score, created_at, updated_at
         FROM posts WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], post_from_row).optional()?;
    Ok(row)
}

fn account_from_row(row: &Row) -> Result<AccountRow, rusqlite::Error> {
    Ok(AccountRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn post_from_row(row: &Row) -> Result<PostRow, rusqlite::Error> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        score: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_account(db: &Database, id: &str, username: &str) {
        db.create_account(id, username, &format!("{}@example.com", username), "hash")
            .unwrap();
    }

    fn seed_post(db: &Database, id: &str, author_id: &str) {
        db.create_post(id, author_id, "title", "body").unwrap();
    }

    fn score(db: &Database, post_id: &str) -> i64 {
        db.get_post(post_id).unwrap().unwrap().score
    }

    fn vote_sum(db: &Database, post_id: &str) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(SUM(value), 0) FROM votes WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?)
        })
        .unwrap()
    }

    fn set_created_at(db: &Database, post_id: &str, ts: &str) {
        db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE posts SET created_at = ?2 WHERE id = ?1",
                params![post_id, ts],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn first_vote_sets_score() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_post(&db, "p1", "a1");

        db.apply_vote("a1", "p1", 1).unwrap();

        assert_eq!(score(&db, "p1"), 1);
        assert_eq!(vote_sum(&db, "p1"), 1);
    }

    #[test]
    fn repeat_vote_is_idempotent() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_post(&db, "p1", "a1");

        db.apply_vote("a1", "p1", 1).unwrap();
        db.apply_vote("a1", "p1", 1).unwrap();

        // 0 -> 1 -> 1, never 2
        assert_eq!(score(&db, "p1"), 1);
        assert_eq!(vote_sum(&db, "p1"), 1);
    }

    #[test]
    fn reversal_applies_double_delta() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_post(&db, "p1", "a1");

        db.apply_vote("a1", "p1", 1).unwrap();
        db.apply_vote("a1", "p1", -1).unwrap();

        // 0 -> 1 -> -1, not 0
        assert_eq!(score(&db, "p1"), -1);
        assert_eq!(vote_sum(&db, "p1"), -1);
    }

    #[test]
    fn vote_magnitude_is_ignored() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_account(&db, "a2", "bob");
        seed_post(&db, "p1", "a1");

        db.apply_vote("a1", "p1", 7).unwrap();
        db.apply_vote("a2", "p1", -42).unwrap();

        assert_eq!(score(&db, "p1"), 0);
        assert_eq!(vote_sum(&db, "p1"), 0);
    }

    #[test]
    fn score_always_matches_ledger() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_account(&db, "a2", "bob");
        seed_account(&db, "a3", "carol");
        seed_post(&db, "p1", "a1");

        db.apply_vote("a1", "p1", 1).unwrap();
        db.apply_vote("a2", "p1", -1).unwrap();
        db.apply_vote("a2", "p1", 1).unwrap();
        db.apply_vote("a3", "p1", -1).unwrap();
        db.apply_vote("a3", "p1", -1).unwrap();

        assert_eq!(score(&db, "p1"), vote_sum(&db, "p1"));
        assert_eq!(score(&db, "p1"), 1);
    }

    #[test]
    fn vote_on_missing_post_is_not_found() {
        let db = test_db();
        seed_account(&db, "a1", "alice");

        let err = db.apply_vote("a1", "nope", 1).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn vote_by_unknown_account_is_not_found() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_post(&db, "p1", "a1");

        let err = db.apply_vote("ghost", "p1", 1).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert_eq!(score(&db, "p1"), 0);
    }

    #[test]
    fn concurrent_upvotes_all_land() {
        let db = Arc::new(test_db());
        seed_account(&db, "author", "author");
        seed_post(&db, "p1", "author");

        const VOTERS: usize = 8;
        for i in 0..VOTERS {
            seed_account(&db, &format!("a{}", i), &format!("user{}", i));
        }

        let handles: Vec<_> = (0..VOTERS)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || db.apply_vote(&format!("a{}", i), "p1", 1))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(score(&db, "p1"), VOTERS as i64);
        assert_eq!(vote_sum(&db, "p1"), VOTERS as i64);
    }

    #[test]
    fn duplicate_username_is_conflict() {
        let db = test_db();
        seed_account(&db, "a1", "alice");

        let err = db
            .create_account("a2", "alice", "other@example.com", "hash")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let db = test_db();
        seed_account(&db, "a1", "alice");

        let err = db
            .create_account("a2", "bob", "alice@example.com", "hash")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn update_post_keeps_unset_fields() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_post(&db, "p1", "a1");

        let row = db.update_post("p1", Some("new title"), None).unwrap();
        assert_eq!(row.title, "new title");
        assert_eq!(row.body, "body");

        let err = db.update_post("nope", Some("x"), None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn delete_post_removes_its_votes() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_post(&db, "p1", "a1");
        db.apply_vote("a1", "p1", 1).unwrap();

        db.delete_post("p1").unwrap();

        assert!(db.get_post("p1").unwrap().is_none());
        assert_eq!(vote_sum(&db, "p1"), 0);

        let err = db.delete_post("p1").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    fn seed_feed(db: &Database, stamps: &[&str]) {
        seed_account(db, "a1", "alice");
        for (i, ts) in stamps.iter().enumerate() {
            let id = format!("p{}", i + 1);
            seed_post(db, &id, "a1");
            set_created_at(db, &id, ts);
        }
    }

    #[test]
    fn feed_pages_walk_newest_first() {
        let db = test_db();
        // T1 > T2 > T3 > T4 > T5
        seed_feed(
            &db,
            &[
                "2026-03-01 10:00:05.000",
                "2026-03-01 10:00:04.000",
                "2026-03-01 10:00:03.000",
                "2026-03-01 10:00:02.000",
                "2026-03-01 10:00:01.000",
            ],
        );

        let (page, has_more) = db.posts_page(2, None).unwrap();
        assert_eq!(ids(&page), ["p1", "p2"]);
        assert!(has_more);

        let cursor = page.last().unwrap().created_at.clone();
        let (page, has_more) = db.posts_page(2, Some(&cursor)).unwrap();
        assert_eq!(ids(&page), ["p3", "p4"]);
        assert!(has_more);

        let cursor = page.last().unwrap().created_at.clone();
        let (page, has_more) = db.posts_page(2, Some(&cursor)).unwrap();
        assert_eq!(ids(&page), ["p5"]);
        assert!(!has_more);
    }

    #[test]
    fn cursor_excludes_rows_sharing_its_timestamp() {
        let db = test_db();
        // p2 and p3 share one timestamp; a cursor equal to it must skip both
        seed_feed(
            &db,
            &[
                "2026-03-01 10:00:03.000",
                "2026-03-01 10:00:02.000",
                "2026-03-01 10:00:02.000",
                "2026-03-01 10:00:01.000",
            ],
        );

        let (page, has_more) = db.posts_page(10, Some("2026-03-01 10:00:02.000")).unwrap();
        assert_eq!(ids(&page), ["p4"]);
        assert!(!has_more);
    }

    #[test]
    fn zero_limit_yields_empty_page() {
        let db = test_db();
        seed_feed(&db, &["2026-03-01 10:00:01.000"]);

        let (page, has_more) = db.posts_page(0, None).unwrap();
        assert!(page.is_empty());
        assert!(has_more);

        let (page, has_more) = db.posts_page(-5, None).unwrap();
        assert!(page.is_empty());
        assert!(has_more);
    }

    #[test]
    fn limit_is_capped() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        for i in 0..(FEED_MAX_LIMIT as usize + 2) {
            let id = format!("p{}", i);
            seed_post(&db, &id, "a1");
            set_created_at(&db, &id, &format!("2026-03-01 10:00:{:02}.{:03}", i / 1000, i % 1000));
        }

        let (page, has_more) = db.posts_page(500, None).unwrap();
        assert_eq!(page.len() as i64, FEED_MAX_LIMIT);
        assert!(has_more);
    }

    #[test]
    fn batch_lookups_cover_requested_keys() {
        let db = test_db();
        seed_account(&db, "a1", "alice");
        seed_account(&db, "a2", "bob");
        seed_post(&db, "p1", "a1");
        seed_post(&db, "p2", "a2");
        db.apply_vote("a1", "p2", -1).unwrap();

        let accounts = db
            .accounts_by_ids(&["a1".into(), "a2".into(), "missing".into()])
            .unwrap();
        assert_eq!(accounts.len(), 2);

        let votes = db
            .votes_for_keys(&[
                ("a1".into(), "p2".into()),
                ("a2".into(), "p1".into()),
            ])
            .unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].value, -1);

        assert!(db.votes_for_keys(&[]).unwrap().is_empty());
        assert!(db.accounts_by_ids(&[]).unwrap().is_empty());
    }

    fn ids(page: &[PostRow]) -> Vec<&str> {
        page.iter().map(|p| p.id.as_str()).collect()
    }
}
