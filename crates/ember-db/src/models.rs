/// Database row types — these map directly to SQLite rows.
/// Distinct from ember-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub score: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct VoteRow {
    pub account_id: String,
    pub post_id: String,
    pub value: i64,
}
