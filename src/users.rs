//! User records keyed by the identity provider's subject.

use sqlx::{Row, SqlitePool};

use crate::models::User;

/// Profile fields returned by the identity provider.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the user, or refresh the profile of an existing one.
    ///
    /// Emails are stored lowercase.
    pub async fn upsert(&self, user: NewUser) -> Result<User, sqlx::Error> {
        let email = user.email.trim().to_lowercase();

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, picture)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                picture = excluded.picture
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&email)
        .bind(&user.picture)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: user.id,
            name: user.name,
            email,
            picture: user.picture,
        })
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query("SELECT id, name, email, picture FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            name: r.get("name"),
            email: r.get("email"),
            picture: r.get("picture"),
        }))
    }
}
