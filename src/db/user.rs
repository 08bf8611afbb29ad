use std::fmt;

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::db::PostgresStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Employee,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "Employee",
            Role::Admin => "Admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, anyhow::Error> {
        match s {
            "Employee" => Ok(Role::Employee),
            "Admin" => Ok(Role::Admin),
            other => Err(anyhow!("invalid role {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub email: String,
    pub role: Role,
    /// argon2 PHC string, salt and parameters included
    password_hash: String,
}

impl User {
    pub fn new(email: &str, role: Role, password: &str) -> Result<Self, anyhow::Error> {
        let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
            .map_err(|e| anyhow!("error generating salt: {e}"))?;
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("error hashing password: {e}"))?
            .to_string();
        Ok(Self {
            email: email.to_owned(),
            role,
            password_hash,
        })
    }

    pub fn verify_password(&self, password: &str) -> bool {
        match PasswordHash::new(&self.password_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!("Invalid stored password hash for {}: {e}", self.email);
                false
            }
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;
    async fn create_user(&self, user: &User) -> Result<(), anyhow::Error>;
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        let row = self
            .pool
            .get()
            .await?
            .query_opt(
                "SELECT email, role, password_hash FROM users WHERE email = $1",
                &[&email],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_user(&self, user: &User) -> Result<(), anyhow::Error> {
        self.pool
            .get()
            .await?
            .execute(
                r#"INSERT INTO users
                        (email, role, password_hash)
                    VALUES
                        ($1, $2, $3)
                "#,
                &[&user.email, &user.role.as_str(), &user.password_hash],
            )
            .await?;
        Ok(())
    }
}

fn row_to_user(row: &Row) -> Result<User, anyhow::Error> {
    let role: String = row.get(1);
    Ok(User {
        email: row.get(0),
        role: Role::parse(&role)?,
        password_hash: row.get(2),
    })
}
