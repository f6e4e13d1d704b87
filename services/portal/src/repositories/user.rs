//! Account repository: persistence, the approval state machine, and
//! the delete/archive/restore cycle.
//!
//! Approval and membership-number assignment commit in one
//! transaction, so "approved but no number" is never an externally
//! observable state.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::PortalError;
use crate::membership::{MembershipSequence, is_transient_failure};
use crate::models::{ArchivedUser, NewUser, User};

const MAX_TRANSIENT_RETRIES: u32 = 3;

const USER_COLUMNS: &str =
    "id, name, email, password_hash, is_admin, is_approved, membership_number, created_at";

/// Account repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new pending account (registration path)
    pub async fn create(&self, new_user: &NewUser) -> Result<User, PortalError> {
        info!("Creating account for {}", new_user.email);

        if self.find_by_email(&new_user.email).await?.is_some() {
            return Err(PortalError::EmailTaken);
        }

        let password_hash = hash_password(&new_user.password).await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, is_admin, is_approved)
            VALUES ($1, $2, $3, FALSE, FALSE)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(user)
    }

    /// Create a pre-approved account (administrator path), minting its
    /// membership number in the same transaction
    pub async fn create_approved(&self, new_user: &NewUser) -> Result<User, PortalError> {
        info!("Creating pre-approved account for {}", new_user.email);

        let password_hash = hash_password(&new_user.password).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_create_approved(new_user, &password_hash).await {
                Err(err) if is_transient_failure(&err) && attempt < MAX_TRANSIENT_RETRIES => {
                    warn!(
                        "Transient failure creating approved account (attempt {}): {}",
                        attempt, err
                    );
                    continue;
                }
                result => return result,
            }
        }
    }

    async fn try_create_approved(
        &self,
        new_user: &NewUser,
        password_hash: &str,
    ) -> Result<User, PortalError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(&new_user.email)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(PortalError::EmailTaken);
        }

        let number = MembershipSequence::next_in(&mut tx)
            .await
            .map_err(PortalError::SequenceGeneration)?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, is_admin, is_approved, membership_number)
            VALUES ($1, $2, $3, FALSE, TRUE, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(password_hash)
        .bind(&number)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        tx.commit().await?;
        info!(
            "Created approved account {} with membership number {}",
            user.id, number
        );
        Ok(user)
    }

    /// Find an account by email (case-insensitive exact match)
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, PortalError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)
            "#
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find an account by id
    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, PortalError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Verify a password against an account's stored hash
    pub async fn verify_password(&self, user: &User, password: &str) -> Result<bool, PortalError> {
        let password = password.to_string();
        let stored_hash = user.password_hash.clone();

        // argon2 verification is CPU-bound; keep it off the request threads
        tokio::task::spawn_blocking(move || {
            let parsed_hash = PasswordHash::new(&stored_hash)
                .map_err(|e| PortalError::Internal(format!("failed to parse password hash: {e}")))?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .is_ok())
        })
        .await
        .map_err(|e| PortalError::Internal(format!("password verification task failed: {e}")))?
    }

    /// Approve a pending account and mint its membership number.
    ///
    /// `Pending -> Approved` is the only transition: an approved
    /// account fails with `AlreadyApproved` and no new number is
    /// issued. The flag flip and the number assignment commit
    /// together.
    pub async fn approve(&self, id: i64) -> Result<User, PortalError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_approve(id).await {
                Err(err) if is_transient_failure(&err) && attempt < MAX_TRANSIENT_RETRIES => {
                    warn!(
                        "Transient failure approving account {} (attempt {}): {}",
                        id, attempt, err
                    );
                    continue;
                }
                result => return result,
            }
        }
    }

    async fn try_approve(&self, id: i64) -> Result<User, PortalError> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user) = user else {
            return Err(PortalError::NotFound);
        };
        if user.is_approved {
            return Err(PortalError::AlreadyApproved);
        }

        let number = MembershipSequence::next_in(&mut tx)
            .await
            .map_err(PortalError::SequenceGeneration)?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET is_approved = TRUE, membership_number = $2
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&number)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Approved account {} with membership number {}",
            user.id, number
        );
        Ok(user)
    }

    /// Delete an account, archiving a full snapshot first.
    /// Both steps commit together.
    pub async fn delete(&self, id: i64, deleted_by: i64) -> Result<(), PortalError> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user) = user else {
            return Err(PortalError::NotFound);
        };

        let snapshot = serde_json::to_value(&user)
            .map_err(|e| PortalError::Internal(format!("failed to serialize snapshot: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO deleted_users (user_id, name, email, deleted_by, original_data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(deleted_by)
        .bind(&snapshot)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Deleted account {} (archived by {})", id, deleted_by);
        Ok(())
    }

    /// List all accounts, newest first
    pub async fn list(&self) -> Result<Vec<User>, PortalError> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// List archived accounts, newest first
    pub async fn list_deleted(&self) -> Result<Vec<ArchivedUser>, PortalError> {
        let archived = sqlx::query_as::<_, ArchivedUser>(
            r#"
            SELECT id, user_id, name, email, deleted_by, original_data, deleted_at
            FROM deleted_users ORDER BY deleted_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(archived)
    }

    /// Restore an archived account from its snapshot and drop the
    /// archive row. The account keeps its original flags, credential,
    /// membership number, and creation timestamp, under a fresh id.
    pub async fn restore(&self, archive_id: i64) -> Result<User, PortalError> {
        let mut tx = self.pool.begin().await?;

        let archived = sqlx::query_as::<_, ArchivedUser>(
            r#"
            SELECT id, user_id, name, email, deleted_by, original_data, deleted_at
            FROM deleted_users WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(archive_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(archived) = archived else {
            return Err(PortalError::NotFound);
        };

        let snapshot: User = serde_json::from_value(archived.original_data)
            .map_err(|e| PortalError::Internal(format!("corrupt archive snapshot: {e}")))?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(&snapshot.email)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(PortalError::EmailTaken);
        }

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (name, email, password_hash, is_admin, is_approved, membership_number, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&snapshot.name)
        .bind(&snapshot.email)
        .bind(&snapshot.password_hash)
        .bind(snapshot.is_admin)
        .bind(snapshot.is_approved)
        .bind(&snapshot.membership_number)
        .bind(snapshot.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        sqlx::query("DELETE FROM deleted_users WHERE id = $1")
            .bind(archive_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Restored account {} from archive {}", user.id, archive_id);
        Ok(user)
    }
}

/// Hash a password with argon2 off the request threads
pub async fn hash_password(password: &str) -> Result<String, PortalError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut rand::thread_rng());
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PortalError::Internal(format!("failed to hash password: {e}")))
    })
    .await
    .map_err(|e| PortalError::Internal(format!("hashing task failed: {e}")))?
}

/// Map a unique-index violation on insert to the email conflict error
fn map_unique_violation(err: sqlx::Error) -> PortalError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            PortalError::EmailTaken
        }
        _ => PortalError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("Correct1horse").await.unwrap();
        assert!(hash.starts_with("$argon2"));

        let repo_user = User {
            id: 1,
            name: "Asha Mushi".to_string(),
            email: "asha@example.org".to_string(),
            password_hash: hash,
            is_admin: false,
            is_approved: true,
            membership_number: None,
            created_at: chrono::Utc::now(),
        };

        // verification needs no pool access
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://portal@localhost/portal")
            .unwrap();
        let repo = UserRepository::new(pool);

        assert!(repo
            .verify_password(&repo_user, "Correct1horse")
            .await
            .unwrap());
        assert!(!repo
            .verify_password(&repo_user, "wrong-password")
            .await
            .unwrap());
    }

    #[test]
    fn unique_violation_maps_to_email_taken() {
        assert!(matches!(
            map_unique_violation(sqlx::Error::RowNotFound),
            PortalError::Database(_)
        ));
    }

    async fn test_pool() -> Option<PgPool> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping repository test");
            return None;
        };
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .expect("failed to connect to test database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("failed to run migrations");
        Some(pool)
    }

    async fn remove_account(pool: &PgPool, email: &str) {
        sqlx::query("DELETE FROM deleted_users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .execute(pool)
            .await
            .expect("failed to clean archive");
        sqlx::query("DELETE FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .execute(pool)
            .await
            .expect("failed to clean account");
    }

    #[tokio::test]
    async fn approve_is_a_one_way_transition() {
        let Some(pool) = test_pool().await else { return };
        let repo = UserRepository::new(pool.clone());
        let email = "approve-once@repository-test.example";
        remove_account(&pool, email).await;

        let user = repo
            .create(&NewUser {
                name: "Approve Once".to_string(),
                email: email.to_string(),
                password: "Correct1horse".to_string(),
            })
            .await
            .expect("failed to create account");
        assert!(!user.is_approved);
        assert!(user.membership_number.is_none());

        let approved = repo.approve(user.id).await.expect("failed to approve");
        assert!(approved.is_approved);
        let number = approved
            .membership_number
            .clone()
            .expect("approval must assign a number");

        // the second approval is rejected and issues no new number
        assert!(matches!(
            repo.approve(user.id).await,
            Err(PortalError::AlreadyApproved)
        ));
        let unchanged = repo
            .find_by_id(user.id)
            .await
            .expect("lookup failed")
            .expect("account vanished");
        assert_eq!(unchanged.membership_number.as_deref(), Some(number.as_str()));

        remove_account(&pool, email).await;
    }

    #[tokio::test]
    async fn approving_an_unknown_account_has_no_side_effects() {
        let Some(pool) = test_pool().await else { return };
        let repo = UserRepository::new(pool.clone());

        let year = crate::membership::current_year_key();
        let before: Option<(i64,)> =
            sqlx::query_as("SELECT last_number FROM membership_sequence WHERE year = $1")
                .bind(&year)
                .fetch_optional(&pool)
                .await
                .expect("failed to read sequence");

        assert!(matches!(
            repo.approve(999_999_999).await,
            Err(PortalError::NotFound)
        ));

        let after: Option<(i64,)> =
            sqlx::query_as("SELECT last_number FROM membership_sequence WHERE year = $1")
                .bind(&year)
                .fetch_optional(&pool)
                .await
                .expect("failed to read sequence");
        assert_eq!(before, after, "counter moved for a failed approval");
    }

    #[tokio::test]
    async fn delete_archives_then_restore_round_trips() {
        let Some(pool) = test_pool().await else { return };
        let repo = UserRepository::new(pool.clone());
        let email = "archive-restore@repository-test.example";
        remove_account(&pool, email).await;

        let user = repo
            .create(&NewUser {
                name: "Archive Restore".to_string(),
                email: email.to_string(),
                password: "Correct1horse".to_string(),
            })
            .await
            .expect("failed to create account");
        let approved = repo.approve(user.id).await.expect("failed to approve");

        repo.delete(approved.id, 1).await.expect("failed to delete");
        assert!(repo
            .find_by_id(approved.id)
            .await
            .expect("lookup failed")
            .is_none());

        let archive = repo
            .list_deleted()
            .await
            .expect("failed to list archive")
            .into_iter()
            .find(|a| a.email == email)
            .expect("archive row missing");

        let restored = repo.restore(archive.id).await.expect("failed to restore");
        assert_eq!(restored.email, approved.email);
        assert_eq!(restored.membership_number, approved.membership_number);
        assert!(restored.is_approved);

        remove_account(&pool, email).await;
    }
}
