use rusqlite::{OptionalExtension, Row, params};

use super::{Database, Role, TokenKind, TokenRecord, User};
use crate::error::{LitukError, Result};
use crate::utils::{new_id, now_rfc3339};

fn duplicate_email(err: rusqlite::Error, email: &str) -> LitukError {
    match LitukError::from(err) {
        LitukError::Conflict { .. } => LitukError::Conflict {
            message: format!("an account already exists for {email}"),
        },
        other => other,
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get("role")?;
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        display_name: row.get("display_name")?,
        role: Role::parse(&role).unwrap_or(Role::User),
        created_at: row.get("created_at")?,
    })
}

impl Database {
    /// Insert a user; the email must already be normalized
    pub fn create_user(
        &self,
        email: &str,
        display_name: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User> {
        let conn = self.conn()?;
        let user = User {
            id: new_id(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            role,
            created_at: now_rfc3339(),
        };
        conn.execute(
            "INSERT INTO users (id, email, display_name, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id,
                user.email,
                user.display_name,
                password_hash,
                user.role.as_str(),
                user.created_at
            ],
        )
        .map_err(|e| duplicate_email(e, email))?;
        Ok(user)
    }

    /// Insert a user whose role is decided by the same statement: admin when
    /// no account exists yet, otherwise a plain user
    pub fn create_account(
        &self,
        email: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = new_id();
        tx.execute(
            "INSERT INTO users (id, email, display_name, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4,
                     CASE WHEN (SELECT COUNT(*) FROM users) = 0 THEN 'admin' ELSE 'user' END,
                     ?5)",
            params![id, email, display_name, password_hash, now_rfc3339()],
        )
        .map_err(|e| duplicate_email(e, email))?;
        let user = tx.query_row(
            "SELECT id, email, display_name, role, created_at FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )?;
        tx.commit()?;
        Ok(user)
    }

    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, email, display_name, role, created_at FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()?
        .ok_or_else(|| LitukError::not_found(format!("user {id}")))
    }

    /// User plus stored password hash, for login
    pub fn find_user_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT id, email, display_name, role, created_at, password_hash
                 FROM users WHERE email = ?1",
                params![email],
                |row| Ok((user_from_row(row)?, row.get::<_, String>("password_hash")?)),
            )
            .optional()?;
        Ok(found)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, email, display_name, role, created_at FROM users ORDER BY created_at",
        )?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn set_user_role(&self, id: &str, role: Role) -> Result<User> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                params![role.as_str(), id],
            )?;
            if changed == 0 {
                return Err(LitukError::not_found(format!("user {id}")));
            }
        }
        self.get_user(id)
    }

    pub fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id],
        )?;
        if changed == 0 {
            return Err(LitukError::not_found(format!("user {id}")));
        }
        Ok(())
    }

    pub fn insert_token(
        &self,
        token_hash: &str,
        session_id: &str,
        user_id: &str,
        kind: TokenKind,
        expires_at: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO auth_tokens (token_hash, session_id, user_id, kind, expires_at, revoked, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                token_hash,
                session_id,
                user_id,
                kind.as_str(),
                expires_at,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn find_token(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT session_id, user_id, kind, expires_at, revoked
                 FROM auth_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(TokenRecord {
                        session_id: row.get(0)?,
                        user_id: row.get(1)?,
                        kind: row.get(2)?,
                        expires_at: row.get(3)?,
                        revoked: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Revoke every token issued for a login session
    pub fn revoke_session(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE auth_tokens SET revoked = 1 WHERE session_id = ?1 AND revoked = 0",
            params![session_id],
        )?)
    }

    /// Spend a refresh token and revoke the rest of its session.
    ///
    /// Returns false when the token was already revoked, so only one caller
    /// can rotate a given refresh token.
    pub fn consume_refresh_token(&self, token_hash: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let spent = tx.execute(
            "UPDATE auth_tokens SET revoked = 1
             WHERE token_hash = ?1 AND kind = 'refresh' AND revoked = 0",
            params![token_hash],
        )?;
        if spent == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE auth_tokens SET revoked = 1
             WHERE revoked = 0
               AND session_id = (SELECT session_id FROM auth_tokens WHERE token_hash = ?1)",
            params![token_hash],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Drop tokens that expired before `cutoff`
    pub fn purge_expired_tokens(&self, cutoff: &str) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM auth_tokens WHERE expires_at < ?1",
            params![cutoff],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_email_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("a@example.com", "A", "hash", Role::User)
            .unwrap();
        let err = db
            .create_user("a@example.com", "B", "hash", Role::User)
            .unwrap_err();
        assert!(matches!(err, LitukError::Conflict { .. }));
    }

    #[test]
    fn role_update_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user("b@example.com", "B", "hash", Role::User)
            .unwrap();
        let updated = db.set_user_role(&user.id, Role::Admin).unwrap();
        assert!(updated.is_admin());
        assert!(db.set_user_role("missing", Role::Admin).is_err());
    }

    #[test]
    fn revoke_session_marks_all_tokens() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user("c@example.com", "C", "hash", Role::User)
            .unwrap();
        db.insert_token("h1", "s1", &user.id, TokenKind::Access, "2999-01-01T00:00:00Z")
            .unwrap();
        db.insert_token("h2", "s1", &user.id, TokenKind::Refresh, "2999-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(db.revoke_session("s1").unwrap(), 2);
        assert!(db.find_token("h1").unwrap().unwrap().revoked);
    }

    #[test]
    fn first_account_is_admin() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create_account("a@example.com", "A", "hash").unwrap();
        let second = db.create_account("b@example.com", "B", "hash").unwrap();
        assert!(first.is_admin());
        assert_eq!(second.role, Role::User);
        assert!(matches!(
            db.create_account("a@example.com", "A", "hash"),
            Err(LitukError::Conflict { .. })
        ));
    }

    #[test]
    fn refresh_token_is_consumed_once() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user("d@example.com", "D", "hash", Role::User)
            .unwrap();
        db.insert_token("a1", "s1", &user.id, TokenKind::Access, "2999-01-01T00:00:00Z")
            .unwrap();
        db.insert_token("r1", "s1", &user.id, TokenKind::Refresh, "2999-01-01T00:00:00Z")
            .unwrap();
        assert!(!db.consume_refresh_token("a1").unwrap());
        assert!(db.consume_refresh_token("r1").unwrap());
        assert!(!db.consume_refresh_token("r1").unwrap());
        assert!(db.find_token("a1").unwrap().unwrap().revoked);
    }
}
