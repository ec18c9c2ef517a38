use rusqlite::params;

use super::{Database, StoredChatMessage};
use crate::error::Result;
use crate::utils::{new_id, now_rfc3339};

impl Database {
    pub fn append_chat_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: &str,
        content: &str,
    ) -> Result<StoredChatMessage> {
        let conn = self.conn()?;
        let msg = StoredChatMessage {
            id: new_id(),
            session_id: session_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: now_rfc3339(),
        };
        conn.execute(
            "INSERT INTO chat_messages (id, session_id, user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![msg.id, msg.session_id, user_id, msg.role, msg.content, msg.created_at],
        )?;
        Ok(msg)
    }

    /// Most recent `limit` messages of a user's session, oldest first
    pub fn recent_chat_messages(
        &self,
        session_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredChatMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM chat_messages
             WHERE session_id = ?1 AND user_id = ?2
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
        )?;
        let mut messages = stmt
            .query_map(params![session_id, user_id, limit as i64], |row| {
                Ok(StoredChatMessage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Role;

    #[test]
    fn recent_messages_are_scoped_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user("a@example.com", "A", "h", Role::User).unwrap();
        let b = db.create_user("b@example.com", "B", "h", Role::User).unwrap();
        for i in 0..4 {
            db.append_chat_message("s1", &a.id, "user", &format!("m{i}"))
                .unwrap();
        }
        db.append_chat_message("s1", &b.id, "user", "other").unwrap();

        let recent = db.recent_chat_messages("s1", &a.id, 2).unwrap();
        let texts: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3"]);
    }
}
