use rusqlite::{OptionalExtension, Row, params};

use super::{Database, Game, GameKind};
use crate::error::{LitukError, Result};
use crate::utils::{new_id, now_rfc3339};

fn game_from_row(row: &Row<'_>) -> rusqlite::Result<Game> {
    let kind: String = row.get(2)?;
    let payload: String = row.get(4)?;
    Ok(Game {
        id: row.get(0)?,
        topic_id: row.get(1)?,
        kind: GameKind::parse(&kind).unwrap_or(GameKind::Flashcards),
        title: row.get(3)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        created_at: row.get(5)?,
    })
}

impl Database {
    pub fn create_game(
        &self,
        topic_id: Option<&str>,
        kind: GameKind,
        title: &str,
        payload: &serde_json::Value,
    ) -> Result<Game> {
        let conn = self.conn()?;
        let game = Game {
            id: new_id(),
            topic_id: topic_id.map(str::to_string),
            kind,
            title: title.to_string(),
            payload: payload.clone(),
            created_at: now_rfc3339(),
        };
        conn.execute(
            "INSERT INTO games (id, topic_id, kind, title, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                game.id,
                game.topic_id,
                game.kind.as_str(),
                game.title,
                serde_json::to_string(&game.payload)?,
                game.created_at
            ],
        )?;
        Ok(game)
    }

    pub fn get_game(&self, id: &str) -> Result<Game> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, topic_id, kind, title, payload, created_at FROM games WHERE id = ?1",
            params![id],
            game_from_row,
        )
        .optional()?
        .ok_or_else(|| LitukError::not_found(format!("game {id}")))
    }

    pub fn list_games(&self, topic_id: Option<&str>) -> Result<Vec<Game>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, topic_id, kind, title, payload, created_at FROM games
             WHERE (?1 IS NULL OR topic_id = ?1) ORDER BY created_at, kind",
        )?;
        let games = stmt
            .query_map(params![topic_id], game_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    /// Remove the games of one topic, or the cross-topic games when `topic_id` is `None`
    pub fn delete_games(&self, topic_id: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM games WHERE topic_id IS ?1",
            params![topic_id],
        )?)
    }
}
