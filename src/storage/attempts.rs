use rusqlite::{OptionalExtension, Row, params};

use super::{Attempt, AttemptGrade, AttemptKind, Database};
use crate::error::{LitukError, Result};
use crate::utils::{new_id, now_rfc3339};

const ATTEMPT_COLUMNS: &str = "id, user_id, kind, test_id, question_ids, answers, started_at, submitted_at, score, total, percent, passed, timed_out";

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<Attempt> {
    let kind: String = row.get(2)?;
    let question_ids: String = row.get(4)?;
    let answers: String = row.get(5)?;
    Ok(Attempt {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: AttemptKind::parse(&kind),
        test_id: row.get(3)?,
        question_ids: serde_json::from_str(&question_ids).unwrap_or_default(),
        answers: serde_json::from_str(&answers).unwrap_or_default(),
        started_at: row.get(6)?,
        submitted_at: row.get(7)?,
        score: row.get::<_, Option<i64>>(8)?.map(|v| v as u32),
        total: row.get::<_, i64>(9)? as u32,
        percent: row.get::<_, Option<i64>>(10)?.map(|v| v as u32),
        passed: row.get::<_, Option<i64>>(11)?.map(|v| v != 0),
        timed_out: row.get::<_, i64>(12)? != 0,
    })
}

impl Database {
    pub fn create_attempt(
        &self,
        user_id: &str,
        kind: AttemptKind,
        test_id: Option<&str>,
        question_ids: &[String],
        started_at: Option<&str>,
    ) -> Result<Attempt> {
        let conn = self.conn()?;
        let attempt = Attempt {
            id: new_id(),
            user_id: user_id.to_string(),
            kind,
            test_id: test_id.map(str::to_string),
            question_ids: question_ids.to_vec(),
            answers: Default::default(),
            started_at: started_at.map(str::to_string).unwrap_or_else(now_rfc3339),
            submitted_at: None,
            score: None,
            total: question_ids.len() as u32,
            percent: None,
            passed: None,
            timed_out: false,
        };
        conn.execute(
            "INSERT INTO attempts (id, user_id, kind, test_id, question_ids, answers, started_at, total)
             VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?7)",
            params![
                attempt.id,
                attempt.user_id,
                attempt.kind.as_str(),
                attempt.test_id,
                serde_json::to_string(&attempt.question_ids)?,
                attempt.started_at,
                attempt.total as i64
            ],
        )?;
        Ok(attempt)
    }

    pub fn get_attempt(&self, id: &str) -> Result<Attempt> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = ?1"),
            params![id],
            attempt_from_row,
        )
        .optional()?
        .ok_or_else(|| LitukError::not_found(format!("attempt {id}")))
    }

    /// Record a grade; fails with `Conflict` if the attempt was already submitted
    pub fn submit_attempt(&self, id: &str, grade: &AttemptGrade) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE attempts SET answers = ?1, submitted_at = ?2, score = ?3, percent = ?4,
                    passed = ?5, timed_out = ?6
             WHERE id = ?7 AND submitted_at IS NULL",
            params![
                serde_json::to_string(&grade.answers)?,
                grade.submitted_at,
                grade.score as i64,
                grade.percent as i64,
                grade.passed as i64,
                grade.timed_out as i64,
                id
            ],
        )?;
        if changed == 0 {
            return Err(LitukError::Conflict {
                message: format!("attempt {id} was already submitted"),
            });
        }
        Ok(())
    }

    /// A user's attempts, newest first
    pub fn attempts_for_user(&self, user_id: &str) -> Result<Vec<Attempt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE user_id = ?1 ORDER BY started_at DESC, rowid DESC"
        ))?;
        let attempts = stmt
            .query_map(params![user_id], attempt_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }
}
