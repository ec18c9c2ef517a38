use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Database, NewQuestion, NewTest, NewTopic, Question, Test, Topic};
use crate::error::{LitukError, Result};
use crate::utils::{new_id, now_rfc3339};

const TOPIC_COLUMNS: &str =
    "id, title, description, content, category, difficulty, document_id, created_at";

const TEST_SELECT: &str = "SELECT t.id, t.title, t.description, t.topic_id, t.kind, t.document_id, t.created_at,
        (SELECT COUNT(*) FROM questions q WHERE q.test_id = t.id) AS question_count
     FROM tests t";

const QUESTION_COLUMNS: &str = "id, test_id, topic_id, text, options, correct_index, explanation";

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        difficulty: row.get(5)?,
        document_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn test_from_row(row: &Row<'_>) -> rusqlite::Result<Test> {
    Ok(Test {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        topic_id: row.get(3)?,
        kind: row.get(4)?,
        document_id: row.get(5)?,
        created_at: row.get(6)?,
        question_count: row.get::<_, i64>(7)? as usize,
    })
}

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    let options: String = row.get(4)?;
    Ok(Question {
        id: row.get(0)?,
        test_id: row.get(1)?,
        topic_id: row.get(2)?,
        text: row.get(3)?,
        options: serde_json::from_str(&options).unwrap_or_default(),
        correct_index: row.get::<_, i64>(5)? as usize,
        explanation: row.get(6)?,
    })
}

/// Shared validation for admin edits, CSV import and generated questions
pub fn validate_question(text: &str, options: &[String], correct_index: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(LitukError::validation("question text must not be empty"));
    }
    if !(2..=6).contains(&options.len()) {
        return Err(LitukError::validation(format!(
            "a question needs 2 to 6 options, got {}",
            options.len()
        )));
    }
    if options.iter().any(|o| o.trim().is_empty()) {
        return Err(LitukError::validation("options must not be empty"));
    }
    let mut seen = std::collections::HashSet::new();
    if !options
        .iter()
        .all(|o| seen.insert(o.trim().to_lowercase()))
    {
        return Err(LitukError::validation("options must be distinct"));
    }
    if correct_index >= options.len() {
        return Err(LitukError::validation(format!(
            "correct_index {} is out of range for {} options",
            correct_index,
            options.len()
        )));
    }
    Ok(())
}

fn ensure_exists(conn: &Connection, table: &str, id: &str) -> Result<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)");
    let exists: bool = conn.query_row(&sql, params![id], |row| row.get(0))?;
    if exists {
        Ok(())
    } else {
        Err(LitukError::not_found(format!("{table} {id}")))
    }
}

impl Database {
    pub fn create_topic(&self, topic: &NewTopic, document_id: Option<&str>) -> Result<Topic> {
        if topic.title.trim().is_empty() {
            return Err(LitukError::validation("topic title must not be empty"));
        }
        let conn = self.conn()?;
        let row = Topic {
            id: new_id(),
            title: topic.title.trim().to_string(),
            description: topic.description.clone(),
            content: topic.content.clone(),
            category: topic.category.clone(),
            difficulty: topic.difficulty.clone(),
            document_id: document_id.map(str::to_string),
            created_at: now_rfc3339(),
        };
        conn.execute(
            &format!("INSERT INTO topics ({TOPIC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                row.id,
                row.title,
                row.description,
                row.content,
                row.category,
                row.difficulty,
                row.document_id,
                row.created_at
            ],
        )?;
        Ok(row)
    }

    pub fn update_topic(&self, id: &str, topic: &NewTopic) -> Result<Topic> {
        if topic.title.trim().is_empty() {
            return Err(LitukError::validation("topic title must not be empty"));
        }
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE topics SET title = ?1, description = ?2, content = ?3, category = ?4, difficulty = ?5
                 WHERE id = ?6",
                params![
                    topic.title.trim(),
                    topic.description,
                    topic.content,
                    topic.category,
                    topic.difficulty,
                    id
                ],
            )?;
            if changed == 0 {
                return Err(LitukError::not_found(format!("topic {id}")));
            }
        }
        self.get_topic(id)
    }

    pub fn delete_topic(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        if conn.execute("DELETE FROM topics WHERE id = ?1", params![id])? == 0 {
            return Err(LitukError::not_found(format!("topic {id}")));
        }
        Ok(())
    }

    pub fn get_topic(&self, id: &str) -> Result<Topic> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?1"),
            params![id],
            topic_from_row,
        )
        .optional()?
        .ok_or_else(|| LitukError::not_found(format!("topic {id}")))
    }

    pub fn list_topics(&self, category: Option<&str>) -> Result<Vec<Topic>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics
             WHERE (?1 IS NULL OR category = ?1)
             ORDER BY created_at, title"
        ))?;
        let topics = stmt
            .query_map(params![category], topic_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(topics)
    }

    pub fn create_test(&self, test: &NewTest, document_id: Option<&str>) -> Result<Test> {
        if test.title.trim().is_empty() {
            return Err(LitukError::validation("test title must not be empty"));
        }
        let conn = self.conn()?;
        if let Some(topic_id) = &test.topic_id {
            ensure_exists(&conn, "topics", topic_id)?;
        }
        let row = Test {
            id: new_id(),
            title: test.title.trim().to_string(),
            description: test.description.clone(),
            topic_id: test.topic_id.clone(),
            kind: test.kind.clone(),
            document_id: document_id.map(str::to_string),
            created_at: now_rfc3339(),
            question_count: 0,
        };
        conn.execute(
            "INSERT INTO tests (id, title, description, topic_id, kind, document_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.title,
                row.description,
                row.topic_id,
                row.kind,
                row.document_id,
                row.created_at
            ],
        )?;
        Ok(row)
    }

    pub fn update_test(&self, id: &str, test: &NewTest) -> Result<Test> {
        if test.title.trim().is_empty() {
            return Err(LitukError::validation("test title must not be empty"));
        }
        {
            let conn = self.conn()?;
            if let Some(topic_id) = &test.topic_id {
                ensure_exists(&conn, "topics", topic_id)?;
            }
            let changed = conn.execute(
                "UPDATE tests SET title = ?1, description = ?2, topic_id = ?3, kind = ?4 WHERE id = ?5",
                params![test.title.trim(), test.description, test.topic_id, test.kind, id],
            )?;
            if changed == 0 {
                return Err(LitukError::not_found(format!("test {id}")));
            }
        }
        self.get_test(id)
    }

    pub fn delete_test(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        if conn.execute("DELETE FROM tests WHERE id = ?1", params![id])? == 0 {
            return Err(LitukError::not_found(format!("test {id}")));
        }
        Ok(())
    }

    pub fn get_test(&self, id: &str) -> Result<Test> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{TEST_SELECT} WHERE t.id = ?1"),
            params![id],
            test_from_row,
        )
        .optional()?
        .ok_or_else(|| LitukError::not_found(format!("test {id}")))
    }

    pub fn list_tests(&self, topic_id: Option<&str>) -> Result<Vec<Test>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{TEST_SELECT} WHERE (?1 IS NULL OR t.topic_id = ?1) ORDER BY t.created_at, t.title"
        ))?;
        let tests = stmt
            .query_map(params![topic_id], test_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tests)
    }

    pub fn create_question(&self, question: &NewQuestion) -> Result<Question> {
        validate_question(&question.text, &question.options, question.correct_index)?;
        let conn = self.conn()?;
        ensure_exists(&conn, "tests", &question.test_id)?;
        if let Some(topic_id) = &question.topic_id {
            ensure_exists(&conn, "topics", topic_id)?;
        }
        let position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM questions WHERE test_id = ?1",
            params![question.test_id],
            |row| row.get(0),
        )?;
        let row = Question {
            id: new_id(),
            test_id: question.test_id.clone(),
            topic_id: question.topic_id.clone(),
            text: question.text.trim().to_string(),
            options: question.options.iter().map(|o| o.trim().to_string()).collect(),
            correct_index: question.correct_index,
            explanation: question.explanation.trim().to_string(),
        };
        conn.execute(
            "INSERT INTO questions (id, test_id, topic_id, position, text, options, correct_index, explanation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id,
                row.test_id,
                row.topic_id,
                position,
                row.text,
                serde_json::to_string(&row.options)?,
                row.correct_index as i64,
                row.explanation
            ],
        )?;
        Ok(row)
    }

    pub fn update_question(&self, id: &str, question: &NewQuestion) -> Result<Question> {
        validate_question(&question.text, &question.options, question.correct_index)?;
        {
            let conn = self.conn()?;
            ensure_exists(&conn, "tests", &question.test_id)?;
            if let Some(topic_id) = &question.topic_id {
                ensure_exists(&conn, "topics", topic_id)?;
            }
            let options: Vec<String> =
                question.options.iter().map(|o| o.trim().to_string()).collect();
            let changed = conn.execute(
                "UPDATE questions SET test_id = ?1, topic_id = ?2, text = ?3, options = ?4,
                        correct_index = ?5, explanation = ?6
                 WHERE id = ?7",
                params![
                    question.test_id,
                    question.topic_id,
                    question.text.trim(),
                    serde_json::to_string(&options)?,
                    question.correct_index as i64,
                    question.explanation.trim(),
                    id
                ],
            )?;
            if changed == 0 {
                return Err(LitukError::not_found(format!("question {id}")));
            }
        }
        self.get_question(id)
    }

    pub fn delete_question(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        if conn.execute("DELETE FROM questions WHERE id = ?1", params![id])? == 0 {
            return Err(LitukError::not_found(format!("question {id}")));
        }
        Ok(())
    }

    pub fn get_question(&self, id: &str) -> Result<Question> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1"),
            params![id],
            question_from_row,
        )
        .optional()?
        .ok_or_else(|| LitukError::not_found(format!("question {id}")))
    }

    pub fn questions_for_test(&self, test_id: &str) -> Result<Vec<Question>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE test_id = ?1 ORDER BY position"
        ))?;
        let questions = stmt
            .query_map(params![test_id], question_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(questions)
    }

    /// Questions linked to a topic directly or through their test
    pub fn questions_for_topic(&self, topic_id: &str) -> Result<Vec<Question>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT q.id, q.test_id, q.topic_id, q.text, q.options, q.correct_index, q.explanation
             FROM questions q JOIN tests t ON t.id = q.test_id
             WHERE q.topic_id = ?1 OR (q.topic_id IS NULL AND t.topic_id = ?1)
             ORDER BY t.created_at, q.position",
        )?;
        let questions = stmt
            .query_map(params![topic_id], question_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(questions)
    }

    /// Whole question bank in a stable order (mock exams shuffle it)
    pub fn all_questions(&self) -> Result<Vec<Question>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions ORDER BY id"
        ))?;
        let questions = stmt
            .query_map([], question_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(questions)
    }

    pub fn questions_by_ids(&self, ids: &[String]) -> Result<Vec<Question>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_question(id) {
                Ok(q) => out.push(q),
                Err(LitukError::NotFound { .. }) => {
                    tracing::warn!("question {} referenced by an attempt no longer exists", id)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Remove topics and tests generated from a document (forced re-ingestion)
    pub fn delete_generated_content(&self, document_id: &str) -> Result<(usize, usize)> {
        let conn = self.conn()?;
        let tests = conn.execute(
            "DELETE FROM tests WHERE document_id = ?1",
            params![document_id],
        )?;
        let topics = conn.execute(
            "DELETE FROM topics WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok((topics, tests))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn question_validation_rules() {
        assert!(validate_question("Q?", &opts(&["a", "b"]), 1).is_ok());
        assert!(validate_question(" ", &opts(&["a", "b"]), 0).is_err());
        assert!(validate_question("Q?", &opts(&["a"]), 0).is_err());
        assert!(validate_question("Q?", &opts(&["a", "A "]), 0).is_err());
        assert!(validate_question("Q?", &opts(&["a", "b"]), 2).is_err());
    }

    #[test]
    fn deleting_test_removes_questions_and_topic_delete_unlinks_tests() {
        let db = Database::open_in_memory().unwrap();
        let topic = db
            .create_topic(
                &NewTopic {
                    title: "History".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let test = db
            .create_test(
                &NewTest {
                    title: "History 1".into(),
                    topic_id: Some(topic.id.clone()),
                    kind: "practice".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let q = db
            .create_question(&NewQuestion {
                test_id: test.id.clone(),
                text: "When was the Magna Carta sealed?".into(),
                options: opts(&["1066", "1215", "1707"]),
                correct_index: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(db.get_test(&test.id).unwrap().question_count, 1);
        assert_eq!(db.questions_for_topic(&topic.id).unwrap().len(), 1);

        db.delete_topic(&topic.id).unwrap();
        assert_eq!(db.get_test(&test.id).unwrap().topic_id, None);

        db.delete_test(&test.id).unwrap();
        assert!(db.get_question(&q.id).is_err());
    }

    #[test]
    fn question_requires_existing_test() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .create_question(&NewQuestion {
                test_id: "nope".into(),
                text: "Q?".into(),
                options: opts(&["a", "b"]),
                correct_index: 0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, LitukError::NotFound { .. }));
    }

    #[test]
    fn question_update_requires_existing_topic() {
        let db = Database::open_in_memory().unwrap();
        let test = db
            .create_test(
                &NewTest {
                    title: "Practice".into(),
                    kind: "practice".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let mut question = NewQuestion {
            test_id: test.id.clone(),
            text: "Q?".into(),
            options: opts(&["a", "b"]),
            correct_index: 0,
            ..Default::default()
        };
        let q = db.create_question(&question).unwrap();
        question.topic_id = Some("missing".into());
        assert!(matches!(
            db.update_question(&q.id, &question),
            Err(LitukError::NotFound { .. })
        ));
        assert_eq!(db.get_question(&q.id).unwrap().topic_id, None);
    }
}
