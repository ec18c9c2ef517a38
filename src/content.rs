//! Bulk question import from CSV
//!
//! Expected header: `question,option_a,option_b,option_c,option_d,correct,explanation,topic`.
//! `option_c`, `option_d`, `explanation` and `topic` may be blank. `correct` is an
//! option letter, a zero-based index or the option text. Each file becomes one
//! practice test; topics are matched by title (case-insensitive) or created.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{LitukError, Result};
use crate::ingest::generate::resolve_answer;
use crate::storage::content::validate_question;
use crate::storage::{Database, NewQuestion, NewTest, NewTopic};

#[derive(Debug, Deserialize)]
struct QuestionRow {
    question: String,
    option_a: String,
    option_b: String,
    #[serde(default)]
    option_c: String,
    #[serde(default)]
    option_d: String,
    correct: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    topic: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub test_id: String,
    pub imported: usize,
    pub skipped: usize,
    pub topics_created: usize,
    pub errors: Vec<String>,
}

struct ParsedRow {
    text: String,
    options: Vec<String>,
    correct_index: usize,
    explanation: String,
    topic: String,
}

fn parse_row(row: QuestionRow) -> Result<ParsedRow> {
    // letters and indexes refer to the A-D columns, blanks included
    let columns: Vec<String> = [row.option_a, row.option_b, row.option_c, row.option_d]
        .into_iter()
        .map(|o| o.trim().to_string())
        .collect();
    let column = resolve_answer(&Value::String(row.correct.clone()), &columns).ok_or_else(|| {
        LitukError::validation(format!("cannot resolve correct answer '{}'", row.correct))
    })?;
    if columns[column].is_empty() {
        return Err(LitukError::validation(format!(
            "correct answer '{}' points at a blank option",
            row.correct
        )));
    }
    let correct_index = columns[..column].iter().filter(|o| !o.is_empty()).count();
    let options: Vec<String> = columns.into_iter().filter(|o| !o.is_empty()).collect();
    let text = row.question.trim().to_string();
    validate_question(&text, &options, correct_index)?;
    Ok(ParsedRow {
        text,
        options,
        correct_index,
        explanation: row.explanation.trim().to_string(),
        topic: row.topic.trim().to_string(),
    })
}

pub fn import_questions_csv(db: &Database, path: &Path) -> Result<ImportReport> {
    let file = std::fs::File::open(path).map_err(|e| {
        LitukError::validation(format!("cannot open {}: {e}", path.display()))
    })?;
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "Imported questions".to_string());
    import_questions(db, &title, file)
}

/// Import questions from any CSV reader into a new practice test titled `title`
pub fn import_questions<R: Read>(db: &Database, title: &str, reader: R) -> Result<ImportReport> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for (i, result) in rdr.deserialize::<QuestionRow>().enumerate() {
        // header is line 1
        let line = i + 2;
        match result
            .map_err(|e| LitukError::validation(e.to_string()))
            .and_then(parse_row)
        {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("Skipping CSV line {}: {}", line, e);
                errors.push(format!("line {line}: {e}"));
            }
        }
    }
    if rows.is_empty() {
        return Err(LitukError::validation(format!(
            "no valid questions in CSV ({} rows rejected)",
            errors.len()
        )));
    }

    let mut topic_ids: HashMap<String, String> = db
        .list_topics(None)?
        .into_iter()
        .map(|t| (t.title.to_lowercase(), t.id))
        .collect();
    let mut topics_created = 0;

    let test = db.create_test(
        &NewTest {
            title: title.to_string(),
            description: format!("{} imported questions", rows.len()),
            topic_id: None,
            kind: "practice".to_string(),
        },
        None,
    )?;

    let mut imported = 0;
    for row in rows {
        let topic_id = if row.topic.is_empty() {
            None
        } else if let Some(id) = topic_ids.get(&row.topic.to_lowercase()) {
            Some(id.clone())
        } else {
            let topic = db.create_topic(
                &NewTopic {
                    title: row.topic.clone(),
                    ..NewTopic::default()
                },
                None,
            )?;
            topics_created += 1;
            topic_ids.insert(row.topic.to_lowercase(), topic.id.clone());
            Some(topic.id)
        };
        db.create_question(&NewQuestion {
            test_id: test.id.clone(),
            topic_id,
            text: row.text,
            options: row.options,
            correct_index: row.correct_index,
            explanation: row.explanation,
        })?;
        imported += 1;
    }

    info!(
        "Imported {} questions into test {} ({} rows skipped, {} topics created)",
        imported,
        test.id,
        errors.len(),
        topics_created
    );
    Ok(ImportReport {
        test_id: test.id,
        imported,
        skipped: errors.len(),
        topics_created,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
question,option_a,option_b,option_c,option_d,correct,explanation,topic
When is St David's Day?,1 March,17 March,23 April,30 November,A,Patron saint of Wales,Customs and traditions
Who wrote the Canterbury Tales?,Chaucer,Shakespeare,,,0,,Arts and culture
Broken row,only one option,,,,A,,
What is the capital of Scotland?,Glasgow,Edinburgh,Aberdeen,Dundee,Edinburgh,,customs and traditions
";

    #[test]
    fn imports_rows_and_reuses_topics() {
        let db = Database::open_in_memory().unwrap();
        let report = import_questions(&db, "Sample", CSV.as_bytes()).unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.topics_created, 2);
        assert!(report.errors[0].starts_with("line 4"));

        let questions = db.questions_for_test(&report.test_id).unwrap();
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[1].options, vec!["Chaucer", "Shakespeare"]);
        let capital = questions
            .iter()
            .find(|q| q.text.contains("Scotland"))
            .unwrap();
        assert_eq!(capital.correct_index, 1);
        assert_eq!(capital.topic_id, questions[0].topic_id);
        assert_eq!(db.get_test(&report.test_id).unwrap().kind, "practice");
    }

    #[test]
    fn rejects_file_without_valid_rows() {
        let db = Database::open_in_memory().unwrap();
        let csv = "question,option_a,option_b,correct\nQ,a,a,A\n";
        assert!(matches!(
            import_questions(&db, "Bad", csv.as_bytes()),
            Err(LitukError::Validation { .. })
        ));
        assert!(db.list_tests(None).unwrap().is_empty());
    }

    #[test]
    fn letters_refer_to_columns_when_an_option_is_blank() {
        let db = Database::open_in_memory().unwrap();
        let csv = "\
question,option_a,option_b,option_c,option_d,correct
Which is fourth?,Alpha,Beta,,Delta,D
Which is third?,Alpha,Beta,,Delta,C
";
        let report = import_questions(&db, "Gaps", csv.as_bytes()).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.errors[0].starts_with("line 3"));
        assert!(report.errors[0].contains("blank option"));

        let questions = db.questions_for_test(&report.test_id).unwrap();
        assert_eq!(questions[0].options, vec!["Alpha", "Beta", "Delta"]);
        assert_eq!(questions[0].options[questions[0].correct_index], "Delta");
    }
}
