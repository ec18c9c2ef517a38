//! Practice test grading, timed mock exams and learner progress

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::config::ExamConfig;
use crate::error::{LitukError, Result};
use crate::games::seeded_shuffle;
use crate::utils::rfc3339;
use crate::storage::{
    Attempt, AttemptGrade, AttemptKind, Database, PublicQuestion, Question, User,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionResult {
    pub question_id: String,
    pub selected: Option<usize>,
    pub correct_index: usize,
    pub correct: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt_id: String,
    pub kind: AttemptKind,
    pub score: u32,
    pub total: u32,
    pub percent: u32,
    pub passed: bool,
    pub timed_out: bool,
    pub results: Vec<QuestionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockExam {
    pub attempt_id: String,
    pub started_at: String,
    pub expires_at: String,
    pub time_limit_minutes: i64,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicAccuracy {
    pub topic_id: String,
    pub title: String,
    pub answered: u32,
    pub correct: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub attempts: usize,
    pub mock_attempts: usize,
    pub average_percent: Option<f64>,
    pub best_percent: Option<u32>,
    pub passes: usize,
    pub topics: Vec<TopicAccuracy>,
    pub ready: bool,
}

/// Rounded percentage; an empty attempt scores 0
pub fn percent(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(correct) * 100.0 / f64::from(total)).round() as u32
}

#[derive(Clone)]
pub struct ExamService {
    db: Database,
    config: ExamConfig,
}

impl ExamService {
    pub fn new(db: Database, config: ExamConfig) -> Self {
        Self { db, config }
    }

    fn grade(
        &self,
        questions: &[Question],
        answers: &HashMap<String, usize>,
        timed_out: bool,
        now: DateTime<Utc>,
    ) -> (AttemptGrade, Vec<QuestionResult>) {
        let results: Vec<QuestionResult> = questions
            .iter()
            .map(|q| {
                let selected = answers.get(&q.id).copied();
                QuestionResult {
                    question_id: q.id.clone(),
                    selected,
                    correct_index: q.correct_index,
                    correct: selected == Some(q.correct_index),
                    explanation: q.explanation.clone(),
                }
            })
            .collect();
        let score = results.iter().filter(|r| r.correct).count() as u32;
        let pct = percent(score, questions.len() as u32);
        let kept: HashMap<String, usize> = questions
            .iter()
            .filter_map(|q| answers.get(&q.id).map(|a| (q.id.clone(), *a)))
            .collect();
        let grade = AttemptGrade {
            answers: kept,
            submitted_at: rfc3339(now),
            score,
            percent: pct,
            passed: pct >= self.config.pass_mark_percent && !timed_out,
            timed_out,
        };
        (grade, results)
    }

    fn result(attempt: &Attempt, grade: &AttemptGrade, results: Vec<QuestionResult>) -> AttemptResult {
        AttemptResult {
            attempt_id: attempt.id.clone(),
            kind: attempt.kind,
            score: grade.score,
            total: results.len() as u32,
            percent: grade.percent,
            passed: grade.passed,
            timed_out: grade.timed_out,
            results,
        }
    }

    /// Grade a practice test in one step
    pub fn submit_practice(
        &self,
        user: &User,
        test_id: &str,
        answers: &HashMap<String, usize>,
    ) -> Result<AttemptResult> {
        let test = self.db.get_test(test_id)?;
        let questions = self.db.questions_for_test(&test.id)?;
        if questions.is_empty() {
            return Err(LitukError::validation(format!(
                "test {} has no questions",
                test.id
            )));
        }
        let ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
        let attempt =
            self.db
                .create_attempt(&user.id, AttemptKind::Practice, Some(&test.id), &ids, None)?;
        let (grade, results) = self.grade(&questions, answers, false, Utc::now());
        self.db.submit_attempt(&attempt.id, &grade)?;
        Ok(Self::result(&attempt, &grade, results))
    }

    /// Draw a mock exam from the whole bank using `seed`
    pub fn start_mock_exam(&self, user: &User, seed: u64) -> Result<MockExam> {
        let mut bank = self.db.all_questions()?;
        if bank.is_empty() {
            return Err(LitukError::not_found("the question bank is empty"));
        }
        seeded_shuffle(&mut bank, seed);
        bank.truncate(self.config.mock_question_count.max(1));

        let started = Utc::now();
        let ids: Vec<String> = bank.iter().map(|q| q.id.clone()).collect();
        let attempt = self.db.create_attempt(
            &user.id,
            AttemptKind::Mock,
            None,
            &ids,
            Some(&rfc3339(started)),
        )?;
        info!(
            "User {} started mock exam {} with {} questions",
            user.id,
            attempt.id,
            ids.len()
        );
        Ok(MockExam {
            attempt_id: attempt.id,
            started_at: attempt.started_at,
            expires_at: rfc3339(started + Duration::minutes(self.config.time_limit_minutes)),
            time_limit_minutes: self.config.time_limit_minutes,
            questions: bank.iter().map(Question::public).collect(),
        })
    }

    /// Grade a mock exam. Late submissions are graded but cannot pass.
    pub fn submit_mock(
        &self,
        user: &User,
        attempt_id: &str,
        answers: &HashMap<String, usize>,
        now: DateTime<Utc>,
    ) -> Result<AttemptResult> {
        let attempt = self.db.get_attempt(attempt_id)?;
        if attempt.user_id != user.id {
            return Err(LitukError::not_found(format!("attempt {attempt_id}")));
        }
        if attempt.kind != AttemptKind::Mock {
            return Err(LitukError::validation(format!(
                "attempt {attempt_id} is not a mock exam"
            )));
        }
        if attempt.submitted_at.is_some() {
            return Err(LitukError::Conflict {
                message: format!("attempt {attempt_id} was already submitted"),
            });
        }
        let started = DateTime::parse_from_rfc3339(&attempt.started_at)?.with_timezone(&Utc);
        let timed_out = now > started + Duration::minutes(self.config.time_limit_minutes);

        let questions = self.db.questions_by_ids(&attempt.question_ids)?;
        let (grade, results) = self.grade(&questions, answers, timed_out, now);
        self.db.submit_attempt(&attempt.id, &grade)?;
        info!(
            "Mock exam {} graded: {}% (passed={}, timed_out={})",
            attempt.id, grade.percent, grade.passed, grade.timed_out
        );
        Ok(Self::result(&attempt, &grade, results))
    }

    pub fn progress(&self, user: &User) -> Result<Progress> {
        let attempts: Vec<Attempt> = self
            .db
            .attempts_for_user(&user.id)?
            .into_iter()
            .filter(|a| a.submitted_at.is_some())
            .collect();

        let percents: Vec<u32> = attempts.iter().filter_map(|a| a.percent).collect();
        let average_percent = (!percents.is_empty())
            .then(|| percents.iter().map(|&p| f64::from(p)).sum::<f64>() / percents.len() as f64);
        let mocks: Vec<&Attempt> = attempts
            .iter()
            .filter(|a| a.kind == AttemptKind::Mock)
            .collect();
        let window = self.config.readiness_window.max(1);
        let ready = mocks.len() >= window
            && mocks
                .iter()
                .take(window)
                .all(|a| a.passed == Some(true));

        Ok(Progress {
            attempts: attempts.len(),
            mock_attempts: mocks.len(),
            average_percent,
            best_percent: percents.iter().copied().max(),
            passes: attempts.iter().filter(|a| a.passed == Some(true)).count(),
            topics: self.topic_accuracy(&attempts)?,
            ready,
        })
    }

    fn topic_accuracy(&self, attempts: &[Attempt]) -> Result<Vec<TopicAccuracy>> {
        let mut test_topics: HashMap<String, Option<String>> = HashMap::new();
        let mut tally: HashMap<String, (u32, u32)> = HashMap::new();
        for attempt in attempts {
            for q in self.db.questions_by_ids(&attempt.question_ids)? {
                let topic_id = match &q.topic_id {
                    Some(id) => Some(id.clone()),
                    None => match test_topics.get(&q.test_id) {
                        Some(cached) => cached.clone(),
                        None => {
                            let topic = self.db.get_test(&q.test_id)?.topic_id;
                            test_topics.insert(q.test_id.clone(), topic.clone());
                            topic
                        }
                    },
                };
                let Some(topic_id) = topic_id else { continue };
                let entry = tally.entry(topic_id).or_default();
                entry.0 += 1;
                if attempt.answers.get(&q.id) == Some(&q.correct_index) {
                    entry.1 += 1;
                }
            }
        }

        let mut topics = Vec::with_capacity(tally.len());
        for (topic_id, (answered, correct)) in tally {
            let title = match self.db.get_topic(&topic_id) {
                Ok(topic) => topic.title,
                Err(LitukError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            topics.push(TopicAccuracy {
                topic_id,
                title,
                answered,
                correct,
                accuracy: f64::from(correct) / f64::from(answered),
            });
        }
        topics.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy).then(a.title.cmp(&b.title)));
        Ok(topics)
    }
}
