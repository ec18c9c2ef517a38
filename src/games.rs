//! Flashcard and matching games built from the question bank

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::{LitukError, Result};
use crate::storage::{Database, Game, GameKind, Question, Topic};

const MAX_MATCHING_PAIRS: usize = 8;

/// Fisher–Yates shuffle driven by a seeded `StdRng`; equal seeds give equal orders
pub fn seeded_shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchPair {
    pub key: String,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlashcardDeck {
    cards: Vec<Flashcard>,
}

/// Stored matching payload; `salt` never leaves the server
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatchingSet {
    #[serde(default)]
    salt: String,
    pairs: Vec<MatchPair>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchLeft {
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRight {
    pub id: String,
    pub text: String,
}

/// A game as presented to a player for one round
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DealtGame {
    Flashcards {
        game_id: String,
        title: String,
        cards: Vec<Flashcard>,
    },
    Matching {
        game_id: String,
        title: String,
        left: Vec<MatchLeft>,
        right: Vec<MatchRight>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub correct: usize,
    pub total: usize,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PopulateReport {
    pub topics: usize,
    pub games: usize,
}

fn short_hash(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex()[..12].to_string()
}

fn right_id(salt: &str, key: &str) -> String {
    short_hash(&format!("{salt}:{key}:right"))
}

fn new_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn answer_text(q: &Question) -> String {
    q.options.get(q.correct_index).cloned().unwrap_or_default()
}

fn flashcards_for(questions: &[Question]) -> FlashcardDeck {
    FlashcardDeck {
        cards: questions
            .iter()
            .map(|q| Flashcard {
                id: q.id.clone(),
                front: q.text.clone(),
                back: answer_text(q),
                explanation: q.explanation.clone(),
            })
            .collect(),
    }
}

fn pairs_from<I>(items: I) -> MatchingSet
where
    I: IntoIterator<Item = (String, String)>,
{
    MatchingSet {
        salt: new_salt(),
        pairs: items
            .into_iter()
            .take(MAX_MATCHING_PAIRS)
            .map(|(left, right)| MatchPair {
                key: short_hash(&format!("{left}\u{1f}{right}")),
                left,
                right,
            })
            .collect(),
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Rebuild every game: per topic with at least two questions, one flashcard
/// deck and one question/answer matching set, plus a cross-topic matching set
/// of topic titles and descriptions. Existing games of those topics are replaced.
pub fn populate_games(db: &Database) -> Result<PopulateReport> {
    let mut report = PopulateReport::default();
    let topics = db.list_topics(None)?;
    for topic in &topics {
        db.delete_games(Some(&topic.id))?;
        let questions = db.questions_for_topic(&topic.id)?;
        if questions.len() < 2 {
            continue;
        }
        db.create_game(
            Some(&topic.id),
            GameKind::Flashcards,
            &format!("{} flashcards", topic.title),
            &to_payload(&flashcards_for(&questions))?,
        )?;
        let qa = questions.iter().map(|q| (q.text.clone(), answer_text(q)));
        db.create_game(
            Some(&topic.id),
            GameKind::Matching,
            &format!("{}: match the answers", topic.title),
            &to_payload(&pairs_from(qa))?,
        )?;
        report.topics += 1;
        report.games += 2;
    }

    let described: Vec<&Topic> = topics
        .iter()
        .filter(|t| !t.description.trim().is_empty())
        .collect();
    db.delete_games(None)?;
    if described.len() >= 2 {
        let pairs = described
            .iter()
            .map(|t| (t.title.clone(), t.description.clone()));
        db.create_game(
            None,
            GameKind::Matching,
            "Topics and their summaries",
            &to_payload(&pairs_from(pairs))?,
        )?;
        report.games += 1;
    }
    info!(
        "Populated {} games across {} topics",
        report.games, report.topics
    );
    Ok(report)
}

fn corrupt(game: &Game, e: serde_json::Error) -> LitukError {
    LitukError::Internal {
        message: format!("game {} has an unreadable payload: {e}", game.id),
    }
}

/// Lay out a game for play; the same seed always deals the same layout
pub fn deal(game: &Game, seed: u64) -> Result<DealtGame> {
    match game.kind {
        GameKind::Flashcards => {
            let mut deck: FlashcardDeck =
                serde_json::from_value(game.payload.clone()).map_err(|e| corrupt(game, e))?;
            seeded_shuffle(&mut deck.cards, seed);
            Ok(DealtGame::Flashcards {
                game_id: game.id.clone(),
                title: game.title.clone(),
                cards: deck.cards,
            })
        }
        GameKind::Matching => {
            let set: MatchingSet =
                serde_json::from_value(game.payload.clone()).map_err(|e| corrupt(game, e))?;
            let mut left: Vec<MatchLeft> = set
                .pairs
                .iter()
                .map(|p| MatchLeft {
                    key: p.key.clone(),
                    text: p.left.clone(),
                })
                .collect();
            let mut right: Vec<MatchRight> = set
                .pairs
                .iter()
                .map(|p| MatchRight {
                    id: right_id(&set.salt, &p.key),
                    text: p.right.clone(),
                })
                .collect();
            seeded_shuffle(&mut left, seed);
            seeded_shuffle(&mut right, seed.wrapping_add(1).rotate_left(17));
            Ok(DealtGame::Matching {
                game_id: game.id.clone(),
                title: game.title.clone(),
                left,
                right,
            })
        }
    }
}

/// Score guesses mapping left keys to right ids
pub fn check_matching(game: &Game, guesses: &HashMap<String, String>) -> Result<MatchResult> {
    if game.kind != GameKind::Matching {
        return Err(LitukError::validation(format!(
            "game {} is not a matching game",
            game.id
        )));
    }
    let set: MatchingSet =
        serde_json::from_value(game.payload.clone()).map_err(|e| corrupt(game, e))?;
    let total = set.pairs.len();
    let correct = set
        .pairs
        .iter()
        .filter(|p| guesses.get(&p.key) == Some(&right_id(&set.salt, &p.key)))
        .count();
    Ok(MatchResult {
        correct,
        total,
        completed: correct == total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewQuestion, NewTest, NewTopic};

    #[test]
    fn shuffle_is_deterministic_per_seed() {
        let mut a: Vec<u32> = (0..20).collect();
        let mut b = a.clone();
        seeded_shuffle(&mut a, 42);
        seeded_shuffle(&mut b, 42);
        assert_eq!(a, b);
        let mut c: Vec<u32> = (0..20).collect();
        seeded_shuffle(&mut c, 7);
        assert_ne!(a, c);
        c.sort();
        assert_eq!(c, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_handles_tiny_inputs() {
        let mut empty: Vec<u8> = Vec::new();
        seeded_shuffle(&mut empty, 1);
        let mut one = vec![9];
        seeded_shuffle(&mut one, 1);
        assert_eq!(one, vec![9]);
    }

    fn seed_bank(db: &Database) -> String {
        let topic = db
            .create_topic(
                &NewTopic {
                    title: "Monarchy".into(),
                    description: "Kings and queens".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        db.create_topic(
            &NewTopic {
                title: "Sport".into(),
                description: "Famous sporting events".into(),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let test = db
            .create_test(
                &NewTest {
                    title: "Monarchy basics".into(),
                    topic_id: Some(topic.id.clone()),
                    kind: "practice".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        for (text, answer) in [
            ("Who signed the Magna Carta?", "King John"),
            ("Who was the first Tudor king?", "Henry VII"),
            ("Who is the head of state?", "The monarch"),
        ] {
            db.create_question(&NewQuestion {
                test_id: test.id.clone(),
                topic_id: Some(topic.id.clone()),
                text: text.into(),
                options: vec![answer.into(), "Nobody".into()],
                correct_index: 0,
                explanation: String::new(),
            })
            .unwrap();
        }
        topic.id
    }

    #[test]
    fn populate_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let topic_id = seed_bank(&db);
        let first = populate_games(&db).unwrap();
        assert_eq!(first.topics, 1);
        assert_eq!(first.games, 3);
        populate_games(&db).unwrap();
        assert_eq!(db.list_games(Some(&topic_id)).unwrap().len(), 2);
        assert_eq!(db.list_games(None).unwrap().len(), 3);
    }

    #[test]
    fn matching_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let topic_id = seed_bank(&db);
        populate_games(&db).unwrap();
        let game = db
            .list_games(Some(&topic_id))
            .unwrap()
            .into_iter()
            .find(|g| g.kind == GameKind::Matching)
            .unwrap();

        let dealt = deal(&game, 3).unwrap();
        assert_eq!(dealt, deal(&game, 3).unwrap());
        let DealtGame::Matching { left, right, .. } = dealt else {
            panic!("expected a matching game");
        };
        assert_eq!(left.len(), 3);

        // Pair each left item with its right item by looking the answer up
        let set: MatchingSet = serde_json::from_value(game.payload.clone()).unwrap();
        let guesses: HashMap<String, String> = left
            .iter()
            .map(|l| {
                let pair = set.pairs.iter().find(|p| p.key == l.key).unwrap();
                let r = right.iter().find(|r| r.text == pair.right).unwrap();
                (l.key.clone(), r.id.clone())
            })
            .collect();
        let result = check_matching(&game, &guesses).unwrap();
        assert!(result.completed);
        assert_eq!(result.correct, 3);

        let partial = check_matching(&game, &HashMap::new()).unwrap();
        assert_eq!(partial.correct, 0);
        assert!(!partial.completed);
    }

    #[test]
    fn right_ids_are_not_derivable_from_dealt_fields() {
        let db = Database::open_in_memory().unwrap();
        let topic_id = seed_bank(&db);
        populate_games(&db).unwrap();
        let matching = |db: &Database| {
            db.list_games(Some(&topic_id))
                .unwrap()
                .into_iter()
                .find(|g| g.kind == GameKind::Matching)
                .unwrap()
        };
        let game = matching(&db);
        let set: MatchingSet = serde_json::from_value(game.payload.clone()).unwrap();
        assert_eq!(set.salt.len(), 32);

        let dealt = deal(&game, 5).unwrap();
        let dealt_json = serde_json::to_string(&dealt).unwrap();
        assert!(!dealt_json.contains(&set.salt));
        let DealtGame::Matching { game_id, left, right, .. } = dealt else {
            panic!("expected a matching game");
        };
        let guessed: Vec<String> = left
            .iter()
            .map(|l| short_hash(&format!("{game_id}:{}:right", l.key)))
            .collect();
        assert!(right.iter().all(|r| !guessed.contains(&r.id)));

        // a rebuilt set gets a fresh salt
        populate_games(&db).unwrap();
        let rebuilt: MatchingSet =
            serde_json::from_value(matching(&db).payload).unwrap();
        assert_ne!(rebuilt.salt, set.salt);
    }

    #[test]
    fn topic_below_two_questions_loses_its_games() {
        let db = Database::open_in_memory().unwrap();
        let topic_id = seed_bank(&db);
        populate_games(&db).unwrap();
        assert_eq!(db.list_games(Some(&topic_id)).unwrap().len(), 2);

        let questions = db.questions_for_topic(&topic_id).unwrap();
        for q in &questions[1..] {
            db.delete_question(&q.id).unwrap();
        }
        let report = populate_games(&db).unwrap();
        assert_eq!(report.topics, 0);
        assert!(db.list_games(Some(&topic_id)).unwrap().is_empty());
    }

    #[test]
    fn flashcards_show_the_answer_on_the_back() {
        let db = Database::open_in_memory().unwrap();
        let topic_id = seed_bank(&db);
        populate_games(&db).unwrap();
        let game = db
            .list_games(Some(&topic_id))
            .unwrap()
            .into_iter()
            .find(|g| g.kind == GameKind::Flashcards)
            .unwrap();
        let DealtGame::Flashcards { cards, .. } = deal(&game, 1).unwrap() else {
            panic!("expected flashcards");
        };
        let card = cards
            .iter()
            .find(|c| c.front == "Who signed the Magna Carta?")
            .unwrap();
        assert_eq!(card.back, "King John");
        assert!(check_matching(&game, &HashMap::new()).is_err());
    }
}
