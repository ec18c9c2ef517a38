//! Study assistant grounded in the ingested handbook

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LitukError, Result};
use crate::llm::{ChatMessage, ChatModel, ResponseFormat};
use crate::search::{SearchHit, Searcher};
use crate::storage::{Database, StoredChatMessage, User};
use crate::utils::new_id;

const MAX_MESSAGE_CHARS: usize = 2000;
const HISTORY_PAGE: usize = 200;
const SNIPPET_CHARS: usize = 400;

const SYSTEM_PROMPT: &str = "You are a friendly tutor helping people prepare for the Life in the UK Test. \
Answer using the study material below. If the material does not cover the question, say so briefly \
and suggest which part of the handbook to revise. Keep answers short and factual.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSource {
    pub chunk_id: String,
    pub document_name: String,
    pub score: f32,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub session_id: String,
    pub answer: String,
    pub sources: Vec<ChatSource>,
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub history_limit: usize,
    pub top_k: usize,
    pub min_score: f32,
}

#[derive(Clone)]
pub struct Chatbot {
    db: Database,
    searcher: Searcher,
    chat: Arc<dyn ChatModel>,
    settings: ChatSettings,
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn system_prompt(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("{SYSTEM_PROMPT}\n\nSTUDY MATERIAL:\n(no matching material found)");
    }
    let context = hits
        .iter()
        .enumerate()
        .map(|(i, h)| format!("[{}] ({}) {}", i + 1, h.document_name, h.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{SYSTEM_PROMPT}\n\nSTUDY MATERIAL:\n{context}")
}

/// Reply assembled from the retrieved snippets when the model is unavailable
fn fallback_answer(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "The assistant is unavailable right now and nothing in the study material matched \
                your question. Please try again later."
            .to_string();
    }
    let mut answer =
        String::from("The assistant is unavailable right now. These passages from the handbook look relevant:\n");
    for hit in hits.iter().take(3) {
        answer.push_str(&format!("\n- {}", excerpt(&hit.text)));
    }
    answer
}

impl Chatbot {
    pub fn new(
        db: Database,
        searcher: Searcher,
        chat: Arc<dyn ChatModel>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            db,
            searcher,
            chat,
            settings,
        }
    }

    pub async fn ask(
        &self,
        user: &User,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(LitukError::validation("message must not be empty"));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(LitukError::validation(format!(
                "message is longer than {MAX_MESSAGE_CHARS} characters"
            )));
        }
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_id);

        let hits = match self
            .searcher
            .search(message, self.settings.top_k, self.settings.min_score)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Chat retrieval failed, answering without context: {}", e);
                Vec::new()
            }
        };

        let history =
            self.db
                .recent_chat_messages(&session_id, &user.id, self.settings.history_limit)?;
        let mut messages = vec![ChatMessage::system(system_prompt(&hits))];
        for past in &history {
            messages.push(match past.role.as_str() {
                "assistant" => ChatMessage::assistant(past.content.clone()),
                _ => ChatMessage::user(past.content.clone()),
            });
        }
        messages.push(ChatMessage::user(message));

        let (answer, fallback) = match self.chat.complete(&messages, ResponseFormat::Text).await {
            Ok(answer) if !answer.trim().is_empty() => (answer.trim().to_string(), false),
            Ok(_) => {
                warn!("Chat model returned an empty answer");
                (fallback_answer(&hits), true)
            }
            Err(e) => {
                warn!("Chat model failed: {}", e);
                (fallback_answer(&hits), true)
            }
        };
        debug!(
            "chat session {}: {} history messages, {} sources, fallback={}",
            session_id,
            history.len(),
            hits.len(),
            fallback
        );

        self.db
            .append_chat_message(&session_id, &user.id, "user", message)?;
        self.db
            .append_chat_message(&session_id, &user.id, "assistant", &answer)?;

        Ok(ChatReply {
            session_id,
            answer,
            sources: hits
                .iter()
                .map(|h| ChatSource {
                    chunk_id: h.chunk_id.clone(),
                    document_name: h.document_name.clone(),
                    score: h.score,
                    excerpt: excerpt(&h.text),
                })
                .collect(),
            fallback,
        })
    }

    pub fn history(&self, user: &User, session_id: &str) -> Result<Vec<StoredChatMessage>> {
        self.db
            .recent_chat_messages(session_id, &user.id, HISTORY_PAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{Embedder, FakeEmbedder};
    use crate::llm::ScriptedChat;
    use crate::storage::Role;

    fn bot(chat: Arc<ScriptedChat>) -> (Chatbot, User) {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("u@example.com", "U", "h", Role::User).unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(None));
        let searcher = Searcher::new(db.clone(), embedder);
        let settings = ChatSettings {
            history_limit: 4,
            top_k: 3,
            min_score: 0.0,
        };
        (Chatbot::new(db, searcher, chat, settings), user)
    }

    #[tokio::test]
    async fn keeps_history_per_session() {
        let chat = Arc::new(ScriptedChat::with_responses(["First answer", "Second answer"]));
        let (bot, user) = bot(chat.clone());
        let first = bot.ask(&user, None, "When is St David's Day?").await.unwrap();
        assert_eq!(first.answer, "First answer");
        assert!(!first.fallback);

        bot.ask(&user, Some(&first.session_id), "And St Andrew's Day?")
            .await
            .unwrap();
        let calls = chat.calls();
        // system + two earlier messages + the new question
        assert_eq!(calls[1].len(), 4);
        assert_eq!(calls[1][2].content, "First answer");

        let history = bot.history(&user, &first.session_id).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].content, "Second answer");
    }

    #[tokio::test]
    async fn falls_back_when_model_fails() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push_error("upstream down");
        let (bot, user) = bot(chat);
        let reply = bot.ask(&user, None, "Who was Robert Burns?").await.unwrap();
        assert!(reply.fallback);
        assert!(reply.answer.contains("unavailable"));
    }

    #[tokio::test]
    async fn rejects_empty_messages() {
        let (bot, user) = bot(Arc::new(ScriptedChat::new()));
        assert!(matches!(
            bot.ask(&user, None, "  ").await,
            Err(LitukError::Validation { .. })
        ));
    }
}
