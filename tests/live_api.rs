#![cfg(feature = "live_api")]

use anyhow::Result;
use lituk::config::Config;
use lituk::embeddings::create_embedder;
use lituk::llm::{ChatMessage, ResponseFormat, create_chat_model};

fn live_config() -> Option<Config> {
    let config = Config::load().ok()?;
    if config.runtime.openai_api_key.is_none() {
        eprintln!("OPENAI_API_KEY not set, skipping live test");
        return None;
    }
    Some(config)
}

/// Real embeddings come back with the configured dimension
#[tokio::test]
async fn test_live_embedding_dimensions() -> Result<()> {
    let Some(config) = live_config() else {
        return Ok(());
    };
    let embedder = create_embedder(&config)?;
    let vectors = embedder
        .embed_batch(&[
            "The Magna Carta was sealed in 1215.".to_string(),
            "The Battle of Hastings took place in 1066.".to_string(),
        ])
        .await?;
    assert_eq!(vectors.len(), 2);
    assert!(vectors.iter().all(|v| v.len() == embedder.dimensions()));
    Ok(())
}

/// JSON mode returns a parseable object
#[tokio::test]
async fn test_live_chat_json_reply() -> Result<()> {
    let Some(config) = live_config() else {
        return Ok(());
    };
    let chat = create_chat_model(&config)?;
    let reply = chat
        .complete(
            &[
                ChatMessage::system("Reply with a JSON object only."),
                ChatMessage::user(r#"Return {"capital": "<capital of Wales>"}"#),
            ],
            ResponseFormat::Json,
        )
        .await?;
    let value: serde_json::Value = serde_json::from_str(reply.trim())?;
    assert!(value["capital"].as_str().unwrap_or_default().contains("Cardiff"));
    Ok(())
}
