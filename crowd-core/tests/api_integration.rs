//! Integration tests that call the real OpenAI API.
//!
//! These tests require OPENAI_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p crowd-core --test api_integration -- --ignored`

use crowd_core::testing::sample_registry;
use crowd_core::{
    ChatCompletionClient, DialogueConfig, DialogueOrchestrator, EndOutcome,
    EnvCredentialProvider, LoopStatus, NpcId, TurnOutcome,
};
use std::sync::Arc;
use std::time::Duration;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("OPENAI_API_KEY").is_ok()
}

fn live_orchestrator() -> DialogueOrchestrator {
    let config = DialogueConfig::from_env()
        .with_max_exchanges(2)
        .with_turn_delay(Duration::from_millis(200));
    let client = ChatCompletionClient::from_config(&config, Arc::new(EnvCredentialProvider::new()));
    let (dialogue, _events) = DialogueOrchestrator::new(
        sample_registry(&[("mira", "Mira"), ("bram", "Bram")]),
        Arc::new(client),
        config,
    );
    dialogue
}

#[tokio::test]
#[ignore] // Run with: cargo test -p crowd-core --test api_integration -- --ignored
async fn test_user_chat_with_real_api() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: OPENAI_API_KEY not set");
        return;
    }

    let dialogue = live_orchestrator();
    let mira = NpcId::new("mira");

    dialogue.start_chat(&mira).await.expect("chat should open");
    let outcome = dialogue
        .send_user_message("Hello! What do you sell here?")
        .await
        .expect("message should be accepted");
    match outcome {
        TurnOutcome::Replied(reply) => {
            println!("Mira: {}", reply.text);
            assert!(!reply.is_failure(), "reply failed: {}", reply.text);
        }
        other => panic!("expected a reply, got {other:?}"),
    }

    let ended = dialogue.end_chat().await.expect("chat should end");
    println!("End: {ended:?}");
    assert!(matches!(ended, EndOutcome::Summarized(_)));
}

#[tokio::test]
#[ignore]
async fn test_autonomous_chat_with_real_api() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: OPENAI_API_KEY not set");
        return;
    }

    let dialogue = live_orchestrator();
    let outcome = dialogue
        .start_autonomous_chat(
            &NpcId::new("mira"),
            &NpcId::new("bram"),
            "Have you seen the fog over the marsh?",
        )
        .await
        .expect("loop should run");

    let transcript = dialogue.archive().get(outcome.archive_index).unwrap();
    for entry in &transcript.entries {
        println!("{}: {}", entry.speaker, entry.text);
    }
    assert_eq!(outcome.status, LoopStatus::Completed);
}
