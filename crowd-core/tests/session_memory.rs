//! Session lifecycle and summarize-and-carry-forward memory, driven through
//! the orchestrator with a mock completion client.

use crowd_core::testing::{assert_idle, assert_line, MockCompletion, TestHarness, DEFAULT_SUMMARY};
use crowd_core::{CompletionError, EndOutcome, NpcId, Role, Speaker, TurnOutcome};
use std::sync::Arc;
use std::time::Duration;

fn mira() -> NpcId {
    NpcId::new("mira")
}

async fn system_turn(harness: &TestHarness, npc: &NpcId) -> String {
    let turns = harness.orchestrator.session(npc).unwrap().turns().await;
    assert_eq!(turns[0].role, Role::System);
    turns[0].content.clone()
}

#[tokio::test]
async fn test_end_without_exchange_skips_summary() {
    let harness = TestHarness::new();

    harness.orchestrator.start_chat(&mira()).await.unwrap();
    let outcome = harness.orchestrator.end_chat().await.unwrap();

    assert_eq!(outcome, EndOutcome::Skipped);
    assert_eq!(harness.completion.call_count(), 0);
    assert_eq!(harness.summary("mira", "User").await, None);
    assert_idle(harness.state("mira").await);
}

#[tokio::test]
async fn test_end_creates_then_appends_memory() {
    let harness = TestHarness::new();
    harness
        .completion
        .queue_summary(Ok("The player asked about herbs.".into()))
        .queue_summary(Ok("The player came back for a remedy.".into()));

    harness.orchestrator.start_chat(&mira()).await.unwrap();
    harness.orchestrator.send_user_message("Hello").await.unwrap();
    let first = harness.orchestrator.end_chat().await.unwrap();
    assert_eq!(
        first,
        EndOutcome::Summarized("The player asked about herbs.".into())
    );
    assert_eq!(
        harness.summary("mira", "User").await.as_deref(),
        Some("The player asked about herbs.")
    );

    harness.orchestrator.start_chat(&mira()).await.unwrap();
    harness.orchestrator.send_user_message("Back again").await.unwrap();
    harness.orchestrator.end_chat().await.unwrap();

    assert_eq!(
        harness.summary("mira", "User").await.as_deref(),
        Some("The player asked about herbs.\nThe player came back for a remedy.")
    );

    let summaries = harness.completion.summary_calls();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].last_content(), "User: Hello\nAssistant: Reply 1");
}

#[tokio::test]
async fn test_start_recalls_memory_for_partner_only() {
    let mut harness = TestHarness::new();
    let memory = harness.orchestrator.memory();
    memory.append(&mira(), "User", "The player owes Mira a coin.").await;
    memory.append(&mira(), "Bram", "Bram insulted Mira's tea.").await;

    harness.orchestrator.start_chat(&mira()).await.unwrap();

    let system = system_turn(&harness, &mira()).await;
    assert!(system.contains("The player owes Mira a coin."));
    assert!(!system.contains("Bram insulted Mira's tea."));

    // The recalled summary doubles as the chat opener
    let lines = harness.drain_lines();
    assert_line(&lines, &Speaker::Narrator, "**Mira**: The player owes Mira a coin.");
}

#[tokio::test]
async fn test_new_partner_gets_no_memory() {
    let harness = TestHarness::new();
    harness
        .orchestrator
        .memory()
        .append(&mira(), "Bram", "Bram insulted Mira's tea.")
        .await;

    harness.orchestrator.start_chat(&mira()).await.unwrap();

    let system = system_turn(&harness, &mira()).await;
    assert!(!system.contains("Past conversations"));
    assert!(!system.contains("Bram insulted"));
}

#[tokio::test]
async fn test_malformed_response_uses_fallback() {
    let completion = MockCompletion::new();
    completion.queue_reply(Err(CompletionError::MalformedResponse(
        "response contained no choices".into(),
    )));
    let mut harness = TestHarness::with_completion(completion);

    harness.orchestrator.start_chat(&mira()).await.unwrap();
    let outcome = harness.orchestrator.send_user_message("Hello").await.unwrap();

    match outcome {
        TurnOutcome::Replied(reply) => {
            assert_eq!(reply.text, "No response");
            assert!(reply.error.is_some());
        }
        other => panic!("expected a reply, got {other:?}"),
    }

    let turns = harness.orchestrator.session(&mira()).unwrap().turns().await;
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[2].role, Role::Assistant);
    assert_eq!(turns[2].content, "No response");

    let lines = harness.drain_lines();
    assert_line(&lines, &Speaker::User, "Hello");
    assert_line(&lines, &Speaker::Npc("Mira".into()), "No response");
}

#[tokio::test]
async fn test_transport_failure_is_shown_as_npc_line() {
    let completion = MockCompletion::new();
    completion.queue_reply(Err(CompletionError::TransportFailure("refused".into())));
    let mut harness = TestHarness::with_completion(completion);

    harness.orchestrator.start_chat(&mira()).await.unwrap();
    harness.orchestrator.send_user_message("Hello").await.unwrap();

    let session = harness.orchestrator.session(&mira()).unwrap();
    assert!(session.last_message().await.starts_with("Error:"));
    assert!(harness
        .drain_lines()
        .iter()
        .any(|(speaker, text)| speaker == "Mira" && text.contains("try again")));
}

#[tokio::test]
async fn test_summarization_failure_still_ends_chat() {
    let harness = TestHarness::new();
    harness
        .completion
        .queue_summary(Err(CompletionError::ServerError {
            status: 500,
            message: "boom".into(),
        }));

    harness.orchestrator.start_chat(&mira()).await.unwrap();
    harness.orchestrator.send_user_message("Hello").await.unwrap();
    let outcome = harness.orchestrator.end_chat().await.unwrap();

    assert!(matches!(outcome, EndOutcome::SummarizationFailed(_)));
    assert_idle(harness.state("mira").await);
    assert_eq!(harness.summary("mira", "User").await, None);
    assert!(harness
        .orchestrator
        .session(&mira())
        .unwrap()
        .turns()
        .await
        .is_empty());
}

#[tokio::test]
async fn test_default_summary_model_used() {
    let harness = TestHarness::new();

    harness.orchestrator.start_chat(&mira()).await.unwrap();
    harness.orchestrator.send_user_message("Hello").await.unwrap();
    harness.orchestrator.end_chat().await.unwrap();

    let calls = harness.completion.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.model == "gpt-4o-mini"));
    assert_eq!(
        harness.summary("mira", "User").await.as_deref(),
        Some(DEFAULT_SUMMARY)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reply_arriving_after_end_is_discarded() {
    let mut harness = TestHarness::with_completion(
        MockCompletion::new().with_delay(Duration::from_millis(200)),
    );
    harness.orchestrator.start_chat(&mira()).await.unwrap();

    let orchestrator = Arc::clone(&harness.orchestrator);
    let in_flight =
        tokio::spawn(async move { orchestrator.send_user_message("Are you there?").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let ended = harness.orchestrator.end_chat().await.unwrap();
    // Only the player's line was recorded, so there was nothing to summarize
    assert_eq!(ended, EndOutcome::Skipped);

    let outcome = in_flight.await.unwrap().unwrap();
    assert_eq!(outcome, TurnOutcome::Discarded);

    assert_idle(harness.state("mira").await);
    assert!(harness
        .orchestrator
        .session(&mira())
        .unwrap()
        .turns()
        .await
        .is_empty());
    assert!(!harness
        .drain_lines()
        .iter()
        .any(|(speaker, _)| speaker == "Mira"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_user_turns_are_serialized() {
    let harness = TestHarness::with_completion(
        MockCompletion::new().with_delay(Duration::from_millis(100)),
    );
    harness.orchestrator.start_chat(&mira()).await.unwrap();

    let (first, second) = tokio::join!(
        harness.orchestrator.send_user_message("first"),
        harness.orchestrator.send_user_message("second"),
    );
    assert!(matches!(first.unwrap(), TurnOutcome::Replied(_)));
    assert!(matches!(second.unwrap(), TurnOutcome::Replied(_)));

    // The second request waited for the first reply
    let calls = harness.completion.dialogue_calls();
    assert_eq!(calls.len(), 2);
    let roles: Vec<Role> = calls[1].messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );

    let turns = harness.orchestrator.session(&mira()).unwrap().turns().await;
    let history: Vec<(Role, &str)> = turns[1..]
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        history,
        vec![
            (Role::User, "first"),
            (Role::Assistant, "Reply 1"),
            (Role::User, "second"),
            (Role::Assistant, "Reply 2"),
        ]
    );
}
