//! Line-oriented console gateway.
//!
//! - Lines starting with `#` are commands (talk, end, npc, archive, ...)
//! - Any other line is said to the NPC the player is talking to
//! - Events from the orchestrator are printed between input lines

use crowd_core::{
    DialogueError, DialogueEvent, DialogueOrchestrator, EventReceiver, GatewayCommand, NpcId,
    Speaker,
};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Gateway(GatewayCommand),
    List,
    Archive,
    Replay(usize),
    Help,
    Quit,
}

/// Parse one input line. `Err` carries a usage message.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(command) = line.strip_prefix('#') else {
        return Ok(Some(ConsoleCommand::Gateway(
            GatewayCommand::UserMessageSubmitted(line.to_string()),
        )));
    };

    let parts: Vec<&str> = command.split_whitespace().collect();
    let parsed = match parts.as_slice() {
        ["quit"] | ["exit"] => ConsoleCommand::Quit,
        ["help"] => ConsoleCommand::Help,
        ["list"] => ConsoleCommand::List,
        ["archive"] => ConsoleCommand::Archive,
        ["end"] => ConsoleCommand::Gateway(GatewayCommand::ChatClosed),
        ["talk", id] => ConsoleCommand::Gateway(GatewayCommand::ChatOpened(NpcId::new(*id))),
        ["talk", ..] => return Err("Usage: #talk <npc id>".to_string()),
        ["replay", index] => {
            let index = index
                .parse()
                .map_err(|_| "Usage: #replay <archive index>".to_string())?;
            ConsoleCommand::Replay(index)
        }
        ["replay", ..] => return Err("Usage: #replay <archive index>".to_string()),
        ["npc", first, second, opener @ ..] if !opener.is_empty() => {
            ConsoleCommand::Gateway(GatewayCommand::AutonomousChatRequested {
                first: NpcId::new(*first),
                second: NpcId::new(*second),
                opener: opener.join(" "),
            })
        }
        ["npc", ..] => return Err("Usage: #npc <first id> <second id> <opening line>".to_string()),
        _ => return Err(format!("Unknown command: #{command} (try #help)")),
    };
    Ok(Some(parsed))
}

/// Render an event as a console line.
pub fn format_event(event: &DialogueEvent) -> String {
    match event {
        DialogueEvent::MessageProduced {
            speaker: Speaker::Narrator,
            text,
        } => format!("  ~ {text}"),
        DialogueEvent::MessageProduced { speaker, text } => format!("{speaker}: {text}"),
        DialogueEvent::ConversationEnded { npc_id } => format!("[ENDED] {npc_id}"),
        DialogueEvent::Warning(message) => format!("[WARN] {message}"),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  #talk <id>                 - Start chatting with an NPC");
    println!("  #end                       - End the current chat");
    println!("  #npc <a> <b> <opening...>  - Let two NPCs talk to each other");
    println!("  #list                      - List NPCs");
    println!("  #archive                   - List archived NPC conversations");
    println!("  #replay <n>                - Replay archived conversation n");
    println!("  #help                      - Show this help");
    println!("  #quit                      - Exit");
    println!("Anything else is said to the NPC you are talking to.");
}

/// Run the console until `#quit` or end of input.
pub async fn run(dialogue: Arc<DialogueOrchestrator>, mut events: EventReceiver) -> io::Result<()> {
    println!("=== crowd ===");
    print_help();
    println!();

    let mut conversations = JoinSet::new();
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        let line = tokio::select! {
            Some(event) = events.recv() => {
                println!("{}", format_event(&event));
                continue;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("[ERROR] {usage}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => print_help(),
            ConsoleCommand::List => {
                for npc in dialogue.npcs() {
                    println!("  {} - {} ({}, {})", npc.id, npc.name, npc.occupation, npc.culture);
                }
            }
            ConsoleCommand::Archive => {
                let archive = dialogue.archive();
                if archive.count() == 0 {
                    println!("[ARCHIVE] empty");
                }
                for index in 0..archive.count() {
                    if let Some(preview) = archive.preview(index) {
                        println!("  [{index}] {preview}");
                    }
                }
            }
            ConsoleCommand::Replay(index) => {
                if let Err(e) = dialogue.replay_transcript(index) {
                    println!("[ERROR] {e}");
                }
            }
            ConsoleCommand::Gateway(GatewayCommand::AutonomousChatRequested {
                first,
                second,
                opener,
            }) => {
                // Runs in the background so the player can keep chatting
                let dialogue = Arc::clone(&dialogue);
                conversations.spawn(async move {
                    match dialogue
                        .start_autonomous_chat(&first, &second, &opener)
                        .await
                    {
                        Ok(outcome) => println!(
                            "[ARCHIVED #{}] {:?} after {} replies",
                            outcome.archive_index, outcome.status, outcome.exchanges
                        ),
                        Err(e) => println!("[ERROR] {e}"),
                    }
                });
            }
            ConsoleCommand::Gateway(command) => match dialogue.handle(command).await {
                Ok(()) | Err(DialogueError::EmptyUserInput) => {}
                Err(e) => println!("[ERROR] {e}"),
            },
        }
    }

    dialogue.shutdown().await;
    while conversations.join_next().await.is_some() {}
    while let Ok(event) = events.try_recv() {
        println!("{}", format_event(&event));
    }

    println!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_is_user_message() {
        assert_eq!(
            parse_line("  Hello there "),
            Ok(Some(ConsoleCommand::Gateway(
                GatewayCommand::UserMessageSubmitted("Hello there".into())
            )))
        );
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            parse_line("#talk npc_mira"),
            Ok(Some(ConsoleCommand::Gateway(GatewayCommand::ChatOpened(
                NpcId::new("npc_mira")
            ))))
        );
        assert_eq!(
            parse_line("#npc npc_mira npc_oskar Fine weather today"),
            Ok(Some(ConsoleCommand::Gateway(
                GatewayCommand::AutonomousChatRequested {
                    first: NpcId::new("npc_mira"),
                    second: NpcId::new("npc_oskar"),
                    opener: "Fine weather today".into(),
                }
            )))
        );
        assert_eq!(parse_line("#replay 2"), Ok(Some(ConsoleCommand::Replay(2))));
        assert_eq!(parse_line("#quit"), Ok(Some(ConsoleCommand::Quit)));
    }

    #[test]
    fn test_bad_commands() {
        assert!(parse_line("#npc npc_mira npc_oskar").is_err());
        assert!(parse_line("#replay x").is_err());
        assert!(parse_line("#talk").is_err());
        assert!(parse_line("#dance").is_err());
    }

    #[test]
    fn test_format_event() {
        let line = format_event(&DialogueEvent::MessageProduced {
            speaker: Speaker::Npc("Mira".into()),
            text: "Hello".into(),
        });
        assert_eq!(line, "Mira: Hello");

        let line = format_event(&DialogueEvent::MessageProduced {
            speaker: Speaker::Narrator,
            text: "Conversation ended.".into(),
        });
        assert_eq!(line, "  ~ Conversation ended.");
    }
}
