//! Headless mode.
//!
//! A simple line-oriented protocol over stdin/stdout:
//! - Lines starting with `#` are commands (start, resolve, status, quit)
//! - A bare number picks one of the options the narrator last offered
//! - Anything else is sent as a player action
//!
//! In a room, poll updates are printed as they arrive while the client
//! waits for input, and a turn resolution runs in the background so the
//! room keeps syncing.

use delve_core::directive::split_speaker;
use delve_core::{
    Mode, Session, SessionConfig, SessionError, SyncOutcome, SyncedEntry, TurnOutcome,
};
use roomapi::{ClientConfig, Generation, Role, RoomClient};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

type ResolveTask = JoinHandle<Result<Generation, roomapi::Error>>;

/// Which kind of session to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Solo,
    Room { code: String, creator: bool },
}

/// Command line options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub target: Target,
    pub server: Option<String>,
}

/// Parse options from command line arguments.
pub fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut solo = false;
    let mut room = None;
    let mut creator = false;
    let mut server = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--solo" => solo = true,
            "--creator" => creator = true,
            "--room" => {
                let code = args.get(i + 1).ok_or("--room needs a room code")?;
                room = Some(code.trim().to_uppercase());
                i += 1;
            }
            "--server" => {
                let url = args.get(i + 1).ok_or("--server needs a URL")?;
                server = Some(url.clone());
                i += 1;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    let target = match (solo, room) {
        (true, Some(_)) => return Err("--solo and --room cannot be combined".to_string()),
        (_, Some(code)) => Target::Room { code, creator },
        (_, None) => Target::Solo,
    };

    Ok(Options { target, server })
}

enum Flow {
    Continue,
    Quit,
}

/// Run the game in headless mode.
pub async fn run(options: Options) -> Result<(), SessionError> {
    let mut client_config = ClientConfig::from_env()?;
    if let Some(url) = options.server {
        client_config.server_url = url;
    }
    let client = Arc::new(RoomClient::new(client_config)?);

    let config = match options.target {
        Target::Solo => SessionConfig::solo(),
        Target::Room { code, creator } => SessionConfig::room(code, creator),
    };
    let mut session = Session::new(client, config);

    print_banner(&session);
    if session.mode() == Mode::Multi {
        session.start_polling()?;
        tracing::info!(code = %session.room().code, "joined room, polling started");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut choices: Vec<String> = Vec::new();
    let mut resolving: Option<ResolveTask> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read input");
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Some(command) = line.strip_prefix('#') {
                    match handle_command(&mut session, command, &mut resolving, &mut choices).await {
                        Flow::Quit => break,
                        Flow::Continue => continue,
                    }
                }

                let action = pick_choice(line, &choices);
                send(&mut session, &action, &mut choices).await;
            }
            Some(event) = session.next_event() => {
                match session.apply_poll(event) {
                    SyncOutcome::Updated { new_entries, restarted } => {
                        if restarted {
                            println!("[RESTART] The room's story started over.");
                        }
                        for entry in &new_entries {
                            print_entry(entry);
                            if let Some(narration) = &entry.narration {
                                choices = narration.choices.clone();
                            }
                        }
                    }
                    SyncOutcome::Terminated => {
                        tracing::info!("room closed, leaving");
                        println!("[GONE] The room no longer exists.");
                        break;
                    }
                    SyncOutcome::Failed(message) => {
                        tracing::debug!(error = %message, "poll failed");
                    }
                    SyncOutcome::Ignored => {}
                }
            }
            Some(result) = join_resolve(&mut resolving) => {
                finish_resolve(&mut session, result).await;
            }
        }
        io::stdout().flush().ok();
    }

    session.stop_polling();
    Ok(())
}

async fn send(session: &mut Session, action: &str, choices: &mut Vec<String>) {
    match session.mode() {
        Mode::Solo => {
            print!("[PROCESSING]");
            io::stdout().flush().ok();
            let result = session.send_action(action).await;
            print!("\r            \r");

            match result {
                Ok(outcome) => {
                    print_turn(&outcome);
                    *choices = outcome.choices().to_vec();
                    if outcome.floor_advanced {
                        println!("[FLOOR] You found the stairs! Floor {}.", session.state().floor());
                    }
                }
                Err(e) => report("action failed", &e),
            }
        }
        Mode::Multi => match session.submit_action(action).await {
            Ok(annotated) => println!("[QUEUED] {}", annotated.text),
            Err(e) => report("action not queued", &e),
        },
    }
}

async fn handle_command(
    session: &mut Session,
    command: &str,
    resolving: &mut Option<ResolveTask>,
    choices: &mut Vec<String>,
) -> Flow {
    let parts: Vec<&str> = command.split_whitespace().collect();
    match parts.first().copied() {
        Some("quit") | Some("exit") => {
            println!("Goodbye!");
            return Flow::Quit;
        }
        Some("leave") => {
            match session.leave().await {
                Ok(()) => {
                    tracing::info!(code = %session.room().code, "left room");
                    println!("[LEFT] You left the room.");
                }
                Err(e) => report("leave failed", &e),
            }
            return Flow::Quit;
        }
        Some("start") => match session.start_campaign().await {
            Ok(outcome) => {
                print_turn(&outcome);
                *choices = outcome.choices().to_vec();
                if session.mode() == Mode::Multi {
                    tracing::info!(code = %session.room().code, "campaign started");
                    println!("[STARTED] The opening scene will appear shortly.");
                }
            }
            Err(e) => report("campaign start failed", &e),
        },
        Some("resolve") => match session.begin_resolve() {
            Ok(request) => {
                let api = session.api();
                *resolving = Some(tokio::spawn(
                    async move { api.resolve_turn(&request).await },
                ));
                tracing::info!(actions = session.queue().len(), "resolution started");
                println!("[RESOLVING] {} queued actions", session.queue().len());
            }
            Err(e) => report("resolution refused", &e),
        },
        Some("reset") => match session.reset().await {
            Ok(()) => {
                choices.clear();
                println!("[RESET] The party is back at the entrance.");
            }
            Err(e) => report("reset failed", &e),
        },
        Some("status") => print_status(session),
        Some("help") => print_commands(session.mode()),
        _ => println!("[ERROR] Unknown command. Type #help for help."),
    }
    Flow::Continue
}

async fn join_resolve(task: &mut Option<ResolveTask>) -> Option<Result<Generation, roomapi::Error>> {
    let handle = task.as_mut()?;
    let joined = handle.await;
    *task = None;
    Some(joined.unwrap_or_else(|e| Err(roomapi::Error::Network(e.to_string()))))
}

async fn finish_resolve(session: &mut Session, result: Result<Generation, roomapi::Error>) {
    match session.complete_resolve(result) {
        Ok(outcome) => {
            tracing::info!(actions = outcome.actions_resolved, floor = outcome.floor, "turn resolved");
            println!("[RESOLVED] {} actions", outcome.actions_resolved);
            if outcome.floor_advanced {
                println!("[FLOOR] The party found the stairs! Floor {}.", outcome.floor);
                if let Err(e) = session.describe_new_floor().await {
                    tracing::warn!(error = %e, floor = outcome.floor, "new floor description failed");
                    println!("[ERROR] {e} (the new floor will be described before the next action)");
                }
            }
        }
        Err(SessionError::SessionGone) => {
            tracing::info!("room closed during resolution");
            println!("[GONE] The room no longer exists.");
        }
        Err(e) => {
            tracing::warn!(error = %e, "resolution failed");
            println!("[ERROR] {e} (queued actions kept, #resolve to retry)");
        }
    }
}

/// Log a refused or failed command and tell the player.
fn report(what: &str, error: &SessionError) {
    tracing::warn!(error = %error, "{what}");
    println!("[ERROR] {error}");
}

/// A bare number selects one of the narrator's numbered options.
fn pick_choice(line: &str, choices: &[String]) -> String {
    match line.parse::<usize>() {
        Ok(n) if n >= 1 && n <= choices.len() => choices[n - 1].clone(),
        _ => line.to_string(),
    }
}

fn print_banner(session: &Session) {
    println!("=== Delve ===");
    match session.mode() {
        Mode::Solo => println!("Solo adventure"),
        Mode::Multi => println!(
            "Room {}{}",
            session.room().code,
            if session.room().is_creator { " (creator)" } else { "" }
        ),
    }
    let state = session.state();
    println!("HP: {}/{}  Floor: {}", state.hp(), state.hp_max(), state.floor());
    println!();
    print_commands(session.mode());
    println!();
    println!("Enter your actions (one per line):");
    println!();
}

fn print_commands(mode: Mode) {
    println!("Commands:");
    println!("  #start    - Start a new campaign");
    if mode == Mode::Multi {
        println!("  #resolve  - Resolve the queued actions (creator)");
        println!("  #leave    - Leave the room");
    }
    println!("  #reset    - Reset the party");
    println!("  #status   - Show party status");
    println!("  #quit     - Exit");
    println!("  #help     - Show this help");
    println!("  <number>  - Pick one of the narrator's options");
}

fn print_status(session: &Session) {
    let state = session.state();
    println!("[STATUS]");
    println!("  HP: {}/{}", state.hp(), state.hp_max());
    println!(
        "  Floor: {} ({}/{} actions)",
        state.floor(),
        state.actions_this_floor(),
        session.config().floor_threshold
    );
    let items: Vec<&str> = state.inventory().iter().collect();
    if items.is_empty() {
        println!("  Inventory: (empty)");
    } else {
        println!("  Inventory: {}", items.join(", "));
    }
    if session.mode() == Mode::Multi {
        println!("  Room: {}", session.room().code);
        println!("  Queued actions: {}", session.queue().len());
        for action in session.queue().actions() {
            println!("    {action}");
        }
    }
    if session.is_defeated() {
        println!("  DEFEATED");
    }
}

fn print_turn(outcome: &TurnOutcome) {
    if outcome.narrations.is_empty() && !outcome.defeated {
        return;
    }
    println!("[NARRATOR]");
    for para in outcome.to_plain().split("\n\n") {
        println!("{para}");
    }
    println!();
}

fn print_entry(entry: &SyncedEntry) {
    match entry.entry.role {
        Role::Narrator => {
            println!("[NARRATOR]");
            println!("{}", entry.to_plain());
            println!();
        }
        Role::Player => {
            match split_speaker(&entry.entry.content) {
                Some((speaker, action)) => println!("[{speaker}] {action}"),
                None => println!("[PARTY] {}", entry.entry.content),
            }
        }
    }
}
