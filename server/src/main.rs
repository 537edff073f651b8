use clap::Parser;
use log::{error, info, warn};
use rand::Rng;
use server::{
    ConnectionRef, HubConnection, SessionConfig, SessionHandle, SessionRegistry, StaticWordStore,
};
use shared::{ClientMessage, FeedbackKind, ServerMessage, TimerKind, Word};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

/// Main-method of the application.
/// Parses command-line arguments, starts one session and lets a few bots play it.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// JSON file with session settings, missing keys use defaults
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Number of simulated players
        #[clap(short, long, default_value = "3")]
        players: usize,
        /// Rounds to play, overrides the config file
        #[clap(short, long)]
        rounds: Option<u32>,
        /// Drawing time per turn in seconds, overrides the config file
        #[clap(short, long)]
        turn_seconds: Option<u32>,
        /// Word selection time in seconds
        #[clap(short, long)]
        word_seconds: Option<u32>,
        /// Seat limit of the session
        #[clap(short, long)]
        max_players: Option<usize>,
        /// How long a dropped player may take to come back, in seconds
        #[clap(short, long)]
        grace_seconds: Option<u64>,
    }

    // Parse command line arguments
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => serde_json::from_str::<SessionConfig>(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };
    if let Some(rounds) = args.rounds {
        config.round_limit = rounds;
    }
    if let Some(seconds) = args.turn_seconds {
        config.turn_duration = seconds;
    }
    if let Some(seconds) = args.word_seconds {
        config.word_selection_duration = seconds;
    }
    if let Some(max_players) = args.max_players {
        config.max_players = max_players;
    }
    if let Some(seconds) = args.grace_seconds {
        config.grace_period_ms = seconds * 1_000;
    }
    config.validate()?;

    let words = Arc::new(StaticWordStore::builtin());
    let registry = SessionRegistry::new(words.clone());
    let (handle, hub) = registry.create("local", config)?;
    info!("Session {} ready, adding {} bot(s)", handle.id(), args.players);

    let word_list: Arc<Vec<Word>> = Arc::new(words.words().to_vec());

    let mut bots = Vec::new();
    for n in 0..args.players {
        let player_id = format!("bot-{}", n + 1);
        let (connection, rx) = hub.attach(player_id.clone());
        match handle
            .join(player_id.clone(), format!("Bot {}", n + 1), ConnectionRef::new(&connection))
            .await
        {
            Ok(player) => info!("{} joined (host: {})", player.username, player.is_host),
            Err(e) => {
                warn!("{} could not join: {}", player_id, e);
                continue;
            }
        }
        bots.push(tokio::spawn(run_bot(
            handle.clone(),
            player_id,
            rx,
            Arc::clone(&word_list),
            connection,
        )));
    }

    if let Err(e) = handle
        .send("bot-1", ClientMessage::start_timer(TimerKind::GameStart))
        .await
    {
        error!("Could not start the game: {}", e);
    }

    // Handle shutdown gracefully
    tokio::select! {
        _ = wait_for_end(&handle) => {
            info!("Session finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            registry.shutdown_all();
        }
    }

    for bot in bots {
        if let Err(e) = bot.await {
            error!("Bot task panicked: {}", e);
        }
    }

    let snapshot = handle.snapshot().await;
    let mut players = snapshot.players;
    players.sort_by(|a, b| b.score.cmp(&a.score));
    for player in players {
        println!("{:>12} {:>5}", player.username, player.score);
    }
    Ok(())
}

async fn wait_for_end(handle: &SessionHandle) {
    while !handle.is_closed() {
        sleep(Duration::from_millis(250)).await;
    }
}

/// Picks the first word offered and, while someone else draws, guesses
/// words of the right length it has not tried yet
async fn run_bot(
    handle: SessionHandle,
    player_id: String,
    mut rx: mpsc::Receiver<Vec<u8>>,
    words: Arc<Vec<Word>>,
    _connection: Arc<HubConnection>,
) {
    let mut options: Vec<String> = Vec::new();
    let mut guess_timer = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            bytes = rx.recv() => {
                let Some(bytes) = bytes else {
                    break;
                };
                let message = match ServerMessage::decode(&bytes) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("{}: undecodable message: {}", player_id, e);
                        continue;
                    }
                };
                match message {
                    ServerMessage::OpenSelectWordModal { selectable_words, .. } => {
                        if let Some(word) = selectable_words.first() {
                            let _ = handle
                                .send(player_id.clone(), ClientMessage::select_word(word))
                                .await;
                        }
                    }
                    ServerMessage::WordSelected { word: None, masked, .. } => {
                        let len = masked.chars().count();
                        options = words
                            .iter()
                            .filter(|w| w.len() == len)
                            .map(|w| w.word.clone())
                            .collect();
                    }
                    ServerMessage::TurnEnded { .. } => options.clear(),
                    ServerMessage::PlayerGuess(feedback) if feedback.player_id == player_id => {
                        if feedback.kind == FeedbackKind::Correct {
                            options.clear();
                        }
                    }
                    ServerMessage::GameEnded { message } => {
                        info!("{}: {}", player_id, message);
                        break;
                    }
                    _ => {}
                }
            }
            _ = guess_timer.tick(), if !options.is_empty() => {
                let pick = rand::thread_rng().gen_range(0..options.len());
                let guess = options.swap_remove(pick);
                let _ = handle.send(player_id.clone(), ClientMessage::guess(guess)).await;
            }
        }
    }
}
