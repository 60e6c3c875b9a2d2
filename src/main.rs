use anyhow::{Context, Result};
use buddy_agents::conversation::ConversationStorage;
use buddy_agents::{
    Agent, AutoVoiceClient, ChannelRecognizer, Config, ConversationFilter, ConversationStore,
    FilePlayer, HttpSynthesizer, InteractionGate, JsonFileStorage, Role, SessionConfig,
    SessionEvent, SessionOrchestrator, SpeechInput, SpeechOutput, TranscriptFeed,
    TransportClient, VoiceSettings, WsConnector,
};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "buddy-agents", about = "Voice-enabled chat with the BuddyAgents companions")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/buddy-agents")]
    config: String,

    /// Agent to focus on start (mitra, guru, parikshak)
    #[arg(long)]
    agent: Option<Agent>,

    /// Speak replies automatically
    #[arg(long)]
    auto_voice: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("BuddyAgents v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Chat backend: {}", cfg.transport.url);

    // Conversation history
    let storage: Box<dyn ConversationStorage> = Box::new(
        JsonFileStorage::new(&cfg.storage.data_dir).context("Failed to open conversation storage")?,
    );
    let mut store = ConversationStore::open(storage, cfg.session.default_agent)
        .context("Failed to load conversations")?;
    if let Some(agent) = args.agent {
        store.switch_agent(agent)?;
    }

    // Transport
    let transport = Arc::new(TransportClient::new(
        cfg.transport.url.clone(),
        Arc::new(WsConnector),
        cfg.transport.reconnect.policy(),
        cfg.transport.event_capacity,
    ));

    // Voice
    let synthesizer = Arc::new(HttpSynthesizer::new(&cfg.voice.tts_url, cfg.voice_timeout())?);
    let player = Arc::new(FilePlayer::new(&cfg.playback.output_dir, cfg.playback.pace)?);
    let settings = VoiceSettings {
        agent: store.focused_agent(),
        language: cfg.voice.language.clone(),
        quality: cfg.voice.quality.clone(),
        format: cfg.voice.format.clone(),
    };
    let speech_out = Arc::new(SpeechOutput::new(
        synthesizer,
        player,
        Arc::new(InteractionGate::new()),
        settings,
    ));
    let (recognizer, feed) = ChannelRecognizer::new(32);
    let speech_in = Arc::new(SpeechInput::new(Box::new(recognizer), cfg.voice.language.clone()));

    let mut session_config = SessionConfig::from(&cfg);
    session_config.auto_voice |= args.auto_voice;

    let auto_voice = AutoVoiceClient::new(&cfg.voice.settings_url, cfg.voice_timeout())?;
    if !args.auto_voice {
        match auto_voice.status().await {
            Ok(enabled) => session_config.auto_voice = enabled,
            Err(e) => warn!("Using local auto-voice setting: {}", e),
        }
    }

    let session = SessionOrchestrator::new(
        session_config,
        store,
        transport.clone(),
        speech_in,
        speech_out,
    );
    session.start(transport.subscribe()).await;
    transport.connect().await;

    let printer = tokio::spawn(print_events(session.subscribe()));

    println!("Chatting with {}. Type /help for commands.", session.focused_agent().await.display_name());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match run_command(&session, &transport, &auto_voice, &feed, line).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => println!("! {}", e),
        }
    }

    session.dispose().await;
    transport.disconnect().await;
    printer.abort();

    let stats = session.stats().await;
    info!(
        "Session ended after {:.1}s: {} sent, {} received, {} spoken, {} errors",
        stats.duration_secs,
        stats.messages_sent,
        stats.replies_received,
        stats.replies_spoken,
        stats.errors
    );

    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

async fn run_command(
    session: &Arc<SessionOrchestrator>,
    transport: &TransportClient,
    auto_voice: &AutoVoiceClient,
    feed: &TranscriptFeed,
    line: &str,
) -> Result<Flow> {
    let Some(command) = line.strip_prefix('/') else {
        session.begin_typing();
        session.submit_text(line).await?;
        return Ok(Flow::Continue);
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return Ok(Flow::Quit),
        "help" => print_help(),
        "new" => {
            let id = session.new_chat().await?;
            println!("New conversation {}", id);
        }
        "agent" => {
            let agent: Agent = arg.parse()?;
            session.switch_agent(agent).await?;
            println!("Now chatting with {} ({})", agent.display_name(), agent.role());
            print_history(session).await?;
        }
        "list" => {
            let filter = if arg.is_empty() {
                ConversationFilter::default()
            } else {
                ConversationFilter::query(arg)
            };
            for summary in session.list_conversations(&filter).await {
                println!(
                    "{}  [{}] {} ({} messages, {})",
                    summary.id,
                    summary.agent,
                    summary.title,
                    summary.message_count,
                    summary.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        "open" => {
            let agent = session.select_conversation(arg).await?;
            println!("Opened conversation with {}", agent.display_name());
            print_history(session).await?;
        }
        "rename" => {
            let id = session.current_conversation_id().await?;
            session.rename_conversation(&id, arg).await?;
        }
        "delete" => session.delete_conversation(arg).await?,
        "play" => {
            if !session.play_last_reply().await? {
                println!("Nothing to play");
            }
        }
        "stop" => session.stop_speaking().await,
        "listen" => {
            if session.start_voice_input().await {
                println!("Listening. Use /say TEXT to deliver a transcript.");
            }
        }
        "unlisten" => session.stop_voice_input().await,
        "say" => {
            if !feed.finalize(arg, 1.0).await {
                println!("Not listening; use /listen first");
            }
        }
        "autovoice" => {
            let enabled = match arg {
                "on" => true,
                "off" => false,
                _ => anyhow::bail!("usage: /autovoice on|off"),
            };
            session.set_auto_voice(enabled);
            if let Err(e) = auto_voice.set_enabled(enabled).await {
                warn!("Auto-voice preference not saved on server: {}", e);
            }
        }
        "status" => {
            let connection = transport.state();
            let voice = session.voice_session().await;
            println!(
                "agent: {}  state: {:?}  connected: {} (retries {})",
                session.focused_agent().await,
                session.state(),
                connection.connected,
                connection.retry_count
            );
            println!(
                "listening: {}  speaking: {}  audio ready: {}  autoplay: {}",
                voice.listening, voice.speaking, voice.audio_ready, voice.auto_play_enabled
            );
        }
        other => anyhow::bail!("unknown command /{} (try /help)", other),
    }

    Ok(Flow::Continue)
}

async fn print_history(session: &SessionOrchestrator) -> Result<()> {
    let id = session.current_conversation_id().await?;
    if let Some(title) = session.conversation_title(&id).await {
        println!("== {} ==", title);
    }
    for message in session.messages(&id).await? {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "agent",
            Role::System => "system",
        };
        println!("{}: {}", who, message.content);
    }
    Ok(())
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(SessionEvent::ReplyCompleted { content, .. }) => println!("agent: {}", content),
            Ok(SessionEvent::SystemMessage { content, .. }) => println!("system: {}", content),
            Ok(SessionEvent::Offline) => println!("(offline, reconnecting)"),
            Ok(SessionEvent::Online) => println!("(connected)"),
            Ok(SessionEvent::VoiceUnavailable(reason)) => println!("(voice unavailable: {})", reason),
            Ok(SessionEvent::StorageUnavailable(reason)) => {
                println!("(history not saved: {})", reason)
            }
            Ok(SessionEvent::Status(text)) => println!("({})", text),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

fn print_help() {
    println!("Type a message to send it. Commands:");
    println!("  /new               start a new conversation");
    println!("  /agent NAME        switch to mitra, guru or parikshak");
    println!("  /list [QUERY]      list conversations");
    println!("  /open ID           open a conversation");
    println!("  /rename TITLE      rename the current conversation");
    println!("  /delete ID         delete a conversation");
    println!("  /play  /stop       play or stop the last reply");
    println!("  /listen /unlisten  start or stop voice input");
    println!("  /say TEXT          deliver a voice transcript");
    println!("  /autovoice on|off  speak replies automatically");
    println!("  /status            show session status");
    println!("  /quit              exit");
}
