use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voicebar::connection::ConnectionProvider;
use voicebar::llm::AzureChatClient;
use voicebar::speech::{
    AsciiSentenceLocator, AudioCapture, AzureSynthesizer, AzureTranscriber, CAPTURE_SAMPLE_RATE,
    SentenceBoundaryLocator, Transcriber, UnicodeSentenceLocator, samples_to_wav,
};
use voicebar::{
    Config, EnvConnectionProvider, Error, Orchestrator, PlaybackWorker, SpeakerFactory,
    SynthesisQueue, TurnEvent,
};

/// Voicebar - speak a language model's reply while it is still being generated
#[derive(Parser)]
#[command(name = "voicebar", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "VOICEBAR_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Split sentences on ASCII punctuation only
    #[arg(long)]
    ascii_sentences: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat interactively; every line is a turn, Ctrl-C cancels the running turn
    Chat,
    /// Push-to-talk: Enter starts and stops recording, the transcript becomes a turn
    Listen,
    /// Speak text without asking the model
    Say {
        /// Text to speak
        text: String,
    },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voicebar=info",
        1 => "info,voicebar=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(Some(path))?,
        None => Config::load()?,
    };
    tracing::debug!(?config, "loaded configuration");

    if matches!(cli.command, Command::Config) {
        return show_config(&config);
    }

    let locator: Arc<dyn SentenceBoundaryLocator> = if cli.ascii_sentences {
        Arc::new(AsciiSentenceLocator)
    } else {
        Arc::new(UnicodeSentenceLocator)
    };

    let connections: Arc<dyn ConnectionProvider> = Arc::new(EnvConnectionProvider);
    let transcriber = AzureTranscriber::new(Arc::clone(&connections), config.speech.language.clone());
    let chat = Arc::new(AzureChatClient::new(
        Arc::clone(&connections),
        config.llm.clone(),
    ));
    let synthesizer = Arc::new(AzureSynthesizer::new(
        config.speech.language.clone(),
        config.speech.output_format.clone(),
    ));
    let queue = SynthesisQueue::from_config(synthesizer, connections, &config.speech);

    let factory = SpeakerFactory::new(Duration::from_millis(config.playback.clock_interval_ms));
    let (playback, worker) = PlaybackWorker::spawn(factory, config.playback.rate);

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut orchestrator =
        Orchestrator::new(chat, queue, playback.clone(), locator).with_events(events_tx);
    let printer = tokio::spawn(print_events(events_rx));

    let result = match cli.command {
        Command::Chat => chat_loop(&mut orchestrator).await,
        Command::Listen => listen_loop(&mut orchestrator, &transcriber).await,
        Command::Say { text } => {
            orchestrator.speak(&text).await?;
            playback.wait_drained(Duration::from_millis(100)).await;
            Ok(())
        }
        Command::Config => Ok(()),
    };

    playback.stop();
    drop(orchestrator);
    drop(playback);
    let _ = worker.await;
    let _ = printer.await;

    result
}

/// Read turns from stdin until EOF or `/quit`
async fn chat_loop(orchestrator: &mut Orchestrator) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    prompt();
    while let Some(line) = lines.next().await {
        let line = line?;
        let line = line.trim();

        match line {
            "" => {}
            "/quit" => break,
            "/clear" => {
                orchestrator.interrupt();
                orchestrator.clear();
                println!("(conversation cleared)");
            }
            "/stop" => orchestrator.interrupt(),
            text => interactive_turn(orchestrator, text).await?,
        }
        prompt();
    }

    Ok(())
}

/// Record on Enter, transcribe on the next Enter, then run the transcript as a turn
async fn listen_loop(
    orchestrator: &mut Orchestrator,
    transcriber: &dyn Transcriber,
) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    loop {
        println!("(press Enter to talk, /quit to leave)");
        let Some(line) = lines.next().await else {
            break;
        };
        if line?.trim() == "/quit" {
            break;
        }

        // talking over the assistant cuts it off
        orchestrator.interrupt();
        let capture = AudioCapture::start()?;
        println!("(listening, press Enter to stop)");
        let stopped = lines.next().await;
        let samples = capture.finish()?;
        if stopped.is_none() {
            break;
        }

        let wav = samples_to_wav(&samples, CAPTURE_SAMPLE_RATE)?;
        match transcriber.transcribe(wav).await {
            Ok(Some(text)) => {
                println!("you: {text}");
                interactive_turn(orchestrator, &text).await?;
            }
            Ok(None) => println!("(nothing recognized)"),
            Err(e) if e.is_config() => return Err(e.into()),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}

/// Run one turn, cancelling it on Ctrl-C
///
/// Only configuration errors are returned; anything else is reported and
/// the session goes on.
async fn interactive_turn(orchestrator: &mut Orchestrator, text: &str) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let result = {
        let turn = orchestrator.submit(text, cancel.clone());
        tokio::pin!(turn);
        tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        }
    };

    match result {
        Ok(summary) => tracing::debug!(
            turn = %summary.id,
            sentences = summary.sentences,
            spoken = summary.spoken,
            finish_reason = ?summary.finish_reason,
            "turn finished"
        ),
        Err(Error::Cancelled) => println!("(cancelled)"),
        Err(e) if e.is_config() => return Err(e.into()),
        Err(e) => eprintln!("error: {e}"),
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn print_events(mut events: tokio::sync::mpsc::UnboundedReceiver<TurnEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TurnEvent::SentenceGenerated { text, .. } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            TurnEvent::ToolInvoked {
                name, parameter, ..
            } => println!("\n[tool] {name}({parameter})"),
            TurnEvent::SpeakingStarted { text, .. } => {
                tracing::debug!(sentence = %text.trim(), "speaking");
            }
            TurnEvent::ResponseCompleted { .. } => println!(),
        }
    }
}

fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(config)?);

    match EnvConnectionProvider.connection() {
        Some(connection) => println!("# connection: {connection:?}"),
        None => println!("# connection: not configured"),
    }
    Ok(())
}
