//! localchat: interactive chat with a local GGUF model
//!
//! Usage: `localchat [MODEL.gguf]`. Without an argument the model stored in
//! the settings file is used.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use localchat::inference::{load_model, model_info, EngineRuntime};
use localchat::storage::settings::{get_settings_path, load_settings, save_settings};
use localchat::types::config::SessionConfig;
use localchat::{ConversationSession, SessionError, StopReason};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("localchat=info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut settings = load_settings();
    if let Some(path) = std::env::args().nth(1) {
        settings.model_path = Some(PathBuf::from(path));
        if let Err(e) = save_settings(&settings) {
            tracing::warn!("Failed to remember model path: {}", e);
        }
    }

    let Some(config) = settings.to_session_config() else {
        eprintln!("No model configured. Usage: localchat <model.gguf>");
        if let Ok(path) = get_settings_path() {
            eprintln!("(or set \"model_path\" in {})", path.display());
        }
        return ExitCode::FAILURE;
    };

    let runtime = match EngineRuntime::acquire() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match run(&runtime, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    };

    runtime.release();
    code
}

/// Load the model, open a session and run the read-eval-print loop.
fn run(runtime: &EngineRuntime, config: &SessionConfig) -> Result<(), SessionError> {
    let model = load_model(runtime, &config.model_path, config.gpu_layers)
        .map_err(|e| SessionError::Initialization(e.to_string()))?;
    let info = model_info(&model, &config.model_path);

    let mut session = ConversationSession::open(runtime, &model, config)?;

    println!("==============================================");
    println!("  {} ready ({} ctx, {})", info.name, config.context_size, config.prompt_format);
    println!("  /reset clears the conversation, /stats shows context usage, /exit quits");
    println!("==============================================\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        let _ = stdout.flush();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::error!("Failed to read input: {}", e);
                break;
            }
            None => break,
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/exit" | "/quit" => {
                println!("Goodbye!");
                break;
            }
            "/reset" => {
                session.reset();
                println!("Conversation cleared.\n");
                continue;
            }
            "/stats" => {
                println!(
                    "Context: {}/{} positions used\n",
                    session.cursor(),
                    session.capacity()
                );
                continue;
            }
            _ => {}
        }

        let result = session.ask_streaming(input, config.max_new_tokens, |piece| {
            print!("{}", piece);
            let _ = stdout.flush();
        });
        println!("\n");

        match result {
            Ok(stats) => {
                if stats.stop == StopReason::TokenLimit {
                    tracing::info!("Reply cut at {} tokens", stats.generated_tokens);
                }
            }
            Err(SessionError::Prompt(e)) => {
                eprintln!("Could not use that message: {}\n", e);
            }
            Err(e @ SessionError::Decode(_)) => {
                tracing::error!("{}; starting a fresh conversation", e);
                session.reset();
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
