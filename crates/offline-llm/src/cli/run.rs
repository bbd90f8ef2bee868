use std::io::{self, Write};

use anyhow::Context as _;
use llama_session::{Backend, ChatMessage, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::engine;
use crate::cli::RunArgs;
use crate::config::AppConfig;

pub async fn execute(args: RunArgs, cfg: AppConfig) -> anyhow::Result<()> {
    #[cfg(feature = "llama-cpp")]
    {
        chat(llama_session::LlamaBackend::new(), args, cfg).await
    }
    #[cfg(not(feature = "llama-cpp"))]
    {
        let _ = (args, cfg);
        Err(engine::missing_backend())
    }
}

#[cfg_attr(not(feature = "llama-cpp"), allow(dead_code))]
async fn chat<B: Backend + 'static>(backend: B, args: RunArgs, cfg: AppConfig) -> anyhow::Result<()> {
    let model = args
        .model
        .model_path(&cfg)
        .context("No model given: pass --model or run `offline-llm config set model <path>`")?;
    let format = args.model.chat_format(&cfg, &model);
    let sampling = args.model.sampling(&cfg);
    let system = args.system.clone().unwrap_or_else(|| cfg.system_prompt.clone());

    let session = engine::open(backend, model, args.model.load_options(&cfg)).await?;
    info!(?format, "Chat format");

    println!("Model loaded. Type your message (/reset clears history, Ctrl-C stops a reply, Ctrl-D quits).\n");

    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break; // EOF
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/reset" {
            history.clear();
            println!("(history cleared)\n");
            continue;
        }

        // The session keeps no state between requests: resend the transcript.
        let prompt = format.render(&system, recent(&history, cfg.history_messages), line);
        match engine::stream(&session, prompt, sampling.clone()).await {
            Ok(generation) => {
                println!();
                engine::report(&generation);
                history.push(ChatMessage::user(line));
                history.push(ChatMessage::assistant(generation.text));
            }
            Err(e) => eprintln!("\nError: {e}"),
        }
        println!();
    }

    session.unload();
    Ok(())
}

/// At most the last `max` messages, starting on a user turn.
fn recent(history: &[ChatMessage], max: usize) -> &[ChatMessage] {
    let mut start = history.len().saturating_sub(max);
    while start < history.len() && history[start].role != Role::User {
        start += 1;
    }
    &history[start..]
}
