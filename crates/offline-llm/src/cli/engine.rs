//! Drives a [`Session`] from async code: loads and generations run on the
//! blocking pool while fragments stream to stdout.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use llama_session::{Backend, ChannelSink, FinishReason, Generation, LoadOptions, SamplingConfig, Session};
use tracing::{debug, info, warn};

/// Error for binaries built without an inference backend.
#[cfg(not(feature = "llama-cpp"))]
pub fn missing_backend() -> anyhow::Error {
    anyhow::anyhow!("offline-llm was built without an inference backend; rebuild with --features llama-cpp")
}

/// Load `model` into a fresh session.
#[cfg_attr(not(feature = "llama-cpp"), allow(dead_code))]
pub async fn open<B>(backend: B, model: PathBuf, options: LoadOptions) -> anyhow::Result<Arc<Session<B>>>
where
    B: Backend + 'static,
{
    info!(model = %model.display(), ctx = options.context_length, "Loading model");
    let session = Arc::new(Session::new(backend));
    let loader = Arc::clone(&session);
    tokio::task::spawn_blocking(move || loader.load(&model, &options)).await??;
    Ok(session)
}

/// Generate a reply, printing fragments as they arrive.
///
/// Ctrl-C stops the generation rather than the process; the partial reply
/// is returned.
#[cfg_attr(not(feature = "llama-cpp"), allow(dead_code))]
pub async fn stream<B>(
    session: &Arc<Session<B>>,
    prompt: String,
    config: SamplingConfig,
) -> anyhow::Result<Generation>
where
    B: Backend + 'static,
{
    let (mut sink, mut rx) = ChannelSink::channel(64);
    let worker = {
        let session = Arc::clone(session);
        tokio::task::spawn_blocking(move || session.generate(&prompt, &config, &mut sink))
    };

    let stop = session.stop_handle();
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            fragment = rx.recv() => match fragment {
                Some(text) => {
                    print!("{text}");
                    stdout.flush()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted, stopping generation");
                stop.stop();
            }
        }
    }

    Ok(worker.await??)
}

/// Print the finish reason and token counts to stderr.
#[cfg_attr(not(feature = "llama-cpp"), allow(dead_code))]
pub fn report(generation: &Generation) {
    if let FinishReason::DecodeFailed(reason) = &generation.finish_reason {
        warn!(%reason, "Reply cut short by a decode failure");
    }
    eprintln!(
        "  [{} | prompt: {} tok, gen: {} tok]",
        generation.finish_reason, generation.prompt_tokens, generation.completion_tokens
    );
}
