use anyhow::Context as _;
use llama_session::Backend;

use super::engine;
use crate::cli::GenerateArgs;
use crate::config::AppConfig;

pub async fn execute(args: GenerateArgs, cfg: AppConfig) -> anyhow::Result<()> {
    #[cfg(feature = "llama-cpp")]
    {
        once(llama_session::LlamaBackend::new(), args, cfg).await
    }
    #[cfg(not(feature = "llama-cpp"))]
    {
        let _ = (args, cfg);
        Err(engine::missing_backend())
    }
}

#[cfg_attr(not(feature = "llama-cpp"), allow(dead_code))]
async fn once<B: Backend + 'static>(backend: B, args: GenerateArgs, cfg: AppConfig) -> anyhow::Result<()> {
    let model = args
        .model
        .model_path(&cfg)
        .context("No model given: pass --model or run `offline-llm config set model <path>`")?;

    let prompt = if args.raw {
        args.prompt.clone()
    } else {
        let system = args.system.as_deref().unwrap_or(&cfg.system_prompt);
        args.model
            .chat_format(&cfg, &model)
            .render(system, &[], &args.prompt)
    };

    let session = engine::open(backend, model, args.model.load_options(&cfg)).await?;
    let generation = engine::stream(&session, prompt, args.model.sampling(&cfg)).await?;
    println!();

    if args.stats {
        engine::report(&generation);
    }
    session.unload();
    Ok(())
}
