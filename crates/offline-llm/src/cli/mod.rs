pub mod config_cmd;
pub mod engine;
pub mod generate;
pub mod models;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use llama_session::{ChatFormat, LoadOptions, SamplingConfig};

use crate::config::{AppConfig, parse_chat_format};

#[derive(Parser)]
#[command(
    name = "offline-llm",
    version,
    about = "Offline chat over a local GGUF model"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a model and start an interactive chat.
    Run(RunArgs),

    /// Generate a single completion and exit.
    Generate(GenerateArgs),

    /// List or delete local GGUF models.
    Models(ModelsArgs),

    /// View / edit configuration.
    Config(ConfigArgs),
}

//  Shared model / sampling arguments

/// Command-line overrides on top of the saved [`AppConfig`].
#[derive(Debug, clap::Args, Clone, Default)]
pub struct ModelArgs {
    /// Path (or file:// URI) of a GGUF model file.
    #[arg(short, long, env = "OFFLINE_LLM_MODEL")]
    pub model: Option<String>,

    /// Context length in tokens.
    #[arg(long, env = "OFFLINE_LLM_CTX_SIZE")]
    pub ctx_size: Option<u32>,

    /// Maximum tokens per decode call during prompt processing.
    #[arg(long)]
    pub batch: Option<u32>,

    #[arg(long, env = "OFFLINE_LLM_THREADS")]
    pub threads: Option<i32>,

    /// Sampling temperature (0 = greedy).
    #[arg(long)]
    pub temp: Option<f32>,

    #[arg(long)]
    pub top_k: Option<i32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    /// Maximum new tokens per reply.
    #[arg(short = 'n', long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub seed: Option<u32>,

    /// Prompt format; detected from the model file name when omitted.
    #[arg(long, value_parser = parse_chat_format)]
    pub format: Option<ChatFormat>,
}

impl ModelArgs {
    /// Model path from the flag or the config, with any `file://` removed.
    pub fn model_path(&self, cfg: &AppConfig) -> Option<PathBuf> {
        self.model
            .as_deref()
            .map(|m| PathBuf::from(m.strip_prefix("file://").unwrap_or(m)))
            .or_else(|| cfg.model.clone())
    }

    pub fn load_options(&self, cfg: &AppConfig) -> LoadOptions {
        let base = &cfg.load;
        LoadOptions {
            context_length: self.ctx_size.unwrap_or(base.context_length),
            batch_width: self.batch.unwrap_or(base.batch_width),
            thread_count: self.threads.unwrap_or(base.thread_count),
            // Chat templates carry special-token text.
            parse_special: true,
            ..base.clone()
        }
    }

    pub fn sampling(&self, cfg: &AppConfig) -> SamplingConfig {
        let base = &cfg.sampling;
        SamplingConfig {
            temperature: self.temp.unwrap_or(base.temperature),
            top_k: self.top_k.unwrap_or(base.top_k),
            top_p: self.top_p.unwrap_or(base.top_p),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            seed: self.seed.unwrap_or(base.seed),
            ..base.clone()
        }
    }

    pub fn chat_format(&self, cfg: &AppConfig, model: &std::path::Path) -> ChatFormat {
        self.format.or(cfg.chat_format).unwrap_or_else(|| {
            ChatFormat::detect(&model.file_name().unwrap_or_default().to_string_lossy())
        })
    }
}

//  Subcommand argument structs

#[derive(Debug, clap::Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// System prompt.
    #[arg(long)]
    pub system: Option<String>,
}

#[derive(Debug, clap::Args, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// User message to answer.
    pub prompt: String,

    /// System prompt.
    #[arg(long)]
    pub system: Option<String>,

    /// Send the prompt to the model verbatim, without a chat template.
    #[arg(long)]
    pub raw: bool,

    /// Print token counts and the finish reason to stderr.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Debug, clap::Args)]
pub struct ModelsArgs {
    /// Directory to use instead of the configured models directory.
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub action: ModelsAction,
}

#[derive(Debug, Subcommand)]
pub enum ModelsAction {
    /// List GGUF files in the models directory.
    List,
    /// Delete a model file by name.
    Rm {
        /// File name inside the models directory, e.g. `phi-2.Q4_K_M.gguf`.
        name: String,
    },
}

#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Display the current configuration.
    Show,
    /// Set a configuration value (empty value clears optional settings).
    Set { key: String, value: String },
    /// Print the configuration file path.
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generate_with_overrides() {
        let cli = Cli::try_parse_from([
            "offline-llm",
            "generate",
            "--model",
            "file:///sdcard/qwen.gguf",
            "--temp",
            "0",
            "-n",
            "32",
            "--format",
            "chat_ml",
            "Why is the sky blue?",
        ])
        .unwrap();

        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        let cfg = AppConfig::default();
        assert_eq!(args.prompt, "Why is the sky blue?");
        assert_eq!(args.model.model_path(&cfg), Some(PathBuf::from("/sdcard/qwen.gguf")));
        assert_eq!(args.model.format, Some(ChatFormat::ChatMl));

        let sampling = args.model.sampling(&cfg);
        assert_eq!(sampling.temperature, 0.0);
        assert_eq!(sampling.max_tokens, 32);
        assert_eq!(sampling.top_k, 40);
    }

    #[test]
    fn config_values_fill_unset_flags() {
        let mut cfg = AppConfig::default();
        cfg.set("model", "/models/tinyllama-1.1b-chat.gguf").unwrap();
        cfg.set("context_length", "2048").unwrap();
        cfg.set("top_p", "0.5").unwrap();

        let args = ModelArgs {
            threads: Some(2),
            ..ModelArgs::default()
        };
        let model = args.model_path(&cfg).unwrap();
        let load = args.load_options(&cfg);

        assert_eq!(load.context_length, 2048);
        assert_eq!(load.thread_count, 2);
        assert!(load.parse_special);
        assert_eq!(args.sampling(&cfg).top_p, 0.5);
        assert_eq!(args.chat_format(&cfg, &model), ChatFormat::Zephyr);
    }

    #[test]
    fn configured_format_beats_detection() {
        let mut cfg = AppConfig::default();
        cfg.set("chat_format", "llama3").unwrap();
        let args = ModelArgs::default();
        assert_eq!(
            args.chat_format(&cfg, std::path::Path::new("qwen.gguf")),
            ChatFormat::Llama3
        );
    }

    #[test]
    fn parses_models_rm_with_dir() {
        let cli = Cli::try_parse_from(["offline-llm", "models", "rm", "phi-2.gguf", "--dir", "/tmp/m"]).unwrap();
        let Commands::Models(args) = cli.command else {
            panic!("expected models");
        };
        assert_eq!(args.dir, Some(PathBuf::from("/tmp/m")));
        assert!(matches!(args.action, ModelsAction::Rm { name } if name == "phi-2.gguf"));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["offline-llm", "generate", "--format", "alpaca", "hi"]).is_err());
    }
}
