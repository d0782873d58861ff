use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use llm_caller::config::API_KEY_ENV;
use llm_caller::{
    ClientConfig, FunctionSpec, LlmClient, Message, ModelKwargs, ProviderBackend, Query,
};

#[derive(Parser)]
#[command(name = "llm-caller", version)]
#[command(about = "Retrying client for LLM completion endpoints", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend to use (overrides the config file)
    #[arg(long, global = true, value_enum)]
    backend: Option<ProviderBackend>,

    /// Model to use (overrides the config file)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Base URL of the model host (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat completion with an optional system prompt
    Generate {
        /// The user prompt
        prompt: String,

        /// System prompt
        #[arg(long)]
        system: Option<String>,

        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,

        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Text completion of a single prompt
    Complete {
        /// The prompt
        prompt: String,

        /// Stream the completion and print the accumulated text
        #[arg(long)]
        stream: bool,

        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Single-shot query printing output, usage and timing as JSON
    Query {
        /// System message
        #[arg(long)]
        system: Option<String>,

        /// User message
        #[arg(long)]
        user: Option<String>,

        /// JSON file with a function spec ({"name", "json_schema", "description"})
        #[arg(long)]
        function: Option<PathBuf>,

        /// Send the system message as a user turn
        #[arg(long)]
        convert_system_to_user: bool,

        #[command(flatten)]
        sampling: SamplingArgs,
    },
}

#[derive(clap::Args)]
struct SamplingArgs {
    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum number of tokens to generate
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Stop sequence (repeatable)
    #[arg(long)]
    stop: Vec<String>,
}

impl SamplingArgs {
    fn into_kwargs(self) -> ModelKwargs {
        let stop = (!self.stop.is_empty()).then_some(self.stop);
        ModelKwargs::new()
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .stop(stop)
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("info".parse().expect("valid log directive"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default().with_api_key_override(std::env::var(API_KEY_ENV).ok()),
    };

    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(model) = &cli.model {
        config.connection.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.connection.base_url = base_url.clone();
    }

    config.validate()?;
    Ok(config)
}

fn load_function_spec(path: &Path) -> Result<FunctionSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read function spec {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid function spec {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli).context("failed to load configuration")?;
    let client = LlmClient::from_config(&config);
    info!(
        backend = client.provider_name(),
        model = %config.connection.model,
        "client ready"
    );

    let outcome = match cli.command {
        Commands::Generate {
            prompt,
            system,
            stream,
            sampling,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(prompt));

            if stream {
                print_stream(&client, messages, sampling.into_kwargs()).await
            } else {
                client
                    .generate(messages, sampling.into_kwargs())
                    .await
                    .map(|message| println!("{}", message.content.unwrap_or_default()))
                    .map_err(anyhow::Error::from)
            }
        }
        Commands::Complete {
            prompt,
            stream,
            sampling,
        } => {
            let text = if stream {
                client.stream_complete(&prompt, sampling.into_kwargs()).await
            } else {
                client.complete(&prompt, sampling.into_kwargs()).await
            };
            text.map(|text| println!("{}", text)).map_err(anyhow::Error::from)
        }
        Commands::Query {
            system,
            user,
            function,
            convert_system_to_user,
            sampling,
        } => {
            let mut query = Query::new()
                .convert_system_to_user(convert_system_to_user)
                .kwargs(sampling.into_kwargs());
            query.system_message = system;
            query.user_message = user;
            if let Some(path) = function {
                query = query.function(load_function_spec(&path)?);
            }

            match client.query(query).await {
                Ok(result) => serde_json::to_string_pretty(&result)
                    .map(|json| println!("{}", json))
                    .context("failed to encode result"),
                Err(e) => Err(e.into()),
            }
        }
    };

    if let Err(e) = &outcome {
        error!(error = %e, "llm call failed");
    }
    outcome
}

async fn print_stream(
    client: &LlmClient,
    messages: Vec<Message>,
    kwargs: ModelKwargs,
) -> Result<()> {
    let mut stream = client.generate_stream(messages, kwargs).await?;
    let mut stdout = std::io::stdout();

    while let Some(chunk) = stream.next().await {
        if let Some(delta) = chunk?.delta {
            stdout.write_all(delta.as_bytes())?;
            stdout.flush()?;
        }
    }
    writeln!(stdout)?;
    Ok(())
}
