use anyhow::Result;
use clap::Parser;
use imagegen_client::{
    ApiClient, CancelFlag, ClientConfig, GenerationRequest, PollOptions, TaskHandle,
    api::DEFAULT_DIMENSION, commands, config,
};
use log::debug;
use std::time::Duration;

/// imagegen - image generation service client
///
/// Submit prompts to an image-generation service and wait for the results,
/// either by polling an async task or with a single blocking request.
///
/// Examples:
///   imagegen health
///   imagegen generate "a cat on a sofa" --width 768
///   imagegen --url http://gen.local:8000 generate-sync "a lighthouse"
#[derive(Parser, Debug)]
#[command(author, version = env!("IMAGEGEN_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Service base URL (also via IMAGEGEN_URL)
    #[arg(
        long = "url",
        short = 'u',
        env = "IMAGEGEN_URL",
        value_name = "URL",
        default_value = config::DEFAULT_BASE_URL,
        global = true
    )]
    pub url: String,

    /// Timeout in seconds for health, submit and status requests
    #[arg(long, value_name = "SECS", default_value_t = config::DEFAULT_TIMEOUT_SECS, global = true)]
    pub timeout: u64,

    /// Timeout in seconds for a blocking generate-sync request
    #[arg(long, value_name = "SECS", default_value_t = config::DEFAULT_SYNC_TIMEOUT_SECS, global = true)]
    pub sync_timeout: u64,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Check that the service is reachable
    Health,

    /// Create an async task and wait for it to finish
    Generate(GenerateArgs),

    /// Generate with a single blocking request
    GenerateSync(RequestArgs),

    /// Show the current state of a task
    Status(StatusArgs),

    /// Read prompts from stdin and generate them one by one
    Interactive,
}

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// Text describing the image
    #[arg(value_name = "PROMPT")]
    pub prompt: String,

    /// Image width in pixels
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    pub width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    pub height: u32,

    /// Number of images to generate
    #[arg(long, short = 'n', default_value_t = 1)]
    pub batch_size: u32,

    /// What the images should not contain
    #[arg(long, value_name = "TEXT")]
    pub negative_prompt: Option<String>,
}

impl RequestArgs {
    fn to_request(&self) -> GenerationRequest {
        let request = GenerationRequest::new(self.prompt.as_str())
            .with_size(self.width, self.height)
            .with_batch_size(self.batch_size);
        match &self.negative_prompt {
            Some(negative) => request.with_negative_prompt(negative.as_str()),
            None => request,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Maximum number of status queries
    #[arg(long, default_value_t = config::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Seconds between status queries
    #[arg(long, value_name = "SECS", default_value_t = config::DEFAULT_POLL_INTERVAL_SECS)]
    pub interval: u64,

    /// Print the task id and return without waiting
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Task id returned by `generate`
    #[arg(value_name = "TASK_ID")]
    pub task_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = ClientConfig::new(cli.url.as_str())
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_sync_timeout(Duration::from_secs(cli.sync_timeout));
    debug!("Using service at {}", config.base_url);
    let api = ApiClient::new(&config)?;

    match cli.command {
        Commands::Health => commands::health(&api).await?,
        Commands::Generate(args) => {
            let options = PollOptions::new(args.max_attempts, Duration::from_secs(args.interval));
            let cancel = cancel_on_ctrl_c();
            commands::generate(
                &api,
                &args.request.to_request(),
                &options,
                !args.no_wait,
                &cancel,
            )
            .await?
        }
        Commands::GenerateSync(args) => {
            commands::generate_sync(&api, &args.to_request()).await?
        }
        Commands::Status(args) => {
            commands::status(&api, &TaskHandle::new(args.task_id)).await?
        }
        Commands::Interactive => {
            let input = std::io::BufReader::new(std::io::stdin());
            let cancel = cancel_on_ctrl_c();
            commands::interactive(&api, input, &mut std::io::stdout(), &cancel).await?
        }
    }
    Ok(())
}

/// Returns a flag that is set when the user presses Ctrl-C.
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            on_interrupt.cancel();
        }
    });
    cancel
}
