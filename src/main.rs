use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use clap::Parser;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::info;

use converse_client::core::conversation::{OperatorPrompt, StdinPrompt};
use converse_client::{
    AudioSink, AudioSource, BatchDriver, ClientConfig, ClientResult, ConversationLoop, Driver,
    DeviceSink, DeviceSource, FileSink, FileSource, GrpcConversation, InteractiveDriver,
    LogReporter, Turn, TurnFactory, auth,
};

/// Converse client - record a spoken query and play the assistant's reply
#[derive(Parser, Debug)]
#[command(name = "converse-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to input audio file. If missing, uses microphone capture
    #[arg(short = 'i', long = "input-audio-file", value_name = "FILE")]
    input_audio_file: Option<PathBuf>,

    /// Path to output audio file. If missing, uses speaker playback
    #[arg(short = 'o', long = "output-audio-file", value_name = "FILE")]
    output_audio_file: Option<PathBuf>,

    /// Name or address of the Converse API service
    #[arg(long = "api-endpoint")]
    api_endpoint: Option<String>,

    /// Path to stored OAuth2 credentials
    #[arg(long = "credentials", value_name = "FILE")]
    credentials: Option<PathBuf>,

    /// Playback volume percentage (0-100)
    #[arg(long = "volume")]
    volume: Option<u8>,

    /// Read file input at full speed instead of real-time pacing
    #[arg(long = "no-file-pacing")]
    no_file_pacing: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Builds fresh per-turn collaborators over the shared channel.
struct SessionTurnFactory {
    channel: Channel,
    token: String,
    config: ClientConfig,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
}

#[async_trait]
impl TurnFactory for SessionTurnFactory {
    async fn make_turn(&mut self) -> ClientResult<Turn> {
        let source: Box<dyn AudioSource> = match &self.input_file {
            Some(path) => Box::new(
                FileSource::open(path, self.config.audio, self.config.file_pacing).await?,
            ),
            None => Box::new(DeviceSource::open(self.config.audio).await?),
        };
        let sink: Box<dyn AudioSink> = match &self.output_file {
            Some(path) => Box::new(FileSink::create(path, self.config.audio)?),
            None => Box::new(DeviceSink::open(self.config.audio).await?),
        };
        let stream = Box::new(GrpcConversation::new(
            self.channel.clone(),
            self.token.clone(),
            self.config.audio,
            self.config.volume_percent,
        ));
        Ok(Turn {
            source,
            sink,
            stream,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Resolve configuration: CLI flags over environment over defaults
    let mut config = ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    if let Some(endpoint) = cli.api_endpoint {
        config.endpoint = endpoint;
    }
    if let Some(credentials) = cli.credentials {
        config.credentials_path = credentials;
    }
    if let Some(volume) = cli.volume {
        config.volume_percent = volume;
    }
    if cli.no_file_pacing {
        config.file_pacing = false;
    }
    config.validate().map_err(|e| anyhow!(e.to_string()))?;

    // Credentials must be valid before any turn starts
    let credentials = auth::load_credentials(&config.credentials_path)
        .context("failed to load stored credentials")?;
    let token = credentials
        .bearer_token()
        .context("stored credentials are unusable")?
        .to_string();

    info!(endpoint = %config.endpoint, "connecting to Converse API");
    let mut endpoint = Endpoint::from_shared(config.endpoint.clone())
        .map_err(|e| anyhow!("invalid endpoint '{}': {}", config.endpoint, e))?;
    if config.endpoint.starts_with("https://") {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new())
            .context("TLS configuration failed")?;
    }
    let channel = endpoint
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint))?;

    let interactive = cli.input_audio_file.is_none() && cli.output_audio_file.is_none();
    let factory = SessionTurnFactory {
        channel,
        token,
        config,
        input_file: cli.input_audio_file,
        output_file: cli.output_audio_file,
    };
    let turn_loop = ConversationLoop::new(Arc::new(LogReporter));

    if interactive {
        let prompt: Box<dyn OperatorPrompt> = Box::new(StdinPrompt);
        InteractiveDriver::new(factory, prompt, turn_loop)
            .run()
            .await?;
    } else {
        BatchDriver::new(factory, turn_loop).run().await?;
    }

    Ok(())
}
