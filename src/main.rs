//! llm-relay binary entry point

use std::io::Write;

use color_eyre::{eyre::eyre, Result};
use llm_relay::{
    cli::{Cli, Commands},
    config::{self, ChannelConfig, Settings},
    messages::{Chunk, Message},
    services::{
        create_chat_request, create_video_request, ChannelType, ChatProps, Hook, RelayContext,
        VideoProps,
    },
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Install error handler
    color_eyre::install()?;
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("llm_relay=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("llm_relay=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Handle commands
    match cli.command {
        Commands::Chat {
            channel,
            model,
            system,
            max_tokens,
            temperature,
            prompt,
        } => {
            let settings = config::load(cli.config.as_deref())?;
            let conf = find_channel(&settings, channel)?;
            let ctx = RelayContext::from(&settings.relay);

            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(prompt));

            let mut props = ChatProps::new(model, messages);
            props.max_tokens = max_tokens;
            props.temperature = temperature;
            props.request.cancel = cancel_on_ctrl_c();

            let mut hook = stdout_hook();
            create_chat_request(&ctx, conf, &mut props, hook.as_mut()).await?;
            println!();
        }
        Commands::Video {
            channel,
            model,
            seconds,
            size,
            prompt,
        } => {
            let settings = config::load(cli.config.as_deref())?;
            let conf = find_channel(&settings, channel)?;
            let ctx = RelayContext::from(&settings.relay);

            let mut props = VideoProps::new(model, prompt);
            props.seconds = seconds;
            props.size = size;
            props.request.cancel = cancel_on_ctrl_c();

            let mut hook = stdout_hook();
            create_video_request(&ctx, conf, &mut props, hook.as_mut()).await?;
            println!();
        }
        Commands::Channels => {
            let settings = config::load(cli.config.as_deref())?;
            if settings.channels.is_empty() {
                println!("No channels configured");
            }
            for channel in &settings.channels {
                let kind = channel
                    .channel_type
                    .parse::<ChannelType>()
                    .map_or("unknown", |t| t.as_str());
                println!(
                    "#{:<4} {:<12} {:<24} {}",
                    channel.id(),
                    kind,
                    channel.name,
                    channel.endpoint()
                );
            }
        }
        Commands::Version => {
            println!("llm-relay version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn find_channel(settings: &Settings, id: i64) -> Result<&dyn ChannelConfig> {
    settings
        .channel(id)
        .map(|c| c as &dyn ChannelConfig)
        .ok_or_else(|| eyre!("channel #{id} is not configured"))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

fn stdout_hook() -> Box<Hook<'static>> {
    Box::new(|chunk: Chunk| -> llm_relay::Result<()> {
        let mut out = std::io::stdout().lock();
        write!(out, "{}", chunk.content)?;
        if let Some(calls) = &chunk.tool_call {
            writeln!(out, "\n[tool call] {}", serde_json::to_string(calls)?)?;
        }
        out.flush()?;
        Ok(())
    })
}
