use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use frames::{Kind, Message, Payload};
use futures_util::StreamExt;
use pepperlink::{Bridge, BridgeError, ConfigError, LinkConfig, SimulatedRobot};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid server URL: {0}")]
    InvalidServerUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message is not valid: {0}")]
    InvalidMessage(#[from] frames::ParseError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("timed out waiting for websocket message")]
    Timeout,
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "pepper", about = "Robot link bridge and control-server client")]
struct Cli {
    /// HTTP base URL of the control server.
    #[arg(long, env = "PEPPER_SERVER_URL", default_value = "http://127.0.0.1:5003")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the control server's health endpoint.
    Ping,
    /// Run the robot bridge against a simulated robot.
    Run(RunArgs),
    /// Ask every connected robot to speak.
    Say(SayArgs),
    /// Forward a raw JSON message to every connected robot.
    Send(SendArgs),
    /// Print what the robots stream to viewers.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Robot endpoint; overrides `PEPPER_WS_URL`.
    #[arg(long)]
    url: Option<String>,

    /// Capture rate; overrides `PEPPER_CAPTURE_FPS`.
    #[arg(long)]
    fps: Option<u32>,

    /// Size of each simulated picture in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    picture_size: usize,

    /// Simulated duration of each robot action.
    #[arg(long, default_value_t = 200)]
    action_delay_ms: u64,
}

#[derive(Args, Debug)]
struct SayArgs {
    text: String,

    #[arg(long, default_value_t = false)]
    animated: bool,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// JSON object with a `type` field, e.g. `{"type":"command","action":"animate","animation":"dance"}`.
    data: String,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Stop after this many messages.
    #[arg(long)]
    count: Option<usize>,

    #[arg(long, default_value_t = 30)]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_owned();

    match cli.command {
        Command::Ping => run_ping(&server).await,
        Command::Run(args) => run_bridge(args).await,
        Command::Say(args) => {
            let message = say_message(&args.text, args.animated);
            post_command(&server, &message).await
        }
        Command::Send(args) => {
            let message = frames::decode_message(&args.data)?;
            post_command(&server, &message).await
        }
        Command::Watch(args) => run_watch(&server, args).await,
    }
}

async fn run_ping(server: &str) -> Result<(), CliError> {
    let response = reqwest::Client::new().get(format!("{server}/healthz")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Server { status: status.as_u16(), message: "health check failed".to_owned() });
    }
    println!("ok");
    Ok(())
}

async fn run_bridge(args: RunArgs) -> Result<(), CliError> {
    let mut config = LinkConfig::from_env()?;
    if let Some(url) = args.url {
        pepperlink::config::validate_url(&url)?;
        config.channel.server_url = url;
    }
    if let Some(fps) = args.fps {
        if fps == 0 {
            return Err(ConfigError::ZeroFps.into());
        }
        config.capture.target_fps = fps;
    }

    let robot = Arc::new(SimulatedRobot::new(args.picture_size, Duration::from_millis(args.action_delay_ms)));
    let bridge = Bridge::start(config, robot)?;

    tokio::signal::ctrl_c().await?;
    info!(
        frames = bridge.capture().frames_delivered(),
        skipped = bridge.capture().ticks_skipped(),
        "shutting down"
    );
    bridge.shutdown();
    Ok(())
}

async fn post_command(server: &str, message: &Message) -> Result<(), CliError> {
    let body: Value = serde_json::from_str(&frames::encode_message(message))?;
    let response = reqwest::Client::new().post(format!("{server}/api/command")).json(&body).send().await?;

    let status = response.status();
    let json = response.json::<Value>().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = json.get("error").and_then(Value::as_str).unwrap_or("request failed").to_owned();
        return Err(CliError::Server { status: status.as_u16(), message });
    }
    print_json(&json)
}

async fn run_watch(server: &str, args: WatchArgs) -> Result<(), CliError> {
    let url = format!("{}/ws/viewer", ws_base_url(server)?);
    let (mut stream, _) = connect_async(url.as_str()).await.map_err(|e| CliError::WsConnect(Box::new(e)))?;
    info!(%url, "watching");

    let idle = Duration::from_secs(args.idle_timeout_secs);
    let mut seen = 0_usize;
    while args.count.is_none_or(|count| seen < count) {
        let next = tokio::time::timeout(idle, stream.next()).await.map_err(|_| CliError::Timeout)?;
        let Some(message) = next else {
            return Err(CliError::WsClosed);
        };
        match message.map_err(|e| CliError::WsConnect(Box::new(e)))? {
            WsMessage::Text(text) => println!("{}", describe_text(text.as_str())),
            WsMessage::Binary(bytes) => println!("frame {} bytes", bytes.len()),
            WsMessage::Close(_) => return Err(CliError::WsClosed),
            _ => continue,
        }
        seen += 1;
    }
    Ok(())
}

fn say_message(text: &str, animated: bool) -> Message {
    let mut params = Payload::new();
    params.insert("text".to_owned(), Value::String(text.to_owned()));
    params.insert("with_animation".to_owned(), Value::Bool(animated));
    Message::command("say", params)
}

fn describe_text(text: &str) -> String {
    match frames::decode_message(text) {
        Ok(message) if *message.kind() == Kind::CommandStatus => format!(
            "{} {} {}",
            message.kind(),
            message.str_field("status").unwrap_or("?"),
            message.str_field("text").unwrap_or("")
        ),
        _ => text.to_owned(),
    }
}

fn ws_base_url(server: &str) -> Result<String, CliError> {
    if let Some(rest) = server.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if let Some(rest) = server.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if server.starts_with("ws://") || server.starts_with("wss://") {
        return Ok(server.to_owned());
    }
    Err(CliError::InvalidServerUrl(server.to_owned()))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
