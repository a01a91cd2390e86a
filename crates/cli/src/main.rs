//! notifyd CLI
//!
//! Command-line client for the notifyd daemon.
//!
//! Commands are sent to the daemon over its Unix socket, one JSON line each.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use notifyd_core::{HintValue, NotificationId};
use notifyd_ipc::{
    decode_line, encode_line, socket_path, IpcCommand, IpcMessage, IpcResponse, IpcSignal,
};
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "notifyd-cli")]
#[command(author, version, about = "Send and manage desktop notifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a notification
    Send {
        /// Summary line
        summary: String,
        /// Body text (may contain simple markup)
        body: Option<String>,
        /// Application name
        #[arg(short, long, alias = "app", default_value = "notifyd-cli")]
        app_name: String,
        /// Icon name, path or file:// URI
        #[arg(short, long, default_value = "")]
        icon: String,
        /// Replace the live notification with this id
        #[arg(short, long, default_value_t = 0)]
        replaces: NotificationId,
        /// Timeout in milliseconds (0 = never, negative = server default)
        #[arg(short, long, default_value_t = -1, allow_hyphen_values = true)]
        timeout: i32,
        /// Urgency level
        #[arg(short, long, value_enum)]
        urgency: Option<Urgency>,
        /// Action button as KEY=LABEL (repeatable)
        #[arg(long = "action", value_parser = parse_action)]
        actions: Vec<(String, String)>,
        /// Hint as NAME=TYPE:VALUE, TYPE one of bool, int, uint, byte, string (repeatable)
        #[arg(long = "hint", value_parser = parse_hint)]
        hints: Vec<(String, HintValue)>,
        /// Wait until the notification closes and print what happened
        #[arg(short, long)]
        wait: bool,
    },
    /// Close a notification
    Close {
        /// Notification id
        id: NotificationId,
    },
    /// List server capabilities
    Capabilities,
    /// Show server information
    Info,
    /// Show live notifications and stack state
    Status,
    /// Print every action and close signal as it happens
    Listen,
    /// Reload configuration
    Reload,
    /// Stop the daemon
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    fn level(self) -> u8 {
        match self {
            Urgency::Low => 0,
            Urgency::Normal => 1,
            Urgency::Critical => 2,
        }
    }
}

/// Parse `KEY=LABEL`.
fn parse_action(s: &str) -> Result<(String, String)> {
    let (key, label) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=LABEL, got '{}'", s))?;
    if key.is_empty() {
        bail!("action key must not be empty");
    }
    Ok((key.to_string(), label.to_string()))
}

/// Parse `NAME=TYPE:VALUE`.
fn parse_hint(s: &str) -> Result<(String, HintValue)> {
    let (name, typed) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=TYPE:VALUE, got '{}'", s))?;
    let (kind, value) = typed
        .split_once(':')
        .ok_or_else(|| anyhow!("expected TYPE:VALUE after '=', got '{}'", typed))?;
    if name.is_empty() {
        bail!("hint name must not be empty");
    }

    let hint = match kind {
        "bool" => HintValue::Bool(
            value
                .parse()
                .with_context(|| format!("invalid bool '{}'", value))?,
        ),
        "int" => HintValue::Int(value.parse().with_context(|| format!("invalid int '{}'", value))?),
        "uint" => HintValue::UInt(
            value
                .parse()
                .with_context(|| format!("invalid uint '{}'", value))?,
        ),
        "byte" => HintValue::Byte(
            value
                .parse()
                .with_context(|| format!("invalid byte '{}'", value))?,
        ),
        "string" => HintValue::Str(value.to_string()),
        other => bail!("unknown hint type '{}'", other),
    };
    Ok((name.to_string(), hint))
}

/// Flatten `(key, label)` pairs into the wire's alternating list.
fn flatten_actions(actions: Vec<(String, String)>) -> Vec<String> {
    actions
        .into_iter()
        .flat_map(|(key, label)| [key, label])
        .collect()
}

/// A connected daemon session.
struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect() -> Result<Self> {
        let path = socket_path();
        let stream = UnixStream::connect(&path).await.with_context(|| {
            format!(
                "Failed to connect to notifyd at {}. Is the daemon running?",
                path.display()
            )
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn next_message(&mut self) -> Result<Option<IpcMessage>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(decode_line(&line)?));
        }
    }

    /// Send a command and wait for its response. Signals that arrive first
    /// are printed.
    async fn request(&mut self, cmd: &IpcCommand) -> Result<IpcResponse> {
        self.writer.write_all(encode_line(cmd)?.as_bytes()).await?;
        loop {
            match self.next_message().await? {
                Some(IpcMessage::Response(response)) => return Ok(response),
                Some(IpcMessage::Signal(signal)) => print_signal(&signal),
                None => bail!("Daemon closed the connection"),
            }
        }
    }
}

fn print_signal(signal: &IpcSignal) {
    match signal {
        IpcSignal::ActionInvoked { id, action_key } => {
            println!("{}: action {}", id, action_key)
        }
        IpcSignal::NotificationClosed { id, reason } => {
            println!("{}: closed ({:?}, code {})", id, reason, reason.code())
        }
    }
}

/// Print a response, turning daemon errors into a failing exit status.
fn print_response(response: IpcResponse) -> Result<()> {
    match response {
        IpcResponse::Ok => println!("ok"),
        IpcResponse::Error { message } => bail!("{}", message),
        IpcResponse::Notification { id } => println!("{}", id),
        IpcResponse::Capabilities { capabilities } => {
            for capability in capabilities {
                println!("{}", capability);
            }
        }
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut client = Client::connect().await?;

    let cmd = match cli.command {
        Commands::Send {
            summary,
            body,
            app_name,
            icon,
            replaces,
            timeout,
            urgency,
            actions,
            hints,
            wait,
        } => {
            let mut hints: HashMap<String, HintValue> = hints.into_iter().collect();
            if let Some(urgency) = urgency {
                hints.insert("urgency".to_string(), HintValue::Byte(urgency.level()));
            }
            let cmd = IpcCommand::Notify {
                app_name,
                replaces_id: replaces,
                icon,
                summary,
                body: body.unwrap_or_default(),
                actions: flatten_actions(actions),
                hints,
                timeout_ms: timeout,
            };
            let response = client.request(&cmd).await?;
            let id = match response {
                IpcResponse::Notification { id } => id,
                other => return print_response(other),
            };
            println!("{}", id);
            if wait {
                wait_for_close(&mut client, id).await?;
            }
            return Ok(());
        }
        Commands::Close { id } => IpcCommand::CloseNotification { id },
        Commands::Capabilities => IpcCommand::GetCapabilities,
        Commands::Info => IpcCommand::GetServerInformation,
        Commands::Status => IpcCommand::Status,
        Commands::Listen => {
            print_response(client.request(&IpcCommand::Subscribe).await?)?;
            while let Some(message) = client.next_message().await? {
                if let IpcMessage::Signal(signal) = message {
                    print_signal(&signal);
                }
            }
            return Ok(());
        }
        Commands::Reload => IpcCommand::Reload,
        Commands::Stop => IpcCommand::Stop,
    };

    print_response(client.request(&cmd).await?)
}

async fn wait_for_close(client: &mut Client, id: NotificationId) -> Result<()> {
    while let Some(message) = client.next_message().await? {
        if let IpcMessage::Signal(signal) = message {
            print_signal(&signal);
            if matches!(signal, IpcSignal::NotificationClosed { id: closed, .. } if closed == id) {
                return Ok(());
            }
        }
    }
    bail!("Daemon closed the connection before notification {} closed", id)
}
