//! notifyd Daemon
//!
//! Popup notification daemon for X11 desktops.
//!
//! Responsibilities:
//! - Accept notification requests from clients over a Unix socket
//! - Drive the lifecycle and positioning engine from one event loop
//! - Translate X11 events (pointer, clicks, structure changes, screens)
//! - Deliver action and close signals back to client sessions
//! - Exit after a quiet period with nothing on screen

mod config;
mod host;
mod ipc;

use anyhow::{Context, Result};
use config::Config;
use host::{open_url, DaemonHost, TimerTasks};
use notifyd_core::{Engine, Host, MonotonicTime, NotificationId, Rect, StructureEvent};
use notifyd_ipc::{socket_path, IpcCommand, IpcMessage, IpcResponse};
use notifyd_platform_x11::{NativeEvent, PopupHit, PopupManager, X11Display};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Events that the daemon event loop processes.
pub enum DaemonEvent {
    /// An IPC command from a client session.
    IpcCommand {
        session: String,
        cmd: IpcCommand,
        responder: oneshot::Sender<IpcResponse>,
    },
    /// A client connected; signals for it go to `outbox`.
    SessionOpened {
        session: String,
        outbox: mpsc::UnboundedSender<IpcMessage>,
    },
    /// A client disconnected.
    SessionClosed { session: String },
    /// A translated X11 event.
    Native(NativeEvent),
    /// Expiration sweep.
    ExpirationTick,
    /// The idle-exit delay elapsed.
    IdleExit,
    /// Debounced source-window move for a notification.
    Reposition(NotificationId),
    /// Close a notification that was never shown.
    Undelivered(NotificationId),
    /// Shutdown signal.
    Shutdown,
}

/// Capacity of the event loop channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine plus the configuration it was built from.
struct AppState {
    engine: Engine,
    config: Config,
    /// Origin of the engine's monotonic clock.
    started: Instant,
}

impl AppState {
    fn new(config: Config, work_areas: &[Rect]) -> Self {
        Self {
            engine: Engine::new(config.engine_settings(), work_areas),
            config,
            started: Instant::now(),
        }
    }

    fn now(&self) -> MonotonicTime {
        MonotonicTime::from_duration(self.started.elapsed())
    }

    /// Replace the configuration and push the engine-side preferences.
    fn apply_config(&mut self, host: &mut impl Host, config: Config) {
        self.engine.apply_settings(host, config.engine_settings());
        self.config = config;
    }

    /// Handle an IPC command and return a response.
    ///
    /// `Subscribe` only touches session state, which the caller owns.
    fn handle_command(&mut self, host: &mut impl Host, session: &str, cmd: IpcCommand) -> IpcResponse {
        match cmd {
            IpcCommand::Notify { .. } => {
                let Some(request) = cmd.into_notify_request(session) else {
                    return IpcResponse::error("Invalid notify command");
                };
                let now = self.now();
                match self.engine.notify(host, now, request) {
                    Ok(id) => IpcResponse::Notification { id },
                    Err(e) => IpcResponse::error(e.to_string()),
                }
            }
            IpcCommand::CloseNotification { id } => match self.engine.close(host, id) {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::error(e.to_string()),
            },
            IpcCommand::GetCapabilities => IpcResponse::capabilities(),
            IpcCommand::GetServerInformation => IpcResponse::server_information(),
            IpcCommand::Status => IpcResponse::Status {
                ids: self.engine.ids(),
                stacks: self.engine.stacks().len(),
                location: self.engine.stacks().location().identifier().to_string(),
                uptime_secs: self.started.elapsed().as_secs(),
            },
            IpcCommand::Subscribe => IpcResponse::Ok,
            IpcCommand::Reload => match Config::load() {
                Ok(mut config) => {
                    for w in config.validate() {
                        warn!("Config: {} - {}", w.field, w.message);
                    }
                    self.apply_config(host, config);
                    info!("Configuration reloaded");
                    IpcResponse::Ok
                }
                Err(e) => IpcResponse::error(format!("Failed to reload config: {}", e)),
            },
            IpcCommand::Stop => {
                info!("Stop command received");
                IpcResponse::Ok
            }
        }
    }

    /// Handle an X11 event. Returns false when the daemon cannot continue.
    fn handle_native_event(&mut self, host: &mut DaemonHost, event: NativeEvent) -> bool {
        let now = self.now();
        match event {
            NativeEvent::Structure(StructureEvent::Destroy(window)) => {
                match host.popups.handle_for(window) {
                    Some(popup) => {
                        host.popups.forget_destroyed(popup);
                        self.engine.popup_destroyed(host, popup);
                    }
                    None => self
                        .engine
                        .structure_event(host, StructureEvent::Destroy(window)),
                }
            }
            NativeEvent::Structure(event) => self.engine.structure_event(host, event),
            NativeEvent::Expose(window) => {
                if let Some(popup) = host.popups.handle_for(window) {
                    host.popups.redraw(popup);
                }
            }
            NativeEvent::PointerEntered(window) => {
                if let Some(popup) = host.popups.handle_for(window) {
                    self.engine.pointer_entered(popup, now);
                }
            }
            NativeEvent::PointerLeft(window) => {
                if let Some(popup) = host.popups.handle_for(window) {
                    self.engine.pointer_left(popup, now);
                }
            }
            NativeEvent::Clicked { window, position } => {
                match host.popups.hit_test(window, position) {
                    Some((popup, PopupHit::Action(key))) => {
                        self.engine.action_invoked(host, popup, &key)
                    }
                    Some((popup, PopupHit::Body)) => self.engine.popup_clicked(host, popup),
                    // A link click opens the link and leaves the notification alone.
                    Some((_, PopupHit::Link(url))) => open_url(&url),
                    None => debug!("Click on unknown window {}", window),
                }
            }
            NativeEvent::ScreenChanged => {
                let work_areas = host.display.work_areas();
                info!("Screen configuration changed: {} monitor(s)", work_areas.len());
                self.engine.monitors_changed(host, &work_areas);
            }
            NativeEvent::WorkAreaChanged => {
                let work_areas = host.display.work_areas();
                debug!("Work area changed");
                self.engine.work_area_changed(host, &work_areas);
            }
            NativeEvent::ConnectionLost => {
                error!("Lost connection to the X server");
                return false;
            }
        }
        true
    }
}

/// Spawn a named forwarding thread that receives events from a std::sync::mpsc channel
/// and forwards them to a tokio mpsc sender.
fn spawn_forwarding_thread<T: Send + 'static>(
    name: &str,
    receiver: std::sync::mpsc::Receiver<T>,
    sender: mpsc::Sender<DaemonEvent>,
    map_fn: impl Fn(T) -> DaemonEvent + Send + 'static,
) -> Result<std::thread::JoinHandle<()>> {
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            while let Ok(event) = receiver.recv() {
                if sender.blocking_send(map_fn(event)).is_err() {
                    break; // Channel closed, daemon shutting down
                }
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to spawn {} thread: {}", thread_name, e))
}

fn log_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (needed for log level)
    let mut config = Config::load().unwrap_or_else(|e| {
        // Can't use tracing yet, fall back to eprintln
        eprintln!("Failed to load configuration: {}. Using defaults.", e);
        Config::default()
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&config.behavior.log_level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    for w in config.validate() {
        warn!("Config: {} - {}", w.field, w.message);
    }

    info!("notifyd starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let socket = socket_path();
    if ipc::check_already_running(&socket).await {
        error!(
            "Another notifyd instance is already running (socket {} is active)",
            socket.display()
        );
        return Ok(());
    }

    info!(
        "Configuration loaded: location={}, default_timeout_ms={}, sound={}, idle_exit={}, log_level={}",
        config.popup.location,
        config.popup.default_timeout_ms,
        config.sound.enabled,
        config.behavior.idle_exit,
        config.behavior.log_level
    );

    let display = X11Display::connect().context("Failed to open X11 display")?;
    let work_areas = display.work_areas();
    info!("Detected {} monitor(s):", work_areas.len());
    for (i, area) in work_areas.iter().enumerate() {
        info!(
            "  Monitor {}: {}x{} at {},{}",
            i, area.width, area.height, area.x, area.y
        );
    }
    let popups = PopupManager::new(display.connection(), display.screen_num())
        .context("Failed to set up popup windows")?;

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(EVENT_CHANNEL_CAPACITY);

    let (x11_tx, x11_rx) = std::sync::mpsc::channel();
    display
        .spawn_event_thread(x11_tx)
        .context("Failed to spawn X11 event thread")?;
    // Both threads block on X11 and are left behind at exit.
    let _x11_forwarder =
        spawn_forwarding_thread("x11-fwd", x11_rx, event_tx.clone(), DaemonEvent::Native)?;

    let listener = ipc::bind_socket(&socket)?;
    let ipc_tx = event_tx.clone();
    tokio::spawn(async move {
        ipc::run_ipc_server(listener, ipc_tx).await;
    });
    info!("IPC server listening on {}", socket.display());

    // Install Ctrl+C handler so terminal kill triggers graceful shutdown
    {
        let shutdown_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Ctrl+C received, initiating shutdown...");
                let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    let timers = TimerTasks::new(event_tx.clone(), config.behavior.idle_exit);
    let mut host = DaemonHost::new(display, popups, timers, &config);
    let mut state = AppState::new(config, &work_areas);
    state.engine.start(&mut host);

    info!("Ready. Use notifyd-cli to send notifications.");

    while let Some(event) = event_rx.recv().await {
        match event {
            DaemonEvent::IpcCommand {
                session,
                cmd,
                responder,
            } => {
                let is_reload = matches!(cmd, IpcCommand::Reload);
                if matches!(cmd, IpcCommand::Subscribe) && !host.sessions.subscribe(&session) {
                    debug!("Session {} already subscribed", session);
                }
                let response = state.handle_command(&mut host, &session, cmd);
                if is_reload {
                    host.configure(&state.config);
                }
                let _ = responder.send(response);
            }
            DaemonEvent::SessionOpened { session, outbox } => host.sessions.open(session, outbox),
            DaemonEvent::SessionClosed { session } => host.sessions.close(&session),
            DaemonEvent::Native(native) => {
                if !state.handle_native_event(&mut host, native) {
                    break;
                }
            }
            DaemonEvent::ExpirationTick => {
                let now = state.now();
                state.engine.tick(&mut host, now);
            }
            DaemonEvent::IdleExit => {
                if state.engine.idle_exit_due() {
                    info!("Nothing on screen for a while, exiting");
                    break;
                }
            }
            DaemonEvent::Reposition(id) => state.engine.reposition_due(&mut host, id),
            DaemonEvent::Undelivered(id) => state.engine.undelivered_due(&mut host, id),
            DaemonEvent::Shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    state.engine.shutdown(&mut host);
    if host.timers.is_ticking() || host.timers.idle_armed() {
        debug!("Cancelling pending timers");
    }
    host.timers.cancel_all();
    host.popups.close_all();
    if let Err(e) = std::fs::remove_file(&socket) {
        debug!("Could not remove socket {}: {}", socket.display(), e);
    }

    info!("notifyd shutting down.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyd_core::testing::{Call, FakeHost};
    use notifyd_core::{CloseReason, StackLocation, MAX_NOTIFICATIONS};

    fn test_state() -> AppState {
        AppState::new(Config::default(), &[Rect::new(0, 0, 1920, 1080)])
    }

    fn notify(summary: &str) -> IpcCommand {
        IpcCommand::Notify {
            app_name: "test".to_string(),
            replaces_id: 0,
            icon: String::new(),
            summary: summary.to_string(),
            body: String::new(),
            actions: Vec::new(),
            hints: Default::default(),
            timeout_ms: -1,
        }
    }

    #[test]
    fn test_spawn_forwarding_thread_forwards_events() {
        let (tx, rx) = std::sync::mpsc::channel::<u32>();
        let (async_tx, mut async_rx) = mpsc::channel::<DaemonEvent>(10);

        let _handle =
            spawn_forwarding_thread("test", rx, async_tx, DaemonEvent::Reposition).unwrap();

        tx.send(42).unwrap();
        drop(tx); // Close channel so thread exits

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let event = rt.block_on(async { async_rx.recv().await });
        assert!(matches!(event, Some(DaemonEvent::Reposition(42))));
    }

    #[test]
    fn test_spawn_forwarding_thread_stops_on_channel_close() {
        let (tx, rx) = std::sync::mpsc::channel::<u32>();
        let (async_tx, _async_rx) = mpsc::channel::<DaemonEvent>(10);

        let handle =
            spawn_forwarding_thread("test-close", rx, async_tx, DaemonEvent::Undelivered).unwrap();

        drop(tx);
        handle.join().expect("Thread should exit cleanly");
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(log_level("debug"), Level::DEBUG);
        assert_eq!(log_level("WARN"), Level::WARN);
        assert_eq!(log_level("chatty"), Level::INFO);
    }

    #[test]
    fn test_cmd_notify_returns_id() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        let response = state.handle_command(&mut host, ":client-1", notify("hello"));
        assert_eq!(response, IpcResponse::Notification { id: 1 });
        assert_eq!(state.engine.ids(), vec![1]);
        assert_eq!(host.count(|c| matches!(c, Call::Show(_))), 1);
    }

    #[test]
    fn test_cmd_notify_capacity_error() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        for i in 0..MAX_NOTIFICATIONS {
            let response = state.handle_command(&mut host, ":client-1", notify(&i.to_string()));
            assert!(matches!(response, IpcResponse::Notification { .. }));
        }
        let response = state.handle_command(&mut host, ":client-1", notify("one too many"));
        assert_eq!(
            response,
            IpcResponse::error("Exceeded maximum number of notifications")
        );
    }

    #[test]
    fn test_cmd_close_signals_owner() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        state.handle_command(&mut host, ":client-1", notify("hello"));

        let response =
            state.handle_command(&mut host, ":client-2", IpcCommand::CloseNotification { id: 1 });
        assert_eq!(response, IpcResponse::Ok);
        assert_eq!(host.closed(), vec![(1, CloseReason::ClosedByCall)]);
        assert!(host
            .calls
            .contains(&Call::Closed(":client-1".to_string(), 1, CloseReason::ClosedByCall)));
    }

    #[test]
    fn test_cmd_close_unknown_id() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        let response =
            state.handle_command(&mut host, ":client-1", IpcCommand::CloseNotification { id: 9 });
        assert!(matches!(response, IpcResponse::Error { .. }));
    }

    #[test]
    fn test_cmd_status() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        state.handle_command(&mut host, ":client-1", notify("a"));
        state.handle_command(&mut host, ":client-1", notify("b"));

        let response = state.handle_command(&mut host, ":client-1", IpcCommand::Status);
        assert_eq!(
            response,
            IpcResponse::Status {
                ids: vec![1, 2],
                stacks: 1,
                location: "bottom_right".to_string(),
                uptime_secs: 0,
            }
        );
    }

    #[test]
    fn test_cmd_capabilities_and_info() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        assert_eq!(
            state.handle_command(&mut host, ":client-1", IpcCommand::GetCapabilities),
            IpcResponse::capabilities()
        );
        assert_eq!(
            state.handle_command(&mut host, ":client-1", IpcCommand::GetServerInformation),
            IpcResponse::server_information()
        );
    }

    #[test]
    fn test_cmd_stop() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        let response = state.handle_command(&mut host, ":client-1", IpcCommand::Stop);
        assert_eq!(response, IpcResponse::Ok);
    }

    #[test]
    fn test_apply_config_moves_stacks() {
        let mut state = test_state();
        let mut host = FakeHost::new();
        let mut config = Config::default();
        config.popup.location = "top_left".to_string();
        state.apply_config(&mut host, config);
        assert_eq!(state.engine.stacks().location(), StackLocation::TopLeft);
        assert_eq!(state.config.popup.location, "top_left");
    }
}
