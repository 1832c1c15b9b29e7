use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use mqtt_session::adapter::rumqtt::{AdapterSettings, RumqttAdapter};
use mqtt_session::config::AppConfig;
use mqtt_session::console::{self, ConsoleDefaults, ConsoleInput};
use mqtt_session::executor::TokioExecutor;
use mqtt_session::session::{Event, SessionManager, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Upper bound for the disconnect handshake on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::default_path();
    AppConfig::ensure_default_config(&config_path).await?;
    let config = AppConfig::load_from(&config_path).await?;
    setup_logging_env(config.log_level()?);

    info!("Starting session manager for {}", config.broker.endpoint);
    let adapter = Arc::new(RumqttAdapter::new(
        Handle::current(),
        AdapterSettings::from(&config.broker),
    ));
    let manager = SessionManager::new(adapter, Arc::new(TokioExecutor::current()), config.qos());
    let mut events = manager.subscribe_events();

    let defaults = ConsoleDefaults {
        endpoint: config.broker.endpoint.clone(),
        client_id: config.generate_client_id(),
        topic: config.session.default_topic.clone(),
    };
    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = events.recv() => println!("{}", console::render(&event)),

            line = lines.next_line() => {
                let Some(line) = console::accept_line(line) else {
                    break;
                };
                match console::parse_line(&line, &defaults) {
                    Ok(None) => {}
                    Ok(Some(ConsoleInput::Session(command))) => {
                        println!("{}", console::describe(&command));
                        manager.submit(command);
                    }
                    Ok(Some(ConsoleInput::Clear)) => print!("\x1B[2J\x1B[H"),
                    Ok(Some(ConsoleInput::Help)) => println!("{}", console::HELP),
                    Ok(Some(ConsoleInput::Quit)) => break,
                    Err(e) => println!("{e}"),
                }
            }
        }
    }

    shutdown(&manager, &mut events).await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .pretty()
        .init();
}

/// Brings the session down before exit: waits out a pending connect, then
/// disconnects and waits for the terminal event.
async fn shutdown(manager: &SessionManager, events: &mut mpsc::UnboundedReceiver<Event>) {
    let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(deadline);

    loop {
        match manager.state() {
            SessionState::Disconnected => break,
            SessionState::Connected => manager.disconnect(),
            SessionState::Connecting | SessionState::Disconnecting => {}
        }

        tokio::select! {
            _ = &mut deadline => {
                warn!("Session still {} after {:?}, exiting anyway", manager.state(), SHUTDOWN_GRACE);
                break;
            }
            event = events.recv() => match event {
                Some(event) => println!("{}", console::render(&event)),
                None => break,
            }
        }
    }
}
