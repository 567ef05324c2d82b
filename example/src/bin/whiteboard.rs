use anyhow::Result;
use clap::Parser;
use peer_board::testing::HttpRendezvous;
use peer_board::{
    Command, DrawDelta, EmittedEvents, Session, SessionConfig, SessionInit, WebRtcTransportFactory,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use example::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// the server address for this process. it is also the identity other peers call
    local: String,
    /// call this peer once the signaling server is up
    #[arg(long)]
    call: Option<String>,
    /// shown to the peers you call
    #[arg(long)]
    name: Option<String>,
    /// path to a JSON session config
    #[arg(long)]
    config: Option<String>,
    /// accept every incoming call
    #[arg(long)]
    auto_accept: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%3f"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };
    if let Some(name) = &cli.name {
        config.display_name = name.clone();
    }

    // used to receive events from the Session
    let (event_tx, event_rx) = mpsc::unbounded_channel::<EmittedEvents>();
    // drawn segments, local and remote
    let (canvas_tx, canvas_rx) = mpsc::unbounded_channel::<DrawDelta>();
    // commands from stdin and from the event handler
    let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();

    let (rendezvous, rendezvous_events) = HttpRendezvous::start(&cli.local).await?;
    println!("listening on {}", rendezvous.identity());

    let transports = Arc::new(WebRtcTransportFactory::new(config.clone())?);
    let mut session = Session::init(SessionInit {
        config,
        rendezvous,
        rendezvous_events,
        transports,
        canvas: canvas_tx,
        emitted_event_chan: event_tx,
    });

    tokio::spawn(print_segments(canvas_rx));
    tokio::spawn(handle_events(
        event_rx,
        command_tx.clone(),
        cli.call.clone(),
        cli.auto_accept,
    ));
    tokio::spawn(read_stdin(command_tx.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            let _ = command_tx.send(Command::Shutdown);
        }
    });

    // hangs up every call on the way out
    session.run(command_rx).await;
    println!("session terminated");
    Ok(())
}

async fn read_stdin(command_tx: mpsc::UnboundedSender<Command>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(Some(command)) => command_tx.send(command)?,
            Ok(None) => {}
            Err(e) => println!("{}", e),
        }
    }
    log::debug!("stdin closed");
    command_tx.send(Command::Shutdown)?;
    Ok(())
}

async fn handle_events(
    mut event_rx: mpsc::UnboundedReceiver<EmittedEvents>,
    command_tx: mpsc::UnboundedSender<Command>,
    mut call: Option<String>,
    auto_accept: bool,
) -> Result<()> {
    while let Some(event) = event_rx.recv().await {
        println!("{}", describe(&event));
        match event {
            // calls can only be placed once the identity is known
            EmittedEvents::IdentityAssigned { .. } => {
                if let Some(target) = call.take() {
                    command_tx.send(Command::Call {
                        target,
                        media: None,
                    })?;
                }
            }
            EmittedEvents::IncomingCall { from, .. } if auto_accept => {
                command_tx.send(Command::Accept { from, media: None })?;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn print_segments(mut canvas_rx: mpsc::UnboundedReceiver<DrawDelta>) {
    while let Some(d) = canvas_rx.recv().await {
        println!("line ({}, {}) -> ({}, {})", d.prev_x, d.prev_y, d.x, d.y);
    }
}
