use anyhow::{bail, Result};
use peer_board::{Command, EmittedEvents};

/// Parses one line typed on stdin. Empty lines yield None.
///
///   down <x> <y> | move <x> <y> | up
///   call <peer> | accept <peer> | decline <peer> | hangup <peer>
///   quit
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb, args.as_slice()) {
        ("down", [x, y]) => Command::PointerDown {
            x: x.parse()?,
            y: y.parse()?,
        },
        ("move", [x, y]) => Command::PointerMove {
            x: x.parse()?,
            y: y.parse()?,
        },
        ("up", []) => Command::PointerUp,
        ("call", [peer]) => Command::Call {
            target: peer.to_string(),
            media: None,
        },
        ("accept", [peer]) => Command::Accept {
            from: peer.to_string(),
            media: None,
        },
        ("decline", [peer]) => Command::Decline {
            from: peer.to_string(),
        },
        ("hangup", [peer]) => Command::HangUp {
            peer: peer.to_string(),
        },
        ("quit", []) => Command::Shutdown,
        _ => bail!("can't parse {:?}", line.trim()),
    };
    Ok(Some(command))
}

pub fn describe(event: &EmittedEvents) -> String {
    match event {
        EmittedEvents::IdentityAssigned { identity } => format!("your id is {}", identity),
        EmittedEvents::IncomingCall { from, display_name } if display_name.is_empty() => {
            format!("{} is calling", from)
        }
        EmittedEvents::IncomingCall { from, display_name } => {
            format!("{} ({}) is calling", display_name, from)
        }
        EmittedEvents::CallConnected { peer } => format!("connected to {}", peer),
        EmittedEvents::RemoteStream { peer, stream } => {
            format!("{} shared stream {}", peer, stream.id())
        }
        EmittedEvents::CallEnded { peer, reason } => format!("call with {} ended: {:?}", peer, reason),
        EmittedEvents::CommandFailed { error } => format!("error: {}", error),
    }
}
