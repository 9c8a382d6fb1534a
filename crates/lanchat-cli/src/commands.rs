//! Parsing of the slash commands typed at the prompt.

use std::path::PathBuf;

use lanchat_session::PeerRecord;
use lanchat_shared::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text for the selected conversation.
    Say(String),
    Name(String),
    /// Select a peer by id, id prefix or display name.
    To(String),
    /// Back to the broadcast room.
    All,
    File(PathBuf),
    Get { handle: String, out: Option<PathBuf> },
    Peers,
    Connect,
    Disconnect,
    Refresh,
    Help,
    Quit,
}

pub const HELP: &str = "\
/name <name>          change display name
/to <peer>            talk to one peer (id, id prefix or name)
/all                  back to the broadcast room
/file <path>          send a file to the current conversation
/get <handle> [path]  download a shared file
/peers                list online peers
/connect              connect and re-enable auto-reconnect
/disconnect           disconnect and stop reconnecting
/refresh              ask for a fresh peer list
/quit                 leave";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (rest, ""),
    };
    let need = |what: &str| -> Result<String, String> {
        if arg.is_empty() {
            Err(format!("/{word} needs {what}"))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match word {
        "name" => Command::Name(need("a name")?),
        "to" => Command::To(need("a peer")?),
        "all" => Command::All,
        "file" => Command::File(PathBuf::from(need("a path")?)),
        "get" => {
            let arg = need("a file handle")?;
            let mut parts = arg.splitn(2, char::is_whitespace);
            let handle = parts.next().unwrap_or_default().to_string();
            let out = parts
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from);
            Command::Get { handle, out }
        }
        "peers" => Command::Peers,
        "connect" => Command::Connect,
        "disconnect" => Command::Disconnect,
        "refresh" => Command::Refresh,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Some(command))
}

/// Find the peer a `/to` argument refers to.
///
/// Exact id wins, then a unique id prefix, then a unique case-insensitive
/// name.
pub fn resolve_peer(query: &str, peers: &[PeerRecord]) -> Result<PeerId, String> {
    if let Some(peer) = peers.iter().find(|p| p.id.as_str() == query) {
        return Ok(peer.id.clone());
    }

    let unique = |matches: Vec<&PeerRecord>| -> Option<Result<PeerId, String>> {
        match matches.as_slice() {
            [] => None,
            [one] => Some(Ok(one.id.clone())),
            _ => Some(Err(format!("'{query}' matches {} peers", matches.len()))),
        }
    };

    let by_prefix: Vec<&PeerRecord> = peers
        .iter()
        .filter(|p| p.id.as_str().starts_with(query))
        .collect();
    if let Some(found) = unique(by_prefix) {
        return found;
    }

    let by_name: Vec<&PeerRecord> = peers
        .iter()
        .filter(|p| p.name.eq_ignore_ascii_case(query))
        .collect();
    unique(by_name).unwrap_or_else(|| Err(format!("no online peer matches '{query}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, name: &str) -> PeerRecord {
        PeerRecord {
            id: PeerId::from(id),
            name: name.into(),
            last_seen: 0,
        }
    }

    #[test]
    fn test_plain_text_and_blank() {
        assert_eq!(parse("  hello there "), Ok(Some(Command::Say("hello there".into()))));
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse("/name  Alice B"), Ok(Some(Command::Name("Alice B".into()))));
        assert_eq!(parse("/all"), Ok(Some(Command::All)));
        assert_eq!(parse("/quit"), Ok(Some(Command::Quit)));
        assert_eq!(
            parse("/file ./a b.txt"),
            Ok(Some(Command::File(PathBuf::from("./a b.txt"))))
        );
        assert_eq!(
            parse("/get h1 out.bin"),
            Ok(Some(Command::Get {
                handle: "h1".into(),
                out: Some(PathBuf::from("out.bin")),
            }))
        );
        assert_eq!(
            parse("/get h1"),
            Ok(Some(Command::Get {
                handle: "h1".into(),
                out: None,
            }))
        );
    }

    #[test]
    fn test_command_errors() {
        assert!(parse("/name").is_err());
        assert!(parse("/to   ").is_err());
        assert!(parse("/teleport").is_err());
    }

    #[test]
    fn test_resolve_peer() {
        let peers = vec![
            peer("abc123", "Alice"),
            peer("abd456", "Bob"),
            peer("xyz", "alice"),
        ];
        assert_eq!(resolve_peer("xyz", &peers), Ok(PeerId::from("xyz")));
        assert_eq!(resolve_peer("abd", &peers), Ok(PeerId::from("abd456")));
        assert!(resolve_peer("ab", &peers).is_err());
        assert_eq!(resolve_peer("BOB", &peers), Ok(PeerId::from("abd456")));
        assert!(resolve_peer("alice", &peers).is_err());
        assert!(resolve_peer("nobody", &peers).is_err());
    }
}
