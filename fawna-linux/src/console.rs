//! Line console on stdin/stdout: post messages and inspect the node.

use fawna_core::{Envelope, MeshError, MeshNode, NotificationSink};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prints accepted messages and recovered failures.
pub struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn on_message(&self, envelope: &Envelope) {
        println!(
            "[{}] {} (hops: {})",
            envelope.origin_id, envelope.content, envelope.hop_count
        );
    }

    fn on_failure(&self, error: &MeshError) {
        println!("! {}", error);
    }
}

enum Command<'a> {
    Peers,
    Posts,
    Quit,
    Post(&'a str),
    Nothing,
}

fn parse(line: &str) -> Command<'_> {
    match line.trim() {
        "" => Command::Nothing,
        "/peers" => Command::Peers,
        "/posts" => Command::Posts,
        "/quit" => Command::Quit,
        text => Command::Post(text),
    }
}

/// Read commands until `/quit` or EOF.
pub async fn run(node: &MeshNode) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("fawna: type a message to post; /peers, /posts, /quit");
    while let Some(line) = lines.next_line().await? {
        match parse(&line) {
            Command::Nothing => {}
            Command::Peers => {
                let peers = node.list_peers();
                if peers.is_empty() {
                    println!("no peers");
                }
                for (address, hops) in peers {
                    println!("{}  hops={}", address, hops);
                }
            }
            Command::Posts => {
                for record in node.read_all() {
                    println!("{}", record);
                }
            }
            Command::Quit => break,
            Command::Post(text) => {
                let id = node.post(text);
                tracing::debug!(message_id = %id, "posted");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        assert!(matches!(parse("  "), Command::Nothing));
        assert!(matches!(parse("/peers"), Command::Peers));
        assert!(matches!(parse("/posts\n"), Command::Posts));
        assert!(matches!(parse("/quit"), Command::Quit));
        assert!(matches!(parse(" hello: world "), Command::Post("hello: world")));
    }
}
