use client_core::{CachedMessage, DisplayIdentity, PlaceholderKind, RoomRenderer};

/// Prints room updates to stdout, one line per change.
pub struct TerminalRenderer;

impl RoomRenderer for TerminalRenderer {
    fn insert(&self, message: &CachedMessage) {
        let time = message
            .sent_at
            .map(|ts| ts.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        let edited = if message.edited { " (edited)" } else { "" };
        println!(
            "[{}] {time} {}: {}{edited}",
            message.identity, message.author, message.content
        );
    }

    fn update(&self, identity: &DisplayIdentity, content: &str) {
        println!("[{identity}] edited: {content}");
    }

    fn remove(&self, identity: &DisplayIdentity) {
        println!("[{identity}] deleted");
    }

    fn clear(&self) {
        println!("----------------------------------------");
    }

    fn show_placeholder(&self, kind: PlaceholderKind) {
        let text = match kind {
            PlaceholderKind::Loading => "loading messages...",
            PlaceholderKind::EmptyRoom => "no messages yet, say hello",
            PlaceholderKind::HistoryUnavailable => "history unavailable, showing live messages only",
            PlaceholderKind::ConnectionFailed => "connection lost, /join the room again to retry",
            PlaceholderKind::AuthRejected => "session rejected, sign in again",
        };
        println!("  ({text})");
    }
}
