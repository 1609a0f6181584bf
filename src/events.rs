//! Callbacks into whatever displays the chat
//!
//! The library never prints. Client and server report what a user would see
//! through [`ChatEvents`]; the binaries implement it for a terminal and the
//! tests implement it with channels.

use tracing::info;

/// Notice shown when a message fails signature verification
pub const INVALID_SIGNATURE_NOTICE: &str = "RECEIVED A MESSAGE WITH AN INVALID SIGNATURE";

/// Notice shown when the client's receive loop dies on an error
pub const ERROR_EXIT_NOTICE: &str = "AN ERROR OCCURRED, EXITING...";

/// Text the server sends everyone when it shuts down
pub const SERVER_GOODBYE: &str = "SERVER HAS DISCONNECTED";

/// Presentation layer interface
pub trait ChatEvents: Send + Sync {
    /// A chat line arrived; `sender` is `None` for system messages and
    /// local notices
    fn on_chat_received(&self, sender: Option<&str>, text: &str);

    /// The roster changed; `roster` is pre-formatted, one user per line
    fn on_roster_changed(&self, _roster: &str, _user_count: usize) {}

    /// The session is over and no further events will follow
    fn on_session_ended(&self) {}
}

/// Format a chat line the way terminals show it
pub fn format_chat_line(sender: Option<&str>, text: &str) -> String {
    match sender {
        Some(name) => format!("{}: {}", name, text),
        None => text.to_string(),
    }
}

/// Events sink that only logs
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEvents;

impl ChatEvents for LogEvents {
    fn on_chat_received(&self, sender: Option<&str>, text: &str) {
        info!("{}", format_chat_line(sender, text));
    }

    fn on_roster_changed(&self, _roster: &str, user_count: usize) {
        info!("{} user(s) online", user_count);
    }

    fn on_session_ended(&self) {
        info!("Session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_chat_line() {
        assert_eq!(format_chat_line(Some("alice"), "hi"), "alice: hi");
        assert_eq!(
            format_chat_line(None, SERVER_GOODBYE),
            "SERVER HAS DISCONNECTED"
        );
    }
}
