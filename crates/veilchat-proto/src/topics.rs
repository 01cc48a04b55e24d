//! Realtime bus destinations.

/// Destination for outgoing private messages.
pub const SEND_PRIVATE_DESTINATION: &str = "/app/chat/sendPrivateMessage";

/// Per-user queue receiving private messages and self-echoes.
pub fn private_queue(username: &str) -> String {
    format!("/user/{username}/queue/private")
}

/// Per-user queue receiving send rejections.
pub fn error_queue(username: &str) -> String {
    format!("/user/{username}/queue/errors")
}
