use chrono::{DateTime, Utc};
use serde::Serialize;

/// A text post taken from the source channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMessage {
    pub chat_id:     i64,
    pub message_id:  i32,
    /// Message text, or the caption of a media post
    pub text:        String,
    pub received_at: DateTime<Utc>,
}

impl ChannelMessage {
    pub fn new(chat_id: i64, message_id: i32, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    /// First line, capped, for log lines.
    pub fn preview(&self) -> String {
        let first_line = self.text.lines().next().unwrap_or_default();
        let mut preview: String = first_line.chars().take(80).collect();
        if preview.len() < first_line.len() || self.text.lines().nth(1).is_some() {
            preview.push('…');
        }
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(ChannelMessage::new(1, 1, "GOLD BUY").preview(), "GOLD BUY");
        assert_eq!(ChannelMessage::new(1, 1, "GOLD BUY\nSL 1990").preview(), "GOLD BUY…");
        assert_eq!(ChannelMessage::new(1, 1, "x".repeat(100)).preview().chars().count(), 81);
    }
}
