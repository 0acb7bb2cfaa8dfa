//! Chat rendering and user-facing notices.
//!
//! The history is shown newest first. Rendering alternates strictly between
//! the bot and user templates starting with the bot at offset 0, which lines
//! up with the roles because every completed question adds a user turn
//! followed by an assistant turn.

use crate::error::PipelineError;
use crate::models::ChatHistory;
use crate::session::ProcessOutcome;

pub const UPLOAD_FIRST_NOTICE: &str = "Please upload something first.";

pub const CSS: &str = r#"<style>
.chat-message {
    padding: 1.5rem; border-radius: 0.5rem; margin-bottom: 1rem; display: flex
}
.chat-message.user {
    background-color: #2b313e
}
.chat-message.bot {
    background-color: #475063
}
.chat-message .avatar {
  width: 20%;
}
.chat-message .avatar img {
  max-width: 78px;
  max-height: 78px;
  border-radius: 50%;
  object-fit: cover;
}
.chat-message .message {
  width: 80%;
  padding: 0 1.5rem;
  color: #fff;
}
</style>"#;

const MESSAGE_SLOT: &str = "{{MSG}}";

pub const BOT_TEMPLATE: &str = r#"<div class="chat-message bot">
    <div class="avatar">
        <img src="https://media.istockphoto.com/vectors/chat-bot-robot-avatar-in-circle-round-shape-isolated-on-white-stock-vector-id1250000899?k=20&m=1250000899&s=170667a&w=0&h=PmKAjrRbSAwobkDCOh55X4GeMXIvLHAHKOIlFc41D7k=">
    </div>
    <div class="message">{{MSG}}</div>
</div>"#;

pub const USER_TEMPLATE: &str = r#"<div class="chat-message user">
    <div class="avatar">
        <img src="https://cdn1.vectorstock.com/i/1000x1000/73/15/female-avatar-profile-icon-round-woman-face-vector-18307315.jpg">
    </div>
    <div class="message">{{MSG}}</div>
</div>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Bot,
    User,
}

impl Speaker {
    /// Speaker for the `offset`-th entry of the newest-first listing.
    pub fn at_offset(offset: usize) -> Self {
        if offset % 2 == 0 {
            Speaker::Bot
        } else {
            Speaker::User
        }
    }

    fn template(self) -> &'static str {
        match self {
            Speaker::Bot => BOT_TEMPLATE,
            Speaker::User => USER_TEMPLATE,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Speaker::Bot => "bot",
            Speaker::User => "you",
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_message(speaker: Speaker, content: &str) -> String {
    speaker.template().replace(MESSAGE_SLOT, &escape_html(content))
}

pub fn render_history(history: &ChatHistory) -> String {
    history
        .newest_first()
        .enumerate()
        .map(|(offset, turn)| render_message(Speaker::at_offset(offset), &turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Terminal rendering, newest first like the HTML view.
pub fn render_history_plain(history: &ChatHistory) -> String {
    history
        .newest_first()
        .enumerate()
        .map(|(offset, turn)| format!("[{}] {}", Speaker::at_offset(offset).label(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn process_notice(outcome: &ProcessOutcome) -> String {
    match outcome {
        ProcessOutcome::NothingUploaded => UPLOAD_FIRST_NOTICE.to_string(),
        ProcessOutcome::Indexed(summary) => {
            let mut notice = format!(
                "Processed {} document(s) into {} chunk(s).",
                summary.documents.len(),
                summary.chunks
            );
            for skipped in &summary.skipped {
                notice.push_str(&format!(" Skipped {}: {}.", skipped.name, skipped.reason));
            }
            notice
        }
    }
}

pub fn error_notice(error: &PipelineError) -> String {
    format!("Something went wrong ({}): {error}", error.kind())
}
