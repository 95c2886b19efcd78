//! Wire format of the relay. Every line is newline-terminated UTF-8:
//!
//! - client handshake: `LOGIN:<username>`
//! - client chat: any text
//! - client commands: `/quit`, `/users`, `/msg <username> <text>`
//! - server chat: `[HH:MM] <username>: <text>`
//! - server private message: `[HH:MM] [private] <username>: <text>`
//! - server notice: `[server] <text>`
//!
//! Lines handled here never carry the trailing newline; framing is done by
//! [`crate::conn::LineReader`].

use chrono::NaiveTime;

use crate::error::RelayError;

pub const LOGIN_PREFIX: &str = "LOGIN:";
pub const NOTICE_PREFIX: &str = "[server]";
pub const PRIVATE_MARKER: &str = "[private]";
pub const QUIT_COMMAND: &str = "/quit";
pub const USERS_COMMAND: &str = "/users";
pub const MSG_COMMAND: &str = "/msg";

pub const MSG_USAGE: &str = "usage: /msg <name> <text>";

const TIME_FORMAT: &str = "%H:%M";

/// A decoded server chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub time: NaiveTime,
    pub username: String,
    pub text: String,
    /// Sent with `/msg` to this recipient alone.
    pub private: bool,
}

/// What a logged-in client's line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    Chat(&'a str),
    Quit,
    Users,
    Private { to: &'a str, text: &'a str },
    /// A command with missing arguments; carries the usage hint.
    Usage(&'static str),
}

pub fn encode_login(username: &str) -> String {
    format!("{LOGIN_PREFIX}{username}")
}

/// Parse the handshake line and return the validated username.
pub fn decode_login(line: &str, max_username_chars: usize) -> Result<String, RelayError> {
    let name = line
        .trim()
        .strip_prefix(LOGIN_PREFIX)
        .ok_or_else(|| RelayError::MalformedLogin(format!("expected {LOGIN_PREFIX}<name>")))?
        .trim();

    validate_username(name, max_username_chars)?;

    Ok(name.to_string())
}

fn validate_username(name: &str, max_chars: usize) -> Result<(), RelayError> {
    if name.is_empty() {
        return Err(RelayError::MalformedLogin("username cannot be empty".into()));
    }

    if name.chars().count() > max_chars {
        return Err(RelayError::MalformedLogin(format!(
            "username longer than {max_chars} characters"
        )));
    }

    // ':' would make the chat line ambiguous to split, and a leading '['
    // could pass for the private marker.
    if name.chars().any(|c| c == ':' || c.is_control()) {
        return Err(RelayError::MalformedLogin(
            "username contains ':' or control characters".into(),
        ));
    }

    if name.starts_with('[') {
        return Err(RelayError::MalformedLogin("username cannot start with '['".into()));
    }

    // `/msg` splits the recipient on whitespace.
    if name.chars().any(char::is_whitespace) {
        return Err(RelayError::MalformedLogin("username contains whitespace".into()));
    }

    Ok(())
}

pub fn encode_chat(time: NaiveTime, username: &str, text: &str) -> String {
    format!("[{}] {}: {}", time.format(TIME_FORMAT), username, text)
}

pub fn encode_private(time: NaiveTime, username: &str, text: &str) -> String {
    format!(
        "[{}] {PRIVATE_MARKER} {}: {}",
        time.format(TIME_FORMAT),
        username,
        text
    )
}

pub fn decode_chat(line: &str) -> Result<ChatLine, String> {
    let rest = line
        .strip_prefix('[')
        .ok_or_else(|| format!("not a chat line: {line}"))?;

    let (stamp, rest) = rest
        .split_once("] ")
        .ok_or_else(|| format!("missing timestamp: {line}"))?;

    let time = NaiveTime::parse_from_str(stamp, TIME_FORMAT)
        .map_err(|e| format!("bad timestamp '{stamp}': {e}"))?;

    let (private, rest) = match rest.strip_prefix(PRIVATE_MARKER) {
        Some(rest) => (true, rest.trim_start_matches(' ')),
        None => (false, rest),
    };

    let (username, text) = rest
        .split_once(": ")
        .ok_or_else(|| format!("missing username: {line}"))?;

    if username.is_empty() {
        return Err(format!("missing username: {line}"));
    }

    Ok(ChatLine {
        time,
        username: username.to_string(),
        text: text.to_string(),
        private,
    })
}

pub fn encode_notice(text: &str) -> String {
    format!("{NOTICE_PREFIX} {text}")
}

pub fn is_notice(line: &str) -> bool {
    line.starts_with(NOTICE_PREFIX)
}

/// Classify a non-blank line from a logged-in client. Anything that is not
/// a known command is chat and relayed verbatim.
pub fn parse_inbound(line: &str) -> Inbound<'_> {
    let trimmed = line.trim();

    if trimmed == QUIT_COMMAND {
        return Inbound::Quit;
    }
    if trimmed == USERS_COMMAND {
        return Inbound::Users;
    }

    let args = match trimmed.strip_prefix(MSG_COMMAND) {
        Some(args) if args.is_empty() || args.starts_with(char::is_whitespace) => args.trim_start(),
        _ => return Inbound::Chat(line),
    };

    match args.split_once(char::is_whitespace) {
        Some((to, text)) if !text.trim().is_empty() => Inbound::Private {
            to,
            text: text.trim_start(),
        },
        _ => Inbound::Usage(MSG_USAGE),
    }
}

/// The reply to `/users`.
pub fn encode_user_list(usernames: &[String]) -> String {
    encode_notice(&format!("online: {}", usernames.join(", ")))
}
