use client_core::DisplayIdentity;
use shared::{
    domain::{MessageId, RoomId},
    protocol::parse_timestamp,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Rooms,
    Join(RoomId),
    Create(String),
    Invite,
    Accept(String),
    Edit { message_id: MessageId, content: String },
    Delete(DisplayIdentity),
    Help,
    Quit,
    Say(String),
    Nothing,
}

pub const HELP: &str = "\
/rooms                 list your rooms
/join <room id>        switch to a room
/create <name>         create a room and join it
/invite                create an invite code for the current room
/accept <code>         accept an invite and join its room
/edit <id> <text>      edit one of your messages
/delete <id|timestamp> delete one of your messages
/quit                  leave and exit
anything else          send as a message";

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Nothing);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Say(line.to_string()));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        match name {
            "rooms" => Ok(Command::Rooms),
            "join" => parse_i64(args, "room id").map(|id| Command::Join(RoomId(id))),
            "create" => required(args, "room name").map(Command::Create),
            "invite" => Ok(Command::Invite),
            "accept" => required(args, "invite code").map(Command::Accept),
            "edit" => {
                let (id, content) = args
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| "usage: /edit <id> <text>".to_string())?;
                Ok(Command::Edit {
                    message_id: MessageId(parse_i64(id, "message id")?),
                    content: required(content, "new text")?,
                })
            }
            "delete" => parse_identity(args).map(Command::Delete),
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command /{other}, try /help")),
        }
    }
}

fn required(value: &str, what: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("missing {what}"));
    }
    Ok(value.to_string())
}

fn parse_i64(value: &str, what: &str) -> Result<i64, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid {what}: '{}'", value.trim()))
}

fn parse_identity(value: &str) -> Result<DisplayIdentity, String> {
    let value = required(value, "message id")?;
    if let Ok(id) = value.parse() {
        return Ok(DisplayIdentity::Durable(MessageId(id)));
    }
    parse_timestamp(&value)
        .map(DisplayIdentity::Surrogate)
        .ok_or_else(|| format!("invalid message id or timestamp: '{value}'"))
}

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;
