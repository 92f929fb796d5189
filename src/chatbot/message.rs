//! Message types passed from the XMPP session to the reply logic.

use std::fmt;

/// XMPP message type attribute, restricted to the kinds the bot handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Normal,
    GroupChat,
}

impl MessageKind {
    /// Parse the `type` attribute of a message stanza.
    ///
    /// A missing attribute means `normal` (RFC 6121 §5.2.2). Types the bot
    /// does not handle (`headline`, `error`) return `None`.
    pub fn from_attr(attr: Option<&str>) -> Option<Self> {
        match attr {
            None | Some("normal") => Some(Self::Normal),
            Some("chat") => Some(Self::Chat),
            Some("groupchat") => Some(Self::GroupChat),
            Some(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Normal => "normal",
            Self::GroupChat => "groupchat",
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Self::Chat | Self::Normal)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound message with the fields the bot cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Bare address of the sender. For group chats this is the room.
    pub sender_id: String,
    /// Occupant nick in a room, or the node part of the sender's address.
    pub sender_nick: String,
    pub kind: MessageKind,
    pub body: String,
    /// Room history replayed on join (carries a delay element).
    pub delayed: bool,
}

impl IncomingMessage {
    pub fn group(room: &str, nick: &str, body: &str) -> Self {
        Self {
            sender_id: room.to_string(),
            sender_nick: nick.to_string(),
            kind: MessageKind::GroupChat,
            body: body.to_string(),
            delayed: false,
        }
    }

    pub fn private(sender: &str, body: &str) -> Self {
        let nick = sender.split('@').next().unwrap_or_default();
        Self {
            sender_id: sender.to_string(),
            sender_nick: nick.to_string(),
            kind: MessageKind::Chat,
            body: body.to_string(),
            delayed: false,
        }
    }

    /// Short single-line preview for log output.
    pub fn preview(&self) -> String {
        let text: String = self.body.chars().take(50).collect();
        text.replace('\n', " ")
    }
}
