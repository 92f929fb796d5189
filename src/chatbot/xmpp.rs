//! XMPP session using tokio-xmpp.
//!
//! [`Session`] turns protocol events into outgoing stanzas and keeps no
//! network state of its own; [`run`] owns the client and pumps events
//! through it one at a time.

use std::time::Duration;

use chrono::{DateTime, Local};
use futures::StreamExt;
use thiserror::Error;
use tokio::time::Instant;
use tokio_xmpp::parsers::BareJid;
use tokio_xmpp::{AsyncClient, Element, Event};
use tracing::{debug, error, info, warn};

use crate::chatbot::context::BotContext;
use crate::chatbot::message::{IncomingMessage, MessageKind};
use crate::chatbot::tracker::MentionTracker;
use crate::chatbot::transcript::Direction;

const NS_CLIENT: &str = "jabber:client";
const NS_ROSTER: &str = "jabber:iq:roster";
const NS_MUC: &str = "http://jabber.org/protocol/muc";
const NS_DELAY: &str = "urn:xmpp:delay";
const NS_PING: &str = "urn:xmpp:ping";
const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

const ROSTER_IQ_ID: &str = "kcuf-roster";
const ROSTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid JID '{jid}': {reason}")]
    InvalidJid { jid: String, reason: String },
    #[error("XMPP stream error: {0}")]
    Stream(#[from] tokio_xmpp::Error),
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room: Option<String>,
    pub nick: String,
    /// Answer one-to-one chats as if every message addressed the bot.
    pub reply_in_private: bool,
}

/// Something the session wants done on the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(Element),
    Disconnect,
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    Done,
    ConnectFailed(String),
}

pub struct Session {
    config: SessionConfig,
    tracker: MentionTracker,
    ctx: BotContext,
    roster_deadline: Option<Instant>,
}

impl Session {
    pub fn new(config: SessionConfig, tracker: MentionTracker, ctx: BotContext) -> Self {
        Self { config, tracker, ctx, roster_deadline: None }
    }

    pub fn context(&self) -> &BotContext {
        &self.ctx
    }

    pub fn roster_deadline(&self) -> Option<Instant> {
        self.roster_deadline
    }

    /// Session established: announce presence and ask for the roster.
    pub fn on_online(&mut self) -> Vec<Action> {
        info!("Session started");
        self.roster_deadline = Some(Instant::now() + ROSTER_TIMEOUT);

        let presence = Element::builder("presence", NS_CLIENT).build();
        let roster = Element::builder("iq", NS_CLIENT)
            .attr("type", "get")
            .attr("id", ROSTER_IQ_ID)
            .append(Element::builder("query", NS_ROSTER).build())
            .build();
        vec![Action::Send(presence), Action::Send(roster)]
    }

    /// The roster request went unanswered.
    pub fn on_roster_timeout(&mut self) -> Vec<Action> {
        self.roster_deadline = None;
        error!("Server is taking too long to respond");
        vec![Action::Disconnect]
    }

    pub fn on_stanza(&mut self, stanza: &Element, now: DateTime<Local>) -> Vec<Action> {
        if stanza.is("iq", NS_CLIENT) {
            return self.on_iq(stanza);
        }
        if stanza.is("message", NS_CLIENT) {
            return match parse_message(stanza) {
                Some(msg) => self.on_message(&msg, now),
                None => Vec::new(),
            };
        }
        Vec::new()
    }

    fn on_iq(&mut self, iq: &Element) -> Vec<Action> {
        let kind = iq.attr("type").unwrap_or_default();

        if iq.attr("id") == Some(ROSTER_IQ_ID) {
            self.roster_deadline = None;
            return match kind {
                "result" => {
                    let contacts = iq
                        .get_child("query", NS_ROSTER)
                        .map(|q| q.children().count())
                        .unwrap_or(0);
                    info!("Roster received ({} contacts)", contacts);
                    self.join_room()
                }
                _ => {
                    error!("There was an error getting the roster");
                    error!("{}", error_condition(iq).unwrap_or_else(|| "unknown condition".into()));
                    vec![Action::Disconnect]
                }
            };
        }

        match kind {
            "get" if iq.has_child("ping", NS_PING) => vec![Action::Send(iq_reply(iq, "result", None))],
            "get" | "set" => {
                debug!("Unsupported iq from {:?}", iq.attr("from"));
                let error = Element::builder("error", NS_CLIENT)
                    .attr("type", "cancel")
                    .append(Element::builder("service-unavailable", NS_STANZAS).build())
                    .build();
                vec![Action::Send(iq_reply(iq, "error", Some(error)))]
            }
            _ => Vec::new(),
        }
    }

    fn join_room(&self) -> Vec<Action> {
        let Some(ref room) = self.config.room else {
            return Vec::new();
        };
        info!("Joining {} as {}", room, self.config.nick);
        let presence = Element::builder("presence", NS_CLIENT)
            .attr("to", format!("{}/{}", room, self.config.nick))
            .append(
                Element::builder("x", NS_MUC)
                    .append(Element::builder("history", NS_MUC).attr("maxchars", "0").build())
                    .build(),
            )
            .build();
        vec![Action::Send(presence)]
    }

    fn on_message(&mut self, msg: &IncomingMessage, now: DateTime<Local>) -> Vec<Action> {
        match msg.kind {
            MessageKind::GroupChat if msg.delayed => {
                self.ctx.log(&msg.sender_id, &msg.sender_nick, &msg.body, Direction::Inbound);
                Vec::new()
            }
            MessageKind::GroupChat => {
                match self.tracker.handle_group_message(&mut self.ctx, msg, now) {
                    Some(reply) => {
                        info!("Replying in {}: \"{}\"", msg.sender_id, reply.chars().take(50).collect::<String>());
                        vec![Action::Send(outgoing_message(&msg.sender_id, MessageKind::GroupChat, &reply))]
                    }
                    None => Vec::new(),
                }
            }
            MessageKind::Chat | MessageKind::Normal => {
                info!("Message from {}: \"{}\"", msg.sender_id, msg.preview());
                self.ctx.log(&msg.sender_id, &msg.sender_nick, &msg.body, Direction::Inbound);
                if !self.config.reply_in_private {
                    return Vec::new();
                }
                match self.ctx.generated_or_canned(&msg.body) {
                    Some(reply) => {
                        self.ctx.log(&msg.sender_id, "", &reply, Direction::Outbound);
                        vec![Action::Send(outgoing_message(&msg.sender_id, MessageKind::Chat, &reply))]
                    }
                    None => Vec::new(),
                }
            }
        }
    }
}

/// Extract the fields the bot uses from a message stanza.
///
/// Stanzas without a body (chat states, room subjects) or of an unhandled
/// type return `None`.
pub fn parse_message(stanza: &Element) -> Option<IncomingMessage> {
    if !stanza.is("message", NS_CLIENT) {
        return None;
    }
    let kind = MessageKind::from_attr(stanza.attr("type"))?;
    let from = stanza.attr("from")?;
    let body = stanza.get_child("body", NS_CLIENT)?.text();

    let (bare, resource) = match from.split_once('/') {
        Some((bare, resource)) => (bare, Some(resource)),
        None => (from, None),
    };
    let nick = match kind {
        MessageKind::GroupChat => resource.unwrap_or_default(),
        MessageKind::Chat | MessageKind::Normal => match bare.split_once('@') {
            Some((node, _)) => node,
            None => "",
        },
    };

    Some(IncomingMessage {
        sender_id: bare.to_string(),
        sender_nick: nick.to_string(),
        kind,
        body,
        delayed: stanza.has_child("delay", NS_DELAY),
    })
}

fn outgoing_message(to: &str, kind: MessageKind, body: &str) -> Element {
    Element::builder("message", NS_CLIENT)
        .attr("to", to)
        .attr("type", kind.as_str())
        .append(Element::builder("body", NS_CLIENT).append(body.to_string()).build())
        .build()
}

fn iq_reply(iq: &Element, kind: &str, payload: Option<Element>) -> Element {
    let mut reply = Element::builder("iq", NS_CLIENT)
        .attr("type", kind)
        .attr("id", iq.attr("id").unwrap_or_default());
    if let Some(from) = iq.attr("from") {
        reply = reply.attr("to", from);
    }
    if let Some(payload) = payload {
        reply = reply.append(payload);
    }
    reply.build()
}

/// Name of the defined condition inside an error stanza.
fn error_condition(stanza: &Element) -> Option<String> {
    stanza
        .get_child("error", NS_CLIENT)?
        .children()
        .find(|child| child.ns() == NS_STANZAS)
        .map(|child| child.name().to_string())
}

/// Connect, then feed events to `session` until the stream ends.
///
/// Must run on the multi-threaded runtime: stanza handling blocks in place.
pub async fn run(mut session: Session, jid: &str, password: String) -> Result<SessionEnd, SessionError> {
    let bare = jid
        .parse::<BareJid>()
        .map_err(|e| SessionError::InvalidJid { jid: jid.to_string(), reason: e.to_string() })?;

    info!("Connecting as {}", bare);
    let mut client = AsyncClient::new(bare, password);
    let mut online = false;

    loop {
        let deadline = session.roster_deadline();
        let actions = tokio::select! {
            event = client.next() => match event {
                Some(Event::Online { .. }) => {
                    online = true;
                    session.on_online()
                }
                // Generation can take a while; keep the other workers free.
                Some(Event::Stanza(stanza)) => {
                    tokio::task::block_in_place(|| session.on_stanza(&stanza, Local::now()))
                }
                Some(Event::Disconnected(e)) => {
                    if !online {
                        return Ok(SessionEnd::ConnectFailed(e.to_string()));
                    }
                    warn!("Disconnected: {e}");
                    return Ok(SessionEnd::Done);
                }
                None => return Ok(SessionEnd::Done),
            },
            _ = sleep_until(deadline) => session.on_roster_timeout(),
        };

        for action in actions {
            match action {
                Action::Send(stanza) => client.send_stanza(stanza).await?,
                Action::Disconnect => {
                    client.send_end().await?;
                    return Ok(SessionEnd::Done);
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
