//! Conversation bot for XMPP group chats.
//!
//! Joins a multi-user chat, keeps a transcript per peer, and answers when
//! addressed, drawing on a char-level language model or a store of canned
//! replies.

pub mod chatbot;
pub mod config;
