//! Wire protocol library for the B0 messaging core.
//!
//! Defines the typed identifiers, the conversation-agnostic [`message::Message`]
//! shape, the client/server event unions exchanged over the room-scoped
//! socket channel, and the JSON frame codec.

pub mod codec;
pub mod event;
pub mod ids;
pub mod message;
