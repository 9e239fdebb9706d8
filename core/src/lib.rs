//! Core library for healthsync: the daily record model, the Lose It! CSV
//! parser, the idempotent upsert writer, and the sync driver. External
//! services (mailbox, time-series store, chat model) are reached through
//! the traits in [`mailbox`], [`store`], and [`chat`].

pub mod chat;
pub mod loseit;
pub mod mailbox;
pub mod models;
pub mod store;
pub mod sync;
pub mod upsert;
