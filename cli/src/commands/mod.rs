mod chat;
mod sync;

pub(crate) use chat::cmd_chat;
pub(crate) use sync::cmd_sync;
