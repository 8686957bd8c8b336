//! Daily news briefing: polls RSS/Atom feeds, drops items already sent,
//! composes an HTML digest and mails it.

pub mod compose;
pub mod config;
pub mod digest;
pub mod feed;
pub mod history;
pub mod mail;
pub mod pipeline;
pub mod util;
