//! Text and URL helpers shared by the feed, digest and compose layers.
//!
//! - **URL validation**: only `http`/`https` feed URLs are polled
//! - **Text cleanup**: feed snippets arrive as HTML fragments with stray
//!   control bytes; they are flattened to plain text before reaching the LLM
//! - **Escaping**: the listing renderer emits markup from untrusted titles

mod text;
mod url_check;

pub use text::{escape_html, flatten_snippet, strip_control_chars};
pub use url_check::{validate_feed_url, UrlCheckError};
