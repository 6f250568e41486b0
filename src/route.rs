//! Conversation identifiers from host URLs.
//!
//! Recognised paths are `/c/{id}` and `/chat/{id}`, where `id` is a UUID
//! (any case, normalised to lowercase) or an opaque `[A-Za-z0-9_-]+` token.

use std::sync::LazyLock;

use regex::Regex;

static CONVERSATION_PATH: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"/(?:c|chat)/([A-Za-z0-9_-]+)(?:[/?#]|$)"));

static UUID: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
});

/// Extract the conversation identifier from a full URL or a bare path.
#[must_use]
pub fn conversation_id_from_url(url: &str) -> Option<String> {
    let path_re = match &*CONVERSATION_PATH {
        Ok(re) => re,
        Err(err) => {
            log::error!("conversation path pattern failed to compile: {err}");
            return None;
        }
    };
    let id = path_re.captures(url)?.get(1)?.as_str();
    if is_uuid(id) {
        Some(id.to_ascii_lowercase())
    } else {
        Some(id.to_owned())
    }
}

#[must_use]
pub fn is_uuid(value: &str) -> bool {
    match &*UUID {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}
