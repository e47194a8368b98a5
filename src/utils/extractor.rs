//! Pulls the recipient address and the one-time code out of a notification mail.
//!
//! The recipient is taken from the salutation line ("Dear someone@host.tld"),
//! the code is the first standalone six digit token. Both must be present for
//! a match; anything less is routed to the overflow log by the caller.

use std::sync::LazyLock;

use regex::Regex;

static LINE_BREAK_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</p>|</div>").expect("static regex"));

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

static RECIPIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Dear[\s:\-]*([a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,})")
        .expect("static regex")
});

// Byte-level boundaries: a code glued to a non-ASCII letter still counts.
static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u:\b)([0-9]{6})(?-u:\b)").expect("static regex"));

// Some senders glue the next line's "Greetings" onto the address TLD.
static GREETING_ARTIFACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)greetings").expect("static regex"));

/// A recipient/code pair found in one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub email: String,
    pub code: String,
}

/// Converts line-level markup to newlines and drops every remaining tag.
pub fn strip_html(html: &str) -> String {
    let with_breaks = LINE_BREAK_TAGS.replace_all(html, " \n");
    ANY_TAG.replace_all(&with_breaks, "").into_owned()
}

/// Finds the recipient address and verification code in a message body.
pub fn extract(plain: &str, html: &str) -> Option<Extraction> {
    let search_text = format!("{}\n {}", plain, strip_html(html));

    let email = find_recipient(&search_text)?;
    let code = find_code(&search_text)?;

    Some(Extraction { email, code })
}

fn find_recipient(text: &str) -> Option<String> {
    let raw = RECIPIENT.captures(text)?.get(1)?.as_str();
    let cleaned = GREETING_ARTIFACT.replace_all(raw, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn find_code(text: &str) -> Option<String> {
    CODE.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
