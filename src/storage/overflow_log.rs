//! Append-only HTML log for mails that did not yield a code.
//!
//! Entries are independent `<div>` blocks, so a torn write can only damage the
//! last one. The file is emptied once it grows past the size cap.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::utils::utils::format_timestamp;

pub const DEFAULT_OVERFLOW_CAP_BYTES: u64 = 2 * 1024 * 1024;

pub const DEFAULT_SUBJECT: &str = "No Subject";
pub const DEFAULT_FROM: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct OverflowConfig {
    pub path: PathBuf,
    pub cap_bytes: u64,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("other_emails.html"),
            cap_bytes: DEFAULT_OVERFLOW_CAP_BYTES,
        }
    }
}

/// One unmatched mail, ready to be rendered into the log.
#[derive(Debug, Clone)]
pub struct OverflowEntry {
    pub from: String,
    pub subject: String,
    pub received_at: NaiveDateTime,
    pub plain: String,
    pub html: String,
}

impl OverflowEntry {
    /// Renders the entry as a self-contained HTML block.
    ///
    /// The HTML body is embedded as-is; without one, the plain body is used
    /// with line breaks preserved.
    pub fn render(&self) -> String {
        let body = if self.html.is_empty() {
            nl2br(&self.plain)
        } else {
            self.html.clone()
        };
        format!(
            "<div style='background:#f4f4f4; border:1px solid #ddd; margin:10px 0; padding:15px; font-family:sans-serif;'>\
             <p><strong>From:</strong> {} <br> <strong>Subject:</strong> {} <br> <strong>Date:</strong> {}</p>\
             <div style='max-height:300px; overflow-y:auto; border-top:1px solid #ccc; padding-top:10px;'>{}</div>\
             </div>\n",
            escape_html(&self.from),
            escape_html(&self.subject),
            format_timestamp(&self.received_at),
            body,
        )
    }
}

#[derive(Debug, Clone)]
pub struct OverflowLog {
    config: OverflowConfig,
}

impl OverflowLog {
    pub fn new(config: OverflowConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Appends one rendered entry, emptying the file first if it is over the cap.
    pub fn append(&self, rendered: &str) -> io::Result<()> {
        let path = self.path();
        match fs::metadata(path) {
            Ok(meta) if meta.len() > self.config.cap_bytes => {
                info!(path = %path.display(), size = meta.len(), "Overflow log over cap, clearing");
                OpenOptions::new().write(true).truncate(true).open(path)?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
            }
            Err(e) => return Err(e),
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(rendered.as_bytes())?;
        file.flush()
    }
}

fn nl2br(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev = '\0';
    for ch in text.chars() {
        if ch == '\r' || (ch == '\n' && prev != '\r') {
            out.push_str("<br />");
        }
        out.push(ch);
        prev = ch;
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
