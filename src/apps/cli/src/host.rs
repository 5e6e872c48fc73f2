//! Terminal host: draws the polished message on stdout, status lines on stderr.

use log::{debug, info};
use polisher_core::{ChatMessage, HostEvents, MessageView, StatusSink, StatusUpdate};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Shows a single message. Snapshots that extend what is already on screen print only the new
/// suffix; anything else starts a fresh line.
pub struct TerminalView {
    index: usize,
    shown: Mutex<String>,
}

impl TerminalView {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            shown: Mutex::new(String::new()),
        }
    }

    /// Terminate the current line if anything was drawn.
    pub fn finish(&self) {
        let shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
        if !shown.is_empty() && !shown.ends_with('\n') {
            println!();
        }
    }
}

impl MessageView for TerminalView {
    fn is_mounted(&self, index: usize) -> bool {
        index == self.index
    }

    fn format_message(&self, text: &str, _message: &ChatMessage, _index: usize) -> Option<String> {
        Some(text.to_string())
    }

    fn set_body_html(&self, _index: usize, body: &str) {
        let mut shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
        let stdout = std::io::stdout();
        let mut out = stdout.lock();

        let written = match body.strip_prefix(shown.as_str()) {
            Some(rest) if !shown.is_empty() => out.write_all(rest.as_bytes()),
            _ if shown.is_empty() => out.write_all(body.as_bytes()),
            _ => writeln!(out).and_then(|_| out.write_all(body.as_bytes())),
        };
        if let Err(e) = written.and_then(|_| out.flush()) {
            debug!("Failed to draw message on stdout: error={}", e);
        }
        *shown = body.to_string();
    }
}

/// The terminal has no rendered notification; re-arrival is only logged.
pub struct TerminalEvents;

impl HostEvents for TerminalEvents {
    fn emit_message_received(&self, index: usize) {
        info!("Message ready for other observers: message_index={}", index);
    }

    fn emits_render_notifications(&self) -> bool {
        false
    }
}

pub struct TerminalStatus;

impl StatusSink for TerminalStatus {
    fn show_status(&self, status: &StatusUpdate) {
        if status.is_error() {
            eprintln!("[polisher] error: {}", status.message);
        } else {
            eprintln!("[polisher] {}", status.message);
        }
    }

    fn set_polishing(&self, active: bool) {
        debug!("Polishing state changed: active={}", active);
    }
}
