//! User-facing status messages, written to `product.json`.

use crate::error::{MaxfilterError, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Warning,
    Info,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub msg: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductLog {
    #[serde(rename = "brainlife")]
    messages: Vec<ProductMessage>,
}

impl ProductLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: MessageKind, msg: impl Into<String>) {
        self.messages.push(ProductMessage {
            kind,
            msg: msg.into(),
        });
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("{}", msg);
        self.push(MessageKind::Warning, msg);
    }

    pub fn success(&mut self, msg: impl Into<String>) {
        self.push(MessageKind::Success, msg);
    }

    pub fn messages(&self) -> &[ProductMessage] {
        &self.messages
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| MaxfilterError::write(path, e))?;
        std::fs::write(path, json + "\n").map_err(|e| MaxfilterError::write(path, e))
    }
}
