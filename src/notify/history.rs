use std::collections::{HashMap, VecDeque};

use crate::device::constants::LOG_PAYLOAD_PREVIEW;

pub fn hex_preview(payload: &[u8]) -> String {
    payload
        .iter()
        .take(LOG_PAYLOAD_PREVIEW)
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `[<tag> <subject>] AA BB (len=2)`, with an ellipsis when the payload was cut short.
pub fn payload_line(tag: &str, subject: &str, payload: &[u8]) -> String {
    let ellipsis = if payload.len() > LOG_PAYLOAD_PREVIEW { " …" } else { "" };
    format!("[{} {}] {}{} (len={})", tag, subject, hex_preview(payload), ellipsis, payload.len())
}

/// Bounded history of log lines per characteristic. Lines that belong to no characteristic are
/// kept under `None`.
#[derive(Debug)]
pub struct CharacteristicLog {
    capacity: usize,
    lines: HashMap<Option<String>, VecDeque<String>>,
}

impl CharacteristicLog {
    pub fn new(capacity: usize) -> Self {
        CharacteristicLog { capacity: capacity.max(1), lines: HashMap::new() }
    }

    pub fn append(&mut self, uuid: Option<&str>, line: String) {
        let lines = self.lines.entry(uuid.map(str::to_string)).or_default();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self, uuid: Option<&str>) -> Vec<String> {
        self.lines
            .get(&uuid.map(str::to_string))
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}
