use std::collections::HashMap;

use rlo_contracts::chat::{ChatSnapshot, DisplayMode, Message, Sender, Style};
use rlo_contracts::images::ImagePayload;

#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    shown: HashMap<u64, bool>,
}

impl TranscriptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &ChatSnapshot) -> Vec<String> {
        let mut lines = Vec::new();
        for message in &snapshot.messages {
            let finalized = message.is_finalized();
            match self.shown.get(&message.id) {
                Some(true) => continue,
                Some(false) if !finalized => continue,
                _ => {}
            }
            lines.extend(format_message(message));
            self.shown.insert(message.id, finalized);
        }
        lines
    }
}

fn sender_label(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "أنت",
        Sender::Bot => "RLO",
    }
}

fn format_message(message: &Message) -> Vec<String> {
    let who = sender_label(message.sender);
    let mut lines = vec![match message.display() {
        DisplayMode::Loading => format!("{who}: … جارٍ إنشاء الصورة"),
        DisplayMode::Image(url) => format!("{who}: {}", describe_image(url)),
        DisplayMode::Error(error) => format!("{who}: ⚠ {error}"),
        DisplayMode::Text(text) => format!("{who}: {text}"),
    }];
    if let Some(action) = message.action.as_ref() {
        lines.push(format!("     ↗ {}: {}", action.text, action.url));
    }
    lines
}

fn describe_image(url: &str) -> String {
    match ImagePayload::from_data_url(url) {
        Ok(payload) => format!(
            "[صورة {} · {}]",
            payload.mime_type,
            format_size(payload.data.len() / 4 * 3)
        ),
        Err(_) => "[صورة]".to_string(),
    }
}

fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        return format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0));
    }
    if bytes >= 1024 {
        return format!("{:.1} KB", bytes as f64 / 1024.0);
    }
    format!("{bytes} B")
}

pub fn picker_lines(selected: Style) -> Vec<String> {
    let mut lines = vec!["اختر النمط (رقم أو اسم):".to_string()];
    for (idx, style) in Style::ALL.iter().enumerate() {
        let marker = if *style == selected { "●" } else { " " };
        lines.push(format!(
            "  {marker} {:>2}. {} ({})",
            idx + 1,
            style.label(),
            style.display_name()
        ));
    }
    lines
}
