use serde::Serialize;

use super::interpreter::{route_submission, Route};
use super::replies;
use super::styles::{Style, StyleSelector};
use super::transcript::{Message, Resolution, Transcript};
use crate::images::ImagePayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Image(ImagePayload),
    Failed(String),
}

/// Work handed to the generation worker for one pending placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub message_id: u64,
    pub text: String,
    pub style: Style,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationCompletion {
    pub message_id: u64,
    pub outcome: GenerationOutcome,
}

/// Local file save of a previously generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub source_message_id: u64,
    pub image_url: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitEffect {
    Ignored,
    Appended,
    Save(SaveRequest),
    Generate(GenerationJob),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub style: Style,
    pub picker_open: bool,
    pub in_flight: bool,
}

impl ChatSnapshot {
    pub fn input_enabled(&self) -> bool {
        !self.in_flight
    }
}

/// Owns the transcript, style selection and in-flight flag. All state changes
/// go through `submit`, `complete` and the style operations.
#[derive(Debug, Clone)]
pub struct ChatController {
    transcript: Transcript,
    styles: StyleSelector,
    in_flight: bool,
    support_url: String,
    clock: fn() -> u64,
}

impl ChatController {
    pub fn new(style: Style, support_url: impl Into<String>) -> Self {
        Self {
            transcript: Transcript::new(),
            styles: StyleSelector::new(style),
            in_flight: false,
            support_url: support_url.into(),
            clock: unix_epoch_millis,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn style(&self) -> Style {
        self.styles.selected()
    }

    pub fn picker_open(&self) -> bool {
        self.styles.picker_open()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            messages: self.transcript.messages().to_vec(),
            style: self.styles.selected(),
            picker_open: self.styles.picker_open(),
            in_flight: self.in_flight,
        }
    }

    pub fn toggle_picker(&mut self) {
        self.styles.toggle_picker();
    }

    pub fn select_style(&mut self, style: Style) {
        self.styles.select(style);
    }

    pub fn dismiss_picker(&mut self) {
        self.styles.dismiss();
    }

    pub fn submit(&mut self, raw: &str) -> anyhow::Result<SubmitEffect> {
        match route_submission(raw, self.styles.selected(), self.in_flight) {
            Route::Ignore => Ok(SubmitEffect::Ignored),
            Route::DownloadPreviousImage => self.download_previous_image(),
            Route::Support { text } => {
                let user_id = self.next_id();
                self.transcript.push(Message::user_text(user_id, text))?;
                let bot_id = self.next_id();
                self.transcript.push(
                    Message::bot_text(bot_id, replies::SUPPORT_REPLY)
                        .with_action(replies::SUPPORT_ACTION_TEXT, self.support_url.clone()),
                )?;
                Ok(SubmitEffect::Appended)
            }
            Route::Generate { text } => {
                let user_id = self.next_id();
                self.transcript
                    .push(Message::user_text(user_id, text.clone()))?;
                let bot_id = self.next_id();
                self.transcript.push(Message::bot_placeholder(bot_id))?;
                self.in_flight = true;
                Ok(SubmitEffect::Generate(GenerationJob {
                    message_id: bot_id,
                    text,
                    style: self.styles.selected(),
                }))
            }
        }
    }

    /// Single resolution point for a dispatched job. The in-flight flag is
    /// cleared before the placeholder is touched, so a rejected resolution
    /// still leaves the session interactive.
    pub fn complete(&mut self, completion: GenerationCompletion) -> anyhow::Result<()> {
        self.in_flight = false;
        let resolution = match completion.outcome {
            GenerationOutcome::Image(payload) => Resolution::Image(payload.to_data_url()),
            GenerationOutcome::Failed(reason) if reason.trim().is_empty() => {
                Resolution::Error(replies::GENERATION_FAILED.to_string())
            }
            GenerationOutcome::Failed(reason) => Resolution::Error(reason),
        };
        self.transcript.resolve(completion.message_id, resolution)
    }

    fn download_previous_image(&mut self) -> anyhow::Result<SubmitEffect> {
        let latest = self.transcript.latest_image().and_then(|message| {
            message
                .image_url
                .clone()
                .map(|image_url| (message.id, image_url))
        });
        let Some((source_message_id, image_url)) = latest else {
            let bot_id = self.next_id();
            self.transcript
                .push(Message::bot_text(bot_id, replies::NO_PREVIOUS_IMAGE))?;
            return Ok(SubmitEffect::Appended);
        };
        Ok(SubmitEffect::Save(SaveRequest {
            source_message_id,
            image_url,
            file_name: format!("rlo-image-{}.png", (self.clock)()),
        }))
    }

    fn next_id(&mut self) -> u64 {
        let now = (self.clock)();
        self.transcript.next_id(now)
    }
}

pub fn unix_epoch_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
