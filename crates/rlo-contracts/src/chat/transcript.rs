use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAction {
    pub text: String,
    pub url: String,
}

/// One row of the chat transcript.
///
/// Exactly one of `text`, `image_url`, `error` or `is_loading` is the active
/// display mode. Placeholders are the only messages that ever change, and they
/// change once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub sender: Sender,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub action: Option<MessageAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode<'a> {
    Loading,
    Image(&'a str),
    Error(&'a str),
    Text(&'a str),
}

impl Message {
    fn empty(id: u64, sender: Sender) -> Self {
        Self {
            id,
            sender,
            text: None,
            image_url: None,
            is_loading: false,
            error: None,
            action: None,
        }
    }

    pub fn user_text(id: u64, text: impl Into<String>) -> Self {
        let mut message = Self::empty(id, Sender::User);
        message.text = Some(text.into());
        message
    }

    pub fn bot_text(id: u64, text: impl Into<String>) -> Self {
        let mut message = Self::empty(id, Sender::Bot);
        message.text = Some(text.into());
        message
    }

    pub fn bot_placeholder(id: u64) -> Self {
        let mut message = Self::empty(id, Sender::Bot);
        message.is_loading = true;
        message
    }

    pub fn with_action(mut self, text: impl Into<String>, url: impl Into<String>) -> Self {
        self.action = Some(MessageAction {
            text: text.into(),
            url: url.into(),
        });
        self
    }

    pub fn display(&self) -> DisplayMode<'_> {
        if self.is_loading {
            return DisplayMode::Loading;
        }
        if let Some(url) = self.image_url.as_deref() {
            return DisplayMode::Image(url);
        }
        if let Some(error) = self.error.as_deref() {
            return DisplayMode::Error(error);
        }
        DisplayMode::Text(self.text.as_deref().unwrap_or(""))
    }

    pub fn is_finalized(&self) -> bool {
        !self.is_loading
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Image(String),
    Error(String),
}

/// Ordered, append-only message list.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    last_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id derived from `now_ms`, strictly greater than any
    /// previously allocated id.
    pub fn next_id(&mut self, now_ms: u64) -> u64 {
        let id = now_ms.max(self.last_id.saturating_add(1));
        self.last_id = id;
        id
    }

    pub fn push(&mut self, message: Message) -> anyhow::Result<()> {
        if let Some(last) = self.messages.last() {
            if message.id <= last.id {
                bail!(
                    "message id {} does not follow transcript tail {}",
                    message.id,
                    last.id
                );
            }
        }
        self.last_id = self.last_id.max(message.id);
        self.messages.push(message);
        Ok(())
    }

    /// Settles a pending placeholder in place. Finalized or unknown ids are
    /// rejected and the transcript is left untouched.
    pub fn resolve(&mut self, id: u64, resolution: Resolution) -> anyhow::Result<()> {
        let Some(message) = self.messages.iter_mut().find(|message| message.id == id) else {
            bail!("no message with id {id}");
        };
        if !message.is_loading {
            bail!("message {id} is already finalized");
        }
        match resolution {
            Resolution::Image(url) => {
                if url.is_empty() {
                    bail!("cannot resolve message {id} with an empty image url");
                }
                message.image_url = Some(url);
                message.error = None;
            }
            Resolution::Error(error) => {
                if error.is_empty() {
                    bail!("cannot resolve message {id} with an empty error");
                }
                message.error = Some(error);
                message.image_url = None;
            }
        }
        message.is_loading = false;
        Ok(())
    }

    pub fn latest_image(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.image_url.is_some())
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.as_slice()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
