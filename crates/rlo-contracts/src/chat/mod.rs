mod command_registry;
mod controller;
mod intent_parser;
mod interpreter;
pub mod replies;
mod styles;
mod transcript;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use controller::{
    unix_epoch_millis, ChatController, ChatSnapshot, GenerationCompletion, GenerationJob,
    GenerationOutcome, SaveRequest, SubmitEffect,
};
pub use intent_parser::{parse_control, Control};
pub use interpreter::{route_submission, Route, DOWNLOAD_PREVIOUS_IMAGE_COMMAND};
pub use styles::{compose_prompt, Style, StyleSelector};
pub use transcript::{DisplayMode, Message, MessageAction, Resolution, Sender, Transcript};
