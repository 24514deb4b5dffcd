use super::command_registry::{CommandSpec, ControlAction, NO_ARG_COMMANDS, STYLE_COMMAND};
use super::styles::Style;

/// Terminal controls standing in for the interface's buttons. Anything that
/// is not a control is a chat submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Help,
    Quit,
    TogglePicker,
    SelectStyle(Style),
    UnknownStyle(String),
    Unknown(String),
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<ControlAction> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

pub fn parse_control(text: &str) -> Option<Control> {
    let raw_trimmed = text.trim();
    let slash_tail = raw_trimmed.strip_prefix('/')?;
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return None;
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if command == STYLE_COMMAND.command {
        if arg.is_empty() {
            return Some(Control::TogglePicker);
        }
        return Some(match Style::from_picker_input(arg) {
            Some(style) => Control::SelectStyle(style),
            None => Control::UnknownStyle(arg.to_string()),
        });
    }

    match find_action(&command, NO_ARG_COMMANDS) {
        Some(ControlAction::Help) => Some(Control::Help),
        Some(ControlAction::Quit) => Some(Control::Quit),
        Some(ControlAction::Style) | None => Some(Control::Unknown(command)),
    }
}
