#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: ControlAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlAction {
    Help,
    Quit,
    Style,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: ControlAction::Help,
    },
    CommandSpec {
        command: "quit",
        action: ControlAction::Quit,
    },
    CommandSpec {
        command: "exit",
        action: ControlAction::Quit,
    },
];

pub(crate) const STYLE_COMMAND: CommandSpec = CommandSpec {
    command: "style",
    action: ControlAction::Style,
};

pub const CHAT_HELP_COMMANDS: &[&str] = &["/style", "/style <label>", "/help", "/quit"];
