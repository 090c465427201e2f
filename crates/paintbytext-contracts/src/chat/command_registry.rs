#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const IMAGE_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "image",
        action: "add_image",
    },
    CommandSpec {
        command: "use",
        action: "add_image",
    },
];

pub(crate) const INDEX_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "undo",
    action: "undo",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "restart",
        action: "start_over",
    },
    CommandSpec {
        command: "start_over",
        action: "start_over",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "current",
        action: "current",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/undo <step>",
    "/image <url|path>",
    "/restart",
    "/history",
    "/current",
    "/help",
];
