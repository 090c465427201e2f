use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, IMAGE_ARG_COMMANDS, INDEX_ARG_COMMANDS, NO_ARG_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn parse_index_arg(arg: &str) -> Value {
    arg.split_whitespace()
        .next()
        .and_then(|token| token.parse::<u64>().ok())
        .map(|index| Value::Number(index.into()))
        .unwrap_or(Value::Null)
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, IMAGE_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "image".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, INDEX_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("index".to_string(), parse_index_arg(arg));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("edit", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::parse_intent;

    #[test]
    fn plain_text_is_an_edit_prompt() {
        let intent = parse_intent("  give the cat a tiny hat  ");
        assert_eq!(intent.action, "edit");
        assert_eq!(intent.prompt.as_deref(), Some("give the cat a tiny hat"));
    }

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_image_with_quoted_path() {
        let intent = parse_intent("/image \"/tmp/my photo.png\"");
        assert_eq!(intent.action, "add_image");
        assert_eq!(intent.command_args["image"], json!("/tmp/my photo.png"));

        let alias = parse_intent("/use https://example.com/a.png");
        assert_eq!(alias.action, "add_image");
        assert_eq!(alias.command_args["image"], json!("https://example.com/a.png"));
    }

    #[test]
    fn parse_undo_index() {
        let intent = parse_intent("/undo 4");
        assert_eq!(intent.action, "undo");
        assert_eq!(intent.command_args["index"], json!(4));

        let missing = parse_intent("/undo");
        assert_eq!(missing.command_args["index"], Value::Null);

        let garbage = parse_intent("/undo last");
        assert_eq!(garbage.command_args["index"], Value::Null);
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/restart").action, "start_over");
        assert_eq!(parse_intent("/start_over").action, "start_over");
        assert_eq!(parse_intent("/HISTORY").action, "history");
        assert_eq!(parse_intent("/current").action, "current");
        assert_eq!(parse_intent("/help").action, "help");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn lone_slash_is_an_edit_prompt() {
        let intent = parse_intent("/ ");
        assert_eq!(intent.action, "edit");
    }
}
