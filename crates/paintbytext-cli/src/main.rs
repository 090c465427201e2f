use std::io::{self, ErrorKind, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use paintbytext_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use paintbytext_contracts::predictions::ImageRef;
use paintbytext_contracts::session::EditStep;
use paintbytext_engine::{
    load_image_ref, EditSession, HttpPredictionsApi, PollConfig, PredictionsApi, Sleeper,
    DEFAULT_SERVER_URL,
};
use paintbytext_server::{run_server, AppState, ServerConfig};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "paintbytext",
    version,
    about = "Edit images by describing changes in plain language"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the prediction proxy.
    Serve(ServeArgs),
    /// Start an interactive edit session.
    Edit(EditArgs),
    /// Apply a single edit and print the resulting image.
    Run(RunArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct PollArgs {
    #[arg(long, env = "PAINTBYTEXT_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,
    #[arg(long, default_value_t = 0)]
    fetch_retries: u32,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl PollArgs {
    fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            fetch_retries: self.fetch_retries,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Parser)]
struct EditArgs {
    /// Seed image: a URL, a data URL or a local file.
    #[arg(long)]
    image: String,
    /// Prompt suggested for the first edit.
    #[arg(long, default_value = "")]
    prompt: String,
    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    image: String,
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    poll: PollArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("paintbytext error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            init_tracing("info");
            run_serve(args)?;
            Ok(0)
        }
        Command::Edit(args) => {
            init_tracing("warn");
            run_edit_session(args)?;
            Ok(0)
        }
        Command::Run(args) => {
            init_tracing("warn");
            run_single_edit(args)
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(api_base) = args.api_base {
        config.api_base = api_base.trim().trim_end_matches('/').to_string();
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    let bind = config.bind.clone();
    let state = AppState::replicate(config).context("failed to set up provider client")?;
    actix_web::rt::System::new()
        .block_on(run_server(state))
        .with_context(|| format!("proxy server failed ({bind})"))
}

fn run_single_edit(args: RunArgs) -> Result<i32> {
    let seed = load_image_ref(&args.image).context("invalid --image")?;
    let mut session = EditSession::new(HttpPredictionsApi::new(&args.poll.server), seed, "");
    session.set_poll_config(args.poll.poll_config());
    match session.submit(&args.prompt) {
        Ok(image) => {
            println!("{image}");
            Ok(0)
        }
        Err(err) => {
            eprintln!("Edit failed: {err}");
            Ok(1)
        }
    }
}

fn run_edit_session(args: EditArgs) -> Result<()> {
    let seed = load_image_ref(&args.image).context("invalid --image")?;
    let mut session = EditSession::new(
        HttpPredictionsApi::new(&args.poll.server),
        seed,
        args.prompt.clone(),
    );
    session.set_poll_config(args.poll.poll_config());

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Paint by Text session started. Type /help for commands.");
    println!("Image: {}", display_image(session.current_image()));
    print_pending_prompt(&session);

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "help" => {
                println!("Type an instruction to edit the current image.");
                println!("An empty line submits the suggested or restored prompt.");
                println!("Commands: {}", CHAT_HELP_COMMANDS.join("  "));
            }
            "noop" | "edit" => {
                let Some(prompt) = prompt_to_submit(&intent, session.pending_prompt()) else {
                    continue;
                };
                println!("Editing...");
                match session.submit(&prompt) {
                    Ok(image) => println!("Result: {}", display_image(Some(&image))),
                    Err(err) => {
                        println!("Error: {err}");
                        print_pending_prompt(&session);
                    }
                }
            }
            "add_image" => {
                let raw = value_as_non_empty_string(intent.command_args.get("image"));
                let Some(raw) = raw else {
                    println!("/image requires a URL or a file path");
                    continue;
                };
                match load_image_ref(&raw).and_then(|image| session.add_image(image)) {
                    Ok(()) => println!("Image: {}", display_image(session.current_image())),
                    Err(err) => println!("Error: {err}"),
                }
            }
            "undo" => {
                let Some(index) = intent
                    .command_args
                    .get("index")
                    .and_then(Value::as_u64)
                    .and_then(|index| usize::try_from(index).ok())
                else {
                    println!("/undo requires a step number (see /history)");
                    continue;
                };
                match session.undo(index) {
                    Ok(()) => {
                        println!("Image: {}", display_image(session.current_image()));
                        print_pending_prompt(&session);
                    }
                    Err(err) => println!("Error: {err}"),
                }
            }
            "start_over" => {
                session.start_over();
                println!("Started over.");
                println!("Image: {}", display_image(session.current_image()));
                print_pending_prompt(&session);
            }
            "history" => print_history(session.history().steps()),
            "current" => match session.current_image() {
                Some(image) => println!("{image}"),
                None => println!("No image yet."),
            },
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            other => println!("Unsupported action: {other}"),
        }
    }
    Ok(())
}

/// Typed text for an edit; on an empty line, the pending prompt if any.
fn prompt_to_submit(intent: &Intent, pending: &str) -> Option<String> {
    match intent.action.as_str() {
        "edit" => intent.prompt.clone(),
        "noop" => Some(pending.trim())
            .filter(|pending| !pending.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn prompt_hint(first_prompt: bool, pending: &str) -> Option<String> {
    match (first_prompt, pending.is_empty()) {
        (true, false) => Some(format!(
            "Suggested prompt: {pending} (press Enter to use it)"
        )),
        (false, false) => Some(format!(
            "Restored prompt: {pending} (press Enter to resubmit)"
        )),
        (true, true) => Some("Describe a change to make to the image.".to_string()),
        (false, true) => None,
    }
}

fn print_pending_prompt<A: PredictionsApi, S: Sleeper>(session: &EditSession<A, S>) {
    if let Some(hint) = prompt_hint(session.is_first_prompt(), session.pending_prompt()) {
        println!("{hint}");
    }
}

fn print_history(steps: &[EditStep]) {
    for (index, step) in steps.iter().enumerate() {
        if let Some(prompt) = step.prompt.as_deref() {
            println!("[{index}] prompt: {prompt}");
        }
        if let Some(image) = step.image.as_ref() {
            println!("[{index}] image: {}", display_image(Some(image)));
        }
    }
}

fn display_image(image: Option<&ImageRef>) -> String {
    image
        .map(ImageRef::summary)
        .unwrap_or_else(|| "(none)".to_string())
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use serde_json::json;

    use super::*;

    #[test]
    fn run_args_map_to_poll_config() {
        let cli = Cli::try_parse_from([
            "paintbytext",
            "run",
            "--image",
            "https://example.com/cat.png",
            "--prompt",
            "add a hat",
            "--poll-interval-ms",
            "250",
            "--fetch-retries",
            "2",
            "--timeout-secs",
            "90",
        ])
        .expect("valid arguments");
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(
            args.poll.poll_config(),
            PollConfig {
                interval: Duration::from_millis(250),
                fetch_retries: 2,
                timeout: Some(Duration::from_secs(90)),
            }
        );
    }

    #[test]
    fn edit_defaults_match_poll_defaults() {
        let cli = Cli::try_parse_from(["paintbytext", "edit", "--image", "seed.png"])
            .expect("valid arguments");
        let Command::Edit(args) = cli.command else {
            panic!("expected edit command");
        };
        assert_eq!(args.prompt, "");
        assert_eq!(args.poll.poll_config(), PollConfig::default());
    }

    #[test]
    fn edit_requires_a_seed_image() {
        assert!(Cli::try_parse_from(["paintbytext", "edit"]).is_err());
        assert!(Cli::try_parse_from(["paintbytext", "edit", "--prompt", "a cat"]).is_err());
    }

    #[test]
    fn empty_line_resubmits_pending_prompt() {
        assert_eq!(
            prompt_to_submit(&parse_intent(""), "make it night"),
            Some("make it night".to_string())
        );
        assert_eq!(prompt_to_submit(&parse_intent("   "), ""), None);
        assert_eq!(
            prompt_to_submit(&parse_intent("add a hat"), "make it night"),
            Some("add a hat".to_string())
        );
        assert_eq!(prompt_to_submit(&parse_intent("/history"), "make it night"), None);
    }

    #[test]
    fn prompt_hint_depends_on_first_prompt() {
        assert_eq!(
            prompt_hint(true, "a cat on a sofa"),
            Some("Suggested prompt: a cat on a sofa (press Enter to use it)".to_string())
        );
        assert_eq!(
            prompt_hint(false, "add a hat"),
            Some("Restored prompt: add a hat (press Enter to resubmit)".to_string())
        );
        assert_eq!(
            prompt_hint(true, ""),
            Some("Describe a change to make to the image.".to_string())
        );
        assert_eq!(prompt_hint(false, ""), None);
    }

    #[test]
    fn display_image_summarises_inline_payloads() {
        assert_eq!(display_image(None), "(none)");
        assert_eq!(
            display_image(Some(&ImageRef::from("https://example.com/a.png"))),
            "https://example.com/a.png"
        );
        assert_eq!(
            display_image(Some(&ImageRef::from("data:image/png;base64,AAAA"))),
            "data:image/png;base64,<26 bytes>"
        );
    }

    #[test]
    fn non_empty_string_values_are_trimmed() {
        assert_eq!(
            value_as_non_empty_string(Some(&json!("  a.png "))),
            Some("a.png".to_string())
        );
        assert_eq!(value_as_non_empty_string(Some(&json!("   "))), None);
        assert_eq!(value_as_non_empty_string(Some(&json!(3))), None);
        assert_eq!(value_as_non_empty_string(None), None);
    }
}
