use std::env;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rlo_contracts::chat::{
    parse_control, replies, unix_epoch_millis, ChatController, Control, GenerationCompletion,
    GenerationJob, GenerationOutcome, SaveRequest, Style, SubmitEffect, CHAT_HELP_COMMANDS,
    DOWNLOAD_PREVIOUS_IMAGE_COMMAND,
};
use rlo_contracts::events::{ChatEvent, EventWriter};
use rlo_engine::{save_image, spawn_generation, GenerationClient};

mod render;

use render::{picker_lines, TranscriptRenderer};

#[derive(Debug, Parser)]
#[command(name = "rlo", version, about = "Arabic text-to-image chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Generate(GenerateArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long, default_value = "Natural")]
    style: String,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long, default_value = "Natural")]
    style: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("rlo error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
    }
}

#[derive(Debug)]
enum UiEvent {
    Input(String),
    InputClosed,
    Generated(GenerationCompletion),
}

impl From<GenerationCompletion> for UiEvent {
    fn from(completion: GenerationCompletion) -> Self {
        UiEvent::Generated(completion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let style = parse_style_arg(&args.style)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::for_new_session(&events_path);
    let client = Arc::new(
        GenerationClient::gemini_from_env(args.image_model.clone()).with_events(events.clone()),
    );

    let (tx, rx) = mpsc::channel::<UiEvent>();
    spawn_input_reader(tx.clone())?;

    let controller = ChatController::new(style, support_url());
    let mut session = ChatSession::new(controller, client, events, &args.out, tx, io::stdout());
    session.start()?;
    while let Ok(event) = rx.recv() {
        if session.handle(event)? == Flow::Quit {
            break;
        }
    }
    session.finish()
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let style = parse_style_arg(&args.style)?;
    if style.is_support() {
        bail!("the {} style does not generate images", style.label());
    }
    let prompt = args.prompt.trim();
    if prompt.is_empty() {
        bail!("--prompt must not be empty");
    }
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::for_new_session(&events_path);
    let client =
        GenerationClient::gemini_from_env(args.image_model.clone()).with_events(events.clone());

    match client.generate(None, prompt, style) {
        GenerationOutcome::Image(payload) => {
            let file_name = image_file_name(unix_epoch_millis());
            let saved = save_image(&payload.to_data_url(), &args.out, &file_name)?;
            events.record_quiet(ChatEvent::ImageSaved {
                message_id: None,
                path: saved.path.to_string_lossy().to_string(),
                width: saved.width,
                height: saved.height,
                reencoded: saved.reencoded,
            });
            println!("Saved {}", saved.path.display());
            Ok(0)
        }
        GenerationOutcome::Failed(reason) => {
            eprintln!("{reason}");
            Ok(2)
        }
    }
}

struct ChatSession<W: Write> {
    controller: ChatController,
    client: Arc<GenerationClient>,
    events: EventWriter,
    out_dir: PathBuf,
    tx: mpsc::Sender<UiEvent>,
    renderer: TranscriptRenderer,
    output: W,
    input_closed: bool,
}

impl<W: Write> ChatSession<W> {
    fn new(
        controller: ChatController,
        client: Arc<GenerationClient>,
        events: EventWriter,
        out_dir: &Path,
        tx: mpsc::Sender<UiEvent>,
        output: W,
    ) -> Self {
        Self {
            controller,
            client,
            events,
            out_dir: out_dir.to_path_buf(),
            tx,
            renderer: TranscriptRenderer::new(),
            output,
            input_closed: false,
        }
    }

    fn start(&mut self) -> Result<()> {
        self.events.record(&ChatEvent::SessionStarted {
            out_dir: self.out_dir.to_string_lossy().to_string(),
            provider: self.client.provider_name().to_string(),
            model: self.client.model().to_string(),
            style: self.controller.style(),
        })?;
        writeln!(
            self.output,
            "RLO chat started ({}). Type /help for commands.",
            self.client.model()
        )?;
        self.prompt()
    }

    fn finish(&mut self) -> Result<()> {
        self.events.record_quiet(ChatEvent::SessionFinished {
            messages: self.controller.transcript().len(),
        });
        Ok(())
    }

    fn handle(&mut self, event: UiEvent) -> Result<Flow> {
        let flow = match event {
            UiEvent::Input(line) => self.handle_line(&line)?,
            UiEvent::InputClosed => {
                self.input_closed = true;
                if self.controller.in_flight() {
                    Flow::Continue
                } else {
                    Flow::Quit
                }
            }
            UiEvent::Generated(completion) => {
                self.complete(completion);
                if self.input_closed {
                    Flow::Quit
                } else {
                    Flow::Continue
                }
            }
        };
        self.flush_render()?;
        if flow == Flow::Continue && !self.input_closed {
            self.prompt()?;
        }
        Ok(flow)
    }

    fn handle_line(&mut self, line: &str) -> Result<Flow> {
        if self.controller.picker_open() {
            if let Some(style) = Style::from_picker_input(line) {
                self.select_style(style)?;
                return Ok(Flow::Continue);
            }
            let control = parse_control(line);
            if !matches!(control, Some(Control::TogglePicker)) {
                self.controller.dismiss_picker();
            }
            match control {
                Some(control) => return self.handle_control(control),
                None => {
                    writeln!(self.output, "Style picker closed; input was not sent.")?;
                    return Ok(Flow::Continue);
                }
            }
        }

        if let Some(control) = parse_control(line) {
            return self.handle_control(control);
        }

        match self.controller.submit(line)? {
            SubmitEffect::Ignored => {
                if self.controller.in_flight() && !line.trim().is_empty() {
                    writeln!(self.output, "A request is already in progress.")?;
                }
            }
            SubmitEffect::Appended => {}
            SubmitEffect::Save(request) => self.save(request)?,
            SubmitEffect::Generate(job) => self.dispatch(job),
        }
        Ok(Flow::Continue)
    }

    fn handle_control(&mut self, control: Control) -> Result<Flow> {
        match control {
            Control::Help => {
                writeln!(self.output, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?;
                writeln!(
                    self.output,
                    "Type \"{DOWNLOAD_PREVIOUS_IMAGE_COMMAND}\" to save the last image."
                )?;
            }
            Control::Quit => return Ok(Flow::Quit),
            Control::TogglePicker => {
                self.controller.toggle_picker();
                if self.controller.picker_open() {
                    for line in picker_lines(self.controller.style()) {
                        writeln!(self.output, "{line}")?;
                    }
                } else {
                    writeln!(self.output, "Style picker closed.")?;
                }
            }
            Control::SelectStyle(style) => self.select_style(style)?,
            Control::UnknownStyle(raw) => {
                writeln!(self.output, "Unknown style: {raw}")?;
            }
            Control::Unknown(command) => {
                writeln!(self.output, "Unknown command: /{command}")?;
            }
        }
        Ok(Flow::Continue)
    }

    fn select_style(&mut self, style: Style) -> Result<()> {
        self.controller.select_style(style);
        self.events.record_quiet(ChatEvent::StyleSelected { style });
        writeln!(
            self.output,
            "Style set to {} ({})",
            style.label(),
            style.display_name()
        )?;
        Ok(())
    }

    fn save(&mut self, request: SaveRequest) -> Result<()> {
        match save_image(&request.image_url, &self.out_dir, &request.file_name) {
            Ok(saved) => {
                self.events.record_quiet(ChatEvent::ImageSaved {
                    message_id: Some(request.source_message_id),
                    path: saved.path.to_string_lossy().to_string(),
                    width: saved.width,
                    height: saved.height,
                    reencoded: saved.reencoded,
                });
                writeln!(self.output, "Saved {}", saved.path.display())?;
            }
            Err(err) => {
                self.events.record_quiet(ChatEvent::ImageSaveFailed {
                    message_id: request.source_message_id,
                    file_name: request.file_name.clone(),
                    error: format!("{err:#}"),
                });
                eprintln!("rlo warning: failed to save image: {err:#}");
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, job: GenerationJob) {
        self.events.record_quiet(ChatEvent::GenerationDispatched {
            message_id: job.message_id,
            style: job.style,
            model: self.client.model().to_string(),
        });
        let (message_id, style) = (job.message_id, job.style);
        if let Err(err) = spawn_generation(self.client.clone(), job, self.tx.clone()) {
            self.events.record_quiet(ChatEvent::GenerationFailed {
                message_id: Some(message_id),
                model: self.client.model().to_string(),
                style,
                latency_s: None,
                error: format!("{err:#}"),
            });
            self.complete(GenerationCompletion {
                message_id,
                outcome: GenerationOutcome::Failed(replies::GENERATION_FAILED.to_string()),
            });
        }
    }

    fn complete(&mut self, completion: GenerationCompletion) {
        let message_id = completion.message_id;
        if let Err(err) = self.controller.complete(completion) {
            eprintln!("rlo warning: dropped completion for message {message_id}: {err:#}");
        }
    }

    fn flush_render(&mut self) -> Result<()> {
        for line in self.renderer.render(&self.controller.snapshot()) {
            writeln!(self.output, "{line}")?;
        }
        Ok(())
    }

    fn prompt(&mut self) -> Result<()> {
        let snapshot = self.controller.snapshot();
        let marker = if snapshot.input_enabled() { ">" } else { "…" };
        write!(self.output, "[{}] {marker} ", snapshot.style.label())?;
        self.output.flush()?;
        Ok(())
    }
}

fn spawn_input_reader(tx: mpsc::Sender<UiEvent>) -> Result<()> {
    thread::Builder::new()
        .name("rlo-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let input = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(UiEvent::Input(input)).is_err() {
                            return;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        eprintln!("rlo warning: stdin read failed: {err}");
                        break;
                    }
                }
            }
            let _ = tx.send(UiEvent::InputClosed);
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

fn parse_style_arg(raw: &str) -> Result<Style> {
    match Style::from_label(raw) {
        Some(style) => Ok(style),
        None => bail!(
            "unknown style '{raw}' (expected one of: {})",
            Style::ALL
                .iter()
                .map(|style| style.label())
                .collect::<Vec<&str>>()
                .join(", ")
        ),
    }
}

fn support_url() -> String {
    non_empty_env("RLO_SUPPORT_URL").unwrap_or_else(|| replies::DEFAULT_SUPPORT_URL.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn image_file_name(stamp: u64) -> String {
    format!("rlo-image-{stamp}.png")
}
