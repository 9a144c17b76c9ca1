//! Terminal front end: input commands and transcript rendering.

use shared::events::{SessionId, UiUpdate};
use shared::message::{Message, Role};
use shared::settings::MODEL_CHOICES;
use std::io::{self, Write};
use std::path::PathBuf;

pub const HELP: &str = "\
Type a message and press Enter to chat.
  /image PROMPT   generate an image
  /save PATH      save the last image (.png added if missing)
  /cancel         stop the running request
  /model ID       switch chat model
  /models         list known chat models
  /temp VALUE     sampling temperature (0.0 - 2.0)
  /help           show this help
  /quit           exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Image(String),
    Save(PathBuf),
    Cancel,
    Model(String),
    Models,
    Temperature(f32),
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Chat(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name {
        "image" => Command::Image(arg.to_string()),
        "save" if arg.is_empty() => Command::Invalid("usage: /save PATH".into()),
        "save" => Command::Save(PathBuf::from(arg)),
        "cancel" => Command::Cancel,
        "model" if arg.is_empty() => Command::Invalid("usage: /model ID".into()),
        "model" => Command::Model(arg.to_string()),
        "models" => Command::Models,
        "temp" => match arg.parse::<f32>() {
            Ok(value) if value.is_finite() => Command::Temperature(value),
            _ => Command::Invalid("usage: /temp VALUE (0.0 - 2.0)".into()),
        },
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command: /{}", other)),
    }
}

pub fn model_list() -> String {
    MODEL_CHOICES
        .iter()
        .map(|(id, name)| format!("  {:<16}{}", id, name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes the transcript as updates arrive. Streaming replies are printed
/// incrementally: only the part of the accumulated text not yet shown.
pub struct Printer<W: Write> {
    out: W,
    printed: Vec<(SessionId, usize)>,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: Vec::new(),
        }
    }

    pub fn history(&mut self, messages: &[Message]) -> io::Result<()> {
        for m in messages {
            writeln!(self.out, "{}: {}", m.role, m.content)?;
        }
        self.out.flush()
    }

    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }

    pub fn render(&mut self, update: &UiUpdate) -> io::Result<()> {
        match update {
            // The terminal already echoed what the user typed.
            UiUpdate::MessageAdded {
                role: Role::User, ..
            } => {}
            UiUpdate::MessageAdded { role, content } => {
                writeln!(self.out, "{}: {}", role, content)?
            }
            UiUpdate::StreamStarted { session } => {
                self.printed.push((*session, 0));
                write!(self.out, "assistant: ")?;
            }
            UiUpdate::StreamText { session, text } => {
                let Some(entry) = self.printed.iter_mut().find(|(id, _)| id == session) else {
                    return Ok(());
                };
                if let Some(fresh) = text.get(entry.1..) {
                    write!(self.out, "{}", fresh)?;
                }
                entry.1 = text.len();
            }
            UiUpdate::StreamFinished { session } => {
                if self.finish(*session) {
                    writeln!(self.out)?;
                }
            }
            UiUpdate::StreamAborted { session } => {
                if self.finish(*session) {
                    writeln!(self.out, " [interrupted]")?;
                }
            }
            UiUpdate::Status(message) => writeln!(self.out, "[status] {}", message)?,
            UiUpdate::ImageBusy(true) => writeln!(self.out, "[image] generating...")?,
            UiUpdate::ImageBusy(false) => {}
            UiUpdate::ImageReady(handle) => writeln!(
                self.out,
                "[image] {}x{} ready; /save PATH to export it",
                handle.width, handle.height
            )?,
        }
        self.out.flush()
    }

    fn finish(&mut self, session: SessionId) -> bool {
        match self.printed.iter().position(|(id, _)| *id == session) {
            Some(idx) => {
                self.printed.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("Hello\n"), Command::Chat("Hello".into()));
        assert_eq!(parse_command(""), Command::Chat(String::new()));
        assert_eq!(parse_command("/image a red cat"), Command::Image("a red cat".into()));
        assert_eq!(parse_command("/save out/pic"), Command::Save(PathBuf::from("out/pic")));
        assert_eq!(parse_command("/temp 1.5"), Command::Temperature(1.5));
        assert_eq!(parse_command("/model gpt-3.5-turbo"), Command::Model("gpt-3.5-turbo".into()));
        assert_eq!(parse_command("/cancel"), Command::Cancel);
        assert_eq!(parse_command("/exit"), Command::Quit);
    }

    #[test]
    fn test_parse_invalid_commands() {
        assert!(matches!(parse_command("/save"), Command::Invalid(_)));
        assert!(matches!(parse_command("/temp hot"), Command::Invalid(_)));
        assert!(matches!(parse_command("/temp NaN"), Command::Invalid(_)));
        assert!(matches!(parse_command("/dance"), Command::Invalid(_)));
    }

    #[test]
    fn test_printer_streams_only_new_text() {
        let mut printer = Printer::new(Vec::new());
        let session = SessionId::new();
        let updates = [
            UiUpdate::MessageAdded {
                role: Role::User,
                content: "Hello".into(),
            },
            UiUpdate::StreamStarted { session },
            UiUpdate::StreamText {
                session,
                text: "Hi".into(),
            },
            UiUpdate::StreamText {
                session,
                text: "Hi there".into(),
            },
            UiUpdate::StreamFinished { session },
            UiUpdate::status("done"),
        ];
        for update in &updates {
            printer.render(update).unwrap();
        }
        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(out, "assistant: Hi there\n[status] done\n");
    }

    #[test]
    fn test_printer_marks_interrupted_reply() {
        let mut printer = Printer::new(Vec::new());
        let session = SessionId::new();
        printer.render(&UiUpdate::StreamStarted { session }).unwrap();
        printer
            .render(&UiUpdate::StreamText {
                session,
                text: "par".into(),
            })
            .unwrap();
        printer.render(&UiUpdate::StreamAborted { session }).unwrap();
        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(out, "assistant: par [interrupted]\n");
    }

    #[test]
    fn test_model_list_mentions_choices() {
        let list = model_list();
        assert!(list.contains("gpt-4"));
        assert!(list.contains("GPT-3.5 Turbo"));
    }
}
