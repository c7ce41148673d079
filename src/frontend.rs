//! # Front end
//!
//! The chat engine never draws anything itself. It talks to a [`ChatFrontend`], a small
//! capability interface for showing messages, streaming a reply chunk by chunk, and
//! reading the next line of user input.
//!
//! [`TerminalFrontend`] is the interactive implementation: `crossterm` colours on any
//! `Write` sink (stdout in the binary) and line input from any `BufRead` source (stdin).

use std::io::{self, BufRead, Write};

use crossterm::{
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};

use crate::error::Result;
use crate::session::{Message, Role};

/// Presentation capability used by the chat engine.
pub trait ChatFrontend: Send {
    /// Render a complete message.
    fn display_message(&mut self, message: &Message) -> Result<()>;

    /// Append `chunk` to the message currently being streamed for `role`.
    fn stream_message(&mut self, role: Role, chunk: &str) -> Result<()>;

    /// Finish the message started by [`stream_message`](Self::stream_message).
    fn end_stream(&mut self) -> Result<()>;

    /// Informational line (command output, warnings about durability).
    fn display_notice(&mut self, notice: &str) -> Result<()>;

    /// A visible failure of the current turn.
    fn display_error(&mut self, error: &str) -> Result<()>;

    /// Next line of input, or `None` at end of input.
    fn get_user_input(&mut self) -> Result<Option<String>>;
}

fn role_color(role: Role) -> Color {
    match role {
        Role::User => Color::Green,
        Role::Assistant => Color::Blue,
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Assistant",
    }
}

/// Coloured line-oriented terminal front end.
pub struct TerminalFrontend<R, W> {
    input: R,
    output: W,
    streaming: Option<Role>,
}

impl TerminalFrontend<io::BufReader<io::Stdin>, io::Stdout> {
    /// Front end on the process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead + Send, W: Write + Send> TerminalFrontend<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            streaming: None,
        }
    }

    fn write_label(&mut self, role: Role) -> io::Result<()> {
        queue!(
            self.output,
            SetForegroundColor(role_color(role)),
            SetAttribute(Attribute::Bold),
            Print(format!("{}: ", role_label(role))),
            SetAttribute(Attribute::Reset),
        )
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead + Send, W: Write + Send> ChatFrontend for TerminalFrontend<R, W> {
    fn display_message(&mut self, message: &Message) -> Result<()> {
        self.write_label(message.role)?;
        queue!(
            self.output,
            SetForegroundColor(role_color(message.role)),
            Print(&message.content),
            ResetColor,
            Print("\n"),
        )?;
        self.output.flush()?;
        Ok(())
    }

    fn stream_message(&mut self, role: Role, chunk: &str) -> Result<()> {
        if self.streaming != Some(role) {
            if self.streaming.is_some() {
                queue!(self.output, ResetColor, Print("\n"))?;
            }
            self.write_label(role)?;
            queue!(self.output, SetForegroundColor(role_color(role)))?;
            self.streaming = Some(role);
        }
        queue!(self.output, Print(chunk))?;
        self.output.flush()?;
        Ok(())
    }

    fn end_stream(&mut self) -> Result<()> {
        if self.streaming.take().is_some() {
            queue!(self.output, ResetColor, Print("\n"))?;
            self.output.flush()?;
        }
        Ok(())
    }

    fn display_notice(&mut self, notice: &str) -> Result<()> {
        queue!(
            self.output,
            SetForegroundColor(Color::DarkGrey),
            Print(notice),
            ResetColor,
            Print("\n"),
        )?;
        self.output.flush()?;
        Ok(())
    }

    fn display_error(&mut self, error: &str) -> Result<()> {
        queue!(
            self.output,
            SetForegroundColor(Color::Red),
            SetAttribute(Attribute::Bold),
            Print("Error: "),
            SetAttribute(Attribute::Reset),
            SetForegroundColor(Color::Red),
            Print(error),
            ResetColor,
            Print("\n"),
        )?;
        self.output.flush()?;
        Ok(())
    }

    fn get_user_input(&mut self) -> Result<Option<String>> {
        queue!(
            self.output,
            Print("\n"),
            SetForegroundColor(Color::Green),
            SetAttribute(Attribute::Bold),
            Print("You: "),
            SetAttribute(Attribute::Reset),
        )?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
