use std::io::{BufRead, Write};

use crate::{
    diagram::{ChatGraph, DiagramRenderer},
    gpt::{ChatBot, ChatHistory, ChatModel},
};

pub const FAREWELL: &str = "Goodbye!";
const USER_LABEL: &str = "User: ";
const ASSISTANT_LABEL: &str = "Assistant: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Draw,
    Empty,
    Message(&'a str),
}
impl<'a> Command<'a> {
    const EXIT: [&'static str; 3] = ["quit", "exit", "q"];
    const DRAW: [&'static str; 2] = ["draw", "d"];
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if Self::EXIT.iter().any(|k| trimmed.eq_ignore_ascii_case(k)) {
            return Self::Exit;
        }
        if Self::DRAW.iter().any(|k| trimmed.eq_ignore_ascii_case(k)) {
            return Self::Draw;
        }
        Self::Message(line.trim_end_matches(['\r', '\n']))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    Running,
    Terminated,
}

pub struct ChatRepl<M: ChatModel, D: DiagramRenderer> {
    bot: ChatBot<M>,
    renderer: D,
    graph: ChatGraph,
    history: ChatHistory,
    state: ReplState,
}
impl<M: ChatModel, D: DiagramRenderer> ChatRepl<M, D> {
    pub fn new(bot: ChatBot<M>, renderer: D) -> Self {
        Self::with_history(bot, renderer, ChatHistory::new())
    }
    pub fn with_history(bot: ChatBot<M>, renderer: D, history: ChatHistory) -> Self {
        Self {
            bot,
            renderer,
            graph: ChatGraph::chatbot(),
            history,
            state: ReplState::Running,
        }
    }
    pub fn history(&self) -> &ChatHistory {
        &self.history
    }
    pub fn state(&self) -> ReplState {
        self.state
    }
    pub fn repl(&mut self) -> std::io::Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.run(stdin.lock(), stdout.lock())
    }
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> std::io::Result<()> {
        while self.state == ReplState::Running {
            self.step(&mut input, &mut out)?;
        }
        Ok(())
    }
    /// Reads and handles one line. Errors are only ever failures to write to `out`.
    pub fn step<R: BufRead, W: Write>(
        &mut self,
        input: &mut R,
        out: &mut W,
    ) -> std::io::Result<ReplState> {
        Self::user_first(out)?;
        let Some(line) = Self::user_input(input) else {
            writeln!(out)?;
            return self.terminate(out);
        };
        match Command::parse(&line) {
            Command::Exit => return self.terminate(out),
            Command::Empty => {}
            Command::Draw => self.draw(out)?,
            Command::Message(message) => self.chat(message, out)?,
        }
        Ok(self.state)
    }
    fn chat<W: Write>(&mut self, message: &str, out: &mut W) -> std::io::Result<()> {
        match self.bot.turn(&mut self.history, message) {
            Ok(reply) => writeln!(out, "{}{}", ASSISTANT_LABEL, reply.content()),
            Err(e) => {
                tracing::error!(error = %e, kind = ?e.kind, "chat turn failed");
                writeln!(out, "Error: {}", e)
            }
        }
    }
    fn draw<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        match self.renderer.render(&self.graph) {
            Ok(path) => writeln!(out, "Diagram saved to {}", path.display()),
            Err(e) => {
                tracing::warn!(error = %e, "could not draw diagram");
                writeln!(out, "Could not draw diagram: {}", e)
            }
        }
    }
    fn terminate<W: Write>(&mut self, out: &mut W) -> std::io::Result<ReplState> {
        writeln!(out, "{}", FAREWELL)?;
        out.flush()?;
        self.state = ReplState::Terminated;
        Ok(self.state)
    }
    fn user_first<W: Write>(out: &mut W) -> std::io::Result<()> {
        write!(out, "{}", USER_LABEL)?;
        out.flush()
    }
    fn user_input<R: BufRead>(input: &mut R) -> Option<String> {
        let mut message = String::new();
        match input.read_line(&mut message) {
            Ok(0) => None,
            Ok(_) => Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "could not read input");
                None
            }
        }
    }
}
