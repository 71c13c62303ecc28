use std::path::PathBuf;

use clap::Parser;

use crate::{
    diagram::MermaidInkRenderer,
    gpt::{ChatBot, ChatHistory, GptClient, GptClientOption, OpenAIModel},
    interrupt,
    repl::ChatRepl,
};

/// Chat with an OpenAI compatible model from the terminal.
#[derive(Parser, Debug)]
#[command(name = "chat")]
pub struct Chat {
    /// Model identifier, or one of the aliases 4o-mini, 4o, gpt4, gpt3
    #[arg(short = 'm', long = "model", env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    model: OpenAIModel,
    /// Chat completions endpoint
    #[arg(long = "base-url", env = "OPENAI_BASE_URL")]
    base_url: Option<String>,
    /// System prompt sent before the first message
    #[arg(short = 's', long = "system")]
    system: Option<String>,
    #[arg(long = "diagram-path", default_value = "chat_graph.png")]
    diagram_path: PathBuf,
}

impl Chat {
    pub fn new() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let client = GptClient::from_env(self.model.clone(), self.client_option())?;
        let renderer = MermaidInkRenderer::new(&self.diagram_path);
        if let Err(e) = interrupt::exit_on_interrupt() {
            tracing::warn!(error = %e, "could not install interrupt handler");
        }
        tracing::info!(model = %self.model, "starting chat");
        Self::print_welcome(&self.model);
        let mut repl = ChatRepl::with_history(ChatBot::new(client), renderer, self.history());
        repl.repl()?;
        Ok(())
    }
    fn client_option(&self) -> GptClientOption {
        let option = GptClientOption::from_env();
        match &self.base_url {
            Some(url) => option.with_base_url(url),
            None => option,
        }
    }
    fn history(&self) -> ChatHistory {
        self.system
            .as_ref()
            .map(ChatHistory::with_system)
            .unwrap_or_default()
    }
    fn print_welcome(model: &OpenAIModel) {
        println!(
            "Welcome to {} chat. Type quit, exit or q to leave, draw or d to draw the graph.",
            model
        );
    }
}
