use std::{
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
    thread::JoinHandle,
};

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use reqwest::blocking::Client;

/// The control structure the REPL drives: one entry edge into the chatbot node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatGraph {
    nodes: Vec<&'static str>,
    edges: Vec<(&'static str, &'static str)>,
}
impl ChatGraph {
    pub const START: &'static str = "__start__";
    pub const CHATBOT: &'static str = "chatbot";
    pub fn chatbot() -> Self {
        Self {
            nodes: vec![Self::START, Self::CHATBOT],
            edges: vec![(Self::START, Self::CHATBOT)],
        }
    }
    pub fn nodes(&self) -> &[&'static str] {
        &self.nodes
    }
    pub fn edges(&self) -> &[(&'static str, &'static str)] {
        &self.edges
    }
    pub fn to_mermaid(&self) -> String {
        let mut mermaid = String::from("graph TD;\n");
        for node in &self.nodes {
            if *node == Self::START {
                mermaid.push_str(&format!("\t{node}([<p>{node}</p>]):::first\n"));
            } else {
                mermaid.push_str(&format!("\t{node}({node})\n"));
            }
        }
        for (from, to) in &self.edges {
            mermaid.push_str(&format!("\t{from} --> {to};\n"));
        }
        mermaid.push_str("\tclassDef default fill:#f2f0ff,line-height:1.2\n");
        mermaid.push_str("\tclassDef first fill-opacity:0\n");
        mermaid
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiagramError {
    #[error("could not reach diagram service: {0}")]
    Request(#[from] reqwest::Error),
    #[error("diagram service responded with status {0}")]
    Status(u16),
    #[error("could not write diagram to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
pub type Result<T> = std::result::Result<T, DiagramError>;

pub trait DiagramRenderer {
    /// Draws the graph and returns where the image was written.
    fn render(&self, graph: &ChatGraph) -> Result<PathBuf>;
}
impl<D: DiagramRenderer> DiagramRenderer for &D {
    fn render(&self, graph: &ChatGraph) -> Result<PathBuf> {
        (**self).render(graph)
    }
}

/// Renders through the mermaid.ink service and saves the PNG locally.
pub struct MermaidInkRenderer {
    endpoint: String,
    output: PathBuf,
    open_viewer: bool,
}
impl MermaidInkRenderer {
    pub const ENDPOINT: &'static str = "https://mermaid.ink/img/";
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: Self::ENDPOINT.to_string(),
            output: output.into(),
            open_viewer: true,
        }
    }
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
    pub fn with_open_viewer(mut self, open_viewer: bool) -> Self {
        self.open_viewer = open_viewer;
        self
    }
    fn image_url(&self, mermaid: &str) -> String {
        format!("{}{}?type=png", self.endpoint, URL_SAFE.encode(mermaid))
    }
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(%url, "fetching diagram");
        let response = Client::builder().build()?.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiagramError::Status(status.as_u16()));
        }
        Ok(response.bytes()?.to_vec())
    }
    fn save(path: &Path, png: &[u8]) -> Result<()> {
        std::fs::write(path, png).map_err(|source| DiagramError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
    fn viewer() -> Command {
        #[cfg(target_os = "macos")]
        let command = Command::new("open");
        #[cfg(target_os = "windows")]
        let command = {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", ""]);
            command
        };
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let command = Command::new("xdg-open");
        command
    }
    /// Starts the viewer detached from the REPL. The returned thread reaps it once it exits.
    fn open_with(
        mut command: Command,
        path: &Path,
    ) -> std::io::Result<JoinHandle<std::io::Result<ExitStatus>>> {
        let mut child = command.arg(path).spawn()?;
        Ok(std::thread::spawn(move || child.wait()))
    }
}
impl DiagramRenderer for MermaidInkRenderer {
    fn render(&self, graph: &ChatGraph) -> Result<PathBuf> {
        let png = self.fetch(&self.image_url(&graph.to_mermaid()))?;
        Self::save(&self.output, &png)?;
        if self.open_viewer {
            if let Err(e) = Self::open_with(Self::viewer(), &self.output) {
                tracing::warn!(error = %e, path = %self.output.display(), "could not open image viewer");
            }
        }
        Ok(self.output.clone())
    }
}
