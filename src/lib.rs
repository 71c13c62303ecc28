pub mod cli;
pub mod diagram;
pub mod gpt;
pub mod interrupt;
pub mod logging;
pub mod repl;
