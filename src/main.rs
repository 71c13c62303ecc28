use term_chat::{cli::Chat, logging};

fn main() {
    dotenvy::dotenv().ok();
    logging::init();
    if let Err(e) = Chat::new().run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
