//! one-shot prompt from the terminal, no window.
//!
//!   cargo run --example generate -- "why is the sky blue?"
//!
//! env:
//!   OLLAMA_URL    (default http://localhost:11434/api/generate)
//!   OLLAMA_MODEL  (catalog index or model name; default llama3.1:8b)
//!   PRINT_PROMPT  (echo the prompt before sending)

use bevy_ollama::{
    CancelHandle, GenerateClient, GenerateConfig, Outcome, ResponseSink, compose_user_only,
    resolve_model, run_request,
};
use std::io::Write;

const FALLBACK_PROMPT: &str = "What is the meaning of life?";

/// prints chunks as they arrive.
struct Stdout;

impl ResponseSink for Stdout {
    fn on_chunk(&mut self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn on_terminal(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => println!(),
            Outcome::Failed(reason) => eprintln!("\nRequest failed: {reason}"),
            Outcome::Cancelled => eprintln!("\ncancelled"),
        }
    }
}

fn main() {
    let endpoint = std::env::var("OLLAMA_URL").unwrap_or_else(|_| bevy_ollama::DEFAULT_ENDPOINT.to_string());
    let model = resolve_model(std::env::var("OLLAMA_MODEL").ok().as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let prompt = compose_user_only(&args.join(" "))
        .into_text()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| FALLBACK_PROMPT.to_string());

    println!("Using model: {model}");
    if std::env::var_os("PRINT_PROMPT").is_some() {
        println!("Prompt: {prompt}");
    }
    println!("waiting...\n");

    let client = GenerateClient::new(GenerateConfig {
        endpoint,
        model: model.to_string(),
        ..Default::default()
    });
    run_request(&client, model, &prompt, &CancelHandle::new(), &mut Stdout);
}
