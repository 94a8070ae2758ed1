// System status display - configuration summary, model files, broker reachability.

use anyhow::Result;
use colored::Colorize;

use crate::config::{Config, ScreenBackend};
use crate::screen::download::{embedding_files_present, screen_files_present};
use crate::transport::amqp::check_reachable;

/// Display system status to the terminal.
pub async fn show(config: &Config) -> Result<()> {
    println!("{}", "=== postscreen status ===".bold());

    println!(
        "Queues: {} -> {}{}",
        config.review_queue,
        config.posts_queue,
        config
            .dead_letter_queue
            .as_deref()
            .map(|q| format!(" (faults -> {q})"))
            .unwrap_or_default()
    );
    println!(
        "Delivery: ack on {}, {}",
        config.ack_mode.name(),
        if config.durable { "durable" } else { "transient" }
    );

    println!(
        "Screen: {} (threshold {:.2}, timeout {:?})",
        config.screen_backend.name(),
        config.threshold,
        config.screen_timeout
    );
    match config.require_screen() {
        Ok(()) => println!("  {}", "ready".green()),
        Err(e) => println!("  {} {}", "not ready:".red(), first_line(&e.to_string())),
    }
    if config.screen_backend == ScreenBackend::Wordlist {
        if let Some(path) = &config.wordlist_path {
            println!("  Word list: {}", path.display());
        }
    }

    println!("Models: {}", config.model_dir.display());
    println!(
        "  Screening model: {}",
        presence(screen_files_present(&config.model_dir))
    );
    println!(
        "  Embedding model: {}",
        presence(embedding_files_present(&config.model_dir))
    );

    if config.rabbitmq_url.is_empty() {
        println!("Broker: {}", "RABBITMQ_URL not set".yellow());
    } else {
        match check_reachable(&config.broker()).await {
            Ok(()) => println!("Broker: {}", "reachable".green()),
            Err(e) => println!("Broker: {} ({e:#})", "unreachable".red()),
        }
    }

    Ok(())
}

fn presence(present: bool) -> colored::ColoredString {
    if present {
        "present".green()
    } else {
        "missing (run `postscreen download-model`)".yellow()
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
