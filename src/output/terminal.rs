// Colored terminal output for review results, screening and related posts.

use colored::Colorize;

use crate::extract::Extraction;
use crate::publish::RecordingPublisher;
use crate::related::RelatedPost;
use crate::router::RouteOutcome;

use super::truncate_chars;

/// Show what routing one message produced, and what would have been published.
pub fn display_route_outcome(outcome: &RouteOutcome, sink: &RecordingPublisher) {
    match outcome {
        RouteOutcome::Malformed(e) => {
            println!("{} {}", "Malformed message:".red().bold(), e);
        }
        RouteOutcome::Ignored { pattern } => {
            println!(
                "{} {}",
                "No workflow for pattern:".yellow(),
                pattern.as_deref().unwrap_or("<none>")
            );
        }
        RouteOutcome::Reviewed {
            workflow,
            post_id,
            outcome,
            ..
        } => {
            let label = if outcome.is_approved() {
                outcome.label().green().bold()
            } else {
                outcome.label().red().bold()
            };
            println!(
                "{} post {} ({} workflow)",
                label,
                post_id.bold(),
                workflow.name()
            );
            println!("  {}", outcome.message().dimmed());
        }
        RouteOutcome::Faulted {
            workflow,
            post_id,
            fault,
        } => {
            println!(
                "{} post {} ({} workflow)",
                "fault".red().bold(),
                post_id.as_deref().unwrap_or("<unknown>"),
                workflow.name()
            );
            println!("  {}", fault.to_string().red());
        }
    }

    let messages = sink.messages();
    if messages.is_empty() {
        println!("\n{}", "Nothing would be published.".dimmed());
        return;
    }
    println!("\n{}", "Would publish:".bold());
    for message in &messages {
        println!(
            "  {} {}",
            format!("[{}]", message.queue).cyan(),
            String::from_utf8_lossy(&message.payload)
        );
    }
}

pub fn display_screen_result(screen_name: &str, text: &str, flagged: bool) {
    let verdict = if flagged {
        "FLAGGED".red().bold()
    } else {
        "clean".green().bold()
    };
    println!(
        "{} {} {}",
        verdict,
        format!("[{screen_name}]").dimmed(),
        truncate_chars(text, 80)
    );
}

pub fn display_extraction(extraction: &Extraction) {
    if extraction.ok {
        println!("{}", extraction.text);
    } else {
        println!("{} {}", "Extraction failed:".red().bold(), extraction.text);
    }
}

pub fn display_related(target_id: &str, related: &[RelatedPost]) {
    if related.is_empty() {
        println!("No related posts for {}.", target_id.bold());
        return;
    }

    println!(
        "\n{}",
        format!("=== Related to {} ({} posts) ===", target_id, related.len()).bold()
    );
    println!("  {:>4}  {:<36} {:>6}", "Rank".dimmed(), "Id".dimmed(), "Score".dimmed());
    println!("  {}", "-".repeat(50).dimmed());
    for (i, post) in related.iter().enumerate() {
        println!("  {:>4}. {:<36} {:>6.3}", i + 1, post.id, post.score);
    }
}
