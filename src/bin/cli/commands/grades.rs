use anyhow::Result;
use chrono::Utc;

use nous_review::flashcards::CardScheduler;

use crate::app::App;
use crate::render::terminal::{self, Color};
use crate::OutputFormat;

pub fn run(app: &App, card_id: i64, format: &OutputFormat, use_color: bool) -> Result<()> {
    let card = app.find_card(card_id)?;
    let scheduler = match app.seed {
        Some(seed) => CardScheduler::with_seed(app.config.clone(), seed),
        None => CardScheduler::new(app.config.clone()),
    };
    let now = Utc::now();
    let options = scheduler.compute_grades(&card, now);

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "cardId": card.id,
                "state": card.practice_state,
                "options": options,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let header = format!("Card {} ({})", card.id, terminal::state_label(card.practice_state));
            println!("{}", terminal::paint(&header, Color::BOLD, use_color));
            if options.is_empty() {
                println!("  No grades apply");
            }
            for option in &options {
                println!(
                    "  {:<14} {} ({})",
                    option.grade.label(),
                    option.due.format("%Y-%m-%d %H:%M"),
                    terminal::describe_due(option.due, now)
                );
            }
        }
    }

    Ok(())
}
