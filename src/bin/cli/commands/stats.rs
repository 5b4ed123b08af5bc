use anyhow::{Context, Result};
use chrono::Utc;

use nous_review::flashcards::{Card, PracticeState, ReviewSession};

use crate::app::App;
use crate::render::terminal::{self, Color};
use crate::OutputFormat;

pub async fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let cards = app.all_cards().await?;
    let now = Utc::now();
    let session = ReviewSession::load(app.store.as_ref(), &app.config, now)
        .await
        .context("Failed to read today's reviews")?;
    let tomorrow = app.config.tomorrow(now);

    let count = |pred: fn(&Card) -> bool| cards.iter().filter(|c| pred(c)).count();
    let new = count(|c| c.practice_state == PracticeState::New);
    let learning = count(|c| c.practice_state.is_learning());
    let due = count(|c| c.practice_state == PracticeState::Due);
    let suspended = count(|c| c.is_suspended());
    let due_today = cards
        .iter()
        .filter(|c| c.practice_state == PracticeState::Due && !c.is_suspended() && c.due < tomorrow)
        .count();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "collection": app.store.dir().to_string_lossy(),
                "cards": {
                    "total": cards.len(),
                    "new": new,
                    "learning": learning,
                    "due": due,
                    "suspended": suspended,
                    "dueToday": due_today,
                },
                "session": session,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!(
                "{}",
                terminal::paint(&app.store.dir().display().to_string(), Color::BOLD, use_color)
            );
            println!("  Cards:     {}", cards.len());
            println!("  New:       {}", new);
            println!("  Learning:  {}", learning);
            println!("  Review:    {} ({} due today)", due, due_today);
            if suspended > 0 {
                println!("  Suspended: {}", suspended);
            }
            println!();
            println!(
                "Left today: {} new, {} review",
                session.new_limit(),
                session.due_limit()
            );
        }
    }

    Ok(())
}
