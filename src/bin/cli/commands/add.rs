use anyhow::{Context, Result};
use chrono::Utc;

use nous_review::flashcards::{Card, CardStore};

use crate::app::App;
use crate::OutputFormat;

pub async fn run(
    app: &App,
    note_id: i64,
    count: usize,
    data: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let payload = data
        .map(|data| serde_json::from_str::<serde_json::Value>(data))
        .transpose()
        .context("Card data is not valid JSON")?;

    let now = Utc::now();
    // Ids are creation timestamps; bump past the newest card when created in the same millisecond
    let newest = app.store.snapshot().cards.keys().next_back().copied();
    let first_id = newest.map_or(now.timestamp_millis(), |id| {
        (id + 1).max(now.timestamp_millis())
    });

    let mut created = Vec::with_capacity(count);
    for offset in 0..count as i64 {
        let mut card = Card::new(first_id + offset, note_id, now);
        if let Some(payload) = &payload {
            card = card.with_data(payload.clone());
        }
        app.store
            .insert_card(&card)
            .await
            .with_context(|| format!("Failed to insert card {}", card.id))?;
        created.push(card);
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        OutputFormat::Plain => {
            println!("Created {} card(s) for note {}", created.len(), note_id);
            for card in &created {
                println!("  ID: {}", card.id);
            }
        }
    }

    Ok(())
}
