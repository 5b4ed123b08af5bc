use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};

use nous_review::flashcards::{QueueFilter, ReviewCoordinator};

use crate::app::App;
use crate::render::terminal::{self, Color};

/// What the reviewer typed at the prompt
enum Input {
    Grade(usize),
    Dismiss,
    Quit,
    Unknown,
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "q" | "quit" => Input::Quit,
        "d" | "dismiss" => Input::Dismiss,
        other => other
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
            .map_or(Input::Unknown, Input::Grade),
    }
}

pub async fn run(app: &App, limit: Option<usize>, use_color: bool) -> Result<()> {
    let mut coordinator = app.coordinator();
    let mut more = coordinator
        .initialize()
        .await
        .context("Failed to start review session")?;

    if !more {
        println!("Nothing to review right now.");
        return Ok(());
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut answered = 0;

    while more {
        if limit.map_or(false, |limit| answered >= limit) {
            break;
        }
        show_current(&coordinator, use_color)?;

        let options = coordinator.compute_grades()?;
        let now = Utc::now();
        let menu: Vec<String> = options
            .iter()
            .enumerate()
            .map(|(i, option)| {
                format!(
                    "[{}] {} ({})",
                    i + 1,
                    option.grade.label(),
                    terminal::describe_due(option.due, now)
                )
            })
            .collect();
        println!("{}  [d] Dismiss  [q] Quit", menu.join("  "));

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        match parse_input(&line) {
            Input::Quit => break,
            Input::Dismiss => {
                more = coordinator.dismiss().await?;
            }
            Input::Grade(n) => match options.get(n - 1) {
                Some(option) => {
                    if let Some(back) = coordinator
                        .current()
                        .and_then(|card| terminal::render_back(card, use_color))
                    {
                        println!("{}", terminal::paint(&back, Color::GREEN, use_color));
                    }
                    more = coordinator.answer(option.grade).await?;
                    answered += 1;
                }
                None => println!("No grade {}", n),
            },
            Input::Unknown => println!("Type a grade number, d or q"),
        }
        println!();
    }

    coordinator.flush().await;

    if !more {
        println!("All done for today.");
    }
    println!("Reviewed {} card(s)", answered);
    Ok(())
}

fn show_current(coordinator: &ReviewCoordinator, use_color: bool) -> Result<()> {
    let card = coordinator.current().context("No current card")?;
    let remaining = coordinator.count_by_state(QueueFilter::all())?;

    let header = format!(
        "Card {} ({}), {} more after this",
        card.id,
        terminal::state_label(card.practice_state),
        remaining
    );
    println!("{}", terminal::paint(&header, Color::DIM, use_color));
    println!("{}", terminal::paint(&terminal::render_front(card, use_color), Color::BOLD, use_color));
    Ok(())
}
