//! Line-oriented order screen for the counter terminal.

use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    app::BeerPos,
    coordinator::{CaptureTicket, CoordinatorEvent, SessionSnapshot},
    error::PosError,
    models::{format_amount, Direction},
};

const HELP: &str = "\
commands:
  start [table]    open a table (default: configured table)
  add <item|#>     one more of an item
  sub <item|#>     one less of an item
  upload <path>    recognise a photo and add the item
  trigger          fire the camera as if the sensor saw a glass
  status           show the running bill
  finish           close the table and seal the bill
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start(Option<u32>),
    Adjust(String, Direction),
    Upload(PathBuf),
    Trigger,
    Status,
    Finish,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> std::result::Result<ConsoleCommand, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let needs_arg = |what: &str| {
        if rest.is_empty() {
            Err(format!("'{verb}' needs {what}"))
        } else {
            Ok(rest.to_string())
        }
    };

    match verb.to_ascii_lowercase().as_str() {
        "start" if rest.is_empty() => Ok(ConsoleCommand::Start(None)),
        "start" => rest
            .parse()
            .map(|table| ConsoleCommand::Start(Some(table)))
            .map_err(|_| format!("table '{rest}' is not a number")),
        "add" | "+" => Ok(ConsoleCommand::Adjust(needs_arg("an item")?, Direction::Increment)),
        "sub" | "-" => Ok(ConsoleCommand::Adjust(needs_arg("an item")?, Direction::Decrement)),
        "upload" => Ok(ConsoleCommand::Upload(PathBuf::from(needs_arg("a file path")?))),
        "trigger" => Ok(ConsoleCommand::Trigger),
        "status" | "" => Ok(ConsoleCommand::Status),
        "finish" => Ok(ConsoleCommand::Finish),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command '{other}', try 'help'")),
    }
}

pub fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let Some(session) = &snapshot.session else {
        return "No table open. Type 'start' to begin.".to_string();
    };

    let mut out = format!(
        "Table {} • Start {}\n",
        session.table_id,
        session.started_at.format("%H:%M")
    );
    for (index, row) in snapshot.rows.iter().enumerate() {
        out.push_str(&format!(
            "{:>3}  {:<24} {:>4}  x {:>8}\n",
            index + 1,
            row.item,
            row.quantity,
            format_amount(row.unit_price)
        ));
    }
    out.push_str(&format!("Total: {}", format_amount(snapshot.total)));
    if snapshot.capture_in_flight {
        out.push_str("  (camera busy)");
    }
    out
}

/// `#3` or `3` picks the third menu row; anything else is an item name.
fn resolve_item(snapshot: &SessionSnapshot, raw: &str) -> String {
    let index = raw.strip_prefix('#').unwrap_or(raw).parse::<usize>().ok();
    index
        .and_then(|index| index.checked_sub(1))
        .and_then(|index| snapshot.rows.get(index))
        .map(|row| row.item.clone())
        .unwrap_or_else(|| raw.to_string())
}

pub async fn run_console(app: &BeerPos) -> Result<()> {
    let mut events = app.coordinator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::QuantityChanged {
                    item,
                    quantity,
                    total,
                    source,
                    ..
                }) => println!("  [{source:?}] {item} = {quantity}  (total {})", format_amount(total)),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{HELP}");
    println!("{}", render_snapshot(&app.coordinator.snapshot().await));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if !execute(app, command).await {
            break;
        }
    }

    if app.coordinator.snapshot().await.session.is_some() {
        println!("Table still open; its bill stays unsealed until finished.");
    }
    app.shutdown().await;
    printer.abort();
    Ok(())
}

/// Returns false when the console should exit.
async fn execute(app: &BeerPos, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Start(table) => match app.start_session(table).await {
            Ok(_) => println!("{}", render_snapshot(&app.coordinator.snapshot().await)),
            Err(err) => report(&err),
        },
        ConsoleCommand::Adjust(raw, direction) => {
            let item = resolve_item(&app.coordinator.snapshot().await, &raw);
            if let Err(err) = app.coordinator.manual_adjust(&item, direction).await {
                report(&err);
            }
        }
        ConsoleCommand::Upload(path) => match app.coordinator.upload_image(&path).await {
            Ok(result) => println!("Added {} (now {})", result.item, result.quantity),
            Err(err) => report(&err),
        },
        ConsoleCommand::Trigger => match app.coordinator.trigger_capture().await {
            ticket @ CaptureTicket::Launched { .. } => {
                let attempt = ticket.wait().await;
                println!("capture: {:?} (applied: {})", attempt.outcome, attempt.applied);
            }
            ticket => println!("capture skipped: {:?}", ticket.skip_reason()),
        },
        ConsoleCommand::Status => {
            println!("{}", render_snapshot(&app.coordinator.snapshot().await));
        }
        ConsoleCommand::Finish => match app.finish_session().await {
            Ok(closed) => println!(
                "Bill saved: {} (total {})",
                closed.info.bill_path.display(),
                format_amount(closed.total)
            ),
            Err(err) => report(&err),
        },
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return false,
    }
    true
}

fn report(err: &PosError) {
    println!("{}", describe_error(err));
}

fn describe_error(err: &PosError) -> String {
    if err.is_recoverable() {
        format!("error: {err}")
    } else {
        format!("error: {err}\nthe bill file may need attention before continuing")
    }
}
