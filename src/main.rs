use std::path::Path;

use anyhow::{anyhow, Context, Result};
use beer_pos::{
    app::BeerPos,
    cli::{Cli, Commands, MenuAction},
    console,
    ledger::{history, transfer},
    menu::CsvMenuStore,
    models::format_amount,
    settings::{self, AppSettings, SettingsStore},
};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = SettingsStore::new(AppSettings::resolve_path(cli.settings.as_deref()))?;
    let config = settings.get();

    let debug = cli.verbose || settings::debug_mode();
    if let Err(err) = beer_pos::utils::logging::init_logging(config.log_file.as_deref(), debug) {
        eprintln!("log file unavailable ({err:#}); logging to stderr only");
        let _ = beer_pos::utils::logging::init_logging(None, debug);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            log::info!("Beer POS starting up (settings: {})", settings.path().display());
            let app = BeerPos::new(settings)?;
            app.report_open_bills()?;
            console::run_console(&app).await?;
        }

        Commands::Menu { action } => {
            let store = CsvMenuStore::new(config.menu_path.clone());
            match action {
                MenuAction::List => {}
                MenuAction::Add { name, price } => store.add_item(&name, price)?,
                MenuAction::Price { name, price } => store.set_price(&name, price)?,
                MenuAction::Remove { name } => store.remove_item(&name)?,
            }
            let entries = store.entries()?;
            if entries.is_empty() {
                println!("Menu {} is empty.", store.path().display());
            }
            for entry in entries {
                println!("{:<24} {:>8}", entry.name, format_amount(entry.price));
            }
        }

        Commands::History { date, start, end } => {
            let filter =
                history::HistoryFilter::parse(date.as_deref(), start.as_deref(), end.as_deref())?;
            let bills = history::summaries(&config.bills_dir, &filter)?;
            if bills.is_empty() {
                println!("No bills found.");
            }
            for bill in bills {
                let end = bill
                    .end
                    .map(|end| end.format("%H:%M").to_string())
                    .unwrap_or_else(|| "open".to_string());
                println!(
                    "{}  table {:<3} {} - {:<5} {:>10}  {}",
                    bill.date.format("%d-%m-%Y"),
                    bill.table_id,
                    bill.start.format("%H:%M"),
                    end,
                    format_amount(bill.total),
                    bill.path.display()
                );
            }
        }

        Commands::Show { bill } => {
            let path = resolve_bill(&config.bills_dir, &bill);
            let lines = history::read_lines(&path)?;
            for line in history::latest_lines(&lines).values() {
                println!(
                    "{:<24} {:>4} x {:>8} = {:>10}",
                    line.item,
                    line.qty,
                    format_amount(line.unit_price),
                    format_amount(line.total_line)
                );
            }
            println!("Total: {}", format_amount(history::bill_total(&path)?));
        }

        Commands::Send { bill, host, port } => {
            let configured = config.transfer.clone();
            let host = host
                .or_else(|| configured.as_ref().map(|t| t.host.clone()))
                .ok_or_else(|| anyhow!("no collector host configured; pass --host"))?;
            let port = port
                .or_else(|| configured.as_ref().map(|t| t.port))
                .ok_or_else(|| anyhow!("no collector port configured; pass --port"))?;
            let path = resolve_bill(&config.bills_dir, &bill);
            transfer::send_bill(&host, port, &path)
                .await
                .with_context(|| format!("failed to send {}", path.display()))?;
            println!("Sent {}", path.display());
        }

        Commands::Table { id } => {
            settings.update(|data| data.table_id = id)?;
            println!("This terminal now serves table {id}");
        }
    }

    Ok(())
}

/// Bare file names are looked up in the bills directory.
fn resolve_bill(bills_dir: &Path, bill: &Path) -> std::path::PathBuf {
    if bill.exists() || bill.components().count() > 1 {
        bill.to_path_buf()
    } else {
        bills_dir.join(bill)
    }
}
