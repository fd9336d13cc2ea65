use std::error::Error;
use std::fs;
use std::process::exit;

use clap::Parser;
use rusqlite::Connection;

use salesboard_rs::{UpstreamPayload, count_sales, import_payload, initialize_db};

/// Import a campaign or order payload saved from an upstream platform.
///
/// The payload file holds the same JSON that the server accepts on its sync
/// route, e.g. `{"source": "woocommerce", "orders": [...]}`.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// File path to the JSON payload.
    #[arg(long, short)]
    payload_path: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let payload_text = fs::read_to_string(&args.payload_path)?;
    let payload: UpstreamPayload = match serde_json::from_str(&payload_text) {
        Ok(payload) => payload,
        Err(error) => {
            eprintln!("Could not read payload from {}: {error}", args.payload_path);
            exit(1);
        }
    };

    let conn = Connection::open(&args.db_path)?;
    initialize_db(&conn)?;

    let report = import_payload(payload, &conn)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("The database now holds {} sales.", count_sales(&conn)?);

    Ok(())
}
