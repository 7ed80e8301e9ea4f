// cargo run --bin elset-history -- --config configs/default.toml 25544

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tracker_lib::{config::Config, error::parse_object_id, Tracker};

/// Print every stored element set of one object, oldest first
#[derive(Parser, Debug)]
#[command(version)]
struct Opts {
    /// Configuration toml file.
    ///
    /// The default store location is used when not provided.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print JSON lines instead of 3-line element sets
    #[arg(long)]
    json: bool,

    /// NORAD catalog number
    object_id: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opts = Opts::parse();

    let object_id = parse_object_id(&opts.object_id)?;
    let config = match &opts.config {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    let tracker = Tracker::new(config)?;
    let history = tracker.store().history(object_id).await?;

    for entry in history.iter() {
        if opts.json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            // Fetch time as the title, so the output is itself a valid catalog file
            println!(
                "{} {}",
                entry.fetched_at.to_rfc3339(),
                entry.display_name.as_deref().unwrap_or("")
            );
            println!("{}", entry.line1);
            println!("{}", entry.line2);
        }
    }
    eprintln!("{} history entries for object {object_id}", history.len());

    Ok(())
}
