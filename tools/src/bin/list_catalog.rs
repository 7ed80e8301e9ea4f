// cargo run --bin list-catalog -- --config configs/default.toml

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use elset_types::prelude::ElementSet;
use tracker_lib::{config::Config, Tracker};

/// List the element sets currently in the store, most recently updated first
#[derive(Parser, Debug)]
#[command(version)]
struct Opts {
    /// Configuration toml file.
    ///
    /// The default store location is used when not provided.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opts = Opts::parse();

    let config = match &opts.config {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    let tracker = Tracker::new(config)?;
    let sets = tracker.store().list().await?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&sets)?);
        return Ok(());
    }

    println!("object_id\tname\tepoch\tfetched_at\tupdated_at");
    for set in sets.iter() {
        print_row(set);
    }
    eprintln!("{} element sets", sets.len());

    Ok(())
}

fn print_row(set: &ElementSet) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        set.object_id,
        set.name(),
        set.epoch.to_rfc3339(),
        set.fetched_at.to_rfc3339(),
        set.updated_at.to_rfc3339(),
    );
}
