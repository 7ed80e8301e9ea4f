use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{fs, path::PathBuf, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tracker_lib::{
    config::Config,
    interruptor::Interruptor,
    service::{BatchQuery, ErrorBody, LookupQuery, SimulationQuery},
    Error, Tracker,
};

#[derive(Parser, Debug)]
#[command(version, about = "Element set cache and orbit propagation")]
struct Opts {
    /// Configuration toml file.
    ///
    /// Built-in defaults are used when not provided.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the element set for an object
    Lookup {
        object_id: String,
        #[arg(long)]
        max_age_hours: Option<u32>,
        /// Only use the store, never contact the provider
        #[arg(long)]
        no_fetch: bool,
    },

    /// Current position of an object
    Now {
        object_id: String,
        #[arg(long)]
        no_fetch: bool,
    },

    /// Positions of one object over a time window
    Simulate {
        object_id: String,
        /// ISO-8601 UTC start, defaults to now
        #[arg(long)]
        start: Option<String>,
        #[arg(long, default_value_t = 600, allow_negative_numbers = true)]
        duration_sec: i64,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        step_sec: i64,
        #[arg(long)]
        no_fetch: bool,
    },

    /// Positions of many objects over a shared time window
    Batch {
        #[arg(required = true)]
        object_ids: Vec<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long, default_value_t = 84_000, allow_negative_numbers = true)]
        duration_sec: i64,
        #[arg(long, default_value_t = 60, allow_negative_numbers = true)]
        step_sec: i64,
        /// Fetch missing or outdated element sets instead of failing/serving stale ones
        #[arg(long, conflicts_with = "no_fetch")]
        allow_fetch: bool,
        /// Only use the store, whatever the config says
        #[arg(long)]
        no_fetch: bool,
    },

    /// Fetch an object's element set now, regardless of its age
    Refresh { object_id: String },

    /// Seed the store from a 2-line/3-line catalog file
    Import { file: PathBuf },

    /// Seed the store from one of the provider's named groups
    Seed {
        #[arg(long, default_value = "visual")]
        group: String,
    },

    /// Print the current position periodically until Ctrl-C
    Track {
        object_id: String,
        /// Time between positions, e.g. "10s"
        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        interval: Duration,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let opts = Opts::parse();

    let config = match &opts.config {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    let tracker = Tracker::new(config)?;
    let out = Output {
        pretty: opts.pretty,
    };

    let res = match opts.command {
        Command::Lookup {
            object_id,
            max_age_hours,
            no_fetch,
        } => {
            let q = LookupQuery {
                max_age_hours,
                allow_fetch: !no_fetch,
                ..LookupQuery::new(object_id)
            };
            tracker.lookup(&q).await.map(|r| out.print(&r))
        }
        Command::Now {
            object_id,
            no_fetch,
        } => {
            let q = LookupQuery {
                allow_fetch: !no_fetch,
                ..LookupQuery::new(object_id)
            };
            tracker.now(&q).await.map(|r| out.print(&r))
        }
        Command::Simulate {
            object_id,
            start,
            duration_sec,
            step_sec,
            no_fetch,
        } => {
            let q = SimulationQuery {
                object_id,
                start_time: start,
                duration_sec,
                step_sec,
                max_age_hours: None,
                allow_fetch: !no_fetch,
            };
            tracker.simulate(&q).await.map(|r| out.print(&r))
        }
        Command::Batch {
            object_ids,
            start,
            duration_sec,
            step_sec,
            allow_fetch,
            no_fetch,
        } => {
            let q = BatchQuery {
                object_ids,
                duration_sec,
                step_sec,
                start_time: start,
                max_age_hours: None,
                allow_fetch: fetch_override(allow_fetch, no_fetch),
            };
            tracker.batch(&q).await.map(|r| out.print(&r))
        }
        Command::Refresh { object_id } => tracker.refresh(&object_id).await.map(|r| out.print(&r)),
        Command::Import { file } => {
            let text = fs::read_to_string(&file)?;
            info!(file = %file.display(), "Importing catalog");
            tracker.import(&text).await.map(|r| out.print(&r))
        }
        Command::Seed { group } => tracker.seed_group(&group).await.map(|r| out.print(&r)),
        Command::Track {
            object_id,
            interval,
        } => track(&tracker, &out, object_id, interval).await,
    };

    match res {
        Ok(()) => Ok(()),
        Err(e) => {
            #[derive(Serialize)]
            struct Failure {
                error: ErrorBody,
            }
            out.print(&Failure {
                error: ErrorBody::from(&e),
            });
            Err(e.into())
        }
    }
}

/// `None` leaves the choice to the config
fn fetch_override(allow_fetch: bool, no_fetch: bool) -> Option<bool> {
    match (allow_fetch, no_fetch) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

async fn track(
    tracker: &Tracker,
    out: &Output,
    object_id: String,
    interval: Duration,
) -> Result<(), Error> {
    let intr = Interruptor::new();
    intr.install_ctrlc_handler()
        .map_err(|e| Error::InvalidRequest(format!("cannot install the Ctrl-C handler: {e}")))?;

    let q = LookupQuery::new(object_id);
    loop {
        match tracker.now(&q).await {
            Ok(r) => out.print(&r),
            // Keep tracking through provider hiccups
            Err(e) if e.is_fetch_failure() => warn!(error = %e, "Position unavailable"),
            Err(e) => return Err(e),
        }
        if intr.sleep(interval).await {
            info!("Interrupted");
            return Ok(());
        }
    }
}

struct Output {
    pretty: bool,
}

impl Output {
    fn print<T: Serialize>(&self, value: &T) {
        let s = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        match s {
            Ok(s) => println!("{s}"),
            Err(e) => warn!(error = %e, "Failed to serialize output"),
        }
    }
}
