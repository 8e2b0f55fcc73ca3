// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use kvstore::config::StoreConfig;
use kvstore::storage::{Database, DatabaseError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: kvstore <get KEY | put KEY VALUE | dump | verify>";

/// A single command-line invocation.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get { key: String },
    Put { key: String, value: String },
    Dump,
    Verify,
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        match args {
            [cmd, key] if cmd == "get" => Some(Self::Get { key: key.clone() }),
            [cmd, key, value] if cmd == "put" => Some(Self::Put {
                key: key.clone(),
                value: value.clone(),
            }),
            [cmd] if cmd == "dump" => Some(Self::Dump),
            [cmd] if cmd == "verify" => Some(Self::Verify),
            _ => None,
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::debug!(
        "Loaded configuration: database_path={}, lock_timeout={:?}",
        config.database_path.display(),
        config.lock_timeout
    );

    let mut db = match Database::open_with_config(&config.database_path, &config) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open {}: {e}", config.database_path.display());
            std::process::exit(1);
        }
    };

    let result = run(&mut db, &command);
    let closed = db.close();

    if let Err(e) = result {
        if e.is_not_found() {
            eprintln!("not found");
        } else {
            tracing::error!("{e}");
        }
        std::process::exit(1);
    }
    if let Err(e) = closed {
        tracing::error!("Failed to close database: {e}");
        std::process::exit(1);
    }
}

fn run(db: &mut Database, command: &Command) -> Result<(), DatabaseError> {
    match command {
        Command::Get { key } => {
            let value = db.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Command::Put { key, value } => {
            db.put(key.as_bytes(), value.as_bytes())?;
            db.commit()?;
        }
        Command::Dump => {
            for pair in db.traverse()? {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&pair.key),
                    String::from_utf8_lossy(&pair.value)
                );
            }
        }
        Command::Verify => {
            let stats = db.verify()?;
            println!(
                "ok: depth={} nodes={} entries={}",
                stats.depth, stats.node_count, stats.entry_count
            );
        }
    }
    Ok(())
}
