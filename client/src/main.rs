//! BLP client entry point.
//!
//! One subcommand per monitor action. Prints the rendered response and
//! exits non-zero when the monitor answers with an error envelope.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use blp_client::{label_params, render, Client};

/// Command-line client for the BLP Monitor.
#[derive(Parser)]
#[command(name = "blp-client", version, about)]
struct Cli {
    /// Monitor host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Monitor port.
    #[arg(long, default_value_t = 5010)]
    port: u16,
    /// Print the raw JSON response instead of text.
    #[arg(long)]
    json: bool,
    /// Action to perform.
    #[command(subcommand)]
    command: Command,
}

/// Available actions.
#[derive(Subcommand)]
enum Command {
    /// Register a subject (or replace its label).
    AddSubject {
        /// Subject id.
        id: String,
        /// Clearance level index.
        level: i64,
        /// Comma-separated categories.
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },
    /// Register an object (or replace its label).
    AddObject {
        /// Object id.
        id: String,
        /// Classification level index.
        level: i64,
        /// Comma-separated categories.
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },
    /// Change an existing subject's label.
    SetLabel {
        /// Subject id.
        id: String,
        /// New level index.
        level: i64,
        /// Comma-separated categories.
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },
    /// Temporarily lower a subject's level.
    OverrideLevel {
        /// Subject id.
        id: String,
        /// Temporary level index.
        level: i64,
    },
    /// Clear a subject's temporary level.
    RestoreLevel {
        /// Subject id.
        id: String,
    },
    /// Ask for read access.
    Read {
        /// Subject id.
        subject: String,
        /// Object id.
        object: String,
    },
    /// Ask for write access.
    Write {
        /// Subject id.
        subject: String,
        /// Object id.
        object: String,
    },
    /// List registered subjects.
    ListSubjects,
    /// List registered objects.
    ListObjects,
}

impl Command {
    fn into_request(self) -> (&'static str, Value) {
        match self {
            Self::AddSubject {
                id,
                level,
                categories,
            } => ("add_subject", label_params(&id, level, &categories)),
            Self::AddObject {
                id,
                level,
                categories,
            } => ("add_object", label_params(&id, level, &categories)),
            Self::SetLabel {
                id,
                level,
                categories,
            } => ("set_label", label_params(&id, level, &categories)),
            Self::OverrideLevel { id, level } => {
                ("override_level", json!({ "sid": id, "level": level }))
            }
            Self::RestoreLevel { id } => ("restore_level", json!({ "sid": id })),
            Self::Read { subject, object } => {
                ("read", json!({ "subj_id": subject, "obj_id": object }))
            }
            Self::Write { subject, object } => {
                ("write", json!({ "subj_id": subject, "obj_id": object }))
            }
            Self::ListSubjects => ("list_subjects", Value::Null),
            Self::ListObjects => ("list_objects", Value::Null),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    blp_monitor::logging::init_cli("warn");

    let addr = format!("{}:{}", cli.host, cli.port);
    let (action, params) = cli.command.into_request();

    let mut client = Client::connect(&addr).await?;
    let response = client
        .send(action, params)
        .await
        .with_context(|| format!("{action} request failed"))?;

    let text = if cli.json {
        serde_json::to_string_pretty(&response)?
    } else {
        render(&response)
    };

    if response.is_ok() {
        println!("{text}");
        Ok(())
    } else {
        eprintln!("{text}");
        std::process::exit(1);
    }
}
