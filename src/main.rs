use clap::{Parser, Subcommand};
use formatry::dispatch::{read_records, write_records};
use formatry::registry::{self, Target};
use formatry::sniff::guess_format;
use formatry::stream::{Sink, Source, WriteMode};
use formatry::Extras;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formatry", about = "Format sniffing and conversion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Guess the format of a file
    Sniff {
        input: PathBuf,
    },
    /// List registered formats and their bound roles
    Formats {
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stream a file's records to stdout, one JSON document per line
    Cat {
        input: PathBuf,
        /// Skip sniffing and use this format
        #[arg(short, long)]
        format: Option<String>,
        /// Extra reader options as key=value pairs
        #[arg(long = "opt")]
        opts: Vec<String>,
    },
    /// Convert between record formats, streaming
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// Target format
        #[arg(long)]
        to: String,
        /// Source format (sniffed when omitted)
        #[arg(long)]
        from: Option<String>,
        /// Append to the output instead of truncating it
        #[arg(long)]
        append: bool,
        /// Extra reader/writer options as key=value pairs
        #[arg(long = "opt")]
        opts: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    formatry::formats::install()?;

    match Cli::parse().command {
        // ── Sniff ────────────────────────────────────────────────────────────
        Commands::Sniff { input } => {
            let format = guess_format(Source::from(&input), None)?;
            println!("{format}");
        }

        // ── Formats ──────────────────────────────────────────────────────────
        Commands::Formats { json } => {
            let entries = registry::global()
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .entries();
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!(
                    "{:<12} {:>10} {:>8} {:>8} {:>14} {:>14}",
                    "Name", "Identifier", "RecRead", "RecWrite", "Typed readers", "Typed writers"
                );
                for e in entries {
                    println!(
                        "{:<12} {:>10} {:>8} {:>8} {:>14} {:>14}",
                        e.name,
                        yn(e.identifier),
                        yn(e.record_reader),
                        yn(e.record_writer),
                        e.typed_readers,
                        e.typed_writers,
                    );
                }
                println!();
                println!(
                    "Record-readable: {}",
                    registry::list_read_formats(Target::Records).join(", ")
                );
                println!(
                    "Record-writable: {}",
                    registry::list_write_formats(Target::Records).join(", ")
                );
            }
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, format, opts } => {
            let extras = parse_opts(&opts)?;
            let records = read_records(Source::from(&input), format.as_deref(), &extras)?;
            for item in records {
                let record = item?;
                match record.downcast::<Value>() {
                    Ok(value) => println!("{value}"),
                    Err(_) => println!("<non-JSON record>"),
                }
            }
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, to, from, append, opts } => {
            let extras = parse_opts(&opts)?;
            let mode = if append { WriteMode::Append } else { WriteMode::Truncate };
            let mut records = read_records(Source::from(&input), from.as_deref(), &extras)?;
            write_records(&mut records, &to, Sink::from(&output), mode, &extras)?;
            println!("Converted {} → {}", input.display(), output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_opts(pairs: &[String]) -> Result<Extras, String> {
    let mut extras = Extras::new();
    for pair in pairs {
        extras.insert_pair(pair)?;
    }
    Ok(extras)
}

fn yn(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
