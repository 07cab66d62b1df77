//! Event example: replay a captured device log through a set of filters.
//!
//! Reads a log written by a switchboard, runs every line through the
//! filters in a file or directory, and prints the most recent event per
//! label along with any reboot that happened without a trigger.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example events -- /tmp/lab/rpi-01.txt /etc/lab/filters
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use switchboard::config::{HOST_TIMESTAMP_LENGTH, LOG_LINE_HEADER_LENGTH};
use switchboard::parser::event_file_path_for;
use switchboard::EventParser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: events <log file> <filter file or directory>");
        std::process::exit(1);
    }
    let log_path = PathBuf::from(&args[1]);
    let filter_path = PathBuf::from(&args[2]);

    // Replay into a separate event file so the live one is left alone
    let replay_path = event_file_path_for(&log_path).with_extension("replay.txt");
    if replay_path.exists() {
        std::fs::remove_file(&replay_path)?;
    }
    let parser = EventParser::new("replay", &replay_path);
    parser.load_filters(&[&filter_path])?;
    println!("Loaded {} filter(s)", parser.filter_count());

    let log_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let text = std::fs::read_to_string(&log_path)?;
    let mut matched = 0;
    for line in text.split_inclusive('\n') {
        matched += parser.process_line(
            line,
            HOST_TIMESTAMP_LENGTH + LOG_LINE_HEADER_LENGTH,
            log_name.as_deref(),
        )?;
    }
    println!("{} event(s) written to {}\n", matched, replay_path.display());

    for label in parser.get_event_labels(None)? {
        let result = parser
            .get_last_event(&[label.as_str()], Duration::from_secs(1))
            .await?;
        let count = parser
            .get_event_history_count(&label, Duration::from_secs(1))
            .await?
            .count;
        match result.results.first() {
            Some(event) => println!(
                "{:40} {:>5}  last at {} {:?}",
                label,
                count,
                event.system_timestamp,
                event.groups(&label).unwrap_or_default()
            ),
            None => println!("{:40} {:>5}", label, count),
        }
    }

    let unexpected = parser.get_unexpected_reboots().await?;
    if !unexpected.is_empty() {
        println!("\n{} unexpected reboot(s):", unexpected.len());
        for event in unexpected {
            println!("  {} {}", event.system_timestamp, event.raw_log_line.trim_end());
        }
    }
    Ok(())
}
