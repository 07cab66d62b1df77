//! Console example: capture a device and run a command over it.
//!
//! Connects to a device console over a serial port or a raw TCP socket
//! (for example a ser2net or terminal server port), sends a command, waits
//! for the shell prompt and prints what came back. Everything the device
//! emits is captured to `<log-dir>/<device>.txt`.
//!
//! # Usage
//!
//! Serial console:
//! ```bash
//! cargo run --example console -- --serial /dev/ttyUSB0 --baud 115200 --command "uname -a"
//! ```
//!
//! Terminal server port:
//! ```bash
//! cargo run --example console -- --socket 10.0.0.5:4001 --prompt 'root@\S+:~# '
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use switchboard::{ExpectOptions, SwitchboardBuilder, TransportSpec};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let Some(transport) = args.transport() else {
        eprintln!("Error: Must provide either --serial or --socket");
        std::process::exit(1);
    };

    let sb = SwitchboardBuilder::new(&args.device)
        .log_directory(&args.log_dir)
        .port(transport)
        .build()
        .await?;

    println!("Opening console...");
    sb.open_transport(0).await?;
    println!("Connected, logging to {}", sb.log_path().display());

    let options = ExpectOptions::new().timeout(Duration::from_secs(args.timeout));
    println!("\nExecuting: {}", args.command);
    println!("{}", "-".repeat(50));

    let response = sb.send_and_expect(&args.command, &[&args.prompt], &options).await?;
    if response.timed_out {
        eprintln!("No prompt within {}s, captured so far:", args.timeout);
        print!("{}", response.before);
    } else {
        print!("{}", response.before);
    }

    println!("{}", "-".repeat(50));
    println!("Completed in {:?}", response.elapsed);

    sb.close().await?;
    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    device: String,
    serial: Option<String>,
    baud: u32,
    socket: Option<String>,
    command: String,
    prompt: String,
    log_dir: PathBuf,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Self {
            device: "console".to_string(),
            serial: None,
            baud: 115_200,
            socket: None,
            command: "uname -a".to_string(),
            prompt: r"[#$] $".to_string(),
            log_dir: env::temp_dir(),
            timeout: 10,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match (args[i].as_str(), value) {
                ("--device", Some(v)) => parsed.device = v,
                ("--serial", Some(v)) => parsed.serial = Some(v),
                ("--baud", Some(v)) => parsed.baud = v.parse().unwrap_or(115_200),
                ("--socket", Some(v)) => parsed.socket = Some(v),
                ("--command", Some(v)) => parsed.command = v,
                ("--prompt", Some(v)) => parsed.prompt = v,
                ("--log-dir", Some(v)) => parsed.log_dir = PathBuf::from(v),
                ("--timeout", Some(v)) => parsed.timeout = v.parse().unwrap_or(10),
                ("--help", _) => {
                    Self::print_help();
                    std::process::exit(0);
                }
                (other, _) => {
                    eprintln!("Unknown or incomplete argument: {}", other);
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }
        parsed
    }

    fn transport(&self) -> Option<TransportSpec> {
        if let Some(path) = &self.serial {
            return Some(TransportSpec::Serial {
                path: path.clone(),
                baud_rate: self.baud,
            });
        }
        let (host, port) = self.socket.as_ref()?.rsplit_once(':')?;
        Some(TransportSpec::Socket {
            host: host.to_string(),
            port: port.parse().ok()?,
        })
    }

    fn print_help() {
        println!(
            r#"switchboard console example

USAGE:
    cargo run --example console -- [OPTIONS]

OPTIONS:
    --serial <PATH>       Serial device node
    --baud <RATE>         Serial baud rate [default: 115200]
    --socket <HOST:PORT>  Raw TCP console
    --device <NAME>       Device name used for the log [default: console]
    --command <CMD>       Command to run [default: uname -a]
    --prompt <REGEX>      Prompt to wait for [default: [#$] $]
    --log-dir <DIR>       Log directory [default: system temp dir]
    --timeout <SECS>      Expect timeout [default: 10]
    --help                Print this help message
"#
        );
    }
}
