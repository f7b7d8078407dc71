use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edcl_core::{EdclEvent, EdclLink, EdclObserver, LinkConfig, SerialChannel, TracingObserver};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "ESP serial EDCL debug link", long_about = None)]
struct Args {
    /// Serial device of the debug port
    #[arg(short, long)]
    device: Option<String>,

    /// Line rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// TOML link configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a text memory image (`%08x %08x` per line)
    Load { file: PathBuf },
    /// Dump memory to a text image
    Dump {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32)]
        size: u32,
        file: PathBuf,
    },
    /// Load a binary image
    LoadBin {
        #[arg(value_parser = parse_u32)]
        address: u32,
        file: PathBuf,
    },
    /// Dump memory to a binary image
    DumpBin {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32)]
        size: u32,
        file: PathBuf,
    },
    /// Write one word
    SetWord {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Read one word
    GetWord {
        #[arg(value_parser = parse_u32)]
        address: u32,
    },
    /// Pulse the reset register
    Reset {
        #[arg(value_parser = parse_u32)]
        address: u32,
    },
    /// Print the next message the target sends
    Listen,
    /// Write the effective configuration to a TOML file
    ConfigInit { file: PathBuf },
}

/// Accepts `0x`-prefixed hex or decimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

/// Logs through tracing and draws a progress bar for binary transfers.
struct ProgressObserver;

impl EdclObserver for ProgressObserver {
    fn on_event(&self, event: &EdclEvent) {
        TracingObserver.on_event(event);

        if let EdclEvent::Progress {
            operation,
            current,
            total,
        } = event
        {
            draw_progress(&operation.to_string(), *current, *total);
        }
    }
}

fn draw_progress(prefix: &str, current: u64, total: u64) {
    const SYMBOLS: u64 = 40;
    if total == 0 {
        return;
    }
    let filled = current * SYMBOLS / total;
    let bar: String = (0..SYMBOLS)
        .map(|i| if i < filled { '#' } else { ' ' })
        .collect();

    let mut stdout = std::io::stdout().lock();
    let end = if current == total { "\n" } else { "\r" };
    let _ = write!(stdout, "{}: [{}] {}%{}", prefix, bar, current * 100 / total, end);
    let _ = stdout.flush();
}

fn load_config(args: &Args) -> Result<LinkConfig> {
    let mut config = match &args.config {
        Some(path) => LinkConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LinkConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    Ok(config)
}

/// Reports the file size, not the padded transfer length.
fn loaded_message(file_size: u64, address: u32) -> String {
    format!("Loaded {} Bytes at {:08x}", file_size, address)
}

type Link = EdclLink<SerialChannel, ProgressObserver>;

/// Open the link, run one operation and close it again.
fn with_link<T>(
    config: &LinkConfig,
    op: impl FnOnce(&mut Link) -> edcl_core::Result<T>,
) -> Result<T> {
    let mut link = EdclLink::connect_with_observer(config.clone(), Arc::new(ProgressObserver))
        .with_context(|| format!("connecting to {}", config.device))?;
    let out = op(&mut link)?;
    link.disconnect();
    Ok(out)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    match args.command {
        Command::Load { file } => {
            let words = with_link(&config, |link| link.load_memory_text(&file))?;
            println!("Loaded {} words from {}", words, file.display());
        }
        Command::Dump {
            address,
            size,
            file,
        } => {
            with_link(&config, |link| link.dump_memory_text(address, size, &file))?;
            println!("Dumped {} Bytes starting at {:08x}", size, address);
        }
        Command::LoadBin { address, file } => {
            let size = std::fs::metadata(&file)
                .with_context(|| format!("reading {}", file.display()))?
                .len();
            with_link(&config, |link| link.load_memory_binary(address, &file))?;
            println!("{}", loaded_message(size, address));
        }
        Command::DumpBin {
            address,
            size,
            file,
        } => {
            with_link(&config, |link| link.dump_memory_binary(address, size, &file))?;
            println!("Dumped {} Bytes starting at {:08x}", size, address);
        }
        Command::SetWord { address, value } => {
            with_link(&config, |link| link.set_word(address, value))?;
            println!("Write {:08x} at {:08x}", value, address);
        }
        Command::GetWord { address } => {
            let value = with_link(&config, |link| link.get_word(address))?;
            println!("Read {:08x} at {:08x}", value, address);
        }
        Command::Reset { address } => {
            with_link(&config, |link| link.reset_target(address))?;
            println!("Reset ESP processor cores");
        }
        Command::Listen => {
            let bytes = with_link(&config, |link| link.listen())?;
            println!("Incoming message: {}", String::from_utf8_lossy(&bytes));
        }
        Command::ConfigInit { file } => {
            config.save_to_file(&file)?;
            info!(path = %file.display(), "Configuration written");
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
