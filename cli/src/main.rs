//! The meshtalk binary: argument parsing, the input/output adapter
//! threads, and the event loop.
//!
//! The client itself is single-threaded; the two threads here are
//! pure I/O adapters. The input thread reads lines and pushes them
//! onto a bounded queue; the output thread drains the console queue.
//! Both share one mutex so the prompt and the output never interleave
//! mid-line.

mod plot;

use {
    clap::Parser,
    crossbeam_channel::bounded,
    log::error,
    meshtalk_core::{Client, ClientOptions, Console, NicknameRegistry},
    meshtalk_net::{
        config::{DEFAULT_MULTICAST_PORT, DEFAULT_PEER_PORT},
        NetConfig,
    },
    std::{
        io::{BufRead, Write},
        sync::{Arc, Mutex},
        thread,
    },
};

/// Bound of the pending-command queue; typing faster than the tick
/// drains simply blocks the input thread.
const COMMAND_QUEUE_DEPTH: usize = 64;

#[derive(Parser)]
#[command(
    name = "meshtalk",
    version,
    about = "Peer-to-peer group chat over a LAN overlay"
)]
struct Cli {
    /// Enable debugging output
    #[arg(short = 'd', long)]
    debug: bool,

    /// Discovery multicast port
    #[arg(
        short = 'm',
        long = "multicastPort",
        default_value_t = DEFAULT_MULTICAST_PORT,
        value_parser = parse_port
    )]
    multicast_port: u16,

    /// Peer link port
    #[arg(
        short = 'p',
        long = "peerPort",
        default_value_t = DEFAULT_PEER_PORT,
        value_parser = parse_port
    )]
    peer_port: u16,

    /// Nickname: one to nine letters or digits
    #[arg(short = 'n', long, value_parser = parse_nickname)]
    nickname: Option<String>,
}

fn parse_port(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err("ports are 1-65535".to_string()),
        Ok(port) => Ok(port),
    }
}

fn parse_nickname(value: &str) -> Result<String, String> {
    if NicknameRegistry::is_valid(value) {
        Ok(value.to_string())
    } else {
        Err("nicknames are one to nine letters or digits".to_string())
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "warn" }),
    )
    .init();

    let (console, console_rx) = Console::channel(cli.debug);
    let (command_tx, command_rx) = bounded::<String>(COMMAND_QUEUE_DEPTH);
    let prompt_mutex = Arc::new(Mutex::new(()));

    // output thread: drains the console queue until the client drops
    let output_thread = {
        let prompt_mutex = Arc::clone(&prompt_mutex);
        thread::spawn(move || {
            for line in console_rx {
                let _guard = prompt_mutex.lock().unwrap_or_else(|e| e.into_inner());
                println!("{line}");
            }
        })
    };

    // input thread: prompt, read, trim, enqueue
    {
        let prompt_mutex = Arc::clone(&prompt_mutex);
        thread::spawn(move || {
            let stdin = std::io::stdin();
            loop {
                {
                    let _guard = prompt_mutex.lock().unwrap_or_else(|e| e.into_inner());
                    print!("> ");
                    let _ = std::io::stdout().flush();
                }
                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => break, // stdin closed
                    Ok(_) => {
                        if command_tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    let config = NetConfig {
        multicast_port: cli.multicast_port,
        peer_port: cli.peer_port,
        ..NetConfig::default()
    };
    let options = ClientOptions {
        nickname: cli.nickname,
        ..ClientOptions::default()
    };

    let mut client = match Client::new(
        config,
        options,
        command_rx,
        console,
        Some(Box::new(plot::PlotRenderer)),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("startup failed: {e}");
            eprintln!("meshtalk: startup failed: {e}");
            std::process::exit(1);
        }
    };

    let outcome = client.run();
    // dropping the client closes the console queue; the output thread
    // drains what is left and exits
    drop(client);
    let _ = output_thread.join();

    if let Err(e) = outcome {
        eprintln!("meshtalk: {e}");
        std::process::exit(1);
    }
}
