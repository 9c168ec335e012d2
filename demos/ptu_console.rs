//! Interactive PTU console: scan for PRUs and drive them from the keyboard.
//!
//! Run with: cargo run --example ptu_console
//!
//! Press 'h' for the command list, Ctrl-C to quit.

use std::io::{self, Write};
use std::sync::Arc;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;
use wpt_ptu_ble::{
    spawn_ticker, BtleplugStack, Central, Error, EventLoop, HostPower, LogIndicator, PtuConfig,
    Result, TickSignal, HELP_TEXT,
};

/// Stderr writer that keeps log lines aligned while the terminal is in raw mode.
struct RawStderr;

impl Write for RawStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stderr = io::stderr().lock();
        for line in buf.split_inclusive(|b| *b == b'\n') {
            match line.strip_suffix(b"\n") {
                Some(text) => {
                    stderr.write_all(text)?;
                    stderr.write_all(b"\r\n")?;
                }
                None => stderr.write_all(line)?,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Forward key presses until Ctrl-C; dropping the sender ends the loop.
fn spawn_key_reader(keys: mpsc::UnboundedSender<char>) {
    std::thread::spawn(move || loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    break;
                }
                if let KeyCode::Char(c) = key.code {
                    if keys.send(c).is_err() {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wpt_ptu_ble=info".parse().unwrap()),
        )
        .with_writer(|| RawStderr)
        .init();

    println!("Starting PTU console...");
    println!("Place a PRU on the charging pad and press 'z' + index, then 'c'.\n");

    let config = PtuConfig::default();
    let (stack, events) = BtleplugStack::new(&config).await?;

    let tick = Arc::new(TickSignal::new());
    let ticker = spawn_ticker(tick.clone(), config.tick_interval);

    terminal::enable_raw_mode().map_err(|e| Error::Internal(e.to_string()))?;
    let (key_tx, keys) = mpsc::unbounded_channel();
    spawn_key_reader(key_tx);

    tracing::info!("\n{}", HELP_TEXT);

    let central = Central::new(config, stack, HostPower, LogIndicator);
    let mut event_loop = EventLoop::new(central, events, keys, tick);
    let result = event_loop.run().await;

    ticker.abort();
    let _ = terminal::disable_raw_mode();

    let central = event_loop.into_central();
    println!("\r\nDiscovered {} PRU(s):\r", central.registry().count());
    for (index, peer) in central.registry().iter().enumerate() {
        println!(
            "  [{}] {} rssi {} dBm, {} reports\r",
            index,
            peer.address(),
            peer.last_rssi(),
            peer.report_count()
        );
    }

    result
}
