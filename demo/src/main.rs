//! Command-line driver for the `icmp-pinger` engine.
//!
//! This binary is the "driver" the library describes but deliberately does
//! not implement: it supplies send cadence, result printing, and Ctrl-C
//! handling, none of which belong in the engine itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use icmp_pinger::{DriveOutcome, EventSink, FamilyPolicy, PingEvent, Pinger};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Ping a host over ICMP and print round-trip times")]
struct Args {
    /// Host name or literal IP address to ping.
    host: String,

    /// Address family to resolve: any, v4, or v6.
    #[arg(long, default_value = "any")]
    family: String,

    /// Interval between pings, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Number of pings to send before stopping. 0 means unlimited.
    #[arg(long, default_value_t = 4)]
    count: u32,
}

fn parse_family(value: &str) -> Result<FamilyPolicy> {
    match value {
        "any" => Ok(FamilyPolicy::Any),
        "v4" => Ok(FamilyPolicy::V4),
        "v6" => Ok(FamilyPolicy::V6),
        other => anyhow::bail!("unknown family {other:?}, expected any, v4, or v6"),
    }
}

/// Tracks send timestamps by sequence number so round-trip time can be
/// computed on `Received`; owned by the driver, not the engine.
struct SentAt(HashMap<u16, Instant>);

impl SentAt {
    fn new() -> Self {
        Self(HashMap::new())
    }

    fn record(&mut self, sequence: u16) {
        self.0.insert(sequence, Instant::now());
    }

    fn take_elapsed(&mut self, sequence: u16) -> Option<Duration> {
        self.0.remove(&sequence).map(|sent| sent.elapsed())
    }
}

struct PrintingSink<'a> {
    sent_at: &'a mut SentAt,
}

impl EventSink for PrintingSink<'_> {
    fn on_event(&mut self, event: PingEvent) {
        match event {
            PingEvent::Started(addr) => info!("PING {addr}"),
            PingEvent::Sent { sequence, packet } => {
                self.sent_at.record(sequence);
                info!("-> seq={sequence} {} bytes", packet.len());
            }
            PingEvent::SendFailed {
                sequence, error, ..
            } => warn!("send failed seq={sequence}: {error}"),
            PingEvent::Received { sequence, packet } => match self.sent_at.take_elapsed(sequence) {
                Some(rtt) => println!(
                    "{} bytes from seq={sequence}: time={:.2}ms",
                    packet.len(),
                    rtt.as_secs_f64() * 1000.0
                ),
                None => println!("{} bytes from seq={sequence}: time=?", packet.len()),
            },
            PingEvent::Unexpected(bytes) => warn!("discarded unexpected {}-byte packet", bytes.len()),
            PingEvent::Failed(error) => warn!("session failed: {error}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let policy = parse_family(&args.family)?;

    let mut pinger: Pinger = Pinger::new(args.host.clone(), policy);
    pinger.start();

    let mut sent_at = SentAt::new();
    let interval = Duration::from_millis(args.interval_ms);
    let mut ticker = tokio::time::interval(interval);
    let mut sent_count = 0u32;

    loop {
        let mut sink = PrintingSink {
            sent_at: &mut sent_at,
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                pinger.stop();
                break;
            }
            outcome = pinger.drive(&mut sink) => {
                if outcome == DriveOutcome::Stopped {
                    break;
                }
            }
            _ = ticker.tick(), if pinger.state() == icmp_pinger::State::Active
                && (args.count == 0 || sent_count < args.count) =>
            {
                pinger.send_ping(&mut sink, None);
                sent_count += 1;
            }
        }

        if args.count != 0 && sent_count >= args.count && pinger.state() == icmp_pinger::State::Active {
            pinger.stop();
            break;
        }
    }

    Ok(())
}
