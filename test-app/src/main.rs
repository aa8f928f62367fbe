// wxlink test application -- CLI tool for exercising the station drivers
// against real hardware or a scripted mock console.
//
// Usage:
//   wxlink-test-app list
//   wxlink-test-app discover --timeout 3
//   wxlink-test-app monitor --station wmr928 --port /dev/ttyS0 --primary-channel 1
//   wxlink-test-app monitor --station wmr100 --device /dev/hidraw0 --duration 120
//   wxlink-test-app monitor --station gw1000 --host 192.168.1.50 --interval 16
//   wxlink-test-app monitor --station wmr928 --mock
//   wxlink-test-app livedata --host 192.168.1.50
//   wxlink-test-app firmware --host 192.168.1.50
//
// Logging follows RUST_LOG; each -v raises the default level
// (warn -> info -> debug -> trace).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wxlink::codec::checksum::sum8;
use wxlink::ecowitt::client::format_mac;
use wxlink::ecowitt::{discovery, Gateway, GatewayBuilder};
use wxlink::oregon::{OregonStation, OregonStationBuilder, StationModel};
use wxlink::transport::ReconnectPolicy;
use wxlink::{BroadcastSink, ConnectionState, DecodedReading, IngestionSink};
use wxlink_test_harness::{MockConnector, MockTransport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// wxlink test application -- exercises station drivers from the command line.
#[derive(Parser)]
#[command(name = "wxlink-test-app", version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Station {
    Wmr928,
    Wmr100,
    Gw1000,
}

#[derive(clap::Args, Debug)]
struct GatewayArgs {
    /// Gateway IP address or host name.
    #[arg(long)]
    host: String,

    /// LAN API port.
    #[arg(long, default_value_t = wxlink::ecowitt::commands::DEFAULT_PORT)]
    gw_port: u16,

    /// Reply timeout in milliseconds.
    #[arg(long, default_value_t = 2500)]
    timeout_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// List supported station families.
    List,

    /// Find GW1000 gateways on the LAN.
    Discover {
        /// Seconds to wait for replies.
        #[arg(long, default_value_t = 3)]
        timeout: u64,
    },

    /// Stream decoded readings until Ctrl-C or the duration elapses.
    Monitor {
        #[arg(long, value_enum)]
        station: Station,

        /// Serial port of a WMR928 (e.g. /dev/ttyS0).
        #[arg(long)]
        port: Option<String>,

        /// hidraw node of a WMR100 (e.g. /dev/hidraw0).
        #[arg(long)]
        device: Option<String>,

        /// Gateway address of a GW1000.
        #[arg(long)]
        host: Option<String>,

        /// Hardware channel treated as the outdoor sensor.
        #[arg(long)]
        primary_channel: Option<u8>,

        /// GW1000 poll interval in seconds.
        #[arg(long, default_value_t = 10)]
        interval: u64,

        /// Connection attempts per reconnect sequence.
        #[arg(long, default_value_t = 5)]
        attempts: u32,

        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Feed a scripted WMR928 stream instead of opening hardware.
        #[arg(long)]
        mock: bool,
    },

    /// Request one live-data snapshot from a GW1000.
    Livedata {
        #[command(flatten)]
        gateway: GatewayArgs,
    },

    /// Read firmware version and MAC from a GW1000.
    Firmware {
        #[command(flatten)]
        gateway: GatewayArgs,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_reading(reading: &DecodedReading) -> String {
    match reading {
        DecodedReading::Wind {
            gust,
            bearing,
            average,
            ..
        } => format!("wind        {average:.1} m/s avg, {gust:.1} m/s gust, {bearing:.0} deg"),
        DecodedReading::WindChill { value, .. } => format!("wind chill  {value:.1} C"),
        DecodedReading::Rain { rate, total, .. } => {
            format!("rain        {rate:.1} mm/h, {total:.1} mm total")
        }
        DecodedReading::Temperature { slot, value, .. } => {
            format!("temperature {:<10} {value:.1} C", slot.to_string())
        }
        DecodedReading::Humidity { slot, value } => format!("humidity    {:<10} {value:.0} %", slot.to_string()),
        DecodedReading::Pressure { value, .. } => format!("pressure    {value:.1} hPa"),
        DecodedReading::ForecastCode { code } => format!("forecast    code {code}"),
        DecodedReading::Uv { index, .. } => format!("uv          index {index:.0}"),
        DecodedReading::BatteryLow { slot, low } => {
            format!(
                "battery     {:<10} {}",
                slot.to_string(),
                if *low { "LOW" } else { "ok" }
            )
        }
    }
}

/// Print every reading published on `sink` until cancelled.
async fn print_readings(sink: &BroadcastSink, cancel: CancellationToken) {
    let mut rx = sink.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = rx.recv() => match r {
                Ok(reading) => println!("{}", format_reading(&reading)),
                Err(RecvError::Lagged(n)) => println!("[warning] missed {n} readings"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Cancel `cancel` on Ctrl-C or once `duration_secs` elapses (0 = never).
fn spawn_stop_signal(cancel: CancellationToken, duration_secs: u64) {
    tokio::spawn(async move {
        let elapsed = async {
            if duration_secs > 0 {
                tokio::time::sleep(Duration::from_secs(duration_secs)).await;
                println!("Monitor duration elapsed.");
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = elapsed => {}
        }
        cancel.cancel();
    });
}

/// Log connection state transitions of a link.
fn spawn_state_printer(
    mut states: tokio::sync::watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("[link] {}", *states.borrow());
                }
            }
        }
    });
}

fn gateway_from(args: &GatewayArgs) -> Result<Gateway> {
    GatewayBuilder::new()
        .address(&args.host)
        .port(args.gw_port)
        .command_timeout(Duration::from_millis(args.timeout_ms))
        .reconnect_policy(ReconnectPolicy {
            max_attempts: 1,
            ..ReconnectPolicy::default()
        })
        .build()
        .context("invalid gateway settings")
}

/// A WMR928 frame from the bytes after the sync marker.
fn wmr928_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = vec![0xFF, 0xFF];
    frame.extend_from_slice(body);
    frame.push(sum8(&frame));
    frame
}

/// A mock WMR928 console: a few cycles of wind, rain, outdoor and indoor
/// frames with line noise, split into random chunks.
fn mock_wmr928_connector() -> MockConnector {
    let mut rng = StdRng::seed_from_u64(928);
    let mut stream = Vec::new();
    for cycle in 0..5u8 {
        stream.extend(wmr928_frame(&[0x00, 0x00, 0x70, 0x22, 0x05, 0x31, 0x00, 0x05]));
        stream.extend(wmr928_frame(&[
            0x01, 0x00, 0x12, 0x50, 0x34, 0x12, 0, 0, 0, 0, 0, 0, 0,
        ]));
        stream.extend(wmr928_frame(&[0x03, 0x00, 0x30 + cycle, 0x02, 0x55, 0x12]));
        stream.extend(wmr928_frame(&[
            0x05, 0x00, 0x15, 0x02, 0x45, 0x08, 0x20, 0x0C, 0x32, 0x19,
        ]));
        // Noise between cycles.
        stream.extend((0..rng.gen_range(0..4)).map(|_| rng.gen_range(0x00..0xF0u8)));
    }

    let mut transport = MockTransport::streaming();
    let mut rest = stream.as_slice();
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(16));
        transport.push_read(&rest[..n]);
        rest = &rest[n..];
    }

    let connector = MockConnector::new();
    connector.push_transport(transport);
    connector
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    println!("{:<18}  {:<8}  {:<8}  Mode", "Vendor", "Model", "Link");
    println!(
        "{:<18}  {:<8}  {:<8}  {}",
        "-".repeat(18),
        "-".repeat(8),
        "-".repeat(8),
        "-".repeat(9)
    );
    for station in wxlink::supported_stations() {
        println!(
            "{:<18}  {:<8}  {:<8}  {}",
            station.vendor,
            station.model,
            station.connection,
            if station.streaming { "streaming" } else { "polled" }
        );
    }
    Ok(())
}

async fn cmd_discover(timeout_secs: u64) -> Result<()> {
    println!("Discovering GW1000 gateways on the LAN ({timeout_secs} seconds)...");
    println!();

    let gateways = discovery::discover(Duration::from_secs(timeout_secs))
        .await
        .context("gateway discovery failed")?;

    if gateways.is_empty() {
        println!("No gateways found.");
        return Ok(());
    }

    println!("{:<17}  {:<21}  Name", "MAC", "Address");
    println!("{:<17}  {:<21}  {}", "-".repeat(17), "-".repeat(21), "-".repeat(24));
    for gw in &gateways {
        println!("{:<17}  {:<21}  {}", gw.mac_string(), gw.address(), gw.name);
    }
    println!();
    println!("{} gateway(s) found.", gateways.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_monitor(
    station: Station,
    port: Option<&str>,
    device: Option<&str>,
    host: Option<&str>,
    primary_channel: Option<u8>,
    interval: u64,
    attempts: u32,
    duration: u64,
    mock: bool,
) -> Result<()> {
    let policy = ReconnectPolicy {
        max_attempts: attempts,
        ..ReconnectPolicy::default()
    };
    let sink = Arc::new(BroadcastSink::new(256));
    let cancel = CancellationToken::new();
    spawn_stop_signal(cancel.clone(), duration);

    println!("Monitoring {station:?} (Ctrl-C to stop)...");

    match station {
        Station::Wmr928 | Station::Wmr100 => {
            let model = if station == Station::Wmr928 {
                StationModel::Wmr928
            } else {
                StationModel::Wmr100
            };
            let mut builder = OregonStationBuilder::new(model).reconnect_policy(policy);
            if let Some(ch) = primary_channel {
                builder = builder.primary_channel(ch);
            }
            let oregon: OregonStation = if mock {
                if model != StationModel::Wmr928 {
                    bail!("--mock is only available for the WMR928");
                }
                builder.build_with_connector(Box::new(mock_wmr928_connector()))
            } else {
                if let Some(port) = port {
                    builder = builder.serial_port(port);
                }
                if let Some(device) = device {
                    builder = builder.hid_device(device);
                }
                builder.build().context("invalid station settings")?
            };

            spawn_state_printer(oregon.link().subscribe_state(), cancel.clone());
            let reader = oregon.spawn_with_cancel(sink.clone(), cancel.child_token());
            print_readings(&sink, cancel.clone()).await;
            let stats = reader.shutdown().await;
            println!();
            println!(
                "frames: {} decoded, {} ignored, {} unhandled; {} checksum failures, \
                 {} fields skipped, {} resyncs, {} transport errors",
                stats.frames_decoded,
                stats.frames_ignored,
                stats.frames_unhandled,
                stats.checksum_failures,
                stats.fields_skipped,
                stats.sync.resyncs,
                stats.transport_errors
            );
        }
        Station::Gw1000 => {
            if mock {
                bail!("--mock is only available for the WMR928");
            }
            let host = host.context("--host is required for the GW1000")?;
            let gateway = GatewayBuilder::new()
                .address(host)
                .reconnect_policy(policy)
                .poll_interval(Duration::from_secs(interval.max(1)))
                .build()
                .context("invalid gateway settings")?;

            spawn_state_printer(gateway.client().link().subscribe_state(), cancel.clone());
            let poller = gateway.spawn_poller_with_cancel(sink.clone(), cancel.child_token());
            print_readings(&sink, cancel.clone()).await;
            let stats = poller.shutdown().await;
            println!();
            println!(
                "polls: {} completed, {} failed, {} partial",
                stats.polls, stats.failures, stats.partial
            );
        }
    }

    Ok(())
}

async fn cmd_livedata(args: &GatewayArgs) -> Result<()> {
    let gateway = gateway_from(args)?;
    let sink = BroadcastSink::new(256);
    let mut rx = sink.subscribe();

    let walk = gateway
        .client()
        .read_live_data(&sink as &dyn IngestionSink)
        .await
        .context("no live data from gateway")?;
    gateway.client().shutdown().await;

    while let Ok(reading) = rx.try_recv() {
        println!("{}", format_reading(&reading));
    }
    println!();
    match walk.stopped_at {
        None => println!("{} items decoded.", walk.items),
        Some(id) => println!(
            "{} items decoded; stopped at unknown item 0x{id:02X}.",
            walk.items
        ),
    }
    Ok(())
}

async fn cmd_firmware(args: &GatewayArgs) -> Result<()> {
    let gateway = gateway_from(args)?;
    let client = gateway.client();

    let version = client
        .read_firmware_version()
        .await
        .context("no firmware version reply")?;
    println!("Firmware: {version}");

    match client.read_mac().await {
        Some(mac) => println!("MAC:      {}", format_mac(&mac)),
        None => println!("MAC:      (no reply)"),
    }
    client.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::List => cmd_list(),
        Command::Discover { timeout } => cmd_discover(*timeout).await,
        Command::Monitor {
            station,
            port,
            device,
            host,
            primary_channel,
            interval,
            attempts,
            duration,
            mock,
        } => {
            cmd_monitor(
                *station,
                port.as_deref(),
                device.as_deref(),
                host.as_deref(),
                *primary_channel,
                *interval,
                *attempts,
                *duration,
                *mock,
            )
            .await
        }
        Command::Livedata { gateway } => cmd_livedata(gateway).await,
        Command::Firmware { gateway } => cmd_firmware(gateway).await,
    }
}
