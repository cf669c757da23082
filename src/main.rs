use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::Rng;

use rclink_rs::air::{AirBand, AirBandMask, AirInfo, Capabilities, SupportedModes};
use rclink_rs::link::{AirConfig, LinkEngine, RxBinder, RxEngine, TxBinder, TxEngine};
use rclink_rs::radio::SharedMedium;
use rclink_rs::rc::data::ChannelSource;
use rclink_rs::rc::{FakeChannelSource, RcData, TelemetryId, TelemetryValue};
use rclink_rs::store::{MemoryPairingStore, PairingStore, PeerEntry};
use rclink_rs::util::{millis_to_micros, TimeMicros};
use rclink_rs::{init_logger, log_info};

#[derive(Parser)]
#[command(name = "rclink-cli")]
#[command(about = "Simulator CLI for the rclink air protocol")]
struct Cli {
    /// Directory holding the simulated nodes' persisted state
    #[arg(short, long, default_value = ".rclink")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cold bind between a simulated TX and RX
    Bind {
        #[arg(short, long, default_value = "868")]
        band: u16,
    },
    /// Run the paired link for a while and report statistics
    Link {
        /// How long to run, in milliseconds
        #[arg(short, long, default_value = "5000")]
        duration_ms: u64,
        /// Probability of dropping any transmitted frame, 0.0..1.0
        #[arg(long, default_value = "0.0")]
        drop_rate: f64,
    },
}

fn parse_band(mhz: u16) -> anyhow::Result<AirBand> {
    let band = match mhz {
        147 => AirBand::Band147,
        169 => AirBand::Band169,
        315 => AirBand::Band315,
        433 => AirBand::Band433,
        470 => AirBand::Band470,
        868 => AirBand::Band868,
        915 => AirBand::Band915,
        _ => bail!("unsupported band: {mhz} MHz"),
    };
    Ok(band)
}

fn tx_info() -> AirInfo {
    AirInfo::new(
        Capabilities::FREQUENCY_868MHZ | Capabilities::SCREEN | Capabilities::BUTTON,
        20,
        16,
        SupportedModes::Modes1To5,
    )
}

fn rx_info() -> AirInfo {
    // No screen and no button: accepts binds automatically
    AirInfo::new(Capabilities::FREQUENCY_868MHZ, 17, 16, SupportedModes::Modes1To5)
}

struct Clock {
    start: Instant,
}

impl Clock {
    fn new() -> Clock {
        Clock {
            start: Instant::now(),
        }
    }

    fn now(&self) -> TimeMicros {
        TimeMicros(self.start.elapsed().as_micros() as u64 + 1)
    }
}

async fn run_bind(state_dir: &PathBuf, band: AirBand) -> anyhow::Result<()> {
    let mut tx_store = MemoryPairingStore::load_or_create(&state_dir.join("tx.json"))?;
    let mut rx_store = MemoryPairingStore::load_or_create(&state_dir.join("rx.json"))?;

    let config = AirConfig {
        band,
        bands: band.into(),
        modes: SupportedModes::Modes1To5,
    };
    let medium = SharedMedium::new();
    let mut tx_data = RcData::new();
    let mut rx_data = RcData::new();
    tx_data.set_telemetry(
        TelemetryId::PilotName,
        TelemetryValue::Str("sim-pilot".into()),
        TimeMicros(1),
    );
    rx_data.set_telemetry(
        TelemetryId::CraftName,
        TelemetryValue::Str("sim-craft".into()),
        TimeMicros(1),
    );

    let mut tx_binder = TxBinder::new(medium.radio(), config, tx_store.addr, tx_info());
    let mut rx_binder = RxBinder::new(medium.radio(), config, rx_store.addr, rx_info());

    let clock = Clock::new();
    tx_binder.open(&mut tx_data, clock.now())?;
    rx_binder.open(&mut rx_data, clock.now())?;

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let now = clock.now();
        tx_binder.update(&mut tx_data, now);
        rx_binder.update(&mut rx_data, now);

        if rx_binder.is_complete() {
            if let Some(pairing) = tx_binder.accepted_pairing(clock.now()) {
                let (tx_pairing, info, band) = pairing;
                tx_store.add_paired_rx(tx_pairing);
                tx_store.set_air_info(
                    tx_pairing.addr,
                    PeerEntry {
                        name: "sim-craft".into(),
                        info,
                        band: Some(band),
                    },
                );

                let (rx_pairing, tx_peer_info, band) =
                    rx_binder.pairing().context("rx pairing missing")?;
                rx_store.set_paired_tx(rx_pairing);
                rx_store.set_air_info(
                    rx_pairing.addr,
                    PeerEntry {
                        name: "sim-pilot".into(),
                        info: tx_peer_info,
                        band: Some(band),
                    },
                );
                break;
            }
        }
        if Instant::now() > deadline {
            bail!("bind did not complete within 10s");
        }
        tokio::time::sleep(Duration::from_micros(500)).await;
    }
    tx_binder.close();
    rx_binder.close();

    std::fs::create_dir_all(state_dir)?;
    tx_store.save(&state_dir.join("tx.json"))?;
    rx_store.save(&state_dir.join("rx.json"))?;
    log_info(&format!(
        "Bound: TX {} <-> RX {}",
        tx_store.addr, rx_store.addr
    ));
    Ok(())
}

async fn run_link(state_dir: &PathBuf, duration_ms: u64, drop_rate: f64) -> anyhow::Result<()> {
    let tx_store = MemoryPairingStore::load_or_create(&state_dir.join("tx.json"))?;
    let rx_store = MemoryPairingStore::load_or_create(&state_dir.join("rx.json"))?;

    let tx_pairing = tx_store.paired_rx(0).context("TX has no pairing; run bind first")?;
    let rx_pairing = rx_store.paired_tx().context("RX has no pairing; run bind first")?;
    let band = rx_store
        .air_info(&rx_pairing.addr)
        .and_then(|e| e.band)
        .unwrap_or(AirBand::Band868);

    let config = AirConfig {
        band,
        bands: AirBandMask::from(band),
        modes: SupportedModes::Modes1To5,
    };

    let medium = SharedMedium::new();
    if drop_rate > 0.0 {
        let drop_rate = drop_rate.clamp(0.0, 1.0);
        medium.set_drop_hook(move |_, _| rand::thread_rng().gen_bool(drop_rate));
    }

    let mut tx_data = RcData::new();
    let mut rx_data = RcData::new();
    tx_data.input_failsafe.set_max_interval(millis_to_micros(200));

    let mut tx = TxEngine::new(medium.radio(), config, tx_store.addr);
    tx.bind(
        tx_pairing,
        tx_store
            .air_info(&tx_pairing.addr)
            .map(|e| e.info)
            .unwrap_or_else(rx_info),
    );
    let mut rx = RxEngine::new(medium.radio(), config, rx_store.addr);
    rx.bind(
        rx_pairing,
        rx_store
            .air_info(&rx_pairing.addr)
            .map(|e| e.info)
            .unwrap_or_else(tx_info),
    );

    let clock = Clock::new();
    let mut source = FakeChannelSource::new(millis_to_micros(5));
    tx.open(&mut tx_data, clock.now())?;
    rx.open(&mut rx_data, clock.now())?;

    let deadline = Instant::now() + Duration::from_millis(duration_ms);
    let mut next_telemetry = clock.now();
    while Instant::now() < deadline {
        let now = clock.now();
        source.poll(&mut tx_data, now);
        tx.update(&mut tx_data, now);
        rx.update(&mut rx_data, now);

        // The RX side reports its link state as downlink telemetry
        if now >= next_telemetry {
            next_telemetry = now + millis_to_micros(100);
            let air = rx.air();
            let (rssi, snr, lq) = (air.rssi() as i8, air.snr() as i8, air.lq() as i8);
            rx_data.set_telemetry(TelemetryId::RxRssiAnt1, TelemetryValue::I8(rssi), now);
            rx_data.set_telemetry(TelemetryId::RxSnr, TelemetryValue::I8(snr), now);
            rx_data.set_telemetry(TelemetryId::RxLinkQuality, TelemetryValue::I8(lq), now);
        }
        tokio::time::sleep(Duration::from_micros(200)).await;
    }

    let (rx_success, rx_errors) = rx.rx_stats();
    log_info(&format!(
        "Link report: {} uplinks ok, {} lost/invalid, RX mode {:?}, RX failsafe {}, \
         TX sees RSSI {:.0} dBm LQ {:.0}, update rate {} Hz",
        rx_success,
        rx_errors,
        rx.current_mode(),
        rx_data.input_failsafe.is_active(),
        tx.air().rssi(),
        tx.air().lq(),
        rx.air().update_frequency(),
    ));
    tx.close();
    rx.close();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.state_dir)?;

    match cli.command {
        Commands::Bind { band } => run_bind(&cli.state_dir, parse_band(band)?).await?,
        Commands::Link {
            duration_ms,
            drop_rate,
        } => run_link(&cli.state_dir, duration_ms, drop_rate).await?,
    }
    Ok(())
}
