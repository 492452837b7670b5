use beacon_locator::api::{CallbackRangingApi, JsonFormatter, ScanEvent, TextFormatter};
use beacon_locator::core::DeviceId;
use beacon_locator::hardware::{MockBeacon, MockTransport};
use beacon_locator::processing::{DiscoveryEvent, SequencerPhase};
use beacon_locator::utils::ConfigurationManager;
use log::info;
use std::time::{Duration, Instant};

/// Simulated surroundings: (address, advertised name, measured RSSI,
/// reference RSSI, x, y). The central sits near (1.0, 0.5).
const DEMO_DEVICES: [(&str, &str, i32, i32, f64, f64); 5] = [
    ("C4:7F:51:00:00:01", "LocationBeacon", -60, -59, 0.0, 0.0),
    ("5A:12:9E:33:10:0B", "Headphones", -48, -59, 0.0, 0.0),
    ("C4:7F:51:00:00:02", "LocationBeacon", -60, -59, 2.0, 0.0),
    ("C4:7F:51:00:00:03", "LocationBeacon", -59, -59, 1.0, 1.5),
    ("C4:7F:51:00:00:04", "LocationBeacon", -71, -59, 4.0, 4.0),
];

const RUN_LIMIT: Duration = Duration::from_secs(60);

fn print_usage(program: &str) {
    eprintln!("Usage: {} [config.json] [--json]", program);
    eprintln!("Runs one scan, ranging and trilateration cycle against simulated beacons.");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map_or("beacon-locator", |s| s.as_str());
    let mut json_output = false;
    let mut config_path = None;
    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--json" => json_output = true,
            "-h" | "--help" => {
                print_usage(program);
                return Ok(());
            }
            path if config_path.is_none() => config_path = Some(path.to_string()),
            _ => {
                print_usage(program);
                return Err("Invalid arguments".into());
            }
        }
    }

    let manager = match &config_path {
        Some(path) => ConfigurationManager::from_file(path)?,
        None => ConfigurationManager::new(),
    };
    let config = manager.get_config().clone();

    let (mut transport, events) = MockTransport::channel(config.protocol.clone());
    for (address, _, _, reference, x, y) in DEMO_DEVICES {
        transport.add_beacon(DeviceId::from(address), MockBeacon::new(reference, x, y));
    }

    let mut api = CallbackRangingApi::new(config, transport, events)?;
    api.register_beacon_complete_callback(Box::new(|beacon| {
        println!("{} {}", beacon.identifier, beacon.session_state);
    }));
    api.register_position_callback(Box::new(|position| {
        println!("Central position: ({:.1}, {:.1})", position.x, position.y);
    }));
    api.register_unavailable_callback(Box::new(|reason| {
        println!("Position unavailable: {}", reason);
    }));

    api.start_scan();
    let scanner = api.scan_sender();
    let scan_thread = std::thread::spawn(move || {
        for (address, name, rssi, _, _, _) in DEMO_DEVICES {
            scanner.send(ScanEvent::DeviceDiscovered(DiscoveryEvent::new(address, Some(name), rssi)))?;
        }
        scanner.send(ScanEvent::ScanStopped)
    });

    let started = Instant::now();
    while api.phase() != SequencerPhase::Done {
        if started.elapsed() > RUN_LIMIT {
            return Err("Ranging did not finish".into());
        }
        api.process(Duration::from_millis(100))?;
    }
    scan_thread.join().map_err(|_| "Scanner thread panicked")??;
    info!("Run statistics: {:?}", api.statistics());

    if let Some(report) = api.report() {
        if json_output {
            println!("{}", JsonFormatter::pretty().format_json(&report)?);
        } else {
            print!("{}", TextFormatter::new().format_text(&report));
        }
    }

    api.shutdown();
    Ok(())
}
