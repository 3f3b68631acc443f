use std::env;
use std::time::Duration;

use ebm30_feg::command::Channel;
use ebm30_feg::session::Session;
use ebm30_feg::transport::SerialTransport;
use ebm30_feg::types::Config;
use inquire::Select;

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 115200;
// The supply can take a while to respond, a reasonably large time out is required.
const SERIAL_TIMEOUT_MS: u64 = 300;
const MONITOR_CYCLES: u32 = 30;

fn main() {
    env_logger::init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        // List available serial ports
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        // Interactive selection
        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    println!("Using port: {}", port_name);

    let transport = SerialTransport::new(&port_name, BAUD_RATE)
        .with_read_timeout(Duration::from_millis(SERIAL_TIMEOUT_MS));
    let session = Session::spawn(transport, Config::default());

    if let Err(e) = session.connect().wait() {
        eprintln!("Connect failed: {e}");
        std::process::exit(1);
    }

    let snapshot = session.snapshot();
    if let Some(firmware) = &snapshot.firmware {
        println!(
            "Connected. Firmware: main '{}', floating deck '{}'",
            firmware.main, firmware.floating_deck
        );
    }

    // Watch the supply for a while, one line per poll cycle
    for _ in 0..MONITOR_CYCLES {
        std::thread::sleep(Duration::from_secs(2));
        let snapshot = session.snapshot();

        let Some(reading) = &snapshot.reading else {
            println!("[{}] no telemetry yet", snapshot.state);
            continue;
        };

        println!(
            "[{}] beam {:.1}V / {:.2}uA  extractor {:.1}V / {:.2}uA  suppressor {:.1}V  heater {:.1}mA / {:.3}V",
            snapshot.state,
            reading.beam_voltage_v,
            reading.beam_current_ua,
            reading.extractor_voltage_v,
            reading.extractor_current_ua,
            reading.suppressor_voltage_v,
            reading.heater_current_ma,
            reading.heater_voltage_v,
        );

        for warning in &snapshot.faults.warnings {
            println!("  warning: {warning} approaching its limit");
        }
        for fault in &snapshot.faults.latched {
            println!("  FAULT: {fault}");
        }

        if snapshot.faults.is_faulted() {
            println!("Faults latched, shutting the session down.");
            break;
        }
    }

    // Make sure nothing is left driving the gun before we go
    session
        .set_enabled(Channel::Beam, false)
        .wait()
        .expect("Failed to disable beam output");
    session
        .disconnect()
        .wait()
        .expect("Failed to disconnect cleanly");
    session.shutdown();
    println!("Done.");
}
