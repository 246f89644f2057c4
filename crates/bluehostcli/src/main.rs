//! Minimal command-line front end for the bluehost stack
//!
//! Opens a serial-attached controller, runs bring-up, performs an inquiry,
//! and optionally queries a discovered device for its serial-port service.
//!
//! Usage: bluehostcli <serial-device> [baud]

use bluehost::sdp::types::{ATTR_PROTOCOL_DESCRIPTOR_LIST, ATTR_SERVICE_NAME, UUID_SERIAL_PORT};
use bluehost::{BtStack, StackConfig, StackEvent, UartTransport, Uuid};
use std::time::{Duration, Instant};

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(device) = args.next() else {
        eprintln!("usage: bluehostcli <serial-device> [baud]");
        std::process::exit(2);
    };
    let baud: u32 = args
        .next()
        .map(|s| s.parse().unwrap_or(115200))
        .unwrap_or(115200);

    let transport = match UartTransport::open(&device, baud) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("cannot open {device}: {e}");
            std::process::exit(1);
        }
    };

    let config = StackConfig {
        local_name: "bluehost".to_string(),
        store_path: Some("bluehost-devices.txt".into()),
        ..StackConfig::default()
    };
    let mut stack = BtStack::new(transport, config);
    let mut rx = stack.rx_handle();

    if let Err(e) = stack.power_on() {
        eprintln!("power on failed: {e}");
        std::process::exit(1);
    }
    println!("bringing up controller on {device} at {baud} baud...");

    let started = Instant::now();
    let mut inquiry_started = false;
    let mut discovered = Vec::new();

    loop {
        // Feed inbound bytes, run one poll pass, then drain events
        if let Err(e) = stack.transport_mut().poll_read(&mut rx) {
            eprintln!("transport read failed: {e}");
            break;
        }
        if let Err(e) = stack.poll() {
            eprintln!("poll failed: {e}");
            break;
        }

        while let Some(event) = stack.next_event() {
            match event {
                StackEvent::Ready => {
                    println!(
                        "controller ready, local address {}",
                        stack
                            .local_addr()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    );
                    println!("starting inquiry (8 s)...");
                    if let Err(e) = stack.start_inquiry(8) {
                        eprintln!("inquiry failed: {e}");
                    } else {
                        inquiry_started = true;
                    }
                }
                StackEvent::DeviceDiscovered { addr } => {
                    println!("  found {addr}");
                    discovered.push(addr);
                }
                StackEvent::NameResolved { addr } => {
                    let name = stack
                        .hci()
                        .devices()
                        .get(&addr)
                        .and_then(|d| d.name.clone())
                        .unwrap_or_default();
                    println!("  {addr} is \"{name}\"");
                }
                StackEvent::InquiryComplete => {
                    println!("inquiry complete, {} device(s)", discovered.len());
                    match discovered.first() {
                        Some(&addr) => {
                            println!("querying {addr} for a serial-port service...");
                            let result = stack.sdp_request(
                                addr,
                                Uuid::Uuid16(UUID_SERIAL_PORT),
                                0x0000,
                                0xFFFF,
                            );
                            if let Err(e) = result {
                                eprintln!("SDP request failed: {e}");
                                return;
                            }
                        }
                        None => return,
                    }
                }
                StackEvent::SdpResult { addr, attributes, .. } => {
                    println!("{addr} offers {} matching record(s)", attributes.len());
                    for record in &attributes {
                        if let bluehost::DataElement::Sequence(items) = record {
                            for pair in items.chunks(2) {
                                match pair {
                                    [bluehost::DataElement::Unsigned16(ATTR_SERVICE_NAME), bluehost::DataElement::TextString(name)] => {
                                        println!("  service name: {name}");
                                    }
                                    [bluehost::DataElement::Unsigned16(ATTR_PROTOCOL_DESCRIPTOR_LIST), protocols] => {
                                        println!("  protocols: {protocols:?}");
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                    return;
                }
                StackEvent::SdpFailed { addr, reason, .. } => {
                    eprintln!("SDP request to {addr} failed: {reason}");
                    return;
                }
                other => {
                    println!("event: {other:?}");
                }
            }
        }

        // An inquiry that never starts means bring-up stalled; give up
        // after a while instead of spinning forever
        if !inquiry_started && started.elapsed() > Duration::from_secs(20) {
            eprintln!("controller did not become ready; giving up");
            break;
        }

        std::thread::sleep(Duration::from_millis(5));
    }
}
