//! Runs a "host" and a "controller" transport against each other.
//!
//! Each side gets its own BCSP chain and worker thread; the two byte streams are connected with
//! in-memory pipes. The host issues a few HCI commands, the controller answers each with a Command
//! Complete event and, half way through, goes to sleep so the next command has to wake it up.
//! Afterwards the same exchange runs once over plain H4.

mod logger;

use {
    hci_uart::{
        config::Config,
        driver::{pipe, StdTimer, Transport},
        Event, Packet, PacketType,
    },
    std::{
        error::Error,
        sync::mpsc::{self, Receiver},
        time::Duration,
    },
};

const TIMEOUT: Duration = Duration::from_secs(2);

/// HCI opcodes the host sends: Reset, Read Local Version, Read BD_ADDR, Read Buffer Size.
const OPCODES: [u16; 4] = [0x0c03, 0x1001, 0x1009, 0x1005];

fn command(opcode: u16) -> Packet {
    let [lo, hi] = opcode.to_le_bytes();
    Packet::new(PacketType::Command, &[lo, hi, 0x00])
}

fn command_complete(opcode: u16) -> Packet {
    let [lo, hi] = opcode.to_le_bytes();
    Packet::new(PacketType::Event, &[0x0e, 0x04, 0x01, lo, hi, 0x00])
}

fn next_packet(name: &str, events: &Receiver<Event>) -> Result<Packet, Box<dyn Error>> {
    loop {
        match events.recv_timeout(TIMEOUT)? {
            Event::Packet(packet) => return Ok(packet),
            Event::Active(cfg) => println!("{}: link active, {:?}", name, cfg),
            Event::Fault(fault) if fault.is_fatal() => return Err(fault.to_string().into()),
            Event::Fault(fault) => println!("{}: {}", name, fault),
        }
    }
}

fn wait_active(name: &str, events: &Receiver<Event>) -> Result<(), Box<dyn Error>> {
    loop {
        match events.recv_timeout(TIMEOUT)? {
            Event::Active(cfg) => {
                println!("{}: link active, {:?}", name, cfg);
                return Ok(());
            }
            Event::Fault(fault) => println!("{}: {}", name, fault),
            Event::Packet(packet) => println!("{}: early packet {:?}", name, packet),
        }
    }
}

fn bcsp() -> Result<(), Box<dyn Error>> {
    let (host_out, ctrl_in) = pipe();
    let (ctrl_out, host_in) = pipe();
    let (host_up, host_events) = mpsc::channel();
    let (ctrl_up, ctrl_events) = mpsc::channel();

    let mut host = Transport::bcsp(Config::default(), host_out, host_up)?;
    let mut ctrl = Transport::bcsp(Config::default().with_window(2)?, ctrl_out, ctrl_up)?;
    host.spawn_reader(host_in)?;
    ctrl.spawn_reader(ctrl_in)?;

    host.handle().start()?;
    ctrl.handle().start()?;
    wait_active("host", &host_events)?;
    wait_active("controller", &ctrl_events)?;

    for (i, &opcode) in OPCODES.iter().enumerate() {
        if i == OPCODES.len() / 2 {
            println!("controller: entering low power mode");
            ctrl.handle().sleep()?;
        }

        host.handle().send(command(opcode))?;
        let cmd = next_packet("controller", &ctrl_events)?;
        println!("controller: received {:?}", cmd);

        ctrl.handle().send(command_complete(opcode))?;
        let evt = next_packet("host", &host_events)?;
        println!("host: received {:?}", evt);
    }

    host.shutdown();
    ctrl.shutdown();
    Ok(())
}

fn h4() -> Result<(), Box<dyn Error>> {
    let (host_out, ctrl_in) = pipe();
    let (ctrl_out, host_in) = pipe();
    let (host_up, host_events) = mpsc::channel();
    let (ctrl_up, ctrl_events) = mpsc::channel();

    let mut host = Transport::h4(host_out, host_up)?;
    let mut ctrl = Transport::h4(ctrl_out, ctrl_up)?;
    host.spawn_reader(host_in)?;
    ctrl.spawn_reader(ctrl_in)?;

    host.handle().send(command(OPCODES[0]))?;
    println!("controller: received {:?}", next_packet("controller", &ctrl_events)?);
    ctrl.handle().send(command_complete(OPCODES[0]))?;
    println!("host: received {:?}", next_packet("host", &host_events)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    logger::init(StdTimer::new());

    println!("== BCSP");
    bcsp()?;
    println!("== H4");
    h4()?;
    Ok(())
}
