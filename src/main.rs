//! ricsp - PIC and AVR in-circuit serial programmer
//!
//! Programs Microchip PIC (PIC12/16/18) and Atmel AVR microcontrollers over
//! simple bit-banged adapters on a PC parallel port. The protocol drivers
//! live in `ricsp-core` behind the `Target` trait; this binary wires them to
//! a programmer backend, the RON device database and the command line.

mod cli;
mod commands;
mod programmers;

use clap::Parser;
use cli::{Cli, Commands};
use ricsp_core::{open_target, DeviceDatabase, DeviceDescriptor, Session};
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    // Load device database
    let db = match load_device_database(cli.db.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load device database: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Loaded {} device definitions", db.len());

    match &cli.command {
        Commands::List { vendor, family } => {
            commands::list_devices(&db, vendor.as_deref(), family.as_deref());
            Ok(())
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
        Commands::Info => {
            let device = require_device(&cli, &db)?;
            commands::info::run(device);
            Ok(())
        }
        Commands::Probe => {
            let mut session = open_session(&cli, &db)?;
            commands::ops::run_probe(&mut session)
        }
        Commands::Erase => {
            let mut session = open_session(&cli, &db)?;
            commands::ops::run_erase(&mut session)
        }
        Commands::Write {
            input,
            eeprom,
            config,
            fuse,
            no_verify,
            no_erase,
        } => {
            let mut session = open_session(&cli, &db)?;
            let request = commands::ops::WriteRequest {
                input: input.as_deref(),
                eeprom: eeprom.as_deref(),
                config,
                fuses: fuse,
                erase_first: !*no_erase,
                verify: !*no_verify,
            };
            commands::ops::run_write(&mut session, &request)
        }
        Commands::Read { output, eeprom } => {
            let mut session = open_session(&cli, &db)?;
            commands::ops::run_read(&mut session, output, eeprom.as_deref())
        }
        Commands::Verify { input, eeprom } => {
            let mut session = open_session(&cli, &db)?;
            commands::ops::run_verify(&mut session, input.as_deref(), eeprom.as_deref())
        }
        Commands::Dump => {
            let mut session = open_session(&cli, &db)?;
            commands::ops::run_dump(&mut session)
        }
        Commands::BlankCheck => {
            let mut session = open_session(&cli, &db)?;
            commands::ops::run_blank_check(&mut session)
        }
    }
}

/// Look the requested device up, with close matches on a miss
fn require_device<'a>(
    cli: &Cli,
    db: &'a DeviceDatabase,
) -> Result<&'a DeviceDescriptor, Box<dyn std::error::Error>> {
    let name = cli
        .device
        .as_deref()
        .ok_or("No device given; pick one with -d/--device (see 'ricsp list')")?;

    if let Some(device) = db.find(name) {
        return Ok(device);
    }

    let close: Vec<&str> = db
        .find_by_name(name)
        .into_iter()
        .map(|d| d.name())
        .take(8)
        .collect();
    if close.is_empty() {
        Err(format!("Unknown device: {} (see 'ricsp list')", name).into())
    } else {
        Err(format!("Unknown device: {} (close matches: {})", name, close.join(", ")).into())
    }
}

/// Resolve the device and programmer arguments into a powered-down session
fn open_session(cli: &Cli, db: &DeviceDatabase) -> Result<Session, Box<dyn std::error::Error>> {
    let device = require_device(cli, db)?;
    device.validate()?;

    let spec = cli
        .programmer
        .as_deref()
        .ok_or("No programmer given; pick one with -p/--programmer")?;
    let io = programmers::open_io(spec, device)?;

    Ok(Session::new(open_target(device, io)))
}

/// Load the device database from the specified path or default locations
fn load_device_database(path: Option<&Path>) -> Result<DeviceDatabase, Box<dyn std::error::Error>> {
    let mut db = DeviceDatabase::new();

    if let Some(path) = path {
        // User specified a path
        if path.is_dir() {
            db.load_dir(path)?;
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(format!("Device database path not found: {}", path.display()).into());
        }
    } else {
        // Try default locations
        let default_paths = [
            PathBuf::from("devices"),
            PathBuf::from("/usr/share/ricsp/devices"),
            PathBuf::from("/usr/local/share/ricsp/devices"),
        ];

        let mut loaded = false;
        for dir in &default_paths {
            if dir.is_dir() {
                match db.load_dir(dir) {
                    Ok(count) => {
                        log::debug!("Loaded {} devices from {}", count, dir.display());
                        loaded = true;
                    }
                    Err(e) => {
                        log::warn!("Failed to load devices from {}: {}", dir.display(), e);
                    }
                }
            }
        }

        if !loaded {
            log::warn!("No device database found in default locations");
        }
    }

    Ok(db)
}
