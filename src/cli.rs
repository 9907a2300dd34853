//! CLI argument parsing

use crate::programmers;
use clap::{Parser, Subcommand};
use ricsp_core::device::{FUSE_EXT, FUSE_HIGH, FUSE_LOCK, FUSE_LOW};
use std::path::PathBuf;

/// Parse a string as a hex (0x prefix) or decimal u32
fn parse_word(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a config word assignment, "index=value"
fn parse_config_assign(s: &str) -> Result<(u32, u32), String> {
    let (index, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected index=value, got '{}'", s))?;
    Ok((parse_word(index)?, parse_word(value)?))
}

/// Parse a fuse byte assignment, "name=value"
fn parse_fuse_assign(s: &str) -> Result<(u32, u32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected name=value, got '{}'", s))?;
    let slot = match name {
        "low" | "lfuse" => FUSE_LOW,
        "high" | "hfuse" => FUSE_HIGH,
        "ext" | "efuse" => FUSE_EXT,
        "lock" => FUSE_LOCK,
        _ => {
            return Err(format!(
                "Unknown fuse '{}' (use low, high, ext or lock)",
                name
            ))
        }
    };
    Ok((slot, parse_word(value)?))
}

/// Generate dynamic help text for the programmer argument
fn programmer_help() -> String {
    format!(
        "Programmer to use, name[:key=val,...] [available: {}]",
        programmers::programmer_names_short()
    )
}

#[derive(Parser)]
#[command(name = "ricsp")]
#[command(author, version, about = "PIC and AVR in-circuit serial programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Programmer to use
    #[arg(short, long, global = true, help = programmer_help())]
    pub programmer: Option<String>,

    /// Device name, as listed by `ricsp list`
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Path to the device database (.ron file or directory)
    /// Defaults to ./devices/ and /usr/share/ricsp/devices/
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List devices in the database
    List {
        /// Filter by vendor substring
        #[arg(long)]
        vendor: Option<String>,

        /// Filter by family label substring ("PIC16", "PIC18", "AVR")
        #[arg(long)]
        family: Option<String>,
    },

    /// List compiled-in programmer backends
    ListProgrammers,

    /// Show a device descriptor and its memory map
    Info,

    /// Power the part up and check its identity
    Probe,

    /// Bulk erase the part
    Erase,

    /// Program image files and option values into the part
    Write {
        /// Code image, raw little-endian words
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// EEPROM image, raw bytes
        #[arg(long)]
        eeprom: Option<PathBuf>,

        /// Config word to program, index=value (PIC)
        #[arg(long, value_name = "IDX=VAL", value_parser = parse_config_assign)]
        config: Vec<(u32, u32)>,

        /// Fuse byte to program, name=value with low/high/ext/lock (AVR)
        #[arg(long, value_name = "NAME=VAL", value_parser = parse_fuse_assign)]
        fuse: Vec<(u32, u32)>,

        /// Skip the read-back verify pass after programming
        #[arg(long)]
        no_verify: bool,

        /// Skip the bulk erase before programming
        #[arg(long)]
        no_erase: bool,
    },

    /// Read the part into image files
    Read {
        /// Code image output, raw little-endian words
        #[arg(short, long)]
        output: PathBuf,

        /// EEPROM image output, raw bytes
        #[arg(long)]
        eeprom: Option<PathBuf>,
    },

    /// Compare the part against image files
    Verify {
        /// Code image, raw little-endian words
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// EEPROM image, raw bytes
        #[arg(long)]
        eeprom: Option<PathBuf>,
    },

    /// Hex dump every region of the part to stdout
    Dump,

    /// Check that the erasable memories read blank
    BlankCheck,
}
