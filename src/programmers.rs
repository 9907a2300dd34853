//! Programmer registration and dispatch
//!
//! Central registry of the compiled-in programmer backends: the dynamic help
//! text, the option-string parsing and the construction of a boxed
//! [`IcspIo`] for a given backend name.

use ricsp_core::device::DeviceDescriptor;
use ricsp_core::io::IcspIo;

/// Information about a programmer backend
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// All programmer backends enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "parport")]
    programmers.push(ProgrammerInfo {
        name: "parport",
        aliases: &["ppdev"],
        description:
            "Parallel-port adapter (dev=/dev/parport0,clock=3,datao=2,datai=10,vppon=5,vddon=4)",
    });

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "Wire-level simulated part for dry runs and testing",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");
    for p in &programmers {
        help.push_str(&format!("  {:8} - {}\n", p.name, p.description));
    }
    help
}

/// Generate a short list of programmer names for CLI help
pub fn programmer_names_short() -> String {
    let programmers = available_programmers();
    let names: Vec<&str> = programmers.iter().map(|p| p.name).collect();
    names.join(", ")
}

/// Resolve a name or alias to its canonical backend name
#[allow(unused_variables)]
pub fn find_programmer(name: &str) -> Option<&'static str> {
    #[cfg(feature = "parport")]
    if name == "parport" || name == "ppdev" {
        return Some("parport");
    }

    #[cfg(feature = "dummy")]
    if name == "dummy" {
        return Some("dummy");
    }

    None
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

/// Open the backend named in `spec` as a boxed [`IcspIo`]
///
/// The dummy backend needs the device descriptor to pick which part to
/// simulate; hardware backends ignore it.
#[allow(unused_variables)]
pub fn open_io(
    spec: &str,
    descriptor: &DeviceDescriptor,
) -> Result<Box<dyn IcspIo>, Box<dyn std::error::Error>> {
    let (name, options) = parse_programmer_string(spec);

    let canonical = match find_programmer(name) {
        Some(n) => n,
        None => return Err(unknown_programmer_error(name)),
    };

    match canonical {
        #[cfg(feature = "parport")]
        "parport" => {
            log::info!("Opening parallel-port programmer...");
            ricsp_parport::open_parport(&options).map_err(|e| {
                format!(
                    "Failed to open parallel port: {}\n\
                     Make sure the ppdev module is loaded and you have permissions\n\
                     (or run with io=<base> as root for raw port access).",
                    e
                )
                .into()
            })
        }

        #[cfg(feature = "dummy")]
        "dummy" => {
            if let Some((key, value)) = options.first() {
                return Err(format!("dummy: Unknown option: {}={}", key, value).into());
            }
            log::info!("Simulating a factory-fresh {}", descriptor.name());
            let io: Box<dyn IcspIo> = match descriptor {
                DeviceDescriptor::Pic(pic) if pic.family.is_pic18() => {
                    Box::new(ricsp_dummy::DummyPic18::new(pic))
                }
                DeviceDescriptor::Pic(pic) => Box::new(ricsp_dummy::DummyPic16::new(pic)),
                DeviceDescriptor::Avr(avr) => Box::new(ricsp_dummy::DummyAvr::new(avr)),
            };
            Ok(io)
        }

        _ => Err(unknown_programmer_error(name)),
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.push_str("\nUse 'ricsp list-programmers' for more details");
    msg.into()
}
