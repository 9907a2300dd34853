//! Parallel-port ICSP adapter implementation
//!
//! This module provides the [`ParportIcsp`] struct that implements the
//! [`IcspIo`](ricsp_core::io::IcspIo) trait by bit-banging the programming
//! signals through the three parallel-port registers.
//!
//! The two output registers are shadowed in memory and only ever written,
//! never read back, so a flaky cable cannot corrupt a read-modify-write
//! cycle; the status register is read fresh on every input sample. Every
//! signal edge applies a configured settle delay, composed from a base
//! default, per-signal overrides and a global stretch.

use std::time::{Duration, Instant};

use crate::error::{ParportError, Result};
use crate::pins::{self, PinCaps, PinSpec, Register, SignalPin};
use crate::port::PortHandle;

use ricsp_core::io::{IcspIo, VddState, VppState};

/// Default settle delay after every signal edge, in microseconds
const DEFAULT_DELAY_US: u32 = 1;

/// Delays below this busy-wait for accuracy; longer ones may sleep
const BUSY_WAIT_LIMIT_US: u32 = 10_000;

/// Per-edge delay overrides for one signal class, in microseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeOverrides {
    /// Delay before sampling the line
    pub read: Option<u32>,
    /// Delay after a low-to-high transition
    pub lh: Option<u32>,
    /// Delay after a high-to-low transition
    pub hl: Option<u32>,
}

/// Signal-edge delay configuration
///
/// Every resolved delay is `override.unwrap_or(base) + extra`, computed once
/// when the adapter is built.
#[derive(Debug, Clone, Copy)]
pub struct DelayOptions {
    /// Default for every edge without an override
    pub base_us: u32,
    /// Stretch added on top of every resolved delay
    pub extra_us: u32,
    /// Clock line overrides
    pub clock: EdgeOverrides,
    /// Data line overrides, shared by `datao` and `datai`
    pub data: EdgeOverrides,
    /// Vdd rail overrides, shared by the enable and the selector pins
    pub vdd: EdgeOverrides,
    /// Vpp rail overrides, shared by the enable and the selector pin
    pub vpp: EdgeOverrides,
}

impl Default for DelayOptions {
    fn default() -> Self {
        Self {
            base_us: DEFAULT_DELAY_US,
            extra_us: 0,
            clock: EdgeOverrides::default(),
            data: EdgeOverrides::default(),
            vdd: EdgeOverrides::default(),
            vpp: EdgeOverrides::default(),
        }
    }
}

impl DelayOptions {
    fn resolve(&self) -> SignalDelays {
        let edge = |overrides: EdgeOverrides| EdgeDelays {
            read_us: overrides.read.unwrap_or(self.base_us) + self.extra_us,
            lh_us: overrides.lh.unwrap_or(self.base_us) + self.extra_us,
            hl_us: overrides.hl.unwrap_or(self.base_us) + self.extra_us,
        };
        SignalDelays {
            clock: edge(self.clock),
            data: edge(self.data),
            vdd: edge(self.vdd),
            vpp: edge(self.vpp),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeDelays {
    read_us: u32,
    lh_us: u32,
    hl_us: u32,
}

#[derive(Debug, Clone, Copy)]
struct SignalDelays {
    clock: EdgeDelays,
    data: EdgeDelays,
    vdd: EdgeDelays,
    vpp: EdgeDelays,
}

/// Pin requested for each programming signal
///
/// `clock`, `datao`, `datai`, `vppon` and `vddon` must be assigned; the
/// selector signals are optional and depend on what the adapter wires up.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinAssignments {
    /// Programming clock (output)
    pub clock: Option<PinSpec>,
    /// Data towards the target (output)
    pub datao: Option<PinSpec>,
    /// Data from the target (input)
    pub datai: Option<PinSpec>,
    /// Vpp enable (output)
    pub vppon: Option<PinSpec>,
    /// Vdd enable (output)
    pub vddon: Option<PinSpec>,
    /// Vdd level selector for the minimum verify voltage (output)
    pub selminvdd: Option<PinSpec>,
    /// Vdd level selector for the programming voltage (output)
    pub selprogvdd: Option<PinSpec>,
    /// Vdd level selector for the maximum verify voltage (output)
    pub selmaxvdd: Option<PinSpec>,
    /// Vpp source selector routing Vihh instead of Vdd (output)
    pub selvihhvpp: Option<PinSpec>,
}

/// Configuration for opening a parallel-port adapter
#[derive(Debug, Clone)]
pub struct ParportConfig {
    /// ppdev device path (e.g., "/dev/parport0"); empty when `io_base` is used
    pub device: String,
    /// Raw I/O base for the `/dev/port` backend (e.g., 0x378)
    pub io_base: Option<u16>,
    /// Signal-to-pin wiring
    pub pins: PinAssignments,
    /// Signal-edge delays
    pub delays: DelayOptions,
    /// Selector pin states for `Vdd Min`, bit i driving selector pin i
    /// in `[selminvdd, selprogvdd, selmaxvdd]` order
    pub vdd_min_cond: u8,
    /// Selector pin states for `Vdd Prog`
    pub vdd_prog_cond: u8,
    /// Selector pin states for `Vdd Max`
    pub vdd_max_cond: u8,
    /// Raise the Vpp enable before the Vihh selector instead of after
    pub vpp_off_cond: bool,
}

impl Default for ParportConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            io_base: None,
            pins: PinAssignments::default(),
            delays: DelayOptions::default(),
            vdd_min_cond: 0b001,
            vdd_prog_cond: 0b010,
            vdd_max_cond: 0b100,
            vpp_off_cond: false,
        }
    }
}

impl ParportConfig {
    /// Create a configuration for the given ppdev device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Create a configuration for raw port I/O at `base`
    pub fn io(base: u16) -> Self {
        Self {
            io_base: Some(base),
            ..Default::default()
        }
    }

    /// Set the base settle delay for every signal edge
    pub fn with_delay_us(mut self, us: u32) -> Self {
        self.delays.base_us = us;
        self
    }
}

/// Resolved signal wiring, every pin validated against the capability table
#[derive(Debug)]
struct SignalMap {
    clock: SignalPin,
    datao: SignalPin,
    datai: SignalPin,
    vppon: SignalPin,
    vddon: SignalPin,
    selminvdd: Option<SignalPin>,
    selprogvdd: Option<SignalPin>,
    selmaxvdd: Option<SignalPin>,
    selvihhvpp: Option<SignalPin>,
}

impl SignalMap {
    fn resolve(wiring: &PinAssignments) -> Result<Self> {
        let required = |signal: &'static str, spec: Option<PinSpec>, direction: PinCaps| {
            let spec = spec.ok_or(ParportError::MissingPin(signal))?;
            pins::assign(signal, spec, direction)
        };
        let optional = |signal: &'static str, spec: Option<PinSpec>| {
            spec.map(|spec| pins::assign(signal, spec, PinCaps::OUT))
                .transpose()
        };
        Ok(Self {
            clock: required("clock", wiring.clock, PinCaps::OUT)?,
            datao: required("datao", wiring.datao, PinCaps::OUT)?,
            datai: required("datai", wiring.datai, PinCaps::IN)?,
            vppon: required("vppon", wiring.vppon, PinCaps::OUT)?,
            vddon: required("vddon", wiring.vddon, PinCaps::OUT)?,
            selminvdd: optional("selminvdd", wiring.selminvdd)?,
            selprogvdd: optional("selprogvdd", wiring.selprogvdd)?,
            selmaxvdd: optional("selmaxvdd", wiring.selmaxvdd)?,
            selvihhvpp: optional("selvihhvpp", wiring.selvihhvpp)?,
        })
    }
}

#[derive(Debug)]
enum Port {
    Hw(PortHandle),
    #[cfg(test)]
    Mem(tests::MemPort),
}

impl Port {
    fn read(&self, reg: Register) -> std::io::Result<u8> {
        match self {
            Port::Hw(port) => port.read(reg),
            #[cfg(test)]
            Port::Mem(port) => Ok(port.read(reg)),
        }
    }

    fn write(&self, reg: Register, value: u8) -> std::io::Result<()> {
        match self {
            Port::Hw(port) => port.write(reg, value),
            #[cfg(test)]
            Port::Mem(port) => {
                port.write(reg, value);
                Ok(())
            }
        }
    }
}

/// Parallel-port ICSP programmer
///
/// Implements [`IcspIo`](ricsp_core::io::IcspIo) by driving the configured
/// signal pins through a claimed port. Dropping the adapter parks every
/// output signal low, so no voltage rail stays energized, before the port
/// is released.
#[derive(Debug)]
pub struct ParportIcsp {
    port: Port,
    map: SignalMap,
    delays: SignalDelays,
    data_shadow: u8,
    control_shadow: u8,
    vdd_levels: bool,
    vdd_min_cond: u8,
    vdd_prog_cond: u8,
    vdd_max_cond: u8,
    vpp_off_cond: bool,
}

impl ParportIcsp {
    /// Open and claim the port described by `config`
    pub fn open(config: &ParportConfig) -> Result<Self> {
        let handle = if let Some(base) = config.io_base {
            if !config.device.is_empty() {
                return Err(ParportError::InvalidParameter(
                    "only one of dev= and io= may be set".to_string(),
                ));
            }
            log::debug!("parport: opening /dev/port, base {base:#x}");
            PortHandle::open_io(base)?
        } else if !config.device.is_empty() {
            log::debug!("parport: opening {}", config.device);
            PortHandle::open_ppdev(&config.device)?
        } else {
            return Err(ParportError::NoPort);
        };

        let io = Self::build(config, Port::Hw(handle))?;

        let target = match config.io_base {
            Some(base) => format!("I/O base {base:#x}"),
            None => config.device.clone(),
        };
        log::info!(
            "parport: Opened {} ({}{})",
            target,
            pin_summary(&config.pins),
            if io.vdd_levels {
                ", 3-level Vdd selector"
            } else {
                ""
            }
        );
        Ok(io)
    }

    fn build(config: &ParportConfig, port: Port) -> Result<Self> {
        let map = SignalMap::resolve(&config.pins)?;
        let wired_selectors = map.selminvdd.is_some() as u8
            + map.selprogvdd.is_some() as u8
            + map.selmaxvdd.is_some() as u8;
        let mut io = Self {
            port,
            map,
            delays: config.delays.resolve(),
            data_shadow: 0,
            control_shadow: 0,
            vdd_levels: wired_selectors >= 2,
            vdd_min_cond: config.vdd_min_cond,
            vdd_prog_cond: config.vdd_prog_cond,
            vdd_max_cond: config.vdd_max_cond,
            vpp_off_cond: config.vpp_off_cond,
        };
        io.park_outputs();
        Ok(io)
    }

    /// Drive every output low: the signal lines, then the rails, then the
    /// selectors
    fn park_outputs(&mut self) {
        self.set_clock(false);
        self.set_data(false);
        self.set_vpp(VppState::Gnd);
        self.set_vdd(VddState::Off);
        self.select_vdd_level(0);
    }

    fn write_pin(&mut self, pin: SignalPin, delays: EdgeDelays, level: bool) {
        let wire = level != pin.invert;
        let shadow = match pin.register {
            Register::Data => &mut self.data_shadow,
            Register::Control => &mut self.control_shadow,
            // Input pins never reach here; assignment enforces direction.
            Register::Status => return,
        };
        if wire {
            *shadow |= 1 << pin.bit;
        } else {
            *shadow &= !(1 << pin.bit);
        }
        let value = *shadow;
        if let Err(e) = self.port.write(pin.register, value) {
            log::error!("parport: {:?} register write failed: {}", pin.register, e);
        }
        self.delay_us(if level { delays.lh_us } else { delays.hl_us });
    }

    /// Write the wired Vdd selector pins per `cond`, bit i driving selector i
    fn select_vdd_level(&mut self, cond: u8) {
        let selectors = [
            self.map.selminvdd,
            self.map.selprogvdd,
            self.map.selmaxvdd,
        ];
        for (i, pin) in selectors.into_iter().enumerate() {
            if let Some(pin) = pin {
                self.write_pin(pin, self.delays.vdd, cond & (1 << i) != 0);
            }
        }
    }

    fn write_vihh_selector(&mut self, level: bool) {
        if let Some(pin) = self.map.selvihhvpp {
            self.write_pin(pin, self.delays.vpp, level);
        }
    }

    #[cfg(test)]
    fn open_mem(config: &ParportConfig) -> Result<(Self, tests::PortProbe)> {
        let (port, probe) = tests::MemPort::new();
        let io = Self::build(config, Port::Mem(port))?;
        Ok((io, probe))
    }
}

impl IcspIo for ParportIcsp {
    fn set_clock(&mut self, high: bool) {
        self.write_pin(self.map.clock, self.delays.clock, high);
    }

    fn set_data(&mut self, high: bool) {
        self.write_pin(self.map.datao, self.delays.data, high);
    }

    fn data(&self) -> bool {
        self.delay_us(self.delays.data.read_us);
        let pin = self.map.datai;
        let value = match self.port.read(pin.register) {
            Ok(value) => value,
            Err(e) => {
                log::error!("parport: {:?} register read failed: {}", pin.register, e);
                0
            }
        };
        ((value >> pin.bit) & 1 != 0) != pin.invert
    }

    fn set_vpp(&mut self, state: VppState) {
        match state {
            VppState::Vih => {
                if self.vpp_off_cond {
                    self.write_pin(self.map.vppon, self.delays.vpp, true);
                    self.write_vihh_selector(true);
                } else {
                    self.write_vihh_selector(true);
                    self.write_pin(self.map.vppon, self.delays.vpp, true);
                }
            }
            VppState::Gnd => {
                self.write_pin(self.map.vppon, self.delays.vpp, false);
                self.write_vihh_selector(false);
            }
            VppState::Vdd => {
                self.write_vihh_selector(false);
                self.write_pin(self.map.vppon, self.delays.vpp, true);
            }
        }
    }

    fn set_vdd(&mut self, state: VddState) {
        match state {
            VddState::Off => {
                self.write_pin(self.map.vddon, self.delays.vdd, false);
            }
            VddState::On => {
                if self.vdd_levels {
                    self.select_vdd_level(self.vdd_prog_cond);
                }
                self.write_pin(self.map.vddon, self.delays.vdd, true);
            }
            VddState::Min => {
                self.select_vdd_level(self.vdd_min_cond);
                self.write_pin(self.map.vddon, self.delays.vdd, true);
            }
            VddState::Prog => {
                self.select_vdd_level(self.vdd_prog_cond);
                self.write_pin(self.map.vddon, self.delays.vdd, true);
            }
            VddState::Max => {
                self.select_vdd_level(self.vdd_max_cond);
                self.write_pin(self.map.vddon, self.delays.vdd, true);
            }
        }
    }

    fn delay_us(&self, us: u32) {
        if us == 0 {
            return;
        }
        if us < BUSY_WAIT_LIMIT_US {
            let deadline = Instant::now() + Duration::from_micros(u64::from(us));
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
        } else {
            std::thread::sleep(Duration::from_micros(u64::from(us)));
        }
    }
}

impl Drop for ParportIcsp {
    fn drop(&mut self) {
        self.park_outputs();
    }
}

fn pin_summary(wiring: &PinAssignments) -> String {
    let show = |spec: Option<PinSpec>| {
        spec.map(|spec| spec.to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "clock={}, datao={}, datai={}, vppon={}, vddon={}",
        show(wiring.clock),
        show(wiring.datao),
        show(wiring.datai),
        show(wiring.vppon),
        show(wiring.vddon),
    )
}

fn parse_pin(key: &str, value: &str) -> std::result::Result<PinSpec, String> {
    PinSpec::parse(value).map_err(|_| format!("Invalid {key} value: {value} (use N or !N)"))
}

fn parse_us(key: &str, value: &str) -> std::result::Result<u32, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {key} value: {value}"))
}

fn parse_cond(key: &str, value: &str) -> std::result::Result<u8, String> {
    let mask: u8 = value
        .parse()
        .map_err(|_| format!("Invalid {key} value: {value}"))?;
    if mask > 0b111 {
        return Err(format!("Invalid {key} value: {value} (3-bit mask)"));
    }
    Ok(mask)
}

fn parse_io_base(value: &str) -> std::result::Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| format!("Invalid io value: {value}"))
}

/// Parse programmer options from a list of key-value pairs
///
/// # Supported Options
///
/// - `dev=/dev/parportN` - ppdev device path (this or `io` is required)
/// - `io=0x378` - raw I/O base for the `/dev/port` backend
/// - `clock=N`, `datao=N`, `datai=N`, `vppon=N`, `vddon=N` - required signal
///   pins, `!N` for signals the adapter inverts
/// - `selminvdd=N`, `selprogvdd=N`, `selmaxvdd=N` - Vdd level selector pins
/// - `selvihhvpp=N` - Vpp source selector pin
/// - `delay=N` - base settle delay per signal edge in µs (default: 1)
/// - `extradelay=N` - stretch added to every delay in µs
/// - `<signal>_read_delay`, `<signal>_lh_delay`, `<signal>_hl_delay` -
///   per-class overrides, `<signal>` one of `clock`, `data`, `vdd`, `vpp`
/// - `vddmincond=N`, `vddprogcond=N`, `vddmaxcond=N` - 3-bit selector masks
///   (defaults: 1, 2, 4)
/// - `vppoffcond=0|1` - raise the Vpp enable before the Vihh selector
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<ParportConfig, String> {
    let mut config = ParportConfig::default();

    for (key, value) in options {
        match *key {
            "dev" => config.device = value.to_string(),
            "io" => config.io_base = Some(parse_io_base(value)?),
            "clock" => config.pins.clock = Some(parse_pin(key, value)?),
            "datao" => config.pins.datao = Some(parse_pin(key, value)?),
            "datai" => config.pins.datai = Some(parse_pin(key, value)?),
            "vppon" => config.pins.vppon = Some(parse_pin(key, value)?),
            "vddon" => config.pins.vddon = Some(parse_pin(key, value)?),
            "selminvdd" => config.pins.selminvdd = Some(parse_pin(key, value)?),
            "selprogvdd" => config.pins.selprogvdd = Some(parse_pin(key, value)?),
            "selmaxvdd" => config.pins.selmaxvdd = Some(parse_pin(key, value)?),
            "selvihhvpp" => config.pins.selvihhvpp = Some(parse_pin(key, value)?),
            "delay" => config.delays.base_us = parse_us(key, value)?,
            "extradelay" => config.delays.extra_us = parse_us(key, value)?,
            "clock_read_delay" => config.delays.clock.read = Some(parse_us(key, value)?),
            "clock_lh_delay" => config.delays.clock.lh = Some(parse_us(key, value)?),
            "clock_hl_delay" => config.delays.clock.hl = Some(parse_us(key, value)?),
            "data_read_delay" => config.delays.data.read = Some(parse_us(key, value)?),
            "data_lh_delay" => config.delays.data.lh = Some(parse_us(key, value)?),
            "data_hl_delay" => config.delays.data.hl = Some(parse_us(key, value)?),
            "vdd_read_delay" => config.delays.vdd.read = Some(parse_us(key, value)?),
            "vdd_lh_delay" => config.delays.vdd.lh = Some(parse_us(key, value)?),
            "vdd_hl_delay" => config.delays.vdd.hl = Some(parse_us(key, value)?),
            "vpp_read_delay" => config.delays.vpp.read = Some(parse_us(key, value)?),
            "vpp_lh_delay" => config.delays.vpp.lh = Some(parse_us(key, value)?),
            "vpp_hl_delay" => config.delays.vpp.hl = Some(parse_us(key, value)?),
            "vddmincond" => config.vdd_min_cond = parse_cond(key, value)?,
            "vddprogcond" => config.vdd_prog_cond = parse_cond(key, value)?,
            "vddmaxcond" => config.vdd_max_cond = parse_cond(key, value)?,
            "vppoffcond" => {
                config.vpp_off_cond = match *value {
                    "0" => false,
                    "1" => true,
                    _ => return Err(format!("Invalid vppoffcond value: {value} (use 0 or 1)")),
                }
            }
            _ => {
                return Err(format!("Unknown option: {key}={value}"));
            }
        }
    }

    if config.device.is_empty() && config.io_base.is_none() {
        return Err(
            "Either 'dev' or 'io' must be specified.\n\
             e.g. parport:dev=/dev/parport0,clock=3,datao=2,datai=10,vppon=5,vddon=4"
                .to_string(),
        );
    }
    if !config.device.is_empty() && config.io_base.is_some() {
        return Err("Only one of 'dev' or 'io' can be specified".to_string());
    }

    let required = [
        ("clock", config.pins.clock),
        ("datao", config.pins.datao),
        ("datai", config.pins.datai),
        ("vppon", config.pins.vppon),
        ("vddon", config.pins.vddon),
    ];
    for (name, spec) in required {
        if spec.is_none() {
            return Err(format!("Missing required parameter: {name}"));
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Memory-backed port: three register bytes plus a write log, shared
    /// with the test through [`PortProbe`].
    #[derive(Debug)]
    pub(super) struct MemPort {
        regs: Rc<RefCell<[u8; 3]>>,
        writes: Rc<RefCell<Vec<(Register, u8)>>>,
    }

    #[derive(Debug)]
    pub(super) struct PortProbe {
        regs: Rc<RefCell<[u8; 3]>>,
        writes: Rc<RefCell<Vec<(Register, u8)>>>,
    }

    impl MemPort {
        pub(super) fn new() -> (Self, PortProbe) {
            let regs = Rc::new(RefCell::new([0u8; 3]));
            let writes = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    regs: regs.clone(),
                    writes: writes.clone(),
                },
                PortProbe { regs, writes },
            )
        }

        pub(super) fn read(&self, reg: Register) -> u8 {
            self.regs.borrow()[reg as usize]
        }

        pub(super) fn write(&self, reg: Register, value: u8) {
            self.regs.borrow_mut()[reg as usize] = value;
            self.writes.borrow_mut().push((reg, value));
        }
    }

    impl PortProbe {
        fn reg(&self, reg: Register) -> u8 {
            self.regs.borrow()[reg as usize]
        }

        fn set_status(&self, value: u8) {
            self.regs.borrow_mut()[Register::Status as usize] = value;
        }

        fn writes_len(&self) -> usize {
            self.writes.borrow().len()
        }

        fn registers_written_since(&self, mark: usize) -> Vec<Register> {
            self.writes.borrow()[mark..]
                .iter()
                .map(|(reg, _)| *reg)
                .collect()
        }
    }

    fn pin(n: u8) -> Option<PinSpec> {
        Some(PinSpec {
            pin: n,
            invert: false,
        })
    }

    /// clock=bit 0, datao=bit 1, vppon=bit 2, vddon=bit 3 of the data
    /// register; datai on status bit 6. Zero delays keep the tests fast.
    fn base_config() -> ParportConfig {
        let mut config = ParportConfig::default();
        config.pins.clock = pin(2);
        config.pins.datao = pin(3);
        config.pins.datai = pin(10);
        config.pins.vppon = pin(4);
        config.pins.vddon = pin(5);
        config.delays.base_us = 0;
        config
    }

    #[test]
    fn parse_options_accepts_a_full_option_line() {
        let options = [
            ("dev", "/dev/parport0"),
            ("clock", "3"),
            ("datao", "2"),
            ("datai", "!10"),
            ("vppon", "5"),
            ("vddon", "4"),
            ("selminvdd", "6"),
            ("selprogvdd", "7"),
            ("selmaxvdd", "8"),
            ("selvihhvpp", "16"),
            ("delay", "2"),
            ("extradelay", "1"),
            ("clock_lh_delay", "5"),
            ("data_read_delay", "3"),
            ("vddmincond", "1"),
            ("vddprogcond", "3"),
            ("vddmaxcond", "7"),
            ("vppoffcond", "1"),
        ];
        let config = parse_options(&options).unwrap();
        assert_eq!(config.device, "/dev/parport0");
        assert_eq!(config.io_base, None);
        assert_eq!(
            config.pins.datai,
            Some(PinSpec {
                pin: 10,
                invert: true
            })
        );
        assert_eq!(config.delays.base_us, 2);
        assert_eq!(config.delays.extra_us, 1);
        assert_eq!(config.delays.clock.lh, Some(5));
        assert_eq!(config.delays.data.read, Some(3));
        assert_eq!(config.vdd_prog_cond, 3);
        assert!(config.vpp_off_cond);
    }

    #[test]
    fn parse_options_requires_a_port() {
        let err = parse_options(&[("clock", "3")]).unwrap_err();
        assert!(err.contains("'dev' or 'io'"), "{err}");
    }

    #[test]
    fn parse_options_rejects_both_port_styles() {
        let err = parse_options(&[("dev", "/dev/parport0"), ("io", "0x378")]).unwrap_err();
        assert!(err.contains("Only one"), "{err}");
    }

    #[test]
    fn parse_options_names_the_missing_signal() {
        let options = [
            ("dev", "/dev/parport0"),
            ("clock", "3"),
            ("datao", "2"),
            ("datai", "10"),
            ("vddon", "4"),
        ];
        let err = parse_options(&options).unwrap_err();
        assert_eq!(err, "Missing required parameter: vppon");
    }

    #[test]
    fn parse_options_parses_hex_and_decimal_io_base() {
        let options = [
            ("io", "0x378"),
            ("clock", "3"),
            ("datao", "2"),
            ("datai", "10"),
            ("vppon", "5"),
            ("vddon", "4"),
        ];
        let config = parse_options(&options).unwrap();
        assert_eq!(config.io_base, Some(0x378));

        let options = [
            ("io", "888"),
            ("clock", "3"),
            ("datao", "2"),
            ("datai", "10"),
            ("vppon", "5"),
            ("vddon", "4"),
        ];
        assert_eq!(parse_options(&options).unwrap().io_base, Some(888));
    }

    #[test]
    fn parse_options_rejects_bad_values() {
        for (key, value) in [
            ("clock", "x"),
            ("delay", "fast"),
            ("vddmincond", "8"),
            ("vppoffcond", "yes"),
            ("io", "0xZZ"),
            ("clokc", "3"),
        ] {
            let err = parse_options(&[(key, value)]).unwrap_err();
            assert!(err.contains(key), "{key}: {err}");
        }
    }

    #[test]
    fn delay_overrides_compose_with_base_and_extra() {
        let mut delays = DelayOptions::default();
        delays.base_us = 5;
        delays.extra_us = 2;
        delays.clock.lh = Some(10);
        let resolved = delays.resolve();
        assert_eq!(resolved.clock.lh_us, 12);
        assert_eq!(resolved.clock.hl_us, 7);
        assert_eq!(resolved.data.read_us, 7);
    }

    #[test]
    fn open_parks_all_outputs_low() {
        let (_io, probe) = ParportIcsp::open_mem(&base_config()).unwrap();
        assert_eq!(probe.reg(Register::Data), 0);
    }

    #[test]
    fn clock_and_data_drive_their_mapped_bits() {
        let (mut io, probe) = ParportIcsp::open_mem(&base_config()).unwrap();
        io.set_clock(true);
        assert_eq!(probe.reg(Register::Data) & 0b11, 0b01);
        io.set_data(true);
        assert_eq!(probe.reg(Register::Data) & 0b11, 0b11);
        io.set_clock(false);
        assert_eq!(probe.reg(Register::Data) & 0b11, 0b10);
    }

    #[test]
    fn soft_inversion_flips_the_wire_level() {
        let mut config = base_config();
        config.pins.clock = Some(PinSpec {
            pin: 2,
            invert: true,
        });
        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();
        // Parked logical low means wire high on an inverted pin.
        assert_eq!(probe.reg(Register::Data) & 0x01, 0x01);
        io.set_clock(true);
        assert_eq!(probe.reg(Register::Data) & 0x01, 0x00);
    }

    #[test]
    fn hardware_inverted_control_pin_writes_inverted() {
        let mut config = base_config();
        config.pins.vppon = pin(1); // nStrobe, hardware-inverted
        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();
        assert_eq!(probe.reg(Register::Control) & 0x01, 0x01);
        io.set_vpp(VppState::Vih);
        assert_eq!(probe.reg(Register::Control) & 0x01, 0x00);
    }

    #[test]
    fn data_input_reads_the_status_register() {
        let (io, probe) = ParportIcsp::open_mem(&base_config()).unwrap();
        probe.set_status(0);
        assert!(!io.data());
        probe.set_status(1 << 6);
        assert!(io.data());
    }

    #[test]
    fn data_input_honours_hardware_inversion() {
        let mut config = base_config();
        config.pins.datai = pin(11); // Busy, hardware-inverted
        let (io, probe) = ParportIcsp::open_mem(&config).unwrap();
        probe.set_status(0);
        assert!(io.data());
        probe.set_status(1 << 7);
        assert!(!io.data());
    }

    #[test]
    fn single_selector_does_not_activate_vdd_levels() {
        let mut config = base_config();
        config.pins.selprogvdd = pin(7); // data bit 5
        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();
        io.set_vdd(VddState::On);
        // Plain On leaves the lone selector alone and raises the enable.
        assert_eq!(probe.reg(Register::Data) & (1 << 5), 0);
        assert_eq!(probe.reg(Register::Data) & (1 << 3), 1 << 3);
    }

    #[test]
    fn vdd_min_max_fall_back_to_the_wired_selector() {
        let mut config = base_config();
        config.pins.selprogvdd = pin(7); // data bit 5, the only selector
        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();

        // vddmincond defaults to 0b001: the prog selector (bit 1) stays low.
        io.set_vdd(VddState::Min);
        assert_eq!(probe.reg(Register::Data) & (1 << 5), 0);
        assert_eq!(probe.reg(Register::Data) & (1 << 3), 1 << 3);

        io.set_vdd(VddState::Prog);
        assert_eq!(probe.reg(Register::Data) & (1 << 5), 1 << 5);

        io.set_vdd(VddState::Max);
        assert_eq!(probe.reg(Register::Data) & (1 << 5), 0);
    }

    #[test]
    fn three_level_vdd_selects_per_condition_mask() {
        let mut config = base_config();
        config.pins.selminvdd = pin(6); // data bit 4
        config.pins.selprogvdd = pin(7); // data bit 5
        config.pins.selmaxvdd = pin(8); // data bit 6
        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();

        io.set_vdd(VddState::Min);
        let data = probe.reg(Register::Data);
        assert_eq!(data & (0b111 << 4), 0b001 << 4);
        assert_eq!(data & (1 << 3), 1 << 3);

        // With the full selector wired, plain On routes through Prog.
        io.set_vdd(VddState::On);
        assert_eq!(probe.reg(Register::Data) & (0b111 << 4), 0b010 << 4);

        io.set_vdd(VddState::Off);
        assert_eq!(probe.reg(Register::Data) & (1 << 3), 0);
    }

    #[test]
    fn vpp_order_follows_the_off_condition() {
        let mut config = base_config();
        config.pins.selvihhvpp = pin(16); // control bit 2

        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();
        let mark = probe.writes_len();
        io.set_vpp(VppState::Vih);
        assert_eq!(
            probe.registers_written_since(mark),
            vec![Register::Control, Register::Data],
            "selector before enable"
        );

        config.vpp_off_cond = true;
        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();
        let mark = probe.writes_len();
        io.set_vpp(VppState::Vih);
        assert_eq!(
            probe.registers_written_since(mark),
            vec![Register::Data, Register::Control],
            "enable before selector"
        );
    }

    #[test]
    fn vpp_states_drive_enable_and_selector() {
        let mut config = base_config();
        config.pins.selvihhvpp = pin(16); // control bit 2
        let (mut io, probe) = ParportIcsp::open_mem(&config).unwrap();

        io.set_vpp(VppState::Vih);
        assert_eq!(probe.reg(Register::Data) & (1 << 2), 1 << 2);
        assert_eq!(probe.reg(Register::Control) & (1 << 2), 1 << 2);

        io.set_vpp(VppState::Vdd);
        assert_eq!(probe.reg(Register::Data) & (1 << 2), 1 << 2);
        assert_eq!(probe.reg(Register::Control) & (1 << 2), 0);

        io.set_vpp(VppState::Gnd);
        assert_eq!(probe.reg(Register::Data) & (1 << 2), 0);
    }

    #[test]
    fn drop_parks_the_rails() {
        let (mut io, probe) = ParportIcsp::open_mem(&base_config()).unwrap();
        io.set_vdd(VddState::On);
        io.set_vpp(VppState::Vih);
        io.set_clock(true);
        assert_ne!(probe.reg(Register::Data), 0);
        drop(io);
        assert_eq!(probe.reg(Register::Data), 0);
    }

    #[test]
    fn build_rejects_misdirected_pins() {
        let mut config = base_config();
        config.pins.datai = pin(2); // output-only data pin
        let err = ParportIcsp::open_mem(&config).unwrap_err();
        assert!(matches!(
            err,
            ParportError::BadPin {
                signal: "datai",
                pin: 2,
                ..
            }
        ));
    }

    #[test]
    fn build_requires_the_core_signals() {
        let mut config = base_config();
        config.pins.vddon = None;
        let err = ParportIcsp::open_mem(&config).unwrap_err();
        assert!(matches!(err, ParportError::MissingPin("vddon")));
    }
}
