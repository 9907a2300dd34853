//! Device info command implementation

use ricsp_core::device::DeviceDescriptor;
use ricsp_core::MemoryMap;

/// Print everything the database knows about one part
pub fn run(device: &DeviceDescriptor) {
    match device {
        DeviceDescriptor::Pic(d) => {
            let unit = if d.family.is_pic18() { "bytes" } else { "words" };
            println!("{} ({}, {})", d.name, d.vendor, d.family);
            println!(
                "  Program memory: {} words of {} bits",
                d.code_words,
                d.family.word_bits()
            );
            println!("  ID locations:   {} {}", d.id_words, unit);
            println!("  Config:         {} {}", d.config_words, unit);
            if d.data_bytes > 0 {
                println!("  EEPROM:         {} bytes", d.data_bytes);
            }
            match d.device_id {
                Some(id) => println!(
                    "  Device ID:      0x{:04X} (mask 0x{:04X})",
                    id, d.device_id_mask
                ),
                None => println!("  Device ID:      not implemented"),
            }
            if d.program_multiplier > 0 {
                println!(
                    "  Program pulse:  {} us, up to {} attempts + {}x over-programming",
                    d.program_time_us, d.program_count, d.program_multiplier
                );
            } else {
                println!(
                    "  Program pulse:  {} us, up to {} attempts",
                    d.program_time_us, d.program_count
                );
            }
            println!("  Bulk erase:     {} us", d.erase_time_us);
            if d.has_osccal {
                println!("  OSCCAL:         factory word preserved across erase");
            }
            if d.bandgap_mask != 0 {
                println!("  Bandgap bits:   0x{:04X} preserved across erase", d.bandgap_mask);
            }
            if d.cp_mask != 0 {
                println!("  Code protect:   config bits 0x{:04X}", d.cp_mask);
            }
            if d.cpd_mask != 0 {
                println!("  Data protect:   config bits 0x{:04X}", d.cpd_mask);
            }
            println!("  Vpp:            {}", d.vpp);
            println!("  Vdd:            {}", d.vdd);
        }
        DeviceDescriptor::Avr(d) => {
            println!("{} ({}, AVR)", d.name, d.vendor);
            println!(
                "  Signature:   {:02X} {:02X} {:02X}",
                d.signature[0], d.signature[1], d.signature[2]
            );
            if d.flash.paged() {
                println!(
                    "  Flash:       {} bytes ({} pages of {}), write {} us",
                    d.flash.bytes, d.flash.pages, d.flash.page_bytes, d.flash.write_time_us
                );
            } else {
                println!(
                    "  Flash:       {} bytes, write {} us",
                    d.flash.bytes, d.flash.write_time_us
                );
            }
            if d.eeprom.present() {
                if d.eeprom.paged() {
                    println!(
                        "  EEPROM:      {} bytes ({} pages of {}), write {} us",
                        d.eeprom.bytes, d.eeprom.pages, d.eeprom.page_bytes, d.eeprom.write_time_us
                    );
                } else {
                    println!(
                        "  EEPROM:      {} bytes, write {} us",
                        d.eeprom.bytes, d.eeprom.write_time_us
                    );
                }
            }
            let ins = &d.instructions;
            let mut fuses = Vec::new();
            if ins.read_fuse.is_valid() {
                fuses.push("low");
            }
            if ins.read_high_fuse.is_valid() {
                fuses.push("high");
            }
            if ins.read_ext_fuse.is_valid() {
                fuses.push("ext");
            }
            if ins.read_lock.is_valid() {
                fuses.push("lock");
            }
            if fuses.is_empty() {
                println!("  Fuses:       none readable");
            } else {
                println!("  Fuses:       {}", fuses.join(", "));
            }
            if d.calibration_bytes > 0 {
                println!("  Calibration: {} bytes", d.calibration_bytes);
            }
            println!("  Chip erase:  {} us", d.erase_time_us);
            println!(
                "  Vcc:         {:.1}-{:.1} V",
                f32::from(d.vcc_min_mv) / 1000.0,
                f32::from(d.vcc_max_mv) / 1000.0
            );
        }
    }

    println!();
    print_memory_map(&device.memory_map());

    let problems = device.problems();
    if !problems.is_empty() {
        println!();
        println!("Descriptor problems:");
        for issue in &problems {
            println!("  {}", issue);
        }
    }
}

fn print_memory_map(map: &MemoryMap) {
    println!("Memory map:");
    for region in map.regions() {
        println!(
            "  {:<11} 0x{:06X}..0x{:06X}  {} x {}-bit",
            region.kind.label(),
            region.start,
            region.end(),
            region.len,
            region.word_bits
        );
    }
}
