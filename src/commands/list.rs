//! List commands implementation

use crate::programmers;
use ricsp_core::DeviceDatabase;

/// List all compiled-in programmer backends
pub fn list_programmers() {
    println!("Supported programmers:");
    println!();
    for p in programmers::available_programmers() {
        if p.aliases.is_empty() {
            println!("  {:8} - {}", p.name, p.description);
        } else {
            println!(
                "  {:8} - {} (aliases: {})",
                p.name,
                p.description,
                p.aliases.join(", ")
            );
        }
    }
}

/// List devices, optionally filtered by vendor or family substring
pub fn list_devices(db: &DeviceDatabase, vendor_filter: Option<&str>, family_filter: Option<&str>) {
    println!("{:<12} {:<12} NAME", "VENDOR", "FAMILY");
    println!("{}", "-".repeat(40));

    let mut shown = 0;
    for device in db.iter() {
        if let Some(vendor) = vendor_filter {
            if !device
                .vendor()
                .to_lowercase()
                .contains(&vendor.to_lowercase())
            {
                continue;
            }
        }
        if let Some(family) = family_filter {
            if !device
                .family_label()
                .to_lowercase()
                .contains(&family.to_lowercase())
            {
                continue;
            }
        }

        println!(
            "{:<12} {:<12} {}",
            device.vendor(),
            device.family_label(),
            device.name()
        );
        shown += 1;
    }

    if shown == 0 {
        println!("(no matching devices; check --db)");
    }
}
