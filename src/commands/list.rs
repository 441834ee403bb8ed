//! List commands implementation

use flashdiff_core::chip::{ChipDatabase, EraseBlock};

/// List all chips in the database
pub fn list_chips(db: &ChipDatabase, vendor_filter: Option<&str>) {
    println!("Supported flash chips:");
    println!();
    println!(
        "{:<10} {:<14} {:>10} {:>12}  Erase blocks",
        "Vendor", "Name", "Size", "Write"
    );
    println!("{}", "-".repeat(78));

    let chips = match vendor_filter {
        Some(vendor) => db.find_by_vendor(vendor),
        None => db.iter().collect(),
    };

    for chip in chips {
        let erasers: Vec<String> = chip.erase_blocks().iter().map(format_eraser).collect();
        println!(
            "{:<10} {:<14} {:>10} {:>12}  {}",
            chip.vendor(),
            chip.name(),
            format_size(chip.total_size),
            chip.write_granularity.to_string(),
            erasers.join(", ")
        );
    }
}

fn format_eraser(eb: &EraseBlock) -> String {
    let regions: Vec<String> = eb
        .regions()
        .iter()
        .map(|r| {
            if r.count == 1 {
                format_size(r.size)
            } else {
                format!("{}x{}", r.count, format_size(r.size))
            }
        })
        .collect();
    let regions = regions.join("+");
    if eb.is_usable() {
        regions
    } else {
        format!("({})", regions)
    }
}

pub fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
