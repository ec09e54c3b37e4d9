//! `deckcap list`

use anyhow::Result;
use capture_engine::{CaptureContext, DeviceInfo};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct DeviceEntry {
    index: usize,
    #[serde(flatten)]
    info: DeviceInfo,
}

fn entries(ctx: &CaptureContext) -> Vec<DeviceEntry> {
    (0..ctx.device_count())
        .filter_map(|index| ctx.device_info(index).map(|info| DeviceEntry { index, info }))
        .collect()
}

pub fn run(ctx: &CaptureContext, json: bool) -> Result<()> {
    let devices = entries(ctx);

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No capture devices found");
        return Ok(());
    }
    for device in &devices {
        let info = &device.info;
        println!(
            "[{}] {} ({} channel{})",
            device.index,
            info.name,
            info.channel_capacity,
            if info.channel_capacity == 1 { "" } else { "s" }
        );
        println!("    ports: {}", info.port_names().join(", "));
        let modes: Vec<_> = info.display_modes.iter().map(|m| m.name.as_str()).collect();
        println!("    modes: {}", modes.join(" "));
    }
    Ok(())
}
