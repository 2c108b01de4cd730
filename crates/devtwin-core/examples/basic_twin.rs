//! Basic example of keeping a device twin in sync

use devtwin_core::{props, DeviceTwin, PropertyMap, TwinConfig, TwinStatus};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut twin = DeviceTwin::with_config(TwinConfig {
        metadata: true,
        tags: true,
        ..TwinConfig::default()
    });

    println!("=== Device Twin Basic Example ===\n");

    twin.set_desired_callback(|diff: &PropertyMap| {
        for (key, value) in diff {
            println!("  desired change: {key} = {value}");
        }
        Ok(())
    });

    // Register the device
    if let Some(json) = twin.update_device_manager("sensor-01", Some(TwinStatus::Enabled), None)? {
        println!("Registered: {json}");
    }

    // Service sends the full twin
    println!("\nApplying service document...");
    twin.update_twin_json(
        r#"{
            "deviceId": "sensor-01",
            "etag": "AAAAAAAAAAE=",
            "tags": {"site": "lab"},
            "properties": {
                "desired": {"interval": 30, "$version": 3},
                "reported": {"$version": 1}
            }
        }"#,
    )?;

    // Device reports its state
    println!("\nReporting state...");
    let patch = twin.update_reported_property(&props! {
        "temperature" => 22.5,
        "humidity" => 45,
    })?;
    println!("  patch: {}", patch.unwrap_or_default());

    // Only the delta goes out next time
    let patch = twin.update_reported_property(&props! {
        "temperature" => 22.5,
        "humidity" => 47,
    })?;
    println!("  patch: {}", patch.unwrap_or_default());

    println!("\nFull twin:\n{}", twin.to_json()?);

    Ok(())
}
