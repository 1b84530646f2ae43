//! List available input devices

use parley_audio::AudioCapture;

fn main() -> anyhow::Result<()> {
    println!("Input devices:");
    for device in AudioCapture::list_devices()? {
        println!(
            "  [{}] {}{} ({} ch, {} Hz)",
            device.index,
            device.name,
            if device.is_default { " (default)" } else { "" },
            device.max_input_channels,
            device.default_sample_rate
        );
    }
    Ok(())
}
