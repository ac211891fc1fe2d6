use candle_core::Device;

/// Select the compute device for the model.
///
/// Prefers an accelerated device when the crate is built with the `cuda` or
/// `metal` feature and one is present, otherwise falls back to the CPU.
///
/// NOTE: to run the model with Cuda, you need to pass the `--features cuda` flag to the `cargo run` command.
pub fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        return Device::Cpu;
    }

    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("CUDA not available, defaulting to CPU: {e}"),
        }
    } else if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("Metal not available, defaulting to CPU: {e}"),
        }
    }

    Device::Cpu
}

/// Short name of the device, as announced to the host.
pub fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}
