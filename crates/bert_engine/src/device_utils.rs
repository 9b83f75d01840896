use anyhow::{bail, Result};
use candle_core::{Device, DeviceLocation};

#[cfg(feature = "cuda")]
use cudarc::driver::CudaDevice;

/// Resolves a device identifier: `cpu`, `auto`, `cuda`, `cuda:N`.
/// `auto` falls back to CPU when no CUDA device can be opened.
pub fn parse_device(id: &str) -> Result<Device> {
    let id = id.trim().to_ascii_lowercase();
    match id.as_str() {
        "cpu" => Ok(Device::Cpu),
        "auto" => Ok(Device::cuda_if_available(0).unwrap_or(Device::Cpu)),
        "cuda" | "gpu" => Ok(Device::new_cuda(0)?),
        other => {
            if let Some(ordinal) = other.strip_prefix("cuda:") {
                let ordinal: usize = ordinal
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid CUDA ordinal in device '{}'", id))?;
                Ok(Device::new_cuda(ordinal)?)
            } else {
                bail!("Unknown device '{}' (expected cpu, auto, cuda or cuda:N)", id)
            }
        }
    }
}

/// CUDA ordinal of `device`, `None` for non-CUDA devices.
pub fn cuda_ordinal(device: &Device) -> Option<usize> {
    match device.location() {
        DeviceLocation::Cuda { gpu_id } => Some(gpu_id),
        _ => None,
    }
}

/// Returns (free_memory, total_memory) in bytes for the specified device.
/// Returns (0, 0) if CUDA is not available or disabled.
pub fn get_vram_info(_device_id: usize) -> Result<(usize, usize)> {
    #[cfg(feature = "cuda")]
    {
        match CudaDevice::new(_device_id) {
            Ok(_dev) => {
                use cudarc::driver::result::mem_get_info;
                let (free, total) = mem_get_info()?;
                Ok((free, total))
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize CUDA device {}: {:?}",
                    _device_id,
                    e
                );
                Ok((0, 0))
            }
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        Ok((0, 0))
    }
}
