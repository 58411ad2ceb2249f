//! Compute device selection

use std::fmt;

use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BatchError, BatchResult};

/// Where the model weights and the encoded batch live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelection {
    /// First CUDA device if one is usable, otherwise CPU
    #[default]
    Auto,
    /// Always run on the CPU
    Cpu,
    /// A specific CUDA device ordinal
    Cuda(usize),
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl DeviceSelection {
    /// Create the candle device for this selection
    pub fn create_device(&self) -> BatchResult<Device> {
        match self {
            Self::Cpu => {
                info!("Initializing CPU device");
                Ok(Device::Cpu)
            }
            Self::Cuda(ordinal) => {
                info!(ordinal, "Initializing CUDA device");
                Device::new_cuda(*ordinal).map_err(|e| {
                    BatchError::Device(format!("CUDA device {ordinal} initialization failed: {e}"))
                })
            }
            Self::Auto => {
                if !candle_core::utils::cuda_is_available() {
                    info!("CUDA support not compiled in, using CPU");
                    return Ok(Device::Cpu);
                }
                match Device::new_cuda(0) {
                    Ok(device) => {
                        info!("Created CUDA device 0");
                        Ok(device)
                    }
                    Err(e) => {
                        warn!(error = %e, "No usable CUDA device, falling back to CPU");
                        Ok(Device::Cpu)
                    }
                }
            }
        }
    }
}

/// Weight and activation dtype for a device: BF16 on GPU, F32 on CPU.
pub fn compute_dtype(device: &Device) -> DType {
    if device.is_cuda() {
        DType::BF16
    } else {
        DType::F32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_selection() {
        let device = DeviceSelection::Cpu.create_device().unwrap();
        assert!(device.is_cpu());
        assert_eq!(compute_dtype(&device), DType::F32);
    }

    #[test]
    fn test_auto_always_yields_a_device() {
        let device = DeviceSelection::Auto.create_device().unwrap();
        if device.is_cuda() {
            assert_eq!(compute_dtype(&device), DType::BF16);
        } else {
            assert!(device.is_cpu());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(DeviceSelection::Auto.to_string(), "auto");
        assert_eq!(DeviceSelection::Cuda(1).to_string(), "cuda:1");
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DeviceSelection::Cuda(0)).unwrap();
        assert_eq!(json, r#"{"cuda":0}"#);
        let parsed: DeviceSelection = serde_json::from_str(r#""cpu""#).unwrap();
        assert_eq!(parsed, DeviceSelection::Cpu);
    }
}
