//! Device selection

use tch::{Cuda, Device};

use crate::error::{Error, Result};

/// Resolve a device name from the configuration
///
/// "cuda" fails when no CUDA device is present; "auto" falls back to CPU.
pub fn resolve_device(name: &str) -> Result<Device> {
    match name.to_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => {
            if Cuda::is_available() {
                Ok(Device::Cuda(0))
            } else {
                Err(Error::ResourceUnavailable(
                    "CUDA requested but no CUDA device is available".to_string(),
                ))
            }
        }
        "auto" => Ok(Device::cuda_if_available()),
        other => Err(Error::config(format!(
            "unknown device '{}', expected cpu, cuda or auto",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu() {
        assert_eq!(resolve_device("CPU").unwrap(), Device::Cpu);
    }

    #[test]
    fn test_cuda_without_gpu_fails_fast() {
        if !Cuda::is_available() {
            assert!(matches!(
                resolve_device("cuda"),
                Err(Error::ResourceUnavailable(_))
            ));
        }
    }

    #[test]
    fn test_unknown_device() {
        assert!(matches!(resolve_device("tpu"), Err(Error::Configuration(_))));
    }
}
