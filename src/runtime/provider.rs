//! Execution-provider probe
//!
//! Probes once per process for a usable accelerator and maps the configured
//! preference onto a concrete provider. The probe outcome is memoized behind
//! a mutex so repeated session construction never re-probes the device.

use crate::config::ProviderPreference;
use crate::error::RagError;
use anyhow::Result;
use once_cell::sync::Lazy;
use std::sync::Mutex;

/// Concrete inference backend selected for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

/// Outcome of provider resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderStatus {
    pub provider: ExecutionProvider,
    pub using_gpu: bool,
    /// True when an accelerator was wanted but the CPU had to stand in.
    pub fallback_to_cpu: bool,
    pub device_id: i32,
}

static PROBE_RESULT: Lazy<Mutex<Option<bool>>> = Lazy::new(|| Mutex::new(None));

/// Resolve the execution provider for this process.
///
/// The accelerator probe runs at most once per process; subsequent calls
/// reuse the memoized availability. A strict `gpu` preference with no
/// accelerator is fatal before any session is constructed.
pub fn resolve_provider(
    preference: ProviderPreference,
    device_id: i32,
) -> Result<ProviderStatus> {
    let available = {
        let mut memo = PROBE_RESULT
            .lock()
            .expect("provider probe mutex poisoned");
        match *memo {
            Some(available) => available,
            None => {
                let available = probe_accelerator(device_id);
                *memo = Some(available);
                available
            }
        }
    };
    select_provider(preference, available, device_id)
}

/// Map preference and probed availability onto a provider status.
fn select_provider(
    preference: ProviderPreference,
    available: bool,
    device_id: i32,
) -> Result<ProviderStatus> {
    let status = match (preference, available) {
        (ProviderPreference::Gpu, false) => {
            return Err(RagError::AcceleratorUnavailable(format!(
                "execution provider preference is gpu but device {} is not usable",
                device_id
            ))
            .into());
        }
        (ProviderPreference::Gpu, true) | (ProviderPreference::Auto, true) => ProviderStatus {
            provider: ExecutionProvider::Cuda,
            using_gpu: true,
            fallback_to_cpu: false,
            device_id,
        },
        (ProviderPreference::Auto, false) => {
            tracing::info!("No accelerator available, falling back to CPU");
            ProviderStatus {
                provider: ExecutionProvider::Cpu,
                using_gpu: false,
                fallback_to_cpu: true,
                device_id,
            }
        }
        (ProviderPreference::Cpu, available) => {
            if available {
                tracing::warn!(
                    "Accelerator present on device {} but preference pins execution to CPU",
                    device_id
                );
            }
            ProviderStatus {
                provider: ExecutionProvider::Cpu,
                using_gpu: false,
                fallback_to_cpu: false,
                device_id,
            }
        }
    };
    Ok(status)
}

/// Attempt a minimal accelerated session initialization.
#[cfg(feature = "cuda")]
fn probe_accelerator(device_id: i32) -> bool {
    match crate::inference::probe_cuda_session(device_id) {
        Ok(()) => {
            tracing::info!("CUDA execution provider usable on device {}", device_id);
            true
        }
        Err(e) => {
            tracing::warn!("CUDA probe failed on device {}: {}", device_id, e);
            false
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn probe_accelerator(_device_id: i32) -> bool {
    false
}
