// ============================================================
// Layer 5 — Backend Selection
// ============================================================
// NdArray (CPU) unless a GPU index is requested. A requested
// GPU must first survive a one-element allocation. wgpu
// panics when the adapter does not exist, so that allocation
// runs under catch_unwind and a panic falls back to the CPU.
//
// Reference: Burn Book §6 (Backends)

use std::panic;

use burn::{
    backend::{wgpu::WgpuDevice, Wgpu},
    prelude::*,
};

/// Where a run executes
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeDevice {
    Cpu,
    Gpu(WgpuDevice),
}

/// Resolve the `--gpu` flag to a usable device.
pub fn select_device(gpu: Option<usize>) -> ComputeDevice {
    select_device_with(gpu, wgpu_available)
}

fn select_device_with(gpu: Option<usize>, usable: impl Fn(&WgpuDevice) -> bool) -> ComputeDevice {
    let Some(id) = gpu else {
        return ComputeDevice::Cpu;
    };

    let device = WgpuDevice::DiscreteGpu(id);
    if usable(&device) {
        tracing::info!("Using {:?}", device);
        ComputeDevice::Gpu(device)
    } else {
        tracing::warn!("GPU {} is not available, falling back to CPU", id);
        ComputeDevice::Cpu
    }
}

fn wgpu_available(device: &WgpuDevice) -> bool {
    let device = device.clone();

    // Keep the adapter panic out of the user's terminal
    let hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let ok = panic::catch_unwind(move || {
        Tensor::<Wgpu, 1>::zeros([1], &device).into_data();
    })
    .is_ok();
    panic::set_hook(hook);

    ok
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_gpu_requested_means_cpu() {
        assert_eq!(select_device_with(None, |_| panic!("no GPU was requested")), ComputeDevice::Cpu);
    }

    #[test]
    fn test_missing_gpu_falls_back_to_cpu() {
        assert_eq!(select_device_with(Some(7), |_| false), ComputeDevice::Cpu);
    }

    #[test]
    fn test_available_gpu_is_used() {
        assert_eq!(
            select_device_with(Some(1), |_| true),
            ComputeDevice::Gpu(WgpuDevice::DiscreteGpu(1)),
        );
    }
}
