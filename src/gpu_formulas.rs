//! CUDA-accelerated batch energy kernels.
//!
//! Device-side counterparts of the host formulas; results must agree
//! with the host kernels within single-precision tolerance. Kernels are
//! compiled at construction through NVRTC and launched on the device's
//! default stream (cudarc 0.9: synchronous launches).

use cudarc::driver::*;
use cudarc::nvrtc::compile_ptx;
use ndarray::{Array1, Array2};
use std::sync::Arc;

use crate::errors::{Result, SolverError};

const KERNEL_SRC: &str = r#"
extern "C" __global__ void dense_batch_energy_kernel(
    const float* w, const float* b, const unsigned char* xs,
    int n, int batch, float* out)
{
    int row = blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= batch) return;
    const unsigned char* x = xs + row * n;
    float e = 0.0f;
    for (int i = 0; i < n; ++i) {
        if (!x[i]) continue;
        e += b[i];
        for (int j = 0; j < n; ++j) {
            if (x[j]) e += w[i * n + j];
        }
    }
    out[row] = e;
}

extern "C" __global__ void bipartite_batch_energy_kernel(
    const float* b0, const float* b1, const float* w,
    const unsigned char* xs0, const unsigned char* xs1,
    int n0, int n1, int batch, float* out)
{
    int row = blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= batch) return;
    const unsigned char* x0 = xs0 + row * n0;
    const unsigned char* x1 = xs1 + row * n1;
    float e = 0.0f;
    for (int j = 0; j < n1; ++j) {
        if (x1[j]) e += b1[j];
    }
    for (int i = 0; i < n0; ++i) {
        if (!x0[i]) continue;
        e += b0[i];
        for (int j = 0; j < n1; ++j) {
            if (x1[j]) e += w[i * n1 + j];
        }
    }
    out[row] = e;
}
"#;

const MODULE_NAME: &str = "spinforge_formulas";

/// Batch energy evaluation on a CUDA device.
pub struct GpuFormulas {
    device: Arc<CudaDevice>,
}

impl GpuFormulas {
    /// Open device `ordinal` and compile the energy kernels.
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal)
            .map_err(|e| SolverError::Device(format!("failed to open CUDA device {}: {}", ordinal, e)))?;
        let ptx = compile_ptx(KERNEL_SRC)
            .map_err(|e| SolverError::Device(format!("failed to compile energy kernels: {}", e)))?;
        device
            .load_ptx(
                ptx,
                MODULE_NAME,
                &["dense_batch_energy_kernel", "bipartite_batch_energy_kernel"],
            )
            .map_err(|e| SolverError::Device(format!("failed to load energy kernels: {}", e)))?;
        println!("[GPU-FORMULAS][OPEN] CUDA device {} ready", ordinal);
        Ok(Self { device })
    }

    fn launch_config(batch: usize) -> LaunchConfig {
        let threads = 256u32;
        let blocks = (batch as u32 + threads - 1) / threads;
        LaunchConfig {
            grid_dim: (blocks.max(1), 1, 1),
            block_dim: (threads, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    /// Dense batch energies; one row of `xs` per assignment.
    pub fn dense_batch_energy(
        &self,
        w: &Array2<f32>,
        b: &Array1<f32>,
        xs: &Array2<u8>,
    ) -> Result<Vec<f32>> {
        let n = b.len();
        let batch = xs.nrows();
        if w.nrows() != n || w.ncols() != n || xs.ncols() != n {
            return Err(SolverError::Config(
                "dense batch shapes do not match N".to_string(),
            ));
        }

        let d_w = self
            .device
            .htod_copy(w.iter().cloned().collect::<Vec<f32>>())
            .map_err(|e| SolverError::Device(format!("failed to copy W: {}", e)))?;
        let d_b = self
            .device
            .htod_copy(b.to_vec())
            .map_err(|e| SolverError::Device(format!("failed to copy b: {}", e)))?;
        let d_xs = self
            .device
            .htod_copy(xs.iter().cloned().collect::<Vec<u8>>())
            .map_err(|e| SolverError::Device(format!("failed to copy assignments: {}", e)))?;
        let d_out = self
            .device
            .alloc_zeros::<f32>(batch)
            .map_err(|e| SolverError::Device(format!("failed to allocate energies: {}", e)))?;

        let kernel = self
            .device
            .get_func(MODULE_NAME, "dense_batch_energy_kernel")
            .ok_or_else(|| SolverError::Device("dense_batch_energy_kernel not found".to_string()))?;
        unsafe {
            kernel
                .launch(
                    Self::launch_config(batch),
                    (&d_w, &d_b, &d_xs, n as i32, batch as i32, &d_out),
                )
                .map_err(|e| SolverError::Device(format!("dense energy kernel failed: {}", e)))?;
        }

        self.device
            .dtoh_sync_copy(&d_out)
            .map_err(|e| SolverError::Device(format!("failed to download energies: {}", e)))
    }

    /// Bipartite batch energies over row-paired assignments.
    pub fn bipartite_batch_energy(
        &self,
        b0: &Array1<f32>,
        b1: &Array1<f32>,
        w: &Array2<f32>,
        xs0: &Array2<u8>,
        xs1: &Array2<u8>,
    ) -> Result<Vec<f32>> {
        let n0 = b0.len();
        let n1 = b1.len();
        let batch = xs0.nrows();
        if w.nrows() != n0 || w.ncols() != n1 || xs0.ncols() != n0 || xs1.ncols() != n1 {
            return Err(SolverError::Config(
                "bipartite batch shapes do not match (N0, N1)".to_string(),
            ));
        }
        if xs1.nrows() != batch {
            return Err(SolverError::Config(
                "bipartite batch sizes must match".to_string(),
            ));
        }

        let d_b0 = self
            .device
            .htod_copy(b0.to_vec())
            .map_err(|e| SolverError::Device(format!("failed to copy b0: {}", e)))?;
        let d_b1 = self
            .device
            .htod_copy(b1.to_vec())
            .map_err(|e| SolverError::Device(format!("failed to copy b1: {}", e)))?;
        let d_w = self
            .device
            .htod_copy(w.iter().cloned().collect::<Vec<f32>>())
            .map_err(|e| SolverError::Device(format!("failed to copy W: {}", e)))?;
        let d_xs0 = self
            .device
            .htod_copy(xs0.iter().cloned().collect::<Vec<u8>>())
            .map_err(|e| SolverError::Device(format!("failed to copy x0 batch: {}", e)))?;
        let d_xs1 = self
            .device
            .htod_copy(xs1.iter().cloned().collect::<Vec<u8>>())
            .map_err(|e| SolverError::Device(format!("failed to copy x1 batch: {}", e)))?;
        let d_out = self
            .device
            .alloc_zeros::<f32>(batch)
            .map_err(|e| SolverError::Device(format!("failed to allocate energies: {}", e)))?;

        let kernel = self
            .device
            .get_func(MODULE_NAME, "bipartite_batch_energy_kernel")
            .ok_or_else(|| {
                SolverError::Device("bipartite_batch_energy_kernel not found".to_string())
            })?;
        unsafe {
            kernel
                .launch(
                    Self::launch_config(batch),
                    (
                        &d_b0,
                        &d_b1,
                        &d_w,
                        &d_xs0,
                        &d_xs1,
                        n0 as i32,
                        n1 as i32,
                        batch as i32,
                        &d_out,
                    ),
                )
                .map_err(|e| SolverError::Device(format!("bipartite energy kernel failed: {}", e)))?;
        }

        self.device
            .dtoh_sync_copy(&d_out)
            .map_err(|e| SolverError::Device(format!("failed to download energies: {}", e)))
    }
}
