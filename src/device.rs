//! Execution device abstraction consumed by both engines.
//!
//! A [`Device`] is a shared, read-only handle over a data-parallel
//! worker pool with a bounded memory budget. Engines never share
//! buffers; each engine opens its own [`DeviceStream`] against the
//! device and owns the [`DeviceBuffer`]s it allocates.
//!
//! Kernels enqueued on one stream execute in issue order on a dedicated
//! worker, with data-parallelism inside a kernel (not across host
//! tasks). `synchronize` is the explicit suspension point: the host
//! must not read a buffer a kernel writes until the stream has drained.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SolverError};

fn default_memory_bytes() -> usize {
    4 * 1024 * 1024 * 1024
}

/// Device sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Worker threads for kernel data-parallelism; 0 picks the pool
    /// library default.
    #[serde(default)]
    pub threads: usize,

    /// Buffer allocation budget.
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            memory_bytes: default_memory_bytes(),
        }
    }
}

/// Descriptive information about an opened device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub threads: usize,
    pub memory_bytes: usize,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} threads, {} MB budget",
            self.name,
            self.threads,
            self.memory_bytes / (1024 * 1024)
        )
    }
}

struct DeviceInner {
    info: DeviceInfo,
    pool: rayon::ThreadPool,
    allocated: AtomicUsize,
}

/// Shared handle to an execution device. Cloning shares the underlying
/// pool; each engine still gets its own stream and buffers.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device({})", self.inner.info)
    }
}

impl Device {
    /// Open the host device with default sizing.
    pub fn host() -> Result<Self> {
        Self::with_config(DeviceConfig::default())
    }

    pub fn with_config(config: DeviceConfig) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if config.threads > 0 {
            builder = builder.num_threads(config.threads);
        }
        let pool = builder
            .build()
            .map_err(|e| SolverError::Device(format!("failed to build worker pool: {}", e)))?;
        let threads = pool.current_num_threads();
        let info = DeviceInfo {
            name: format!("host-parallel-{}", threads),
            threads,
            memory_bytes: config.memory_bytes,
        };
        println!("[DEVICE][OPEN] {}", info);
        Ok(Self {
            inner: Arc::new(DeviceInner {
                info,
                pool,
                allocated: AtomicUsize::new(0),
            }),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Allocate a zero-initialized buffer against the memory budget.
    pub fn alloc<T: Copy + Default + Send + 'static>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        let bytes = len * std::mem::size_of::<T>();
        self.reserve(bytes)?;
        Ok(DeviceBuffer {
            data: Arc::new(Mutex::new(vec![T::default(); len])),
            len,
            bytes,
            device: self.clone(),
        })
    }

    /// Open a new execution stream against this device.
    pub fn stream(&self) -> Result<DeviceStream> {
        DeviceStream::new(self.clone())
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut current = self.inner.allocated.load(Ordering::Relaxed);
        loop {
            let next = current.checked_add(bytes).ok_or_else(|| {
                SolverError::Device("buffer allocation size overflow".to_string())
            })?;
            if next > self.inner.info.memory_bytes {
                return Err(SolverError::Device(format!(
                    "allocation of {} bytes exceeds device budget ({} of {} in use)",
                    bytes, current, self.inner.info.memory_bytes
                )));
            }
            match self.inner.allocated.compare_exchange(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.inner.allocated.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub(crate) fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.inner.pool.install(f)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// FIFO execution stream. Jobs run in issue order on a dedicated
/// worker; `synchronize` blocks until the queue drains.
pub struct DeviceStream {
    device: Device,
    tx: Option<Sender<Job>>,
    pending: Arc<(Mutex<usize>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceStream {
    fn new(device: Device) -> Result<Self> {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = mpsc::channel();
        let pending = Arc::new((Mutex::new(0usize), Condvar::new()));
        let pending_worker = Arc::clone(&pending);
        let worker = std::thread::Builder::new()
            .name("spinforge-stream".to_string())
            .spawn(move || {
                for job in rx {
                    // A panicking kernel must not wedge synchronize();
                    // the caller observes the failure through Pending.
                    let _ = catch_unwind(AssertUnwindSafe(job));
                    let (lock, cvar) = &*pending_worker;
                    let mut count = lock.lock().unwrap_or_else(|p| p.into_inner());
                    *count -= 1;
                    cvar.notify_all();
                }
            })
            .map_err(|e| SolverError::Device(format!("failed to spawn stream worker: {}", e)))?;
        Ok(Self {
            device,
            tx: Some(tx),
            pending,
            worker: Some(worker),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Enqueue a kernel. The returned [`Pending`] yields the kernel's
    /// result; dropping it without waiting is allowed.
    pub fn launch<R, F>(&self, kernel: F) -> Pending<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let device = self.device.clone();
        {
            let (lock, _) = &*self.pending;
            *lock.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        }
        let job: Job = Box::new(move || {
            let result = device.install(kernel);
            let _ = result_tx.send(result);
        });
        if let Some(tx) = &self.tx {
            if tx.send(job).is_err() {
                let (lock, cvar) = &*self.pending;
                *lock.lock().unwrap_or_else(|p| p.into_inner()) -= 1;
                cvar.notify_all();
            }
        }
        Pending { rx: result_rx }
    }

    /// Block until every kernel enqueued so far has completed.
    pub fn synchronize(&self) -> Result<()> {
        let (lock, cvar) = &*self.pending;
        let mut count = lock
            .lock()
            .map_err(|_| SolverError::Device("stream state poisoned".to_string()))?;
        while *count > 0 {
            count = cvar
                .wait(count)
                .map_err(|_| SolverError::Device("stream state poisoned".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Handle to the result of a launched kernel.
pub struct Pending<R> {
    rx: Receiver<R>,
}

impl<R> Pending<R> {
    /// Block until the kernel completes and take its result. A kernel
    /// that panicked surfaces here as a device error.
    pub fn wait(self) -> Result<R> {
        self.rx.recv().map_err(|_| {
            SolverError::Device("kernel aborted before producing a result".to_string())
        })
    }
}

/// Buffer carved out of the device budget, exclusively owned by the
/// engine that allocated it and returned to the budget on drop.
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    data: Arc<Mutex<Vec<T>>>,
    len: usize,
    bytes: usize,
    device: Device,
}

impl<T: Copy + Send + 'static> DeviceBuffer<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shared view for kernels launched on a stream. Host code must
    /// synchronize the stream before reading through the buffer again.
    pub(crate) fn shared(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.data)
    }

    pub fn upload(&self, host: &[T]) -> Result<()> {
        if host.len() != self.len {
            return Err(SolverError::Device(format!(
                "upload size {} does not match buffer size {}",
                host.len(),
                self.len
            )));
        }
        let mut guard = lock_buffer(&self.data)?;
        guard.copy_from_slice(host);
        Ok(())
    }

    pub fn download(&self, out: &mut Vec<T>) -> Result<()> {
        self.download_prefix(self.len, out)
    }

    pub fn download_prefix(&self, count: usize, out: &mut Vec<T>) -> Result<()> {
        if count > self.len {
            return Err(SolverError::Device(format!(
                "download of {} elements exceeds buffer size {}",
                count, self.len
            )));
        }
        let guard = lock_buffer(&self.data)?;
        out.clear();
        out.extend_from_slice(&guard[..count]);
        Ok(())
    }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.device.release(self.bytes);
    }
}

pub(crate) fn lock_buffer<T>(data: &Arc<Mutex<Vec<T>>>) -> Result<std::sync::MutexGuard<'_, Vec<T>>> {
    data.lock()
        .map_err(|_| SolverError::Device("device buffer poisoned by failed kernel".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_device() -> Device {
        Device::with_config(DeviceConfig {
            threads: 2,
            memory_bytes: 1024,
        })
        .expect("device opens")
    }

    #[test]
    fn test_allocation_budget_enforced() {
        let device = small_device();
        let a = device.alloc::<u8>(512).expect("first allocation fits");
        let err = device.alloc::<u8>(1024).unwrap_err();
        assert!(matches!(err, SolverError::Device(_)));
        drop(a);
        assert_eq!(device.allocated_bytes(), 0);
        device.alloc::<u8>(1024).expect("budget returned on drop");
    }

    #[test]
    fn test_stream_runs_in_issue_order() {
        let device = small_device();
        let stream = device.stream().expect("stream opens");
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let log = Arc::clone(&log);
            handles.push(stream.launch(move || {
                log.lock().expect("log lock").push(i);
            }));
        }
        stream.synchronize().expect("synchronize");
        assert_eq!(&*log.lock().expect("log lock"), &[0, 1, 2, 3, 4, 5, 6, 7]);
        for h in handles {
            h.wait().expect("kernel completed");
        }
    }

    #[test]
    fn test_kernel_result_round_trip() {
        let device = small_device();
        let stream = device.stream().expect("stream opens");
        let pending = stream.launch(|| (0..100).sum::<u64>());
        assert_eq!(pending.wait().expect("kernel result"), 4950);
    }

    #[test]
    fn test_kernel_panic_surfaces_as_device_error() {
        let device = small_device();
        let stream = device.stream().expect("stream opens");
        let pending = stream.launch(|| -> u32 { panic!("kernel fault") });
        let err = pending.wait().unwrap_err();
        assert!(matches!(err, SolverError::Device(_)));
        // The stream itself stays usable.
        stream.synchronize().expect("synchronize after fault");
        assert_eq!(stream.launch(|| 7u32).wait().expect("next kernel"), 7);
    }

    #[test]
    fn test_buffer_upload_download() {
        let device = small_device();
        let buffer = device.alloc::<f32>(4).expect("allocation");
        buffer.upload(&[1.0, 2.0, 3.0, 4.0]).expect("upload");
        let mut out = Vec::new();
        buffer.download_prefix(2, &mut out).expect("download");
        assert_eq!(out, vec![1.0, 2.0]);
        assert!(buffer.upload(&[0.0]).is_err());
    }
}
