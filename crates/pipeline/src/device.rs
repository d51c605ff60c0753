//! Compute device selection.
//!
//! The preferred device is CUDA; availability is probed with `nvidia-smi`.
//! When the probe fails (binary missing, no GPU, driver error) the service
//! falls back to CPU with a warning rather than refusing to start.

use serde::Serialize;

/// Compute device the pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and memory of the first visible GPU.
#[derive(Debug, Clone, Serialize)]
pub struct GpuInfo {
    pub name: String,
    pub memory_mib: u64,
}

impl GpuInfo {
    /// Human-readable summary, e.g. `"Tesla T4 (15.73 GB)"`.
    pub fn describe(&self) -> String {
        let gb = (self.memory_mib as f64) * 1024.0 * 1024.0 / 1e9;
        format!("{} ({:.2} GB)", self.name, gb)
    }
}

/// Probe for an NVIDIA GPU via `nvidia-smi`.
///
/// Returns `None` when the binary is missing, exits non-zero, or produces
/// unparseable output.
pub async fn probe_gpu() -> Option<GpuInfo> {
    let output = tokio::process::Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        tracing::debug!(
            exit_code = output.status.code(),
            "nvidia-smi exited non-zero"
        );
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_nvidia_smi(&stdout)
}

/// Select the compute device, falling back to CPU when the preferred
/// device is unavailable.
pub async fn select_device(preferred: Device) -> (Device, Option<GpuInfo>) {
    match preferred {
        Device::Cpu => (Device::Cpu, None),
        Device::Cuda => match probe_gpu().await {
            Some(gpu) => {
                tracing::info!(gpu = %gpu.describe(), "CUDA device available");
                (Device::Cuda, Some(gpu))
            }
            None => {
                tracing::warn!("CUDA requested but not available, falling back to CPU");
                (Device::Cpu, None)
            }
        },
    }
}

/// Parse the first line of `nvidia-smi --query-gpu=name,memory.total
/// --format=csv,noheader,nounits` output (`"Tesla T4, 15360"`).
fn parse_nvidia_smi(stdout: &str) -> Option<GpuInfo> {
    let line = stdout.lines().next()?.trim();
    let (name, mem) = line.rsplit_once(',')?;
    let memory_mib = mem.trim().parse::<u64>().ok()?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(GpuInfo {
        name: name.to_string(),
        memory_mib,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
