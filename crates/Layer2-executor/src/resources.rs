//! Resource translation
//!
//! Turns the resource strings a job declares (`"500m"`, `"1Gb"`, `"1"`) into
//! [`ResourceRequirements`], and those into the limit primitives the
//! container runtime enforces.

use crate::error::{ExecutorError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// CPU cores to nano-CPUs
pub const NANO_CPU_COEFFICIENT: f64 = 1_000_000_000.0;

/// Device capability requested for GPUs
pub const GPU_CAPABILITY: &str = "gpu";

// ============================================================================
// Declared resources
// ============================================================================

/// Resource usage as declared in a job spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsageConfig {
    /// CPU cores, e.g. `"0.5"` or `"500m"`
    #[serde(default)]
    pub cpu: String,
    /// Memory, e.g. `"512Mb"`, `"1Gi"`, `"1048576"`
    #[serde(default)]
    pub memory: String,
    /// Whole GPUs, e.g. `"1"`
    #[serde(default)]
    pub gpu: String,
}

impl ResourceUsageConfig {
    /// Parse the declared strings. Empty strings mean "no requirement".
    pub fn parse(&self) -> Result<ResourceRequirements> {
        Ok(ResourceRequirements {
            cpu: parse_cpu(&self.cpu)?,
            memory: parse_memory(&self.memory)?,
            gpu: parse_gpu(&self.gpu)?,
        })
    }
}

/// Parsed resource requirements
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Fraction of CPU cores
    pub cpu: f64,
    /// Memory in bytes
    pub memory: u64,
    /// Number of GPUs
    pub gpu: u64,
}

impl ResourceRequirements {
    pub fn new(cpu: f64, memory: u64, gpu: u64) -> Self {
        Self { cpu, memory, gpu }
    }
}

// ============================================================================
// Runtime limits
// ============================================================================

/// One device request passed to the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequest {
    /// Number of devices; selection of concrete devices is left to the runtime
    pub count: u64,
    /// Capability sets, any of which satisfies the request
    pub capabilities: Vec<Vec<String>>,
}

/// Limits in the units the container runtime expects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub device_requests: Vec<DeviceRequest>,
}

/// Translate requirements into runtime limits. Total and side-effect free.
pub fn translate(req: &ResourceRequirements) -> RuntimeLimits {
    let mut device_requests = Vec::new();
    if req.gpu > 0 {
        device_requests.push(DeviceRequest {
            count: req.gpu,
            capabilities: vec![vec![GPU_CAPABILITY.to_string()]],
        });
    }

    RuntimeLimits {
        memory_bytes: i64::try_from(req.memory).unwrap_or(i64::MAX),
        nano_cpus: scale_cpu(req.cpu),
        device_requests,
    }
}

/// `cpu * 1e9`, rounded. NaN and negatives become 0, overflow saturates.
fn scale_cpu(cpu: f64) -> i64 {
    if cpu.is_nan() || cpu <= 0.0 {
        return 0;
    }
    let scaled = (cpu * NANO_CPU_COEFFICIENT).round();
    if scaled >= i64::MAX as f64 {
        i64::MAX
    } else {
        scaled as i64
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn quantity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([0-9]*\.?[0-9]+)\s*([A-Za-z]*)\s*$").expect("quantity regex is valid")
    })
}

fn split_quantity<'a>(kind: &str, raw: &'a str) -> Result<(f64, &'a str)> {
    let caps = quantity_regex().captures(raw).ok_or_else(|| {
        ExecutorError::validation(format!("invalid {} quantity: {:?}", kind, raw))
    })?;
    let number = caps
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse::<f64>()
        .map_err(|e| ExecutorError::validation(format!("invalid {} quantity {:?}: {}", kind, raw, e)))?;
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    Ok((number, unit))
}

fn parse_cpu(raw: &str) -> Result<f64> {
    if raw.trim().is_empty() {
        return Ok(0.0);
    }
    let (value, unit) = split_quantity("cpu", raw)?;
    match unit {
        "" => Ok(value),
        "m" => Ok(value / 1000.0),
        other => Err(ExecutorError::validation(format!(
            "invalid cpu unit {:?} in {:?}",
            other, raw
        ))),
    }
}

fn parse_memory(raw: &str) -> Result<u64> {
    if raw.trim().is_empty() {
        return Ok(0);
    }
    let (value, unit) = split_quantity("memory", raw)?;
    let multiplier: f64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1e3,
        "ki" | "kib" => 1024.0,
        "m" | "mb" => 1e6,
        "mi" | "mib" => 1024.0 * 1024.0,
        "g" | "gb" => 1e9,
        "gi" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "t" | "tb" => 1e12,
        "ti" | "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => {
            return Err(ExecutorError::validation(format!(
                "invalid memory unit {:?} in {:?}",
                other, raw
            )))
        }
    };
    let bytes = (value * multiplier).round();
    if bytes >= u64::MAX as f64 {
        return Err(ExecutorError::validation(format!(
            "memory quantity {:?} is too large",
            raw
        )));
    }
    Ok(bytes as u64)
}

fn parse_gpu(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<u64>()
        .map_err(|_| ExecutorError::validation(format!("invalid gpu count: {:?}", raw)))
}
