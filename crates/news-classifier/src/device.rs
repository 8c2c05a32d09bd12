//! Compute device selection.
//!
//! A model spec names either a concrete device or `"auto"`. Auto resolution
//! happens once, when the bundle loads, and the result is kept for the
//! lifetime of the bundle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;
#[cfg(feature = "nvml-wrapper")]
use tracing::warn;

use crate::error::ClassifierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(u32),
    Mps,
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            Device::Mps => write!(f, "mps"),
        }
    }
}

impl FromStr for Device {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        match lowered.as_str() {
            "cpu" => Ok(Device::Cpu),
            "mps" => Ok(Device::Mps),
            "cuda" => Ok(Device::Cuda(0)),
            other => {
                let ordinal = other
                    .strip_prefix("cuda:")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| ClassifierError::config(format!("unknown device '{}'", s)))?;
                Ok(Device::Cuda(ordinal))
            }
        }
    }
}

/// Device as written in the model catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpec {
    #[default]
    Auto,
    Explicit(Device),
}

impl DeviceSpec {
    /// Pick the concrete device. Explicit devices pass through untouched.
    pub fn resolve(&self, probe: &dyn AcceleratorProbe) -> Device {
        match self {
            DeviceSpec::Explicit(device) => *device,
            DeviceSpec::Auto => probe.preferred_accelerator().unwrap_or(Device::Cpu),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Auto => write!(f, "auto"),
            DeviceSpec::Explicit(device) => device.fmt(f),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(DeviceSpec::Auto)
        } else {
            s.parse().map(DeviceSpec::Explicit)
        }
    }
}

impl Serialize for DeviceSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Reports which accelerator, if any, is usable right now
pub trait AcceleratorProbe: Send + Sync {
    fn preferred_accelerator(&self) -> Option<Device>;
}

/// Probe for hosts without accelerators, and for tests
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuOnly;

impl AcceleratorProbe for CpuOnly {
    fn preferred_accelerator(&self) -> Option<Device> {
        None
    }
}

/// Probe backed by NVML; reports the first CUDA device when one is visible
#[cfg(feature = "nvml-wrapper")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvmlProbe;

#[cfg(feature = "nvml-wrapper")]
impl AcceleratorProbe for NvmlProbe {
    fn preferred_accelerator(&self) -> Option<Device> {
        use nvml_wrapper::Nvml;

        match Nvml::init() {
            Ok(nvml) => match nvml.device_count() {
                Ok(count) if count > 0 => {
                    info!("Detected {} CUDA device(s)", count);
                    Some(Device::Cuda(0))
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("NVML device query failed: {}", e);
                    None
                }
            },
            Err(_) => None,
        }
    }
}

/// The probe the server uses by default
pub fn default_probe() -> std::sync::Arc<dyn AcceleratorProbe> {
    #[cfg(feature = "nvml-wrapper")]
    {
        std::sync::Arc::new(NvmlProbe)
    }
    #[cfg(not(feature = "nvml-wrapper"))]
    {
        info!("NVML support not compiled in; 'auto' devices resolve to cpu");
        std::sync::Arc::new(CpuOnly)
    }
}
