//! Compute device resolution

use crate::SetupWarning;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Environment variable listing the accelerators visible to this process
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Primary compute device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Resolved device plus the ordered device indices used for replication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceAssignment {
    pub device: Device,
    pub device_ids: Vec<usize>,
}

impl DeviceAssignment {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            device_ids: Vec::new(),
        }
    }

    /// True when the model should be replicated across several devices
    pub fn is_replicated(&self) -> bool {
        self.device_ids.len() > 1
    }
}

/// Decide how many devices to use given what was requested and what exists.
///
/// Never fails: a shortfall degrades to fewer devices (or CPU) and is
/// reported as a warning.
pub fn resolve_devices(
    requested: usize,
    available: usize,
) -> (DeviceAssignment, Option<SetupWarning>) {
    let mut warning = None;
    let mut n_use = requested;

    if requested > 0 && available == 0 {
        let w = SetupWarning::NoAccelerator { requested };
        warn!(requested, "{}", w);
        warning = Some(w);
        n_use = 0;
    } else if requested > available {
        let w = SetupWarning::DeviceShortfall {
            requested,
            available,
        };
        warn!(requested, available, "{}", w);
        warning = Some(w);
        n_use = available;
    }

    let assignment = if n_use > 0 {
        DeviceAssignment {
            device: Device::Cuda(0),
            device_ids: (0..n_use).collect(),
        }
    } else {
        DeviceAssignment::cpu()
    };

    info!(device = %assignment.device, count = n_use, "Resolved compute devices");
    (assignment, warning)
}

/// Count accelerators visible to this process
pub fn probe_available_devices() -> usize {
    parse_visible_devices(std::env::var(VISIBLE_DEVICES_ENV).ok().as_deref())
}

/// Parse a `CUDA_VISIBLE_DEVICES` style list. Unset, empty or `-1` means none.
pub fn parse_visible_devices(value: Option<&str>) -> usize {
    match value.map(str::trim) {
        None | Some("") | Some("-1") => 0,
        Some(list) => list
            .split(',')
            .map(str::trim)
            .take_while(|id| !id.is_empty() && !id.starts_with('-'))
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_count_is_clamped_minimum() {
        for requested in 0..6 {
            for available in 0..6 {
                let (assignment, _) = resolve_devices(requested, available);
                let expected = if requested > 0 {
                    requested.min(available)
                } else {
                    0
                };
                assert_eq!(assignment.device_ids.len(), expected);
                if expected == 0 {
                    assert_eq!(assignment.device, Device::Cpu);
                } else {
                    assert_eq!(assignment.device, Device::Cuda(0));
                }
            }
        }
    }

    #[test]
    fn test_no_accelerator_warning() {
        let (assignment, warning) = resolve_devices(2, 0);
        assert_eq!(assignment, DeviceAssignment::cpu());
        assert_eq!(warning, Some(SetupWarning::NoAccelerator { requested: 2 }));
    }

    #[test]
    fn test_shortfall_warning() {
        let (assignment, warning) = resolve_devices(4, 2);
        assert_eq!(assignment.device_ids, vec![0, 1]);
        assert!(assignment.is_replicated());
        assert_eq!(
            warning,
            Some(SetupWarning::DeviceShortfall {
                requested: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_exact_request_no_warning() {
        let (assignment, warning) = resolve_devices(1, 8);
        assert_eq!(assignment.device_ids, vec![0]);
        assert!(!assignment.is_replicated());
        assert!(warning.is_none());
    }

    #[test]
    fn test_parse_visible_devices() {
        assert_eq!(parse_visible_devices(None), 0);
        assert_eq!(parse_visible_devices(Some("")), 0);
        assert_eq!(parse_visible_devices(Some("-1")), 0);
        assert_eq!(parse_visible_devices(Some("0")), 1);
        assert_eq!(parse_visible_devices(Some("0,1,3")), 3);
        assert_eq!(parse_visible_devices(Some("0,1,-1,2")), 2);
    }
}
