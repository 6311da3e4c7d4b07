//! Resource usage payloads carried inside samples.
//!
//! The aggregator never interprets these; they are produced by the per-node
//! collectors and handed to snapshot consumers unchanged.

/// Machine-level resource usage.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct Hardware {
    /// Total processor utilisation, 0-100.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub cpu_percent: f32,

    /// Installed memory in gigabytes.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub total_memory_gb: u64,

    /// Memory currently in use, in megabytes.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub memory_in_use_mb: u64,

    /// Memory currently in use as a percentage of installed memory.
    #[cfg_attr(feature = "minicbor", n(3))]
    pub memory_percent: f64,

    /// Mounted drives.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    #[cfg_attr(feature = "minicbor", n(4))]
    pub drives: Vec<Drive>,
}

impl Hardware {
    /// Create a builder for hardware metrics.
    pub fn builder() -> HardwareBuilder {
        HardwareBuilder::new()
    }

    /// Free space summed over all drives, in gigabytes.
    pub fn available_disk_gb(&self) -> u64 {
        self.drives.iter().map(|d| d.available_gb).sum()
    }
}

/// A mounted drive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct Drive {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub name: String,

    #[cfg_attr(feature = "minicbor", n(1))]
    pub total_gb: u64,

    #[cfg_attr(feature = "minicbor", n(2))]
    pub available_gb: u64,
}

impl Drive {
    /// Create a drive record.
    pub fn new(name: impl Into<String>, total_gb: u64, available_gb: u64) -> Self {
        Self {
            name: name.into(),
            total_gb,
            available_gb,
        }
    }
}

/// Deployed service replica and instance counts.
///
/// Used both per hosting process and cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct Counts {
    /// Primary replicas of stateful services.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub primary_count: u32,

    /// Ready replicas (primary and secondary) of stateful services.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub replica_count: u32,

    /// Ready instances of stateless services.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub instance_count: u32,

    /// `replica_count + instance_count`.
    #[cfg_attr(feature = "minicbor", n(3))]
    pub count: u32,
}

impl Counts {
    /// Create counts, deriving the total from replicas and instances.
    pub fn new(primary_count: u32, replica_count: u32, instance_count: u32) -> Self {
        Self {
            primary_count,
            replica_count,
            instance_count,
            count: replica_count + instance_count,
        }
    }
}

/// Resource usage of one service-hosting process.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct ProcessData {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub pid: u32,

    #[cfg_attr(feature = "minicbor", n(1))]
    pub cpu_percent: f64,

    #[cfg_attr(feature = "minicbor", n(2))]
    pub ram_mb: f32,

    #[cfg_attr(feature = "minicbor", n(3))]
    pub ram_percent: f32,

    /// Services hosted by this process.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    #[cfg_attr(feature = "minicbor", n(4))]
    pub service_uris: Vec<String>,

    /// Replicas and instances hosted by this process.
    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(5))]
    pub counts: Counts,
}

impl ProcessData {
    /// Create an empty record for a process id.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }
}

/// Builder for `Hardware`.
#[derive(Debug, Default)]
pub struct HardwareBuilder {
    inner: Hardware,
}

impl HardwareBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set processor utilisation.
    pub fn cpu_percent(mut self, cpu: f32) -> Self {
        self.inner.cpu_percent = cpu;
        self
    }

    /// Set installed memory (GB) and memory in use (MB).
    ///
    /// The percentage is derived; a machine reporting zero installed memory
    /// gets 0%.
    pub fn memory(mut self, total_gb: u64, in_use_mb: u64) -> Self {
        self.inner.total_memory_gb = total_gb;
        self.inner.memory_in_use_mb = in_use_mb;
        self.inner.memory_percent = if total_gb > 0 {
            in_use_mb as f64 * 100.0 / (total_gb as f64 * 1024.0)
        } else {
            0.0
        };
        self
    }

    /// Add a drive.
    pub fn drive(mut self, name: impl Into<String>, total_gb: u64, available_gb: u64) -> Self {
        self.inner.drives.push(Drive::new(name, total_gb, available_gb));
        self
    }

    /// Build the hardware metrics.
    pub fn build(self) -> Hardware {
        self.inner
    }
}
