//! NodeData - one node's telemetry sample.

use crate::{current_timestamp_ms, Hardware, HardwareBuilder, ProcessData, Sample};

/// A single node's resource usage at one point in time.
///
/// Producers push one of these into the queue named after the node; the
/// aggregator consumes it exactly once, when it is merged into a snapshot.
///
/// # Example
///
/// ```rust
/// use clusterwatch_types::{NodeData, ProcessData};
///
/// let sample = NodeData::builder("node-3")
///     .timestamp_ms(1703160000000)
///     .hardware(|h| h.cpu_percent(37.5).memory(32, 12_000).drive("/", 512, 200))
///     .process(ProcessData::new(4242))
///     .build();
///
/// assert_eq!(sample.node_name, "node-3");
/// assert_eq!(sample.processes.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct NodeData {
    /// Unix timestamp in milliseconds when the sample was taken.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub timestamp_ms: u64,

    /// Name of the node; also the name of its source queue.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub node_name: String,

    /// Whole-machine usage.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub hardware: Hardware,

    /// Usage summed over the service-hosting processes only.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    #[cfg_attr(feature = "minicbor", n(3))]
    pub service_hardware: Option<Hardware>,

    /// Per-process breakdown.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    #[cfg_attr(feature = "minicbor", n(4))]
    pub processes: Vec<ProcessData>,
}

impl NodeData {
    /// Create an empty sample for a node at a given time.
    pub fn new(node_name: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            node_name: node_name.into(),
            hardware: Hardware::default(),
            service_hardware: None,
            processes: Vec::new(),
        }
    }

    /// Create a builder for a node sample.
    pub fn builder(node_name: impl Into<String>) -> NodeDataBuilder {
        NodeDataBuilder::new(node_name)
    }

    /// Total CPU used by the service-hosting processes.
    pub fn service_cpu_percent(&self) -> f64 {
        self.processes.iter().map(|p| p.cpu_percent).sum()
    }
}

impl Sample for NodeData {
    fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

/// Builder for `NodeData`.
#[derive(Debug)]
pub struct NodeDataBuilder {
    node_name: String,
    timestamp_ms: Option<u64>,
    hardware: Hardware,
    service_hardware: Option<Hardware>,
    processes: Vec<ProcessData>,
}

impl NodeDataBuilder {
    /// Create a new builder.
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            timestamp_ms: None,
            hardware: Hardware::default(),
            service_hardware: None,
            processes: Vec::new(),
        }
    }

    /// Set a specific timestamp (milliseconds since Unix epoch).
    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    /// Set machine-level usage built using a closure.
    pub fn hardware<F>(mut self, f: F) -> Self
    where
        F: FnOnce(HardwareBuilder) -> HardwareBuilder,
    {
        self.hardware = f(HardwareBuilder::new()).build();
        self
    }

    /// Set usage of the service-hosting processes built using a closure.
    pub fn service_hardware<F>(mut self, f: F) -> Self
    where
        F: FnOnce(HardwareBuilder) -> HardwareBuilder,
    {
        self.service_hardware = Some(f(HardwareBuilder::new()).build());
        self
    }

    /// Add a process record.
    pub fn process(mut self, process: ProcessData) -> Self {
        self.processes.push(process);
        self
    }

    /// Build the sample. Without an explicit timestamp, uses the current time.
    pub fn build(self) -> NodeData {
        NodeData {
            timestamp_ms: self.timestamp_ms.unwrap_or_else(current_timestamp_ms),
            node_name: self.node_name,
            hardware: self.hardware,
            service_hardware: self.service_hardware,
            processes: self.processes,
        }
    }
}
