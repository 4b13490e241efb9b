//! Simulator Configuration.
//!
//! TOML-backed configuration for the memory map, device latencies, fabric
//! parameters, and trace output. Every field has a default, so an empty
//! file (or [`Config::default`]) yields a runnable system.

use serde::Deserialize;

const DEFAULT_MEMORY_SIZE: usize = 0x1_0000;
const DEFAULT_DMA_BASE: u32 = 0xF000;
const DEFAULT_ACCEL_BASE: u32 = 0xF100;
const DEFAULT_ACCEL_SRAM_BASE: u32 = 0x2_0000;
const DEFAULT_ACCEL_SRAM_SIZE: usize = 32000;

const MEMORY_LATENCY: u64 = 2;
const MMIO_LATENCY: u64 = 1;
const FABRIC_LATENCY: u64 = 1;
const PORT_DEPTH: usize = 4;
const POLL_INTERVAL: u64 = 4;

/// Top-level simulator configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub trace: TraceConfig,
}

/// Memory map and timing parameters.
#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    /// Main-memory extent in bytes (hex string).
    #[serde(default = "default_memory_size")]
    pub memory_size: String,

    /// Ticks before the first beat of a memory access completes.
    #[serde(default = "default_memory_latency")]
    pub memory_latency: u64,

    /// MMIO turnaround latency in ticks.
    #[serde(default = "default_mmio_latency")]
    pub mmio_latency: u64,

    /// Delivery latency of one fabric hop in ticks.
    #[serde(default = "default_fabric_latency")]
    pub fabric_latency: u64,

    /// Capacity of each device's inbound port.
    #[serde(default = "default_port_depth")]
    pub port_depth: usize,

    /// Ticks between unsuccessful host poll reissues.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// DMA control-window base address (hex string).
    #[serde(default = "default_dma_base")]
    pub dma_base: String,

    /// Accelerator control-window base address (hex string).
    #[serde(default = "default_accel_base")]
    pub accel_base: String,

    /// Accelerator SRAM window base address (hex string).
    #[serde(default = "default_accel_sram_base")]
    pub accel_sram_base: String,

    /// Accelerator SRAM window length in bytes (hex string).
    #[serde(default = "default_accel_sram_size")]
    pub accel_sram_size: String,
}

impl SystemConfig {
    pub fn memory_size_val(&self) -> usize {
        parse_hex(&self.memory_size, DEFAULT_MEMORY_SIZE as u64) as usize
    }

    pub fn dma_base_val(&self) -> u32 {
        parse_hex(&self.dma_base, DEFAULT_DMA_BASE as u64) as u32
    }

    pub fn accel_base_val(&self) -> u32 {
        parse_hex(&self.accel_base, DEFAULT_ACCEL_BASE as u64) as u32
    }

    pub fn accel_sram_base_val(&self) -> u32 {
        parse_hex(&self.accel_sram_base, DEFAULT_ACCEL_SRAM_BASE as u64) as u32
    }

    pub fn accel_sram_size_val(&self) -> usize {
        parse_hex(&self.accel_sram_size, DEFAULT_ACCEL_SRAM_SIZE as u64) as usize
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            memory_size: default_memory_size(),
            memory_latency: default_memory_latency(),
            mmio_latency: default_mmio_latency(),
            fabric_latency: default_fabric_latency(),
            port_depth: default_port_depth(),
            poll_interval: default_poll_interval(),
            dma_base: default_dma_base(),
            accel_base: default_accel_base(),
            accel_sram_base: default_accel_sram_base(),
            accel_sram_size: default_accel_sram_size(),
        }
    }
}

/// Chrome trace output settings.
#[derive(Debug, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_trace_path")]
    pub path: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_trace_path(),
        }
    }
}

fn parse_hex(s: &str, default: u64) -> u64 {
    let s = s.trim_start_matches("0x");
    u64::from_str_radix(s, 16).unwrap_or(default)
}

fn default_memory_size() -> String {
    format!("{:#x}", DEFAULT_MEMORY_SIZE)
}

fn default_memory_latency() -> u64 {
    MEMORY_LATENCY
}

fn default_mmio_latency() -> u64 {
    MMIO_LATENCY
}

fn default_fabric_latency() -> u64 {
    FABRIC_LATENCY
}

fn default_port_depth() -> usize {
    PORT_DEPTH
}

fn default_poll_interval() -> u64 {
    POLL_INTERVAL
}

fn default_dma_base() -> String {
    format!("{:#x}", DEFAULT_DMA_BASE)
}

fn default_accel_base() -> String {
    format!("{:#x}", DEFAULT_ACCEL_BASE)
}

fn default_accel_sram_base() -> String {
    format!("{:#x}", DEFAULT_ACCEL_SRAM_BASE)
}

fn default_accel_sram_size() -> String {
    format!("{:#x}", DEFAULT_ACCEL_SRAM_SIZE)
}

fn default_trace_path() -> String {
    "trace.json".to_string()
}
