//! Simulation statistics collection and reporting.
//!
//! Tracks fabric traffic, device activity, and wall-clock execution time
//! for a run.

use std::time::Instant;

/// Simulation statistics structure tracking all activity counters.
pub struct SimStats {
    start_time: Instant,
    pub ticks: u64,

    pub packets_routed: u64,
    pub read_bursts: u64,
    pub write_bursts: u64,
    pub responses: u64,
    pub queued: u64,
    pub retries: u64,

    pub read_beats: u64,
    pub write_beats: u64,

    pub dma_transfers: u64,
    pub dma_words_copied: u64,
    pub matmuls: u64,
    pub host_ops: u64,
}

impl Default for SimStats {
    /// Returns the default value.
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            ticks: 0,
            packets_routed: 0,
            read_bursts: 0,
            write_bursts: 0,
            responses: 0,
            queued: 0,
            retries: 0,
            read_beats: 0,
            write_beats: 0,
            dma_transfers: 0,
            dma_words_copied: 0,
            matmuls: 0,
            host_ops: 0,
        }
    }
}

impl SimStats {
    /// Prints a formatted summary of all simulation statistics.
    pub fn print(&self) {
        let duration = self.start_time.elapsed();
        let seconds = duration.as_secs_f64();
        let ticks = if self.ticks == 0 { 1 } else { self.ticks };

        println!("\n==========================================================");
        println!("INTERCONNECT SIMULATION STATISTICS");
        println!("==========================================================");
        println!("host_seconds             {:.4} s", seconds);
        println!("sim_ticks                {}", self.ticks);
        println!(
            "sim_freq                 {:.2} kticks/s",
            (self.ticks as f64 / seconds) / 1000.0
        );
        println!("----------------------------------------------------------");
        println!("FABRIC");
        println!("  packets.routed         {}", self.packets_routed);
        println!("  packets.read_bursts    {}", self.read_bursts);
        println!("  packets.write_bursts   {}", self.write_bursts);
        println!("  packets.responses      {}", self.responses);
        println!(
            "  backpressure.queued    {} ({:.2}%)",
            self.queued,
            (self.queued as f64 / (self.packets_routed.max(1)) as f64) * 100.0
        );
        println!("  backpressure.retries   {}", self.retries);
        println!("----------------------------------------------------------");
        println!("DEVICES");
        println!("  beats.read             {}", self.read_beats);
        println!(
            "  beats.per_tick         {:.4}",
            (self.read_beats + self.write_beats) as f64 / ticks as f64
        );
        println!("  beats.write            {}", self.write_beats);
        println!("  dma.transfers          {}", self.dma_transfers);
        println!("  dma.words_copied       {}", self.dma_words_copied);
        println!("  accel.matmuls          {}", self.matmuls);
        println!("  host.ops               {}", self.host_ops);
        println!("==========================================================");
    }
}
