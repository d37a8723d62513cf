/// Instrumentation for the coverage pipeline
/// Call counters are compiled in only with the `profiling` feature; the
/// counter struct itself always exists so snapshots can be taken anywhere.
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters of the coverage pipeline's hot paths.
pub struct FunctionCounters {
    // Occluder submission
    pub triangles_submitted: AtomicU64,
    pub triangles_rasterized: AtomicU64,
    pub triangles_clipped: AtomicU64,
    pub triangles_backface_rejected: AtomicU64,
    pub lane_groups_tested: AtomicU64,

    // Visibility queries
    pub volumes_tested: AtomicU64,
    pub volumes_occluded: AtomicU64,

    // Buffer maintenance
    pub pixels_reprojected: AtomicU64,
    pub buffer_clears: AtomicU64,
}

impl FunctionCounters {
    pub const fn new() -> Self {
        Self {
            triangles_submitted: AtomicU64::new(0),
            triangles_rasterized: AtomicU64::new(0),
            triangles_clipped: AtomicU64::new(0),
            triangles_backface_rejected: AtomicU64::new(0),
            lane_groups_tested: AtomicU64::new(0),
            volumes_tested: AtomicU64::new(0),
            volumes_occluded: AtomicU64::new(0),
            pixels_reprojected: AtomicU64::new(0),
            buffer_clears: AtomicU64::new(0),
        }
    }

    fn all(&self) -> [&AtomicU64; 9] {
        [
            &self.triangles_submitted,
            &self.triangles_rasterized,
            &self.triangles_clipped,
            &self.triangles_backface_rejected,
            &self.lane_groups_tested,
            &self.volumes_tested,
            &self.volumes_occluded,
            &self.pixels_reprojected,
            &self.buffer_clears,
        ]
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in self.all() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let [triangles_submitted, triangles_rasterized, triangles_clipped, triangles_backface_rejected, lane_groups_tested, volumes_tested, volumes_occluded, pixels_reprojected, buffer_clears] =
            self.all().map(|c| c.load(Ordering::Relaxed));

        CounterSnapshot {
            triangles_submitted,
            triangles_rasterized,
            triangles_clipped,
            triangles_backface_rejected,
            lane_groups_tested,
            volumes_tested,
            volumes_occluded,
            pixels_reprojected,
            buffer_clears,
        }
    }
}

impl Default for FunctionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub triangles_submitted: u64,
    pub triangles_rasterized: u64,
    pub triangles_clipped: u64,
    pub triangles_backface_rejected: u64,
    pub lane_groups_tested: u64,
    pub volumes_tested: u64,
    pub volumes_occluded: u64,
    pub pixels_reprojected: u64,
    pub buffer_clears: u64,
}

impl CounterSnapshot {
    /// Fraction of tested volumes reported occluded.
    pub fn occlusion_rate(&self) -> f64 {
        if self.volumes_tested == 0 {
            0.0
        } else {
            self.volumes_occluded as f64 / self.volumes_tested as f64
        }
    }

    pub fn log_report(&self) {
        log::info!("=== Coverage Counters ===");
        log::info!("  triangles submitted:     {:12}", self.triangles_submitted);
        log::info!("  triangles rasterized:    {:12}", self.triangles_rasterized);
        log::info!("  triangles clipped:       {:12}", self.triangles_clipped);
        log::info!("  backfaces rejected:      {:12}", self.triangles_backface_rejected);
        log::info!("  lane groups tested:      {:12}", self.lane_groups_tested);
        log::info!("  volumes tested:          {:12}", self.volumes_tested);
        log::info!(
            "  volumes occluded:        {:12} ({:5.1}%)",
            self.volumes_occluded,
            self.occlusion_rate() * 100.0
        );
        log::info!("  pixels reprojected:      {:12}", self.pixels_reprojected);
        log::info!("  buffer clears:           {:12}", self.buffer_clears);
    }
}

/// Global function counters instance
pub static FUNCTION_COUNTERS: FunctionCounters = FunctionCounters::new();

/// Increment a counter (only when the profiling feature is enabled)
#[macro_export]
macro_rules! count_call {
    ($counter:expr) => {
        #[cfg(feature = "profiling")]
        {
            $counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Add to a counter (only when the profiling feature is enabled)
#[macro_export]
macro_rules! count_add {
    ($counter:expr, $value:expr) => {
        #[cfg(feature = "profiling")]
        {
            $counter.fetch_add($value, std::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Hardware performance counters around a benchmark region
#[cfg(feature = "profiling")]
pub mod hardware {
    use perf_event::events::Hardware;
    use perf_event::{Builder, Counter};

    const EVENTS: [Hardware; 4] = [
        Hardware::CPU_CYCLES,
        Hardware::INSTRUCTIONS,
        Hardware::CACHE_MISSES,
        Hardware::BRANCH_MISSES,
    ];

    /// Cycles, instructions, cache misses and branch misses. Counters the
    /// kernel refuses (no permission, virtualized PMU) read as zero.
    pub struct PerfCounters {
        counters: Vec<Option<Counter>>,
    }

    impl PerfCounters {
        pub fn new() -> Self {
            let counters = EVENTS
                .iter()
                .map(|event| match Builder::new().kind(event.clone()).build() {
                    Ok(counter) => Some(counter),
                    Err(err) => {
                        log::warn!("hardware counter {:?} unavailable: {}", event, err);
                        None
                    }
                })
                .collect();
            Self { counters }
        }

        pub fn enable_all(&mut self) {
            for counter in self.counters.iter_mut().flatten() {
                let _ = counter.enable();
            }
        }

        pub fn disable_all(&mut self) {
            for counter in self.counters.iter_mut().flatten() {
                let _ = counter.disable();
            }
        }

        pub fn reset_all(&mut self) {
            for counter in self.counters.iter_mut().flatten() {
                let _ = counter.reset();
            }
        }

        pub fn read_all(&mut self) -> PerfSnapshot {
            let mut values = [0u64; 4];
            for (value, counter) in values.iter_mut().zip(&mut self.counters) {
                *value = counter.as_mut().and_then(|c| c.read().ok()).unwrap_or(0);
            }
            let [cpu_cycles, instructions, cache_misses, branch_misses] = values;
            PerfSnapshot {
                cpu_cycles,
                instructions,
                cache_misses,
                branch_misses,
            }
        }
    }

    impl Default for PerfCounters {
        fn default() -> Self {
            Self::new()
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub struct PerfSnapshot {
        pub cpu_cycles: u64,
        pub instructions: u64,
        pub cache_misses: u64,
        pub branch_misses: u64,
    }

    impl PerfSnapshot {
        pub fn log_report(&self) {
            log::info!("=== Hardware Performance Counters ===");
            log::info!("CPU cycles:     {:16}", self.cpu_cycles);
            log::info!("Instructions:   {:16}", self.instructions);
            if self.cpu_cycles > 0 {
                log::info!("IPC:            {:16.3}", self.instructions as f64 / self.cpu_cycles as f64);
            }
            log::info!("Cache misses:   {:16}", self.cache_misses);
            log::info!("Branch misses:  {:16}", self.branch_misses);
        }
    }
}
