use crate::{buffer::BufferSizeConfiguration, logger::ansi};

const DEFAULT_MAX_MEMORY_BYTES: usize = 512 * 1024 * 1024;
const DEFAULT_MAX_ENTRY_COUNT_IN_SINGLE_BATCH: usize = 1024;

/// Compute budget for a run on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunningConfiguration {
    /// Number of worker threads used by data-parallel kernels.
    pub threads: usize,
    /// Memory the planner is allowed to fill with buffers.
    pub max_memory_bytes: usize,
    /// Hard cap on the number of data entries loaded per macro-batch.
    pub max_entry_count_in_single_batch: usize,
    /// Print progress while updating.
    pub log_progress: bool,
}

impl Default for RunningConfiguration {
    fn default() -> Self {
        Self {
            threads: 1,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_entry_count_in_single_batch: DEFAULT_MAX_ENTRY_COUNT_IN_SINGLE_BATCH,
            log_progress: false,
        }
    }
}

impl RunningConfiguration {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_max_entry_count_in_single_batch(mut self, count: usize) -> Self {
        self.max_entry_count_in_single_batch = count.max(1);
        self
    }

    pub fn with_log_progress(mut self, log_progress: bool) -> Self {
        self.log_progress = log_progress;
        self
    }

    /// Largest number of entries whose buffers fit into `ratio` of the memory
    /// budget, never less than one.
    pub fn max_entry_count(&self, buffers: &BufferSizeConfiguration, ratio: f32) -> usize {
        let budget = (self.max_memory_bytes as f64 * f64::from(ratio)) as usize;

        if buffers.per_entry_bytes() == 0 {
            return usize::MAX;
        }

        let available = budget.saturating_sub(buffers.constant_bytes());
        (available / buffers.per_entry_bytes()).max(1)
    }

    pub fn display(&self) {
        println!("Threads                : {}", ansi(self.threads, 31));
        println!("Memory Budget          : {}", ansi(format!("{} MiB", self.max_memory_bytes >> 20), 31));
        println!("Max Entries / Batch    : {}", ansi(self.max_entry_count_in_single_batch, 31));
    }

    /// Fork-join over `items`, each handed to `f` together with its index.
    /// Items are split into one contiguous run per thread.
    pub fn split_workload_mut<T: Send, F: Fn(usize, &mut T) + Sync>(&self, items: &mut [T], f: F) {
        let size = items.len();
        let threads = self.threads.clamp(1, size.max(1));

        if threads == 1 {
            for (idx, item) in items.iter_mut().enumerate() {
                f(idx, item);
            }

            return;
        }

        let chunk_size = size.div_ceil(threads);

        std::thread::scope(|s| {
            for (thread, chunk) in items.chunks_mut(chunk_size).enumerate() {
                let f = &f;
                s.spawn(move || {
                    for (i, item) in chunk.iter_mut().enumerate() {
                        f(thread * chunk_size + i, item);
                    }
                });
            }
        });
    }

    /// Same as [`Self::split_workload_mut`] but each thread also gets exclusive
    /// access to one of `locals`, which must hold at least `threads` elements.
    pub fn split_workload_with_locals<T, L, F>(&self, items: &mut [T], locals: &mut [L], f: F)
    where
        T: Send,
        L: Send,
        F: Fn(usize, &mut T, &mut L) + Sync,
    {
        let size = items.len();
        let threads = self.threads.clamp(1, size.max(1)).min(locals.len().max(1));

        if threads == 1 {
            if let Some(local) = locals.first_mut() {
                for (idx, item) in items.iter_mut().enumerate() {
                    f(idx, item, local);
                }
            }

            return;
        }

        let chunk_size = size.div_ceil(threads);

        std::thread::scope(|s| {
            for ((thread, chunk), local) in items.chunks_mut(chunk_size).enumerate().zip(locals.iter_mut()) {
                let f = &f;
                s.spawn(move || {
                    for (i, item) in chunk.iter_mut().enumerate() {
                        f(thread * chunk_size + i, item, local);
                    }
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_entry_count_respects_budget() {
        let config = RunningConfiguration::default().with_max_memory_bytes(1000);

        let mut buffers = BufferSizeConfiguration::default();
        buffers.add_constant_buffer(200);
        buffers.add_per_entry_buffer(30);

        let count = config.max_entry_count(&buffers, 1.0);
        assert_eq!(count, 26);
        assert!(buffers.total_bytes(count) <= 1000);
        assert!(buffers.total_bytes(count + 1) > 1000);

        assert_eq!(config.max_entry_count(&buffers, 0.5), 10);
    }

    #[test]
    fn max_entry_count_is_at_least_one() {
        let config = RunningConfiguration::default().with_max_memory_bytes(100);

        let mut buffers = BufferSizeConfiguration::default();
        buffers.add_per_entry_buffer(1000);
        assert_eq!(config.max_entry_count(&buffers, 1.0), 1);

        buffers.add_constant_buffer(5000);
        assert_eq!(config.max_entry_count(&buffers, 1.0), 1);
    }

    #[test]
    fn split_workload_visits_everything_once() {
        for threads in [1, 2, 3, 8] {
            let config = RunningConfiguration::default().with_threads(threads);
            let mut items = vec![0usize; 10];

            config.split_workload_mut(&mut items, |idx, item| *item += idx + 1);

            assert_eq!(items, (1..=10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn split_workload_hands_out_distinct_locals() {
        let config = RunningConfiguration::default().with_threads(4);
        let mut items = vec![1.0f32; 9];
        let mut locals = vec![0.0f32; 4];

        config.split_workload_with_locals(&mut items, &mut locals, |_, item, local| *local += *item);

        assert_eq!(locals.iter().sum::<f32>(), 9.0);
    }
}
