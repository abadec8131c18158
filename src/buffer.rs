use crate::error::{UpdaterError, UpdaterResult};

const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Accumulated memory declarations of every buffer a run will allocate,
/// split into buffers of fixed size and buffers that scale with the number
/// of entries processed at once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferSizeConfiguration {
    constant_bytes: usize,
    per_entry_bytes: usize,
}

impl BufferSizeConfiguration {
    pub fn add_constant_buffer(&mut self, bytes: usize) {
        self.constant_bytes += bytes;
    }

    pub fn add_per_entry_buffer(&mut self, bytes: usize) {
        self.per_entry_bytes += bytes;
    }

    pub fn add_request(&mut self, request: BufferRequest, scale: usize) {
        let bytes = request.elem_count * FLOAT_SIZE;
        if request.per_entry {
            self.add_per_entry_buffer(bytes * scale);
        } else {
            self.add_constant_buffer(bytes);
        }
    }

    pub fn constant_bytes(&self) -> usize {
        self.constant_bytes
    }

    pub fn per_entry_bytes(&self) -> usize {
        self.per_entry_bytes
    }

    pub fn total_bytes(&self, entry_count: usize) -> usize {
        self.constant_bytes + self.per_entry_bytes * entry_count
    }
}

/// Scratch memory a layer unit wants in addition to its neuron buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRequest {
    pub elem_count: usize,
    pub per_entry: bool,
}

impl BufferRequest {
    pub fn constant(elem_count: usize) -> Self {
        Self { elem_count, per_entry: false }
    }

    pub fn per_entry(elem_count: usize) -> Self {
        Self { elem_count, per_entry: true }
    }

    pub fn allocate(&self, entry_count: usize) -> Vec<f32> {
        let len = if self.per_entry { self.elem_count * entry_count } else { self.elem_count };
        vec![0.0; len]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

/// Owns the neuron and error buffers threaded between consecutive layers.
///
/// Buffers are handed out by id, so two layers sharing a buffer hold the same
/// id, and a call that would read and write the same buffer is caught here.
#[derive(Debug, Default)]
pub struct BufferArena {
    buffers: Vec<Vec<f32>>,
}

impl BufferArena {
    pub fn allocate(&mut self, len: usize) -> BufferId {
        self.buffers.push(vec![0.0; len]);
        BufferId(self.buffers.len() - 1)
    }

    pub fn get(&self, id: BufferId) -> &[f32] {
        &self.buffers[id.0]
    }

    pub fn get_mut(&mut self, id: BufferId) -> &mut [f32] {
        &mut self.buffers[id.0]
    }

    /// Runs `f` with `write` borrowed mutably and every id in `reads` borrowed
    /// immutably.
    pub fn with_write<R>(
        &mut self,
        write: BufferId,
        reads: &[BufferId],
        f: impl FnOnce(&mut [f32], &[&[f32]]) -> R,
    ) -> UpdaterResult<R> {
        if reads.contains(&write) {
            return Err(UpdaterError::BufferAliasing { buffer: write.0 });
        }

        let mut target = std::mem::take(&mut self.buffers[write.0]);
        let views = reads.iter().map(|id| self.buffers[id.0].as_slice()).collect::<Vec<_>>();
        let res = f(&mut target, &views);
        self.buffers[write.0] = target;

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_accumulates() {
        let mut config = BufferSizeConfiguration::default();
        config.add_constant_buffer(100);
        config.add_per_entry_buffer(10);
        config.add_request(BufferRequest::per_entry(4), 3);
        config.add_request(BufferRequest::constant(8), 3);

        assert_eq!(config.constant_bytes(), 100 + 32);
        assert_eq!(config.per_entry_bytes(), 10 + 48);
        assert_eq!(config.total_bytes(2), 132 + 116);
    }

    #[test]
    fn arena_rejects_aliasing() {
        let mut arena = BufferArena::default();
        let a = arena.allocate(2);
        let b = arena.allocate(2);

        arena.get_mut(a).copy_from_slice(&[1.0, 2.0]);
        arena
            .with_write(b, &[a], |out, reads| {
                for (o, i) in out.iter_mut().zip(reads[0]) {
                    *o = 2.0 * i;
                }
            })
            .unwrap();

        assert_eq!(arena.get(b), &[2.0, 4.0]);
        assert!(matches!(arena.with_write(a, &[b, a], |_, _| ()), Err(UpdaterError::BufferAliasing { buffer: 0 })));
        assert_eq!(arena.get(a), &[1.0, 2.0]);
    }
}
