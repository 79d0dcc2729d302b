//! Per-submission staging of uniform and streamed vertex data
//!
//! Recorded draws keep offsets into a [`CpuArena`]. When the recorded passes are encoded the
//! arena goes to its [`GpuBuffer`] in one write, then resets.

/// Growable byte arena with aligned pushes
#[derive(Debug, Default)]
pub(crate) struct CpuArena {
    bytes: Vec<u8>,
}

impl CpuArena {
    /// Append `data` at the next multiple of `alignment`, returning its offset
    pub(crate) fn push(&mut self, data: &[u8], alignment: usize) -> u64 {
        let offset = self.bytes.len().next_multiple_of(alignment);
        self.bytes.resize(offset, 0);
        self.bytes.extend_from_slice(data);
        offset as u64
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Contents padded to the copy alignment
    pub(crate) fn padded(&mut self) -> &[u8] {
        let len = self.bytes.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
        self.bytes.resize(len, 0);
        &self.bytes
    }

    pub(crate) fn reset(&mut self) {
        self.bytes.clear();
    }
}

/// Device buffer an arena is written to, grown to powers of two
pub(crate) struct GpuBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: wgpu::Buffer,
}

impl GpuBuffer {
    pub(crate) fn new(device: &wgpu::Device, label: &'static str, usage: wgpu::BufferUsages, size: u64) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        Self { label, usage, buffer: create(device, label, usage, size) }
    }

    pub(crate) const fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Upload `data` from offset 0; returns `true` when the buffer was recreated to fit
    pub(crate) fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, data: &[u8]) -> bool {
        let grown = data.len() as u64 > self.buffer.size();
        if grown {
            let size = (data.len() as u64).next_power_of_two();
            log::debug!("Growing {} to {} bytes", self.label, size);
            self.buffer = create(device, self.label, self.usage, size);
        }
        if !data.is_empty() {
            queue.write_buffer(&self.buffer, 0, data);
        }
        grown
    }
}

fn create(device: &wgpu::Device, label: &str, usage: wgpu::BufferUsages, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
        usage,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pushes_are_aligned() {
        let mut arena = CpuArena::default();
        assert_eq!(arena.push(&[1, 2, 3], 256), 0);
        assert_eq!(arena.push(&[4; 8], 256), 256);
        assert_eq!(arena.push(&[5; 4], 4), 264);
        assert_eq!(arena.padded().len(), 268);

        arena.reset();
        assert!(arena.is_empty());
        assert_eq!(arena.push(&[6], 16), 0);
        assert_eq!(arena.padded(), &[6, 0, 0, 0]);
    }
}
