//! Synchronization primitives and queue submission.

use ash::vk;

use crate::command::Commands;
use crate::error::{Error, Result};
use crate::gpu::Gpu;

/// Fixed-size array of binary semaphores, typically sized to the number of
/// frames in flight or swapchain images.
pub struct Semaphores {
    gpu: Gpu,
    raws: Vec<vk::Semaphore>,
}

impl Semaphores {
    pub fn new(gpu: &Gpu, count: usize) -> Result<Semaphores> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let raws = (0..count)
            .map(|_| Ok(unsafe { gpu.shared.raw.create_semaphore(&create_info, None)? }))
            .collect::<Result<Vec<_>>>()?;
        Ok(Semaphores {
            gpu: gpu.clone(),
            raws,
        })
    }

    pub fn count(&self) -> usize {
        self.raws.len()
    }

    pub(crate) fn raw(&self, idx: usize) -> Result<vk::Semaphore> {
        self.raws.get(idx).copied().ok_or(Error::InvalidIndex {
            what: "semaphore",
            index: idx,
            count: self.raws.len(),
        })
    }
}

impl Drop for Semaphores {
    fn drop(&mut self) {
        unsafe {
            for raw in self.raws.drain(..) {
                self.gpu.shared.raw.destroy_semaphore(raw, None);
            }
        }
    }
}

/// Fixed-size array of fences.
pub struct Fences {
    gpu: Gpu,
    raws: Vec<vk::Fence>,
}

impl Fences {
    pub fn new(gpu: &Gpu, count: usize, signaled: bool) -> Result<Fences> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let raws = (0..count)
            .map(|_| Ok(unsafe { gpu.shared.raw.create_fence(&create_info, None)? }))
            .collect::<Result<Vec<_>>>()?;
        Ok(Fences {
            gpu: gpu.clone(),
            raws,
        })
    }

    pub fn count(&self) -> usize {
        self.raws.len()
    }

    pub fn wait(&self, idx: usize) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu
                .shared
                .raw
                .wait_for_fences(&[raw], true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset(&self, idx: usize) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu.shared.raw.reset_fences(&[raw])?;
        }
        Ok(())
    }

    pub fn is_signaled(&self, idx: usize) -> Result<bool> {
        let raw = self.raw(idx)?;
        Ok(unsafe { self.gpu.shared.raw.get_fence_status(raw)? })
    }

    pub(crate) fn raw(&self, idx: usize) -> Result<vk::Fence> {
        self.raws.get(idx).copied().ok_or(Error::InvalidIndex {
            what: "fence",
            index: idx,
            count: self.raws.len(),
        })
    }
}

impl Drop for Fences {
    fn drop(&mut self) {
        unsafe {
            for raw in self.raws.drain(..) {
                self.gpu.shared.raw.destroy_fence(raw, None);
            }
        }
    }
}

/// Ephemeral compose-and-send submission descriptor: ordered wait semaphores
/// with their stage masks, command buffers, signal semaphores and an optional
/// fence to signal.
#[derive(Default)]
pub struct Submit {
    wait: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    cmds: Vec<vk::CommandBuffer>,
    signal: Vec<vk::Semaphore>,
}

impl Submit {
    pub fn new() -> Submit {
        Submit::default()
    }

    pub fn wait(
        &mut self,
        semaphores: &Semaphores,
        idx: usize,
        stage: vk::PipelineStageFlags,
    ) -> Result<()> {
        self.wait.push((semaphores.raw(idx)?, stage));
        Ok(())
    }

    /// Appends buffer `buf_idx` of the given Commands set.
    pub fn commands(&mut self, commands: &Commands, buf_idx: usize) -> Result<()> {
        self.cmds.push(commands.raw(buf_idx)?);
        Ok(())
    }

    pub fn signal(&mut self, semaphores: &Semaphores, idx: usize) -> Result<()> {
        self.signal.push(semaphores.raw(idx)?);
        Ok(())
    }

    /// Performs one queue submission. The fence, when given, is reset
    /// immediately before the submit and signaled on completion.
    pub fn send(&self, gpu: &Gpu, queue_idx: usize, fence: Option<(&Fences, usize)>) -> Result<()> {
        let queue = gpu.raw_queue(queue_idx)?;

        let wait_semaphores: Vec<vk::Semaphore> = self.wait.iter().map(|(s, _)| *s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            self.wait.iter().map(|(_, st)| *st).collect();

        let mut info = vk::SubmitInfo::default().command_buffers(&self.cmds);
        if !self.wait.is_empty() {
            info = info
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages);
        }
        if !self.signal.is_empty() {
            info = info.signal_semaphores(&self.signal);
        }

        let raw_fence = match fence {
            Some((fences, idx)) => {
                fences.reset(idx)?;
                fences.raw(idx)?
            }
            None => vk::Fence::null(),
        };

        unsafe {
            gpu.shared
                .raw
                .queue_submit(queue, std::slice::from_ref(&info), raw_fence)?;
        }
        Ok(())
    }
}
