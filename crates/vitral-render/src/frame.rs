//! The per-frame draw state machine.
//!
//! Idle → Recording → Idle for a presented frame, with a Skipped branch
//! when image acquisition fails. Exactly one frame is ever in flight: the
//! update step blocks on its fence and a device-idle wait before the state
//! returns to Idle, so recording of frame N+1 can never overlap GPU
//! execution of frame N.

use vitral_gpu::FrameSemaphores;

/// Progress of the current frame through the draw cycle.
pub enum FrameState {
    /// No frame in flight.
    Idle,
    /// An image is acquired and commands are being recorded.
    Recording {
        image_index: u32,
        semaphores: FrameSemaphores,
    },
    /// Acquisition failed; the per-frame semaphores are retained so the
    /// update step can release them, but nothing is recorded or presented.
    Skipped { semaphores: FrameSemaphores },
}

impl FrameState {
    /// Transition out of acquisition: an acquired index starts recording,
    /// a failed acquisition skips the frame.
    pub fn after_acquire(acquired: Option<u32>, semaphores: FrameSemaphores) -> Self {
        match acquired {
            Some(image_index) => Self::Recording {
                image_index,
                semaphores,
            },
            None => Self::Skipped { semaphores },
        }
    }

    /// Whether no frame is in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether draw commands may be recorded right now.
    pub fn records_draws(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    /// Whether the update step will submit and present.
    pub fn will_present(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    fn null_semaphores() -> FrameSemaphores {
        FrameSemaphores {
            acquire: vk::Semaphore::null(),
            render_complete: vk::Semaphore::null(),
        }
    }

    #[test]
    fn successful_acquire_starts_recording() {
        let state = FrameState::after_acquire(Some(1), null_semaphores());
        assert!(state.records_draws());
        assert!(state.will_present());
        assert!(!state.is_idle());
    }

    #[test]
    fn failed_acquire_skips_the_frame() {
        let state = FrameState::after_acquire(None, null_semaphores());
        assert!(!state.records_draws());
        assert!(!state.will_present());
        // The semaphores survive for cleanup at the update step.
        assert!(matches!(state, FrameState::Skipped { .. }));
    }

    #[test]
    fn idle_neither_records_nor_presents() {
        let state = FrameState::Idle;
        assert!(state.is_idle());
        assert!(!state.records_draws());
        assert!(!state.will_present());
    }
}
