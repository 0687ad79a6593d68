//! Headless device - an in-memory `GpuDevice` and `Swapchain`
//!
//! Simulates the parts of a GPU the frame core depends on:
//! - objects live in a slot arena and are checked on every call
//! - descriptor pools enforce `max_sets` and per-kind capacity
//! - submissions stay pending until their fence is waited on, then complete
//!   in queue order (buffer copies are executed at completion)
//! - images hold their texels; buffer-to-image copies also run at completion
//! - semaphore and fence misuse, destruction of buffers or images still
//!   referenced by pending work, and images destroyed before their views are
//!   recorded as violations instead of corrupting memory
//!
//! Every call is appended to an event log so tests can assert ordering.
//! Faults (pool exhaustion, submit failure, hung queue) can be injected.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, Key, KeyData, SlotMap};

use crate::error::{Error, Result};
use crate::gpu::device::GpuDevice;
use crate::gpu::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use crate::gpu::types::{
    Buffer, BufferCopy, BufferDesc, CommandBuffer, CommandPool, DescriptorBinding, DescriptorKind,
    DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorWrite, Extent2D, Fence, Filter,
    Image, ImageDesc, ImageFormat, ImageLayout, ImageView, MemoryLocation, PoolSizeRatio, Sampler,
    Semaphore, SubmitInfo,
};

new_key_type! {
    struct ObjectKey;
}

fn key_of(raw: u64) -> ObjectKey {
    ObjectKey::from(KeyData::from_ffi(raw))
}

fn raw_of(key: ObjectKey) -> u64 {
    key.data().as_ffi()
}

fn unknown(kind: &str, raw: u64) -> Error {
    Error::InvalidResource(format!("unknown {} handle {:#x}", kind, raw))
}

/// Command recorded into a headless command buffer
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    CopyBuffer { src: Buffer, dst: Buffer, region: BufferCopy },
    CopyBufferToImage { src: Buffer, dst: Image, extent: Extent2D },
    TransitionImage { image: Image, old_layout: ImageLayout, new_layout: ImageLayout },
    ClearColor { image: Image, color: [f32; 4] },
}

/// Entry of the headless device's event log
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    DescriptorPoolCreated { pool: DescriptorPool, max_sets: u32 },
    DescriptorPoolReset { pool: DescriptorPool },
    DescriptorPoolDestroyed { pool: DescriptorPool },
    DescriptorSetAllocated { pool: DescriptorPool, set: DescriptorSet },
    DescriptorSetRefused { pool: DescriptorPool },
    DescriptorSetUpdated { set: DescriptorSet, writes: usize },
    CommandBufferReset { command_buffer: CommandBuffer },
    CommandBufferBegun { command_buffer: CommandBuffer, one_time_submit: bool },
    CommandBufferEnded { command_buffer: CommandBuffer },
    CommandRecorded { command_buffer: CommandBuffer, command: RecordedCommand },
    FenceWaited { fence: Fence },
    FenceReset { fence: Fence },
    Submitted {
        command_buffers: Vec<CommandBuffer>,
        wait_semaphores: Vec<Semaphore>,
        signal_semaphores: Vec<Semaphore>,
        fence: Option<Fence>,
    },
    SubmissionCompleted { fence: Option<Fence> },
    WaitIdle,
    BufferCreated { buffer: Buffer, size: u64 },
    BufferWritten { buffer: Buffer, offset: u64, len: usize },
    BufferDestroyed { buffer: Buffer },
    ObjectCreated { kind: &'static str, raw: u64 },
    ObjectDestroyed { kind: &'static str, raw: u64 },
    ImageAcquired { image_index: u32, semaphore: Semaphore },
    ImagePresented { image_index: u32 },
    SwapchainRecreated { extent: Extent2D },
}

struct PoolState {
    max_sets: u32,
    capacity: FxHashMap<DescriptorKind, u32>,
    used: FxHashMap<DescriptorKind, u32>,
    sets: Vec<ObjectKey>,
}

struct CommandBufferState {
    recording: bool,
    commands: Vec<RecordedCommand>,
}

struct BufferState {
    desc: BufferDesc,
    data: Vec<u8>,
}

struct ImageState {
    desc: ImageDesc,
    data: Vec<u8>,
    views: usize,
}

enum Object {
    DescriptorPool(PoolState),
    DescriptorSet,
    DescriptorSetLayout(Vec<DescriptorBinding>),
    CommandPool(Vec<ObjectKey>),
    CommandBuffer(CommandBufferState),
    Fence(bool),
    Semaphore(bool),
    Buffer(BufferState),
    Image(ImageState),
    ImageView(ObjectKey),
    Sampler(Filter),
}

impl Object {
    fn kind(&self) -> &'static str {
        match self {
            Object::DescriptorPool(_) => "descriptor pool",
            Object::DescriptorSet => "descriptor set",
            Object::DescriptorSetLayout(_) => "descriptor set layout",
            Object::CommandPool(_) => "command pool",
            Object::CommandBuffer(_) => "command buffer",
            Object::Fence(_) => "fence",
            Object::Semaphore(_) => "semaphore",
            Object::Buffer(_) => "buffer",
            Object::Image(_) => "image",
            Object::ImageView(_) => "image view",
            Object::Sampler(_) => "sampler",
        }
    }
}

struct PendingSubmission {
    fence: Option<Fence>,
    commands: Vec<RecordedCommand>,
}

impl PendingSubmission {
    fn references(&self, buffer: Buffer) -> bool {
        self.commands.iter().any(|command| match command {
            RecordedCommand::CopyBuffer { src, dst, .. } => *src == buffer || *dst == buffer,
            RecordedCommand::CopyBufferToImage { src, .. } => *src == buffer,
            _ => false,
        })
    }

    fn references_image(&self, image: Image) -> bool {
        self.commands.iter().any(|command| match command {
            RecordedCommand::CopyBufferToImage { dst, .. } => *dst == image,
            RecordedCommand::TransitionImage { image: target, .. } | RecordedCommand::ClearColor { image: target, .. } => {
                *target == image
            }
            _ => false,
        })
    }
}

#[derive(Default)]
struct Faults {
    descriptor_failures: VecDeque<Error>,
    submit_failures: VecDeque<Error>,
    creation_failure: Option<(usize, Error)>,
    hung: bool,
}

struct HeadlessState {
    objects: SlotMap<ObjectKey, Object>,
    events: Vec<DeviceEvent>,
    pending: Vec<PendingSubmission>,
    faults: Faults,
    use_after_free: Vec<String>,
    sync_violations: Vec<String>,
}

impl HeadlessState {
    fn insert(&mut self, object: Object) -> u64 {
        raw_of(self.objects.insert(object))
    }

    fn pool_mut(&mut self, pool: DescriptorPool) -> Result<&mut PoolState> {
        match self.objects.get_mut(key_of(pool.as_raw())) {
            Some(Object::DescriptorPool(state)) => Ok(state),
            _ => Err(unknown("descriptor pool", pool.as_raw())),
        }
    }

    fn command_buffer_mut(&mut self, command_buffer: CommandBuffer) -> Result<&mut CommandBufferState> {
        match self.objects.get_mut(key_of(command_buffer.as_raw())) {
            Some(Object::CommandBuffer(state)) => Ok(state),
            _ => Err(unknown("command buffer", command_buffer.as_raw())),
        }
    }

    fn fence_mut(&mut self, fence: Fence) -> Result<&mut bool> {
        match self.objects.get_mut(key_of(fence.as_raw())) {
            Some(Object::Fence(signaled)) => Ok(signaled),
            _ => Err(unknown("fence", fence.as_raw())),
        }
    }

    fn semaphore_mut(&mut self, semaphore: Semaphore) -> Result<&mut bool> {
        match self.objects.get_mut(key_of(semaphore.as_raw())) {
            Some(Object::Semaphore(signaled)) => Ok(signaled),
            _ => Err(unknown("semaphore", semaphore.as_raw())),
        }
    }

    fn buffer_mut(&mut self, buffer: Buffer) -> Result<&mut BufferState> {
        match self.objects.get_mut(key_of(buffer.as_raw())) {
            Some(Object::Buffer(state)) => Ok(state),
            _ => Err(unknown("buffer", buffer.as_raw())),
        }
    }

    fn image_mut(&mut self, image: Image) -> Result<&mut ImageState> {
        match self.objects.get_mut(key_of(image.as_raw())) {
            Some(Object::Image(state)) => Ok(state),
            _ => Err(unknown("image", image.as_raw())),
        }
    }

    /// Remove an object if it exists and has the expected kind
    fn remove(&mut self, raw: u64, kind: &'static str) -> Option<Object> {
        let key = key_of(raw);
        let known = self.objects.get(key).is_some_and(|object| object.kind() == kind);
        if known {
            self.objects.remove(key)
        } else {
            crate::engine_warn!("ember::headless", "destroy of unknown {} handle {:#x}", kind, raw);
            None
        }
    }

    /// Count down to an injected object creation failure
    fn check_creation(&mut self) -> Result<()> {
        match self.faults.creation_failure.take() {
            Some((0, error)) => Err(error),
            Some((remaining, error)) => {
                self.faults.creation_failure = Some((remaining - 1, error));
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Record a command into a buffer that must be recording
    fn record(&mut self, command_buffer: CommandBuffer, command: RecordedCommand) {
        let recording = match self.command_buffer_mut(command_buffer) {
            Ok(state) if state.recording => {
                state.commands.push(command.clone());
                true
            }
            _ => false,
        };
        if recording {
            self.events.push(DeviceEvent::CommandRecorded { command_buffer, command });
        } else {
            self.sync_violations.push(format!(
                "command recorded into {:#x} outside begin/end",
                command_buffer.as_raw()
            ));
        }
    }

    /// Complete pending submissions `0..=index` in queue order
    fn complete_through(&mut self, index: usize) {
        let done: Vec<PendingSubmission> = self.pending.drain(..=index).collect();
        for submission in done {
            for command in &submission.commands {
                match *command {
                    RecordedCommand::CopyBuffer { src, dst, region } => self.execute_copy(src, dst, region),
                    RecordedCommand::CopyBufferToImage { src, dst, .. } => self.execute_image_copy(src, dst),
                    _ => {}
                }
            }
            if let Some(fence) = submission.fence {
                if let Ok(signaled) = self.fence_mut(fence) {
                    *signaled = true;
                }
            }
            self.events.push(DeviceEvent::SubmissionCompleted { fence: submission.fence });
        }
    }

    fn execute_copy(&mut self, src: Buffer, dst: Buffer, region: BufferCopy) {
        let (Ok(src_offset), Ok(dst_offset), Ok(size)) = (
            usize::try_from(region.src_offset),
            usize::try_from(region.dst_offset),
            usize::try_from(region.size),
        ) else {
            return;
        };
        let bytes = match self.buffer_mut(src) {
            Ok(state) => state.data.get(src_offset..src_offset + size).map(|s| s.to_vec()),
            Err(_) => None,
        };
        if let (Some(bytes), Ok(state)) = (bytes, self.buffer_mut(dst)) {
            if let Some(target) = state.data.get_mut(dst_offset..dst_offset + size) {
                target.copy_from_slice(&bytes);
            }
        }
    }

    fn execute_image_copy(&mut self, src: Buffer, dst: Image) {
        let size = match self.image_mut(dst) {
            Ok(state) => state.data.len(),
            Err(_) => return,
        };
        let bytes = match self.buffer_mut(src) {
            Ok(state) => state.data.get(..size).map(|s| s.to_vec()),
            Err(_) => None,
        };
        if let (Some(bytes), Ok(state)) = (bytes, self.image_mut(dst)) {
            state.data.copy_from_slice(&bytes);
        }
    }
}

/// In-memory GPU device
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeadlessState {
                objects: SlotMap::with_key(),
                events: Vec::new(),
                pending: Vec::new(),
                faults: Faults::default(),
                use_after_free: Vec::new(),
                sync_violations: Vec::new(),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, HeadlessState>> {
        self.state
            .lock()
            .map_err(|_| Error::BackendError("headless device state poisoned".to_string()))
    }

    fn read<T: Default>(&self, f: impl FnOnce(&HeadlessState) -> T) -> T {
        self.state.lock().map(|state| f(&state)).unwrap_or_default()
    }

    // ===== FAULT INJECTION =====

    /// Make the next descriptor set allocation fail with `error`, whatever the pool holds
    pub fn inject_descriptor_failure(&self, error: Error) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.descriptor_failures.push_back(error);
        }
    }

    /// Make the next queue submission fail with `error`
    pub fn inject_submit_failure(&self, error: Error) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.submit_failures.push_back(error);
        }
    }

    /// Let `successes` more objects be created, then fail the next creation with `error`
    ///
    /// Counts pools, layouts, command pools, fences, semaphores, buffers,
    /// images, image views and samplers.
    pub fn fail_creation_after(&self, successes: usize, error: Error) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.creation_failure = Some((successes, error));
        }
    }

    /// While hung, pending submissions never complete and fence waits time out
    pub fn set_hung(&self, hung: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.hung = hung;
        }
    }

    // ===== INSPECTION =====

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.read(|state| state.events.clone())
    }

    pub fn clear_events(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.events.clear();
        }
    }

    /// Objects created and not yet destroyed (descriptor sets and command
    /// buffers included)
    pub fn live_object_count(&self) -> usize {
        self.read(|state| state.objects.len())
    }

    pub fn live_descriptor_pools(&self) -> usize {
        self.read(|state| {
            state
                .objects
                .values()
                .filter(|object| matches!(object, Object::DescriptorPool(_)))
                .count()
        })
    }

    pub fn pool_max_sets(&self, pool: DescriptorPool) -> Option<u32> {
        self.read(|state| match state.objects.get(key_of(pool.as_raw())) {
            Some(Object::DescriptorPool(pool)) => Some(pool.max_sets),
            _ => None,
        })
    }

    /// Sets allocated from `pool` since its creation or last reset
    pub fn pool_allocated_sets(&self, pool: DescriptorPool) -> Option<u32> {
        self.read(|state| match state.objects.get(key_of(pool.as_raw())) {
            Some(Object::DescriptorPool(pool)) => Some(pool.sets.len() as u32),
            _ => None,
        })
    }

    pub fn buffer_contents(&self, buffer: Buffer) -> Option<Vec<u8>> {
        self.read(|state| match state.objects.get(key_of(buffer.as_raw())) {
            Some(Object::Buffer(buffer)) => Some(buffer.data.clone()),
            _ => None,
        })
    }

    pub fn image_contents(&self, image: Image) -> Option<Vec<u8>> {
        self.read(|state| match state.objects.get(key_of(image.as_raw())) {
            Some(Object::Image(image)) => Some(image.data.clone()),
            _ => None,
        })
    }

    pub fn live_images(&self) -> usize {
        self.read(|state| {
            state
                .objects
                .values()
                .filter(|object| matches!(object, Object::Image(_)))
                .count()
        })
    }

    pub fn is_fence_signaled(&self, fence: Fence) -> Option<bool> {
        self.read(|state| match state.objects.get(key_of(fence.as_raw())) {
            Some(Object::Fence(signaled)) => Some(*signaled),
            _ => None,
        })
    }

    pub fn pending_submissions(&self) -> usize {
        self.read(|state| state.pending.len())
    }

    /// Buffers or images destroyed while a pending submission still
    /// referenced them, and images destroyed before their views
    pub fn use_after_free_violations(&self) -> Vec<String> {
        self.read(|state| state.use_after_free.clone())
    }

    /// Semaphore, fence and recording misuse
    pub fn sync_violations(&self) -> Vec<String> {
        self.read(|state| state.sync_violations.clone())
    }

    // ===== SWAPCHAIN HOOKS =====

    fn signal_for_acquire(&self, semaphore: Semaphore, image_index: u32) -> Result<()> {
        let mut state = self.state()?;
        let was_signaled = std::mem::replace(state.semaphore_mut(semaphore)?, true);
        if was_signaled {
            state.sync_violations.push(format!(
                "acquire signaled semaphore {:#x} that was already signaled",
                semaphore.as_raw()
            ));
        }
        state.events.push(DeviceEvent::ImageAcquired { image_index, semaphore });
        Ok(())
    }

    fn wait_for_present(&self, semaphore: Semaphore, image_index: u32) -> Result<()> {
        let mut state = self.state()?;
        let was_signaled = std::mem::replace(state.semaphore_mut(semaphore)?, false);
        if !was_signaled {
            state.sync_violations.push(format!(
                "present of image {} waits on semaphore {:#x} nothing signals",
                image_index,
                semaphore.as_raw()
            ));
        }
        state.events.push(DeviceEvent::ImagePresented { image_index });
        Ok(())
    }

    fn push_event(&self, event: DeviceEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.events.push(event);
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_descriptor_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> Result<DescriptorPool> {
        if max_sets == 0 {
            return Err(Error::InvalidResource("descriptor pool with zero sets".to_string()));
        }
        let mut capacity = FxHashMap::default();
        for ratio in ratios {
            *capacity.entry(ratio.kind).or_insert(0) += ratio.descriptor_count(max_sets);
        }
        let mut state = self.state()?;
        state.check_creation()?;
        let pool = DescriptorPool::from_raw(state.insert(Object::DescriptorPool(PoolState {
            max_sets,
            capacity,
            used: FxHashMap::default(),
            sets: Vec::new(),
        })));
        state.events.push(DeviceEvent::DescriptorPoolCreated { pool, max_sets });
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPool) -> Result<()> {
        let mut state = self.state()?;
        let sets = {
            let pool_state = state.pool_mut(pool)?;
            pool_state.used.clear();
            std::mem::take(&mut pool_state.sets)
        };
        for set in sets {
            state.objects.remove(set);
        }
        state.events.push(DeviceEvent::DescriptorPoolReset { pool });
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPool) {
        let Ok(mut state) = self.state() else { return };
        if let Some(Object::DescriptorPool(pool_state)) = state.remove(pool.as_raw(), "descriptor pool") {
            for set in pool_state.sets {
                state.objects.remove(set);
            }
            state.events.push(DeviceEvent::DescriptorPoolDestroyed { pool });
        }
    }

    fn allocate_descriptor_set(&self, pool: DescriptorPool, layout: DescriptorSetLayout) -> Result<DescriptorSet> {
        let mut state = self.state()?;
        let bindings = match state.objects.get(key_of(layout.as_raw())) {
            Some(Object::DescriptorSetLayout(bindings)) => bindings.clone(),
            _ => return Err(unknown("descriptor set layout", layout.as_raw())),
        };
        // Validate the pool handle before consuming an injected fault
        state.pool_mut(pool)?;

        if let Some(error) = state.faults.descriptor_failures.pop_front() {
            state.events.push(DeviceEvent::DescriptorSetRefused { pool });
            return Err(error);
        }

        let mut needed: FxHashMap<DescriptorKind, u32> = FxHashMap::default();
        for binding in &bindings {
            *needed.entry(binding.kind).or_insert(0) += binding.count;
        }
        let fits = {
            let pool_state = state.pool_mut(pool)?;
            (pool_state.sets.len() as u32) < pool_state.max_sets
                && needed.iter().all(|(kind, count)| {
                    let used = pool_state.used.get(kind).copied().unwrap_or(0);
                    let capacity = pool_state.capacity.get(kind).copied().unwrap_or(0);
                    used + count <= capacity
                })
        };
        if !fits {
            state.events.push(DeviceEvent::DescriptorSetRefused { pool });
            return Err(Error::OutOfPoolMemory);
        }

        let set_key = state.objects.insert(Object::DescriptorSet);
        let pool_state = state.pool_mut(pool)?;
        for (kind, count) in needed {
            *pool_state.used.entry(kind).or_insert(0) += count;
        }
        pool_state.sets.push(set_key);
        let set = DescriptorSet::from_raw(raw_of(set_key));
        state.events.push(DeviceEvent::DescriptorSetAllocated { pool, set });
        Ok(set)
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> Result<DescriptorSetLayout> {
        let mut state = self.state()?;
        state.check_creation()?;
        let raw = state.insert(Object::DescriptorSetLayout(bindings.to_vec()));
        state.events.push(DeviceEvent::ObjectCreated { kind: "descriptor set layout", raw });
        Ok(DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        let Ok(mut state) = self.state() else { return };
        if state.remove(layout.as_raw(), "descriptor set layout").is_some() {
            state.events.push(DeviceEvent::ObjectDestroyed { kind: "descriptor set layout", raw: layout.as_raw() });
        }
    }

    fn update_descriptor_set(&self, set: DescriptorSet, writes: &[DescriptorWrite]) -> Result<()> {
        let mut state = self.state()?;
        if !matches!(state.objects.get(key_of(set.as_raw())), Some(Object::DescriptorSet)) {
            return Err(unknown("descriptor set", set.as_raw()));
        }
        state.events.push(DeviceEvent::DescriptorSetUpdated { set, writes: writes.len() });
        Ok(())
    }

    fn create_command_pool(&self) -> Result<CommandPool> {
        let mut state = self.state()?;
        state.check_creation()?;
        let raw = state.insert(Object::CommandPool(Vec::new()));
        state.events.push(DeviceEvent::ObjectCreated { kind: "command pool", raw });
        Ok(CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: CommandPool) {
        let Ok(mut state) = self.state() else { return };
        if let Some(Object::CommandPool(buffers)) = state.remove(pool.as_raw(), "command pool") {
            for buffer in buffers {
                state.objects.remove(buffer);
            }
            state.events.push(DeviceEvent::ObjectDestroyed { kind: "command pool", raw: pool.as_raw() });
        }
    }

    fn allocate_command_buffer(&self, pool: CommandPool) -> Result<CommandBuffer> {
        let mut state = self.state()?;
        let key = state.objects.insert(Object::CommandBuffer(CommandBufferState {
            recording: false,
            commands: Vec::new(),
        }));
        match state.objects.get_mut(key_of(pool.as_raw())) {
            Some(Object::CommandPool(buffers)) => buffers.push(key),
            _ => {
                state.objects.remove(key);
                return Err(unknown("command pool", pool.as_raw()));
            }
        }
        Ok(CommandBuffer::from_raw(raw_of(key)))
    }

    fn reset_command_buffer(&self, command_buffer: CommandBuffer) -> Result<()> {
        let mut state = self.state()?;
        let buffer = state.command_buffer_mut(command_buffer)?;
        buffer.recording = false;
        buffer.commands.clear();
        state.events.push(DeviceEvent::CommandBufferReset { command_buffer });
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: CommandBuffer, one_time_submit: bool) -> Result<()> {
        let mut state = self.state()?;
        let buffer = state.command_buffer_mut(command_buffer)?;
        if buffer.recording {
            return Err(Error::InvalidResource("command buffer is already recording".to_string()));
        }
        buffer.recording = true;
        buffer.commands.clear();
        state.events.push(DeviceEvent::CommandBufferBegun { command_buffer, one_time_submit });
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBuffer) -> Result<()> {
        let mut state = self.state()?;
        let buffer = state.command_buffer_mut(command_buffer)?;
        if !buffer.recording {
            return Err(Error::InvalidResource("command buffer is not recording".to_string()));
        }
        buffer.recording = false;
        state.events.push(DeviceEvent::CommandBufferEnded { command_buffer });
        Ok(())
    }

    fn cmd_copy_buffer(&self, command_buffer: CommandBuffer, src: Buffer, dst: Buffer, region: BufferCopy) {
        if let Ok(mut state) = self.state() {
            state.record(command_buffer, RecordedCommand::CopyBuffer { src, dst, region });
        }
    }

    fn cmd_transition_image(
        &self,
        command_buffer: CommandBuffer,
        image: Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        if let Ok(mut state) = self.state() {
            state.record(command_buffer, RecordedCommand::TransitionImage { image, old_layout, new_layout });
        }
    }

    fn cmd_copy_buffer_to_image(&self, command_buffer: CommandBuffer, src: Buffer, dst: Image, extent: Extent2D) {
        if let Ok(mut state) = self.state() {
            state.record(command_buffer, RecordedCommand::CopyBufferToImage { src, dst, extent });
        }
    }

    fn cmd_clear_color_image(&self, command_buffer: CommandBuffer, image: Image, _layout: ImageLayout, color: [f32; 4]) {
        if let Ok(mut state) = self.state() {
            state.record(command_buffer, RecordedCommand::ClearColor { image, color });
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<Fence> {
        let mut state = self.state()?;
        state.check_creation()?;
        let raw = state.insert(Object::Fence(signaled));
        state.events.push(DeviceEvent::ObjectCreated { kind: "fence", raw });
        Ok(Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: Fence) {
        let Ok(mut state) = self.state() else { return };
        if state.remove(fence.as_raw(), "fence").is_some() {
            state.events.push(DeviceEvent::ObjectDestroyed { kind: "fence", raw: fence.as_raw() });
        }
    }

    fn wait_fence(&self, fence: Fence, timeout: Duration) -> Result<()> {
        let mut state = self.state()?;
        state.events.push(DeviceEvent::FenceWaited { fence });
        if *state.fence_mut(fence)? {
            return Ok(());
        }
        let position = state.pending.iter().position(|p| p.fence == Some(fence));
        match position {
            Some(index) if !state.faults.hung => {
                state.complete_through(index);
                Ok(())
            }
            _ => Err(Error::DeviceTimeout(format!(
                "fence {:#x} not signaled within {:?}",
                fence.as_raw(),
                timeout
            ))),
        }
    }

    fn reset_fence(&self, fence: Fence) -> Result<()> {
        let mut state = self.state()?;
        *state.fence_mut(fence)? = false;
        state.events.push(DeviceEvent::FenceReset { fence });
        Ok(())
    }

    fn create_semaphore(&self) -> Result<Semaphore> {
        let mut state = self.state()?;
        state.check_creation()?;
        let raw = state.insert(Object::Semaphore(false));
        state.events.push(DeviceEvent::ObjectCreated { kind: "semaphore", raw });
        Ok(Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: Semaphore) {
        let Ok(mut state) = self.state() else { return };
        if state.remove(semaphore.as_raw(), "semaphore").is_some() {
            state.events.push(DeviceEvent::ObjectDestroyed { kind: "semaphore", raw: semaphore.as_raw() });
        }
    }

    fn submit(&self, info: &SubmitInfo<'_>) -> Result<()> {
        let mut state = self.state()?;
        if let Some(error) = state.faults.submit_failures.pop_front() {
            return Err(error);
        }

        let mut commands = Vec::new();
        for &command_buffer in info.command_buffers {
            let buffer = state.command_buffer_mut(command_buffer)?;
            if buffer.recording {
                return Err(Error::InvalidResource(format!(
                    "command buffer {:#x} submitted while recording",
                    command_buffer.as_raw()
                )));
            }
            commands.extend(buffer.commands.iter().cloned());
        }
        if let Some(fence) = info.fence {
            if *state.fence_mut(fence)? {
                return Err(Error::InvalidResource(format!(
                    "fence {:#x} submitted while signaled",
                    fence.as_raw()
                )));
            }
        }

        // Semaphores flip at submit time: the GPU-side wait/signal pairing is what is checked
        for &(semaphore, _) in info.wait_semaphores {
            if !std::mem::replace(state.semaphore_mut(semaphore)?, false) {
                state.sync_violations.push(format!(
                    "submit waits on semaphore {:#x} nothing signals",
                    semaphore.as_raw()
                ));
            }
        }
        for &semaphore in info.signal_semaphores {
            if std::mem::replace(state.semaphore_mut(semaphore)?, true) {
                state.sync_violations.push(format!(
                    "submit signals semaphore {:#x} that is already signaled",
                    semaphore.as_raw()
                ));
            }
        }

        state.pending.push(PendingSubmission { fence: info.fence, commands });
        state.events.push(DeviceEvent::Submitted {
            command_buffers: info.command_buffers.to_vec(),
            wait_semaphores: info.wait_semaphores.iter().map(|(s, _)| *s).collect(),
            signal_semaphores: info.signal_semaphores.to_vec(),
            fence: info.fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state()?;
        state.events.push(DeviceEvent::WaitIdle);
        if state.pending.is_empty() {
            return Ok(());
        }
        if state.faults.hung {
            return Err(Error::DeviceTimeout("queue never drained".to_string()));
        }
        let last = state.pending.len() - 1;
        state.complete_through(last);
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Buffer> {
        let size = usize::try_from(desc.size).map_err(|_| Error::OutOfMemory)?;
        if size == 0 {
            return Err(Error::InvalidResource("buffer of size 0".to_string()));
        }
        let mut state = self.state()?;
        state.check_creation()?;
        let buffer = Buffer::from_raw(state.insert(Object::Buffer(BufferState {
            desc: *desc,
            data: vec![0; size],
        })));
        state.events.push(DeviceEvent::BufferCreated { buffer, size: desc.size });
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state()?;
        let target = state.buffer_mut(buffer)?;
        if target.desc.location == MemoryLocation::GpuOnly {
            return Err(Error::BackendError("Buffer is not CPU-accessible".to_string()));
        }
        let start = usize::try_from(offset).map_err(|_| Error::OutOfMemory)?;
        let slot = target
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| Error::InvalidResource(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                target.desc.size
            )))?;
        slot.copy_from_slice(data);
        state.events.push(DeviceEvent::BufferWritten { buffer, offset, len: data.len() });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        let Ok(mut state) = self.state() else { return };
        if state.pending.iter().any(|p| p.references(buffer)) {
            state.use_after_free.push(format!(
                "buffer {:#x} destroyed while a pending submission references it",
                buffer.as_raw()
            ));
        }
        if state.remove(buffer.as_raw(), "buffer").is_some() {
            state.events.push(DeviceEvent::BufferDestroyed { buffer });
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Image> {
        if desc.extent.is_empty() {
            return Err(Error::InvalidResource(format!(
                "image of size {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }
        let size = usize::try_from(desc.byte_size()).map_err(|_| Error::OutOfMemory)?;
        let mut state = self.state()?;
        state.check_creation()?;
        let raw = state.insert(Object::Image(ImageState { desc: *desc, data: vec![0; size], views: 0 }));
        state.events.push(DeviceEvent::ObjectCreated { kind: "image", raw });
        Ok(Image::from_raw(raw))
    }

    fn destroy_image(&self, image: Image) {
        let Ok(mut state) = self.state() else { return };
        if state.pending.iter().any(|p| p.references_image(image)) {
            state.use_after_free.push(format!(
                "image {:#x} destroyed while a pending submission references it",
                image.as_raw()
            ));
        }
        if let Some(Object::Image(image_state)) = state.remove(image.as_raw(), "image") {
            if image_state.views > 0 {
                state.use_after_free.push(format!(
                    "image {:#x} destroyed with {} live views",
                    image.as_raw(),
                    image_state.views
                ));
            }
            state.events.push(DeviceEvent::ObjectDestroyed { kind: "image", raw: image.as_raw() });
        }
    }

    fn create_image_view(&self, image: Image, format: ImageFormat) -> Result<ImageView> {
        let mut state = self.state()?;
        let image_format = state.image_mut(image)?.desc.format;
        if image_format != format {
            return Err(Error::InvalidResource(format!(
                "view format {:?} does not match image format {:?}",
                format, image_format
            )));
        }
        state.check_creation()?;
        state.image_mut(image)?.views += 1;
        let raw = state.insert(Object::ImageView(key_of(image.as_raw())));
        state.events.push(DeviceEvent::ObjectCreated { kind: "image view", raw });
        Ok(ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: ImageView) {
        let Ok(mut state) = self.state() else { return };
        if let Some(Object::ImageView(image)) = state.remove(view.as_raw(), "image view") {
            if let Some(Object::Image(image_state)) = state.objects.get_mut(image) {
                image_state.views -= 1;
            }
            state.events.push(DeviceEvent::ObjectDestroyed { kind: "image view", raw: view.as_raw() });
        }
    }

    fn create_sampler(&self, filter: Filter) -> Result<Sampler> {
        let mut state = self.state()?;
        state.check_creation()?;
        let raw = state.insert(Object::Sampler(filter));
        state.events.push(DeviceEvent::ObjectCreated { kind: "sampler", raw });
        Ok(Sampler::from_raw(raw))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        let Ok(mut state) = self.state() else { return };
        if state.remove(sampler.as_raw(), "sampler").is_some() {
            state.events.push(DeviceEvent::ObjectDestroyed { kind: "sampler", raw: sampler.as_raw() });
        }
    }
}

/// Scripted in-memory swapchain bound to a `HeadlessDevice`
///
/// Images are handed out round-robin. Obsolete results are queued with
/// `queue_obsolete_acquire` / `queue_obsolete_present` and consumed in order.
/// An acquired image stays out until it is presented or the swapchain is
/// recreated; once every image is out, acquisition times out.
pub struct HeadlessSwapchain {
    device: Arc<HeadlessDevice>,
    extent: Extent2D,
    image_count: u32,
    next_image: u32,
    generation: u64,
    obsolete_acquires: usize,
    obsolete_presents: usize,
    recreations: usize,
    outstanding: Vec<u32>,
}

impl HeadlessSwapchain {
    pub fn new(device: Arc<HeadlessDevice>, extent: Extent2D, image_count: u32) -> Self {
        Self {
            device,
            extent,
            image_count: image_count.max(1),
            next_image: 0,
            generation: 1,
            obsolete_acquires: 0,
            obsolete_presents: 0,
            recreations: 0,
            outstanding: Vec::new(),
        }
    }

    /// The next acquire reports the surface obsolete
    pub fn queue_obsolete_acquire(&mut self) {
        self.obsolete_acquires += 1;
    }

    /// The next present reports the surface obsolete
    pub fn queue_obsolete_present(&mut self) {
        self.obsolete_presents += 1;
    }

    pub fn recreations(&self) -> usize {
        self.recreations
    }

    /// Images acquired and not yet presented
    pub fn outstanding_images(&self) -> usize {
        self.outstanding.len()
    }
}

impl Swapchain for HeadlessSwapchain {
    fn acquire_next_image(&mut self, signal: Semaphore, _timeout: Duration) -> Result<AcquireOutcome> {
        if self.obsolete_acquires > 0 {
            self.obsolete_acquires -= 1;
            return Ok(AcquireOutcome::Obsolete);
        }
        if self.outstanding.len() >= self.image_count as usize {
            return Err(Error::DeviceTimeout(format!(
                "all {} swapchain images are acquired",
                self.image_count
            )));
        }
        let mut index = self.next_image;
        while self.outstanding.contains(&index) {
            index = (index + 1) % self.image_count;
        }
        self.device.signal_for_acquire(signal, index)?;
        self.outstanding.push(index);
        self.next_image = (index + 1) % self.image_count;
        Ok(AcquireOutcome::Image(index))
    }

    fn present(&mut self, image_index: u32, wait: Semaphore) -> Result<PresentOutcome> {
        if image_index >= self.image_count {
            return Err(Error::InvalidResource(format!("present of image {} out of range", image_index)));
        }
        self.device.wait_for_present(wait, image_index)?;
        self.outstanding.retain(|&index| index != image_index);
        if self.obsolete_presents > 0 {
            self.obsolete_presents -= 1;
            return Ok(PresentOutcome::Obsolete);
        }
        Ok(PresentOutcome::Presented)
    }

    fn recreate(&mut self, extent: Extent2D) -> Result<()> {
        self.extent = extent;
        self.next_image = 0;
        self.outstanding.clear();
        self.generation += 1;
        self.recreations += 1;
        self.device.push_event(DeviceEvent::SwapchainRecreated { extent });
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.image_count as usize
    }

    fn extent(&self) -> Extent2D {
        self.extent
    }

    fn image(&self, index: u32) -> Option<Image> {
        (index < self.image_count).then(|| Image::from_raw((self.generation << 32) | (index as u64 + 1)))
    }

    fn image_view(&self, index: u32) -> Option<ImageView> {
        (index < self.image_count).then(|| ImageView::from_raw((self.generation << 32) | (index as u64 + 0x100)))
    }
}

#[cfg(test)]
#[path = "headless_tests.rs"]
mod tests;
