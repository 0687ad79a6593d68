/*!
# Ember Engine

Resource-lifecycle and frame-pacing core of the Ember renderer.

The crate is platform-agnostic: everything GPU related goes through the
`GpuDevice` and `Swapchain` traits. The Vulkan implementation lives in
`ember_engine_renderer_vulkan`; a simulated `HeadlessDevice` is provided for
tests and tooling.

## Architecture

- **DescriptorAllocator**: growable descriptor pool allocator with a
  retry-once policy and wholesale `clear`
- **CleanupRegistry**: LIFO list of deferred `Disposal` commands
- **FramePacer**: double-buffered frame loop (fences, semaphores, resize recovery)
- **ImmediateSubmitter**: blocking one-shot submissions for uploads
- **RenderCore**: single owner of all of the above, with ordered shutdown
*/

// Internal modules
mod config;
mod engine;
mod error;
pub mod descriptor;
pub mod frame;
pub mod gpu;
pub mod log;

// Main ember namespace module
pub mod ember {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton (logger)
    pub use crate::engine::Engine;

    // Startup configuration
    pub use crate::config::{Config, DebugSeverity, DEFAULT_GROWTH_FACTOR, DEFAULT_MAX_SETS_PER_POOL};

    // Top-level owner
    pub use crate::frame::{RenderCore, RenderStats};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Device and surface abstraction
    pub mod gpu {
        pub use crate::gpu::*;
    }

    // Descriptor pools, layouts and writes
    pub mod descriptor {
        pub use crate::descriptor::*;
    }

    // Frame loop, cleanup and uploads
    pub mod frame {
        pub use crate::frame::*;
    }
}

// Re-export math library at crate root
pub use glam;
