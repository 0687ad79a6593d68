pub mod cleanup;
pub mod immediate;
pub mod pacer;
pub mod render_core;
pub mod slot;
pub mod upload;

pub use cleanup::{CleanupRegistry, Disposal};
pub use immediate::ImmediateSubmitter;
pub use pacer::{FrameOutcome, FramePacer, FrameRecorder, FrameRecording, FrameState, PacerStats};
pub use render_core::{RenderCore, RenderStats};
pub use slot::{FrameSlot, FRAMES_IN_FLIGHT};
pub use upload::{create_image, upload_buffer, upload_image, upload_mesh, AllocatedImage, MeshBuffers};
