//! Pull-based consumption of GPU-processed video frames.
//!
//! A [`FrameReader`] wires the whole pipeline together: a dedicated render
//! thread owning the GPU context, a producer-facing input surface, a stage
//! chain ending in a bounded acquisition pool, and an optional listener
//! fired off-thread whenever a new image is ready.
//!
//! ```no_run
//! use framereader::{FrameReader, ReaderConfig};
//!
//! let reader = FrameReader::new(ReaderConfig::new(640, 480, 2))?;
//! let surface = reader.surface()?;
//! surface.write_frame(&vec![0u8; 640 * 480 * 4], None)?;
//! if let Some(image) = reader.acquire_latest()? {
//!     // use image.data, then hand it back
//!     reader.recycle(image);
//! }
//! reader.release();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
mod dispatch;
mod pool;
mod reader;

pub use config::{ConfigError, ReaderConfig};
pub use dispatch::{CallbackHandle, CallbackThread};
pub use pool::{AcquisitionPool, CapacityError, Image};
pub use reader::{
    AcquireHandle, EffectHandle, FrameReader, ImageListener, ProxyHandle, ReaderError, SinkHandle,
};
