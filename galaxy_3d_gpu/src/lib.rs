/*!
# Galaxy 3D GPU

Backend-agnostic GPU command recording and resource management.

One API (`Device`, `CommandContext`, `Buffer`, `Texture`, `Pipeline`,
`Framebuffer`) compiles down to a native backend selected once at device
creation. Backends are a closed set of variants over two traits
(`GraphicsImpl` for the device, `CommandBufferImpl` for recording).

## Architecture

- **ptr**: strong/weak reference counting (`Ref`, `WeakRef`)
- **graphics**: device, resources, command contexts and their binding state
- **backend**: the backend contract and its implementations
  (`software` always, `vulkan` behind the `vulkan` feature)
- **validation**: process-wide hook for usage-contract violations
- **config**: device options, loadable from TOML

## Example

```no_run
use galaxy_3d_gpu::galaxy3d::{Backend, Device, DeviceDescriptor};
use galaxy_3d_gpu::glam::Vec4;

let device = Device::create(&DeviceDescriptor::new(Backend::Default))?;
device.begin_frame()?;
{
    let mut ctx = device.immediate_context()?;
    ctx.begin_default_render_pass(Vec4::new(0.0, 0.2, 0.4, 1.0), 1.0, 0)?;
    ctx.end_render_pass()?;
}
device.end_frame()?;
# Ok::<(), galaxy_3d_gpu::galaxy3d::Error>(())
```
*/

mod error;
pub mod backend;
pub mod config;
pub mod graphics;
pub mod log;
pub mod ptr;
pub mod validation;

// Main galaxy3d namespace module
pub mod galaxy3d {
    pub use crate::error::{Error, Galaxy3dError, Galaxy3dResult, Result};

    pub use crate::ptr::{Ref, WeakRef};

    pub use crate::config::{DebugSeverity, DeviceConfig, GpuSettings};

    pub use crate::validation::{
        clear_validation_callback, notify_validation_error, reset_validation_stats,
        set_validation_callback, validation_stats, ValidationStats,
    };

    pub use crate::graphics::*;

    // Logging sub-module (types only; the engine_* macros live at the crate root)
    pub mod log {
        pub use crate::log::{
            min_severity, reset_logger, set_logger, set_min_severity, DefaultLogger, LogEntry, LogSeverity, Logger,
        };
    }
}

// Re-export math library at crate root
pub use glam;
