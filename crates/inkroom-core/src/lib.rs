//! Inkroom Core Library
//!
//! Wire protocol, software raster and the client half of room sync for the
//! Inkroom shared drawing surface.

pub mod brush;
pub mod config;
pub mod drawing;
pub mod input;
pub mod protocol;
pub mod raster;
pub mod receiver;
pub mod sync;
pub mod whiteboard;

pub use brush::{Brush, BrushColor, Tool};
pub use config::ClientConfig;
pub use drawing::{DrawState, DrawingStateMachine};
pub use input::{CanvasMapping, PointerEvent};
pub use peniko::Compose;
pub use protocol::{
    CanvasSnapshot, ClearCanvas, ClientMessage, ProtocolError, ServerMessage, StrokeDelta,
};
pub use raster::{Raster, RasterError};
pub use receiver::{SyncReceiver, Versions};
#[cfg(not(target_arch = "wasm32"))]
pub use sync::NativeWebSocket;
pub use sync::{Backoff, ConnectionError, ConnectionEvent, ConnectionState};
pub use whiteboard::{SyncEvent, Whiteboard};
