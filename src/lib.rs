//! Embedded QuickJS scripting host for a frame-ticked game server.
//!
//! The server owns the thread and ticks [`Runtime::on_frame`] once per
//! frame; everything that touches engine state happens on that thread,
//! either inside the tick or inside a native call rooted in script
//! execution. Native asynchronous work runs on the reactor's own threads
//! and settles script-visible promises only when the next frame polls it.

pub mod event;
pub mod exceptions;
pub mod modulator;
pub mod pawn;
pub mod runtime;

mod bindings;
mod builtins;
mod console;
mod engine;
mod global_scope;
mod promise;
mod reactor;
mod timer_queue;

pub use event::Event;
pub use exceptions::ExceptionRecord;
pub use pawn::{Arguments, BridgeError, HostController, PawnKind, PawnValue};
pub use runtime::{FrameObserver, Runtime, RuntimeDelegate, RuntimeOptions, RuntimeStatistics};
