//! Producer-side components (spec §4.4, §4.5): the opcode-dispatching IPC
//! pair and the local façade built on top of it.

pub mod ipc;
pub mod surface;

pub use ipc::{BufferClientProducer, BufferQueueProducer, LoopbackTransport, Opcode, Request, Response, Transport};
pub use surface::{ProducerSurface, WindowConfig};
