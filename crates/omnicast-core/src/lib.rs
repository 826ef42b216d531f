// Engine core: the fan-out broadcaster, the fan-in listener multiplexer,
// and the facade wiring them to the evidence store.

pub mod broadcaster;
pub mod engine;
pub mod handlers;
pub mod multiplexer;
pub mod seen;

pub use broadcaster::{BroadcastError, Broadcaster, SendReport};
pub use engine::{Engine, EngineBuilder, EngineError};
pub use handlers::HandlerRegistry;
pub use multiplexer::ListenerMultiplexer;
pub use seen::SeenWindow;
