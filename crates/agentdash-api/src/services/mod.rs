// Services layer for business logic
// Services own the pipeline steps; route handlers only translate HTTP/WebSocket

pub mod ingest;
pub mod stream;
pub mod sweeper;

pub use ingest::{IngestError, IngestReceipt, IngestService};
pub use stream::{
    FrameSink, ResumeCursor, ServerFrame, StreamClosed, StreamConfig, StreamPhase, StreamRequest,
    StreamSession,
};
pub use sweeper::{spawn_idle_sweeper, sweep_once};
