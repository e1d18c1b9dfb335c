pub mod consumer;
pub mod relay;
pub mod source;

pub use consumer::{
    ConsumerError, ConsumerState, ConsumerStats, ReconnectPolicy, ReconnectingConsumer,
    UpstreamHandler,
};
pub use relay::TaskRelay;
pub use source::{FrameStream, UpstreamError, UpstreamFrame, UpstreamSource, WebSocketSource};
