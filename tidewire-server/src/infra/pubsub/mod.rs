pub mod broker;
pub mod bus;
pub mod memory;
pub mod publisher;
pub mod retry;
pub mod router;

pub use broker::{
    BrokerError, BrokerMessage, BrokerPublisher, BrokerSubscriber,
    MessageStream, RedisPublisher, RedisSubscriber,
};
pub use bus::{EmitReport, ListenerError, OutcomeBus};
pub use memory::InMemoryBroker;
pub use publisher::{PublishError, PublishReceipt, TaskPublisher};
pub use retry::RetryPolicy;
pub use router::{DispatchOutcome, EventRouter, RouterStats};
