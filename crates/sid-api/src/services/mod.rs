//! Background services shared by handlers.

pub mod announcer;
pub mod broadcast;
pub mod persistence;
pub mod relay;
pub mod whitelist;

pub use announcer::Announcer;
pub use broadcast::{BroadcastHub, BroadcastReport, ChannelSink, SinkError, SubscriberId, SubscriberSink};
pub use persistence::{PersistenceDecoupler, SubmitOutcome};
pub use relay::{announce, run_relay_forwarder};
pub use whitelist::{enroll_identity, load_whitelist, EnrollOutcome, WhitelistLoadReport};
