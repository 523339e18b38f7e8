//! # omm_session
//!
//! Multi-channel OMM consumer session: one logical consumer spread over several
//! upstream channels, with an aggregated source directory, item routing and
//! failover, warm standby groups, reconnection and preferred-host fallback.
//!
//! All routing state lives on a single dispatcher; [`OmmConsumer`] only validates
//! calls and queues them.

pub mod channel;
pub mod client;
pub mod clock;
pub mod commands;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod item;
pub mod outbox;
pub mod preferred_host;
pub mod recovery;
pub mod router;
pub mod shared;
pub mod timer;
pub mod warm_standby;

pub use channel::ChannelInfo;
pub use channel::ChannelSession;
pub use channel::ChannelState;
pub use client::ConsumerClient;
pub use client::ConsumerEvent;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::DispatchMode;
pub use config::PreferredHostConfig;
pub use config::ReconnectConfig;
pub use config::ServiceListConfig;
pub use config::SessionConfig;
pub use config::WarmStandbyChannelConfig;
pub use config::WarmStandbyMode;
pub use consumer::OmmConsumer;
pub use errors::Result;
pub use errors::SessionError;
pub use item::ItemRequestState;
pub use item::Lifecycle;
pub use item::ServiceSelector;
pub use preferred_host::PreferredHostController;
pub use recovery::ItemRecovery;
pub use recovery::RecoveryManager;
pub use router::ItemRouter;
pub use warm_standby::WarmStandbyGroup;
