// src/core/policies/mod.rs

//! Pluggable behaviors composed by the executor: load balancing, retries,
//! reconnection, speculative execution, timestamps and address translation.

pub mod address;
pub mod load_balancing;
pub mod reconnection;
pub mod retry;
pub mod speculative;
pub mod timestamp;

pub use address::{AddressTranslator, IdentityTranslator, StaticTranslator};
pub use load_balancing::{
    AllowListPolicy, DcAwareRoundRobinPolicy, LoadBalancingPolicy, QueryContext, QueryPlan,
    RoundRobinPolicy, TokenAwarePolicy,
};
pub use reconnection::{
    ConstantReconnectionPolicy, ExponentialReconnectionPolicy, ReconnectionPolicy,
    ReconnectionSchedule,
};
pub use retry::{DefaultRetryPolicy, FallthroughRetryPolicy, RetryContext, RetryDecision, RetryPolicy};
pub use speculative::{
    ConstantSpeculativeExecutionPolicy, NoSpeculativeExecutionPolicy, SpeculativeExecutionPlan,
    SpeculativeExecutionPolicy,
};
pub use timestamp::{MonotonicTimestampGenerator, TimestampGenerator};
