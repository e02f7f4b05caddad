// src/core/policies/retry.rs

//! Retry policies: turning a failed attempt into a decision about what the
//! executor should do next.

use crate::core::errors::{DbError, WriteType, ZirconError};
use crate::core::protocol::consistency::Consistency;
use std::fmt;

/// What the executor does with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry on the same host, at the given consistency (usually unchanged).
    RetrySame(Consistency),
    /// Retry on the next host of the query plan.
    RetryNext(Consistency),
    /// Surface the error to the caller.
    Rethrow,
    /// Pretend the request succeeded with an empty result.
    Ignore,
}

/// Context handed to the policy for each failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    pub consistency: Consistency,
    /// Retries already performed for this request (excludes the first
    /// attempt and any UNPREPARED recovery).
    pub retry_count: u32,
    /// Whether the statement was marked idempotent by the caller.
    pub is_idempotent: bool,
    pub error: &'a ZirconError,
}

pub trait RetryPolicy: Send + Sync + fmt::Debug {
    fn on_read_timeout(
        &self,
        ctx: &RetryContext<'_>,
        received: i32,
        block_for: i32,
        data_present: bool,
    ) -> RetryDecision;

    fn on_write_timeout(
        &self,
        ctx: &RetryContext<'_>,
        received: i32,
        block_for: i32,
        write_type: WriteType,
    ) -> RetryDecision;

    fn on_unavailable(&self, ctx: &RetryContext<'_>, required: i32, alive: i32) -> RetryDecision;

    /// Anything else that is retry-eligible: overloaded, bootstrapping,
    /// truncate failures, client-side timeouts and transport errors.
    fn on_request_error(&self, ctx: &RetryContext<'_>) -> RetryDecision;
}

/// The default policy, mirroring the behavior servers are tuned for:
/// at most one retry, and only in the narrow cases where a retry is known
/// to have a chance.
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn on_read_timeout(
        &self,
        ctx: &RetryContext<'_>,
        received: i32,
        block_for: i32,
        data_present: bool,
    ) -> RetryDecision {
        // Enough replicas answered but the data was still in flight: a
        // same-host retry hits the repaired read path.
        if ctx.retry_count == 0 && received >= block_for && !data_present {
            RetryDecision::RetrySame(ctx.consistency)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_write_timeout(
        &self,
        ctx: &RetryContext<'_>,
        _received: i32,
        _block_for: i32,
        write_type: WriteType,
    ) -> RetryDecision {
        // Only batch-log writes are safe to replay unconditionally.
        if ctx.retry_count == 0 && write_type == WriteType::BatchLog {
            RetryDecision::RetrySame(ctx.consistency)
        } else if ctx.is_idempotent && ctx.retry_count == 0 {
            RetryDecision::RetryNext(ctx.consistency)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_unavailable(&self, ctx: &RetryContext<'_>, _required: i32, _alive: i32) -> RetryDecision {
        // The coordinator believed too few replicas were alive; another
        // coordinator may have a fresher view.
        if ctx.retry_count == 0 {
            RetryDecision::RetryNext(ctx.consistency)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_request_error(&self, ctx: &RetryContext<'_>) -> RetryDecision {
        match ctx.error {
            // The request may never have reached the wire, or the host is
            // shedding load: move on.
            ZirconError::Db {
                error: DbError::Overloaded | DbError::IsBootstrapping,
                ..
            } => RetryDecision::RetryNext(ctx.consistency),
            ZirconError::Db { .. } => RetryDecision::Rethrow,
            ZirconError::RequestTimeout(_) if !ctx.is_idempotent => RetryDecision::Rethrow,
            _ => RetryDecision::RetryNext(ctx.consistency),
        }
    }
}

/// Never retries anything; every error reaches the caller.
#[derive(Debug, Clone, Default)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn on_read_timeout(
        &self,
        _ctx: &RetryContext<'_>,
        _received: i32,
        _block_for: i32,
        _data_present: bool,
    ) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_write_timeout(
        &self,
        _ctx: &RetryContext<'_>,
        _received: i32,
        _block_for: i32,
        _write_type: WriteType,
    ) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_unavailable(
        &self,
        _ctx: &RetryContext<'_>,
        _required: i32,
        _alive: i32,
    ) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_request_error(&self, _ctx: &RetryContext<'_>) -> RetryDecision {
        RetryDecision::Rethrow
    }
}

/// Routes an error through the right policy callback.
pub fn decide(policy: &dyn RetryPolicy, ctx: &RetryContext<'_>) -> RetryDecision {
    match ctx.error {
        ZirconError::Db { error, .. } => match error {
            DbError::ReadTimeout {
                received,
                block_for,
                data_present,
                ..
            } => policy.on_read_timeout(ctx, *received, *block_for, *data_present),
            DbError::ReadFailure {
                received,
                block_for,
                data_present,
                ..
            } => policy.on_read_timeout(ctx, *received, *block_for, *data_present),
            DbError::WriteTimeout {
                received,
                block_for,
                write_type,
                ..
            } => policy.on_write_timeout(ctx, *received, *block_for, *write_type),
            DbError::WriteFailure {
                received,
                block_for,
                write_type,
                ..
            } => policy.on_write_timeout(ctx, *received, *block_for, *write_type),
            DbError::Unavailable {
                required, alive, ..
            } => policy.on_unavailable(ctx, *required, *alive),
            error if error.is_retry_eligible() => policy.on_request_error(ctx),
            _ => RetryDecision::Rethrow,
        },
        _ => policy.on_request_error(ctx),
    }
}
