use zircon::core::errors::{DbError, WriteType, ZirconError};
use zircon::core::policies::retry::{
    DefaultRetryPolicy, FallthroughRetryPolicy, RetryContext, RetryDecision, RetryPolicy, decide,
};
use zircon::core::protocol::consistency::Consistency;

fn ctx<'a>(error: &'a ZirconError, retry_count: u32, idempotent: bool) -> RetryContext<'a> {
    RetryContext {
        consistency: Consistency::Quorum,
        retry_count,
        is_idempotent: idempotent,
        error,
    }
}

fn db(error: DbError) -> ZirconError {
    ZirconError::Db {
        error,
        message: "test".into(),
    }
}

#[test]
fn test_read_timeout_retries_once_when_data_missing() {
    let policy = DefaultRetryPolicy;
    let error = db(DbError::ReadTimeout {
        consistency: Consistency::Quorum,
        received: 2,
        block_for: 2,
        data_present: false,
    });
    assert_eq!(
        decide(&policy, &ctx(&error, 0, false)),
        RetryDecision::RetrySame(Consistency::Quorum)
    );
    // Budget spent: rethrow.
    assert_eq!(decide(&policy, &ctx(&error, 1, false)), RetryDecision::Rethrow);
}

#[test]
fn test_read_timeout_with_data_present_rethrows() {
    let policy = DefaultRetryPolicy;
    let error = db(DbError::ReadTimeout {
        consistency: Consistency::Quorum,
        received: 2,
        block_for: 2,
        data_present: true,
    });
    assert_eq!(decide(&policy, &ctx(&error, 0, false)), RetryDecision::Rethrow);
}

#[test]
fn test_write_timeout_retries_batch_log_only() {
    let policy = DefaultRetryPolicy;
    let batch_log = db(DbError::WriteTimeout {
        consistency: Consistency::Quorum,
        received: 1,
        block_for: 2,
        write_type: WriteType::BatchLog,
    });
    assert_eq!(
        decide(&policy, &ctx(&batch_log, 0, false)),
        RetryDecision::RetrySame(Consistency::Quorum)
    );

    let simple = db(DbError::WriteTimeout {
        consistency: Consistency::Quorum,
        received: 1,
        block_for: 2,
        write_type: WriteType::Simple,
    });
    assert_eq!(decide(&policy, &ctx(&simple, 0, false)), RetryDecision::Rethrow);
    // Idempotent writes may move to another coordinator.
    assert_eq!(
        decide(&policy, &ctx(&simple, 0, true)),
        RetryDecision::RetryNext(Consistency::Quorum)
    );
}

#[test]
fn test_unavailable_tries_next_host_once() {
    let policy = DefaultRetryPolicy;
    let error = db(DbError::Unavailable {
        consistency: Consistency::Quorum,
        required: 2,
        alive: 1,
    });
    assert_eq!(
        decide(&policy, &ctx(&error, 0, false)),
        RetryDecision::RetryNext(Consistency::Quorum)
    );
    assert_eq!(decide(&policy, &ctx(&error, 1, false)), RetryDecision::Rethrow);
}

#[test]
fn test_overloaded_and_bootstrapping_move_on() {
    let policy = DefaultRetryPolicy;
    for error in [db(DbError::Overloaded), db(DbError::IsBootstrapping)] {
        assert_eq!(
            decide(&policy, &ctx(&error, 0, false)),
            RetryDecision::RetryNext(Consistency::Quorum)
        );
    }
}

#[test]
fn test_non_retry_eligible_errors_rethrow() {
    let policy = DefaultRetryPolicy;
    for error in [
        db(DbError::SyntaxError),
        db(DbError::Invalid),
        db(DbError::AlreadyExists {
            keyspace: "ks".into(),
            table: "t".into(),
        }),
        db(DbError::Unauthorized),
    ] {
        assert_eq!(
            decide(&policy, &ctx(&error, 0, true)),
            RetryDecision::Rethrow,
            "{error:?}"
        );
    }
}

#[test]
fn test_client_timeout_respects_idempotence() {
    let policy = DefaultRetryPolicy;
    let error = ZirconError::RequestTimeout(std::time::Duration::from_secs(12));
    assert_eq!(decide(&policy, &ctx(&error, 0, false)), RetryDecision::Rethrow);
    assert_eq!(
        decide(&policy, &ctx(&error, 0, true)),
        RetryDecision::RetryNext(Consistency::Quorum)
    );
}

#[test]
fn test_fallthrough_policy_never_retries() {
    let policy = FallthroughRetryPolicy;
    let errors = [
        db(DbError::ReadTimeout {
            consistency: Consistency::One,
            received: 1,
            block_for: 1,
            data_present: false,
        }),
        db(DbError::Unavailable {
            consistency: Consistency::One,
            required: 1,
            alive: 0,
        }),
        db(DbError::Overloaded),
        ZirconError::RequestTimeout(std::time::Duration::from_secs(1)),
    ];
    for error in &errors {
        assert_eq!(decide(&policy, &ctx(error, 0, true)), RetryDecision::Rethrow);
    }
}

#[test]
fn test_retry_eligibility_classification() {
    assert!(
        DbError::Unavailable {
            consistency: Consistency::One,
            required: 1,
            alive: 0
        }
        .is_retry_eligible()
    );
    assert!(DbError::Overloaded.is_retry_eligible());
    assert!(DbError::TruncateError.is_retry_eligible());
    assert!(!DbError::SyntaxError.is_retry_eligible());
    assert!(!DbError::AuthenticationError.is_retry_eligible());
    assert!(
        !DbError::Unprepared {
            prepared_id: vec![]
        }
        .is_retry_eligible()
    );
}
