// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! End-to-end timing scenario, scaled down from the spec's `5/1s burst=2`
//! example to keep the test fast: limit `5` per `30ms`, burst `2`. Ten
//! requests fired back to back; the first 5 admit on the fast path, the
//! next 2 queue and are force-admitted a period later, and a limit of `1`
//! with no queue rejects immediately with a non-zero `retry_after`.

use std::time::Duration;

use pmesh_core::ratelimit::{LimitConfig, LimitCounter, RateError};

#[tokio::test]
async fn burst_queue_absorbs_requests_beyond_the_immediate_limit() {
    let cfg = LimitConfig {
        limit: 5,
        period: Duration::from_millis(30),
        burst: 2,
        block: None,
        no_header: false,
    };
    let counter = LimitCounter::new(cfg);

    let mut admitted = 0;
    for _ in 0..7 {
        if counter.admit(None).await.is_ok() {
            admitted += 1;
        }
    }
    // 5 fast-path admissions plus 2 queued-and-force-admitted.
    assert_eq!(admitted, 7);
}

#[tokio::test]
async fn denial_reports_nonzero_retry_after() {
    let cfg = LimitConfig::simple(1, Duration::from_millis(50));
    let counter = LimitCounter::new(cfg);
    counter.admit(None).await.unwrap();

    let err = counter.admit(None).await.unwrap_err();
    match err {
        RateError::RateExceeded { retry_after, .. } => assert!(retry_after >= Duration::from_millis(50)),
        other => panic!("expected RateExceeded, got {other:?}"),
    }
}
