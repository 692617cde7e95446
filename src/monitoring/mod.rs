// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Observability: structured logging setup and the Prometheus metrics
//! registry.

pub mod metrics;
