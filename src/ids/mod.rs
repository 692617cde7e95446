// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Snowflake ids and the Ray ID wrapper used for per-request stamping.

pub mod rayid;
pub mod snowflake;
