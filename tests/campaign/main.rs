#![allow(clippy::float_cmp, clippy::cast_precision_loss)]

mod e2e;
mod failures;
mod resume;
mod stopping;
mod support;
