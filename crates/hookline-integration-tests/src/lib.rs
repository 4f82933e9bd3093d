//! End-to-end scenarios for `hookline-core`.
//!
//! The scenarios live under `tests/` and drive the pipeline through its
//! public API only.
