//! Cross-crate integration tests live under `tests/` in this package;
//! this crate has no runtime surface of its own.
