//! Executor entry modes: a long-lived webhook server or a one-shot batch run.

pub mod batch;
pub mod online;
