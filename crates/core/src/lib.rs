//! Reverie core: sample-level effects processing
//!
//! Everything in this crate runs on the thread that pulls audio. The
//! visualization side (analysis thread, spectrum publishing) lives in
//! `reverie-infra`.

pub mod domain;
