//! Batch dispatch: one batch at a time, files converted on a bounded pool.

mod dispatcher;

pub use dispatcher::{Converter, Dispatcher};
