//! Local reconstruction job dispatch.
//!
//! [`dispatcher::JobDispatcher`] turns a validated upload batch into a job
//! directory with staged inputs, and later runs the external reconstruction
//! tool against it. [`queue::DispatchQueue`] decouples the two: request
//! handlers only prepare and enqueue, a background worker executes.

pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod subprocess;
pub mod tool;
pub mod workspace;
