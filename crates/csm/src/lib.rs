//! REST client for the CSM.ai image-to-3D service.
//!
//! Provides the HTTP API wrapper used to submit an image and poll the
//! resulting model, plus the payload types of the completion webhook the
//! service calls back into.

pub mod api;
pub mod messages;
