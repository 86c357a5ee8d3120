//! Unit of work: managed instances, snapshot dirty checking and flush.

pub mod entity;
pub mod unit_of_work;

pub use entity::EntityInstance;
pub use unit_of_work::{EntityKey, FlushReport, Session, SessionState};
