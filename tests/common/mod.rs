#![allow(dead_code)]

pub mod entities;
pub mod hooks;
pub mod repositories;
pub mod resources;
pub mod writers;

pub use entities::{Order, User};
pub use hooks::{FailingHook, RecordingPostHook, RecordingPreHook, SoftDeleteHook};
pub use repositories::{OrderRepository, UserRepository};
pub use resources::{FakeExecutor, FakeProvider, Journal, RecordingObserver, RecordingScopeFactory};
