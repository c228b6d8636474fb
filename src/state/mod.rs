//! System state authority: validated transitions, bounded history, change
//! notifications, and the alcohol override.

pub mod manager;

pub use manager::{StateDispatcher, StateManager, StateManagerConfig, StateSubscriber};
