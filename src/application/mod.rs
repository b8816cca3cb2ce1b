pub mod bootstrap;
pub mod sync_dispatcher;
pub mod sync_queue;
pub mod timer_controller;
