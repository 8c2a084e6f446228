pub mod dispatch;
pub mod lifecycle;
pub mod offers;
pub mod pool;
pub mod queue;
pub mod route;
pub mod scoring;
