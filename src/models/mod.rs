pub mod driver;
pub mod notification;
pub mod offer;
pub mod pool;
pub mod ride;
