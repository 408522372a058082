pub mod billing;
pub mod booking;
pub mod change;
pub mod complaint;
pub mod conversation;
pub mod trip;
